use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::utils::timestamp;

/// 描述库中的一条记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultRecord {
    pub description: String,
    /// 登记时间，格式为 `YYYY-MM-DD HH:MM:SS`
    pub timestamp: String,
}

/// 以文件名为键的物品描述库，整体存放在一个 JSON 文件中
///
/// 同一进程内的写入互斥，并通过临时文件重命名保证读者不会读到写了一半的文件。
/// 多进程同时写入时后写者覆盖先写者。
pub struct Vault {
    path: PathBuf,
    lock: Mutex<()>,
}

impl Vault {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self { path: path.as_ref().to_path_buf(), lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取整个描述库，文件缺失、无法读取或格式错误时返回空表
    pub fn load(&self) -> BTreeMap<String, VaultRecord> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) => {
                debug!("描述库不可读 {}: {}", self.path.display(), e);
                return BTreeMap::new();
            }
        };
        match serde_json::from_slice(&data) {
            Ok(records) => records,
            Err(e) => {
                warn!("描述库格式错误 {}，按空表处理: {}", self.path.display(), e);
                BTreeMap::new()
            }
        }
    }

    /// 写入一条描述，已存在的同名记录会被覆盖
    pub fn save(&self, filename: &str, description: &str) -> Result<()> {
        let _guard = self.lock.lock().map_err(|_| anyhow!("描述库锁已损坏"))?;
        let mut records = self.load();
        records.insert(
            filename.to_string(),
            VaultRecord { description: description.to_string(), timestamp: timestamp() },
        );
        self.write(&records)
    }

    /// 清空描述库，写入 `{}`
    pub fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock().map_err(|_| anyhow!("描述库锁已损坏"))?;
        self.write(&BTreeMap::new())
    }

    fn write(&self, records: &BTreeMap<String, VaultRecord>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let parent = self.path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        let mut tmp = tempfile::Builder::new()
            .prefix(".vault.")
            .suffix(".tmp")
            .tempfile_in(parent)
            .with_context(|| format!("创建临时文件失败: {}", parent.display()))?;
        serde_json::to_writer_pretty(&mut tmp, records)?;
        tmp.flush()?;
        tmp.persist(&self.path)
            .with_context(|| format!("写入描述库失败: {}", self.path.display()))?;
        Ok(())
    }
}
