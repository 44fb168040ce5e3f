use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use log::info;
use tokio::task::block_in_place;

use super::open_db;
use crate::cli::SubCommandExtend;
use crate::config::{ModelOptions, Opts};

#[derive(Parser, Debug, Clone)]
pub struct AddCommand {
    #[command(flatten)]
    pub model: ModelOptions,
    /// 捡到物品的图片路径
    pub image: PathBuf,
    /// 物品描述，例如在哪里捡到
    #[arg(long, default_value_t = String::new())]
    pub description: String,
    /// 保存到库中的文件名，默认沿用图片原文件名
    #[arg(long, value_name = "FILENAME")]
    pub name: Option<String>,
}

impl SubCommandExtend for AddCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let name = match &self.name {
            Some(name) => name.clone(),
            None => self
                .image
                .file_name()
                .map(|s| s.to_string_lossy().into_owned())
                .ok_or_else(|| anyhow!("无效的图片路径: {}", self.image.display()))?,
        };
        let data = tokio::fs::read(&self.image)
            .await
            .with_context(|| format!("读取图片失败: {}", self.image.display()))?;

        let db = open_db(opts, &self.model)?;
        let total = block_in_place(|| db.add_item(&name, &data, &self.description))?;
        info!("物品 {} 已登记并完成索引，库中共 {} 件物品", name, total);
        Ok(())
    }
}
