use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use log::{debug, info, warn};
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use crate::utils::l2_normalize;

/// 失物向量索引，向量在索引中的 key 即其在文件名列表中的位置
///
/// 入库前所有向量都做 L2 归一化，内积即为余弦相似度
pub struct ItemIndex {
    index: Index,
    /// 向量维数
    dimensions: usize,
}

impl ItemIndex {
    fn options(dimensions: usize) -> IndexOptions {
        IndexOptions {
            dimensions,
            metric: MetricKind::IP,
            quantization: ScalarKind::F32,
            ..Default::default()
        }
    }

    /// 使用一组向量创建索引，第 i 个向量的 key 为 i
    pub fn from_vectors(vectors: &[Vec<f32>], dimensions: usize) -> Result<Self> {
        let index = Index::new(&Self::options(dimensions))?;
        index.reserve(vectors.len())?;
        for (i, v) in vectors.iter().enumerate() {
            if v.len() != dimensions {
                bail!("第 {} 个向量维数为 {}，期望 {}", i, v.len(), dimensions);
            }
            let mut v = v.clone();
            l2_normalize(&mut v);
            index.add(i as u64, &v)?;
        }
        Ok(Self { index, dimensions })
    }

    /// 从文件加载索引
    pub fn open<P: AsRef<Path>>(path: P, dimensions: usize) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            bail!("索引文件不存在: {}，请先运行 build", path.display());
        }
        let index = Index::new(&Self::options(dimensions))?;
        index
            .load(path_str(path)?)
            .with_context(|| format!("加载索引失败: {}", path.display()))?;
        debug!("已加载索引 {}: {} 个向量", path.display(), index.size());
        Ok(Self { index, dimensions })
    }

    /// 将索引写入文件，先写同目录下的临时文件再重命名覆盖
    ///
    /// 每次写入使用不同的临时文件，并发写入时最后完成的一次生效
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let parent = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        let tmp = tempfile::Builder::new()
            .prefix(".items.")
            .suffix(".tmp")
            .tempfile_in(parent)
            .with_context(|| format!("创建临时文件失败: {}", parent.display()))?;
        self.index
            .save(path_str(tmp.path())?)
            .with_context(|| format!("写入索引失败: {}", tmp.path().display()))?;
        tmp.persist(path).with_context(|| format!("替换索引失败: {}", path.display()))?;
        Ok(())
    }

    /// 该索引中的向量数量
    pub fn len(&self) -> usize {
        self.index.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 精确搜索与查询向量内积最大的 k 个向量，返回 `(key, 相似度)`，按相似度降序
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(u64, f32)>> {
        if query.len() != self.dimensions {
            bail!("查询向量维数为 {}，期望 {}", query.len(), self.dimensions);
        }
        let mut query = query.to_vec();
        l2_normalize(&mut query);
        let matches = self.index.exact_search(&query, k)?;
        // usearch 的内积距离为 1 - <a, b>
        let mut result = matches
            .keys
            .into_iter()
            .zip(matches.distances)
            .map(|(key, distance)| (key, 1. - distance))
            .collect::<Vec<_>>();
        result.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(result)
    }
}

/// 使用全部物品向量重建索引并写入 `path`，返回索引与按插入顺序排列的文件名列表
///
/// 搜索时必须传入同一个文件名列表，否则结果会错位
pub fn build_index<P: AsRef<Path>>(
    items: Vec<(String, Vec<f32>)>,
    dimensions: usize,
    path: P,
) -> Result<(ItemIndex, Vec<String>)> {
    if items.is_empty() {
        bail!("没有可索引的物品");
    }
    let (filenames, vectors): (Vec<_>, Vec<_>) = items.into_iter().unzip();
    let index = ItemIndex::from_vectors(&vectors, dimensions)?;
    index.save(path.as_ref())?;
    info!("索引已写入 {}: {} 件物品", path.as_ref().display(), index.len());
    Ok((index, filenames))
}

/// 加载持久化的索引，返回最相似的 `top_k` 个 `(文件名, 相似度)`
pub fn search<P: AsRef<Path>>(
    path: P,
    dimensions: usize,
    query: &[f32],
    filenames: &[String],
    top_k: usize,
) -> Result<Vec<(String, f32)>> {
    let index = ItemIndex::open(path, dimensions)?;
    search_index(&index, query, filenames, top_k)
}

/// 在已加载的索引中搜索，无法对应到文件名的结果会被丢弃
pub fn search_index(
    index: &ItemIndex,
    query: &[f32],
    filenames: &[String],
    top_k: usize,
) -> Result<Vec<(String, f32)>> {
    if index.len() != filenames.len() {
        warn!("索引中有 {} 个向量，但文件名列表有 {} 项，索引可能已过期", index.len(), filenames.len());
    }
    let result = index
        .search(query, top_k)?
        .into_iter()
        .filter_map(|(key, score)| filenames.get(key as usize).map(|name| (name.clone(), score)))
        .collect();
    Ok(result)
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str().ok_or_else(|| anyhow!("路径不是合法的 UTF-8: {}", path.display()))
}
