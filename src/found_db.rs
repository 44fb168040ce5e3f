use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow, bail};
use image::DynamicImage;
use indicatif::{ParallelProgressIterator, ProgressBar};
use log::{debug, info, warn};
use rayon::prelude::*;
use walkdir::WalkDir;

use crate::config::{DataDir, ModelOptions};
use crate::embed::{ClipEmbedder, Embedder};
use crate::index::{self, ItemIndex};
use crate::types::*;
use crate::utils::{confidence, is_image_file, pb_style};
use crate::vault::Vault;

const NO_DESCRIPTION: &str = "No description provided";
const UNKNOWN_TIME: &str = "Unknown";

pub struct FoundDBBuilder {
    data_dir: DataDir,
    model: ModelOptions,
    embedder: Option<Box<dyn Embedder>>,
}

impl FoundDBBuilder {
    pub fn new(data_dir: DataDir) -> Self {
        Self { data_dir, model: ModelOptions::default(), embedder: None }
    }

    /// 设置 CLIP 模型参数，模型会在第一次需要编码时加载
    pub fn model(mut self, model: ModelOptions) -> Self {
        self.model = model;
        self
    }

    /// 直接指定嵌入模型，不再从模型目录加载
    pub fn embedder(mut self, embedder: Box<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn open(self) -> Result<FoundDB> {
        std::fs::create_dir_all(self.data_dir.found())
            .with_context(|| format!("创建数据目录失败: {}", self.data_dir))?;
        let dimension = match &self.embedder {
            Some(embedder) => embedder.dimension(),
            None => self.model.dimension,
        };
        if let Some(embedder) = &self.embedder {
            debug!("使用嵌入模型 {} ({} 维)", embedder.model_name(), dimension);
        }
        debug!("打开数据目录: {}", self.data_dir);
        Ok(FoundDB {
            vault: Vault::new(self.data_dir.vault()),
            data_dir: self.data_dir,
            model: self.model,
            dimension,
            embedder: Mutex::new(self.embedder),
            rebuild: Mutex::new(()),
        })
    }
}

/// 失物库：图片目录、描述库与向量索引的组合
pub struct FoundDB {
    data_dir: DataDir,
    vault: Vault,
    model: ModelOptions,
    dimension: usize,
    embedder: Mutex<Option<Box<dyn Embedder>>>,
    /// 图片目录与索引的写锁
    rebuild: Mutex<()>,
}

impl FoundDB {
    pub fn data_dir(&self) -> &DataDir {
        &self.data_dir
    }

    pub fn vault(&self) -> &Vault {
        &self.vault
    }

    /// 使用嵌入模型执行操作，模型未加载时先加载
    fn with_embedder<R>(&self, f: impl FnOnce(&mut dyn Embedder) -> Result<R>) -> Result<R> {
        let mut guard = self.embedder.lock().map_err(|_| anyhow!("嵌入模型锁已损坏"))?;
        if guard.is_none() {
            let embedder = ClipEmbedder::open(&self.model)?;
            info!("已加载嵌入模型 {} ({} 维)", embedder.model_name(), embedder.dimension());
            *guard = Some(Box::new(embedder));
        }
        let embedder = guard.as_mut().ok_or_else(|| anyhow!("嵌入模型未加载"))?;
        f(&mut **embedder)
    }

    /// 扫描失物目录下的所有图片，按文件名排序
    ///
    /// 目录无法读取时返回错误，而不是当作空目录
    pub fn found_images(&self) -> Result<Vec<PathBuf>> {
        let found = self.data_dir.found();
        let mut images = vec![];
        for entry in WalkDir::new(&found).min_depth(1).max_depth(1).sort_by_file_name() {
            let entry = entry.with_context(|| format!("读取失物目录失败: {}", found.display()))?;
            if entry.file_type().is_file() && is_image_file(entry.path()) {
                images.push(entry.into_path());
            }
        }
        Ok(images)
    }

    /// 失物图片的文件名列表，顺序与建立索引时一致
    pub fn filenames(&self) -> Result<Vec<String>> {
        self.found_images()?.iter().map(|p| file_name(p)).collect()
    }

    /// 批量编码图片，返回 `(文件名, 向量)`
    ///
    /// 任意一张图片无法解码都会导致整批失败
    pub fn encode_bulk(&self, paths: &[PathBuf]) -> Result<Vec<(String, Vec<f32>)>> {
        let pb = ProgressBar::new(paths.len() as u64).with_style(pb_style());
        pb.set_message("解码图片");
        let images = paths
            .par_iter()
            .progress_with(pb.clone())
            .map(|path| {
                let img = image::open(path)
                    .with_context(|| format!("无法解码图片: {}", path.display()))?;
                Ok((file_name(path)?, img))
            })
            .collect::<Result<Vec<_>>>()?;

        pb.reset();
        pb.set_message("计算特征");
        let items = self.with_embedder(|embedder| {
            images
                .iter()
                .map(|(name, img)| {
                    let vector = embedder.embed(img)?;
                    pb.inc(1);
                    Ok((name.clone(), vector))
                })
                .collect::<Result<Vec<_>>>()
        })?;
        pb.finish_and_clear();

        Ok(items)
    }

    /// 使用全部失物图片重建索引，返回物品数量
    ///
    /// 没有任何图片时删除索引文件
    pub fn rebuild_index(&self) -> Result<usize> {
        let _guard = self.rebuild.lock().map_err(|_| anyhow!("索引锁已损坏"))?;
        self.rebuild_locked()
    }

    fn rebuild_locked(&self) -> Result<usize> {
        let paths = self.found_images()?;
        if paths.is_empty() {
            remove_if_exists(&self.data_dir.index())?;
            info!("失物库为空，已移除索引");
            return Ok(0);
        }
        info!("正在重建索引: {} 件物品", paths.len());
        let items = self.encode_bulk(&paths)?;
        let (index, _) = index::build_index(items, self.dimension, self.data_dir.index())?;
        Ok(index.len())
    }

    /// 登记一件捡到的物品：保存图片，重建索引，写入描述，返回物品总数
    ///
    /// 同名文件会被覆盖。重建索引失败时图片目录恢复原状
    pub fn add_item(&self, filename: &str, data: &[u8], description: &str) -> Result<usize> {
        let path = Path::new(filename);
        if path.file_name() != Some(OsStr::new(filename)) {
            bail!("文件名不合法: {}", filename);
        }
        if !is_image_file(path) {
            bail!("不支持的图片格式: {}", filename);
        }
        image::load_from_memory(data).with_context(|| format!("无法解码图片: {}", filename))?;

        let _guard = self.rebuild.lock().map_err(|_| anyhow!("索引锁已损坏"))?;
        let target = self.data_dir.found().join(filename);
        let previous = match std::fs::read(&target) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                return Err(e).with_context(|| format!("读取图片失败: {}", target.display()));
            }
        };
        std::fs::write(&target, data)
            .with_context(|| format!("保存图片失败: {}", target.display()))?;

        let total = match self.rebuild_locked() {
            Ok(total) => total,
            Err(e) => {
                let restored = match previous {
                    Some(bytes) => std::fs::write(&target, bytes),
                    None => std::fs::remove_file(&target),
                };
                if let Err(re) = restored {
                    warn!("恢复图片失败 {}: {}", target.display(), re);
                }
                return Err(e);
            }
        };
        self.vault.save(filename, description)?;
        info!("物品 {} 已登记，共 {} 件", filename, total);
        Ok(total)
    }

    /// 使用图片字节搜索
    pub fn search_image(&self, data: &[u8], top_k: usize) -> Result<SearchResponse> {
        let img = image::load_from_memory(data).context("无法解码查询图片")?;
        self.search_decoded(&img, top_k)
    }

    /// 使用已解码的图片搜索
    pub fn search_decoded(&self, img: &DynamicImage, top_k: usize) -> Result<SearchResponse> {
        let vector = self.with_embedder(|embedder| embedder.embed(img))?;
        let filenames = self.filenames()?;
        if filenames.is_empty() {
            return Ok(SearchResponse::empty_database());
        }
        self.match_vector(&vector, &filenames, top_k, SearchType::Image)
    }

    /// 使用文字描述搜索，失物库为空时不会加载模型
    pub fn search_text(&self, query: &str, top_k: usize) -> Result<SearchResponse> {
        let filenames = self.filenames()?;
        if filenames.is_empty() {
            return Ok(SearchResponse::empty_database());
        }
        let vector = self.with_embedder(|embedder| embedder.embed_text(query))?;
        self.match_vector(&vector, &filenames, top_k, SearchType::Text)
    }

    /// 在索引中检索并用描述库补全结果
    fn match_vector(
        &self,
        vector: &[f32],
        filenames: &[String],
        top_k: usize,
        search_type: SearchType,
    ) -> Result<SearchResponse> {
        let matches =
            index::search(self.data_dir.index(), self.dimension, vector, filenames, top_k)?;
        let records = self.vault.load();
        let results = matches
            .into_iter()
            .map(|(name, score)| {
                let record = records.get(&name);
                SearchResult {
                    confidence: confidence(score),
                    search_type,
                    description: record
                        .map(|r| r.description.clone())
                        .unwrap_or_else(|| NO_DESCRIPTION.to_string()),
                    found_at: record
                        .map(|r| r.timestamp.clone())
                        .unwrap_or_else(|| UNKNOWN_TIME.to_string()),
                    item_name: name,
                }
            })
            .collect();
        Ok(SearchResponse { results, message: None })
    }

    /// 清空失物目录、描述库与索引
    pub fn reset(&self) -> Result<()> {
        let _guard = self.rebuild.lock().map_err(|_| anyhow!("索引锁已损坏"))?;
        let found = self.data_dir.found();
        for entry in std::fs::read_dir(&found)? {
            let path = entry?.path();
            if path.is_dir() {
                std::fs::remove_dir_all(&path)?;
            } else {
                std::fs::remove_file(&path)?;
            }
        }
        self.vault.clear()?;
        remove_if_exists(&self.data_dir.index())?;
        info!("已清空 {}", self.data_dir);
        Ok(())
    }

    /// 数据目录状态
    pub fn status(&self) -> Result<Status> {
        let index_path = self.data_dir.index();
        let indexed = match index_path.exists() {
            true => Some(ItemIndex::open(&index_path, self.dimension)?.len()),
            false => None,
        };
        Ok(Status {
            items: self.found_images()?.len(),
            vault_entries: self.vault.load().len(),
            indexed,
        })
    }
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("无效的文件路径: {}", path.display()))
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{ImageFormat, Rgb, RgbImage};

    use super::*;

    /// 以左上角像素颜色作为图片向量，以颜色单词作为文字向量
    struct ColorEmbedder;

    impl Embedder for ColorEmbedder {
        fn embed(&mut self, image: &DynamicImage) -> Result<Vec<f32>> {
            let p = image.to_rgb8().get_pixel(0, 0).0;
            Ok(vec![p[0] as f32 / 255., p[1] as f32 / 255., p[2] as f32 / 255., 0.1])
        }

        fn embed_text(&mut self, text: &str) -> Result<Vec<f32>> {
            Ok(match text {
                "red" => vec![1., 0., 0., 0.1],
                "green" => vec![0., 1., 0., 0.1],
                "blue" => vec![0., 0., 1., 0.1],
                _ => vec![0.1; 4],
            })
        }

        fn dimension(&self) -> usize {
            4
        }

        fn model_name(&self) -> &str {
            "color"
        }
    }

    fn png(color: [u8; 3]) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb(color)));
        let mut buf = Cursor::new(vec![]);
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn open_db(dir: &Path) -> FoundDB {
        FoundDBBuilder::new(DataDir::new(dir)).embedder(Box::new(ColorEmbedder)).open().unwrap()
    }

    fn populated_db(dir: &Path) -> FoundDB {
        let db = open_db(dir);
        db.add_item("red.png", &png([255, 0, 0]), "Red umbrella, main gate").unwrap();
        db.add_item("green.png", &png([0, 255, 0]), "Green bottle, library").unwrap();
        db.add_item("blue.png", &png([0, 0, 255]), "Blue keys, canteen").unwrap();
        db
    }

    /// 模型目录为空，一旦尝试加载模型就会报错
    fn db_without_model(dir: &Path) -> FoundDB {
        let model = ModelOptions {
            model_dir: dir.join("no-models").to_string_lossy().into_owned(),
            dimension: 4,
        };
        FoundDBBuilder::new(DataDir::new(dir)).model(model).open().unwrap()
    }

    #[test]
    fn add_rebuilds_index_and_vault() {
        let dir = tempfile::tempdir().unwrap();
        let db = populated_db(dir.path());

        assert_eq!(db.filenames().unwrap(), vec!["blue.png", "green.png", "red.png"]);
        let status = db.status().unwrap();
        assert_eq!(status, Status { items: 3, vault_entries: 3, indexed: Some(3) });
    }

    #[test]
    fn image_search_returns_self_first() {
        let dir = tempfile::tempdir().unwrap();
        let db = populated_db(dir.path());

        let response = db.search_image(&png([255, 0, 0]), 3).unwrap();
        assert_eq!(response.message, None);
        assert_eq!(response.results.len(), 3);
        let top = &response.results[0];
        assert_eq!(top.item_name, "red.png");
        assert_eq!(top.confidence, 100.0);
        assert_eq!(top.search_type, SearchType::Image);
        assert_eq!(top.description, "Red umbrella, main gate");
        assert_eq!(top.found_at.len(), 19);
        assert!(response.results.windows(2).all(|w| w[0].confidence >= w[1].confidence));
    }

    #[test]
    fn text_search_uses_shared_space() {
        let dir = tempfile::tempdir().unwrap();
        let db = populated_db(dir.path());

        let response = db.search_text("green", 1).unwrap();
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].item_name, "green.png");
        assert_eq!(response.results[0].search_type, SearchType::Text);
    }

    #[test]
    fn text_search_on_empty_corpus_skips_model() {
        let dir = tempfile::tempdir().unwrap();
        let db = db_without_model(dir.path());

        let response = db.search_text("blue keys", 3).unwrap();
        assert_eq!(response, SearchResponse::empty_database());
    }

    #[test]
    fn image_search_on_empty_corpus() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(dir.path());

        let response = db.search_image(&png([1, 2, 3]), 3).unwrap();
        assert!(response.results.is_empty());
        assert!(db.search_image(b"not an image", 3).is_err());
    }

    #[test]
    fn reupload_overwrites_description() {
        let dir = tempfile::tempdir().unwrap();
        let db = populated_db(dir.path());

        let total = db.add_item("red.png", &png([255, 0, 0]), "Moved to lost & found desk").unwrap();
        assert_eq!(total, 3);
        let records = db.vault().load();
        assert_eq!(records.len(), 3);
        assert_eq!(records["red.png"].description, "Moved to lost & found desk");
    }

    #[test]
    fn add_rejects_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(dir.path());

        assert!(db.add_item("../escape.png", &png([0, 0, 0]), "").is_err());
        assert!(db.add_item("notes.txt", &png([0, 0, 0]), "").is_err());
        assert!(db.add_item("broken.png", b"definitely not a png", "").is_err());
        assert!(db.found_images().unwrap().is_empty());
        assert!(db.vault().load().is_empty());
    }

    #[test]
    fn failed_add_leaves_found_dir_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let db = db_without_model(dir.path());

        assert!(db.add_item("keys.png", &png([9, 9, 9]), "near library").is_err());
        assert!(db.found_images().unwrap().is_empty());
        assert!(db.vault().load().is_empty());
        assert_eq!(db.search_text("keys", 3).unwrap(), SearchResponse::empty_database());
    }

    #[test]
    fn failed_reupload_restores_previous_image() {
        let dir = tempfile::tempdir().unwrap();
        let db = populated_db(dir.path());
        let red = db.data_dir().found().join("red.png");
        let before = std::fs::read(&red).unwrap();
        std::fs::write(db.data_dir().found().join("corrupt.jpg"), b"garbage").unwrap();

        assert!(db.add_item("red.png", &png([200, 0, 0]), "Another umbrella").is_err());
        assert_eq!(std::fs::read(&red).unwrap(), before);
        assert_eq!(db.vault().load()["red.png"].description, "Red umbrella, main gate");
    }

    #[test]
    fn concurrent_rebuilds_leave_one_complete_index() {
        let dir = tempfile::tempdir().unwrap();
        let db = populated_db(dir.path());

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| assert_eq!(db.rebuild_index().unwrap(), 3));
            }
        });

        assert_eq!(db.status().unwrap().indexed, Some(3));
        let mut names = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        names.sort();
        assert_eq!(names, vec!["found", "items.index", "vault.json"]);
    }

    #[test]
    fn unreadable_found_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let db = populated_db(dir.path());
        std::fs::remove_dir_all(db.data_dir().found()).unwrap();

        assert!(db.found_images().is_err());
        assert!(db.search_text("red", 3).is_err());
        assert!(db.search_image(&png([255, 0, 0]), 3).is_err());
        assert!(db.rebuild_index().is_err());
        assert!(db.data_dir().index().exists());
    }

    #[test]
    fn missing_vault_entry_uses_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(dir.path());
        std::fs::write(db.data_dir().found().join("mystery.png"), png([10, 200, 10])).unwrap();
        std::fs::write(db.data_dir().found().join("readme.txt"), "ignored").unwrap();
        assert_eq!(db.rebuild_index().unwrap(), 1);

        let response = db.search_image(&png([10, 200, 10]), 3).unwrap();
        assert_eq!(response.results.len(), 1);
        assert_eq!(response.results[0].description, NO_DESCRIPTION);
        assert_eq!(response.results[0].found_at, UNKNOWN_TIME);
    }

    #[test]
    fn missing_index_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(dir.path());
        std::fs::write(db.data_dir().found().join("orphan.png"), png([5, 5, 5])).unwrap();

        assert!(db.search_image(&png([5, 5, 5]), 3).is_err());
    }

    #[test]
    fn corrupt_found_image_fails_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let db = populated_db(dir.path());
        std::fs::write(db.data_dir().found().join("corrupt.jpg"), b"garbage").unwrap();

        assert!(db.rebuild_index().is_err());
    }

    #[test]
    fn reset_clears_everything() {
        let dir = tempfile::tempdir().unwrap();
        let db = populated_db(dir.path());
        db.reset().unwrap();

        assert_eq!(std::fs::read_to_string(db.data_dir().vault()).unwrap(), "{}");
        assert_eq!(std::fs::read_dir(db.data_dir().found()).unwrap().count(), 0);
        assert!(!db.data_dir().index().exists());
        assert_eq!(db.search_text("red", 3).unwrap(), SearchResponse::empty_database());
        assert!(db.search_image(&png([255, 0, 0]), 3).unwrap().results.is_empty());
        assert_eq!(db.status().unwrap(), Status { items: 0, vault_entries: 0, indexed: None });
    }
}
