use std::path::Path;
use std::sync::LazyLock;

use indicatif::ProgressStyle;
use regex::Regex;

static IMAGE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(jpg|jpeg|png)$").expect("failed to build regex"));

/// 判断路径是否带有受支持的图片后缀
pub fn is_image_file<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref()
        .extension()
        .map(|ext| IMAGE_SUFFIX.is_match(&ext.to_string_lossy()))
        .unwrap_or(false)
}

/// 原地 L2 归一化，零向量保持不变
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
}

/// 将余弦相似度转换为百分制置信度，保留两位小数
///
/// 浮点误差导致的越界值会被截断到 [0, 100]
pub fn confidence(score: f32) -> f64 {
    let clamped = (score as f64).clamp(0.0, 1.0);
    (clamped * 100.0 * 100.0).round() / 100.0
}

/// 当前本地时间，格式为 `YYYY-MM-DD HH:MM:SS`
pub fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

pub fn pb_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
        .expect("invalid progress template")
}
