mod clip;

use anyhow::Result;
use image::DynamicImage;

pub use clip::ClipEmbedder;

/// 将图片或文字编码到同一向量空间的嵌入模型
///
/// 返回的向量不保证归一化，比较之前需要调用方自行归一化
pub trait Embedder: Send {
    /// 编码一张已解码的图片
    fn embed(&mut self, image: &DynamicImage) -> Result<Vec<f32>>;

    /// 编码一段文字
    fn embed_text(&mut self, text: &str) -> Result<Vec<f32>>;

    /// 向量维度
    fn dimension(&self) -> usize;

    /// 模型名称
    fn model_name(&self) -> &str;
}
