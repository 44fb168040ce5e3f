use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use image::DynamicImage;
use image::imageops::FilterType;
use log::{debug, info};
use ndarray::{Array2, Array4};
use ort::session::Session;
use ort::{inputs, value::Value};
use tokenizers::Tokenizer;

use super::Embedder;
use crate::config::ModelOptions;

/// CLIP 输入图片边长
const IMAGE_SIZE: u32 = 224;
/// CLIP 文本最大 token 数
const MAX_TOKENS: usize = 77;

const CLIP_MEAN: [f32; 3] = [0.48145466, 0.4578275, 0.40821073];
const CLIP_STD: [f32; 3] = [0.26862954, 0.26130258, 0.27577711];

const HF_REPO: &str = "https://huggingface.co/Xenova/clip-vit-base-patch32/resolve/main";

/// 基于 ONNX Runtime 的 CLIP 嵌入模型，图片与文字共享同一向量空间
pub struct ClipEmbedder {
    vision: Session,
    text: Session,
    tokenizer: Tokenizer,
    dimension: usize,
    model_name: String,
}

impl ClipEmbedder {
    /// 从模型目录加载视觉模型、文本模型与分词器
    pub fn open(opts: &ModelOptions) -> Result<Self> {
        let dir = Path::new(&opts.model_dir);
        let vision_path = require(dir.join("vision_model.onnx"), "onnx/vision_model.onnx")?;
        let text_path = require(dir.join("text_model.onnx"), "onnx/text_model.onnx")?;
        let tokenizer_path = require(dir.join("tokenizer.json"), "tokenizer.json")?;

        info!("加载 CLIP 模型: {}", dir.display());

        let vision = Session::builder()
            .context("创建 ONNX 会话失败")?
            .commit_from_file(&vision_path)
            .with_context(|| format!("加载视觉模型失败: {}", vision_path.display()))?;
        let text = Session::builder()
            .context("创建 ONNX 会话失败")?
            .commit_from_file(&text_path)
            .with_context(|| format!("加载文本模型失败: {}", text_path.display()))?;

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("加载分词器失败: {}", e))?;
        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: MAX_TOKENS,
                ..Default::default()
            }))
            .map_err(|e| anyhow!("设置截断长度失败: {}", e))?;

        Ok(Self {
            vision,
            text,
            tokenizer,
            dimension: opts.dimension,
            model_name: String::from("clip-ViT-B-32"),
        })
    }

    /// 缩放并居中裁剪到 224x224，按 CLIP 的均值与方差标准化为 NCHW 张量
    pub(crate) fn pixel_values(image: &DynamicImage) -> Array4<f32> {
        let rgb = image.resize_to_fill(IMAGE_SIZE, IMAGE_SIZE, FilterType::CatmullRom).to_rgb8();
        let size = IMAGE_SIZE as usize;
        let mut pixels = Array4::<f32>::zeros((1, 3, size, size));
        for (x, y, p) in rgb.enumerate_pixels() {
            for c in 0..3 {
                let v = p[c] as f32 / 255.0;
                pixels[[0, c, y as usize, x as usize]] = (v - CLIP_MEAN[c]) / CLIP_STD[c];
            }
        }
        pixels
    }

    fn tokenize(&self, text: &str) -> Result<(Vec<i64>, Vec<i64>)> {
        let encoding =
            self.tokenizer.encode(text, true).map_err(|e| anyhow!("分词失败: {}", e))?;
        let ids = encoding.get_ids().iter().map(|&x| x as i64).collect();
        let mask = encoding.get_attention_mask().iter().map(|&x| x as i64).collect();
        Ok((ids, mask))
    }
}

impl Embedder for ClipEmbedder {
    fn embed(&mut self, image: &DynamicImage) -> Result<Vec<f32>> {
        let pixels = Self::pixel_values(image);
        let outputs = self
            .vision
            .run(inputs!["pixel_values" => Value::from_array(pixels)?])
            .context("视觉模型推理失败")?;
        let (shape, data) =
            outputs["image_embeds"].try_extract_tensor::<f32>().context("读取 image_embeds 失败")?;
        let embedding = take_embedding(shape.as_ref(), data, self.dimension)?;
        debug!("图片编码完成: {} 维", embedding.len());
        Ok(embedding)
    }

    fn embed_text(&mut self, text: &str) -> Result<Vec<f32>> {
        let (ids, mask) = self.tokenize(text)?;
        let len = ids.len();
        let ids = Array2::from_shape_vec((1, len), ids).context("构建 input_ids 失败")?;
        let mask = Array2::from_shape_vec((1, len), mask).context("构建 attention_mask 失败")?;
        let outputs = self
            .text
            .run(inputs![
                "input_ids" => Value::from_array(ids)?,
                "attention_mask" => Value::from_array(mask)?
            ])
            .context("文本模型推理失败")?;
        let (shape, data) =
            outputs["text_embeds"].try_extract_tensor::<f32>().context("读取 text_embeds 失败")?;
        let embedding = take_embedding(shape.as_ref(), data, self.dimension)?;
        debug!("文本编码完成: {:?} -> {} 维", text, embedding.len());
        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// 取出 batch 中第一条嵌入向量，形状应为 [1, dim]
fn take_embedding(dims: &[i64], data: &[f32], dimension: usize) -> Result<Vec<f32>> {
    if dims.len() != 2 || dims[1] as usize != dimension || data.len() < dimension {
        bail!("模型输出形状不符: {:?}，期望 [1, {}]", dims, dimension);
    }
    Ok(data[..dimension].to_vec())
}

fn require(path: PathBuf, remote: &str) -> Result<PathBuf> {
    if !path.exists() {
        bail!(
            "模型文件不存在: {}\n\n下载方式:\n  curl -L -o {} {}/{}",
            path.display(),
            path.display(),
            HF_REPO,
            remote
        );
    }
    Ok(path)
}
