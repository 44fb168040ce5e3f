use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use clap::{Parser, Subcommand, ValueEnum};
use directories::ProjectDirs;

use crate::cli::*;

static DATA_DIR: LazyLock<String> = LazyLock::new(|| {
    match ProjectDirs::from("", "boomerang", "boomerang") {
        Some(dirs) => dirs.data_dir().to_string_lossy().into_owned(),
        None => String::from("data"),
    }
});

static MODEL_DIR: LazyLock<String> =
    LazyLock::new(|| Path::new(&*DATA_DIR).join("models").to_string_lossy().into_owned());

fn default_data_dir() -> &'static str {
    DATA_DIR.as_str()
}

fn default_model_dir() -> &'static str {
    MODEL_DIR.as_str()
}

#[derive(Parser, Debug, Clone)]
pub struct ModelOptions {
    /// CLIP 模型目录，需包含 vision_model.onnx、text_model.onnx 与 tokenizer.json
    #[arg(long, value_name = "DIR", default_value = default_model_dir())]
    pub model_dir: String,
    /// 嵌入向量维度，CLIP ViT-B/32 为 512
    #[arg(long, value_name = "N", default_value_t = 512)]
    pub dimension: usize,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self { model_dir: default_model_dir().to_string(), dimension: 512 }
    }
}

#[derive(Parser, Debug, Clone)]
pub struct SearchOptions {
    /// 返回的最相似物品数量
    #[arg(short = 'k', long, value_name = "K", default_value_t = 3)]
    pub top_k: usize,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "boomerang", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// 数据目录，存放失物图片、描述库与索引
    #[arg(short, long, default_value = default_data_dir())]
    pub data_dir: DataDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 登记一件捡到的物品
    Add(AddCommand),
    /// 使用图片搜索丢失的物品
    Search(SearchCommand),
    /// 使用文字描述搜索丢失的物品
    SearchText(SearchTextCommand),
    /// 重新构建索引
    Build(BuildCommand),
    /// 清空所有物品、描述与索引
    Reset(ResetCommand),
    /// 查看数据目录状态
    Status(StatusCommand),
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Table,
}

/// 数据目录布局
#[derive(Debug, Clone)]
pub struct DataDir {
    path: PathBuf,
}

impl DataDir {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回失物图片目录
    pub fn found(&self) -> PathBuf {
        self.path.join("found")
    }

    /// 返回描述库文件路径
    pub fn vault(&self) -> PathBuf {
        self.path.join("vault.json")
    }

    /// 返回索引文件路径
    pub fn index(&self) -> PathBuf {
        self.path.join("items.index")
    }
}

impl FromStr for DataDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl std::fmt::Display for DataDir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())
    }
}
