use serde::{Deserialize, Serialize};

/// 搜索方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    Image,
    Text,
}

impl std::fmt::Display for SearchType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchType::Image => write!(f, "image"),
            SearchType::Text => write!(f, "text"),
        }
    }
}

/// 单条搜索结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// 物品图片文件名
    pub item_name: String,
    /// 置信度，范围 0 ~ 100，保留两位小数
    pub confidence: f64,
    pub search_type: SearchType,
    pub description: String,
    /// 登记时间
    pub found_at: String,
}

/// 一次搜索的返回值
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SearchResponse {
    /// 库中没有任何物品时的返回值
    pub fn empty_database() -> Self {
        Self { results: vec![], message: Some(String::from("Database is empty")) }
    }
}

/// 数据目录状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// 失物图片数量
    pub items: usize,
    /// 描述库记录数量
    pub vault_entries: usize,
    /// 索引中的向量数量，索引不存在时为 None
    pub indexed: Option<usize>,
}
