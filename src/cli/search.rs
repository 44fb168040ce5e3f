use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::debug;
use tokio::task::block_in_place;

use super::open_db;
use crate::cli::SubCommandExtend;
use crate::config::{ModelOptions, Opts, OutputFormat, SearchOptions};
use crate::types::SearchResponse;

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub model: ModelOptions,
    #[command(flatten)]
    pub search: SearchOptions,
    /// 丢失物品的照片路径
    pub image: PathBuf,
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let data = tokio::fs::read(&self.image)
            .await
            .with_context(|| format!("读取图片失败: {}", self.image.display()))?;
        let db = open_db(opts, &self.model)?;
        debug!("searching {}", self.image.display());
        let response = block_in_place(|| db.search_image(&data, self.search.top_k))?;
        print_result(&response, self.search.output_format)
    }
}

#[derive(Parser, Debug, Clone)]
pub struct SearchTextCommand {
    #[command(flatten)]
    pub model: ModelOptions,
    #[command(flatten)]
    pub search: SearchOptions,
    /// 丢失物品的文字描述，例如 "blue keys"
    pub query: String,
}

impl SubCommandExtend for SearchTextCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let db = open_db(opts, &self.model)?;
        debug!("searching {:?}", self.query);
        let response = block_in_place(|| db.search_text(&self.query, self.search.top_k))?;
        print_result(&response, self.search.output_format)
    }
}

fn print_result(response: &SearchResponse, format: OutputFormat) -> Result<()> {
    write_result(&mut std::io::stdout().lock(), response, format)
}

/// 表格每行依次为置信度、物品、搜索方式、登记时间、描述，与 JSON 字段一一对应
fn write_result(out: &mut impl Write, response: &SearchResponse, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            writeln!(out, "{}", serde_json::to_string_pretty(response)?)?;
        }
        OutputFormat::Table => {
            if let Some(message) = &response.message {
                writeln!(out, "{}", message)?;
            }
            for r in &response.results {
                writeln!(
                    out,
                    "{:.2}\t{}\t{}\t{}\t{}",
                    r.confidence, r.item_name, r.search_type, r.found_at, r.description
                )?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{SearchResult, SearchType};

    fn response() -> SearchResponse {
        SearchResponse {
            results: vec![SearchResult {
                item_name: "keys.jpg".into(),
                confidence: 87.6,
                search_type: SearchType::Text,
                description: "Found near the library".into(),
                found_at: "2026-10-17 09:30:00".into(),
            }],
            message: None,
        }
    }

    #[test]
    fn table_has_every_json_field() {
        let mut out = vec![];
        write_result(&mut out, &response(), OutputFormat::Table).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "87.60\tkeys.jpg\ttext\t2026-10-17 09:30:00\tFound near the library\n"
        );
    }

    #[test]
    fn table_prints_message_first() {
        let mut out = vec![];
        write_result(&mut out, &SearchResponse::empty_database(), OutputFormat::Table).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Database is empty\n");
    }
}
