use anyhow::Result;
use clap::Parser;
use log::info;
use tokio::task::block_in_place;

use super::open_db;
use crate::cli::SubCommandExtend;
use crate::config::{ModelOptions, Opts};

#[derive(Parser, Debug, Clone)]
pub struct BuildCommand {
    #[command(flatten)]
    pub model: ModelOptions,
}

impl SubCommandExtend for BuildCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let db = open_db(opts, &self.model)?;
        let total = block_in_place(|| db.rebuild_index())?;
        info!("构建索引成功，共 {} 件物品", total);
        Ok(())
    }
}
