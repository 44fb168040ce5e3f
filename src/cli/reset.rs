use anyhow::{Result, bail};
use clap::Parser;
use log::info;

use crate::cli::SubCommandExtend;
use crate::config::{ModelOptions, Opts};

#[derive(Parser, Debug, Clone)]
pub struct ResetCommand {
    /// 确认删除全部失物图片、描述与索引
    #[arg(long)]
    pub yes: bool,
}

impl SubCommandExtend for ResetCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        if !self.yes {
            bail!("该操作会删除 {} 下的全部物品，请加上 --yes 确认", opts.data_dir);
        }
        let db = super::open_db(opts, &ModelOptions::default())?;
        info!("清理数据中……");
        db.reset()?;
        info!("清理完成");
        Ok(())
    }
}
