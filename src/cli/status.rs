use anyhow::Result;
use clap::Parser;

use crate::cli::SubCommandExtend;
use crate::config::{ModelOptions, Opts, OutputFormat};

#[derive(Parser, Debug, Clone)]
pub struct StatusCommand {
    #[command(flatten)]
    pub model: ModelOptions,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl SubCommandExtend for StatusCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let db = super::open_db(opts, &self.model)?;
        let status = db.status()?;
        match self.output_format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
            OutputFormat::Table => {
                println!("data dir : {}", opts.data_dir);
                println!("items    : {}", status.items);
                println!("vault    : {}", status.vault_entries);
                match status.indexed {
                    Some(n) => println!("indexed  : {}", n),
                    None => println!("indexed  : -"),
                }
            }
        }
        Ok(())
    }
}
