mod add;
mod build;
mod reset;
mod search;
mod status;

pub use add::*;
pub use build::*;
pub use reset::*;
pub use search::*;
pub use status::*;

use crate::FoundDBBuilder;
use crate::config::{ModelOptions, Opts};
use crate::found_db::FoundDB;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// 打开失物库，模型在第一次编码时才会加载
fn open_db(opts: &Opts, model: &ModelOptions) -> anyhow::Result<FoundDB> {
    FoundDBBuilder::new(opts.data_dir.clone()).model(model.clone()).open()
}
