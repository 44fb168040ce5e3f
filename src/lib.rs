pub mod cli;
pub mod config;
pub mod embed;
pub mod found_db;
pub mod index;
pub mod types;
pub mod utils;
pub mod vault;

pub use config::Opts;
pub use found_db::{FoundDB, FoundDBBuilder};
