use boomerang::Opts;
use boomerang::cli::SubCommandExtend;
use boomerang::config::SubCommand;
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opts = Opts::parse();

    match &opts.subcmd {
        SubCommand::Add(config) => config.run(&opts).await,
        SubCommand::Search(config) => config.run(&opts).await,
        SubCommand::SearchText(config) => config.run(&opts).await,
        SubCommand::Build(config) => config.run(&opts).await,
        SubCommand::Reset(config) => config.run(&opts).await,
        SubCommand::Status(config) => config.run(&opts).await,
    }
}
