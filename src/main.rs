use clap::Parser;
use env_logger::Env;

use furnsearch::Opts;
use furnsearch::cli::SubCommandExtend;
use furnsearch::config::SubCommand;

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let opts = Opts::parse();

    match &opts.subcmd {
        SubCommand::Build(config) => config.run(&opts).await,
        SubCommand::Search(config) => config.run(&opts).await,
        SubCommand::Text(config) => config.run(&opts).await,
        SubCommand::Detect(config) => config.run(&opts).await,
        SubCommand::Verify(config) => config.run(&opts).await,
        SubCommand::Train(config) => config.run(&opts).await,
        SubCommand::Export(config) => config.run(&opts).await,
        SubCommand::Import(config) => config.run(&opts).await,
        SubCommand::Eval(config) => config.run(&opts).await,
        SubCommand::Clean(config) => config.run(&opts).await,
        SubCommand::Server(config) => config.run(&opts).await,
    }
}
