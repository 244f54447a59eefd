use clap::Parser;
use log::error;
use worldpool::cli::{Cli, run};
use worldpool::utils::env_adapter::EnvAdapter;

const DEBUG_ENV: &str = "WORLDPOOL_DEBUG";

fn init_logging() {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if EnvAdapter::flag(DEBUG_ENV) {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.format_timestamp_millis().init();
}

#[tokio::main]
async fn main() {
    init_logging();
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("{e:#}");
        std::process::exit(1);
    }
}
