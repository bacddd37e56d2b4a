#![forbid(unsafe_code)]
#![deny(clippy::all, clippy::as_conversions, clippy::must_use_candidate)]
#![warn(clippy::todo, clippy::dbg_macro)]

use tpkv_server::config::Config;
use tpkv_utils::config::read_config_file;
use tpkv_utils::tracing::setup_tracing;

use anyhow::Result;
use camino::Utf8PathBuf;
use clap::Parser;
use tracing::debug;

#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[derive(Debug, clap::Parser)]
struct Opt {
    #[clap(long)]
    config: Utf8PathBuf,
}

fn main() -> Result<()> {
    let opt = Opt::parse();

    setup_tracing();

    let config: Config = read_config_file(&opt.config)?;

    debug!(?config);

    run(config)
}

#[tokio::main]
async fn run(config: Config) -> Result<()> {
    tpkv_server::run(config).await
}
