#![forbid(unsafe_code)]
#![deny(clippy::all, clippy::as_conversions, clippy::must_use_candidate)]
#![warn(clippy::todo, clippy::dbg_macro)]

use tpkv_client::files;
use tpkv_client::router::QuorumRouter;

use tpkv_protocol::rpc::RpcClientConfig;

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Debug, clap::Parser)]
struct Opt {
    /// client-plane addresses of all replicas, in routing order
    #[clap(long, value_delimiter = ',', required = true)]
    servers: Vec<SocketAddr>,

    /// per-replica rpc deadline, in microseconds
    #[clap(long, default_value_t = 15_000_000)]
    query_timeout_us: u64,

    #[clap(subcommand)]
    cmd: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    Get { key: String },
    Put { key: String, value: String },
    Del { key: String },
    List,
    Upload { file: String },
    Download { file: String },
    Remove { file: String },
    /// interactive command loop
    Shell,
}

fn default_rpc_client_config() -> RpcClientConfig {
    RpcClientConfig {
        max_frame_length: 16777216, // 16 MiB
        op_chan_size: 1024,
        forward_chan_size: 1024,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tpkv_utils::tracing::setup_tracing();

    let opt = Opt::parse();

    let router = QuorumRouter::new(
        opt.servers,
        default_rpc_client_config(),
        Duration::from_micros(opt.query_timeout_us),
    )?;

    match opt.cmd {
        Command::Get { key } => println!("{}", router.read_majority(&format!("get {key}")).await),
        Command::Put { key, value } => {
            println!("{}", run_write(&router, &format!("put {key} {value}")).await);
        }
        Command::Del { key } => {
            println!("{}", run_write(&router, &format!("delete {key}")).await);
        }
        Command::List => println!("{}", router.read_majority("list").await),
        Command::Upload { file } => println!("{}", run_upload(&router, &file).await?),
        Command::Download { file } => println!("{}", run_download(&router, &file).await?),
        Command::Remove { file } => {
            println!("{}", run_write(&router, &format!("remove {file}")).await);
        }
        Command::Shell => run_shell(&router).await?,
    }

    Ok(())
}

async fn run_write(router: &QuorumRouter, command: &str) -> String {
    let response = router.write_any(command).await;
    if response.is_empty() {
        "ERROR - No response.".to_owned()
    } else {
        response
    }
}

async fn run_upload(router: &QuorumRouter, file: &str) -> Result<String> {
    let dir = files::client_files_dir()?;
    let contents = match files::read_local_file(&dir, file) {
        Ok(contents) => contents,
        Err(_) => return Ok("Something went wrong. File reading failed.".to_owned()),
    };
    Ok(run_write(router, &format!("upload {file} {contents}")).await)
}

async fn run_download(router: &QuorumRouter, file: &str) -> Result<String> {
    let dir = files::client_files_dir()?;
    let response = router.read_majority(&format!("download {file}")).await;
    if response.is_empty() || response == tpkv_replica::cmd::NOT_FOUND {
        return Ok("download failed".to_owned());
    }
    files::write_local_file(&dir, file, &response)?;
    Ok("Successful!".to_owned())
}

async fn run_shell(router: &QuorumRouter) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    println!("Commands: get <key>, put <key> <value>, delete <key>, list,");
    println!("          upload <file>, download <file>, remove <file>, quit");

    loop {
        stdout.write_all(b"Enter command: ").await?;
        stdout.flush().await?;

        let line = match lines.next_line().await? {
            Some(line) => line,
            None => break,
        };

        let mut parts = line.trim().split_whitespace();
        let verb = parts.next().unwrap_or("").to_ascii_lowercase();
        let arg = parts.next();

        let output = match (verb.as_str(), arg) {
            ("quit" | "exit", _) => break,
            ("", _) => continue,
            ("get" | "read", Some(_)) | ("list", None) => {
                router.read_majority(line.trim()).await
            }
            ("download", Some(file)) => run_download(router, file).await?,
            ("put" | "delete" | "remove", Some(_)) => run_write(router, line.trim()).await,
            ("upload", Some(file)) => run_upload(router, file).await?,
            _ => "Invalid operation. Try again.".to_owned(),
        };

        println!("{output}");
    }

    Ok(())
}
