use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use env_logger::Env;
use tokio::runtime::Handle;

use streamcast::{producer, RtcConnector, Server, StreamerConfig, WsTransport};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Local id, appended to the default signaling URL
    name: Option<String>,

    #[arg(short, long)]
    url: Option<String>,

    /// STUN server handed to every peer, e.g. stun:stun.l.google.com:19302
    #[arg(long)]
    stun: Option<String>,

    /// Annex-B H.264 file to stream in a loop
    #[arg(short, long)]
    input: Option<PathBuf>,

    #[arg(long, default_value_t = 30)]
    fps: u32,

    #[arg(long, default_value_t = 500)]
    reconnect_delay_ms: u64,

    /// Turn debugging information on
    #[arg(short, long, action = clap::ArgAction::Count)]
    debug: u8,
}

fn init_logging(debug: u8) {
    if debug == 0 {
        env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
        return;
    }

    let level = if debug > 1 {
        log::LevelFilter::Trace
    } else {
        log::LevelFilter::Debug
    };
    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{}:{} [{}] {} - {}",
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.level(),
                chrono::Local::now().format("%H:%M:%S.%6f"),
                record.args()
            )
        })
        .filter(None, level)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let name = cli.name.unwrap_or("server".into());
    log::info!("The local ID is: {}", name);

    let config = StreamerConfig {
        signaling_url: cli
            .url
            .unwrap_or_else(|| format!("ws://127.0.0.1:8000/{}", name)),
        stun_server: cli.stun,
        reconnect_delay: Duration::from_millis(cli.reconnect_delay_ms),
        ..Default::default()
    };

    let handle = Handle::current();
    let transport = Arc::new(WsTransport::new(config.signaling_url.clone(), handle.clone()));
    let connector = Arc::new(RtcConnector::new(handle, config.sample_duration)?);
    let server = Arc::new(Server::start(config, transport, connector)?);

    let source = match cli.input {
        Some(path) => {
            let server = server.clone();
            let terminate = server.terminate_flag();
            Some(producer::spawn_file_source(path, cli.fps, terminate, move |nal| {
                server.submit_frame(nal);
            })?)
        }
        None => {
            log::info!("No --input given, waiting for frames from an external source");
            None
        }
    };

    tokio::signal::ctrl_c().await?;
    log::info!("Cleaning up...");

    tokio::task::spawn_blocking(move || {
        server.shutdown();
        if let Some(source) = source {
            let _ = source.join();
        }
    })
    .await?;

    Ok(())
}
