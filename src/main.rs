use anyhow::{Context, Result};
use clap::Parser;
use hand_telemetry::pipeline::{stop_channel, LandmarkFeed, Pipeline};
use hand_telemetry::transport::TcpTransport;
use hand_telemetry::{PipelineConfig, SessionEnd};
use log::*;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "hand_telemetry")]
#[command(about = "Streams finger angles from hand landmarks to a servo hand", long_about = None)]
struct Args {
    /// Address of the actuator bridge
    #[arg(long, default_value = "127.0.0.1:5001")]
    peer: String,

    /// JSON config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON-lines landmark frames, `-` for stdin
    #[arg(long, default_value = "-")]
    input: String,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,

    /// Exit when the link drops instead of scanning again
    #[arg(long, default_value_t = false)]
    no_reconnect: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    TermLogger::init(
        args.log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )?;

    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("Failed loading config from {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if args.no_reconnect {
        config.reconnect = false;
    }
    config.validate()?;

    let feed = LandmarkFeed::new();
    if args.input == "-" {
        feed.spawn_reader(BufReader::new(std::io::stdin()));
    } else {
        let file = File::open(&args.input)
            .with_context(|| format!("Failed opening landmark input {}", args.input))?;
        feed.spawn_reader(BufReader::new(file));
    }

    let (stop, stop_signal) = stop_channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Stop requested");
                stop.stop();
            }
            Err(error) => error!("Failed listening for ctrl-c: {}", error),
        }
    });

    let transport = TcpTransport::new(args.peer);
    let mut pipeline = Pipeline::new(&config, transport, feed, stop_signal);
    let report = pipeline.run().await.context("Pipeline aborted")?;

    match report.last_end {
        Some(SessionEnd::LinkLost) => warn!("Last session ended abruptly: link lost"),
        Some(end) => info!("Last session ended: {}", end),
        None => info!("Never connected"),
    }
    info!(
        "{} sessions, {} sent, {} suppressed, {} send warnings, {} malformed inbound",
        report.sessions,
        report.transmissions,
        report.suppressed,
        report.send_warnings,
        report.malformed_inbound
    );
    Ok(())
}
