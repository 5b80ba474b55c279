use anyhow::Result;
use clap::Parser;
use hand_telemetry::transport::tcp::spawn_reader;
use hand_telemetry::transport::TransportEvent;
use hand_telemetry::{wire, Digit};
use log::*;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;

/// Stand-in for the servo hand: accepts one producer at a time and logs
/// the angles it would drive.
#[derive(Parser, Debug)]
#[command(name = "actuator_echo")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:5001")]
    listen: String,

    /// Time the producer gets to let go after a shutdown notice
    #[arg(long, default_value_t = 1000)]
    grace_ms: u64,

    #[arg(long, default_value = "info")]
    log_level: LevelFilter,
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
    let grace = Duration::from_millis(args.grace_ms);

    let listener = TcpListener::bind(&args.listen).await?;
    loop {
        info!("Waiting for producer on {}...", args.listen);
        let (socket, address) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = tokio::signal::ctrl_c() => break,
        };
        info!("Producer connected from {}", address);
        let (read_half, mut write_half) = socket.into_split();
        let (mut events, reader) = spawn_reader(read_half);

        let stopping = loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(TransportEvent::Received(payload)) => {
                        if wire::is_shutdown(&payload) {
                            info!("Producer is shutting down");
                            break false;
                        }
                        apply(&payload);
                    }
                    Some(TransportEvent::Lost) | None => {
                        info!("Producer disconnected");
                        break false;
                    }
                },
                _ = tokio::signal::ctrl_c() => break true,
            }
        };

        if stopping {
            info!("Sending shutdown signal to producer...");
            let mut sentinel = wire::SHUTDOWN_SENTINEL.to_vec();
            sentinel.push(wire::MESSAGE_DELIMITER);
            write_half.write_all(&sentinel).await?;
            let waited = tokio::time::timeout(grace, async {
                while let Some(event) = events.recv().await {
                    if event == TransportEvent::Lost {
                        break;
                    }
                }
            })
            .await;
            if waited.is_err() {
                warn!("Producer did not disconnect within {:?}", grace);
            }
        }
        let _ = write_half.shutdown().await;
        reader.abort();
        if stopping {
            break;
        }
    }
    info!("Stopped");
    Ok(())
}

fn apply(payload: &[u8]) {
    match wire::decode_lenient(payload) {
        Ok(vector) => {
            for (digit, angles) in Digit::TRANSMITTED.iter().zip(vector.values().chunks(3)) {
                debug!("{}: {:?}", digit, angles);
            }
            info!("Angles: {:?}", vector.values());
        }
        Err(error) => warn!(
            "Error processing received data {:?}: {}",
            String::from_utf8_lossy(payload),
            error
        ),
    }
}
