//! Command-line commander for a running mission executor.
//!
//! Talks the executor's line transport: writes one command line and exits,
//! or tails the outbound JSON stream with `watch`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

#[derive(Parser)]
#[command(name = "helm-send", about = "Send commands to a running mission executor")]
struct Cli {
    /// Executor transport address.
    #[arg(long, default_value = "127.0.0.1:4700")]
    addr: String,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Send a raw mission command line, e.g. `append_task goto 43.0 -70.0`.
    Cmd {
        #[arg(required = true)]
        line: Vec<String>,
    },
    /// Set the piloting mode (standby, autonomous, ...).
    Mode { value: String },
    /// Inject an odometry fix (development feed).
    Nav { lat: f64, lon: f64, heading: f64 },
    /// Tail heartbeat, visualization, and goal traffic.
    Watch {
        /// Only print messages of this type (heartbeat, viz, endofline, goal, cancel).
        #[arg(long)]
        only: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let stream = TcpStream::connect(&cli.addr)
        .await
        .with_context(|| format!("connecting to executor at {}", cli.addr))?;
    let (reader, mut writer) = stream.into_split();

    match cli.command {
        CliCommand::Cmd { line } => {
            send_line(&mut writer, &line.join(" ")).await?;
        }
        CliCommand::Mode { value } => {
            send_line(&mut writer, &format!("piloting_mode {}", value)).await?;
        }
        CliCommand::Nav { lat, lon, heading } => {
            send_line(&mut writer, &format!("nav {} {} {}", lat, lon, heading)).await?;
        }
        CliCommand::Watch { only } => {
            let mut lines = BufReader::new(reader).lines();
            while let Some(line) = lines.next_line().await? {
                if let Some(wanted) = only.as_deref() {
                    let kind = serde_json::from_str::<serde_json::Value>(&line)
                        .ok()
                        .and_then(|v| v["type"].as_str().map(str::to_string));
                    if kind.as_deref() != Some(wanted) {
                        continue;
                    }
                }
                println!("{}", line);
            }
        }
    }
    Ok(())
}

async fn send_line(
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    line: &str,
) -> Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
