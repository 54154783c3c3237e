use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::time::Duration;
use tms_core::{ChannelProtocol, CountMap, CountsSnapshot, StartRequest, ViolationsSummary};
use tms_dashboard::{
    config::{derive_channel_url, DEFAULT_SERVER_URL, DEFAULT_VIDEO_SOURCE},
    ui::humanize,
    ChannelConfig, ChannelEvent, ControlApi, ControlClient, EventChannelClient,
};
use url::Url;

#[derive(Parser)]
#[command(name = "tms")]
#[command(about = "Traffic monitoring operator CLI", long_about = None)]
struct Cli {
    /// Server base URL (falls back to TMS_SERVER_URL).
    #[arg(long, global = true, default_value = "")]
    server: String,
    /// Request timeout in milliseconds.
    #[arg(long, global = true, default_value_t = 10_000)]
    timeout_ms: u64,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start processing a video source
    Start {
        #[arg(default_value = DEFAULT_VIDEO_SOURCE)]
        source: String,
        #[arg(long)]
        config_path: Option<String>,
    },
    /// Stop the running session
    Stop,
    /// Print the latest vehicle counts
    Counts {
        #[arg(long)]
        json: bool,
    },
    /// Print violation totals and the most recent records
    Violations {
        #[arg(long)]
        json: bool,
    },
    /// Follow frame updates on the push channel and print their counts
    Watch {
        #[arg(long, default_value = "")]
        channel_url: String,
        #[arg(long, default_value = "socketio")]
        protocol: String,
        /// Exit after this many frame updates.
        #[arg(long)]
        limit: Option<u64>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let server = resolve_server(&cli.server)?;
    let client = ControlClient::new(server.clone(), Duration::from_millis(cli.timeout_ms));

    match cli.command {
        Commands::Start {
            source,
            config_path,
        } => {
            let request = StartRequest::new(source).with_config_path(config_path);
            match client.start_processing(&request).await {
                Ok(ack) => println!(
                    "{}",
                    ack.unwrap_or_else(|| "Video processing started successfully".to_string())
                ),
                Err(err) => bail!(err.user_message()),
            }
        }
        Commands::Stop => match client.stop_processing().await {
            Ok(ack) => println!(
                "{}",
                ack.unwrap_or_else(|| "Video processing stopped".to_string())
            ),
            Err(err) => bail!(err.user_message()),
        },
        Commands::Counts { json } => {
            let counts = client
                .fetch_vehicle_counts()
                .await
                .context("Failed to fetch vehicle counts")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&counts)?);
            } else {
                print_counts(&counts);
            }
        }
        Commands::Violations { json } => {
            let summary = client
                .fetch_violations()
                .await
                .context("Failed to fetch violations")?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                print_violations(&summary);
            }
        }
        Commands::Watch {
            channel_url,
            protocol,
            limit,
        } => {
            let protocol: ChannelProtocol = protocol.parse().map_err(anyhow::Error::msg)?;
            let url = if channel_url.trim().is_empty() {
                derive_channel_url(&server, protocol)?
            } else {
                Url::parse(channel_url.trim()).context("Invalid channel url")?
            };
            watch(url, protocol, limit).await?;
        }
    }

    Ok(())
}

fn resolve_server(flag: &str) -> Result<Url> {
    let raw = if !flag.trim().is_empty() {
        flag.trim().to_string()
    } else {
        std::env::var("TMS_SERVER_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string())
    };
    Url::parse(&raw).with_context(|| format!("Invalid server url: {raw}"))
}

fn print_counts(counts: &CountMap) {
    let snapshot = CountsSnapshot::from_counts(counts.clone(), CountMap::new());
    print_rows(&snapshot.vehicle_rows(), snapshot.total_vehicles);
}

fn print_violations(summary: &ViolationsSummary) {
    let snapshot = CountsSnapshot::from_counts(CountMap::new(), summary.counts.clone());
    print_rows(&snapshot.violation_rows(), summary.total);
    if summary.recent.is_empty() {
        return;
    }
    println!();
    println!("Recent:");
    for record in &summary.recent {
        println!(
            "- [{}] {}: {}",
            record.timestamp_label(),
            humanize(&record.kind),
            record.details.as_deref().unwrap_or("-")
        );
    }
}

fn print_rows(rows: &[(String, u64)], total: u64) {
    let width = rows
        .iter()
        .map(|(kind, _)| humanize(kind).chars().count())
        .max()
        .unwrap_or(0)
        .max(5);
    for (kind, value) in rows {
        println!("{:<width$} {value:>6}", humanize(kind));
    }
    println!("{:<width$} {total:>6}", "Total");
}

async fn watch(url: Url, protocol: ChannelProtocol, limit: Option<u64>) -> Result<()> {
    let (mut channel, mut events) = EventChannelClient::new(ChannelConfig::new(url.clone(), protocol));
    channel.connect();
    eprintln!("Watching {url} ({protocol}), Ctrl-C to stop");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut seen = 0u64;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ChannelEvent::Frame(frame)) => {
                    seen += 1;
                    let snapshot = CountsSnapshot::from_counts(frame.vehicle_counts, frame.violation_counts);
                    println!(
                        "#{seen} vehicles={} violations={}{}",
                        snapshot.total_vehicles,
                        snapshot.total_violations,
                        if snapshot.total_violations > 0 { " !" } else { "" }
                    );
                    if limit.map(|limit| seen >= limit).unwrap_or(false) {
                        break;
                    }
                }
                Some(ChannelEvent::Connected) => eprintln!("connected"),
                Some(ChannelEvent::Disconnected { reason }) => eprintln!("disconnected: {reason}"),
                Some(ChannelEvent::ConnectError { message }) => eprintln!("connect error: {message}"),
                None => break,
            },
            _ = &mut ctrl_c => break,
        }
    }
    channel.disconnect().await;
    Ok(())
}
