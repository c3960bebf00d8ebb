// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lurker sink-node bridge CLI
//!
//! Forwards sensor frames received on a serial port to ThingSpeak.
//!
//! # Usage
//!
//! ```bash
//! # Using a configuration file
//! lurker-bridge --config lurker.toml
//!
//! # Quick start without a file
//! lurker-bridge --port /dev/ttyUSB0 --channel lurker1=WRITEKEY
//!
//! # Frames relayed over TCP (ser2net, socat), printed instead of uploaded
//! lurker-bridge --tcp 192.168.1.20:4000 --channel lurker1=WRITEKEY --dry-run
//!
//! # Check what reached a channel
//! lurker-bridge feed --channel 123456 --read-key READKEY
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use lurker_bridge::{
    Bridge, BridgeConfig, BridgeStatsSnapshot, FeedFormat, LinkConfig, SinkConfig, StopHandle,
    ThingSpeakSink,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "lurker-bridge")]
#[command(author = "naskel.com")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Lurker sink-node bridge - forward serial sensor frames to ThingSpeak")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial port the sink node is attached to
    #[arg(short, long, conflicts_with = "tcp")]
    port: Option<String>,

    /// Serial baud rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// Read frames from a TCP stream instead (host:port)
    #[arg(long)]
    tcp: Option<String>,

    /// Channel credential (format: "id=write_key", can repeat)
    #[arg(long = "channel", value_delimiter = ',')]
    channels: Vec<String>,

    /// Minimum seconds between uploads
    #[arg(short, long)]
    interval: Option<u64>,

    /// Print mapped records instead of uploading them
    #[arg(long)]
    dry_run: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Verbose mode (debug logs)
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "lurker.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Download a channel feed
    Feed {
        /// Channel number
        #[arg(long)]
        channel: String,

        /// Read key (private channels)
        #[arg(long)]
        read_key: Option<String>,

        /// Feed format
        #[arg(short, long, value_enum, default_value = "json")]
        format: FormatArg,

        /// Server base URL
        #[arg(long, default_value = "https://api.thingspeak.com")]
        base_url: String,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FormatArg {
    Json,
    Csv,
    Xml,
}

impl From<FormatArg> for FeedFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Json => FeedFormat::Json,
            FormatArg::Csv => FeedFormat::Csv,
            FormatArg::Xml => FeedFormat::Xml,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.log_level.as_deref() {
        Some(level) => EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info")),
        None if cli.verbose => EnvFilter::new("lurker_bridge=debug"),
        None => EnvFilter::new("lurker_bridge=info"),
    };
    fmt().with_env_filter(filter).with_target(false).init();

    if let Some(cmd) = cli.command {
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(&output),
            Commands::Validate { config } => cmd_validate(&config),
            Commands::Feed {
                channel,
                read_key,
                format,
                base_url,
            } => cmd_feed(&base_url, &channel, read_key.as_deref(), format.into()),
        };
    }

    let config = build_config(&cli)?;
    let mut bridge = Bridge::from_config(&config).context("Failed to create bridge")?;

    println!("Lurker Bridge v{}", env!("CARGO_PKG_VERSION"));
    println!("=====================================");
    println!("Sinks: {}", bridge.sink_names().join(", "));
    println!("Channels: {}", config.channels.len());
    println!("Press Ctrl+C to stop...");
    println!();

    ctrlc_handler(bridge.stop_handle());

    let result = bridge.run();

    println!("\nFinal Statistics:");
    print_stats(&bridge.stats());

    result.context("Bridge stopped on error")?;
    Ok(())
}

fn build_config(cli: &Cli) -> Result<BridgeConfig> {
    let mut config = match cli.config {
        Some(ref path) => load_config(path)?,
        None => BridgeConfig::default(),
    };

    if let Some(ref address) = cli.tcp {
        config.link = LinkConfig::Tcp {
            address: address.clone(),
            read_timeout_ms: config.link.read_timeout().as_millis() as u64,
        };
    }

    if let Some(ref port) = cli.port {
        let baud_rate = match config.link {
            LinkConfig::Serial { baud_rate, .. } => baud_rate,
            LinkConfig::Tcp { .. } => 57_600,
        };
        config.link = LinkConfig::Serial {
            port: port.clone(),
            baud_rate,
            read_timeout_ms: config.link.read_timeout().as_millis() as u64,
        };
    }

    if let Some(baud) = cli.baud {
        match config.link {
            LinkConfig::Serial {
                ref mut baud_rate, ..
            } => *baud_rate = baud,
            LinkConfig::Tcp { .. } => bail!("--baud only applies to a serial link"),
        }
    }

    for entry in &cli.channels {
        let (id, key) = parse_channel(entry)?;
        config.add_channel(id, key);
    }

    if let Some(interval) = cli.interval {
        config.upload.interval_secs = interval;
    }

    if cli.dry_run {
        config.sinks = vec![SinkConfig::Stdout];
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Load a configuration file without validating it, so CLI flags can still
/// fill in what it lacks.
fn load_config(path: &Path) -> Result<BridgeConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Parse an `id=write_key` pair.
fn parse_channel(entry: &str) -> Result<(&str, &str)> {
    match entry.split_once('=') {
        Some((id, key)) if !id.trim().is_empty() && !key.trim().is_empty() => {
            Ok((id.trim(), key.trim()))
        }
        _ => bail!("Invalid channel '{}' (expected id=write_key)", entry),
    }
}

fn example_config() -> BridgeConfig {
    let mut config = BridgeConfig {
        sinks: vec![
            SinkConfig::default(),
            SinkConfig::JsonLines {
                path: PathBuf::from("lurker-records.jsonl"),
            },
        ],
        ..BridgeConfig::default()
    };
    config.add_channel("lurker1", "LURKER1_WRITE_KEY");
    config.add_channel("lurker2", "LURKER2_WRITE_KEY");
    config
}

fn cmd_gen_config(output: &Path) -> Result<()> {
    let toml_str = toml::to_string_pretty(&example_config())?;

    let content = format!(
        r#"# Lurker Bridge Configuration
# Generated by lurker-bridge gen-config
#
# Replace the write keys under [channels] with your ThingSpeak channel keys.
# Use kind = "tcp" with address = "host:port" under [link] to read frames
# relayed over the network.

{}
"#,
        toml_str
    );

    std::fs::write(output, content)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    match BridgeConfig::from_file(config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            match &config.link {
                LinkConfig::Serial {
                    port, baud_rate, ..
                } => println!("Link: serial {} @ {} baud", port, baud_rate),
                LinkConfig::Tcp { address, .. } => println!("Link: tcp {}", address),
            }
            println!("Upload interval: {} s", config.upload.interval_secs);
            println!("Sinks: {}", config.sinks.len());
            println!("Channels: {}", config.channels.len());
            for id in config.channels.keys() {
                println!("  - {}", id);
            }
            println!("Fields:");
            for (measurement, field) in &config.fields {
                println!("  {} -> {}", measurement, field);
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

fn cmd_feed(
    base_url: &str,
    channel: &str,
    read_key: Option<&str>,
    format: FeedFormat,
) -> Result<()> {
    let client = ThingSpeakSink::new(base_url, Duration::from_secs(10))
        .context("Failed to create HTTP client")?;
    let body = client
        .fetch_feed(channel, read_key, format)
        .with_context(|| format!("Failed to fetch feed of channel {}", channel))?;
    println!("{}", body);
    Ok(())
}

fn print_stats(stats: &BridgeStatsSnapshot) {
    println!(
        "  Frames: {} read, {} unparseable, {} oversized ({} read timeouts)",
        stats.frames_read, stats.parse_errors, stats.overruns, stats.timeouts
    );
    println!(
        "  Records: {} queued, {} unmapped",
        stats.records_queued, stats.records_unmapped
    );
    println!(
        "  Uploads: {} ok, {} failed",
        stats.uploads_ok, stats.uploads_failed
    );
}

/// Setup Ctrl+C handler.
fn ctrlc_handler(stop_handle: StopHandle) {
    if let Err(e) = ctrlc::set_handler(move || {
        tracing::info!("Received Ctrl+C, shutting down...");
        stop_handle.stop();
    }) {
        tracing::warn!(error = %e, "Could not install Ctrl+C handler");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("lurker-bridge").chain(args.iter().copied()))
    }

    #[test]
    fn test_parse_channel() {
        assert_eq!(parse_channel("lurker1=ABC").unwrap(), ("lurker1", "ABC"));
        assert_eq!(parse_channel(" a = b ").unwrap(), ("a", "b"));
        assert!(parse_channel("lurker1").is_err());
        assert!(parse_channel("=ABC").is_err());
        assert!(parse_channel("lurker1=").is_err());
    }

    #[test]
    fn test_build_config_from_flags() {
        let config = build_config(&cli(&[
            "--port",
            "/dev/ttyACM0",
            "--baud",
            "115200",
            "--channel",
            "lurker1=K1,lurker2=K2",
            "--interval",
            "20",
            "--dry-run",
        ]))
        .unwrap();

        assert_eq!(
            config.link,
            LinkConfig::Serial {
                port: "/dev/ttyACM0".into(),
                baud_rate: 115_200,
                read_timeout_ms: 1000,
            }
        );
        assert_eq!(config.channels.len(), 2);
        assert_eq!(config.upload.interval_secs, 20);
        assert_eq!(config.sinks, vec![SinkConfig::Stdout]);
    }

    #[test]
    fn test_build_config_tcp() {
        let config = build_config(&cli(&["--tcp", "127.0.0.1:4000", "--channel", "a=b"])).unwrap();
        assert!(matches!(config.link, LinkConfig::Tcp { ref address, .. } if address == "127.0.0.1:4000"));
        assert!(build_config(&cli(&["--tcp", "h:1", "--baud", "9600", "--channel", "a=b"])).is_err());
    }

    #[test]
    fn test_build_config_requires_channel() {
        assert!(build_config(&cli(&[])).is_err());
    }

    #[test]
    fn test_example_config_is_valid() {
        let toml_str = toml::to_string_pretty(&example_config()).unwrap();
        BridgeConfig::from_toml(&toml_str).unwrap();
    }
}
