//! NavLink CLI - headless pipeline runner
//!
//! Replays recorded byte logs through the dispatch pipeline, listens to
//! live sensors, and exports measurements and raw captures.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};

use navlink::core::export::csv::MeasurementCsvWriter;
use navlink::core::export::jsonl::MeasurementJsonlWriter;
use navlink::core::export::raw::{RawPacketWriter, SkippedByteWriter};
use navlink::core::export::generate_export_filename;
use navlink::{
    AsciiFilter, BinaryFilter, Exporter, MeasurementGroups, QueueMode, ReplayConfig,
    ReplayTransport, SdkConfig, Sensor, SerialConfig, SerialParity, SerialTransport,
};

/// NavLink CLI
#[derive(Parser, Debug)]
#[command(
    name = "navlink-cli",
    version,
    about = "Sensor stream decoding and export",
    long_about = None
)]
struct Cli {
    /// SDK configuration file (TOML)
    #[arg(short, long, env = "NAVLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports
    ListPorts,

    /// Replay a recorded byte log through the pipeline
    Replay {
        /// Path of the raw byte log
        input: PathBuf,

        /// Directory for export files
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,

        /// Export decoded measurements as CSV
        #[arg(long)]
        csv: bool,

        /// Export decoded measurements as JSON Lines
        #[arg(long)]
        jsonl: bool,

        /// Export skipped bytes
        #[arg(long)]
        skipped: bool,

        /// Pace the replay, microseconds per chunk
        #[arg(long)]
        pace_us: Option<u64>,
    },

    /// Listen to a live sensor and log the stream
    Listen {
        /// Serial port name (e.g., /dev/ttyUSB0)
        port: String,

        /// Baud rate
        #[arg(short, long, default_value = "115200")]
        baud: u32,

        /// Parity (none, odd, even)
        #[arg(long, default_value = "none")]
        parity: String,

        /// Directory for export files
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,

        /// Also export decoded measurements as CSV
        #[arg(long)]
        csv: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let config = match &cli.config {
        Some(path) => SdkConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => SdkConfig::default(),
    };

    match cli.command {
        Commands::ListPorts => list_ports(),
        Commands::Replay {
            input,
            output_dir,
            csv,
            jsonl,
            skipped,
            pace_us,
        } => replay(&config, &input, &output_dir, csv, jsonl, skipped, pace_us),
        Commands::Listen {
            port,
            baud,
            parity,
            output_dir,
            csv,
        } => listen(&config, &port, baud, &parity, &output_dir, csv),
    }
}

fn list_ports() -> anyhow::Result<()> {
    let ports = serialport::available_ports().context("enumerating serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found");
        return Ok(());
    }
    for port in ports {
        println!("{}", port.port_name);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn replay(
    config: &SdkConfig,
    input: &Path,
    output_dir: &Path,
    csv: bool,
    jsonl: bool,
    skipped: bool,
    pace_us: Option<u64>,
) -> anyhow::Result<()> {
    let mut replay_config = ReplayConfig::new(input);
    if let Some(us) = pace_us {
        replay_config = replay_config.pace(Duration::from_micros(us));
    }
    let transport = ReplayTransport::new(replay_config);
    let mut sensor = Sensor::new(Box::new(transport), config);

    std::fs::create_dir_all(output_dir).context("creating output directory")?;
    let mut exporters = Vec::new();

    if csv {
        let path = output_dir.join(generate_export_filename("measurements", "csv"));
        let mut exporter = Exporter::new(256, 2048, QueueMode::Retry);
        sensor.subscribe_ascii(exporter.queue(), "NL", AsciiFilter::StartsWith)?;
        sensor.subscribe_binary(
            exporter.queue(),
            MeasurementGroups::none(),
            BinaryFilter::AnyMatch,
        )?;
        exporter.start(MeasurementCsvWriter::create(&path)?);
        tracing::info!(path = %path.display(), "Exporting measurements (CSV)");
        exporters.push(exporter);
    }
    if jsonl {
        let path = output_dir.join(generate_export_filename("measurements", "jsonl"));
        let mut exporter = Exporter::new(256, 2048, QueueMode::Retry);
        sensor.subscribe_ascii(exporter.queue(), "NL", AsciiFilter::StartsWith)?;
        sensor.subscribe_binary(
            exporter.queue(),
            MeasurementGroups::none(),
            BinaryFilter::AnyMatch,
        )?;
        exporter.start(MeasurementJsonlWriter::create(&path)?);
        tracing::info!(path = %path.display(), "Exporting measurements (JSONL)");
        exporters.push(exporter);
    }
    if skipped {
        let path = output_dir.join(generate_export_filename("skipped", "bin"));
        let mut exporter = Exporter::new(256, 2048, QueueMode::Retry);
        sensor.register_skipped_byte_queue(exporter.queue())?;
        exporter.start(SkippedByteWriter::create(&path)?);
        tracing::info!(path = %path.display(), "Exporting skipped bytes");
        exporters.push(exporter);
    }

    sensor.connect()?;
    sensor.join();

    // Let the exporters drain before reporting
    for exporter in &mut exporters {
        exporter.stop();
    }
    print_stats(&sensor);
    Ok(())
}

fn listen(
    config: &SdkConfig,
    port: &str,
    baud: u32,
    parity: &str,
    output_dir: &Path,
    csv: bool,
) -> anyhow::Result<()> {
    let serial_config = SerialConfig::new(port, baud)
        .parity(parity.parse::<SerialParity>().unwrap_or_default());
    let transport = SerialTransport::new(serial_config);
    let mut sensor = Sensor::new(Box::new(transport), config);

    std::fs::create_dir_all(output_dir).context("creating output directory")?;
    let mut exporters = Vec::new();

    // Always keep a raw capture of everything we recognized
    let raw_path = output_dir.join(generate_export_filename("capture", "bin"));
    let mut raw_exporter = Exporter::new(256, 2048, QueueMode::Retry);
    sensor.subscribe_ascii(raw_exporter.queue(), "", AsciiFilter::StartsWith)?;
    sensor.subscribe_binary(
        raw_exporter.queue(),
        MeasurementGroups::none(),
        BinaryFilter::AnyMatch,
    )?;
    raw_exporter.start(RawPacketWriter::create(&raw_path)?);
    tracing::info!(path = %raw_path.display(), "Logging raw packets");
    exporters.push(raw_exporter);

    if csv {
        let path = output_dir.join(generate_export_filename("measurements", "csv"));
        let mut exporter = Exporter::new(256, 2048, QueueMode::Retry);
        sensor.subscribe_ascii(exporter.queue(), "NL", AsciiFilter::StartsWith)?;
        sensor.subscribe_binary(
            exporter.queue(),
            MeasurementGroups::none(),
            BinaryFilter::AnyMatch,
        )?;
        exporter.start(MeasurementCsvWriter::create(&path)?);
        exporters.push(exporter);
    }

    sensor.connect()?;
    tracing::info!(info = %sensor.connection_info(), "Listening, Ctrl-C to stop");

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::Release))
            .context("installing Ctrl-C handler")?;
    }
    while !stop.load(Ordering::Acquire) && sensor.is_listening() {
        std::thread::sleep(Duration::from_millis(100));
    }

    sensor.disconnect()?;
    for exporter in &mut exporters {
        exporter.stop();
    }
    print_stats(&sensor);
    Ok(())
}

fn print_stats(sensor: &Sensor) {
    let stats = sensor.stats();
    println!("received bytes:  {}", stats.received_bytes);
    println!("ascii packets:   {}", stats.ascii_packets);
    println!("binary packets:  {}", stats.binary_packets);
    println!("bridge packets:  {}", stats.bridge_packets);
    println!("skipped bytes:   {}", stats.skipped_bytes);
}
