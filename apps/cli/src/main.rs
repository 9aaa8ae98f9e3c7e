use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use picoflash_core::container::constants::{DEFAULT_PAYLOAD_WIDTH, family_name};
use picoflash_core::container::{
    ComposeOptions, SegmentSpec, compose, inspect, load_segments, parse_family,
    read_container_file, write_container_file,
};
use picoflash_core::events::{TracingObserver, TransferEvent, TransferObserver};
use picoflash_core::payload::FirmwareImage;
use picoflash_core::session::{SessionConfig, TransferSession};
use picoflash_core::transport::HttpGateway;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "RP2040/RP2350 UF2 and OTA firmware tool", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload firmware to a device over its OTA endpoints
    Upload {
        /// Firmware image to send
        firmware: PathBuf,

        /// Device address (IP or hostname)
        #[arg(long)]
        host: Option<String>,

        /// Install and reboot after verification
        #[arg(long)]
        apply: bool,

        /// Bytes per write request
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Session configuration (TOML); flags override its values
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Combine binaries and UF2 files into one UF2 image
    Combine {
        /// Segments in flash order: `file.uf2` or `file.bin@0x10006000`
        #[arg(required = true)]
        segments: Vec<SegmentSpec>,

        /// Output UF2 file
        #[arg(short, long)]
        output: PathBuf,

        /// Segment names, one per segment (defaults to file stems)
        #[arg(long = "name")]
        names: Vec<String>,

        /// Segments that may end up empty without failing
        #[arg(long = "optional")]
        optional: Vec<String>,

        /// Family for raw segments (name or numeric id)
        #[arg(long, default_value = "absolute", value_parser = parse_family)]
        family: u32,

        /// Payload bytes per block for raw segments
        #[arg(long, default_value_t = DEFAULT_PAYLOAD_WIDTH)]
        width: usize,

        /// Force this family onto every output block
        #[arg(long, value_parser = parse_family)]
        normalize: Option<u32>,
    },

    /// Show a summary of a UF2 file
    Info {
        /// UF2 file to inspect
        file: PathBuf,
    },

    /// Write a default session configuration file
    Config {
        /// Destination path
        #[arg(long, default_value = "picoflash.toml")]
        write: PathBuf,
    },
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("setting default subscriber failed");

    let result = match args.command {
        Command::Upload {
            firmware,
            host,
            apply,
            chunk_size,
            config,
        } => upload(firmware, host, apply, chunk_size, config),
        Command::Combine {
            segments,
            output,
            names,
            optional,
            family,
            width,
            normalize,
        } => {
            let options = ComposeOptions {
                payload_width: width,
                family_id: family,
                normalize_family: normalize,
            };
            combine(&segments, &output, &names, &optional, &options)
        }
        Command::Info { file } => show_info(&file),
        Command::Config { write } => write_config(&write),
    };

    if let Err(e) = result {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn upload(
    firmware: PathBuf,
    host: Option<String>,
    apply: bool,
    chunk_size: Option<usize>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let mut config = match &config_path {
        Some(path) => SessionConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SessionConfig::default(),
    };
    if let Some(host) = host {
        config.host = host;
    }
    if let Some(size) = chunk_size {
        config.chunk_size = size;
    }
    config.apply |= apply;

    let image = FirmwareImage::load(&firmware)?;
    info!(
        file = %firmware.display(),
        size = image.len(),
        sha256 = %image.digest_hex(),
        "Loaded firmware"
    );

    let gateway = HttpGateway::new(&config.host, config.timeouts)?;
    info!(url = gateway.base_url(), "Connecting to device");

    let observer = Arc::new(ProgressObserver::default());
    let mut session = TransferSession::with_observer(gateway, config, observer);
    let report = session.run(&image)?;

    for warning in &report.warnings {
        warn!("{}", warning);
    }
    if let Err(e) = report.ensure_online() {
        warn!("{}", e);
    } else if report.applied {
        info!("Device is back online with the new firmware");
    } else {
        info!("Firmware verified; not applied");
    }
    Ok(())
}

fn combine(
    specs: &[SegmentSpec],
    output: &Path,
    names: &[String],
    optional: &[String],
    options: &ComposeOptions,
) -> Result<()> {
    let segments = load_segments(specs, names)?
        .into_iter()
        .map(|s| {
            if optional.contains(&s.name) {
                s.optional()
            } else {
                s
            }
        })
        .collect::<Vec<_>>();

    let image = compose(&segments, options)?;

    for seg in &image.segments {
        info!(
            name = %seg.name,
            blocks = seg.block_count,
            range = %format!("0x{:08X}..0x{:08X}", seg.start_addr, seg.end_addr),
            "Segment"
        );
    }
    if !image.dropped.is_empty() {
        warn!(count = image.dropped.len(), "Invalid records were skipped");
    }

    write_container_file(output, &image.blocks)?;
    info!(
        output = %output.display(),
        blocks = image.len(),
        bytes = image.to_bytes().len(),
        "Combined UF2 written"
    );
    Ok(())
}

fn show_info(path: &Path) -> Result<()> {
    let (blocks, dropped) = read_container_file(path)?;
    let info = inspect(&blocks);

    println!("File:        {}", path.display());
    println!("Blocks:      {}", info.block_count);
    if let (Some(start), Some(end)) = (info.start_addr, info.end_addr) {
        println!("Range:       0x{start:08X}..0x{end:08X} ({} bytes)", end - start);
    }
    for id in &info.families {
        println!(
            "Family:      0x{id:08X} ({})",
            family_name(*id).unwrap_or("unknown")
        );
    }
    let widths = info
        .payload_widths
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    println!("Payload:     {widths} bytes/block");
    println!(
        "Numbering:   {}",
        if info.contiguous { "contiguous" } else { "NOT contiguous" }
    );
    if !dropped.is_empty() {
        println!("Invalid:     {} records skipped", dropped.len());
    }
    Ok(())
}

fn write_config(path: &Path) -> Result<()> {
    SessionConfig::default()
        .save_to_file(path)
        .with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), "Wrote default configuration");
    Ok(())
}

/// Logs upload progress every 10% and forwards everything else to tracing.
#[derive(Default)]
struct ProgressObserver {
    last_decile: AtomicU32,
}

impl TransferObserver for ProgressObserver {
    fn on_event(&self, event: &TransferEvent) {
        if let TransferEvent::Progress(p) = event {
            let decile = p.percent / 10;
            if decile > self.last_decile.swap(decile, Ordering::Relaxed) {
                info!(
                    "Progress: {}% ({}/{} bytes, {:.1} KB/s)",
                    p.percent,
                    p.bytes_sent,
                    p.total_bytes,
                    p.throughput / 1024.0
                );
            }
        }
        TracingObserver.on_event(event);
    }
}
