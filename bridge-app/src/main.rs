// dvapbridge -- relay server and DVAP utilities.
//
// Usage:
//   dvapbridge relay
//   dvapbridge relay --config relay.toml --logfile frames.bin
//   dvapbridge --debug relay --listen 127.0.0.1:8191 --overflow drop
//   dvapbridge device --port /dev/ttyUSB0 info
//   dvapbridge device --port /dev/ttyUSB0 monitor --frequency 145670000 --duration 60
//   dvapbridge device --port /dev/ttyUSB0 scan --start 144000000 --steps 400 --stride 100
//   dvapbridge parse-dump frames.bin

mod dump;

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

use dvapbridge::device::{
    BandScan, DeviceEvent, DvapBuilder, DvapDevice, Modulation, VersionSelector,
};
use dvapbridge::protocol::{FrameKind, classify};
use dvapbridge::relay::{OverflowPolicy, RelayConfig, RelayServer};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// DVAP bridge -- relay D-STAR frames between network clients and talk to a
/// DVAP Dongle.
#[derive(Parser)]
#[command(name = "dvapbridge", version, about)]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the relay server.
    Relay {
        /// TOML configuration file. Flags below override its values.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Listen address (default: 0.0.0.0:8191).
        #[arg(long)]
        listen: Option<String>,

        /// Append every relayed frame to this file.
        #[arg(short, long)]
        logfile: Option<PathBuf>,

        /// Frames buffered per client.
        #[arg(long)]
        queue_capacity: Option<usize>,

        /// What to do with a client whose queue is full.
        #[arg(long, value_enum)]
        overflow: Option<OverflowArg>,
    },

    /// Talk to a DVAP on a serial port.
    Device {
        /// Serial port path (e.g. /dev/ttyUSB0, COM3).
        #[arg(long)]
        port: String,

        /// Baud rate.
        #[arg(long, default_value_t = 230_400)]
        baud: u32,

        #[command(subcommand)]
        action: DeviceAction,
    },

    /// Describe the frames in a relay frame log.
    ParseDump {
        /// Path of the log written with `relay --logfile`.
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum DeviceAction {
    /// Print name, serial, versions, status and TX limits.
    Info,

    /// Start the receiver in GMSK mode and print events.
    Monitor {
        /// RX/TX frequency in Hz.
        #[arg(long)]
        frequency: Option<u32>,

        /// Squelch threshold in dBm (-128 to -45).
        #[arg(long, allow_hyphen_values = true)]
        squelch: Option<i32>,

        /// Duration in seconds (0 = run until Ctrl-C).
        #[arg(long, default_value_t = 0)]
        duration: u64,
    },

    /// Run a band scan and print the RSSI at each step.
    Scan {
        /// Start frequency in Hz.
        #[arg(long, default_value_t = 144_000_000)]
        start: u32,

        /// Number of steps.
        #[arg(long, default_value_t = 100)]
        steps: u16,

        /// Step size in units of 100 Hz.
        #[arg(long, default_value_t = 250)]
        stride: u8,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OverflowArg {
    Disconnect,
    Drop,
}

impl From<OverflowArg> for OverflowPolicy {
    fn from(arg: OverflowArg) -> Self {
        match arg {
            OverflowArg::Disconnect => OverflowPolicy::Disconnect,
            OverflowArg::Drop => OverflowPolicy::Drop,
        }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn format_freq(hz: u32) -> String {
    let mhz = hz as f64 / 1_000_000.0;
    format!("{mhz:.6} MHz")
}

async fn open_device(port: &str, baud: u32) -> Result<DvapDevice> {
    DvapBuilder::new()
        .serial_port(port)
        .baud_rate(baud)
        .build()
        .await
        .with_context(|| format!("failed to open DVAP on {port}"))
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_relay(
    debug: bool,
    config: Option<PathBuf>,
    listen: Option<String>,
    logfile: Option<PathBuf>,
    queue_capacity: Option<usize>,
    overflow: Option<OverflowArg>,
) -> Result<()> {
    let mut relay_config = match &config {
        Some(path) => RelayConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => RelayConfig::default(),
    };
    if let Some(listen) = listen {
        relay_config.listen_addr = listen;
    }
    if logfile.is_some() {
        relay_config.log_file = logfile;
    }
    if let Some(capacity) = queue_capacity {
        relay_config.queue_capacity = capacity;
    }
    if let Some(overflow) = overflow {
        relay_config.overflow = overflow.into();
    }
    relay_config.debug |= debug;

    let server = RelayServer::bind(relay_config)
        .await
        .context("failed to start relay")?;
    let handle = server.handle();
    let mut run = tokio::spawn(server.run());

    tokio::select! {
        result = &mut run => {
            return result.context("relay task panicked")?.map_err(Into::into);
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
            handle.shutdown();
        }
    }

    run.await.context("relay task panicked")??;
    Ok(())
}

async fn cmd_info(dvap: &DvapDevice) -> Result<()> {
    let name = dvap.name().await?;
    let serial = dvap.serial().await?;
    let iface = dvap.interface_version().await?;
    let boot = dvap.hardware_version(VersionSelector::Bootcode).await?;
    let firmware = dvap.hardware_version(VersionSelector::Firmware).await?;
    let status = dvap.status().await?;
    let (lower, upper) = dvap.tx_frequency_limits().await?;

    println!("DVAP Information");
    println!("  Port:           {}", dvap.peer());
    println!("  Name:           {name}");
    println!("  Serial:         {serial}");
    println!("  Interface:      {iface:.2}");
    println!("  Bootcode:       {boot:.2}");
    println!("  Firmware:       {firmware:.2}");
    println!("  Status:         {status:?}");
    println!("  TX limits:      {} - {}", format_freq(lower), format_freq(upper));
    Ok(())
}

async fn cmd_monitor(
    dvap: &DvapDevice,
    frequency: Option<u32>,
    squelch: Option<i32>,
    duration_secs: u64,
) -> Result<()> {
    let mut events = dvap.subscribe();

    dvap.stop().await?;
    dvap.set_modulation(Modulation::Gmsk).await?;
    if let Some(hz) = frequency {
        dvap.set_rx_tx_frequency(hz).await?;
    }
    if let Some(dbm) = squelch {
        dvap.set_squelch_threshold(dbm).await?;
    }
    dvap.start().await?;

    println!("Monitoring DVAP events (Ctrl-C to stop)...");

    let deadline = (duration_secs > 0).then(|| Instant::now() + Duration::from_secs(duration_secs));

    loop {
        let timeout = match deadline {
            Some(dl) => {
                let remaining = dl.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    println!("Monitor duration elapsed.");
                    break;
                }
                remaining
            }
            None => Duration::from_secs(3600),
        };

        let received = tokio::select! {
            r = tokio::time::timeout(timeout, events.recv()) => r,
            _ = tokio::signal::ctrl_c() => break,
        };

        match received {
            Ok(Ok(DeviceEvent::Data(frame))) => match classify(frame.as_bytes()) {
                FrameKind::VoiceHeader(h) => println!(
                    "[header] stream={:#06x} rpt1=[{}] rpt2=[{}] urcall=[{}] mycall=[{}]",
                    h.stream_id, h.rpt1, h.rpt2, h.urcall, h.mycall
                ),
                FrameKind::DataFrame(d) => {
                    println!("[data]   stream={:#06x} seq={}", d.stream_id, d.seq)
                }
                FrameKind::Unknown(_) => println!("[frame]  {:02X?}", frame.as_bytes()),
            },
            Ok(Ok(DeviceEvent::Disconnected)) => {
                println!("DVAP disconnected.");
                return Ok(());
            }
            Ok(Ok(event)) => println!("[event]  {event:?}"),
            Ok(Err(tokio::sync::broadcast::error::RecvError::Lagged(n))) => {
                println!("[warning] missed {n} events (consumer too slow)");
            }
            Ok(Err(tokio::sync::broadcast::error::RecvError::Closed)) => {
                println!("Event channel closed.");
                break;
            }
            Err(_) => {
                if deadline.is_some() {
                    println!("Monitor duration elapsed.");
                }
                break;
            }
        }
    }

    dvap.stop().await?;
    Ok(())
}

async fn cmd_scan(dvap: &DvapDevice, start: u32, steps: u16, stride: u8) -> Result<()> {
    let scan = BandScan::new(steps, stride, start);
    if (scan.start_hz, scan.steps, scan.stride) != (start, steps, stride) {
        println!(
            "Scan clamped to {} steps of {} Hz from {}",
            scan.steps,
            u32::from(scan.stride) * 100,
            format_freq(scan.start_hz)
        );
    }
    let rssi = dvap.band_scan(scan.steps, scan.stride, scan.start_hz).await?;
    for (i, value) in (0..=u16::MAX).zip(rssi.iter()) {
        println!("{}  {value:>3}", format_freq(scan.step_frequency(i)));
    }
    Ok(())
}

fn cmd_parse_dump(file: &Path) -> Result<()> {
    let buf = std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    for line in dump::describe_frames(&buf)? {
        println!("{line}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Command::Relay {
            config,
            listen,
            logfile,
            queue_capacity,
            overflow,
        } => cmd_relay(cli.debug, config, listen, logfile, queue_capacity, overflow).await,
        Command::Device { port, baud, action } => {
            let dvap = open_device(&port, baud).await?;
            let result = match action {
                DeviceAction::Info => cmd_info(&dvap).await,
                DeviceAction::Monitor {
                    frequency,
                    squelch,
                    duration,
                } => cmd_monitor(&dvap, frequency, squelch, duration).await,
                DeviceAction::Scan {
                    start,
                    steps,
                    stride,
                } => cmd_scan(&dvap, start, steps, stride).await,
            };
            dvap.close().await.ok();
            result
        }
        Command::ParseDump { file } => cmd_parse_dump(&file),
    }
}
