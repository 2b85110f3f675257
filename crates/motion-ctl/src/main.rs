//! Motion master daemon entry point.
//!
//! Brings the bus to OP, optionally enables and homes the drives, then
//! holds the cell operational until a shutdown signal arrives. Exit code
//! is zero only for a clean OP-reached run and clean shutdown.

mod signals;

use anyhow::{Context, Result};
use clap::Parser;
use motion_common::MasterConfig;
use motion_fieldbus::FieldbusTransport;
use motion_master::Master;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use crate::signals::SignalHandler;

/// Motion master command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "motion-ctl",
    about = "SCARA motion master - EtherCAT bring-up and diagnostics daemon",
    version,
    long_about = None
)]
struct Args {
    /// Path to a master configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Network interface (overrides the config file).
    #[arg(long, short = 'i', value_name = "IFACE")]
    interface: Option<String>,

    /// Run against the simulated bus (no hardware).
    #[arg(long, short = 's')]
    simulated: bool,

    /// Number of simulated drives.
    #[arg(long, default_value = "2")]
    axes: u16,

    /// Enable the power stage of every drive after bring-up.
    #[arg(long)]
    enable: bool,

    /// Home every drive after enabling (implies --enable).
    #[arg(long)]
    home: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "starting motion-ctl");

    let mut config = load_config(&args)?;
    if let Some(interface) = &args.interface {
        config.interface = interface.clone();
    }

    let signal_handler = SignalHandler::install().context("failed to set up signal handlers")?;
    let transport = create_transport(&args)?;

    run_daemon(config, transport, &args, &signal_handler)
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!(
        "motion_ctl={level},motion_master={level},motion_fieldbus={level},motion_common={level}"
    );

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<MasterConfig> {
    if let Some(config_path) = &args.config {
        MasterConfig::from_file(config_path)
            .with_context(|| format!("failed to load config from {config_path:?}"))
    } else {
        info!("no config file given, using built-in defaults");
        Ok(MasterConfig::default())
    }
}

/// Pick the transport backend.
fn create_transport(args: &Args) -> Result<Box<dyn FieldbusTransport>> {
    if args.simulated {
        let drives = (0..args.axes)
            .map(|_| motion_fieldbus::sim::DriveModel::cmmt())
            .collect();
        let (transport, _sim) = motion_fieldbus::sim::SimulatedTransport::new(drives);
        info!(axes = args.axes, "using simulated bus");
        return Ok(Box::new(transport));
    }

    #[cfg(all(feature = "soem", target_os = "linux"))]
    {
        Ok(Box::new(motion_fieldbus::SoemTransport::new()))
    }

    #[cfg(not(all(feature = "soem", target_os = "linux")))]
    {
        anyhow::bail!(
            "built without the `soem` feature; use --simulated or rebuild with hardware support"
        )
    }
}

/// Bring up the bus, run the requested sequence, wait for shutdown.
fn run_daemon(
    config: MasterConfig,
    transport: Box<dyn FieldbusTransport>,
    args: &Args,
    signals: &SignalHandler,
) -> Result<()> {
    let mut master =
        Master::connect(config, transport).context("failed to start the motion master")?;

    for slave in master.slaves().to_vec() {
        info!(
            slave = slave.index,
            name = %slave.name,
            inputs = slave.input_len,
            outputs = slave.output_len,
            "slave online"
        );
    }

    // Only CiA 402 drives take motion commands; plain I/O modules are left
    // alone
    let drive_indices: Vec<u16> = master
        .slaves()
        .iter()
        .filter(|s| motion_fieldbus::pdo::is_supported_drive(&s.name, s.eep_id))
        .map(|s| s.index)
        .collect();
    if args.enable || args.home {
        for &slave in &drive_indices {
            master
                .enable_powerstage(slave)
                .with_context(|| format!("failed to enable drive {slave}"))?;
        }
    }
    if args.home {
        for &slave in &drive_indices {
            master
                .referencing_task(slave, false)
                .with_context(|| format!("failed to home drive {slave}"))?;
        }
    }

    info!("cell operational, waiting for shutdown signal");
    let mut last_report = std::time::Instant::now();
    while !signals.shutdown_requested() {
        if !master.connected() {
            warn!("master dropped out of OP");
            break;
        }
        if last_report.elapsed() >= Duration::from_secs(5) {
            let stats = master.stats();
            info!(
                cycles = stats.cycles,
                deadline_misses = stats.deadline_misses,
                wkc_errors = stats.wkc_errors,
                positions = ?drive_indices
                    .iter()
                    .map(|&s| master.position(s))
                    .collect::<Vec<_>>(),
                "cell status"
            );
            last_report = std::time::Instant::now();
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    info!("shutting down");
    master.shutdown().context("unclean shutdown")?;
    let stats = master.stats();
    info!(
        cycles = stats.cycles,
        deadline_misses = stats.deadline_misses,
        wkc_errors = stats.wkc_errors,
        "motion-ctl finished"
    );
    Ok(())
}
