//! Binary entrypoint for the ax25bbs CLI.
//!
//! Commands:
//! - `start` - start (or adopt) Direwolf, connect to its AGWPE port, and run the chat BBS
//! - `init [--force]` - write a starter `config.toml`
//! - `probe [--timeout <s>]` - check whether the AGWPE port is listening (JSON on stdout)
//! - `direwolf-config` - generate `direwolf.conf` from detected sound cards
//!
//! See the library crate docs for module-level details: `ax25bbs::`.
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use ax25bbs::agwpe::{AgwpeClient, AgwpeSettings};
use ax25bbs::bbs::BbsServer;
use ax25bbs::config::Config;
use ax25bbs::direwolf_config::{self, DirewolfOptions};
use ax25bbs::shutdown::{ShutdownCoordinator, ShutdownReason};
use ax25bbs::supervisor::{probe_port, DaemonExit, ProcessSupervisor, Started};

#[derive(Parser)]
#[command(name = "ax25bbs")]
#[command(about = "A multi-user chat BBS for AX.25 packet radio")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the BBS
    Start,
    /// Write a default configuration file
    Init {
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
    /// Check whether the AGWPE port accepts connections
    Probe {
        /// Seconds to wait for the TCP connect
        #[arg(short, long, default_value_t = 2)]
        timeout: u64,
    },
    /// Generate a Direwolf configuration file
    DirewolfConfig {
        /// Station callsign for MYCALL (prompted for on a terminal when omitted)
        #[arg(long)]
        callsign: Option<String>,
        /// ALSA device such as plughw:1,0 (detected when omitted)
        #[arg(long)]
        device: Option<String>,
        /// Output path (defaults to direwolf.config_path from the config file)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Replace an existing file
        #[arg(long)]
        overwrite: bool,
        /// Only write a default file when none exists; never prompts
        #[arg(long, conflicts_with = "overwrite")]
        if_missing: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let pre_config = match cli.command {
        Commands::Init { .. } => None,
        _ => Config::load(&cli.config).await.ok(),
    };
    init_logging(&pre_config, cli.verbose);

    match cli.command {
        Commands::Start => {
            let config = match pre_config {
                Some(c) => c,
                None => Config::load(&cli.config).await?,
            };
            info!("Starting ax25bbs v{}", env!("CARGO_PKG_VERSION"));
            let code = run_bbs(config).await;
            std::process::exit(code);
        }
        Commands::Init { force } => {
            if !force && tokio::fs::try_exists(&cli.config).await.unwrap_or(false) {
                error!(
                    "{} already exists; pass --force to replace it",
                    cli.config
                );
                std::process::exit(1);
            }
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
        Commands::Probe { timeout } => {
            let config = pre_config.unwrap_or_default();
            let listening = probe_port(
                &config.agwpe.host,
                config.agwpe.port,
                Duration::from_secs(timeout),
            )
            .await;
            let payload = serde_json::json!({
                "status": if listening { "ok" } else { "unreachable" },
                "host": config.agwpe.host,
                "port": config.agwpe.port,
                "listening": listening,
                "timeout_seconds": timeout,
                "metrics": ax25bbs::metrics::snapshot(),
            });
            println!("{}", payload);
            std::process::exit(if listening { 0 } else { 1 });
        }
        Commands::DirewolfConfig {
            callsign,
            device,
            output,
            overwrite,
            if_missing,
        } => {
            let loaded = pre_config.is_some();
            let config = pre_config.unwrap_or_default();
            let path = output.unwrap_or_else(|| PathBuf::from(&config.direwolf.config_path));
            if if_missing {
                let call = callsign.unwrap_or_else(|| {
                    if loaded {
                        config.station.callsign.clone()
                    } else {
                        direwolf_config::PLACEHOLDER_CALLSIGN.to_string()
                    }
                });
                let created = direwolf_config::ensure_config(&path, &call)?;
                if !created {
                    info!("{} already exists, left unchanged", path.display());
                }
                return Ok(());
            }
            generate_direwolf_config(&config, path, callsign, device, overwrite)?;
        }
    }

    Ok(())
}

/// Run the BBS until a signal, daemon death, or engine loss. Returns the exit code.
async fn run_bbs(config: Config) -> i32 {
    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return 1;
    }

    let supervisor = if config.direwolf.auto_start {
        Some(Arc::new(ProcessSupervisor::new(config.supervisor_settings())))
    } else {
        None
    };
    let mut daemon_exits = supervisor.as_ref().map(|s| s.exit_notifications());

    if let Some(sup) = &supervisor {
        match sup.start().await {
            Ok(Started::Spawned { pid }) => info!("Direwolf started (pid {:?})", pid),
            Ok(Started::External) => info!("Using already running AGWPE engine"),
            Ok(Started::AlreadyRunning) => {}
            Err(e) => {
                error!("Failed to start Direwolf: {}", e);
                return 1;
            }
        }
    }

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let settings = AgwpeSettings::from_config(&config.agwpe);
    let engine = match AgwpeClient::connect(&settings, &config.station.callsign, events_tx).await {
        Ok(engine) => engine,
        Err(e) => {
            error!("Failed to connect to AGWPE at {}: {}", settings.addr(), e);
            if let Some(sup) = &supervisor {
                sup.stop().await;
            }
            return 1;
        }
    };

    let bbs = Arc::new(BbsServer::from_config(&config, engine.clone()));
    let mut coordinator = ShutdownCoordinator::new(bbs.clone()).with_transport(engine);
    if let Some(sup) = &supervisor {
        coordinator = coordinator.with_supervisor(sup.clone());
    }

    info!(
        "{} ({}) listening on AGWPE {} radio port {}",
        config.station.name,
        bbs.callsign(),
        settings.addr(),
        settings.radio_port
    );

    let auto_shutdown = config.direwolf.auto_shutdown;
    let reason = tokio::select! {
        result = bbs.pump_events(&mut events_rx) => {
            if let Err(e) = result {
                error!("{}", e);
            }
            ShutdownReason::RuntimeError
        }
        _ = shutdown_signal() => {
            info!("Received shutdown signal");
            ShutdownReason::Signal
        }
        exit = next_daemon_exit(daemon_exits.as_mut(), auto_shutdown) => {
            error!("Direwolf exited (code {:?}), shutting down", exit.code);
            ShutdownReason::DaemonDied
        }
    };

    coordinator.shutdown(reason).await;
    reason.exit_code()
}

async fn next_daemon_exit(
    rx: Option<&mut mpsc::UnboundedReceiver<DaemonExit>>,
    auto_shutdown: bool,
) -> DaemonExit {
    match rx {
        Some(rx) if auto_shutdown => match rx.recv().await {
            Some(exit) => exit,
            None => std::future::pending().await,
        },
        _ => std::future::pending().await,
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("SIGTERM handler unavailable: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn generate_direwolf_config(
    config: &Config,
    path: PathBuf,
    callsign: Option<String>,
    device: Option<String>,
    overwrite: bool,
) -> Result<()> {
    let interactive = atty::is(atty::Stream::Stdin);
    let stdin = std::io::stdin();
    let mut input = stdin.lock();
    let mut out = std::io::stdout();

    let callsign = match callsign {
        Some(c) => c,
        None if interactive => direwolf_config::prompt_callsign(
            &mut input,
            &mut out,
            Some(config.station.callsign.as_str()),
        )?,
        None => config.station.callsign.clone(),
    };

    let device = match device {
        Some(d) => d,
        None => {
            let detected = direwolf_config::detect_audio_devices();
            if interactive {
                direwolf_config::prompt_device(&mut input, &mut out, &detected)?
            } else {
                detected
                    .first()
                    .map(|d| d.alsa_device())
                    .unwrap_or_else(|| direwolf_config::DEFAULT_AUDIO_DEVICE.to_string())
            }
        }
    };

    let mut options = DirewolfOptions::new(callsign);
    options.audio_device = device;
    options.agwpe_port = config.agwpe.port;
    let written = direwolf_config::write_config(&path, &options, overwrite)
        .with_context(|| format!("could not generate {}", path.display()))?;
    println!("Configuration written to {}", written.display());
    println!("Review PTT settings, then run: ax25bbs start");
    Ok(())
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    let configured = config
        .as_ref()
        .map(|c| c.logging.level_filter())
        .unwrap_or(log::LevelFilter::Info);
    // -v / -vv raise the configured level, never lower it
    let level = match verbosity {
        0 => configured,
        1 => configured.max(log::LevelFilter::Debug),
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(level);

    let log_file = config
        .as_ref()
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });

    match log_file {
        Some(f) => {
            let file = std::sync::Mutex::new(f);
            // When attached to a terminal, echo to the console too
            let is_tty = atty::is(atty::Stream::Stdout);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = file.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
        None => {
            builder.format(|fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
            });
        }
    }
    let _ = builder.try_init();
}
