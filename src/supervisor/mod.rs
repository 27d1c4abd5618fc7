//! # Modem Daemon Supervision
//!
//! Starts Direwolf (or any AGWPE-serving daemon) as a child process, waits for its
//! AGWPE port to accept connections, and watches it afterwards.
//!
//! ## Start sequence
//!
//! 1. If the AGWPE port already accepts connections, the daemon is managed elsewhere;
//!    nothing is spawned.
//! 2. The daemon config file must exist.
//! 3. `<command> -c <config> <args...>` is spawned with stdout and stderr captured into
//!    a rolling [`OutputTail`].
//! 4. The port is probed every 500 ms until it answers, the child exits, or the startup
//!    timeout passes (the half-started child is then stopped).
//!
//! Once up, a monitor task checks liveness every second and sends a single
//! [`DaemonExit`] if the process dies without [`ProcessSupervisor::stop`] being called.
use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};

use crate::logutil::escape_log;

/// Output lines kept for diagnostics.
pub const TAIL_LINES: usize = 20;

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("daemon config file not found: {}", .0.display())]
    ConfigMissing(PathBuf),

    #[error("failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("daemon exited during startup (exit code {code:?})")]
    ExitedDuringStartup {
        code: Option<i32>,
        output: Vec<String>,
    },

    #[error("daemon did not open its AGWPE port within {waited:?}")]
    StartupTimeout {
        waited: Duration,
        output: Vec<String>,
    },
}

impl SupervisorError {
    /// Captured daemon output, if this failure carries any.
    pub fn output(&self) -> &[String] {
        match self {
            SupervisorError::ExitedDuringStartup { output, .. }
            | SupervisorError::StartupTimeout { output, .. } => output,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub command: PathBuf,
    pub config_path: PathBuf,
    pub args: Vec<String>,
    pub host: String,
    pub port: u16,
    pub startup_timeout: Duration,
    pub stop_grace: Duration,
    pub probe_interval: Duration,
    pub probe_timeout: Duration,
    pub monitor_interval: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            command: PathBuf::from("direwolf"),
            config_path: PathBuf::from("config/direwolf.conf"),
            args: Vec::new(),
            host: "127.0.0.1".to_string(),
            port: 8000,
            startup_timeout: Duration::from_secs(10),
            stop_grace: Duration::from_secs(3),
            probe_interval: Duration::from_millis(500),
            probe_timeout: Duration::from_secs(1),
            monitor_interval: Duration::from_secs(1),
        }
    }
}

/// How [`ProcessSupervisor::start`] satisfied the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Started {
    /// Port was already listening; nothing spawned.
    External,
    Spawned { pid: Option<u32> },
    /// A supervised child is already running.
    AlreadyRunning,
}

/// Sent once when a supervised daemon exits on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonExit {
    pub code: Option<i32>,
    pub output: Vec<String>,
}

/// Rolling buffer of the last few output lines, shared with the pipe readers.
#[derive(Debug, Clone)]
pub struct OutputTail {
    lines: Arc<Mutex<VecDeque<String>>>,
    cap: usize,
}

impl OutputTail {
    pub fn new(cap: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(cap))),
            cap,
        }
    }

    pub fn push(&self, line: String) {
        let mut lines = self.lines.lock().unwrap_or_else(|p| p.into_inner());
        if self.cap == 0 {
            return;
        }
        while lines.len() >= self.cap {
            lines.pop_front();
        }
        lines.push_back(line);
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .cloned()
            .collect()
    }
}

/// Plain TCP connect probe: does anything listen on `host:port`?
pub async fn probe_port(host: &str, port: u16, wait: Duration) -> bool {
    matches!(
        timeout(wait, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

struct ProcessHandle {
    child: Arc<tokio::sync::Mutex<Child>>,
    pid: Option<u32>,
    tail: OutputTail,
    readers: Vec<JoinHandle<()>>,
    monitor: JoinHandle<()>,
    stopping: Arc<AtomicBool>,
}

pub struct ProcessSupervisor {
    settings: SupervisorSettings,
    handle: tokio::sync::Mutex<Option<ProcessHandle>>,
    exit_tx: Mutex<Option<mpsc::UnboundedSender<DaemonExit>>>,
}

impl ProcessSupervisor {
    pub fn new(settings: SupervisorSettings) -> Self {
        Self {
            settings,
            handle: tokio::sync::Mutex::new(None),
            exit_tx: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    /// Register for the unexpected-exit notification. Call before [`start`](Self::start).
    pub fn exit_notifications(&self) -> mpsc::UnboundedReceiver<DaemonExit> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.exit_tx.lock().unwrap_or_else(|p| p.into_inner()) = Some(tx);
        rx
    }

    pub async fn is_running(&self) -> bool {
        self.handle.lock().await.is_some()
    }

    pub async fn pid(&self) -> Option<u32> {
        self.handle.lock().await.as_ref().and_then(|h| h.pid)
    }

    /// Most recent daemon output, empty when nothing is supervised.
    pub async fn recent_output(&self) -> Vec<String> {
        match self.handle.lock().await.as_ref() {
            Some(h) => h.tail.snapshot(),
            None => Vec::new(),
        }
    }

    async fn probe(&self) -> bool {
        probe_port(
            &self.settings.host,
            self.settings.port,
            self.settings.probe_timeout,
        )
        .await
    }

    pub async fn start(&self) -> Result<Started, SupervisorError> {
        let mut slot = self.handle.lock().await;
        if slot.is_some() {
            return Ok(Started::AlreadyRunning);
        }

        let s = &self.settings;
        if self.probe().await {
            info!(
                "AGWPE port {}:{} already listening, using externally managed daemon",
                s.host, s.port
            );
            return Ok(Started::External);
        }

        if !s.config_path.exists() {
            error!("daemon config file not found: {}", s.config_path.display());
            return Err(SupervisorError::ConfigMissing(s.config_path.clone()));
        }

        let mut cmd = Command::new(&s.command);
        cmd.arg("-c")
            .arg(&s.config_path)
            .args(&s.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        info!(
            "Starting daemon: {} -c {} {}",
            s.command.display(),
            s.config_path.display(),
            s.args.join(" ")
        );
        let mut child = cmd.spawn().map_err(|source| SupervisorError::Spawn {
            command: s.command.display().to_string(),
            source,
        })?;
        let pid = child.id();

        let tail = OutputTail::new(TAIL_LINES);
        let mut readers = Vec::new();
        if let Some(out) = child.stdout.take() {
            readers.push(tokio::spawn(collect_output(out, tail.clone())));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(tokio::spawn(collect_output(err, tail.clone())));
        }

        let started_at = Instant::now();
        let deadline = started_at + s.startup_timeout;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    join_readers(&mut readers).await;
                    let output = tail.snapshot();
                    error!("daemon exited during startup ({})", status);
                    log_output(&output);
                    return Err(SupervisorError::ExitedDuringStartup {
                        code: status.code(),
                        output,
                    });
                }
                Ok(None) => {}
                Err(e) => warn!("could not poll daemon status: {}", e),
            }

            if self.probe().await {
                break;
            }

            if Instant::now() >= deadline {
                let waited = started_at.elapsed();
                error!("daemon did not open port {} within {:?}", s.port, waited);
                terminate(&mut child, s.stop_grace).await;
                join_readers(&mut readers).await;
                let output = tail.snapshot();
                log_output(&output);
                return Err(SupervisorError::StartupTimeout { waited, output });
            }
            sleep(s.probe_interval).await;
        }

        info!(
            "daemon is up (pid {:?}) after {:.1}s",
            pid,
            started_at.elapsed().as_secs_f32()
        );

        let child = Arc::new(tokio::sync::Mutex::new(child));
        let stopping = Arc::new(AtomicBool::new(false));
        let exit_tx = self
            .exit_tx
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        let monitor = tokio::spawn(monitor(
            child.clone(),
            tail.clone(),
            stopping.clone(),
            exit_tx,
            s.monitor_interval,
        ));

        *slot = Some(ProcessHandle {
            child,
            pid,
            tail,
            readers,
            monitor,
            stopping,
        });
        Ok(Started::Spawned { pid })
    }

    /// Terminate the supervised daemon, if any. Safe to call repeatedly.
    pub async fn stop(&self) {
        let handle = self.handle.lock().await.take();
        let Some(mut handle) = handle else {
            debug!("no supervised daemon to stop");
            return;
        };
        handle.stopping.store(true, Ordering::SeqCst);
        handle.monitor.abort();
        {
            let mut child = handle.child.lock().await;
            info!("Stopping daemon (pid {:?})", handle.pid);
            terminate(&mut child, self.settings.stop_grace).await;
        }
        join_readers(&mut handle.readers).await;
    }
}

async fn collect_output<R>(pipe: R, tail: OutputTail)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(pipe).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                debug!("daemon: {}", escape_log(&line));
                tail.push(line);
            }
            Ok(None) => break,
            Err(e) => {
                debug!("daemon output read failed: {}", e);
                break;
            }
        }
    }
}

async fn join_readers(readers: &mut Vec<JoinHandle<()>>) {
    for reader in readers.drain(..) {
        if timeout(Duration::from_secs(1), reader).await.is_err() {
            debug!("daemon output reader still busy, leaving it behind");
        }
    }
}

fn log_output(output: &[String]) {
    if output.is_empty() {
        error!("daemon produced no output");
        return;
    }
    error!("last daemon output:");
    for line in output {
        error!("  {}", escape_log(line));
    }
}

/// SIGTERM, wait `grace`, then SIGKILL. Errors are logged, never returned.
async fn terminate(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        if let Some(pid) = child.id() {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                warn!("SIGTERM to pid {} failed: {}", pid, e);
            }
        }
    }
    #[cfg(not(unix))]
    {
        if let Err(e) = child.start_kill() {
            warn!("terminate failed: {}", e);
        }
    }

    match timeout(grace, child.wait()).await {
        Ok(Ok(status)) => info!("daemon exited ({})", status),
        Ok(Err(e)) => warn!("waiting for daemon failed: {}", e),
        Err(_) => {
            warn!("daemon ignored SIGTERM for {:?}, killing", grace);
            match timeout(Duration::from_secs(1), child.kill()).await {
                Ok(Ok(())) => info!("daemon killed"),
                Ok(Err(e)) => warn!("kill failed: {}", e),
                Err(_) => warn!("daemon still running after kill"),
            }
        }
    }
}

async fn monitor(
    child: Arc<tokio::sync::Mutex<Child>>,
    tail: OutputTail,
    stopping: Arc<AtomicBool>,
    exit_tx: Option<mpsc::UnboundedSender<DaemonExit>>,
    every: Duration,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let status = child.lock().await.try_wait();
        match status {
            Ok(None) => continue,
            Ok(Some(status)) => {
                if stopping.load(Ordering::SeqCst) {
                    return;
                }
                // Let the pipe readers catch the final lines.
                sleep(Duration::from_millis(100)).await;
                let output = tail.snapshot();
                error!("daemon exited unexpectedly ({})", status);
                log_output(&output);
                if let Some(tx) = exit_tx {
                    let _ = tx.send(DaemonExit {
                        code: status.code(),
                        output,
                    });
                }
                return;
            }
            Err(e) => {
                warn!("daemon liveness check failed: {}", e);
            }
        }
    }
}
