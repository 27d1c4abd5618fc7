//! Ordered, run-once shutdown across the engine, the daemon supervisor and the BBS.
//!
//! Sequence:
//! 1. arm a watchdog thread that hard-exits the process if the rest takes too long
//! 2. interrupt the AGWPE reader
//! 3. stop the supervised daemon
//! 4. close every session and release the engine
//! 5. wait for the engine writer to flush the queued disconnect and unregister frames
//! 6. disarm the watchdog
//!
//! Any later trigger (a second Ctrl-C, a daemon exit racing a signal) is a no-op.
use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::agwpe::{AgwpeClient, Interrupt};
use crate::bbs::BbsServer;
use crate::supervisor::ProcessSupervisor;

/// Default time allowed for a clean shutdown before the watchdog exits the process.
pub const WATCHDOG_WINDOW: Duration = Duration::from_secs(3);

/// Part of the window kept back from the writer flush so it gives up before the watchdog fires.
const FLUSH_MARGIN: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT / SIGTERM.
    Signal,
    /// The supervised daemon exited on its own.
    DaemonDied,
    /// The main loop failed (e.g. the engine connection dropped).
    RuntimeError,
}

impl ShutdownReason {
    pub fn exit_code(self) -> i32 {
        match self {
            ShutdownReason::Signal => 0,
            ShutdownReason::DaemonDied | ShutdownReason::RuntimeError => 1,
        }
    }
}

/// A thread that runs `on_expire` unless cancelled within the window.
///
/// A plain OS thread, so it still fires when every runtime worker is stuck.
pub struct Watchdog {
    cancel: Option<std_mpsc::Sender<()>>,
    thread: Option<thread::JoinHandle<bool>>,
}

impl Watchdog {
    pub fn arm<F>(window: Duration, on_expire: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let (tx, rx) = std_mpsc::channel::<()>();
        let thread = thread::Builder::new()
            .name("shutdown-watchdog".into())
            .spawn(move || match rx.recv_timeout(window) {
                Err(std_mpsc::RecvTimeoutError::Timeout) => {
                    on_expire();
                    true
                }
                _ => false,
            });
        let thread = match thread {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!("could not start shutdown watchdog: {}", e);
                None
            }
        };
        Self {
            cancel: Some(tx),
            thread,
        }
    }

    /// Disarm. Returns `true` if the watchdog had already fired.
    pub fn cancel(mut self) -> bool {
        if let Some(tx) = self.cancel.take() {
            let _ = tx.send(());
        }
        match self.thread.take() {
            Some(handle) => handle.join().unwrap_or(false),
            None => false,
        }
    }
}

pub struct ShutdownCoordinator {
    started: AtomicBool,
    window: Duration,
    engine: Option<Arc<dyn Interrupt>>,
    transport: Option<Arc<AgwpeClient>>,
    supervisor: Option<Arc<ProcessSupervisor>>,
    registry: Arc<BbsServer>,
}

impl ShutdownCoordinator {
    pub fn new(registry: Arc<BbsServer>) -> Self {
        Self {
            started: AtomicBool::new(false),
            window: WATCHDOG_WINDOW,
            engine: None,
            transport: None,
            supervisor: None,
            registry,
        }
    }

    pub fn with_engine(mut self, engine: Arc<dyn Interrupt>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Interrupt this client and, after the registry shut down, wait for its writer to drain.
    pub fn with_transport(mut self, client: Arc<AgwpeClient>) -> Self {
        let engine: Arc<dyn Interrupt> = client.clone();
        self.engine = Some(engine);
        self.transport = Some(client);
        self
    }

    pub fn with_supervisor(mut self, supervisor: Arc<ProcessSupervisor>) -> Self {
        self.supervisor = Some(supervisor);
        self
    }

    pub fn with_watchdog(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Run the shutdown sequence. Returns `false` if it already ran (or is running).
    pub async fn shutdown(&self, reason: ShutdownReason) -> bool {
        if self.started.swap(true, Ordering::SeqCst) {
            info!("shutdown already in progress, ignoring {:?}", reason);
            return false;
        }
        info!("Shutting down ({:?})", reason);

        let window = self.window;
        let began = Instant::now();
        let watchdog = Watchdog::arm(window, move || {
            error!("shutdown did not finish within {:?}, forcing exit", window);
            std::process::exit(1);
        });

        if let Some(engine) = &self.engine {
            engine.interrupt();
        }
        if let Some(supervisor) = &self.supervisor {
            supervisor.stop().await;
        }
        self.registry.shutdown();
        if let Some(transport) = &self.transport {
            let wait = window
                .saturating_sub(began.elapsed())
                .saturating_sub(FLUSH_MARGIN);
            transport.finish(wait).await;
        }

        watchdog.cancel();
        info!("Shutdown complete");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn watchdog_fires_when_not_cancelled() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let dog = Watchdog::arm(Duration::from_millis(20), move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        thread::sleep(Duration::from_millis(100));
        assert!(dog.cancel());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancelled_watchdog_stays_quiet() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let dog = Watchdog::arm(Duration::from_secs(5), move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert!(!dog.cancel());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn exit_codes_follow_reason() {
        assert_eq!(ShutdownReason::Signal.exit_code(), 0);
        assert_eq!(ShutdownReason::DaemonDied.exit_code(), 1);
        assert_eq!(ShutdownReason::RuntimeError.exit_code(), 1);
    }
}
