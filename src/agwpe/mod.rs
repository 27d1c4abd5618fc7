//! # AGWPE Protocol Engine
//!
//! TCP client for AGWPE-compatible packet engines (Direwolf, soundmodem, AGW Packet
//! Engine). The engine performs AX.25 framing and link negotiation; this module turns
//! its frames into [`AgwpeEvent`]s and exposes the [`Outbound`] capability sessions use
//! to reply.
//!
//! ## Tasks
//!
//! ```text
//!                ┌──────────────┐  AgwpeEvent   ┌──────────────┐
//!  TCP read ───→ │ reader task  │──────────────→│  main loop   │──→ ConnectionHandler
//!                └──────────────┘               └──────────────┘
//!                ┌──────────────┐  Vec<u8>
//!  TCP write ←── │ writer task  │←───────────── Outbound::send_bytes / disconnect
//!                └──────────────┘
//! ```
//!
//! Each task watches its own stop signal. [`Interrupt::interrupt`] wakes a reader
//! parked in `read()` without tearing the socket down, so the writer can still
//! deliver disconnects and the unregister frame during shutdown.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ax25bbs::agwpe::{AgwpeClient, AgwpeSettings};
//! use tokio::sync::mpsc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (tx, mut rx) = mpsc::unbounded_channel();
//!     let client = AgwpeClient::connect(&AgwpeSettings::default(), "W1BBS-10", tx).await?;
//!     while let Some(event) = rx.recv().await {
//!         println!("{:?}", event);
//!     }
//!     drop(client);
//!     Ok(())
//! }
//! ```

pub mod frame;

use log::{debug, error, info, trace, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::config::AgwpeConfig;
use crate::logutil::{escape_log, hex_preview};
use crate::metrics;
use frame::{AgwpeFrame, FrameDecoder, FrameError, FrameKind};

/// Largest `D` frame payload sent to the engine.
pub const MAX_DATA_CHUNK: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no link to station {0}")]
    UnknownLink(String),

    #[error("AGWPE connection closed")]
    Closed,

    #[error("timed out connecting to AGWPE at {addr} after {timeout:?}")]
    ConnectTimeout { addr: String, timeout: Duration },

    #[error("AGWPE engine not ready after {0:?}")]
    NotReady(Duration),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connection parameters for [`AgwpeClient::connect`].
#[derive(Debug, Clone)]
pub struct AgwpeSettings {
    pub host: String,
    pub port: u16,
    pub radio_port: u8,
    pub connect_timeout: Duration,
    pub ready_timeout: Duration,
}

impl Default for AgwpeSettings {
    fn default() -> Self {
        Self::from_config(&AgwpeConfig::default())
    }
}

impl AgwpeSettings {
    pub fn from_config(config: &AgwpeConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            radio_port: config.radio_port,
            connect_timeout: config.connect_timeout(),
            ready_timeout: config.ready_timeout(),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Link-level happenings reported by the engine, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgwpeEvent {
    EngineReady,
    CallsignRegistered {
        callsign: String,
        success: bool,
    },
    IncomingConnection {
        port: u8,
        remote: String,
        local: String,
    },
    Data {
        port: u8,
        remote: String,
        local: String,
        data: Vec<u8>,
    },
    Disconnected {
        port: u8,
        remote: String,
        local: String,
    },
}

impl AgwpeEvent {
    pub fn dispatch(self, handler: &dyn ConnectionHandler) {
        match self {
            AgwpeEvent::EngineReady => handler.on_engine_ready(),
            AgwpeEvent::CallsignRegistered { callsign, success } => {
                handler.on_callsign_registered(&callsign, success)
            }
            AgwpeEvent::IncomingConnection {
                port,
                remote,
                local,
            } => handler.on_incoming_connection(port, &remote, &local),
            AgwpeEvent::Data {
                port,
                remote,
                local,
                data,
            } => handler.on_data(port, &remote, &local, &data),
            AgwpeEvent::Disconnected {
                port,
                remote,
                local,
            } => handler.on_disconnected(port, &remote, &local),
        }
    }
}

/// Receiver of engine events.
pub trait ConnectionHandler: Send + Sync {
    fn on_incoming_connection(&self, port: u8, remote: &str, local: &str);
    fn on_data(&self, port: u8, remote: &str, local: &str, data: &[u8]);
    fn on_disconnected(&self, port: u8, remote: &str, local: &str);
    fn on_callsign_registered(&self, callsign: &str, success: bool);
    fn on_engine_ready(&self) {}
}

/// What a session may do to its station's link.
pub trait Outbound: Send + Sync {
    /// Queue bytes for the station. `false` when there is no link or the engine is gone.
    fn send_bytes(&self, station: &str, data: &[u8]) -> bool;
    /// Ask the engine to drop the link. No-op for stations without a link.
    fn disconnect(&self, station: &str) -> Result<(), TransportError>;
    /// Unregister and release the engine connection. Idempotent.
    fn close(&self) -> Result<(), TransportError>;
}

/// Wake anything blocked on the engine so shutdown can proceed.
pub trait Interrupt: Send + Sync {
    fn interrupt(&self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Link {
    port: u8,
    remote: String,
    local: String,
}

type LinkTable = Arc<Mutex<HashMap<String, Link>>>;

fn lock_links(links: &LinkTable) -> MutexGuard<'_, HashMap<String, Link>> {
    links.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct AgwpeClient {
    mycall: String,
    radio_port: u8,
    links: LinkTable,
    writer_tx: mpsc::UnboundedSender<Vec<u8>>,
    reader_stop: watch::Sender<bool>,
    writer_stop: watch::Sender<bool>,
    closed: AtomicBool,
    link_down: Arc<AtomicBool>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl AgwpeClient {
    /// Connect, wait for the engine's version reply, then register `mycall`.
    ///
    /// Registration success is reported later as [`AgwpeEvent::CallsignRegistered`].
    pub async fn connect(
        settings: &AgwpeSettings,
        mycall: &str,
        events: mpsc::UnboundedSender<AgwpeEvent>,
    ) -> Result<Arc<Self>, TransportError> {
        let addr = settings.addr();
        let stream = tokio::time::timeout(settings.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| TransportError::ConnectTimeout {
                addr: addr.clone(),
                timeout: settings.connect_timeout,
            })??;
        stream.set_nodelay(true)?;
        info!("Connected to AGWPE engine at {}", addr);

        let (rd, wr) = stream.into_split();
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let (reader_stop, reader_stop_rx) = watch::channel(false);
        let (writer_stop, writer_stop_rx) = watch::channel(false);
        let (ready_tx, ready_rx) = oneshot::channel();
        let links: LinkTable = Arc::new(Mutex::new(HashMap::new()));
        let link_down = Arc::new(AtomicBool::new(false));

        let writer = tokio::spawn(writer_task(wr, writer_rx, writer_stop_rx));
        tokio::spawn(
            Reader {
                links: links.clone(),
                events,
                ready: Some(ready_tx),
                link_down: link_down.clone(),
            }
            .run(rd, reader_stop_rx),
        );

        let client = AgwpeClient {
            mycall: mycall.to_ascii_uppercase(),
            radio_port: settings.radio_port,
            links,
            writer_tx,
            reader_stop,
            writer_stop,
            closed: AtomicBool::new(false),
            link_down,
            writer: Mutex::new(Some(writer)),
        };

        client.queue(&AgwpeFrame::version_request())?;
        match tokio::time::timeout(settings.ready_timeout, ready_rx).await {
            Ok(Ok(())) => {}
            _ => {
                client.closed.store(true, Ordering::SeqCst);
                client.interrupt();
                let _ = client.writer_stop.send(true);
                return Err(TransportError::NotReady(settings.ready_timeout));
            }
        }

        let mut register = AgwpeFrame::register(&client.mycall);
        register.port = client.radio_port;
        client.queue(&register)?;
        info!("Registering callsign {} on radio port {}", client.mycall, client.radio_port);
        Ok(Arc::new(client))
    }

    pub fn callsign(&self) -> &str {
        &self.mycall
    }

    /// True once [`Outbound::close`] ran or the engine dropped the TCP connection.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.link_down.load(Ordering::SeqCst)
    }

    /// Stations with an open link.
    pub fn linked_stations(&self) -> Vec<String> {
        let mut v: Vec<String> = lock_links(&self.links).keys().cloned().collect();
        v.sort();
        v
    }

    /// Close if still open, then wait up to `wait` for the writer to put every queued
    /// frame on the wire. Returns `false` if the writer was still busy when time ran out.
    ///
    /// [`Outbound::close`] only queues the unregister frame; a caller about to exit
    /// the process awaits this so the last disconnects are not lost.
    pub async fn finish(&self, wait: Duration) -> bool {
        if let Err(e) = Outbound::close(self) {
            debug!("close before flush: {}", e);
        }
        let handle = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(handle) = handle else {
            return true;
        };
        match tokio::time::timeout(wait, handle).await {
            Ok(_) => {
                debug!("AGWPE writer flushed");
                true
            }
            Err(_) => {
                warn!("AGWPE writer still busy after {:?}, abandoning queued frames", wait);
                false
            }
        }
    }

    fn link_for(&self, station: &str) -> Result<Link, TransportError> {
        lock_links(&self.links)
            .get(station)
            .cloned()
            .ok_or_else(|| TransportError::UnknownLink(escape_log(station)))
    }

    fn queue(&self, frame: &AgwpeFrame) -> Result<(), TransportError> {
        let bytes = frame.encode()?;
        trace!("AGWPE -> {:?} {}", frame.kind, hex_preview(&bytes, 48));
        self.writer_tx
            .send(bytes)
            .map_err(|_| TransportError::Closed)?;
        metrics::inc_frames_out();
        Ok(())
    }
}

impl Outbound for AgwpeClient {
    fn send_bytes(&self, station: &str, data: &[u8]) -> bool {
        if self.is_closed() {
            return false;
        }
        let link = match self.link_for(station) {
            Ok(link) => link,
            Err(e) => {
                debug!("send dropped: {}", e);
                return false;
            }
        };
        for chunk in data.chunks(MAX_DATA_CHUNK) {
            let frame = AgwpeFrame::data(link.port, &link.local, &link.remote, chunk);
            if let Err(e) = self.queue(&frame) {
                warn!("send to {} failed: {}", escape_log(station), e);
                return false;
            }
        }
        true
    }

    fn disconnect(&self, station: &str) -> Result<(), TransportError> {
        let link = lock_links(&self.links).remove(station);
        match link {
            Some(link) if !self.is_closed() => {
                debug!("disconnecting {}", escape_log(station));
                self.queue(&AgwpeFrame::disconnect(link.port, &link.local, &link.remote))
            }
            _ => Ok(()),
        }
    }

    fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let mut unregister = AgwpeFrame::unregister(&self.mycall);
        unregister.port = self.radio_port;
        let result = if self.link_down.load(Ordering::SeqCst) {
            Ok(())
        } else {
            self.queue(&unregister)
        };
        let _ = self.reader_stop.send(true);
        let _ = self.writer_stop.send(true);
        info!("AGWPE connection released");
        result
    }
}

impl Interrupt for AgwpeClient {
    fn interrupt(&self) {
        let _ = self.reader_stop.send(true);
    }
}

async fn writer_task(
    mut wr: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            msg = rx.recv() => match msg {
                Some(bytes) => {
                    if let Err(e) = wr.write_all(&bytes).await {
                        error!("AGWPE write failed: {}", e);
                        break;
                    }
                }
                None => break,
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    // Flush what was queued before the signal (e.g. the unregister frame).
                    while let Ok(bytes) = rx.try_recv() {
                        if wr.write_all(&bytes).await.is_err() {
                            break;
                        }
                    }
                    break;
                }
            }
        }
    }
    let _ = wr.shutdown().await;
    debug!("AGWPE writer task exiting");
}

struct Reader {
    links: LinkTable,
    events: mpsc::UnboundedSender<AgwpeEvent>,
    ready: Option<oneshot::Sender<()>>,
    link_down: Arc<AtomicBool>,
}

impl Reader {
    async fn run(mut self, mut rd: OwnedReadHalf, mut stop: watch::Receiver<bool>) {
        let mut decoder = FrameDecoder::new();
        let mut buf = vec![0u8; 4096];
        loop {
            tokio::select! {
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        debug!("AGWPE reader interrupted");
                        return;
                    }
                }
                read = rd.read(&mut buf) => match read {
                    Ok(0) => {
                        warn!("AGWPE engine closed the connection");
                        break;
                    }
                    Ok(n) => {
                        decoder.push(&buf[..n]);
                        loop {
                            match decoder.next_frame() {
                                Ok(Some(frame)) => {
                                    metrics::inc_frames_in();
                                    self.handle(frame);
                                }
                                Ok(None) => break,
                                Err(e) => {
                                    metrics::inc_frame_resyncs();
                                    warn!("AGWPE stream resync: {}", e);
                                }
                            }
                        }
                    }
                    Err(e) => {
                        error!("AGWPE read failed: {}", e);
                        break;
                    }
                }
            }
        }
        self.link_down.store(true, Ordering::SeqCst);
        lock_links(&self.links).clear();
        // Dropping `events` here closes the channel and tells the main loop.
    }

    fn emit(&self, event: AgwpeEvent) {
        if self.events.send(event).is_err() {
            debug!("AGWPE event dropped, receiver gone");
        }
    }

    fn handle(&mut self, frame: AgwpeFrame) {
        trace!(
            "AGWPE <- {:?} port={} {}->{} {} bytes",
            frame.kind,
            frame.port,
            escape_log(&frame.call_from),
            escape_log(&frame.call_to),
            frame.data.len()
        );
        match frame.kind {
            FrameKind::Version => {
                if frame.data.len() >= 8 {
                    let major = u32::from_le_bytes([frame.data[0], frame.data[1], frame.data[2], frame.data[3]]);
                    let minor = u32::from_le_bytes([frame.data[4], frame.data[5], frame.data[6], frame.data[7]]);
                    info!("AGWPE engine version {}.{}", major, minor);
                }
                if let Some(tx) = self.ready.take() {
                    let _ = tx.send(());
                }
                self.emit(AgwpeEvent::EngineReady);
            }
            FrameKind::Register => {
                let success = frame.data.first() == Some(&1);
                self.emit(AgwpeEvent::CallsignRegistered {
                    callsign: frame.call_from,
                    success,
                });
            }
            FrameKind::Connected => {
                let text = frame.data_text();
                if text.contains("CONNECTED To") {
                    info!(
                        "outgoing link {} -> {} established, not handled",
                        escape_log(&frame.call_from),
                        escape_log(&frame.call_to)
                    );
                    return;
                }
                let link = Link {
                    port: frame.port,
                    remote: frame.call_from.clone(),
                    local: frame.call_to.clone(),
                };
                lock_links(&self.links).insert(frame.call_from.clone(), link);
                self.emit(AgwpeEvent::IncomingConnection {
                    port: frame.port,
                    remote: frame.call_from,
                    local: frame.call_to,
                });
            }
            FrameKind::ConnectedData => {
                self.emit(AgwpeEvent::Data {
                    port: frame.port,
                    remote: frame.call_from,
                    local: frame.call_to,
                    data: frame.data,
                });
            }
            FrameKind::Disconnect => {
                lock_links(&self.links).remove(&frame.call_from);
                self.emit(AgwpeEvent::Disconnected {
                    port: frame.port,
                    remote: frame.call_from,
                    local: frame.call_to,
                });
            }
            FrameKind::PortInfo => debug!("AGWPE port info: {}", escape_log(&frame.data_text())),
            other => debug!("ignoring AGWPE frame {:?}", other),
        }
    }
}
