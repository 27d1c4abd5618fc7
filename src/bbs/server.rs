use anyhow::{anyhow, Result};
use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

use super::message_store::{Message, MessageStore};
use super::session::Session;
use crate::agwpe::{AgwpeEvent, ConnectionHandler, Outbound};
use crate::config::Config;
use crate::logutil::{escape_log, hex_preview};
use crate::metrics;

/// # BBS Server - Session Registry
///
/// The `BbsServer` owns every [`Session`] and the shared [`MessageStore`]. The AGWPE
/// engine reports link events through [`ConnectionHandler`]; the server turns inbound
/// lines into stored messages and fans them out to every active station.
///
/// ```text
/// ┌─────────────────┐  events   ┌─────────────────┐   add    ┌─────────────────┐
/// │  AGWPE engine   │──────────→│   BbsServer     │─────────→│  MessageStore   │
/// └─────────────────┘           └─────────────────┘          └─────────────────┘
///          ↑                        │ broadcast
///          │ send_bytes / disconnect↓
///          └──────────────── Session (one per station)
/// ```
///
/// ## Wire text
///
/// - Banner: `\r\nWelcome to <CALL> <name>\r\n`
/// - History (only when non-empty): `---\r\n`, then `\r\n<message>` per entry, then `\r\n`
/// - Prompt: `\r\n<STATION>> ` (the connecting station's own callsign)
/// - Broadcast: `\r\n<message>\r\n` followed by the recipient's prompt
///
/// ## Thread Safety
///
/// The session map sits behind a mutex held only for structural changes and for
/// taking snapshots. Sends happen outside the lock on `Arc<Session>` clones, so a
/// disconnect racing a broadcast can't disturb the iteration.
pub struct BbsServer {
    callsign: String,
    name: String,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    store: MessageStore,
    outbound: Arc<dyn Outbound>,
    shut_down: AtomicBool,
}

impl BbsServer {
    pub fn new(
        callsign: impl Into<String>,
        name: impl Into<String>,
        store: MessageStore,
        outbound: Arc<dyn Outbound>,
    ) -> Self {
        Self {
            callsign: callsign.into().to_ascii_uppercase(),
            name: name.into(),
            sessions: Mutex::new(HashMap::new()),
            store,
            outbound,
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &Config, outbound: Arc<dyn Outbound>) -> Self {
        Self::new(
            config.station.callsign.clone(),
            config.station.name.clone(),
            config.messages.build_store(),
            outbound,
        )
    }

    pub fn callsign(&self) -> &str {
        &self.callsign
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn session(&self, station: &str) -> Option<Arc<Session>> {
        self.lock_sessions().get(station).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.lock_sessions().len()
    }

    pub fn stations(&self) -> Vec<String> {
        let mut list: Vec<String> = self.lock_sessions().keys().cloned().collect();
        list.sort();
        list
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn prompt_for(station: &str) -> String {
        format!("\r\n{}> ", station)
    }

    fn welcome_text(&self) -> String {
        format!("\r\nWelcome to {} {}\r\n", self.callsign, self.name)
    }

    fn history_text(history: &[Message]) -> Option<String> {
        if history.is_empty() {
            return None;
        }
        let mut block = String::from("---\r\n");
        for msg in history {
            block.push_str("\r\n");
            block.push_str(&msg.to_string());
        }
        block.push_str("\r\n");
        Some(block)
    }

    /// Register a newly connected station and greet it.
    ///
    /// A second connect for a station already in the map replaces the old session;
    /// the old one is retired without a disconnect.
    pub fn on_connect(&self, station: &str) -> Arc<Session> {
        let station = station.trim().to_ascii_uppercase();
        let session = Arc::new(
            Session::new(station.clone(), self.outbound.clone()).with_close_hook(Box::new(
                |s: &Session| {
                    metrics::inc_sessions_closed();
                    info!("{} disconnected", escape_log(s.station()));
                },
            )),
        );

        let previous = {
            let mut sessions = self.lock_sessions();
            if self.is_shut_down() {
                drop(sessions);
                warn!("connect from {} after shutdown, ignoring", escape_log(&station));
                session.retire();
                return session;
            }
            sessions.insert(station.clone(), session.clone())
        };
        if let Some(old) = previous {
            metrics::inc_sessions_replaced();
            old.retire();
            info!("{} reconnected, replacing previous session", escape_log(&station));
        } else {
            info!("{} connected", escape_log(&station));
        }
        metrics::inc_sessions_opened();

        // The session is visible to broadcast before its greeting is sent. No message
        // can slip in ahead of the banner only because pump_events dispatches one
        // engine event at a time; a concurrent dispatcher would need to greet first.
        let history = self.store.recent();
        let mut parts = vec![self.welcome_text()];
        if let Some(block) = Self::history_text(&history) {
            parts.push(block);
        }
        parts.push(Self::prompt_for(&station));
        let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
        if !session.send_all(&refs) {
            warn!("could not deliver greeting to {}", escape_log(&station));
        }
        session
    }

    /// Route inbound bytes to the station's decoder and post each completed line.
    pub fn on_data(&self, station: &str, data: &[u8]) {
        let station = station.trim().to_ascii_uppercase();
        let Some(session) = self.session(&station) else {
            metrics::inc_unknown_station_data();
            warn!(
                "data from unknown station {} dropped ({} bytes)",
                escape_log(&station),
                data.len()
            );
            return;
        };
        log::trace!("{} <- {}", station, hex_preview(data, 32));
        for line in session.feed(data) {
            metrics::inc_lines_received();
            self.handle_chat_line(&station, &line);
        }
    }

    /// Remove the station and close its session. Unknown stations are ignored.
    pub fn on_disconnect(&self, station: &str) {
        let station = station.trim().to_ascii_uppercase();
        let removed = self.lock_sessions().remove(&station);
        match removed {
            Some(session) => {
                session.close();
            }
            None => debug!("disconnect for unknown station {}", escape_log(&station)),
        }
    }

    /// Drop a station from the server side.
    pub fn kick(&self, station: &str) -> bool {
        let station = station.trim().to_ascii_uppercase();
        let removed = self.lock_sessions().remove(&station);
        match removed {
            Some(session) => {
                info!("kicking {}", escape_log(&station));
                session.close()
            }
            None => false,
        }
    }

    /// Store a line from `station` and broadcast it.
    pub fn handle_chat_line(&self, station: &str, text: &str) -> Message {
        let message = self.store.add(station, text);
        metrics::inc_messages_posted();
        info!("{}", escape_log(&message.to_string()));
        self.broadcast(&message);
        message
    }

    /// Deliver `message` followed by each recipient's own prompt. Returns the number
    /// of sessions that accepted it.
    pub fn broadcast(&self, message: &Message) -> usize {
        let recipients: Vec<Arc<Session>> = self
            .lock_sessions()
            .values()
            .filter(|s| s.is_active())
            .cloned()
            .collect();

        let body = format!("\r\n{}\r\n", message);
        let mut delivered = 0usize;
        let mut skipped = 0usize;
        for session in recipients {
            let prompt = Self::prompt_for(session.station());
            if session.send_all(&[&body, &prompt]) {
                delivered += 1;
            } else {
                skipped += 1;
                debug!("broadcast to {} skipped", session.station());
            }
        }
        metrics::add_broadcast_deliveries(delivered as u64);
        metrics::add_broadcast_skipped(skipped as u64);
        delivered
    }

    /// Close every session and release the engine. Safe to call more than once.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            debug!("registry already shut down");
            return;
        }
        let drained: Vec<(String, Arc<Session>)> = self.lock_sessions().drain().collect();
        info!("shutting down BBS, closing {} session(s)", drained.len());
        // Session::close logs its own link errors, so one bad link never stops the rest.
        for (station, session) in drained {
            if !session.close() {
                debug!("{} was already closed", escape_log(&station));
            }
        }
        if let Err(e) = self.outbound.close() {
            warn!("engine close failed: {}", e);
        }
        let snap = metrics::snapshot();
        info!(
            "session totals: opened={} closed={} lines={} messages={} delivered={} skipped={} unknown={}",
            snap.sessions_opened,
            snap.sessions_closed,
            snap.lines_received,
            snap.messages_posted,
            snap.broadcast_deliveries,
            snap.broadcast_skipped,
            snap.unknown_station_data
        );
    }

    /// Apply engine events in order until the channel closes.
    ///
    /// Returns an error when the engine side goes away, since the BBS can no longer
    /// reach any station.
    pub async fn pump_events(&self, events: &mut mpsc::UnboundedReceiver<AgwpeEvent>) -> Result<()> {
        while let Some(event) = events.recv().await {
            event.dispatch(self);
        }
        Err(anyhow!("AGWPE event stream closed"))
    }
}

impl ConnectionHandler for BbsServer {
    fn on_incoming_connection(&self, port: u8, remote: &str, local: &str) {
        if !local.eq_ignore_ascii_case(&self.callsign) {
            debug!(
                "ignoring connection from {} to {} on port {}",
                escape_log(remote),
                escape_log(local),
                port
            );
            return;
        }
        self.on_connect(remote);
    }

    fn on_data(&self, _port: u8, remote: &str, _local: &str, data: &[u8]) {
        BbsServer::on_data(self, remote, data);
    }

    fn on_disconnected(&self, _port: u8, remote: &str, _local: &str) {
        self.on_disconnect(remote);
    }

    fn on_callsign_registered(&self, callsign: &str, success: bool) {
        if success {
            info!("callsign {} registered with AGWPE", escape_log(callsign));
        } else {
            error!("AGWPE refused registration of {}", escape_log(callsign));
        }
    }

    fn on_engine_ready(&self) {
        debug!("AGWPE engine ready");
    }
}
