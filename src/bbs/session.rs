use chrono::{DateTime, Utc};
use log::{debug, warn};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use super::decoder::{encode_latin1, LineDecoder, LineEvent};
use crate::agwpe::Outbound;
use crate::logutil::escape_log;

/// Called once when a session leaves `Active` through [`Session::close`].
pub type CloseHook = Box<dyn Fn(&Session) + Send + Sync>;

/// # Station Session
///
/// Server-side state for one connected station: its callsign, a [`LineDecoder`] for
/// the inbound byte stream, and a handle to the engine used to reply.
///
/// ## Lifecycle
///
/// ```text
/// Active --close()--> Closing --(outbound disconnect)--> Closed
/// Active --retire()--> Closed
/// ```
///
/// The engine only reports a connection once the AX.25 link is up, so sessions start
/// `Active`. Sends on anything but an active session return `false`.
pub struct Session {
    station: String,
    state: Mutex<SessionState>,
    decoder: Mutex<LineDecoder>,
    outbound: Arc<dyn Outbound>,
    on_close: Option<CloseHook>,
    connected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Closing,
    Closed,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("station", &self.station)
            .field("state", &self.state())
            .field("connected_at", &self.connected_at)
            .finish()
    }
}

impl Session {
    pub fn new(station: impl Into<String>, outbound: Arc<dyn Outbound>) -> Self {
        Session {
            station: station.into(),
            state: Mutex::new(SessionState::Active),
            decoder: Mutex::new(LineDecoder::new()),
            outbound,
            on_close: None,
            connected_at: Utc::now(),
        }
    }

    pub fn with_close_hook(mut self, hook: CloseHook) -> Self {
        self.on_close = Some(hook);
        self
    }

    pub fn station(&self) -> &str {
        &self.station
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn state(&self) -> SessionState {
        *self.lock_state()
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Active
    }

    /// Send text to the station. Returns `false` if the session is no longer active
    /// or the engine refused the data.
    pub fn send(&self, text: &str) -> bool {
        self.send_all(&[text])
    }

    /// Send several pieces as one unit. The state lock is held for the whole write so
    /// nothing else sent to this station can land between the pieces.
    pub fn send_all(&self, parts: &[&str]) -> bool {
        let state = self.lock_state();
        if *state != SessionState::Active {
            return false;
        }
        let mut payload = Vec::new();
        for part in parts {
            payload.extend(encode_latin1(part));
        }
        let ok = self.outbound.send_bytes(&self.station, &payload);
        if !ok {
            debug!("send to {} refused by engine ({} bytes)", self.station, payload.len());
        }
        ok
    }

    /// Feed raw bytes from the link; returns the lines they completed.
    pub fn feed(&self, data: &[u8]) -> Vec<String> {
        let events = self
            .decoder
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .feed(data);
        let mut lines = Vec::with_capacity(events.len());
        for event in events {
            match event {
                LineEvent::Line(line) => lines.push(line),
                LineEvent::Overflow { discarded } => {
                    crate::metrics::inc_lines_overflowed();
                    warn!(
                        "{}: dropped an oversized line ({} bytes)",
                        escape_log(&self.station),
                        discarded
                    );
                }
            }
        }
        lines
    }

    /// Deactivate, ask the engine to drop the link, and fire the close hook.
    ///
    /// Only the first call does anything; later calls return `false`.
    pub fn close(&self) -> bool {
        {
            let mut state = self.lock_state();
            if *state != SessionState::Active {
                return false;
            }
            *state = SessionState::Closing;
        }
        if let Err(e) = self.outbound.disconnect(&self.station) {
            warn!("disconnect of {} failed: {}", self.station, e);
        }
        *self.lock_state() = SessionState::Closed;
        if let Some(hook) = &self.on_close {
            hook(self);
        }
        true
    }

    /// Mark closed without touching the link or firing the hook. Used when a newer
    /// connection from the same station takes over.
    pub fn retire(&self) {
        *self.lock_state() = SessionState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agwpe::TransportError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(String, Vec<u8>)>>,
        disconnects: AtomicUsize,
    }

    impl Outbound for Recorder {
        fn send_bytes(&self, station: &str, data: &[u8]) -> bool {
            self.sent
                .lock()
                .unwrap()
                .push((station.to_string(), data.to_vec()));
            true
        }
        fn disconnect(&self, _station: &str) -> Result<(), TransportError> {
            self.disconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn close(&self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[test]
    fn send_all_writes_one_payload() {
        let rec = Arc::new(Recorder::default());
        let session = Session::new("K6TU-5", rec.clone());
        assert!(session.send_all(&["\r\nhi\r\n", "\r\nK6TU-5> "]));
        let sent = rec.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "K6TU-5");
        assert_eq!(sent[0].1, b"\r\nhi\r\n\r\nK6TU-5> ".to_vec());
    }

    #[test]
    fn close_is_idempotent_and_fires_hook_once() {
        let rec = Arc::new(Recorder::default());
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_hook = fired.clone();
        let session = Session::new("W1ABC", rec.clone()).with_close_hook(Box::new(move |_| {
            fired_hook.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(session.close());
        assert!(!session.close());
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(rec.disconnects.load(Ordering::SeqCst), 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!session.send("late"));
        assert!(rec.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn retire_is_silent() {
        let rec = Arc::new(Recorder::default());
        let session = Session::new("W1ABC", rec.clone());
        session.retire();
        assert!(!session.is_active());
        assert!(!session.close());
        assert_eq!(rec.disconnects.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn feed_preserves_line_order() {
        let rec = Arc::new(Recorder::default());
        let session = Session::new("W1ABC", rec);
        let mut got = session.feed(b"A\n");
        got.extend(session.feed(b"B\r\n"));
        got.extend(session.feed(b"C\r"));
        assert_eq!(got, vec!["A", "B", "C"]);
    }
}
