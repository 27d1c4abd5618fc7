//! Test utilities & fixtures.
//! A recording stand-in for the AGWPE engine plus helpers to build a server around it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use ax25bbs::agwpe::{Outbound, TransportError};
use ax25bbs::bbs::message_store::{CountBound, MessageStore};
use ax25bbs::bbs::BbsServer;

/// Records everything the BBS hands to the engine.
#[derive(Default)]
pub struct MockOutbound {
    sent: Mutex<HashMap<String, Vec<u8>>>,
    writes: Mutex<Vec<String>>,
    disconnects: Mutex<Vec<String>>,
    closes: Mutex<usize>,
    unlinked: Mutex<HashSet<String>>,
}

#[allow(dead_code)]
impl MockOutbound {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make sends to `station` fail as if its link had gone.
    pub fn drop_link(&self, station: &str) {
        self.unlinked.lock().unwrap().insert(station.to_string());
    }

    /// Everything sent to `station`, decoded as latin-1.
    pub fn text_for(&self, station: &str) -> String {
        self.sent
            .lock()
            .unwrap()
            .get(station)
            .map(|b| b.iter().map(|&c| c as char).collect())
            .unwrap_or_default()
    }

    /// Stations in the order each `send_bytes` call arrived.
    pub fn write_log(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
        self.writes.lock().unwrap().clear();
    }

    pub fn disconnects(&self) -> Vec<String> {
        self.disconnects.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        *self.closes.lock().unwrap()
    }
}

impl Outbound for MockOutbound {
    fn send_bytes(&self, station: &str, data: &[u8]) -> bool {
        if self.unlinked.lock().unwrap().contains(station) {
            return false;
        }
        self.sent
            .lock()
            .unwrap()
            .entry(station.to_string())
            .or_default()
            .extend_from_slice(data);
        self.writes.lock().unwrap().push(station.to_string());
        true
    }

    fn disconnect(&self, station: &str) -> Result<(), TransportError> {
        self.disconnects.lock().unwrap().push(station.to_string());
        Ok(())
    }

    fn close(&self) -> Result<(), TransportError> {
        *self.closes.lock().unwrap() += 1;
        Ok(())
    }
}

/// A `W2ASM-10` server with a count-bounded store.
#[allow(dead_code)]
pub fn server_with(capacity: usize) -> (Arc<BbsServer>, Arc<MockOutbound>) {
    let outbound = MockOutbound::new();
    let server = BbsServer::new(
        "W2ASM-10",
        "Test BBS",
        MessageStore::new(CountBound::new(capacity)),
        outbound.clone(),
    );
    (Arc::new(server), outbound)
}
