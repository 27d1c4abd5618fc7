//! Process-wide counters for the BBS and its AGWPE link.
//! Logged on shutdown and printed by the `probe` subcommand.
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

static SESSIONS_OPENED: AtomicU64 = AtomicU64::new(0);
static SESSIONS_CLOSED: AtomicU64 = AtomicU64::new(0);
static SESSIONS_REPLACED: AtomicU64 = AtomicU64::new(0);
static LINES_RECEIVED: AtomicU64 = AtomicU64::new(0);
static LINES_OVERFLOWED: AtomicU64 = AtomicU64::new(0);
static MESSAGES_POSTED: AtomicU64 = AtomicU64::new(0);
static BROADCAST_DELIVERIES: AtomicU64 = AtomicU64::new(0);
static BROADCAST_SKIPPED: AtomicU64 = AtomicU64::new(0);
static FRAMES_IN: AtomicU64 = AtomicU64::new(0);
static FRAMES_OUT: AtomicU64 = AtomicU64::new(0);
static FRAME_RESYNCS: AtomicU64 = AtomicU64::new(0);
static UNKNOWN_STATION_DATA: AtomicU64 = AtomicU64::new(0);

pub fn inc_sessions_opened() {
    SESSIONS_OPENED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_sessions_closed() {
    SESSIONS_CLOSED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_sessions_replaced() {
    SESSIONS_REPLACED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_lines_received() {
    LINES_RECEIVED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_lines_overflowed() {
    LINES_OVERFLOWED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_messages_posted() {
    MESSAGES_POSTED.fetch_add(1, Ordering::Relaxed);
}
pub fn add_broadcast_deliveries(n: u64) {
    BROADCAST_DELIVERIES.fetch_add(n, Ordering::Relaxed);
}
pub fn add_broadcast_skipped(n: u64) {
    BROADCAST_SKIPPED.fetch_add(n, Ordering::Relaxed);
}
pub fn inc_frames_in() {
    FRAMES_IN.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_frames_out() {
    FRAMES_OUT.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_frame_resyncs() {
    FRAME_RESYNCS.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_unknown_station_data() {
    UNKNOWN_STATION_DATA.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone, Serialize, PartialEq, Eq)]
pub struct Snapshot {
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub sessions_replaced: u64,
    pub lines_received: u64,
    pub lines_overflowed: u64,
    pub messages_posted: u64,
    pub broadcast_deliveries: u64,
    pub broadcast_skipped: u64,
    pub frames_in: u64,
    pub frames_out: u64,
    pub frame_resyncs: u64,
    pub unknown_station_data: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        sessions_opened: SESSIONS_OPENED.load(Ordering::Relaxed),
        sessions_closed: SESSIONS_CLOSED.load(Ordering::Relaxed),
        sessions_replaced: SESSIONS_REPLACED.load(Ordering::Relaxed),
        lines_received: LINES_RECEIVED.load(Ordering::Relaxed),
        lines_overflowed: LINES_OVERFLOWED.load(Ordering::Relaxed),
        messages_posted: MESSAGES_POSTED.load(Ordering::Relaxed),
        broadcast_deliveries: BROADCAST_DELIVERIES.load(Ordering::Relaxed),
        broadcast_skipped: BROADCAST_SKIPPED.load(Ordering::Relaxed),
        frames_in: FRAMES_IN.load(Ordering::Relaxed),
        frames_out: FRAMES_OUT.load(Ordering::Relaxed),
        frame_resyncs: FRAME_RESYNCS.load(Ordering::Relaxed),
        unknown_station_data: UNKNOWN_STATION_DATA.load(Ordering::Relaxed),
    }
}
