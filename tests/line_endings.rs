//! Lines typed by a station reach the chat regardless of terminal line endings or
//! how the radio link fragments them.
mod common;

use common::server_with;

#[test]
fn three_endings_three_messages() {
    let (bbs, _out) = server_with(50);
    bbs.on_connect("K6TU");

    bbs.on_data("K6TU", b"A\n");
    bbs.on_data("K6TU", b"B\r\n");
    bbs.on_data("K6TU", b"C\r");

    let texts: Vec<String> = bbs.store().recent().into_iter().map(|m| m.text).collect();
    assert_eq!(texts, vec!["A", "B", "C"]);
}

#[test]
fn mixed_terminators_yield_one_message_per_line() {
    let (bbs, _out) = server_with(50);
    bbs.on_connect("K6TU");

    bbs.on_data("K6TU", b"one\rtwo\nthree\r\nfour\r");

    let texts: Vec<String> = bbs.store().recent().into_iter().map(|m| m.text).collect();
    assert_eq!(texts, vec!["one", "two", "three", "four"]);
}

#[test]
fn line_split_across_frames_is_reassembled() {
    let (bbs, _out) = server_with(50);
    bbs.on_connect("K6TU");

    bbs.on_data("K6TU", b"hel");
    assert!(bbs.store().is_empty());
    bbs.on_data("K6TU", b"lo wor");
    bbs.on_data("K6TU", b"ld\r");
    bbs.on_data("K6TU", b"\n");

    let recent = bbs.store().recent();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].text, "hello world");
    assert_eq!(recent[0].sender, "K6TU");
}

#[test]
fn blank_and_whitespace_lines_are_not_posted() {
    let (bbs, out) = server_with(50);
    bbs.on_connect("K6TU");
    out.clear();

    bbs.on_data("K6TU", b"\r\n\r\n   \r\t\n");

    assert!(bbs.store().is_empty());
    assert_eq!(out.text_for("K6TU"), "");
}

#[test]
fn each_station_has_its_own_partial_line() {
    let (bbs, _out) = server_with(50);
    bbs.on_connect("K6TU");
    bbs.on_connect("W1ABC-1");

    bbs.on_data("K6TU", b"from k6");
    bbs.on_data("W1ABC-1", b"from w1\r");
    bbs.on_data("K6TU", b"tu\r");

    let recent = bbs.store().recent();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].sender, "W1ABC-1");
    assert_eq!(recent[0].text, "from w1");
    assert_eq!(recent[1].sender, "K6TU");
    assert_eq!(recent[1].text, "from k6tu");
}

#[test]
fn latin1_bytes_survive_decoding() {
    let (bbs, _out) = server_with(50);
    bbs.on_connect("K6TU");

    bbs.on_data("K6TU", &[b'c', b'a', b'f', 0xE9, b'\r']);

    assert_eq!(bbs.store().recent()[0].text, "caf\u{e9}");
}

#[test]
fn data_from_unconnected_station_is_dropped() {
    let (bbs, out) = server_with(50);
    bbs.on_connect("K6TU");
    out.clear();

    bbs.on_data("N0BODY", b"hello\r");

    assert!(bbs.store().is_empty());
    assert_eq!(out.text_for("K6TU"), "");
}
