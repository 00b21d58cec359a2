//! Unit tests for the bounded per-process log ring.

use agent_conductor::models::process::{LogChannel, LogEntry};
use agent_conductor::procs::log_ring::LogRing;

fn entry(content: &str) -> LogEntry {
    LogEntry::new(LogChannel::Stdout, content.to_owned())
}

fn contents(ring: &LogRing) -> Vec<String> {
    ring.to_vec().into_iter().map(|e| e.content).collect()
}

#[test]
fn retains_entries_in_arrival_order() {
    let mut ring = LogRing::new(10);
    ring.push(entry("a"));
    ring.push(entry("b"));
    ring.push(entry("c"));

    assert_eq!(contents(&ring), vec!["a", "b", "c"]);
    assert_eq!(ring.len(), 3);
}

#[test]
fn evicts_oldest_when_full() {
    let mut ring = LogRing::new(3);
    for content in ["a", "b", "c", "d", "e"] {
        ring.push(entry(content));
    }

    assert_eq!(contents(&ring), vec!["c", "d", "e"]);
    assert_eq!(ring.len(), 3);
}

#[test]
fn never_exceeds_capacity() {
    let mut ring = LogRing::new(2);
    for i in 0..100 {
        ring.push(entry(&format!("line-{i}")));
        assert!(ring.len() <= 2);
    }

    assert_eq!(contents(&ring), vec!["line-98", "line-99"]);
}

#[test]
fn capacity_one_keeps_only_latest() {
    let mut ring = LogRing::new(1);
    ring.push(entry("first"));
    ring.push(entry("second"));

    assert_eq!(contents(&ring), vec!["second"]);
}

#[test]
fn preserves_channel_attribution() {
    let mut ring = LogRing::new(4);
    ring.push(LogEntry::new(LogChannel::Stdout, "out".to_owned()));
    ring.push(LogEntry::new(LogChannel::Stderr, "err".to_owned()));

    let entries = ring.to_vec();
    assert_eq!(entries[0].channel, LogChannel::Stdout);
    assert_eq!(entries[1].channel, LogChannel::Stderr);
}

#[test]
fn clear_empties_the_ring() {
    let mut ring = LogRing::new(3);
    ring.push(entry("a"));
    assert!(!ring.is_empty());

    ring.clear();
    assert!(ring.is_empty());
    assert_eq!(ring.capacity(), 3);
}
