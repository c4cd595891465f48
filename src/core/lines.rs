//! Line grammars for the `online` and `watch` response bodies.
//!
//! Each grammar is split into a pure per-line parser returning a tagged
//! variant and a body-level collector that applies namespace stripping.
//! Malformed watch lines never fail the call; they are skipped, logged
//! and handed back so callers can inspect them.
use crate::core::namespace::Namespace;
use crate::core::request::is_position;
use regex::Regex;
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::HashMap;
use std::sync::LazyLock;

static WATCH_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\w+)\s+([^:]+):(\S+)\s*$").expect("watch line pattern")
});

#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize)]
pub struct OnlineRecord {
    pub id: String,
    pub counter: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParsedOnlineLine<'a> {
    Record { wire_id: &'a str, counter: &'a str },
    Skip,
}

pub fn parse_online_line(line: &str) -> ParsedOnlineLine<'_> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (wire_id, counter) = line.split_once(' ').unwrap_or((line, ""));
    if wire_id.is_empty() {
        return ParsedOnlineLine::Skip;
    }
    ParsedOnlineLine::Record {
        wire_id,
        counter: counter.trim(),
    }
}

/// Online ids with their connection counters, in broker order.
///
/// A repeated id keeps its first position and takes the latest counter.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct OnlineCounts {
    records: Vec<OnlineRecord>,
    index: HashMap<String, usize>,
}

impl OnlineCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, counter: impl Into<String>) {
        let id = id.into();
        let counter = counter.into();
        if let Some(&slot) = self.index.get(&id) {
            self.records[slot].counter = counter;
            return;
        }
        self.index.insert(id.clone(), self.records.len());
        self.records.push(OnlineRecord { id, counter });
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.index
            .get(id)
            .map(|&slot| self.records[slot].counter.as_str())
    }

    pub fn iter(&self) -> std::slice::Iter<'_, OnlineRecord> {
        self.records.iter()
    }

    pub fn ids(&self) -> Vec<String> {
        self.records.iter().map(|record| record.id.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn into_vec(self) -> Vec<OnlineRecord> {
        self.records
    }
}

impl Serialize for OnlineCounts {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.records.len()))?;
        for record in &self.records {
            map.serialize_entry(&record.id, &record.counter)?;
        }
        map.end()
    }
}

pub fn parse_online_body(body: &str, namespace: &Namespace) -> OnlineCounts {
    let mut counts = OnlineCounts::new();
    for line in body.split('\n') {
        if let ParsedOnlineLine::Record { wire_id, counter } = parse_online_line(line) {
            counts.insert(namespace.unqualify(wire_id), counter);
        }
    }
    counts
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Serialize)]
pub struct WatchEvent {
    pub event: String,
    pub pos: String,
    pub id: String,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ParsedWatchLine<'a> {
    Event {
        event: &'a str,
        pos: &'a str,
        wire_id: &'a str,
    },
    Blank,
    Malformed(&'a str),
}

pub fn parse_watch_line(line: &str) -> ParsedWatchLine<'_> {
    if line.trim().is_empty() {
        return ParsedWatchLine::Blank;
    }
    let Some(caps) = WATCH_LINE.captures(line) else {
        return ParsedWatchLine::Malformed(line);
    };
    match (caps.get(1), caps.get(2), caps.get(3)) {
        (Some(event), Some(pos), Some(wire_id)) => ParsedWatchLine::Event {
            event: event.as_str(),
            pos: pos.as_str(),
            wire_id: wire_id.as_str(),
        },
        _ => ParsedWatchLine::Malformed(line),
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct WatchBatch {
    pub events: Vec<WatchEvent>,
    pub malformed: Vec<String>,
}

pub fn parse_watch_body(body: &str, namespace: &Namespace) -> WatchBatch {
    let mut batch = WatchBatch::default();
    for line in body.split('\n') {
        match parse_watch_line(line) {
            ParsedWatchLine::Event {
                event,
                pos,
                wire_id,
            } => {
                // Positions are numeric on the wire; anything else was namespaced.
                let pos = if is_position(pos) {
                    pos
                } else {
                    namespace.unqualify(pos)
                };
                batch.events.push(WatchEvent {
                    event: event.to_string(),
                    pos: pos.to_string(),
                    id: namespace.unqualify(wire_id).to_string(),
                });
            }
            ParsedWatchLine::Blank => {}
            ParsedWatchLine::Malformed(raw) => {
                tracing::warn!(line = raw, "cannot parse watch event");
                batch.malformed.push(raw.to_string());
            }
        }
    }
    batch
}
