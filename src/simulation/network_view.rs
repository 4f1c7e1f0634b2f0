//! Operator-side picture of the network, assembled from published telemetry.

use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Write;

/// Seconds without a report (or a mention as someone's child) before a node is forgotten.
pub const NODE_TIMEOUT_SECS: i64 = 10;
/// Most recent pong replies kept for display.
pub const MAX_PONGS: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewNode {
    /// `None` for nodes only known from another node's child list.
    pub hops: Option<u64>,
    pub parent: Option<String>,
    pub is_root: bool,
    pub last_seen: DateTime<Utc>,
}

impl ViewNode {
    fn placeholder(now: DateTime<Utc>) -> Self {
        Self {
            hops: None,
            parent: None,
            is_root: false,
            last_seen: now,
        }
    }
}

/// What a published message turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ingested {
    Report(String),
    Pong(String),
    /// JSON lacking one of `mac`, `parent`, `hops`, `children`.
    Incomplete,
    Invalid,
}

#[derive(Debug, Default)]
pub struct NetworkView {
    nodes: BTreeMap<String, ViewNode>,
    pongs: Vec<(String, DateTime<Utc>)>,
}

fn as_text(value: &Value) -> String {
    value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string())
}

impl NetworkView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, mac: &str) -> Option<&ViewNode> {
        self.nodes.get(mac)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn pongs(&self) -> &[(String, DateTime<Utc>)] {
        &self.pongs
    }

    /// Folds one message from the info topic into the view.
    pub fn ingest(&mut self, payload: &[u8], now: DateTime<Utc>) -> Ingested {
        let Ok(Value::Object(doc)) = serde_json::from_slice::<Value>(payload) else {
            return Ingested::Invalid;
        };

        if doc.get("type").and_then(Value::as_str) == Some("pong") {
            let mac = doc.get("mac").map(as_text).unwrap_or_default();
            if self.pongs.len() == MAX_PONGS {
                self.pongs.remove(0);
            }
            self.pongs.push((mac.clone(), now));
            return Ingested::Pong(mac);
        }

        let (Some(mac), Some(parent), Some(hops), Some(children)) =
            (doc.get("mac"), doc.get("parent"), doc.get("hops"), doc.get("children"))
        else {
            return Ingested::Incomplete;
        };

        let mac = as_text(mac);
        // older firmware sent the root's parent as the string "null"
        let parent = match parent {
            Value::Null => None,
            Value::String(p) if p == "null" => None,
            other => Some(as_text(other)),
        };

        let node = self.nodes.entry(mac.clone()).or_insert_with(|| ViewNode::placeholder(now));
        node.hops = hops.as_u64();
        node.is_root = parent.is_none();
        node.parent = parent.clone();
        node.last_seen = now;

        if let Some(parent) = parent {
            self.nodes.entry(parent).or_insert_with(|| ViewNode::placeholder(now));
        }
        for child in children.as_array().into_iter().flatten() {
            let child = as_text(child);
            let entry = self.nodes.entry(child).or_insert_with(|| ViewNode::placeholder(now));
            entry.last_seen = now;
            if entry.parent.is_none() && !entry.is_root {
                entry.parent = Some(mac.clone());
            }
        }

        Ingested::Report(mac)
    }

    /// Drops nodes unseen for longer than [`NODE_TIMEOUT_SECS`]; returns their addresses.
    pub fn prune(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let timeout = TimeDelta::seconds(NODE_TIMEOUT_SECS);
        let stale: Vec<String> = self
            .nodes
            .iter()
            .filter(|(_, node)| now - node.last_seen > timeout)
            .map(|(mac, _)| mac.clone())
            .collect();
        for mac in &stale {
            self.nodes.remove(mac);
        }
        stale
    }

    /// Indented tree, roots first. Nodes whose parent is unknown start their own branch.
    pub fn render_tree(&self) -> String {
        let mut out = String::new();
        let mut tops: Vec<&String> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.parent.as_ref().is_none_or(|p| !self.nodes.contains_key(p)))
            .map(|(mac, _)| mac)
            .collect();
        tops.sort_by_key(|mac| (!self.nodes[*mac].is_root, self.nodes[*mac].hops.unwrap_or(u64::MAX)));
        for mac in tops {
            self.render_branch(&mut out, mac, 0);
        }
        out
    }

    fn render_branch(&self, out: &mut String, mac: &str, depth: usize) {
        // cycles can only come from inconsistent reports; cap the depth
        if depth > self.nodes.len() {
            return;
        }
        let node = &self.nodes[mac];
        let role = if node.is_root { "ROOT" } else { "CHILD" };
        let hops = node.hops.map_or("?".to_string(), |h| h.to_string());
        let _ = writeln!(out, "{}{} {} (hop {})", "  ".repeat(depth), mac, role, hops);
        for (child, _) in self.nodes.iter().filter(|(_, n)| n.parent.as_deref() == Some(mac)) {
            self.render_branch(out, child, depth + 1);
        }
    }
}
