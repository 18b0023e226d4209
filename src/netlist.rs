// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Netlist store: typed node and transistor records plus the pin name map.
//!
//! The extracted die data comes as loosely typed arrays:
//!
//! ```text
//! node record       [nodeId, pull, layer, x1, y1, x2, y2, ...]
//! transistor record [transistorId, gateNodeId, c1NodeId, c2NodeId, ...geometry]
//! ```
//!
//! They are converted once, at load time, into [`NodeRecord`] and
//! [`TransistorRecord`]. Geometry is kept for renderers but never read by the
//! engine. A node may be described by several geometry records (one per
//! polygon); those are merged into a single [`NodeRecord`].

use compact_str::CompactString;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{Result, SimError};

/// Node identity fixed by the physical extraction.
pub type NodeId = usize;

/// Transistor identity fixed by the physical extraction.
pub type TransistorId = usize;

/// Static weak drive fabricated into a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pull {
    #[default]
    None,
    Up,
    Down,
}

impl FromStr for Pull {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "+" | "pullup" | "up" => Ok(Pull::Up),
            "v" | "pulldown" | "down" => Ok(Pull::Down),
            "-" | "" | "none" => Ok(Pull::None),
            _ => Err(format!("unknown pull attribute '{}', expected +, - or v", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    #[default]
    Normal,
    Ground,
    Power,
}

/// Reference to a node either by raw id or through the name map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeRef {
    Id(NodeId),
    Name(CompactString),
}

impl fmt::Display for NodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeRef::Id(id) => write!(f, "#{}", id),
            NodeRef::Name(name) => write!(f, "{}", name),
        }
    }
}

/// All-digit strings are ids, anything else is a name.
impl FromStr for NodeRef {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let digits = s.strip_prefix('#').unwrap_or(s);
        if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(id) = digits.parse() {
                return Ok(NodeRef::Id(id));
            }
        }
        Ok(NodeRef::Name(s.into()))
    }
}

impl From<NodeId> for NodeRef {
    fn from(id: NodeId) -> Self {
        NodeRef::Id(id)
    }
}

impl From<&str> for NodeRef {
    fn from(name: &str) -> Self {
        NodeRef::Name(name.into())
    }
}

impl From<String> for NodeRef {
    fn from(name: String) -> Self {
        NodeRef::Name(name.into())
    }
}

/// One polygon of a node's physical outline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub layer: u32,
    /// Flattened `x, y` pairs.
    pub coords: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: NodeId,
    pub pull: Pull,
    pub kind: NodeKind,
    pub segments: Vec<Segment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransistorRecord {
    pub id: TransistorId,
    pub gate: NodeId,
    pub c1: NodeId,
    pub c2: NodeId,
}

/// Parsed, strongly typed netlist. Not yet validated; see
/// [`crate::circuit::Circuit::build`].
#[derive(Debug, Clone, Default)]
pub struct Netlist {
    pub nodes: Vec<NodeRecord>,
    pub transistors: Vec<TransistorRecord>,
    /// Human-readable pin and bus names, in file order.
    pub names: IndexMap<CompactString, NodeId>,
}

/// On-disk JSON layout.
#[derive(Debug, Deserialize)]
struct NetlistFile {
    nodes: Vec<Vec<Value>>,
    transistors: Vec<Vec<Value>>,
    #[serde(default)]
    names: IndexMap<CompactString, NodeId>,
    #[serde(default = "default_ground_name")]
    ground: String,
    #[serde(default = "default_power_name")]
    power: String,
}

fn default_ground_name() -> String {
    "vss".to_string()
}

fn default_power_name() -> String {
    "vcc".to_string()
}

fn malformed(msg: String) -> SimError {
    SimError::MalformedNetlist(msg)
}

fn field_u64(record: &[Value], idx: usize, what: &str, ctx: &str) -> Result<u64> {
    record
        .get(idx)
        .and_then(Value::as_u64)
        .ok_or_else(|| malformed(format!("{}: expected non-negative integer {}", ctx, what)))
}

/// Transistor ids come either as plain integers or as `"t123"` strings.
fn transistor_id(v: &Value, ctx: &str) -> Result<TransistorId> {
    if let Some(n) = v.as_u64() {
        return Ok(n as TransistorId);
    }
    v.as_str()
        .map(|s| s.strip_prefix('t').unwrap_or(s))
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| malformed(format!("{}: invalid transistor id {}", ctx, v)))
}

fn parse_node_record(i: usize, record: &[Value]) -> Result<NodeRecord> {
    let ctx = format!("node record {}", i);
    let id = field_u64(record, 0, "node id", &ctx)? as NodeId;
    let pull = match record.get(1) {
        Some(Value::String(s)) => s.parse::<Pull>().map_err(|e| malformed(format!("{}: {}", ctx, e)))?,
        Some(Value::Bool(true)) => Pull::Up,
        Some(Value::Bool(false)) | None => Pull::None,
        Some(v) => return Err(malformed(format!("{}: invalid pull attribute {}", ctx, v))),
    };
    let mut segments = Vec::new();
    if record.len() > 2 {
        let layer = field_u64(record, 2, "layer", &ctx)?;
        let layer = u32::try_from(layer).map_err(|_| malformed(format!("{}: layer {} out of range", ctx, layer)))?;
        let coords = record[3..]
            .iter()
            .map(|v| v.as_i64().ok_or_else(|| malformed(format!("{}: invalid coordinate {}", ctx, v))))
            .collect::<Result<Vec<_>>>()?;
        segments.push(Segment { layer, coords });
    }
    Ok(NodeRecord { id, pull, kind: NodeKind::Normal, segments })
}

fn parse_transistor_record(i: usize, record: &[Value]) -> Result<TransistorRecord> {
    let ctx = format!("transistor record {}", i);
    let id = record
        .first()
        .ok_or_else(|| malformed(format!("{}: empty record", ctx)))
        .and_then(|v| transistor_id(v, &ctx))?;
    let ctx = format!("transistor {}", id);
    Ok(TransistorRecord {
        id,
        gate: field_u64(record, 1, "gate node", &ctx)? as NodeId,
        c1: field_u64(record, 2, "c1 node", &ctx)? as NodeId,
        c2: field_u64(record, 3, "c2 node", &ctx)? as NodeId,
    })
}

impl Netlist {
    /// Load a JSON netlist from a file path.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
            .map_err(|e| match e {
                SimError::MalformedNetlist(msg) => {
                    SimError::MalformedNetlist(format!("{}: {}", path.display(), msg))
                }
                e => e,
            })
    }

    /// Load a JSON netlist from a string.
    ///
    /// The `ground` and `power` keys name the two sentinel nodes (through the
    /// name map, or as raw ids) and default to `vss` and `vcc`.
    pub fn from_json_str(input: &str) -> Result<Self> {
        let file: NetlistFile =
            serde_json::from_str(input).map_err(|e| malformed(format!("invalid JSON: {}", e)))?;

        let mut merged: IndexMap<NodeId, NodeRecord> = IndexMap::new();
        for (i, raw) in file.nodes.iter().enumerate() {
            let rec = parse_node_record(i, raw)?;
            match merged.get_mut(&rec.id) {
                None => {
                    merged.insert(rec.id, rec);
                }
                Some(prev) => {
                    prev.pull = match (prev.pull, rec.pull) {
                        (a, Pull::None) => a,
                        (Pull::None, b) => b,
                        (a, b) if a == b => a,
                        (a, b) => {
                            return Err(malformed(format!(
                                "node {} has conflicting pull attributes {:?} and {:?}",
                                rec.id, a, b
                            )))
                        }
                    };
                    prev.segments.extend(rec.segments);
                }
            }
        }
        merged.sort_keys();

        let transistors = file
            .transistors
            .iter()
            .enumerate()
            .map(|(i, raw)| parse_transistor_record(i, raw))
            .collect::<Result<Vec<_>>>()?;

        let mut netlist = Netlist {
            nodes: merged.into_values().collect(),
            transistors,
            names: file.names,
        };
        netlist.mark_sentinel(&file.ground, NodeKind::Ground)?;
        netlist.mark_sentinel(&file.power, NodeKind::Power)?;
        Ok(netlist)
    }

    fn mark_sentinel(&mut self, name: &str, kind: NodeKind) -> Result<()> {
        let node_ref: NodeRef = name.parse().unwrap_or_else(|e| match e {});
        let id = self
            .lookup(&node_ref)
            .ok_or_else(|| malformed(format!("{:?} node '{}' is not in the name map", kind, name)))?;
        let rec = self
            .nodes
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| malformed(format!("{:?} node {} has no node record", kind, id)))?;
        rec.kind = kind;
        Ok(())
    }

    /// Resolve a reference without checking the node exists.
    pub fn lookup(&self, node_ref: &NodeRef) -> Option<NodeId> {
        match node_ref {
            NodeRef::Id(id) => Some(*id),
            NodeRef::Name(name) => self.names.get(name.as_str()).copied(),
        }
    }

    pub fn summary(&self) -> String {
        let pullups = self.nodes.iter().filter(|n| n.pull == Pull::Up).count();
        let pulldowns = self.nodes.iter().filter(|n| n.pull == Pull::Down).count();
        format!(
            "{} nodes ({} pull-up, {} pull-down), {} transistors, {} names",
            self.nodes.len(),
            pullups,
            pulldowns,
            self.transistors.len(),
            self.names.len()
        )
    }
}

/// Programmatic netlist construction, mostly for tests and small circuits.
///
/// Ids are handed out densely starting from zero unless given explicitly.
#[derive(Debug, Default)]
pub struct NetlistBuilder {
    netlist: Netlist,
    next_node: NodeId,
    next_transistor: TransistorId,
}

impl NetlistBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_node(&mut self, pull: Pull, kind: NodeKind) -> NodeId {
        let id = self.next_node;
        self.netlist.nodes.push(NodeRecord { id, pull, kind, segments: Vec::new() });
        self.next_node += 1;
        id
    }

    pub fn ground(&mut self, name: &str) -> NodeId {
        let id = self.push_node(Pull::None, NodeKind::Ground);
        self.name(name, id)
    }

    pub fn power(&mut self, name: &str) -> NodeId {
        let id = self.push_node(Pull::None, NodeKind::Power);
        self.name(name, id)
    }

    pub fn node(&mut self, pull: Pull) -> NodeId {
        self.push_node(pull, NodeKind::Normal)
    }

    pub fn named(&mut self, name: &str, pull: Pull) -> NodeId {
        let id = self.node(pull);
        self.name(name, id)
    }

    /// Add a node with an explicit id, leaving a gap in the id space.
    pub fn node_with_id(&mut self, id: NodeId, pull: Pull) -> NodeId {
        self.netlist.nodes.push(NodeRecord { id, pull, kind: NodeKind::Normal, segments: Vec::new() });
        self.next_node = self.next_node.max(id + 1);
        id
    }

    pub fn name(&mut self, name: &str, id: NodeId) -> NodeId {
        self.netlist.names.insert(name.into(), id);
        id
    }

    pub fn transistor(&mut self, gate: NodeId, c1: NodeId, c2: NodeId) -> TransistorId {
        let id = self.next_transistor;
        self.netlist.transistors.push(TransistorRecord { id, gate, c1, c2 });
        self.next_transistor += 1;
        id
    }

    pub fn build(self) -> Netlist {
        self.netlist
    }
}
