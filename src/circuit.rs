// SPDX-FileCopyrightText: Copyright (c) 2024 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0
//! Circuit model: flat node and transistor arrays indexed by id.
//!
//! Topology is fixed at [`Circuit::build`]. Afterwards only node values,
//! floating flags, external drives and the pending work queue change.
//! All relations (gate fanout, channel connections, dependents) are stored as
//! compressed index lists, so the naturally cyclic transistor graph needs no
//! pointers.

use compact_str::CompactString;
use indexmap::IndexMap;

use crate::error::{Result, SimError};
use crate::netlist::{Netlist, NodeId, NodeKind, NodeRef, Pull, TransistorId};
use crate::propagate::WorkQueue;

/// Settled state of one node as seen by readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeState {
    pub value: bool,
    /// The value is retained charge rather than an active drive.
    pub floating: bool,
}

/// A channel connection seen from one terminal: the transistor and the node
/// on its other side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connection {
    pub transistor: TransistorId,
    pub other: NodeId,
}

/// Compressed per-node lists: `items[offsets[n]..offsets[n + 1]]`.
#[derive(Debug, Clone, Default)]
pub(crate) struct Csr<T> {
    offsets: Vec<usize>,
    items: Vec<T>,
}

impl<T: Copy> Csr<T> {
    fn from_lists(lists: Vec<Vec<T>>) -> Self {
        let mut offsets = Vec::with_capacity(lists.len() + 1);
        let total = lists.iter().map(Vec::len).sum();
        let mut items = Vec::with_capacity(total);
        offsets.push(0);
        for list in lists {
            items.extend(list);
            offsets.push(items.len());
        }
        Csr { offsets, items }
    }

    #[inline]
    pub(crate) fn of(&self, n: usize) -> &[T] {
        &self.items[self.offsets[n]..self.offsets[n + 1]]
    }
}

/// Ids may leave gaps, but no more than this many slots beyond four per
/// record, since every id indexes the state arrays directly.
const ID_SLACK: usize = 1024;

/// One past the largest id, or an error when the ids are too sparse to
/// index by position.
fn slot_count(ids: impl Iterator<Item = usize>, records: usize, what: &str) -> Result<usize> {
    let limit = records.saturating_mul(4).saturating_add(ID_SLACK);
    match ids.max() {
        None => Ok(0),
        Some(max) if max > limit => Err(SimError::MalformedNetlist(format!(
            "{} id {} is out of range for {} records (limit {})",
            what, max, records, limit
        ))),
        Some(max) => max
            .checked_add(1)
            .ok_or_else(|| SimError::MalformedNetlist(format!("{} id {} is out of range", what, max))),
    }
}

#[derive(Debug)]
pub struct Circuit {
    /// One past the largest node id.
    node_slots: usize,
    node_count: usize,
    transistor_count: usize,

    ground: NodeId,
    power: NodeId,

    // - Node data, indexed by id
    node_present: Vec<bool>,
    node_kind: Vec<NodeKind>,
    node_pull: Vec<Pull>,
    node_value: Vec<bool>,
    node_floating: Vec<bool>,
    node_drive: Vec<Option<bool>>,

    // Transistors gated by each node
    node_gates: Csr<TransistorId>,
    // Channel connections of each node
    node_connections: Csr<Connection>,
    // Non-sentinel terminals of every gated transistor
    node_depend: Csr<NodeId>,
    // One non-sentinel terminal per gated transistor, enough once it conducts
    node_depend_on: Csr<NodeId>,

    // - Transistor data, indexed by id
    tran_present: Vec<bool>,
    tran_gate: Vec<NodeId>,
    tran_c1: Vec<NodeId>,
    tran_c2: Vec<NodeId>,

    names: IndexMap<CompactString, NodeId>,

    /// Nodes dirtied by stimulus and awaiting propagation.
    pub(crate) pending: WorkQueue,
}

impl Circuit {
    /// Validate a netlist and build the circuit in its power-up state.
    pub fn build(netlist: &Netlist) -> Result<Self> {
        let node_slots = slot_count(netlist.nodes.iter().map(|n| n.id), netlist.nodes.len(), "node")?;
        let mut node_present = vec![false; node_slots];
        let mut node_kind = vec![NodeKind::Normal; node_slots];
        let mut node_pull = vec![Pull::None; node_slots];
        let mut ground = None;
        let mut power = None;

        for rec in &netlist.nodes {
            if node_present[rec.id] {
                return Err(SimError::MalformedNetlist(format!("duplicate node id {}", rec.id)));
            }
            node_present[rec.id] = true;
            node_kind[rec.id] = rec.kind;
            node_pull[rec.id] = rec.pull;
            let slot = match rec.kind {
                NodeKind::Normal => continue,
                NodeKind::Ground => &mut ground,
                NodeKind::Power => &mut power,
            };
            if let Some(prev) = slot.replace(rec.id) {
                return Err(SimError::MalformedNetlist(format!(
                    "more than one {:?} node: {} and {}",
                    rec.kind, prev, rec.id
                )));
            }
        }
        let ground = ground.ok_or_else(|| SimError::MalformedNetlist("no ground node".into()))?;
        let power = power.ok_or_else(|| SimError::MalformedNetlist("no power node".into()))?;

        let tran_slots =
            slot_count(netlist.transistors.iter().map(|t| t.id), netlist.transistors.len(), "transistor")?;
        let mut tran_present = vec![false; tran_slots];
        let mut tran_gate = vec![0; tran_slots];
        let mut tran_c1 = vec![0; tran_slots];
        let mut tran_c2 = vec![0; tran_slots];
        let exists = |n: NodeId| n < node_slots && node_present[n];

        let mut gates = vec![Vec::new(); node_slots];
        let mut connections = vec![Vec::new(); node_slots];
        for t in &netlist.transistors {
            if tran_present[t.id] {
                return Err(SimError::MalformedNetlist(format!("duplicate transistor id {}", t.id)));
            }
            for (terminal, n) in [("gate", t.gate), ("c1", t.c1), ("c2", t.c2)] {
                if !exists(n) {
                    return Err(SimError::MalformedNetlist(format!(
                        "transistor {} {} references nonexistent node {}",
                        t.id, terminal, n
                    )));
                }
            }
            tran_present[t.id] = true;
            tran_gate[t.id] = t.gate;
            tran_c1[t.id] = t.c1;
            tran_c2[t.id] = t.c2;
            gates[t.gate].push(t.id);
            connections[t.c1].push(Connection { transistor: t.id, other: t.c2 });
            connections[t.c2].push(Connection { transistor: t.id, other: t.c1 });
        }

        for (name, &id) in &netlist.names {
            if !exists(id) {
                return Err(SimError::MalformedNetlist(format!(
                    "name '{}' references nonexistent node {}",
                    name, id
                )));
            }
        }

        let is_sentinel = |n: NodeId| n == ground || n == power;
        let mut depend = vec![Vec::new(); node_slots];
        let mut depend_on = vec![Vec::new(); node_slots];
        for n in 0..node_slots {
            for &t in &gates[n] {
                let (c1, c2) = (tran_c1[t], tran_c2[t]);
                for c in [c1, c2] {
                    if !is_sentinel(c) && !depend[n].contains(&c) {
                        depend[n].push(c);
                    }
                }
                let one = if !is_sentinel(c1) { c1 } else { c2 };
                if !is_sentinel(one) && !depend_on[n].contains(&one) {
                    depend_on[n].push(one);
                }
            }
        }

        let mut circuit = Circuit {
            node_slots,
            node_count: netlist.nodes.len(),
            transistor_count: netlist.transistors.len(),
            ground,
            power,
            node_present,
            node_kind,
            node_pull,
            node_value: vec![false; node_slots],
            node_floating: vec![true; node_slots],
            node_drive: vec![None; node_slots],
            node_gates: Csr::from_lists(gates),
            node_connections: Csr::from_lists(connections),
            node_depend: Csr::from_lists(depend),
            node_depend_on: Csr::from_lists(depend_on),
            tran_present,
            tran_gate,
            tran_c1,
            tran_c2,
            names: netlist.names.clone(),
            pending: WorkQueue::new(node_slots),
        };
        circuit.reset();
        clilog::debug!(
            "circuit built: {} nodes in {} slots, {} transistors",
            circuit.node_count,
            circuit.node_slots,
            circuit.transistor_count
        );
        Ok(circuit)
    }

    /// Restore power-up values: normal nodes float at their pull level (low
    /// without a pull), drives are removed and pending work is dropped.
    pub fn reset(&mut self) {
        for n in 0..self.node_slots {
            let (value, floating) = match self.node_kind[n] {
                NodeKind::Ground => (false, false),
                NodeKind::Power => (true, false),
                NodeKind::Normal => (self.node_pull[n] == Pull::Up, true),
            };
            self.node_value[n] = value;
            self.node_floating[n] = floating;
            self.node_drive[n] = None;
        }
        self.pending.clear();
    }

    /// Resolve a reference to an existing node id.
    pub fn resolve(&self, node_ref: &NodeRef) -> Result<NodeId> {
        let id = match node_ref {
            NodeRef::Id(id) => Some(*id),
            NodeRef::Name(name) => self.names.get(name.as_str()).copied(),
        };
        match id {
            Some(id) if self.contains(id) => Ok(id),
            _ => Err(SimError::UnknownNode(node_ref.clone())),
        }
    }

    /// Like [`Circuit::resolve`] but rejects ground and power.
    fn resolve_drivable(&self, node_ref: &NodeRef) -> Result<NodeId> {
        let id = self.resolve(node_ref)?;
        if self.is_sentinel(id) {
            return Err(SimError::UnknownNode(node_ref.clone()));
        }
        Ok(id)
    }

    /// Drive a normal node to `value` until it is re-forced or released.
    ///
    /// The node and, when its value flips, its dependents are queued for the
    /// next propagation.
    pub fn force_node(&mut self, id: NodeId, value: bool) -> Result<()> {
        let id = self.resolve_drivable(&NodeRef::Id(id))?;
        self.node_drive[id] = Some(value);
        self.node_floating[id] = false;
        if self.node_value[id] != value {
            self.node_value[id] = value;
            self.enqueue_dependents(id);
        }
        self.pending.push(id);
        Ok(())
    }

    /// Remove an external drive; the node's group is queued for re-resolution.
    pub fn release_node(&mut self, id: NodeId) -> Result<()> {
        let id = self.resolve_drivable(&NodeRef::Id(id))?;
        if self.node_drive[id].take().is_some() {
            self.pending.push(id);
        }
        Ok(())
    }

    pub fn read_node(&self, id: NodeId) -> Result<NodeState> {
        let id = self.resolve(&NodeRef::Id(id))?;
        Ok(self.state(id))
    }

    #[inline]
    pub fn state(&self, id: NodeId) -> NodeState {
        NodeState { value: self.node_value[id], floating: self.node_floating[id] }
    }

    /// Queue the nodes whose groups may change now that `id` switched the
    /// transistors it gates.
    #[inline]
    pub(crate) fn enqueue_dependents(&mut self, id: NodeId) {
        let list = if self.node_value[id] { &self.node_depend_on } else { &self.node_depend };
        for &n in list.of(id) {
            self.pending.push(n);
        }
    }

    #[inline]
    pub(crate) fn set_state(&mut self, id: NodeId, value: bool, floating: bool) {
        self.node_value[id] = value;
        self.node_floating[id] = floating;
    }

    #[inline]
    pub fn value(&self, id: NodeId) -> bool {
        self.node_value[id]
    }

    #[inline]
    pub fn pull(&self, id: NodeId) -> Pull {
        self.node_pull[id]
    }

    #[inline]
    pub fn drive(&self, id: NodeId) -> Option<bool> {
        self.node_drive[id]
    }

    #[inline]
    pub fn kind(&self, id: NodeId) -> NodeKind {
        self.node_kind[id]
    }

    #[inline]
    pub fn is_sentinel(&self, id: NodeId) -> bool {
        id == self.ground || id == self.power
    }

    #[inline]
    pub fn contains(&self, id: NodeId) -> bool {
        id < self.node_slots && self.node_present[id]
    }

    #[inline]
    pub fn connections(&self, id: NodeId) -> &[Connection] {
        self.node_connections.of(id)
    }

    #[inline]
    pub fn gates(&self, id: NodeId) -> &[TransistorId] {
        self.node_gates.of(id)
    }

    /// A transistor conducts iff its gate node is high.
    #[inline]
    pub fn transistor_on(&self, t: TransistorId) -> bool {
        self.node_value[self.tran_gate[t]]
    }

    /// `(gate, c1, c2)` of an existing transistor.
    pub fn transistor(&self, t: TransistorId) -> Option<(NodeId, NodeId, NodeId)> {
        (t < self.tran_present.len() && self.tran_present[t])
            .then(|| (self.tran_gate[t], self.tran_c1[t], self.tran_c2[t]))
    }

    pub fn ground(&self) -> NodeId {
        self.ground
    }

    pub fn power(&self) -> NodeId {
        self.power
    }

    pub fn node_slots(&self) -> usize {
        self.node_slots
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn transistor_count(&self) -> usize {
        self.transistor_count
    }

    /// Existing node ids in ascending order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..self.node_slots).filter(|&n| self.node_present[n])
    }

    /// Existing normal (non-sentinel) node ids in ascending order.
    pub fn normal_node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.node_ids().filter(|&n| self.node_kind[n] == NodeKind::Normal)
    }

    pub fn names(&self) -> &IndexMap<CompactString, NodeId> {
        &self.names
    }

    /// First name mapped to `id`, if any.
    pub fn name_of(&self, id: NodeId) -> Option<&str> {
        self.names.iter().find(|(_, &n)| n == id).map(|(name, _)| name.as_str())
    }

    /// Number of currently conducting transistors.
    pub fn conducting_count(&self) -> usize {
        (0..self.tran_present.len())
            .filter(|&t| self.tran_present[t] && self.transistor_on(t))
            .count()
    }

    pub(crate) fn drives(&self) -> impl Iterator<Item = (NodeId, bool)> + '_ {
        self.node_drive.iter().enumerate().filter_map(|(n, d)| d.map(|v| (n, v)))
    }

    pub(crate) fn values(&self) -> &[bool] {
        &self.node_value
    }

    pub(crate) fn floatings(&self) -> &[bool] {
        &self.node_floating
    }

    /// Overwrite dynamic state wholesale; callers validate lengths.
    pub(crate) fn load_state(&mut self, values: &[bool], floating: &[bool], drives: &[(NodeId, bool)]) {
        self.node_value.copy_from_slice(values);
        self.node_floating.copy_from_slice(floating);
        self.node_drive.iter_mut().for_each(|d| *d = None);
        for &(n, v) in drives {
            self.node_drive[n] = Some(v);
        }
        self.pending.clear();
    }
}
