//! The node container and its update queue.
//!
//! Deltas are delivered in FIFO order: a node's outputs are queued behind
//! everything already pending, and each node sees its inputs in the order
//! they were produced. Flushing drains the queue completely.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;

use tracing::{debug, trace};
use trellis_foundation::{Delta, Direction, Error, ErrorKind, Result, Timestamp, Tuple};

use crate::node::{Logic, RemoteTarget, ReteNode, Side};

/// Handle of a node within its container.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

struct Slot {
    node: ReteNode,
    parents: Vec<(NodeId, Side)>,
    children: Vec<(NodeId, Side)>,
}

struct Message {
    target: NodeId,
    side: Side,
    delta: Delta,
}

/// Owns the nodes of a network and propagates deltas between them.
pub struct ReteContainer {
    slots: Vec<Slot>,
    queue: VecDeque<Message>,
    delay_updates: bool,
    logic: Logic,
    clock: Timestamp,
    production_log: Vec<(NodeId, Delta)>,
}

impl ReteContainer {
    /// Creates an empty container.
    #[must_use]
    pub fn new(logic: Logic) -> Self {
        Self {
            slots: Vec::new(),
            queue: VecDeque::new(),
            delay_updates: false,
            logic,
            clock: Timestamp::ZERO,
            production_log: Vec::new(),
        }
    }

    /// Timestamp propagation mode.
    #[must_use]
    pub fn logic(&self) -> Logic {
        self.logic
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if the container has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, id: NodeId) -> Result<&Slot> {
        self.slots
            .get(id.0)
            .ok_or_else(|| Error::internal(format!("unknown node {id}")))
    }

    /// A node.
    ///
    /// # Errors
    ///
    /// Returns an internal error for an unknown id.
    pub fn node(&self, id: NodeId) -> Result<&ReteNode> {
        self.slot(id).map(|s| &s.node)
    }

    /// Parents of a node with the side they feed.
    #[must_use]
    pub fn parents(&self, id: NodeId) -> &[(NodeId, Side)] {
        self.slots.get(id.0).map_or(&[], |s| s.parents.as_slice())
    }

    /// Children of a node with the side they are fed on.
    #[must_use]
    pub fn children(&self, id: NodeId) -> &[(NodeId, Side)] {
        self.slots.get(id.0).map_or(&[], |s| s.children.as_slice())
    }

    /// Adds a disconnected node.
    pub fn add_node(&mut self, node: ReteNode) -> NodeId {
        let id = NodeId(self.slots.len());
        trace!(node = %id, kind = node.kind(), "added node");
        self.slots.push(Slot {
            node,
            parents: Vec::new(),
            children: Vec::new(),
        });
        id
    }

    /// Connects `parent` to `child` and primes `child` with the current
    /// content of `parent`.
    ///
    /// Pending updates are flushed first so that the primed content and the
    /// queued deltas never overlap.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown ids or if priming fails.
    pub fn connect(&mut self, parent: NodeId, child: NodeId, side: Side) -> Result<()> {
        self.slot(parent)?;
        self.slot(child)?;
        self.flush_updates()?;
        let content = self.content(parent)?;
        self.slots[parent.0].children.push((child, side));
        self.slots[child.0].parents.push((parent, side));
        debug!(%parent, %child, ?side, primed = content.len(), "connected nodes");
        for (tuple, timestamp) in content {
            self.queue.push_back(Message {
                target: child,
                side,
                delta: Delta::new(Direction::Insert, tuple, timestamp),
            });
        }
        self.flush_updates()
    }

    /// Registers a consumer on a [`ReteNode::RemoteReceiver`].
    ///
    /// # Errors
    ///
    /// Returns `Unsupported` if `node` is not a remote receiver.
    pub fn add_remote_target(&mut self, node: NodeId, target: Rc<dyn RemoteTarget>) -> Result<()> {
        self.slot(node)?;
        match &mut self.slots[node.0].node {
            ReteNode::RemoteReceiver { targets } => {
                targets.push(target);
                Ok(())
            }
            other => Err(Error::new(ErrorKind::Unsupported(format!(
                "{} node {node} cannot have remote targets",
                other.kind()
            )))),
        }
    }

    // -------------------------------------------------------------------------
    // Propagation
    // -------------------------------------------------------------------------

    /// Returns true while updates are queued instead of flushed.
    #[must_use]
    pub fn delay_updates(&self) -> bool {
        self.delay_updates
    }

    /// Switches delayed propagation. Switching it off flushes.
    ///
    /// # Errors
    ///
    /// Returns the error of the flush.
    pub fn set_delay_updates(&mut self, delay: bool) -> Result<()> {
        self.delay_updates = delay;
        if delay { Ok(()) } else { self.flush_updates() }
    }

    /// Returns true if deltas are waiting to be propagated.
    #[must_use]
    pub fn has_pending_updates(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Feeds a delta into `node` at the current revision and propagates it
    /// unless updates are delayed.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown node or if propagation fails.
    pub fn send_update(&mut self, node: NodeId, direction: Direction, tuple: Tuple) -> Result<()> {
        self.slot(node)?;
        self.queue.push_back(Message {
            target: node,
            side: Side::Primary,
            delta: Delta::new(direction, tuple, self.clock.next()),
        });
        if self.delay_updates {
            Ok(())
        } else {
            self.flush_updates()
        }
    }

    /// Propagates every queued delta.
    ///
    /// # Errors
    ///
    /// Returns the first node failure. The remaining queue is discarded, so
    /// the network may be inconsistent afterwards.
    pub fn flush_updates(&mut self) -> Result<()> {
        if self.queue.is_empty() {
            return Ok(());
        }
        let mut processed = 0usize;
        while let Some(message) = self.queue.pop_front() {
            processed += 1;
            let slot = &mut self.slots[message.target.0];
            trace!(node = %message.target, delta = %message.delta, "delivering");
            let outputs = match slot.node.update(message.side, &message.delta, self.logic) {
                Ok(outputs) => outputs,
                Err(e) => {
                    self.queue.clear();
                    return Err(e);
                }
            };
            if slot.node.is_production() {
                self.production_log
                    .extend(outputs.iter().map(|d| (message.target, d.clone())));
            }
            for delta in outputs {
                for &(child, side) in &slot.children {
                    self.queue.push_back(Message {
                        target: child,
                        side,
                        delta: delta.clone(),
                    });
                }
            }
        }
        self.clock = self.clock.next();
        trace!(processed, clock = %self.clock, "flushed updates");
        Ok(())
    }

    /// Net production changes since the last call, in order of first
    /// occurrence. A tuple inserted and revoked within the window does not
    /// appear.
    pub fn take_production_deltas(&mut self) -> Vec<(NodeId, Delta)> {
        let mut order: Vec<(NodeId, Tuple)> = Vec::new();
        let mut net: HashMap<(NodeId, Tuple), (i64, Timestamp)> = HashMap::new();
        for (node, delta) in self.production_log.drain(..) {
            let key = (node, delta.tuple);
            let entry = net.entry(key.clone()).or_insert_with(|| {
                order.push(key);
                (0, delta.timestamp)
            });
            entry.0 += if delta.direction.is_insert() { 1 } else { -1 };
            entry.1 = delta.timestamp;
        }
        order
            .into_iter()
            .filter_map(|key| {
                let (count, timestamp) = net.remove(&key)?;
                let direction = match count {
                    0 => return None,
                    c if c > 0 => Direction::Insert,
                    _ => Direction::Revoke,
                };
                Some((key.0, Delta::new(direction, key.1, timestamp)))
            })
            .collect()
    }

    // -------------------------------------------------------------------------
    // Pulling
    // -------------------------------------------------------------------------

    fn content(&self, id: NodeId) -> Result<Vec<(Tuple, Timestamp)>> {
        let slot = self.slot(id)?;
        if let Some(rows) = slot.node.memory_content(self.logic) {
            return Ok(rows);
        }
        match &slot.node {
            ReteNode::RemoteReceiver { .. } => Err(Error::new(ErrorKind::Unsupported(format!(
                "remote node {id} cannot be pulled"
            )))),
            ReteNode::Filter(condition) => {
                let mut rows = Vec::new();
                for &(parent, _) in &slot.parents {
                    rows.extend(self.content(parent)?.into_iter().filter(|(t, _)| condition.holds(t)));
                }
                Ok(rows)
            }
            _ => {
                let mut rows = Vec::new();
                for &(parent, _) in &slot.parents {
                    rows.extend(self.content(parent)?);
                }
                Ok(rows)
            }
        }
    }

    /// Current tuples of a node, optionally flushing first.
    ///
    /// # Errors
    ///
    /// Returns `Unsupported` for remote receivers and the error of the flush.
    pub fn pull_into(&mut self, node: NodeId, flush: bool) -> Result<Vec<Tuple>> {
        Ok(self
            .pull_into_with_timestamp(node, flush)?
            .into_iter()
            .map(|(t, _)| t)
            .collect())
    }

    /// Current tuples of a node with the revision each is valid as of.
    ///
    /// # Errors
    ///
    /// Same as [`ReteContainer::pull_into`].
    pub fn pull_into_with_timestamp(&mut self, node: NodeId, flush: bool) -> Result<Vec<(Tuple, Timestamp)>> {
        if flush {
            self.flush_updates()?;
        }
        self.content(node)
    }
}

impl fmt::Debug for ReteContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReteContainer")
            .field("nodes", &self.slots.len())
            .field("pending", &self.queue.len())
            .field("logic", &self.logic)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
