//! Arena-backed acquisition tree.
//!
//! Nodes live in a flat `Vec` of slots addressed by [`AcqNodeId`]. Parent
//! and child links are kept symmetric by the tree itself; callers never edit
//! them directly.
//!
//! ## Events and reclamation
//!
//! Structural changes publish [`TreeEvent`]s to every subscription whose
//! node is the changed parent or one of its ancestors. Removed nodes are
//! retired, not freed: they stay readable until every live subscription has
//! acknowledged the `Deleted` event, and only then does [`AcqTree::reclaim`]
//! recycle their slots under a new generation.

use super::id::AcqNodeId;
use super::node::{AcqNode, AcqNodeKind};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use thiserror::Error;

/// Errors from structural edits.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("Node {0:?} does not exist")]
    UnknownNode(AcqNodeId),

    #[error("Node {child:?} already has a parent")]
    AlreadyAttached { child: AcqNodeId },

    #[error("Attaching {child:?} under {parent:?} would create a cycle")]
    WouldCycle { parent: AcqNodeId, child: AcqNodeId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeEventKind {
    NewChild,
    Deleted,
}

/// One structural change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeEvent {
    /// Monotonic sequence number used for acknowledgement
    pub seq: u64,
    pub kind: TreeEventKind,
    /// Node whose child list changed
    pub parent: AcqNodeId,
    pub node: AcqNodeId,
}

/// Receiving end of tree notifications.
pub struct TreeSubscription {
    node: AcqNodeId,
    rx: Receiver<TreeEvent>,
    acked: Arc<AtomicU64>,
}

impl TreeSubscription {
    /// Node this subscription listens on (including its descendants).
    pub fn node(&self) -> AcqNodeId {
        self.node
    }

    pub fn try_recv(&self) -> Option<TreeEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Mark `event` and everything before it as handled.
    pub fn ack(&self, event: &TreeEvent) {
        self.acked.fetch_max(event.seq, Ordering::AcqRel);
    }

    /// Handle every pending event, acknowledging each one after `f` returns.
    pub fn drain(&self, mut f: impl FnMut(&TreeEvent)) -> usize {
        let mut handled = 0;
        while let Some(event) = self.try_recv() {
            f(&event);
            self.ack(&event);
            handled += 1;
        }
        handled
    }
}

struct Subscriber {
    node: AcqNodeId,
    tx: Sender<TreeEvent>,
    acked: Weak<AtomicU64>,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    node: Option<AcqNode>,
    /// Sequence number of the `Deleted` event that retired this node
    retired_at: Option<u64>,
}

/// Shared handle to a tree.
pub type SharedAcqTree = Arc<Mutex<AcqTree>>;

pub fn lock_tree(tree: &SharedAcqTree) -> MutexGuard<'_, AcqTree> {
    tree.lock().unwrap_or_else(|e| e.into_inner())
}

/// The acquisition topology.
pub struct AcqTree {
    slots: Vec<Slot>,
    free_slots: Vec<u32>,
    root: AcqNodeId,
    seq: u64,
    subscribers: Vec<Subscriber>,
}

impl AcqTree {
    pub fn new() -> Self {
        let mut tree = Self {
            slots: Vec::new(),
            free_slots: Vec::new(),
            root: AcqNodeId::INVALID,
            seq: 0,
            subscribers: Vec::new(),
        };
        tree.root = tree.create("root", AcqNodeKind::Root);
        tree
    }

    pub fn shared() -> SharedAcqTree {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn root(&self) -> AcqNodeId {
        self.root
    }

    /// Allocate a detached node.
    pub fn create(&mut self, name: impl Into<String>, kind: AcqNodeKind) -> AcqNodeId {
        let name = name.into();
        let index = match self.free_slots.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    node: None,
                    retired_at: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        let id = AcqNodeId {
            index,
            generation: slot.generation,
        };
        slot.node = Some(AcqNode::new(id, name, kind));
        slot.retired_at = None;
        id
    }

    /// Node behind `id`; retired nodes stay readable until reclaimed.
    pub fn get(&self, id: AcqNodeId) -> Option<&AcqNode> {
        let slot = self.slots.get(id.slot())?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_ref()
    }

    fn get_mut(&mut self, id: AcqNodeId) -> Option<&mut AcqNode> {
        let slot = self.slots.get_mut(id.slot())?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_mut()
    }

    pub fn contains(&self, id: AcqNodeId) -> bool {
        self.get(id).is_some()
    }

    pub fn is_retired(&self, id: AcqNodeId) -> bool {
        self.slots
            .get(id.slot())
            .is_some_and(|s| s.generation == id.generation && s.retired_at.is_some())
    }

    /// Live (not retired) node count.
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.node.is_some() && s.retired_at.is_none())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn parent(&self, id: AcqNodeId) -> Option<AcqNodeId> {
        self.get(id)?.parent
    }

    pub fn children(&self, id: AcqNodeId) -> &[AcqNodeId] {
        self.get(id).map(|n| n.children()).unwrap_or(&[])
    }

    /// `id` followed by its ancestors up to the root.
    pub fn ancestors(&self, id: AcqNodeId) -> Vec<AcqNodeId> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut cur = Some(id);
        while let Some(node) = cur.filter(|n| self.contains(*n)) {
            if !seen.insert(node) {
                break;
            }
            chain.push(node);
            cur = self.parent(node);
        }
        chain
    }

    /// Every node of the subtree rooted at `id`, starting with `id`.
    pub fn breadth_first(&self, id: AcqNodeId) -> Vec<AcqNodeId> {
        let mut order = Vec::new();
        if !self.contains(id) {
            return order;
        }
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([id]);
        while let Some(next) = queue.pop_front() {
            if !visited.insert(next) {
                continue;
            }
            order.push(next);
            for &child in self.children(next) {
                if !visited.contains(&child) {
                    queue.push_back(child);
                }
            }
        }
        order
    }

    /// First node in the subtree of `from` matching `pred`.
    pub fn find(&self, from: AcqNodeId, pred: impl Fn(&AcqNode) -> bool) -> Option<AcqNodeId> {
        self.breadth_first(from)
            .into_iter()
            .find(|id| self.get(*id).is_some_and(&pred))
    }

    // ------------------------------------------------------------------
    // Structural edits
    // ------------------------------------------------------------------

    /// Attach `child` (and its subtree) under `parent`.
    ///
    /// Subscribers of `parent` and its ancestors get one `NewChild` event per
    /// node of the attached subtree, in breadth-first order.
    pub fn add_tree_child(&mut self, parent: AcqNodeId, child: AcqNodeId) -> Result<(), TreeError> {
        if !self.contains(parent) || self.is_retired(parent) {
            return Err(TreeError::UnknownNode(parent));
        }
        if self.is_retired(child) {
            return Err(TreeError::UnknownNode(child));
        }
        let child_node = self.get(child).ok_or(TreeError::UnknownNode(child))?;
        if child_node.parent.is_some() || child == self.root {
            return Err(TreeError::AlreadyAttached { child });
        }
        if self.ancestors(parent).contains(&child) {
            return Err(TreeError::WouldCycle { parent, child });
        }

        if let Some(p) = self.get_mut(parent) {
            p.children.push(child);
        }
        if let Some(c) = self.get_mut(child) {
            c.parent = Some(parent);
        }

        let subtree = self.breadth_first(child);
        tracing::debug!(
            "tree: attached {:?} ({} nodes) under {:?}",
            child,
            subtree.len(),
            parent
        );
        for node in subtree {
            let node_parent = self.parent(node).unwrap_or(parent);
            self.publish(TreeEventKind::NewChild, node_parent, node);
        }
        Ok(())
    }

    /// Detach `child` from `parent`.
    ///
    /// Returns false when `child` is not one of `parent`'s children. The
    /// detached subtree is retired and freed by a later [`Self::reclaim`].
    pub fn remove_tree_child(&mut self, parent: AcqNodeId, child: AcqNodeId) -> bool {
        let Some(p) = self.get_mut(parent) else {
            return false;
        };
        let Some(pos) = p.children.iter().position(|c| *c == child) else {
            return false;
        };
        p.children.remove(pos);
        if let Some(c) = self.get_mut(child) {
            c.parent = None;
        }

        let seq = self.publish(TreeEventKind::Deleted, parent, child);
        for node in self.breadth_first(child) {
            if let Some(slot) = self.slots.get_mut(node.slot()) {
                slot.retired_at = Some(seq);
            }
        }
        tracing::debug!("tree: removed {:?} from {:?}", child, parent);
        true
    }

    // ------------------------------------------------------------------
    // Notifications
    // ------------------------------------------------------------------

    /// Listen for changes at `node` or anywhere below it.
    pub fn subscribe(&mut self, node: AcqNodeId) -> TreeSubscription {
        let (tx, rx) = crossbeam_channel::unbounded();
        let acked = Arc::new(AtomicU64::new(self.seq));
        self.subscribers.push(Subscriber {
            node,
            tx,
            acked: Arc::downgrade(&acked),
        });
        TreeSubscription { node, rx, acked }
    }

    fn publish(&mut self, kind: TreeEventKind, parent: AcqNodeId, node: AcqNodeId) -> u64 {
        self.seq += 1;
        let event = TreeEvent {
            seq: self.seq,
            kind,
            parent,
            node,
        };
        let chain = self.ancestors(parent);
        self.subscribers.retain(|sub| {
            if sub.acked.strong_count() == 0 {
                return false;
            }
            if chain.contains(&sub.node) {
                return sub.tx.send(event).is_ok();
            }
            true
        });
        self.seq
    }

    /// Free retired nodes every live subscription has acknowledged.
    ///
    /// Returns the number of slots recycled.
    pub fn reclaim(&mut self) -> usize {
        self.subscribers.retain(|s| s.acked.strong_count() > 0);
        let horizon = self
            .subscribers
            .iter()
            .filter_map(|s| s.acked.upgrade())
            .map(|a| a.load(Ordering::Acquire))
            .min()
            .unwrap_or(self.seq);

        let mut freed = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.retired_at.is_some_and(|seq| seq <= horizon) {
                slot.node = None;
                slot.retired_at = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.free_slots.push(index as u32);
                freed += 1;
            }
        }
        if freed > 0 {
            tracing::trace!("tree: reclaimed {} slots", freed);
        }
        freed
    }
}

impl Default for AcqTree {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AcqTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcqTree")
            .field("nodes", &self.len())
            .field("root", &self.root)
            .finish()
    }
}
