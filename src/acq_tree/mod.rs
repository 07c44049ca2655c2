//! Acquisition topology tree.
//!
//! ```text
//! root
//! +-- top block "adc"
//! |   +-- device "local:adc0"
//! |       +-- float channel "voltage0"
//! |       +-- float channel "voltage1"
//! +-- import channel "REF - voltage0"
//! ```
//!
//! Nodes are owned by the tree's slot arena. Controllers hold
//! [`AcqNodeId`]s and subscribe to [`TreeEvent`]s to create or drop their
//! components as the topology changes.

pub mod id;
pub mod node;
pub mod tree;

pub use id::AcqNodeId;
pub use node::{AcqNode, AcqNodeKind, FloatChannelNode, ImportChannelNode};
pub use tree::{
    lock_tree, AcqTree, SharedAcqTree, TreeError, TreeEvent, TreeEventKind, TreeSubscription,
};
