//! Node payloads of the acquisition tree.

use super::id::AcqNodeId;
use crate::backend::{ChannelInfo, SharedDevice};
use crate::pipeline::SharedTopBlock;
use std::sync::Arc;

/// What a tree node stands for.
///
/// The controller matches on this once, when a node appears, to decide which
/// component to create.
#[derive(Debug, Clone)]
pub enum AcqNodeKind {
    /// Tree root; owns everything else
    Root,
    /// Flow graph shared by the instruments under it
    TopBlock(SharedTopBlock),
    /// A connected device
    DeviceSource(SharedDevice),
    /// One real-valued device channel
    FloatChannel(FloatChannelNode),
    /// Captured reference data
    ImportChannel(ImportChannelNode),
}

impl AcqNodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            AcqNodeKind::Root => "root",
            AcqNodeKind::TopBlock(_) => "top_block",
            AcqNodeKind::DeviceSource(_) => "device",
            AcqNodeKind::FloatChannel(_) => "float_channel",
            AcqNodeKind::ImportChannel(_) => "import_channel",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FloatChannelNode {
    pub device: SharedDevice,
    pub info: ChannelInfo,
}

/// Reference data frozen from a capture.
#[derive(Debug, Clone)]
pub struct ImportChannelNode {
    pub x: Arc<[f32]>,
    pub y: Arc<[f32]>,
}

/// One node of the acquisition topology.
#[derive(Debug, Clone)]
pub struct AcqNode {
    pub id: AcqNodeId,
    /// Display name; not necessarily unique
    pub name: String,
    pub kind: AcqNodeKind,
    pub(crate) parent: Option<AcqNodeId>,
    pub(crate) children: Vec<AcqNodeId>,
}

impl AcqNode {
    pub(crate) fn new(id: AcqNodeId, name: String, kind: AcqNodeKind) -> Self {
        Self {
            id,
            name,
            kind,
            parent: None,
            children: Vec::new(),
        }
    }

    pub fn parent(&self) -> Option<AcqNodeId> {
        self.parent
    }

    pub fn children(&self) -> &[AcqNodeId] {
        &self.children
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}
