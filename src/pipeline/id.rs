//! Identity types for the flow-graph system.
//!
//! IDs are newtypes over `u32` that serve as direct array indices into their
//! respective storage vectors, providing O(1) lookup.

use std::fmt;

/// Index into `TopBlock::paths`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SignalPathId(pub u32);

impl SignalPathId {
    pub const INVALID: SignalPathId = SignalPathId(u32::MAX);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for SignalPathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "SignalPathId(INVALID)")
        } else {
            write!(f, "SignalPathId({})", self.0)
        }
    }
}

impl fmt::Display for SignalPathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Handle for a sink attached to a top block's lifecycle.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(pub u32);

impl fmt::Debug for ObserverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObserverId({})", self.0)
    }
}

/// Input slot on a sink, assigned at build time in enumeration order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SinkInput(pub u32);

impl SinkInput {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for SinkInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SinkInput({})", self.0)
    }
}
