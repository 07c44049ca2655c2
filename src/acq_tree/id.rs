//! Generational node handles for the acquisition tree arena.

use std::fmt;

/// Slot index plus the generation it was issued for.
///
/// A handle outlives its node safely: once the slot is reclaimed the
/// generation moves on and lookups through the stale handle return `None`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct AcqNodeId {
    pub index: u32,
    pub generation: u32,
}

impl AcqNodeId {
    pub const INVALID: AcqNodeId = AcqNodeId {
        index: u32::MAX,
        generation: 0,
    };

    #[inline]
    pub fn is_valid(self) -> bool {
        self.index != u32::MAX
    }

    #[inline]
    pub fn slot(self) -> usize {
        self.index as usize
    }
}

impl fmt::Debug for AcqNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "AcqNodeId({}v{})", self.index, self.generation)
        } else {
            write!(f, "AcqNodeId(INVALID)")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_id() {
        assert!(!AcqNodeId::INVALID.is_valid());
        let id = AcqNodeId {
            index: 2,
            generation: 5,
        };
        assert!(id.is_valid());
        assert_eq!(id.slot(), 2);
        assert_eq!(format!("{:?}", id), "AcqNodeId(2v5)");
    }
}
