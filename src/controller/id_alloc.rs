//! Per-instrument identifiers and plot colors.
//!
//! Each controller owns one [`IdAllocator`]; ids are unique within that
//! instrument only.

use std::fmt;

/// Identifier of a component within one controller.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub u32);

impl ComponentId {
    pub const INVALID: ComponentId = ComponentId(u32::MAX);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "ComponentId(INVALID)")
        } else {
            write!(f, "ComponentId({})", self.0)
        }
    }
}

/// RGB plot color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlotColor(pub u8, pub u8, pub u8);

/// Channel colors, handed out in order and then repeated.
pub const PALETTE: [PlotColor; 8] = [
    PlotColor(0xff, 0x72, 0x00),
    PlotColor(0x9c, 0x4a, 0xfe),
    PlotColor(0x00, 0xbb, 0xd4),
    PlotColor(0xf8, 0x3a, 0x80),
    PlotColor(0x4d, 0xbc, 0x4d),
    PlotColor(0xf2, 0xc8, 0x11),
    PlotColor(0x3e, 0x7c, 0xf6),
    PlotColor(0xe0, 0x4a, 0x3b),
];

/// Hands out component ids and channel colors for one instrument.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_id: u32,
    next_color: usize,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> ComponentId {
        let id = ComponentId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn next_color(&mut self) -> PlotColor {
        let color = PALETTE[self.next_color % PALETTE.len()];
        self.next_color += 1;
        color
    }

    /// Number of ids handed out so far.
    pub fn allocated(&self) -> u32 {
        self.next_id
    }
}
