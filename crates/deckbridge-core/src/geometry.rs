//! Translation between the device layer's (page, button index) addressing and
//! the plugin protocol's flat context ids.

use serde::{Deserialize, Serialize};

/// Key layout of the bound device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid {
    pub columns: u8,
    pub rows: u8,
}

impl Default for Grid {
    fn default() -> Self {
        // Reference deployment: a 32-key deck.
        Self {
            columns: 8,
            rows: 4,
        }
    }
}

/// Position of a button within its page, as the plugin protocol spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coordinates {
    pub column: u8,
    pub row: u8,
}

impl Grid {
    /// Number of keys on one page.
    pub fn keys(&self) -> u32 {
        self.columns as u32 * self.rows as u32
    }

    /// Flat context id for a button. Bijective with (page, index) for a fixed
    /// grid.
    pub fn to_context(&self, index: u16, page: u16) -> u32 {
        index as u32 + page as u32 * self.keys()
    }

    pub fn to_button_index(&self, context: u32, page: u16) -> u16 {
        (context - page as u32 * self.keys()) as u16
    }

    pub fn to_page(&self, context: u32) -> u16 {
        (context / self.keys()) as u16
    }

    pub fn to_coordinates(&self, index: u16) -> Coordinates {
        Coordinates {
            column: (index % self.columns as u16) as u8,
            row: (index / self.columns as u16) as u8,
        }
    }
}
