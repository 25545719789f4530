//! Turns raw return addresses into display strings
//!
//! Resolution degrades in three steps, never failing:
//!
//! 1. `module!symbol + displacement` when the owning module is known and the
//!    symbol backend resolves the address
//! 2. `module + offset` when only the owning module is known
//! 3. the plain decimal address when no registered module owns it
//!
//! Offsets are printed in decimal.

use crate::image_registry::ImageRegistry;
use crate::symbols::SymbolSession;
use std::fmt::Write;

/// Terminates every formatted frame in an assembled stack
pub const FRAME_SEPARATOR: char = '|';

/// Borrowed view over the registry and symbols for one stack
pub struct FrameResolver<'a> {
    registry: &'a ImageRegistry,
    symbols: &'a SymbolSession,
}

impl<'a> FrameResolver<'a> {
    pub fn new(registry: &'a ImageRegistry, symbols: &'a SymbolSession) -> Self {
        Self { registry, symbols }
    }

    /// Format one frame (without separator)
    pub fn format_frame(&self, address: u64) -> String {
        let Some(module) = self.registry.lookup(address) else {
            return address.to_string();
        };

        match self.symbols.resolve(address) {
            Some(symbol) => format!("{}!{} + {}", module.name, symbol.name, symbol.displacement),
            None => format!("{} + {}", module.name, module.offset_of(address)),
        }
    }

    /// Format every frame in order, each followed by [`FRAME_SEPARATOR`]
    pub fn format_stack<I>(&self, addresses: I) -> String
    where
        I: IntoIterator<Item = u64>,
    {
        let mut stack = String::new();
        for address in addresses {
            // Writing into a String cannot fail
            let _ = write!(stack, "{}{}", self.format_frame(address), FRAME_SEPARATOR);
        }
        stack
    }
}
