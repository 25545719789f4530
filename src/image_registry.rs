//! Registry of loaded images, answering "which module owns this address"
//!
//! Modules are keyed by base address and are never removed or updated for the
//! life of a session. Module counts are in the hundreds, so ownership lookup is
//! a linear scan in registration order.

use std::collections::HashMap;

/// A loaded image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRecord {
    pub base: u64,
    pub size: u64,
    /// Name as reported by the image-load provider (usually an NT path)
    pub name: String,
}

impl ModuleRecord {
    /// Inclusive range test: `base <= address <= base + size`
    ///
    /// The upper bound admits the byte one past the image. Dependent output
    /// relies on this, so it stays inclusive.
    pub fn contains(&self, address: u64) -> bool {
        address >= self.base && address <= self.base.saturating_add(self.size)
    }

    /// Byte distance from the image base
    pub fn offset_of(&self, address: u64) -> u64 {
        address.wrapping_sub(self.base)
    }
}

/// Outcome of [`ImageRegistry::insert`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A module with this base is already registered; nothing was changed
    Duplicate,
}

/// Owns every registered module
#[derive(Debug, Default)]
pub struct ImageRegistry {
    modules: Vec<ModuleRecord>,
    by_base: HashMap<u64, usize>,
}

impl ImageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module, copying its name into registry-owned storage
    pub fn insert(&mut self, base: u64, size: u64, name: &str) -> InsertOutcome {
        if self.by_base.contains_key(&base) {
            return InsertOutcome::Duplicate;
        }

        self.by_base.insert(base, self.modules.len());
        self.modules.push(ModuleRecord {
            base,
            size,
            name: name.to_owned(),
        });
        InsertOutcome::Inserted
    }

    /// Find the module whose range contains `address`; earliest registration
    /// wins when ranges overlap
    pub fn lookup(&self, address: u64) -> Option<&ModuleRecord> {
        self.modules.iter().find(|module| module.contains(address))
    }

    /// Exact lookup by base address
    pub fn get(&self, base: u64) -> Option<&ModuleRecord> {
        self.by_base.get(&base).map(|&index| &self.modules[index])
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModuleRecord> {
        self.modules.iter()
    }
}
