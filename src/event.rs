//! Raw trace records as delivered by the trace session
//!
//! A record carries the identity of the provider that emitted it, an opcode,
//! the originating process/thread, a raw timestamp and an opaque payload whose
//! layout depends on the provider (see [`crate::payload`]).

use crate::payload::PointerWidth;
use std::fmt;

/// 128-bit provider identity
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Guid(u128);

impl Guid {
    pub const fn from_u128(value: u128) -> Self {
        Self(value)
    }

    /// Parse the canonical `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx` form
    /// (braces optional, case-insensitive)
    pub fn parse(text: &str) -> Option<Self> {
        let trimmed = text.trim().trim_start_matches('{').trim_end_matches('}');
        let groups: Vec<&str> = trimmed.split('-').collect();
        let lengths: Vec<usize> = groups.iter().map(|g| g.len()).collect();
        if lengths != [8, 4, 4, 4, 12] {
            return None;
        }

        let hex: String = groups.concat();
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        u128::from_str_radix(&hex, 16).ok().map(Self)
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        write!(
            f,
            "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
            (v >> 96) as u32,
            (v >> 80) as u16,
            (v >> 64) as u16,
            (v >> 48) as u16,
            v & 0xffff_ffff_ffff
        )
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({})", self)
    }
}

/// Thread provider; secure-mode enter/exit records arrive on it
pub const THREAD_PROVIDER: Guid = Guid::from_u128(0x3d6fa8d1_fe05_11d0_9dda_00c04fd7ba7c);

/// Stack-walk provider
pub const STACK_WALK_PROVIDER: Guid = Guid::from_u128(0xdef2fe46_7bd6_4b80_bd94_f57fe20d0ce3);

/// Image-load provider
pub const IMAGE_LOAD_PROVIDER: Guid = Guid::from_u128(0x2cb15d1d_5fc1_11d2_abe1_00a0c911f518);

/// Opcodes used by the three lanes
pub mod opcode {
    pub const SECURE_ENTER: u8 = 0x49;
    pub const SECURE_EXIT: u8 = 0x4A;
    pub const STACK_WALK: u8 = 32;
    pub const IMAGE_LOAD: u8 = 10;
    pub const IMAGE_UNLOAD: u8 = 2;
    pub const IMAGE_RUNDOWN: u8 = 3;
}

/// Which dispatcher lane a provider feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    SecureTransition,
    StackWalk,
    ImageLoad,
}

impl ProviderKind {
    /// Classify a provider identity; unknown providers are not an error
    pub fn classify(provider: Guid) -> Option<Self> {
        match provider {
            THREAD_PROVIDER => Some(ProviderKind::SecureTransition),
            STACK_WALK_PROVIDER => Some(ProviderKind::StackWalk),
            IMAGE_LOAD_PROVIDER => Some(ProviderKind::ImageLoad),
            _ => None,
        }
    }

    pub fn guid(self) -> Guid {
        match self {
            ProviderKind::SecureTransition => THREAD_PROVIDER,
            ProviderKind::StackWalk => STACK_WALK_PROVIDER,
            ProviderKind::ImageLoad => IMAGE_LOAD_PROVIDER,
        }
    }
}

/// A record borrowed from the delivery buffer for the duration of one callback
#[derive(Debug, Clone, Copy)]
pub struct RawEvent<'a> {
    pub provider: Guid,
    pub opcode: u8,
    pub process_id: u32,
    pub thread_id: u32,
    pub timestamp: i64,
    pub pointer_width: PointerWidth,
    pub payload: &'a [u8],
}

/// An owned record, used where records outlive a delivery buffer (captures)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedEvent {
    pub provider: Guid,
    pub opcode: u8,
    pub process_id: u32,
    pub thread_id: u32,
    pub timestamp: i64,
    pub pointer_width: PointerWidth,
    pub payload: Vec<u8>,
}

impl OwnedEvent {
    pub fn as_raw(&self) -> RawEvent<'_> {
        RawEvent {
            provider: self.provider,
            opcode: self.opcode,
            process_id: self.process_id,
            thread_id: self.thread_id,
            timestamp: self.timestamp,
            pointer_width: self.pointer_width,
            payload: &self.payload,
        }
    }
}
