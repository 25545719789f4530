//! vtl1mon - correlate secure-mode (VTL1) transitions with kernel stack walks
//!
//! A kernel trace session delivers three kinds of records: image loads,
//! secure-mode transitions and stack walks. The library keeps a registry of
//! loaded modules, remembers each secure-mode entry by timestamp, joins it with
//! the stack walk carrying the same timestamp, symbolizes the frames and writes
//! one CSV row per joined entry.
//!
//! Transitions are only enabled once the image rundown has completed, so every
//! stack can be symbolized against the full module set.

pub mod cli;
pub mod config;
pub mod correlation;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod image_registry;
pub mod payload;
pub mod publisher;
pub mod replay;
pub mod resolver;
pub mod rundown;
pub mod session;
pub mod symbols;

pub use error::{MonitorError, Result};
