//! Key-value persistence substrate for Sealbox.
//!
//! This module provides a trait-based interface for the raw string-keyed
//! stores the engine writes to, plus memory and file backends.
//!
//! # Design Principles
//! - Atomic single-key commits: every `put`/`remove` is durable on its own
//! - Async operations: All I/O operations are async
//! - Provider isolation: No cipher logic lives at this layer

pub mod local;
pub mod memory;
pub mod provider;

pub use local::{FileStore, FileStoreProvider};
pub use memory::{MemoryStore, MemoryStoreProvider};
pub use provider::{KeyValueStore, StoreProvider};
