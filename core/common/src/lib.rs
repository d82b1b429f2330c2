//! Common utilities and types shared across Sealbox modules.
//!
//! This module provides the error taxonomy and the small value types used
//! by the crypto, storage and vault crates.

pub mod error;
pub mod types;

pub use error::{Error, ErrorKind, Result};
pub use types::{NamespaceId, PlatformTier, SensitiveBytes};
