//! Cryptographic primitives for Sealbox.
//!
//! This module provides:
//! - AES-128-CBC with PKCS#7 padding (baseline storage cipher)
//! - AES-256-GCM with 16-byte IVs (authenticated storage cipher)
//! - RSA key wrapping with PKCS#1 v1.5 or OAEP/SHA-256
//! - The platform secure key store abstraction and a software implementation
//!
//! # Security Guarantees
//! - All key material is automatically zeroized on drop
//! - No plaintext or key material is ever logged
//! - Platform-bound keys are only reachable through single-use handles

pub mod cbc;
pub mod gcm;
pub mod keys;
pub mod platform;
pub mod software;
pub mod wrap;

pub use keys::{CbcKey, GcmKey, CBC_KEY_LENGTH, GCM_KEY_LENGTH};
pub use platform::{AesKeySpec, AuthProof, BoundCipher, CipherHandle, SecureKeyStore};
pub use software::SoftwareKeyStore;
pub use wrap::{unwrap_key, wrap_key, RsaPadding};
