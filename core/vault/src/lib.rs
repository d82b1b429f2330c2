//! Encrypted key-value storage engine for Sealbox.
//!
//! This module provides:
//! - Negotiation of key/storage cipher pairs against the platform tier
//! - Key wrapping and storage ciphers (AES-CBC, AES-GCM, biometric AES-GCM)
//! - Migration of stored entries between cipher generations
//! - Namespace sessions with reset-on-error recovery
//! - A serialized storage worker behind the [`SecureStorage`] facade
//!
//! # Architecture
//! The facade queues requests to a single worker task. The worker owns one
//! session per namespace; each session encrypts values through a storage
//! cipher whose key is protected by a key cipher from the platform key
//! store.

pub mod algorithm;
pub mod auth;
pub mod codec;
pub mod config;
pub mod key_cipher;
pub mod migration;
pub mod platform;
pub mod session;
pub mod storage_cipher;
pub mod worker;

pub use algorithm::{AlgorithmPair, AlgorithmRegistry, KeyCipherAlgorithm, StorageCipherAlgorithm};
pub use auth::{AuthOutcome, AuthenticationGate, Authenticator, GateState, PromptInfo};
pub use config::{StorageMode, StorageOptions};
pub use key_cipher::KeyCipher;
pub use migration::{Migration, MigrationOutcome, MigrationReport};
pub use platform::Platform;
pub use session::NamespaceSession;
pub use storage_cipher::{CipherFactory, StorageCipher};
pub use worker::{Request, Response, SecureStorage, StorageWorker};
