//! Migration engine.
//!
//! Moves a namespace's entries from the saved algorithm to the current one.
//! Entries are independent: a failure on one is counted and the pass goes on.
//! The pass is safe to interrupt and rerun at any point.

use tracing::{debug, info, warn};

use crate::algorithm::{requires_re_encryption, AlgorithmPair, AlgorithmRegistry};
use crate::codec;
use crate::config::{StorageMode, StorageOptions};
use crate::storage_cipher::{CipherFactory, StorageCipher};
use sealbox_common::{Error, Result};
use sealbox_storage::KeyValueStore;

/// Outcome of one migration pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Entries re-encrypted (or moved) in this pass.
    pub migrated: usize,
    /// Entries that were already readable under the current algorithm.
    pub already_current: usize,
    /// Entries that could not be migrated.
    pub failed: usize,
    /// Failed entries removed under the delete-on-failure policy.
    pub removed: usize,
    /// Whether the migrated flag was set.
    pub completed: bool,
}

/// Report plus the current cipher when the pass had to build it.
pub struct MigrationOutcome {
    pub report: MigrationReport,
    pub current: Option<StorageCipher>,
}

/// One migration pass over a namespace.
///
/// In ciphertext mode `source` and `target` are the same store and entries
/// are re-encrypted in place. In managed mode entries move from the plain
/// `source` to the managed `target` as plaintext.
pub struct Migration<'a> {
    pub options: &'a StorageOptions,
    pub registry: &'a AlgorithmRegistry,
    pub factory: &'a CipherFactory,
    pub source: &'a dyn KeyValueStore,
    pub target: &'a dyn KeyValueStore,
}

impl Migration<'_> {
    /// Whether a pass is due.
    pub fn is_due(mode: StorageMode, saved: AlgorithmPair, current: AlgorithmPair, migrated: bool) -> bool {
        match mode {
            StorageMode::Ciphertext => requires_re_encryption(saved, current) || !migrated,
            StorageMode::Managed => !migrated,
        }
    }

    fn delete_on_failure(&self) -> bool {
        self.options.reset_on_error
    }

    /// Run the pass.
    ///
    /// # Errors
    /// - `MigrationInitFailure` if a cipher cannot be built and the
    ///   delete-on-failure policy is off
    /// - `AuthenticationFailed` / `OperationCancelled` from any prompt
    /// - Store errors
    pub async fn run(&self, saved: AlgorithmPair, current: AlgorithmPair) -> Result<MigrationOutcome> {
        let mode = self.options.storage_mode;
        let namespace = self.source.name();

        let mut entries = Vec::new();
        for (key, value) in self.source.entries().await? {
            if self.options.logical_key(&key).is_some() {
                entries.push((key, value));
            }
        }

        if entries.is_empty() {
            debug!(namespace, "Nothing to migrate");
            return Ok(MigrationOutcome {
                report: self.finish(MigrationReport::default(), true, current).await?,
                current: None,
            });
        }

        if mode == StorageMode::Ciphertext && saved == current {
            debug!(namespace, entries = entries.len(), "Entries already current");
            let report = MigrationReport {
                already_current: entries.len(),
                ..Default::default()
            };
            return Ok(MigrationOutcome {
                report: self.finish(report, true, current).await?,
                current: None,
            });
        }

        info!(namespace, from = %saved, to = %current, entries = entries.len(), "Migrating");

        let legacy = match self.factory.build(saved).await {
            Ok(cipher) => cipher,
            Err(e) => return self.init_failed(e, current).await,
        };
        let target_cipher = match mode {
            StorageMode::Ciphertext => match self.factory.build(current).await {
                Ok(cipher) => Some(cipher),
                Err(e) => return self.init_failed(e, current).await,
            },
            StorageMode::Managed => None,
        };

        let mut report = MigrationReport::default();
        for (key, value) in entries {
            let step = match &target_cipher {
                Some(cipher) => self.reencrypt(&key, &value, &legacy, cipher).await,
                None => self.move_to_managed(&key, &value, &legacy).await,
            };
            match step {
                Ok(true) => report.migrated += 1,
                Ok(false) => report.already_current += 1,
                Err(e) if e.is_authentication() => {
                    warn!(namespace, error = %e, "Migration interrupted");
                    return Err(e);
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(namespace, key = ?self.options.logical_key(&key), error = %e, "Entry migration failed");
                    if self.delete_on_failure() {
                        self.source.remove(&key).await?;
                        report.removed += 1;
                    }
                }
            }
        }

        let completed = report.failed == 0 || self.delete_on_failure();
        let report = self.finish(report, completed, current).await?;
        Ok(MigrationOutcome {
            report,
            current: target_cipher,
        })
    }

    /// Re-encrypt one entry in place. Returns `false` if it was already current.
    async fn reencrypt(
        &self,
        key: &str,
        value: &str,
        legacy: &StorageCipher,
        current: &StorageCipher,
    ) -> Result<bool> {
        let blob = codec::decode(value)?;
        let plaintext = match open_stored(legacy, current, &blob).await? {
            Generation::Legacy(plaintext) => plaintext,
            Generation::Current => return Ok(false),
        };

        let reencrypted = current.encrypt(plaintext.as_bytes()).await?;
        self.target.put(key, codec::encode(&reencrypted)).await?;
        Ok(true)
    }

    /// Decrypt one entry into the managed store, then drop the source copy.
    async fn move_to_managed(&self, key: &str, value: &str, legacy: &StorageCipher) -> Result<bool> {
        let plaintext = legacy.decrypt_text(&codec::decode(value)?).await?;
        self.target.put(key, plaintext).await?;
        self.source.remove(key).await?;
        Ok(true)
    }

    async fn init_failed(&self, error: Error, current: AlgorithmPair) -> Result<MigrationOutcome> {
        if error.is_authentication() {
            return Err(error);
        }
        if !self.delete_on_failure() {
            return Err(Error::MigrationInitFailure(error.to_string()));
        }
        warn!(namespace = self.source.name(), %error, "Cipher unavailable, accepting data loss");
        let report = self.finish(MigrationReport::default(), true, current).await?;
        Ok(MigrationOutcome {
            report,
            current: None,
        })
    }

    async fn finish(
        &self,
        mut report: MigrationReport,
        completed: bool,
        current: AlgorithmPair,
    ) -> Result<MigrationReport> {
        if completed {
            if self.options.storage_mode == StorageMode::Ciphertext {
                self.registry.persist(current).await?;
            }
            self.registry
                .set_migrated(self.options.storage_mode, true)
                .await?;
        }
        report.completed = completed;
        info!(
            namespace = self.source.name(),
            migrated = report.migrated,
            already_current = report.already_current,
            failed = report.failed,
            removed = report.removed,
            completed,
            "Migration finished"
        );
        Ok(report)
    }
}

/// Cipher generation a stored blob belongs to.
enum Generation {
    Legacy(String),
    Current,
}

/// Open `blob` with the saved cipher, falling back to the current one.
///
/// The current cipher is only consulted once the saved one rejects the
/// blob: CBC can accept a foreign blob, so a successful current decrypt
/// never outranks the saved cipher.
async fn open_stored(legacy: &StorageCipher, current: &StorageCipher, blob: &[u8]) -> Result<Generation> {
    match legacy.decrypt_text(blob).await {
        Ok(plaintext) => Ok(Generation::Legacy(plaintext)),
        Err(e) if e.is_authentication() => Err(e),
        Err(e) => match current.decrypt_text(blob).await {
            Ok(_) => Ok(Generation::Current),
            Err(current_error) if current_error.is_authentication() => Err(current_error),
            Err(_) => Err(e),
        },
    }
}
