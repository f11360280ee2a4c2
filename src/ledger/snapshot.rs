//! JSON snapshot persistence for the ledger.
//!
//! Each save writes the full ledger to `<path>.part`, fsyncs it, then renames
//! it over `<path>`, so a crash mid-write leaves the previous snapshot intact.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use fs4::fs_std::FileExt;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::error::LedgerError;
use super::types::{ItemMap, Ledger};

/// Layout version written into every snapshot.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize)]
struct SnapshotOut<'a> {
    version: u32,
    saved_at: DateTime<Utc>,
    scanning: Option<&'a str>,
    collections: &'a BTreeMap<String, ItemMap>,
}

/// Versioned layout. A file with neither `version` nor `collections` is the
/// legacy flat layout instead.
#[derive(Deserialize)]
struct SnapshotIn {
    version: Option<u32>,
    #[serde(default)]
    scanning: Option<String>,
    collections: Option<BTreeMap<String, ItemMap>>,
}

/// Unversioned `{collection: {item: record}}` layout, kept in file order.
///
/// It has no scan marker: the last collection written is the one whose
/// scan may have been cut short.
struct LegacySnapshot(Vec<(String, ItemMap)>);

impl<'de> Deserialize<'de> for LegacySnapshot {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct LegacyVisitor;

        impl<'de> Visitor<'de> for LegacyVisitor {
            type Value = LegacySnapshot;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of collections to item records")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut collections = Vec::new();
                while let Some(entry) = map.next_entry::<String, ItemMap>()? {
                    collections.push(entry);
                }
                Ok(LegacySnapshot(collections))
            }
        }

        deserializer.deserialize_map(LegacyVisitor)
    }
}

/// Append a suffix to the final path component (`studies.list` -> `studies.list.part`).
fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Snapshot file location, optionally holding the single-process lock.
#[derive(Debug)]
pub struct SnapshotStore {
    path: PathBuf,
    /// Exclusive advisory lock on `<path>.lock`, released on drop.
    #[allow(dead_code)]
    lock_file: Option<std::fs::File>,
}

impl SnapshotStore {
    /// Snapshot access without the lock, for read-only inspection.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_file: None,
        }
    }

    /// Open the snapshot location and take the exclusive lock, failing if
    /// another process already holds it.
    pub async fn open_locked(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| LedgerError::Write {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let lock_path = sibling_path(&path, ".lock");
        let lock_file = tokio::task::spawn_blocking({
            let lock_path = lock_path.clone();
            move || {
                let file = std::fs::File::create(&lock_path).map_err(|source| {
                    LedgerError::Write {
                        path: lock_path.clone(),
                        source,
                    }
                })?;
                file.try_lock_exclusive()
                    .map_err(|_| LedgerError::Locked { path: lock_path })?;
                Ok::<_, LedgerError>(file)
            }
        })
        .await??;

        tracing::debug!(lock = %lock_path.display(), "Acquired snapshot lock");
        Ok(Self {
            path,
            lock_file: Some(lock_file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the ledger as last saved. A missing file yields an empty ledger.
    ///
    /// The interrupted-scan marker is returned untouched; callers resuming a
    /// run apply [`Ledger::reset_interrupted_scan`].
    pub async fn load(&self) -> Result<Ledger, LedgerError> {
        let raw = match fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No snapshot found, starting empty");
                return Ok(Ledger::new());
            }
            Err(source) => {
                return Err(LedgerError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let corrupt = |source: serde_json::Error| LedgerError::Corrupt {
            path: self.path.clone(),
            source,
        };
        let snapshot: SnapshotIn = serde_json::from_slice(&raw).map_err(corrupt)?;

        let (version, collections) = match (snapshot.version, snapshot.collections) {
            (None, None) => {
                let legacy: LegacySnapshot = serde_json::from_slice(&raw).map_err(corrupt)?;
                return Ok(self.upgrade_legacy(legacy));
            }
            (version, collections) => (
                version.unwrap_or(SNAPSHOT_VERSION),
                collections.unwrap_or_default(),
            ),
        };

        if version > SNAPSHOT_VERSION {
            return Err(LedgerError::UnsupportedVersion {
                path: self.path.clone(),
                found: version,
                supported: SNAPSHOT_VERSION,
            });
        }

        Ok(Ledger::from_parts(collections, snapshot.scanning))
    }

    fn upgrade_legacy(&self, legacy: LegacySnapshot) -> Ledger {
        let scanning = legacy.0.last().map(|(collection, _)| collection.clone());
        tracing::info!(
            path = %self.path.display(),
            collections = legacy.0.len(),
            "Loaded unversioned snapshot, it will be rewritten in the current layout"
        );
        Ledger::from_parts(legacy.0.into_iter().collect(), scanning)
    }

    /// Write a full snapshot, replacing the previous one atomically.
    pub async fn save(&self, ledger: &Ledger) -> Result<(), LedgerError> {
        let body = serde_json::to_vec(&SnapshotOut {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            scanning: ledger.scanning(),
            collections: ledger.collections(),
        })
        .map_err(|source| LedgerError::Corrupt {
            path: self.path.clone(),
            source,
        })?;

        let part_path = sibling_path(&self.path, ".part");
        let write_err = |source| LedgerError::Write {
            path: part_path.clone(),
            source,
        };

        let mut file = fs::File::create(&part_path).await.map_err(write_err)?;
        file.write_all(&body).await.map_err(write_err)?;
        file.flush().await.map_err(write_err)?;
        file.sync_all().await.map_err(write_err)?;
        drop(file);

        fs::rename(&part_path, &self.path)
            .await
            .map_err(|source| LedgerError::Write {
                path: self.path.clone(),
                source,
            })?;

        tracing::debug!(
            path = %self.path.display(),
            bytes = body.len(),
            "Snapshot saved"
        );
        Ok(())
    }
}
