//! Durable spillover queue for payloads that exhausted their retry chain.
//!
//! Layout: one `msg_<epoch-ms>.json` file per undelivered payload, holding the
//! raw [`WebhookPayload`] object. Files are written through
//! [`puente_core::write_bytes_atomic`], so a crash leaves either the complete
//! file or only a dot-prefixed temp file that listings ignore.
//!
//! The store is the only component that touches this directory.

use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use puente_core::{current_unix_timestamp_ms, write_bytes_atomic};
use thiserror::Error;

use crate::webhook_payload::WebhookPayload;

pub const DEFAULT_SPOOL_DIR: &str = "cola_mensajes";

const QUEUED_EVENT_PREFIX: &str = "msg_";
const QUEUED_EVENT_SUFFIX: &str = ".json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
/// Identifier of a queued event: its creation time in epoch milliseconds.
pub struct QueuedEventId(u64);

impl QueuedEventId {
    pub fn from_unix_ms(unix_ms: u64) -> Self {
        Self(unix_ms)
    }

    pub fn created_unix_ms(self) -> u64 {
        self.0
    }

    pub fn file_name(self) -> String {
        format!("{QUEUED_EVENT_PREFIX}{}{QUEUED_EVENT_SUFFIX}", self.0)
    }

    /// Parses `msg_<digits>.json`; anything else is not a queued event.
    pub fn parse_file_name(name: &str) -> Option<Self> {
        let digits = name
            .strip_prefix(QUEUED_EVENT_PREFIX)?
            .strip_suffix(QUEUED_EVENT_SUFFIX)?;
        if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
            return None;
        }
        digits.parse::<u64>().ok().map(Self)
    }
}

impl fmt::Display for QueuedEventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{QUEUED_EVENT_PREFIX}{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// One undelivered payload persisted in the spillover directory.
pub struct QueuedEvent {
    pub id: QueuedEventId,
    pub payload: WebhookPayload,
    pub path: PathBuf,
}

impl QueuedEvent {
    pub fn created_unix_ms(&self) -> u64 {
        self.id.created_unix_ms()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A `msg_*.json` file whose content could not be read or decoded.
pub struct UnreadableQueuedEvent {
    pub path: PathBuf,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpilloverListing {
    /// Decoded events, oldest identifier first.
    pub events: Vec<QueuedEvent>,
    pub unreadable: Vec<UnreadableQueuedEvent>,
}

#[derive(Debug, Error)]
/// Persistence failures of the spillover directory.
pub enum SpilloverError {
    #[error("failed to prepare spillover directory {}: {source}", .path.display())]
    Prepare {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode queued payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to persist queued event {}: {detail}", .path.display())]
    Write { path: PathBuf, detail: String },
    #[error("failed to list spillover directory {}: {source}", .path.display())]
    List {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to remove queued event {}: {source}", .path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("spillover file task failed: {0}")]
    Join(String),
}

#[derive(Debug)]
/// Public struct `SpilloverStore` owning the on-disk queue directory.
pub struct SpilloverStore {
    dir: PathBuf,
    last_issued_unix_ms: AtomicU64,
}

impl SpilloverStore {
    /// Opens (and creates when missing) the spillover directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, SpilloverError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| SpilloverError::Prepare {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            last_issued_unix_ms: AtomicU64::new(0),
        })
    }

    pub fn dir(&self) -> &Path {
        self.dir.as_path()
    }

    /// Persists `payload` as a new queued event under a fresh identifier.
    pub fn enqueue(&self, payload: &WebhookPayload) -> Result<QueuedEvent, SpilloverError> {
        let encoded = serde_json::to_vec(payload)?;
        let id = self.allocate_id();
        let path = self.dir.join(id.file_name());
        if let Err(error) = write_bytes_atomic(&path, &encoded) {
            tracing::error!(
                file = %path.display(),
                error = %format!("{error:#}"),
                "failed to persist queued event"
            );
            return Err(SpilloverError::Write {
                path,
                detail: format!("{error:#}"),
            });
        }
        tracing::warn!(
            file = %id.file_name(),
            remitente = %payload.remitente,
            "payload saved to local queue"
        );
        Ok(QueuedEvent {
            id,
            payload: payload.clone(),
            path,
        })
    }

    /// Loads every queued event, oldest identifier first.
    ///
    /// A missing directory is an empty queue. Files that fail to decode are
    /// returned in [`SpilloverListing::unreadable`] and stay on disk.
    pub fn list_pending(&self) -> Result<SpilloverListing, SpilloverError> {
        let mut listing = SpilloverListing::default();
        for (id, path) in self.scan_queued_files()? {
            let raw = match std::fs::read(&path) {
                Ok(raw) => raw,
                Err(error) if error.kind() == ErrorKind::NotFound => continue,
                Err(error) => {
                    listing.unreadable.push(UnreadableQueuedEvent {
                        path,
                        detail: format!("read failed: {error}"),
                    });
                    continue;
                }
            };
            match serde_json::from_slice::<WebhookPayload>(&raw) {
                Ok(payload) => listing.events.push(QueuedEvent { id, payload, path }),
                Err(error) => listing.unreadable.push(UnreadableQueuedEvent {
                    path,
                    detail: format!("decode failed: {error}"),
                }),
            }
        }
        Ok(listing)
    }

    /// Deletes a delivered event. A file that is already gone counts as removed.
    pub fn remove(&self, event: &QueuedEvent) -> Result<(), SpilloverError> {
        match std::fs::remove_file(&event.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(SpilloverError::Remove {
                path: event.path.clone(),
                source,
            }),
        }
    }

    /// Number of `msg_*.json` files currently on disk.
    pub fn pending_count(&self) -> Result<usize, SpilloverError> {
        Ok(self.scan_queued_files()?.len())
    }

    fn allocate_id(&self) -> QueuedEventId {
        loop {
            let now_ms = current_unix_timestamp_ms();
            let previous = self
                .last_issued_unix_ms
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                    Some(now_ms.max(last.saturating_add(1)))
                })
                .unwrap_or_else(|last| last);
            let id = QueuedEventId(now_ms.max(previous.saturating_add(1)));
            // Files left by an earlier run may already use this millisecond.
            if !self.dir.join(id.file_name()).exists() {
                return id;
            }
        }
    }

    fn scan_queued_files(&self) -> Result<Vec<(QueuedEventId, PathBuf)>, SpilloverError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(SpilloverError::List {
                    path: self.dir.clone(),
                    source,
                })
            }
        };

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| SpilloverError::List {
                path: self.dir.clone(),
                source,
            })?;
            let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(QueuedEventId::parse_file_name)
            else {
                continue;
            };
            let path = entry.path();
            if path.is_file() {
                files.push((id, path));
            }
        }
        files.sort_by_key(|(id, _)| *id);
        Ok(files)
    }
}
