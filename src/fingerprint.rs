use std::fmt;
use std::fs::{self, File};
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::utils::{format_file_size, is_hidden};

static FALLBACK_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Content identity of a file.
///
/// Only `Digest` and `Sampled` are derived from file bytes. The other forms
/// are stand-ins for files that cannot (or should not) be read in full; each
/// variant is tagged so it never equals a real digest, and `Unreadable` /
/// `TimedOut` carry a token that is unique per call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub enum Fingerprint {
    /// SHA-256 of the whole file
    Digest(String),
    /// SHA-256 over the size and head/middle/tail samples of a large file
    Sampled { size: u64, digest: String },
    /// Dotfiles are identified by size and modification time only
    Hidden { size: u64, modified_ms: u128 },
    Unreadable { token: String },
    TimedOut { token: String },
}

impl Fingerprint {
    pub fn is_fallback(&self) -> bool {
        !matches!(self, Fingerprint::Digest(_))
    }

    /// First few characters, for log lines
    pub fn short(&self) -> String {
        self.to_string().chars().take(8).collect()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fingerprint::Digest(hex) => write!(f, "{hex}"),
            Fingerprint::Sampled { size, digest } => write!(f, "large_file_{size}_{digest}"),
            Fingerprint::Hidden { size, modified_ms } => {
                write!(f, "hidden_file_{size}_{modified_ms}")
            }
            Fingerprint::Unreadable { token } => write!(f, "error_file_{token}"),
            Fingerprint::TimedOut { token } => write!(f, "timeout_file_{token}"),
        }
    }
}

/// Computes fingerprints, never failing and never blocking past its timeout
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    size_ceiling: u64,
    sample_size: u64,
    timeout: Duration,
}

impl Fingerprinter {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            size_ceiling: config.hash_size_ceiling,
            sample_size: config.large_file_sample_size.max(1),
            timeout: config.hash_timeout(),
        }
    }

    /// Fingerprint a file.
    ///
    /// The work runs on a helper thread; if it has not answered within the
    /// timeout the batch moves on with a `TimedOut` identity and the helper
    /// is abandoned.
    pub fn fingerprint(&self, path: &Path) -> Fingerprint {
        let (tx, rx) = mpsc::channel();
        let worker = self.clone();
        let owned = path.to_path_buf();

        let spawned = thread::Builder::new()
            .name("fingerprint".to_string())
            .spawn(move || {
                let _ = tx.send(worker.compute(&owned));
            });

        if let Err(e) = spawned {
            warn!("Could not spawn hashing thread ({e}), hashing inline: {}", path.display());
            return self.compute(path);
        }

        match rx.recv_timeout(self.timeout) {
            Ok(fingerprint) => fingerprint,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                warn!("Timeout hashing file: {}", path.display());
                Fingerprint::TimedOut {
                    token: unique_token(path, None),
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                warn!("Hashing thread died for {}", path.display());
                Fingerprint::Unreadable {
                    token: unique_token(path, fs::metadata(path).ok()),
                }
            }
        }
    }

    fn compute(&self, path: &Path) -> Fingerprint {
        match self.try_compute(path) {
            Ok(fingerprint) => fingerprint,
            Err(e) => {
                warn!("Error hashing file {}: {e:#}", path.display());
                Fingerprint::Unreadable {
                    token: unique_token(path, fs::metadata(path).ok()),
                }
            }
        }
    }

    fn try_compute(&self, path: &Path) -> Result<Fingerprint> {
        let metadata = fs::metadata(path)
            .with_context(|| format!("Failed to get metadata for {}", path.display()))?;
        let size = metadata.len();

        if size > self.size_ceiling {
            debug!(
                "Sampling large file {} ({})",
                path.display(),
                format_file_size(size)
            );
            return self.sampled_digest(path, size);
        }

        if is_hidden(path) {
            return Ok(Fingerprint::Hidden {
                size,
                modified_ms: millis(metadata.modified().unwrap_or(UNIX_EPOCH)),
            });
        }

        let mut file = File::open(path)
            .with_context(|| format!("Failed to open file {}", path.display()))?;
        let mut hasher = Sha256::new();
        let mut buffer = vec![0; 64 * 1024];

        loop {
            let bytes_read = file
                .read(&mut buffer)
                .with_context(|| format!("Failed to read file {}", path.display()))?;

            if bytes_read == 0 {
                break;
            }

            hasher.update(&buffer[..bytes_read]);
        }

        Ok(Fingerprint::Digest(format!("{:x}", hasher.finalize())))
    }

    fn sampled_digest(&self, path: &Path, size: u64) -> Result<Fingerprint> {
        let mut file = File::open(path)
            .with_context(|| format!("Failed to open file {}", path.display()))?;
        let sample = self.sample_size.min(size);
        let offsets = [0, (size / 2).saturating_sub(sample / 2), size - sample];

        let mut hasher = Sha256::new();
        hasher.update(size.to_le_bytes());
        let mut buffer = vec![0; sample as usize];

        for offset in offsets {
            file.seek(SeekFrom::Start(offset))
                .with_context(|| format!("Failed to seek in {}", path.display()))?;
            file.read_exact(&mut buffer)
                .with_context(|| format!("Failed to read sample of {}", path.display()))?;
            hasher.update(&buffer);
        }

        Ok(Fingerprint::Sampled {
            size,
            digest: format!("{:x}", hasher.finalize()),
        })
    }
}

fn millis(time: SystemTime) -> u128 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

/// Token for identities that must match nothing else
fn unique_token(path: &Path, metadata: Option<fs::Metadata>) -> String {
    let sequence = FALLBACK_COUNTER.fetch_add(1, Ordering::Relaxed);
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let stats = metadata
        .map(|m| format!("{}_{}", m.len(), millis(m.modified().unwrap_or(UNIX_EPOCH))))
        .unwrap_or_else(|| "nostat".to_string());
    let path: PathBuf = crate::utils::resolve_path(path);
    format!("{stats}_{now}_{sequence}_{}", path.display())
}
