use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::{MediaRecord, SortBy};

/// Secret recorded when no real secret could be generated
pub const SECRET_UNAVAILABLE: &str = "ERROR_GENERATING_KEY";

/// A public identifier plus the secret that controls it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub identifier: String,
    pub secret: String,
}

pub trait IdentifierGenerator: Send + Sync {
    fn generate(&self) -> Result<Identity>;
}

/// Random Ed25519 keypairs
#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519Generator;

impl IdentifierGenerator for Ed25519Generator {
    fn generate(&self) -> Result<Identity> {
        let signing_key = SigningKey::generate(&mut OsRng);
        let public = signing_key.verifying_key().to_bytes();
        let digest = format!("{:x}", Sha256::digest(public));

        Ok(Identity {
            identifier: format!("1{}", &digest[..33]),
            secret: to_hex(&signing_key.to_bytes()),
        })
    }
}

/// Deterministic identifiers with no usable secret.
///
/// The same seed always produces the same sequence, so the engine behaves
/// identically whichever generator is wired in.
#[derive(Debug)]
pub struct LocalIdentifierGenerator {
    seed: u64,
    next: AtomicU64,
}

impl LocalIdentifierGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            next: AtomicU64::new(0),
        }
    }
}

impl Default for LocalIdentifierGenerator {
    fn default() -> Self {
        Self::new(0)
    }
}

impl IdentifierGenerator for LocalIdentifierGenerator {
    fn generate(&self) -> Result<Identity> {
        let sequence = self.next.fetch_add(1, Ordering::Relaxed);
        let mut hasher = Sha256::new();
        hasher.update(self.seed.to_le_bytes());
        hasher.update(sequence.to_le_bytes());
        let digest = format!("{:x}", hasher.finalize());

        Ok(Identity {
            identifier: format!("1{}", &digest[..33]),
            secret: SECRET_UNAVAILABLE.to_string(),
        })
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Secret that must be written next to a renamed file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretArtifact {
    pub identity: Identity,
}

impl SecretArtifact {
    pub fn file_name(&self) -> String {
        format!("{}_private_key.txt", self.identity.identifier)
    }

    pub fn render(&self, associated_file: &str) -> String {
        let Identity { identifier, secret } = &self.identity;
        format!(
            "Private Key for {identifier}\n\n\
             Private Key: {secret}\n\n\
             WARNING: Keep this file secure! Anyone with this private key controls the identifier {identifier}.\n\
             Identifier: {identifier}\n\
             Associated File: {associated_file}"
        )
    }

    /// Write the secret beside `target`, refusing to replace an existing file
    pub fn write_beside(&self, target: &Path) -> Result<PathBuf> {
        let dir = target.parent().unwrap_or_else(|| Path::new("."));
        let path = dir.join(self.file_name());
        let associated = crate::utils::display_name(target);

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("Failed to create secret file {}", path.display()))?;
        file.write_all(self.render(&associated).as_bytes())
            .with_context(|| format!("Failed to write secret file {}", path.display()))?;

        Ok(path)
    }
}

/// Base name for a file plus the secret to store alongside it, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedName {
    pub base_name: String,
    pub secret: Option<SecretArtifact>,
}

/// Sortable `YYYY-MM-DD_HH-MM-SS`
pub fn format_timestamp(date: &DateTime<Local>) -> String {
    date.format("%Y-%m-%d_%H-%M-%S").to_string()
}

/// `YYYY-MM-DD` subfolder name
pub fn date_folder_name(date: &DateTime<Local>) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Turns a record into its new base name
pub struct Namer {
    generator: Box<dyn IdentifierGenerator>,
    fallback: LocalIdentifierGenerator,
}

impl Namer {
    pub fn new(generator: Box<dyn IdentifierGenerator>) -> Self {
        Self {
            generator,
            fallback: LocalIdentifierGenerator::new(fallback_seed()),
        }
    }

    pub fn set_generator(&mut self, generator: Box<dyn IdentifierGenerator>) {
        self.generator = generator;
    }

    pub fn derive(&self, record: &MediaRecord, sort_by: SortBy) -> DerivedName {
        match sort_by {
            // Color only orders the batch; names still come from the date.
            SortBy::Date | SortBy::Color => DerivedName {
                base_name: format_timestamp(&record.effective_date()),
                secret: None,
            },
            SortBy::Identifier => {
                let identity = self.identity();
                debug!("Generated identifier {} for {}", identity.identifier, record.file_name());
                DerivedName {
                    base_name: identity.identifier.clone(),
                    secret: Some(SecretArtifact { identity }),
                }
            }
        }
    }

    fn identity(&self) -> Identity {
        match self.generator.generate() {
            Ok(identity) => identity,
            Err(e) => {
                warn!("Identifier generator failed, using local fallback: {e:#}");
                Identity {
                    identifier: self.fallback_identifier(),
                    secret: SECRET_UNAVAILABLE.to_string(),
                }
            }
        }
    }

    fn fallback_identifier(&self) -> String {
        self.fallback
            .generate()
            .map(|identity| identity.identifier)
            .unwrap_or_else(|_| format!("1{:033x}", fallback_seed()))
    }
}

impl Default for Namer {
    fn default() -> Self {
        Self::new(Box::new(Ed25519Generator))
    }
}

fn fallback_seed() -> u64 {
    rand::random()
}
