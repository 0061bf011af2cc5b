//! Restart-capable snapshots of an in-flight scan.
//!
//! A checkpoint is everything a successor execution needs to pick a scan
//! up at a batch boundary: accumulated results, undispatched
//! repositories, the global offset, the batch size in force, and how many
//! times the scan has been re-seeded. Files are written atomically
//! (temp file then rename) and are sealed with the payload codec when an
//! encryption key is configured.

use crate::codec::PayloadCodec;
use crate::scan::model::{RepoInfo, RepoSecurityResult};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info};

/// Bumped when the on-disk layout changes incompatibly.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Marker prefixed to sealed checkpoint files. Plain files start with
/// JSON and keep loading after an encryption key is introduced.
const SEALED_MAGIC: &[u8] = b"VGLS";

/// Where the successor execution re-enters its loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckpointPhase {
    /// Between batches; dispatch continues immediately.
    Scanning,
    /// Inside a pause; sleep out the remainder of the deadline before
    /// dispatching.
    Paused { resume_at: DateTime<Utc> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub version: u32,
    pub org: String,
    pub results: Vec<RepoSecurityResult>,
    pub remaining: Vec<RepoInfo>,
    pub offset: usize,
    pub batch_size: usize,
    pub continuation_count: u32,
    pub phase: CheckpointPhase,
    pub saved_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Total repositories in the scan: everything already dispatched plus
    /// everything still queued.
    pub fn total_repos(&self) -> usize {
        self.offset + self.remaining.len()
    }
}

/// Persists checkpoints under one directory, one file per organization.
#[derive(Clone)]
pub struct CheckpointManager {
    dir: PathBuf,
    codec: Option<PayloadCodec>,
}

impl CheckpointManager {
    /// `dir` is created on first save.
    pub fn new(dir: impl Into<PathBuf>, codec: Option<PayloadCodec>) -> Self {
        Self { dir: dir.into(), codec }
    }

    fn path_for(&self, org: &str) -> PathBuf {
        self.dir.join(format!("{}.checkpoint", sanitize(org)))
    }

    pub async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create checkpoint directory {}", self.dir.display()))?;
        let json = serde_json::to_vec_pretty(checkpoint).context("Failed to serialize checkpoint")?;
        let bytes = match &self.codec {
            Some(codec) => {
                let mut sealed = SEALED_MAGIC.to_vec();
                sealed.extend(codec.seal(&json).context("Failed to seal checkpoint")?);
                sealed
            }
            None => json,
        };

        let path = self.path_for(&checkpoint.org);
        let tmp = self.dir.join(format!("{}.checkpoint.tmp", sanitize(&checkpoint.org)));
        tokio::fs::write(&tmp, &bytes)
            .await
            .with_context(|| format!("Failed to write checkpoint to {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("Failed to move checkpoint into place at {}", path.display()))?;
        debug!(
            "Saved checkpoint for '{}': offset {}, {} remaining",
            checkpoint.org,
            checkpoint.offset,
            checkpoint.remaining.len()
        );
        Ok(())
    }

    pub async fn load(&self, org: &str) -> Result<Checkpoint> {
        let path = self.path_for(org);
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("No saved scan for '{org}' at {}", path.display()))?;

        let json = if let Some(sealed) = bytes.strip_prefix(SEALED_MAGIC) {
            let codec = self.codec.as_ref().ok_or_else(|| {
                anyhow!("checkpoint for '{org}' is sealed; configure the encryption key to open it")
            })?;
            codec
                .open(sealed)
                .with_context(|| format!("Failed to open sealed checkpoint for '{org}'"))?
        } else {
            bytes
        };

        let checkpoint: Checkpoint =
            serde_json::from_slice(&json).context("Failed to parse checkpoint")?;
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(anyhow!(
                "checkpoint version {} is not supported (expected {}); start a fresh scan",
                checkpoint.version,
                CHECKPOINT_VERSION
            ));
        }
        info!(
            "Loaded checkpoint for '{org}': {}/{} repositories processed",
            checkpoint.offset,
            checkpoint.total_repos()
        );
        Ok(checkpoint)
    }

    pub async fn exists(&self, org: &str) -> bool {
        tokio::fs::metadata(self.path_for(org)).await.is_ok()
    }

    /// Remove the saved checkpoint. Returns whether one existed.
    pub async fn delete(&self, org: &str) -> Result<bool> {
        let path = self.path_for(org);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(error) => {
                Err(error).with_context(|| format!("Failed to delete checkpoint at {}", path.display()))
            }
        }
    }

    /// Organizations with a saved checkpoint.
    pub async fn list(&self) -> Result<Vec<String>> {
        let mut orgs = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(orgs),
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("Failed to read checkpoint directory {}", self.dir.display()))
            }
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if let Some(org) = name.to_string_lossy().strip_suffix(".checkpoint") {
                orgs.push(org.to_string());
            }
        }
        orgs.sort();
        Ok(orgs)
    }
}

/// Keep checkpoint filenames flat even for hostile organization strings.
fn sanitize(org: &str) -> String {
    org.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect()
}
