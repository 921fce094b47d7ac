//! JSON snapshot of the engine's owned tables.

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::access::ContentItem;
use crate::flash_sales::{FlashSale, Redemption};
use crate::payments::{AuditEntry, CreatorPayee, ProofBinding};
use crate::purchases::Purchase;
use crate::subscriptions::Subscription;

pub const SNAPSHOT_VERSION: u32 = 1;

/// Everything needed to rebuild the engine's state after a restart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSnapshot {
    pub version: u32,
    pub saved_at: u64,
    pub subscriptions: Vec<Subscription>,
    pub sales: Vec<FlashSale>,
    pub redemptions: Vec<Redemption>,
    pub purchases: Vec<Purchase>,
    pub audit_entries: Vec<AuditEntry>,
    pub proof_bindings: Vec<(String, ProofBinding)>,
    pub content: Vec<ContentItem>,
    pub payees: Vec<CreatorPayee>,
}

impl EngineSnapshot {
    pub fn record_count(&self) -> usize {
        self.subscriptions.len()
            + self.sales.len()
            + self.redemptions.len()
            + self.purchases.len()
            + self.audit_entries.len()
            + self.content.len()
            + self.payees.len()
    }
}

/// File-backed snapshot location.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot, or `None` when no file exists yet.
    pub fn load(&self) -> std::io::Result<Option<EngineSnapshot>> {
        if !self.path.exists() {
            tracing::info!(path = %self.path.display(), "No snapshot found, starting empty");
            return Ok(None);
        }

        let file = File::open(&self.path)?;
        let snapshot: EngineSnapshot = serde_json::from_reader(BufReader::new(file))?;
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "snapshot version {} is newer than supported version {}",
                    snapshot.version, SNAPSHOT_VERSION
                ),
            ));
        }

        tracing::info!(
            path = %self.path.display(),
            records = snapshot.record_count(),
            saved_at = snapshot.saved_at,
            "Loaded snapshot"
        );
        Ok(Some(snapshot))
    }

    /// Write the snapshot atomically.
    pub fn save(&self, snapshot: &EngineSnapshot) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer(&mut writer, snapshot)?;
            writer.flush()?;
        }
        fs::rename(&tmp, &self.path)?;

        tracing::info!(
            path = %self.path.display(),
            records = snapshot.record_count(),
            "Saved snapshot"
        );
        Ok(())
    }
}
