use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::error::PipelineError;
use crate::types::{ActorType, AuditLog};

/// Seed hash for the first row of the chain (spec.md §4.6).
pub const GENESIS_HASH: &str = "genesis";

/// Everything needed to append one row; `hash`/`prev_hash`/`id`/`created_at`
/// are computed by the store, not the caller.
pub struct AuditEntry {
    pub entity_type: String,
    pub entity_id: String,
    pub event_type: String,
    pub actor_type: ActorType,
    pub actor_id: Option<String>,
    pub changes: serde_json::Value,
}

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> Result<AuditLog, PipelineError>;
    async fn last_hash(&self) -> String;
    async fn all(&self) -> Vec<AuditLog>;
}

/// In-process hash-chained audit log. The `(read last, compute, insert)`
/// critical section is serialized by holding `inner` across the whole
/// append, the single-writer discipline spec.md §9 calls for, expressed
/// with a plain `tokio::sync::Mutex` rather than a DB row lock since there
/// is no SQL backend in this crate.
pub struct InMemoryAuditStore {
    inner: Mutex<Vec<AuditLog>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Vec::new()),
        })
    }

    fn compute_hash(
        prev_hash: &str,
        entity_type: &str,
        entity_id: &str,
        event_type: &str,
        changes: &serde_json::Value,
        created_at: &chrono::DateTime<chrono::Utc>,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(prev_hash.as_bytes());
        hasher.update(entity_type.as_bytes());
        hasher.update(entity_id.as_bytes());
        hasher.update(event_type.as_bytes());
        hasher.update(changes.to_string().as_bytes());
        hasher.update(created_at.to_rfc3339().as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

impl Default for InMemoryAuditStore {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, entry: AuditEntry) -> Result<AuditLog, PipelineError> {
        let mut rows = self.inner.lock().await;

        let prev_hash = rows
            .last()
            .map(|r| r.hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        let created_at = chrono::Utc::now();

        let hash = Self::compute_hash(
            &prev_hash,
            &entry.entity_type,
            &entry.entity_id,
            &entry.event_type,
            &entry.changes,
            &created_at,
        );

        let row = AuditLog {
            id: uuid::Uuid::new_v4().to_string(),
            entity_type: entry.entity_type,
            entity_id: entry.entity_id,
            event_type: entry.event_type,
            actor_type: entry.actor_type,
            actor_id: entry.actor_id,
            changes: entry.changes,
            created_at,
            hash,
            prev_hash,
        };

        rows.push(row.clone());
        Ok(row)
    }

    async fn last_hash(&self) -> String {
        let rows = self.inner.lock().await;
        rows.last()
            .map(|r| r.hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string())
    }

    async fn all(&self) -> Vec<AuditLog> {
        self.inner.lock().await.clone()
    }
}

/// Recomputes the chain from scratch and compares against stored hashes;
/// used out-of-band (spec.md §9) to detect tampering, not on the hot path.
pub fn verify_chain(rows: &[AuditLog]) -> Result<(), String> {
    let mut prev_hash = GENESIS_HASH.to_string();
    for (i, row) in rows.iter().enumerate() {
        if row.prev_hash != prev_hash {
            return Err(format!("row {} has mismatched prev_hash", i));
        }
        let expected = InMemoryAuditStore::compute_hash(
            &prev_hash,
            &row.entity_type,
            &row.entity_id,
            &row.event_type,
            &row.changes,
            &row.created_at,
        );
        if expected != row.hash {
            return Err(format!("row {} hash does not match its recomputed value", i));
        }
        prev_hash = row.hash.clone();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(event_type: &str) -> AuditEntry {
        AuditEntry {
            entity_type: "submission".into(),
            entity_id: "sub-1".into(),
            event_type: event_type.into(),
            actor_type: ActorType::System,
            actor_id: None,
            changes: json!({ "status": event_type }),
        }
    }

    #[tokio::test]
    async fn test_first_row_chains_to_genesis() {
        let store = InMemoryAuditStore::new();
        let row = store.append(entry("queued")).await.unwrap();
        assert_eq!(row.prev_hash, GENESIS_HASH);
    }

    #[tokio::test]
    async fn test_chain_links_consecutive_rows() {
        let store = InMemoryAuditStore::new();
        let first = store.append(entry("queued")).await.unwrap();
        let second = store.append(entry("ocr_processing")).await.unwrap();
        assert_eq!(second.prev_hash, first.hash);
        assert_eq!(store.last_hash().await, second.hash);
    }

    #[tokio::test]
    async fn test_verify_chain_detects_tampering() {
        let store = InMemoryAuditStore::new();
        store.append(entry("queued")).await.unwrap();
        store.append(entry("ocr_processing")).await.unwrap();

        let mut rows = store.all().await;
        assert!(verify_chain(&rows).is_ok());

        rows[0].changes = json!({ "status": "tampered" });
        assert!(verify_chain(&rows).is_err());
    }
}
