//! StateStore — redb-backed state persistence for Rollgate.
//!
//! Provides typed operations over cluster registrations and the audit
//! trail. All values are JSON-serialized into redb's `&[u8]` value
//! columns. The store supports both on-disk and in-memory backends (the
//! latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path)?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder().create_with_backend(backend)?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write()?;
        txn.open_table(CLUSTERS)?;
        txn.open_table(AUDIT_LOG)?;
        txn.commit()?;
        Ok(())
    }

    // ── Clusters ───────────────────────────────────────────────────

    /// Insert or update a cluster registration.
    pub fn put_cluster(&self, cluster: &ClusterRecord) -> StateResult<()> {
        let value = serde_json::to_vec(cluster).map_err(StateError::codec("clusters"))?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(CLUSTERS)?;
            table.insert(cluster.id.as_str(), value.as_slice())?;
        }
        txn.commit()?;
        debug!(id = %cluster.id, "cluster stored");
        Ok(())
    }

    pub fn get_cluster(&self, id: &str) -> StateResult<Option<ClusterRecord>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CLUSTERS)?;
        match table.get(id)? {
            Some(guard) => {
                let cluster: ClusterRecord = serde_json::from_slice(guard.value())
                    .map_err(StateError::codec("clusters"))?;
                Ok(Some(cluster))
            }
            None => Ok(None),
        }
    }

    /// List all clusters, ordered by id.
    pub fn list_clusters(&self) -> StateResult<Vec<ClusterRecord>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CLUSTERS)?;
        let mut results = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            let cluster: ClusterRecord = serde_json::from_slice(value.value())
                .map_err(StateError::codec("clusters"))?;
            results.push(cluster);
        }
        Ok(results)
    }

    /// Delete a cluster by id. Returns true if it existed.
    pub fn delete_cluster(&self, id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write()?;
        let existed;
        {
            let mut table = txn.open_table(CLUSTERS)?;
            existed = table.remove(id)?.is_some();
        }
        txn.commit()?;
        debug!(%id, existed, "cluster deleted");
        Ok(existed)
    }

    // ── Audit log ──────────────────────────────────────────────────

    /// Append an audit entry and return the stored record.
    ///
    /// The sequence number is allocated inside the write transaction, so
    /// concurrent appends never share a key.
    pub fn append_audit(&self, entry: &NewAuditRecord) -> StateResult<AuditRecord> {
        let txn = self.db.begin_write()?;
        let record;
        {
            let mut table = txn.open_table(AUDIT_LOG)?;
            let seq = table
                .last()?
                .map(|(key, _)| key.value() + 1)
                .unwrap_or(1);
            record = AuditRecord {
                seq,
                entry: entry.clone(),
            };
            let value = serde_json::to_vec(&record).map_err(StateError::codec("audit_log"))?;
            table.insert(seq, value.as_slice())?;
        }
        txn.commit()?;
        debug!(
            seq = record.seq,
            action = %record.entry.action,
            name = %record.entry.name,
            "audit record appended"
        );
        Ok(record)
    }

    /// Most recent audit records, newest first.
    pub fn list_audit(&self, limit: usize) -> StateResult<Vec<AuditRecord>> {
        self.scan_audit(limit, |_| true)
    }

    /// Most recent audit records for one workload, newest first.
    pub fn list_audit_for(
        &self,
        cluster: &str,
        namespace: &str,
        name: &str,
        limit: usize,
    ) -> StateResult<Vec<AuditRecord>> {
        self.scan_audit(limit, |r| {
            r.entry.cluster == cluster && r.entry.namespace == namespace && r.entry.name == name
        })
    }

    fn scan_audit<F>(&self, limit: usize, keep: F) -> StateResult<Vec<AuditRecord>>
    where
        F: Fn(&AuditRecord) -> bool,
    {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(AUDIT_LOG)?;
        let mut results = Vec::new();
        for entry in table.iter()?.rev() {
            if results.len() >= limit {
                break;
            }
            let (_, value) = entry?;
            let record: AuditRecord = serde_json::from_slice(value.value())
                .map_err(StateError::codec("audit_log"))?;
            if keep(&record) {
                results.push(record);
            }
        }
        Ok(results)
    }
}
