//! redb table definitions for the Rollgate state store.

use redb::TableDefinition;

/// Cluster registrations keyed by cluster id.
pub const CLUSTERS: TableDefinition<&str, &[u8]> = TableDefinition::new("clusters");

/// Audit records keyed by a monotonically increasing sequence number.
pub const AUDIT_LOG: TableDefinition<u64, &[u8]> = TableDefinition::new("audit_log");
