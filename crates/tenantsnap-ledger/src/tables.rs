//! redb table definitions for the backup ledger.
//!
//! Both tables use `&str` keys and `&[u8]` values (JSON-serialized records).
//! Key components are escaped so `/` only ever appears as a separator.

use redb::TableDefinition;

use tenantsnap_core::{SegmentKey, TenantTable};

/// Backup job records keyed by `{backup_name}`.
pub const BACKUPS: TableDefinition<&str, &[u8]> = TableDefinition::new("backups");

/// Segments keyed by `{backup}/{tenant}/{virtual_table}/{physical_table}/{sequence:020}`.
pub const SEGMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("segments");

/// Escape one key component.
pub fn escape(component: &str) -> String {
    component.replace('%', "%25").replace('/', "%2F")
}

/// Prefix shared by every segment of a backup.
pub fn backup_prefix(backup_name: &str) -> String {
    format!("{}/", escape(backup_name))
}

/// Prefix shared by every segment of one tenant-table in a backup.
pub fn tenant_table_prefix(backup_name: &str, owner: &TenantTable) -> String {
    format!(
        "{}/{}/{}/",
        escape(backup_name),
        escape(&owner.tenant_id),
        escape(&owner.virtual_table_name)
    )
}

/// Full table key of a segment. Zero-padded sequence keeps scan order numeric.
pub fn segment_key(key: &SegmentKey) -> String {
    format!(
        "{}{}/{:020}",
        tenant_table_prefix(&key.backup_name, &key.owner()),
        escape(&key.physical_table),
        key.sequence
    )
}

/// Escaped physical-table component of a full segment key.
pub fn physical_table_of(table_key: &str) -> Option<&str> {
    table_key.split('/').nth(3)
}
