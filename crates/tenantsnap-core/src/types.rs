//! Identity and row types shared across tenantsnap crates.
//!
//! A tenant-table is the logical unit of backup and restore. Physical tables
//! in the underlying store may hold rows for many tenant-tables; the mapping
//! provider translates between the two views.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A logical table belonging to one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantTable {
    pub tenant_id: String,
    pub virtual_table_name: String,
}

impl TenantTable {
    pub fn new(tenant_id: impl Into<String>, virtual_table_name: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            virtual_table_name: virtual_table_name.into(),
        }
    }

    /// Attach a backup name, producing the key rows are accounted under.
    pub fn in_backup(&self, backup_name: &str) -> TenantTableKey {
        TenantTableKey {
            backup_name: backup_name.to_string(),
            tenant_id: self.tenant_id.clone(),
            virtual_table_name: self.virtual_table_name.clone(),
        }
    }
}

impl fmt::Display for TenantTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.tenant_id, self.virtual_table_name)
    }
}

/// One logical tenant-table's accounted rows within one backup.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantTableKey {
    pub backup_name: String,
    pub tenant_id: String,
    pub virtual_table_name: String,
}

impl TenantTableKey {
    pub fn new(
        backup_name: impl Into<String>,
        tenant_id: impl Into<String>,
        virtual_table_name: impl Into<String>,
    ) -> Self {
        Self {
            backup_name: backup_name.into(),
            tenant_id: tenant_id.into(),
            virtual_table_name: virtual_table_name.into(),
        }
    }

    /// The tenant-table identity with the backup name dropped.
    pub fn tenant_table(&self) -> TenantTable {
        TenantTable::new(&self.tenant_id, &self.virtual_table_name)
    }
}

impl fmt::Display for TenantTableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}.{}",
            self.backup_name, self.tenant_id, self.virtual_table_name
        )
    }
}

/// A single key/value row as seen by the store.
///
/// Bytes are opaque to tenantsnap; they serialize as lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    #[serde(with = "hex_bytes")]
    pub key: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub value: Vec<u8>,
}

impl Row {
    pub fn new(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A physical row attributed to its owning tenant-table.
///
/// `row` is the logical form, with any placement-specific key encoding
/// stripped by the mapping provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedRow {
    pub owner: TenantTable,
    pub row: Row,
}

/// Where a tenant-table's rows currently live in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PhysicalLocation {
    pub physical_table: String,
    /// Prepended to every logical row key on write (empty for table-per-tenant).
    #[serde(with = "hex_bytes")]
    pub key_prefix: Vec<u8>,
}

impl PhysicalLocation {
    pub fn new(physical_table: impl Into<String>, key_prefix: impl Into<Vec<u8>>) -> Self {
        Self {
            physical_table: physical_table.into(),
            key_prefix: key_prefix.into(),
        }
    }

    /// Encode a logical row into its physical form at this location.
    pub fn encode(&self, row: &Row) -> Row {
        let mut key = Vec::with_capacity(self.key_prefix.len() + row.key.len());
        key.extend_from_slice(&self.key_prefix);
        key.extend_from_slice(&row.key);
        Row {
            key,
            value: row.value.clone(),
        }
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

/// Current Unix epoch in milliseconds.
pub fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_serializes_bytes_as_hex() {
        let row = Row::new(b"k1".to_vec(), vec![0xde, 0xad]);
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"{"key":"6b31","value":"dead"}"#);

        let back: Row = serde_json::from_str(&json).unwrap();
        assert_eq!(back, row);
    }

    #[test]
    fn location_prefixes_row_key() {
        let loc = PhysicalLocation::new("mt_shared", b"t1.orders.".to_vec());
        let physical = loc.encode(&Row::new(b"42".to_vec(), b"v".to_vec()));
        assert_eq!(physical.key, b"t1.orders.42");
        assert_eq!(physical.value, b"v");
    }

    #[test]
    fn tenant_table_key_roundtrips_identity() {
        let tt = TenantTable::new("t1", "orders");
        let key = tt.in_backup("nightly");
        assert_eq!(key.backup_name, "nightly");
        assert_eq!(key.tenant_table(), tt);
        assert_eq!(key.to_string(), "nightly:t1.orders");
    }
}
