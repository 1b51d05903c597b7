//! Persisted layout of ledger records.
//!
//! The in-memory [`BackupJob`] keys counts by [`TenantTableKey`]; on disk the
//! backup name is stored once and counts become a flat list, which keeps the
//! JSON readable and independent of how tenants are placed physically.

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};

use tenantsnap_core::{BackupJob, BackupStatus, Segment, SegmentKey, TenantTableKey};

use crate::error::{LedgerError, LedgerResult};

/// Format version written into every new record.
pub const LEDGER_FORMAT_VERSION: &str = "1.0.0";

/// Record versions this build can read.
pub const SUPPORTED_FORMATS: &str = "^1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantTableCount {
    pub tenant_id: String,
    pub virtual_table_name: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub format_version: String,
    pub name: String,
    pub status: BackupStatus,
    pub creation_time: u64,
    pub tenant_tables: Vec<TenantTableCount>,
    #[serde(default)]
    pub merged_tables: Vec<String>,
}

impl From<&BackupJob> for LedgerRecord {
    fn from(job: &BackupJob) -> Self {
        Self {
            format_version: LEDGER_FORMAT_VERSION.to_string(),
            name: job.name.clone(),
            status: job.status,
            creation_time: job.creation_time,
            tenant_tables: job
                .tenant_tables
                .iter()
                .map(|(key, count)| TenantTableCount {
                    tenant_id: key.tenant_id.clone(),
                    virtual_table_name: key.virtual_table_name.clone(),
                    count: *count,
                })
                .collect(),
            merged_tables: job.merged_tables.iter().cloned().collect(),
        }
    }
}

impl LedgerRecord {
    pub fn encode(job: &BackupJob) -> LedgerResult<Vec<u8>> {
        serde_json::to_vec(&LedgerRecord::from(job))
            .map_err(|e| LedgerError::Serialize(e.to_string()))
    }

    pub fn decode(bytes: &[u8]) -> LedgerResult<BackupJob> {
        let record: LedgerRecord =
            serde_json::from_slice(bytes).map_err(|e| LedgerError::Deserialize(e.to_string()))?;
        record.check_format()?;
        Ok(record.into_job())
    }

    fn check_format(&self) -> LedgerResult<()> {
        let incompatible = || LedgerError::IncompatibleFormat {
            found: self.format_version.clone(),
            supported: SUPPORTED_FORMATS.to_string(),
        };
        let version = Version::parse(&self.format_version).map_err(|_| incompatible())?;
        let supported = VersionReq::parse(SUPPORTED_FORMATS)
            .map_err(|e| LedgerError::Deserialize(e.to_string()))?;
        if supported.matches(&version) {
            Ok(())
        } else {
            Err(incompatible())
        }
    }

    fn into_job(self) -> BackupJob {
        let mut job = BackupJob::new(self.name, self.creation_time);
        job.status = self.status;
        for entry in self.tenant_tables {
            let key = TenantTableKey::new(&job.name, entry.tenant_id, entry.virtual_table_name);
            job.tenant_tables.insert(key, entry.count);
        }
        job.merged_tables.extend(self.merged_tables);
        job
    }
}

/// Segment value as stored: the full address travels with the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentEntry {
    pub key: SegmentKey,
    pub segment: Segment,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenantsnap_core::{BackupDelta, TenantTable};

    fn sample_job() -> BackupJob {
        let mut delta = BackupDelta::for_table("nightly", "p1");
        delta.record(&TenantTable::new("t1", "orders"), u64::MAX - 1);
        delta.record(&TenantTable::new("t2", "users"), 5);
        BackupJob::new("nightly", 1_700_000_000_000)
            .merge(&delta)
            .unwrap()
    }

    #[test]
    fn record_preserves_job() {
        let job = sample_job();
        let bytes = LedgerRecord::encode(&job).unwrap();
        let back = LedgerRecord::decode(&bytes).unwrap();

        assert_eq!(back, job);
        assert_eq!(
            back.row_count(&TenantTable::new("t1", "orders")),
            Some(u64::MAX - 1)
        );
    }

    #[test]
    fn record_layout_is_flat() {
        let bytes = LedgerRecord::encode(&sample_job()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(value["format_version"], "1.0.0");
        assert_eq!(value["status"], "IN_PROGRESS");
        assert_eq!(value["tenant_tables"][1]["tenant_id"], "t2");
        assert_eq!(value["tenant_tables"][1]["count"], 5);
        assert_eq!(value["merged_tables"][0], "p1");
    }

    #[test]
    fn newer_major_format_is_rejected() {
        let mut record = LedgerRecord::from(&sample_job());
        record.format_version = "2.0.0".into();
        let bytes = serde_json::to_vec(&record).unwrap();

        let err = LedgerRecord::decode(&bytes).unwrap_err();
        assert!(matches!(err, LedgerError::IncompatibleFormat { .. }));
    }

    #[test]
    fn minor_format_bump_is_readable() {
        let mut record = LedgerRecord::from(&sample_job());
        record.format_version = "1.3.0".into();
        let bytes = serde_json::to_vec(&record).unwrap();
        assert!(LedgerRecord::decode(&bytes).is_ok());
    }
}
