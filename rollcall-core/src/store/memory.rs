use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};

use async_trait::async_trait;
use parking_lot::RwLock;

use super::AttendanceStore;
use crate::{
    domain::{AttendanceRecord, RecordIdentity, RollNumber},
    error::StoreError,
};

/// In-process store with the same upsert semantics as the PostgreSQL
/// adapter, including the rejection of a batch that touches one identity
/// twice. Availability can be toggled to simulate an outage.
#[derive(Debug)]
pub struct MemoryAttendanceStore {
    students: RwLock<HashMap<RollNumber, String>>,
    records: RwLock<BTreeMap<RecordIdentity, AttendanceRecord>>,
    available: AtomicBool,
    commits: AtomicU64,
}

impl Default for MemoryAttendanceStore {
    fn default() -> Self {
        Self {
            students: RwLock::new(HashMap::new()),
            records: RwLock::new(BTreeMap::new()),
            available: AtomicBool::new(true),
            commits: AtomicU64::new(0),
        }
    }
}

impl MemoryAttendanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_students<I, R, N>(students: I) -> Self
    where
        I: IntoIterator<Item = (R, N)>,
        R: Into<String>,
        N: Into<String>,
    {
        let store = Self::default();
        for (roll, name) in students {
            store.add_student(roll, name);
        }
        store
    }

    /// Register a reference row. Blank roll numbers are ignored.
    pub fn add_student(
        &self,
        roll: impl Into<String>,
        name: impl Into<String>,
    ) {
        if let Ok(roll) = RollNumber::parse(&roll.into()) {
            self.students.write().insert(roll, name.into());
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of successful, non-empty upsert transactions.
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn records(&self) -> Vec<AttendanceRecord> {
        self.records.read().values().cloned().collect()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("connection refused".to_string()))
        }
    }
}

#[async_trait]
impl AttendanceStore for MemoryAttendanceStore {
    async fn resolve_names(
        &self,
        rolls: &[RollNumber],
    ) -> Result<HashMap<RollNumber, String>, StoreError> {
        self.check_available()?;
        let students = self.students.read();
        Ok(rolls
            .iter()
            .filter_map(|roll| {
                students.get(roll).map(|name| (roll.clone(), name.clone()))
            })
            .collect())
    }

    async fn upsert_batch(
        &self,
        records: &[AttendanceRecord],
    ) -> Result<u64, StoreError> {
        self.check_available()?;
        if records.is_empty() {
            return Ok(0);
        }

        let mut seen = HashSet::with_capacity(records.len());
        if let Some(duplicate) =
            records.iter().find(|record| !seen.insert(record.identity()))
        {
            return Err(StoreError::Query(format!(
                "ON CONFLICT DO UPDATE command cannot affect row a second \
                 time (roll_no={}, date={}, class_id={})",
                duplicate.roll_number, duplicate.date, duplicate.class_id
            )));
        }

        let mut stored = self.records.write();
        for record in records {
            stored.insert(record.identity(), record.clone());
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(records.len() as u64)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ClassId;
    use chrono::{NaiveDate, NaiveTime};

    fn record(roll: &str, name: &str, hour: u32) -> AttendanceRecord {
        AttendanceRecord {
            roll_number: RollNumber::parse(roll).unwrap(),
            display_name: name.to_string(),
            class_id: ClassId::parse("7").unwrap(),
            date: NaiveDate::from_ymd_opt(2025, 3, 14).unwrap(),
            time: NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn second_write_for_an_identity_replaces_name_and_time() {
        let store = MemoryAttendanceStore::new();
        store.upsert_batch(&[record("42", "Unknown", 9)]).await.unwrap();
        store.upsert_batch(&[record("42", "Ada", 10)]).await.unwrap();

        assert_eq!(store.records(), vec![record("42", "Ada", 10)]);
        assert_eq!(store.commit_count(), 2);
    }

    #[tokio::test]
    async fn batch_touching_one_identity_twice_is_rejected_whole() {
        let store = MemoryAttendanceStore::new();
        let err = store
            .upsert_batch(&[record("1", "A", 9), record("1", "A", 10)])
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::Query(_)));
        assert!(store.records().is_empty());
    }

    #[tokio::test]
    async fn unavailable_store_fails_transiently() {
        let store = MemoryAttendanceStore::with_students([("42", "Ada")]);
        store.set_available(false);

        let roll = RollNumber::parse("42").unwrap();
        let err = store.resolve_names(&[roll.clone()]).await.unwrap_err();
        assert!(err.is_transient());

        store.set_available(true);
        let names = store.resolve_names(&[roll.clone()]).await.unwrap();
        assert_eq!(names.get(&roll).map(String::as_str), Some("Ada"));
    }
}
