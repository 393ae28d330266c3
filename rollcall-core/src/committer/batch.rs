//! Pure batch shaping: split deliveries, collect lookup keys, project records.

use std::collections::{BTreeSet, HashMap};

use chrono::FixedOffset;

use crate::domain::{
    AttendanceRecord, Delivery, EntryId, LogEntry, MalformedEntry,
    RecordIdentity, RollNumber,
};

/// A claimed batch split by decode outcome, with events in log order.
#[derive(Debug, Default)]
pub struct ClaimedBatch {
    pub events: Vec<LogEntry>,
    pub malformed: Vec<MalformedEntry>,
}

impl ClaimedBatch {
    pub fn from_deliveries(deliveries: Vec<Delivery>) -> Self {
        let mut batch = Self::default();
        for delivery in deliveries {
            match delivery {
                Delivery::Event(entry) => batch.events.push(entry),
                Delivery::Malformed(entry) => batch.malformed.push(entry),
            }
        }
        batch.events.sort_by_key(|entry| entry.id);
        batch
    }

    pub fn len(&self) -> usize {
        self.events.len() + self.malformed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every id in the batch, malformed entries included.
    pub fn ids(&self) -> Vec<EntryId> {
        let mut ids: Vec<EntryId> = self
            .events
            .iter()
            .map(|entry| entry.id)
            .chain(self.malformed.iter().map(|entry| entry.id))
            .collect();
        ids.sort();
        ids
    }

    pub fn distinct_rolls(&self) -> Vec<RollNumber> {
        self.events
            .iter()
            .map(|entry| entry.event.roll_number.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

/// Project events into records, one per identity. When several events share
/// an identity the last one in log order wins.
pub fn build_records(
    events: &[LogEntry],
    names: &HashMap<RollNumber, String>,
    offset: FixedOffset,
    unknown_name: &str,
) -> Vec<AttendanceRecord> {
    let mut by_identity: HashMap<RecordIdentity, usize> = HashMap::new();
    let mut records: Vec<AttendanceRecord> = Vec::with_capacity(events.len());

    for entry in events {
        let name = names
            .get(&entry.event.roll_number)
            .map(String::as_str)
            .unwrap_or(unknown_name);
        let record = AttendanceRecord::from_event(&entry.event, name, offset);

        match by_identity.get(&record.identity()) {
            Some(&slot) => records[slot] = record,
            None => {
                by_identity.insert(record.identity(), records.len());
                records.push(record);
            }
        }
    }

    records
}
