//! Sample types shared by the store, the sampler and the sync engine.

use serde::ser::SerializeTuple;
use serde::{Deserialize, Serialize, Serializer};

/// Identifier assigned by the store on insert.
pub type SampleId = i64;

/// One timestamped observation of the monitored metric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub id: SampleId,
    pub producer_id: String,
    /// Milliseconds since the Unix epoch, captured at sample time.
    pub timestamp: i64,
    pub value: i64,
    pub synced: bool,
}

impl Sample {
    /// The wire row for this sample.
    pub fn to_row(&self) -> SampleRow {
        SampleRow {
            producer_id: self.producer_id.clone(),
            timestamp: self.timestamp,
            value: self.value,
        }
    }
}

/// A sample as sent to the remote sink: `[producer_id, timestamp, value]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRow {
    pub producer_id: String,
    pub timestamp: i64,
    pub value: i64,
}

impl Serialize for SampleRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut row = serializer.serialize_tuple(3)?;
        row.serialize_element(&self.producer_id)?;
        row.serialize_element(&self.timestamp)?;
        row.serialize_element(&self.value)?;
        row.end()
    }
}

/// The ordered set of unsynced rows sent together in one sync cycle.
///
/// `ids[i]` is the store id of `rows[i]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    ids: Vec<SampleId>,
    rows: Vec<SampleRow>,
}

impl Batch {
    pub fn from_samples(samples: &[Sample]) -> Self {
        let (ids, rows) = samples.iter().map(|s| (s.id, s.to_row())).unzip();
        Self { ids, rows }
    }

    pub fn ids(&self) -> &[SampleId] {
        &self.ids
    }

    pub fn rows(&self) -> &[SampleRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
