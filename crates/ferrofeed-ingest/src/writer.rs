//! Idempotent persistence of canonical records.
//!
//! Records go to the warehouse in batches, one transaction per batch. A
//! natural-key conflict counts as success, so replaying an endpoint after a
//! crash is harmless. Once every batch of an endpoint is durable the
//! instrument checkpoint moves forward to that endpoint.

use std::sync::Arc;

use ferrofeed_core::endpoint;
use ferrofeed_core::{CanonicalRecord, Symbol};
use ferrofeed_warehouse::{CheckpointRow, RecordRow, Warehouse};
use serde::Serialize;

use crate::config::DEFAULT_WRITE_BATCH_SIZE;
use crate::indexer::{NoopTextIndexer, TextIndexer, TextUnit};
use crate::IngestError;

/// The `(instrument, endpoint)` pair a persist call completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistTarget {
    pub symbol: Symbol,
    pub endpoint: String,
}

impl PersistTarget {
    pub fn new(symbol: Symbol, endpoint: impl Into<String>) -> Self {
        Self {
            symbol,
            endpoint: endpoint.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PersistReport {
    /// Newly stored plus already present records.
    pub success_count: usize,
    pub failure_count: usize,
    pub duplicates: usize,
    pub errors: Vec<String>,
}

impl PersistReport {
    pub fn inserted(&self) -> usize {
        self.success_count - self.duplicates
    }

    pub fn is_complete(&self) -> bool {
        self.failure_count == 0
    }
}

pub struct Writer {
    warehouse: Warehouse,
    indexer: Arc<dyn TextIndexer>,
    batch_size: usize,
}

impl Writer {
    pub fn new(warehouse: Warehouse) -> Self {
        Self {
            warehouse,
            indexer: Arc::new(NoopTextIndexer),
            batch_size: DEFAULT_WRITE_BATCH_SIZE,
        }
    }

    pub fn with_indexer(mut self, indexer: Arc<dyn TextIndexer>) -> Self {
        self.indexer = indexer;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn warehouse(&self) -> &Warehouse {
        &self.warehouse
    }

    /// Store `records` for `target` and advance its checkpoint when all of
    /// them are durable.
    ///
    /// Batch failures are reported in the returned [`PersistReport`]; only a
    /// checkpoint store failure is an error.
    pub fn persist(
        &self,
        target: &PersistTarget,
        records: &[CanonicalRecord],
        epoch: u64,
        session_id: &str,
    ) -> Result<PersistReport, IngestError> {
        let mut report = PersistReport::default();

        for batch in records.chunks(self.batch_size) {
            let result = encode_batch(batch, epoch, session_id)
                .and_then(|rows| self.warehouse.insert_records(&rows).map_err(|e| e.to_string()));
            match result {
                Ok(inserted) => {
                    report.success_count += inserted.inserted + inserted.duplicates;
                    report.duplicates += inserted.duplicates;
                    self.index_text(batch, session_id);
                }
                Err(message) => {
                    tracing::warn!(
                        symbol = %target.symbol,
                        endpoint = %target.endpoint,
                        records = batch.len(),
                        error = %message,
                        "batch rolled back"
                    );
                    report.failure_count += batch.len();
                    report.errors.push(message);
                }
            }
        }

        if report.is_complete() {
            self.advance_checkpoint(target, epoch, session_id, report.inserted())?;
        }

        tracing::debug!(
            symbol = %target.symbol,
            endpoint = %target.endpoint,
            stored = report.success_count,
            duplicates = report.duplicates,
            failed = report.failure_count,
            "endpoint persisted"
        );
        Ok(report)
    }

    fn index_text(&self, batch: &[CanonicalRecord], session_id: &str) {
        for unit in batch
            .iter()
            .filter_map(|record| TextUnit::from_record(record, session_id))
        {
            if let Err(error) = self.indexer.index(&unit) {
                tracing::warn!(id = %unit.id, error = %error, "text indexing failed");
            }
        }
    }

    fn advance_checkpoint(
        &self,
        target: &PersistTarget,
        epoch: u64,
        session_id: &str,
        inserted: usize,
    ) -> Result<(), IngestError> {
        let epoch = epoch_column(epoch);
        let mut checkpoint = match self.warehouse.load_checkpoint(target.symbol.as_str())? {
            Some(existing) if existing.is_owned_by(session_id, epoch) => existing,
            _ => CheckpointRow::start(target.symbol.as_str(), epoch, session_id),
        };
        // A retried endpoint fills its gap without pulling the cursor back.
        let behind_cursor = checkpoint
            .last_completed_endpoint
            .as_deref()
            .and_then(endpoint::position)
            .zip(endpoint::position(&target.endpoint))
            .is_some_and(|(cursor, completed)| completed < cursor);
        if !behind_cursor {
            checkpoint.last_completed_endpoint = Some(target.endpoint.clone());
        }
        checkpoint.failed_endpoints.retain(|id| id != &target.endpoint);
        checkpoint.endpoints_completed += 1;
        checkpoint.records_written += count_column(inserted);
        self.warehouse.save_checkpoint(&checkpoint)?;
        Ok(())
    }
}

fn encode_batch(
    batch: &[CanonicalRecord],
    epoch: u64,
    session_id: &str,
) -> Result<Vec<RecordRow>, String> {
    batch
        .iter()
        .map(|record| encode_record(record, epoch, session_id).map_err(|e| e.to_string()))
        .collect()
}

fn encode_record(
    record: &CanonicalRecord,
    epoch: u64,
    session_id: &str,
) -> Result<RecordRow, serde_json::Error> {
    Ok(RecordRow {
        symbol: record.symbol.to_string(),
        endpoint: record.endpoint.clone(),
        observed_at: record.observed_at.format_sql(),
        data_type: record.data_type.clone(),
        quality: record.quality.as_str().to_owned(),
        parsed_values: serde_json::to_string(&record.parsed_values)?,
        raw_payload: serde_json::to_string(&record.raw_payload)?,
        text_extract: record.text_extract.clone(),
        metadata: serde_json::to_string(&record.metadata)?,
        session_id: session_id.to_owned(),
        epoch: epoch_column(epoch),
    })
}

pub(crate) fn epoch_column(epoch: u64) -> i64 {
    i64::try_from(epoch).unwrap_or(i64::MAX)
}

pub(crate) fn count_column(count: usize) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use ferrofeed_core::{QualityFlag, UtcDateTime};
    use ferrofeed_warehouse::{QueryGuardrails, WarehouseConfig};
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::indexer::IndexError;

    fn open_warehouse() -> (TempDir, Warehouse) {
        let temp = tempfile::tempdir().expect("tempdir");
        let warehouse = Warehouse::open(WarehouseConfig::in_home(temp.path())).expect("open");
        (temp, warehouse)
    }

    fn record(day: u8) -> CanonicalRecord {
        CanonicalRecord::new(
            Symbol::parse("IBM").expect("symbol"),
            "time_series_daily",
            UtcDateTime::parse(&format!("2024-03-{day:02}T00:00:00Z")).expect("ts"),
            "time_series_daily",
            json!({"4. close": "196.1"}),
        )
    }

    fn target() -> PersistTarget {
        PersistTarget::new(Symbol::parse("IBM").expect("symbol"), "time_series_daily")
    }

    #[derive(Default)]
    struct RecordingIndexer {
        ids: Mutex<Vec<String>>,
    }

    impl TextIndexer for RecordingIndexer {
        fn index(&self, unit: &TextUnit) -> Result<(), IndexError> {
            self.ids
                .lock()
                .expect("recording indexer lock is not poisoned")
                .push(unit.id.clone());
            Ok(())
        }
    }

    struct FailingIndexer;

    impl TextIndexer for FailingIndexer {
        fn index(&self, unit: &TextUnit) -> Result<(), IndexError> {
            Err(IndexError::Rejected {
                id: unit.id.clone(),
                message: String::from("offline"),
            })
        }
    }

    #[test]
    fn batches_are_written_and_checkpoint_advances() {
        let (_temp, warehouse) = open_warehouse();
        let writer = Writer::new(warehouse.clone()).with_batch_size(2);
        let records: Vec<_> = (1..=5).map(record).collect();

        let report = writer.persist(&target(), &records, 4, "s-1").expect("persist");
        assert_eq!(report.success_count, 5);
        assert_eq!(report.inserted(), 5);
        assert!(report.is_complete());

        let checkpoint = warehouse
            .load_checkpoint("IBM")
            .expect("load")
            .expect("present");
        assert_eq!(checkpoint.last_completed_endpoint.as_deref(), Some("time_series_daily"));
        assert_eq!(checkpoint.endpoints_completed, 1);
        assert_eq!(checkpoint.records_written, 5);
        assert!(checkpoint.is_owned_by("s-1", 4));
    }

    #[test]
    fn failed_batches_leave_checkpoint_untouched() {
        let (_temp, warehouse) = open_warehouse();
        warehouse
            .execute_query(
                "DROP VIEW vw_endpoint_coverage; DROP VIEW vw_record_quality; \
                 DROP TABLE canonical_records",
                QueryGuardrails::default(),
                true,
            )
            .expect("drop records table");
        let writer = Writer::new(warehouse.clone()).with_batch_size(2);
        let records: Vec<_> = (1..=3).map(record).collect();

        let report = writer.persist(&target(), &records, 1, "s-1").expect("persist");
        assert_eq!(report.success_count, 0);
        assert_eq!(report.failure_count, 3);
        assert_eq!(report.errors.len(), 2);
        assert!(!report.is_complete());
        assert_eq!(warehouse.load_checkpoint("IBM").expect("load"), None);
    }

    #[test]
    fn text_extracts_reach_the_indexer() {
        let (_temp, warehouse) = open_warehouse();
        let indexer = Arc::new(RecordingIndexer::default());
        let writer = Writer::new(warehouse).with_indexer(indexer.clone());
        let news = record(8).with_text("IBM beats estimates");
        let plain = record(9);

        writer
            .persist(&target(), &[news, plain], 1, "s-1")
            .expect("persist");
        let ids = indexer.ids.lock().expect("lock").clone();
        assert_eq!(ids, vec![String::from("IBM|time_series_daily|2024-03-08 00:00:00")]);
    }

    #[test]
    fn indexing_failure_does_not_fail_the_write() {
        let (_temp, warehouse) = open_warehouse();
        let writer = Writer::new(warehouse.clone()).with_indexer(Arc::new(FailingIndexer));
        let report = writer
            .persist(
                &target(),
                &[record(8).with_text("text").with_quality(QualityFlag::Partial)],
                1,
                "s-1",
            )
            .expect("persist");
        assert_eq!(report.success_count, 1);
        assert_eq!(warehouse.count_records(None).expect("count"), 1);
    }

    #[test]
    fn retried_endpoint_clears_its_failure_without_moving_cursor_back() {
        let (_temp, warehouse) = open_warehouse();
        let mut seeded = CheckpointRow::start("IBM", 1, "s-1");
        seeded.last_completed_endpoint = Some(String::from("overview"));
        seeded.failed_endpoints = vec![String::from("time_series_daily")];
        seeded.endpoints_completed = 2;
        warehouse.save_checkpoint(&seeded).expect("seed");

        let writer = Writer::new(warehouse.clone());
        writer.persist(&target(), &[record(1)], 1, "s-1").expect("persist");

        let checkpoint = warehouse.load_checkpoint("IBM").expect("load").expect("present");
        assert_eq!(checkpoint.last_completed_endpoint.as_deref(), Some("overview"));
        assert!(checkpoint.failed_endpoints.is_empty());
        assert_eq!(checkpoint.endpoints_completed, 3);
    }

    #[test]
    fn checkpoint_from_another_session_is_reowned() {
        let (_temp, warehouse) = open_warehouse();
        let mut foreign = CheckpointRow::start("IBM", 1, "old-session");
        foreign.endpoints_completed = 7;
        foreign.last_completed_endpoint = Some(String::from("overview"));
        warehouse.save_checkpoint(&foreign).expect("seed");

        let writer = Writer::new(warehouse.clone());
        writer.persist(&target(), &[record(1)], 1, "s-2").expect("persist");

        let checkpoint = warehouse.load_checkpoint("IBM").expect("load").expect("present");
        assert!(checkpoint.is_owned_by("s-2", 1));
        assert_eq!(checkpoint.endpoints_completed, 1);
    }
}
