//! Hand-off of free-text extracts to the embedding subsystem.

use ferrofeed_core::CanonicalRecord;
use ferrofeed_warehouse::{TextUnitRow, Warehouse, WarehouseError};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("text unit could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] WarehouseError),

    #[error("indexer rejected unit '{id}': {message}")]
    Rejected { id: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextUnitMetadata {
    pub symbol: String,
    pub endpoint: String,
    pub timestamp: String,
    pub session_id: String,
    pub data_type: String,
}

/// Free text plus the context needed to find its record again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextUnit {
    /// Natural key of the source record.
    pub id: String,
    pub content: String,
    pub metadata: TextUnitMetadata,
}

impl TextUnit {
    /// `None` when the record carries no text extract.
    pub fn from_record(record: &CanonicalRecord, session_id: &str) -> Option<Self> {
        let content = record.text_extract.as_ref()?;
        Some(Self {
            id: record.natural_key(),
            content: content.clone(),
            metadata: TextUnitMetadata {
                symbol: record.symbol.to_string(),
                endpoint: record.endpoint.clone(),
                timestamp: record.observed_at.format_rfc3339(),
                session_id: session_id.to_owned(),
                data_type: record.data_type.clone(),
            },
        })
    }
}

pub trait TextIndexer: Send + Sync {
    fn index(&self, unit: &TextUnit) -> Result<(), IndexError>;
}

/// Queues units in the warehouse `text_units` table.
#[derive(Clone)]
pub struct OutboxTextIndexer {
    warehouse: Warehouse,
}

impl OutboxTextIndexer {
    pub fn new(warehouse: Warehouse) -> Self {
        Self { warehouse }
    }
}

impl TextIndexer for OutboxTextIndexer {
    fn index(&self, unit: &TextUnit) -> Result<(), IndexError> {
        let row = TextUnitRow {
            id: unit.id.clone(),
            content: unit.content.clone(),
            metadata: serde_json::to_string(&unit.metadata)?,
            session_id: unit.metadata.session_id.clone(),
        };
        if !self.warehouse.enqueue_text_unit(&row)? {
            tracing::debug!(id = %unit.id, "text unit already queued");
        }
        Ok(())
    }
}

/// Drops every unit.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTextIndexer;

impl TextIndexer for NoopTextIndexer {
    fn index(&self, _unit: &TextUnit) -> Result<(), IndexError> {
        Ok(())
    }
}
