//! Work queue contract.
//!
//! The backing store is an external spreadsheet; from here it is an
//! ordered, poll-based queue of string-keyed rows.

pub mod sheets;

use async_trait::async_trait;

use crate::core::error::Result;
use crate::core::types::{RowHandle, WorkItem, WorkItemFields};

#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// First row in document order whose `status` is `"pending"`. The scan
    /// is deterministic: two polls without an intervening `mark_done`
    /// return the same row.
    async fn next_pending(&self, source: &str) -> Result<Option<WorkItem>>;

    /// Write `fields` into the row behind `handle`. Used to flip a row to
    /// `"done"` together with its publication metadata.
    async fn mark_done(
        &self,
        source: &str,
        handle: RowHandle,
        fields: &WorkItemFields,
    ) -> Result<()>;
}
