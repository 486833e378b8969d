//! Status aggregation with stable keyset pagination.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ferry_events::TaskPhase;
use ferry_transfer_core::{TaskCategory, TaskRecord};
use uuid::Uuid;

use crate::error::{QueueError, QueueResult};
use crate::registry::TaskRegistry;

/// Optional constraints applied to a status listing.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskFilter {
    /// Restrict to a single owner.
    pub owner_id: Option<i64>,
    /// Restrict to downloads or uploads.
    pub category: Option<TaskCategory>,
    /// Restrict to one lifecycle phase.
    pub phase: Option<TaskPhase>,
}

impl TaskFilter {
    fn matches(&self, record: &TaskRecord) -> bool {
        self.owner_id.is_none_or(|owner| record.owner_id == owner)
            && self.category.is_none_or(|category| record.category() == category)
            && self.phase.is_none_or(|phase| record.phase == phase)
    }
}

/// Keyset cursor over the `(created_at, id)` sort order.
///
/// Cursors stay valid while tasks come and go: a page resumes strictly
/// after the cursor position, never re-serving or skipping surviving rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    /// Submission timestamp of the last row on the previous page.
    pub created_at: DateTime<Utc>,
    /// Task id of that row, breaking timestamp ties.
    pub id: Uuid,
}

impl PageCursor {
    /// Render the cursor as an opaque token.
    #[must_use]
    pub fn to_token(&self) -> String {
        format!(
            "{}:{}",
            self.created_at.timestamp_micros(),
            self.id.as_simple()
        )
    }

    /// Parse a token produced by [`PageCursor::to_token`].
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::InvalidCursor`] on any malformed input.
    pub fn parse(token: &str) -> QueueResult<Self> {
        let (micros, id) = token.split_once(':').ok_or(QueueError::InvalidCursor)?;
        let micros: i64 = micros.parse().map_err(|_| QueueError::InvalidCursor)?;
        let created_at =
            DateTime::from_timestamp_micros(micros).ok_or(QueueError::InvalidCursor)?;
        let id = Uuid::parse_str(id).map_err(|_| QueueError::InvalidCursor)?;
        Ok(Self { created_at, id })
    }

    fn precedes(&self, record: &TaskRecord) -> bool {
        (self.created_at, self.id) < (record.created_at, record.id)
    }
}

/// One page of task records plus the cursor for the next page.
#[derive(Debug, Clone)]
pub struct StatusPage {
    /// Records in submission order.
    pub tasks: Vec<TaskRecord>,
    /// Cursor for the following page, absent on the last page.
    pub next: Option<PageCursor>,
}

/// Aggregate phase counts across the live registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusSummary {
    /// Tasks waiting for a slot.
    pub queued: usize,
    /// Tasks currently transferring.
    pub active: usize,
    /// Tasks below the speed threshold.
    pub stalled: usize,
    /// Running tasks in the download category.
    pub active_downloads: usize,
    /// Running tasks in the upload category.
    pub active_uploads: usize,
}

/// Read-side facade over the registry for status consumers.
pub struct StatusAggregator {
    registry: Arc<TaskRegistry>,
    status_limit: u32,
}

impl StatusAggregator {
    /// Construct an aggregator with the configured page cap.
    #[must_use]
    pub fn new(registry: Arc<TaskRegistry>, status_limit: u32) -> Self {
        Self {
            registry,
            status_limit,
        }
    }

    /// Produce one page of matching tasks.
    ///
    /// Results sort by submission time with the task id as tie-break, so
    /// ordering is total and repeat listings are stable. The page size is
    /// clamped to the configured limit.
    pub async fn page(
        &self,
        filter: TaskFilter,
        cursor: Option<PageCursor>,
        page_size: Option<u32>,
    ) -> StatusPage {
        let mut tasks: Vec<TaskRecord> = self
            .registry
            .list()
            .await
            .into_iter()
            .filter(|record| filter.matches(record))
            .collect();
        tasks.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        if let Some(cursor) = cursor {
            tasks.retain(|record| cursor.precedes(record));
        }

        let size = page_size
            .unwrap_or(self.status_limit)
            .clamp(1, self.status_limit) as usize;
        let has_more = tasks.len() > size;
        tasks.truncate(size);
        let next = if has_more {
            tasks.last().map(|record| PageCursor {
                created_at: record.created_at,
                id: record.id,
            })
        } else {
            None
        };

        StatusPage { tasks, next }
    }

    /// Aggregate phase counts over the live registry.
    pub async fn summary(&self) -> StatusSummary {
        let mut summary = StatusSummary::default();
        for record in self.registry.list().await {
            match record.phase {
                TaskPhase::Queued => summary.queued += 1,
                TaskPhase::Active => {
                    summary.active += 1;
                    match record.category() {
                        TaskCategory::Download => summary.active_downloads += 1,
                        TaskCategory::Upload => summary.active_uploads += 1,
                    }
                }
                TaskPhase::Stalled => summary.stalled += 1,
                _ => {}
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_tokens_round_trip() {
        let cursor = PageCursor {
            created_at: DateTime::from_timestamp_micros(1_756_400_000_000_000)
                .expect("timestamp"),
            id: Uuid::new_v4(),
        };
        let parsed = PageCursor::parse(&cursor.to_token()).expect("parse");
        assert_eq!(parsed, cursor);
    }

    #[test]
    fn malformed_cursors_are_rejected() {
        assert!(matches!(
            PageCursor::parse("not-a-cursor"),
            Err(QueueError::InvalidCursor)
        ));
        assert!(PageCursor::parse("123").is_err());
        assert!(PageCursor::parse("abc:def").is_err());
        assert!(PageCursor::parse("123:not-a-uuid").is_err());
    }
}
