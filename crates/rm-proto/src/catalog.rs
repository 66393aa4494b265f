// SPDX-License-Identifier: Apache-2.0

//! The catalog persistence capability (spec.md §6.2, supplemented by
//! §11's two-phase validate/commit DDL flow). The core validates a DDL
//! statement entirely in memory, applies it to the in-memory queue tree,
//! then asks the catalog hook to persist it; a persistence failure rolls
//! the in-memory change back rather than leaving the two out of sync.

use async_trait::async_trait;
use otap_df_rm_config::RmError;

/// A resource queue's persisted row shape, passed to the catalog hook on
/// insert/update. Mirrors the `resqueue` catalog table's column list.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueRow {
    /// The queue's catalog oid; `None` until first persisted.
    pub oid: Option<u32>,
    /// The queue's name.
    pub name: String,
    /// The parent queue's name.
    pub parent: String,
    /// `ActiveStatements`.
    pub active_statements: u32,
    /// Raw DDL attribute pairs, stored as supplied.
    pub attrs: Vec<(String, String)>,
}

/// A segment's persisted row shape, passed to the catalog hook whenever a
/// heartbeat changes a segment's registered status or capacity.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRow {
    /// The segment's host name.
    pub host_name: String,
    /// Total memory reported by the segment, in megabytes.
    pub total_memory_mb: u64,
    /// Total cores reported by the segment.
    pub total_core: f64,
    /// True if the segment is currently usable.
    pub usable: bool,
}

/// The capability the core uses to persist committed DDL and segment
/// registration changes to an external catalog. A no-op implementation is
/// appropriate when the core runs without a backing catalog (e.g. tests).
#[async_trait]
pub trait CatalogHook: Send + Sync {
    /// Persists a newly created queue, returning the catalog-assigned oid.
    async fn persist_queue_insert(&self, row: &QueueRow) -> Result<u32, RmError>;

    /// Persists an attribute change to an existing queue.
    async fn persist_queue_update(&self, row: &QueueRow) -> Result<(), RmError>;

    /// Persists a queue deletion.
    async fn persist_queue_delete(&self, oid: u32) -> Result<(), RmError>;

    /// Persists a segment's registered status/capacity, inserting it if
    /// this is the first time the host has been seen.
    async fn persist_segment_upsert(&self, row: &SegmentRow) -> Result<(), RmError>;
}

/// A [`CatalogHook`] that performs no persistence: queue oids are
/// allocated from an in-process counter and every other call is a no-op.
/// Appropriate when the core is not backed by an external catalog.
pub struct NullCatalogHook {
    next_oid: std::sync::atomic::AtomicU32,
}

impl NullCatalogHook {
    /// Creates a hook whose first allocated oid is `first_oid`.
    #[must_use]
    pub fn new(first_oid: u32) -> Self {
        Self {
            next_oid: std::sync::atomic::AtomicU32::new(first_oid),
        }
    }
}

impl Default for NullCatalogHook {
    fn default() -> Self {
        Self::new(1)
    }
}

#[async_trait]
impl CatalogHook for NullCatalogHook {
    async fn persist_queue_insert(&self, _row: &QueueRow) -> Result<u32, RmError> {
        Ok(self.next_oid.fetch_add(1, std::sync::atomic::Ordering::Relaxed))
    }

    async fn persist_queue_update(&self, _row: &QueueRow) -> Result<(), RmError> {
        Ok(())
    }

    async fn persist_queue_delete(&self, _oid: u32) -> Result<(), RmError> {
        Ok(())
    }

    async fn persist_segment_upsert(&self, _row: &SegmentRow) -> Result<(), RmError> {
        Ok(())
    }
}

/// A [`CatalogHook`] that logs every call at `info` level via `tracing`
/// and otherwise behaves like [`NullCatalogHook`]. Useful when running
/// without a catalog but wanting the DDL/heartbeat audit trail.
pub struct LoggingCatalogHook {
    inner: NullCatalogHook,
}

impl LoggingCatalogHook {
    /// Creates a logging hook whose first allocated oid is `first_oid`.
    #[must_use]
    pub fn new(first_oid: u32) -> Self {
        Self {
            inner: NullCatalogHook::new(first_oid),
        }
    }
}

#[async_trait]
impl CatalogHook for LoggingCatalogHook {
    async fn persist_queue_insert(&self, row: &QueueRow) -> Result<u32, RmError> {
        let oid = self.inner.persist_queue_insert(row).await?;
        tracing::info!(queue = %row.name, oid, "persisted queue insert");
        Ok(oid)
    }

    async fn persist_queue_update(&self, row: &QueueRow) -> Result<(), RmError> {
        tracing::info!(queue = %row.name, "persisted queue update");
        self.inner.persist_queue_update(row).await
    }

    async fn persist_queue_delete(&self, oid: u32) -> Result<(), RmError> {
        tracing::info!(oid, "persisted queue delete");
        self.inner.persist_queue_delete(oid).await
    }

    async fn persist_segment_upsert(&self, row: &SegmentRow) -> Result<(), RmError> {
        tracing::info!(host = %row.host_name, usable = row.usable, "persisted segment upsert");
        self.inner.persist_segment_upsert(row).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row(name: &str) -> QueueRow {
        QueueRow {
            oid: None,
            name: name.to_string(),
            parent: "pg_root".to_string(),
            active_statements: 20,
            attrs: Vec::new(),
        }
    }

    #[tokio::test]
    async fn null_hook_allocates_increasing_oids() {
        let hook = NullCatalogHook::new(100);
        let a = hook.persist_queue_insert(&sample_row("a")).await.unwrap();
        let b = hook.persist_queue_insert(&sample_row("b")).await.unwrap();
        assert_eq!(a, 100);
        assert_eq!(b, 101);
    }

    #[tokio::test]
    async fn logging_hook_delegates_oid_allocation() {
        let hook = LoggingCatalogHook::new(5);
        let oid = hook.persist_queue_insert(&sample_row("q")).await.unwrap();
        assert_eq!(oid, 5);
    }
}
