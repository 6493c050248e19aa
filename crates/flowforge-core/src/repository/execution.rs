//! Execution store trait definition.

use std::future::Future;

use flowforge_types::error::StoreError;
use flowforge_types::execution::{ExecutionQuery, WorkflowExecution};
use uuid::Uuid;

/// Storage for execution records.
///
/// Records are *active* from submission until they reach a terminal status,
/// then *retired* into history. Mutations through [`update_active`] and
/// [`retire`] only apply to active records, so a run that was cancelled and
/// retired underneath its worker can never be overwritten by that worker.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
///
/// [`update_active`]: ExecutionStore::update_active
/// [`retire`]: ExecutionStore::retire
pub trait ExecutionStore: Send + Sync + 'static {
    /// Insert a new active record. An id already in use is a conflict.
    fn insert(
        &self,
        execution: WorkflowExecution,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Fetch a record, active or retired.
    fn get(
        &self,
        id: Uuid,
    ) -> impl Future<Output = Result<Option<WorkflowExecution>, StoreError>> + Send;

    /// Apply `update` to an active record. Returns `false` when the record
    /// is not active (unknown, or already retired).
    fn update_active<F>(
        &self,
        id: Uuid,
        update: F,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send
    where
        F: FnOnce(&mut WorkflowExecution) + Send;

    /// Apply `update` to an active record and move it to history in one step.
    /// Returns `false` when the record was not active.
    fn retire<F>(
        &self,
        id: Uuid,
        update: F,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send
    where
        F: FnOnce(&mut WorkflowExecution) + Send;

    /// Active and retired records matching `query.status`, newest
    /// `created_at` first, paged by `query.offset` / `query.effective_limit()`.
    fn list(
        &self,
        query: &ExecutionQuery,
    ) -> impl Future<Output = Result<Vec<WorkflowExecution>, StoreError>> + Send;

    /// Every record, active and retired, in no particular order.
    fn all(&self) -> impl Future<Output = Result<Vec<WorkflowExecution>, StoreError>> + Send;
}
