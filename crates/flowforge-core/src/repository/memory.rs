//! In-memory execution store backed by `DashMap`.
//!
//! History grows without bound for the life of the process; a durable
//! backend is expected to own retention.

use dashmap::DashMap;
use flowforge_types::error::StoreError;
use flowforge_types::execution::{ExecutionQuery, WorkflowExecution};
use uuid::Uuid;

use super::execution::ExecutionStore;

#[derive(Debug, Default)]
pub struct InMemoryExecutionStore {
    active: DashMap<Uuid, WorkflowExecution>,
    history: DashMap<Uuid, WorkflowExecution>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of active (not yet retired) records.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    fn snapshot(&self) -> Vec<WorkflowExecution> {
        self.active
            .iter()
            .chain(self.history.iter())
            .map(|entry| entry.value().clone())
            .collect()
    }
}

impl ExecutionStore for InMemoryExecutionStore {
    async fn insert(&self, execution: WorkflowExecution) -> Result<(), StoreError> {
        let id = execution.id;
        if self.active.contains_key(&id) || self.history.contains_key(&id) {
            return Err(StoreError::Conflict(format!("execution {id} already exists")));
        }
        self.active.insert(id, execution);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<WorkflowExecution>, StoreError> {
        let found = self
            .active
            .get(&id)
            .or_else(|| self.history.get(&id))
            .map(|entry| entry.value().clone());
        Ok(found)
    }

    async fn update_active<F>(&self, id: Uuid, update: F) -> Result<bool, StoreError>
    where
        F: FnOnce(&mut WorkflowExecution) + Send,
    {
        match self.active.get_mut(&id) {
            Some(mut entry) => {
                update(entry.value_mut());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn retire<F>(&self, id: Uuid, update: F) -> Result<bool, StoreError>
    where
        F: FnOnce(&mut WorkflowExecution) + Send,
    {
        match self.active.remove(&id) {
            Some((id, mut execution)) => {
                update(&mut execution);
                self.history.insert(id, execution);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list(&self, query: &ExecutionQuery) -> Result<Vec<WorkflowExecution>, StoreError> {
        let mut records: Vec<WorkflowExecution> = self
            .snapshot()
            .into_iter()
            .filter(|e| query.status.is_none_or(|s| e.status == s))
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(records
            .into_iter()
            .skip(query.offset)
            .take(query.effective_limit())
            .collect())
    }

    async fn all(&self) -> Result<Vec<WorkflowExecution>, StoreError> {
        Ok(self.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowforge_types::JsonMap;
    use flowforge_types::execution::ExecutionStatus;

    fn execution(name: &str) -> WorkflowExecution {
        WorkflowExecution::pending("wf", name, vec![], JsonMap::new())
    }

    #[tokio::test]
    async fn insert_get_and_conflict() {
        let store = InMemoryExecutionStore::new();
        let exec = execution("a");
        let id = exec.id;
        store.insert(exec.clone()).await.unwrap();

        assert_eq!(store.get(id).await.unwrap().unwrap().workflow_name, "a");
        assert!(matches!(
            store.insert(exec).await,
            Err(StoreError::Conflict(_))
        ));
        assert!(store.get(Uuid::now_v7()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retired_records_are_frozen() {
        let store = InMemoryExecutionStore::new();
        let exec = execution("a");
        let id = exec.id;
        store.insert(exec).await.unwrap();

        assert!(
            store
                .retire(id, |e| e.status = ExecutionStatus::Cancelled)
                .await
                .unwrap()
        );
        assert_eq!(store.active_count(), 0);

        // Late writes from the interrupted run are ignored.
        assert!(
            !store
                .update_active(id, |e| e.status = ExecutionStatus::Running)
                .await
                .unwrap()
        );
        assert!(
            !store
                .retire(id, |e| e.status = ExecutionStatus::Completed)
                .await
                .unwrap()
        );
        let stored = store.get(id).await.unwrap().unwrap();
        assert_eq!(stored.status, ExecutionStatus::Cancelled);
    }

    #[tokio::test]
    async fn list_filters_sorts_and_pages() {
        let store = InMemoryExecutionStore::new();
        let mut ids = Vec::new();
        for i in 0..5 {
            let mut exec = execution(&format!("run-{i}"));
            exec.created_at += chrono::Duration::seconds(i);
            ids.push(exec.id);
            store.insert(exec).await.unwrap();
        }
        store
            .retire(ids[0], |e| e.status = ExecutionStatus::Completed)
            .await
            .unwrap();

        let all = store.list(&ExecutionQuery::default()).await.unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].workflow_name, "run-4");
        assert_eq!(all[4].workflow_name, "run-0");

        let page = store
            .list(&ExecutionQuery { status: None, limit: 2, offset: 1 })
            .await
            .unwrap();
        let names: Vec<_> = page.iter().map(|e| e.workflow_name.as_str()).collect();
        assert_eq!(names, vec!["run-3", "run-2"]);

        let completed = store
            .list(&ExecutionQuery {
                status: Some(ExecutionStatus::Completed),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, ids[0]);
    }
}
