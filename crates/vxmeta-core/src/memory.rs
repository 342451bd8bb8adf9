//! In-memory [`DocumentStore`] for tests and dry runs.
//!
//! Query answers come from a handler closure, which makes it easy to script
//! a store that reacts to the statement text (and to keep state between
//! calls behind a `Mutex` when a test needs it). Every statement and upsert
//! is recorded for later assertions.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde_json::Value;

use crate::traits::{DocumentStore, RowStream};
use crate::AppError;

type Handler = dyn Fn(&str) -> Result<Vec<Value>, AppError> + Send + Sync;

/// Scriptable store that answers queries through a closure.
#[derive(Clone)]
pub struct MemoryStore {
    handler: Arc<Handler>,
    statements: Arc<Mutex<Vec<String>>>,
    upserts: Arc<Mutex<Vec<(String, Value)>>>,
}

impl MemoryStore {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str) -> Result<Vec<Value>, AppError> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            statements: Arc::new(Mutex::new(Vec::new())),
            upserts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every statement received, in arrival order.
    pub fn statements(&self) -> Vec<String> {
        self.statements
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Every `(id, document)` upserted, in arrival order.
    pub fn upserts(&self) -> Vec<(String, Value)> {
        self.upserts.lock().map(|u| u.clone()).unwrap_or_default()
    }

    /// Most recent document upserted under `id`.
    pub fn document(&self, id: &str) -> Option<Value> {
        self.upserts()
            .into_iter()
            .rev()
            .find(|(doc_id, _)| doc_id == id)
            .map(|(_, doc)| doc)
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("statements", &self.statements().len())
            .field("upserts", &self.upserts().len())
            .finish()
    }
}

impl DocumentStore for MemoryStore {
    async fn query(&self, statement: &str, _timeout: Duration) -> Result<RowStream, AppError> {
        if let Ok(mut statements) = self.statements.lock() {
            statements.push(statement.to_string());
        }
        let rows = (self.handler)(statement)?;
        Ok(stream::iter(rows.into_iter().map(Ok)).boxed())
    }

    async fn upsert(&self, id: &str, document: &Value, _timeout: Duration) -> Result<(), AppError> {
        if let Ok(mut upserts) = self.upserts.lock() {
            upserts.push((id.to_string(), document.clone()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_records_statements_and_rows() {
        let store = MemoryStore::new(|statement| {
            if statement.starts_with("models") {
                Ok(vec![json!("A"), json!("B")])
            } else {
                Ok(Vec::new())
            }
        });

        let rows: Vec<Value> = store
            .query("models", Duration::from_secs(1))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(rows, vec![json!("A"), json!("B")]);
        assert_eq!(store.statements(), vec!["models"]);
    }

    #[tokio::test]
    async fn test_document_returns_latest_upsert() {
        let store = MemoryStore::new(|_| Ok(Vec::new()));
        store.upsert("MD:x", &json!({"v": 1}), Duration::from_secs(1)).await.unwrap();
        store.upsert("MD:x", &json!({"v": 2}), Duration::from_secs(1)).await.unwrap();

        assert_eq!(store.document("MD:x"), Some(json!({"v": 2})));
        assert_eq!(store.document("MD:y"), None);
        assert_eq!(store.upserts().len(), 2);
    }
}
