//! Trait definitions for external dependencies.
//!
//! The pipeline only needs two things from the document store: run an ad-hoc
//! query and stream back its rows, and replace a whole document by id. The
//! [`DocumentStore`] trait captures exactly that, so the reconciliation and
//! aggregation logic can run against the Couchbase gateway in production and
//! against [`MemoryStore`](crate::memory::MemoryStore) in tests.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use futures::TryStreamExt;
//! use vxmeta_core::traits::DocumentStore;
//!
//! async fn count_rows<S: DocumentStore>(
//!     store: &S,
//!     statement: &str,
//! ) -> Result<usize, vxmeta_core::AppError> {
//!     let rows = store.query(statement, Duration::from_secs(30)).await?;
//!     let rows: Vec<_> = rows.try_collect().await?;
//!     Ok(rows.len())
//! }
//! ```

use std::future::Future;
use std::time::Duration;

use futures::stream::BoxStream;
use serde_json::Value;

use crate::AppError;

/// Rows of a query result, yielded one at a time.
pub type RowStream = BoxStream<'static, Result<Value, AppError>>;

/// Query-capable session against the document store.
pub trait DocumentStore: Send + Sync {
    /// Runs an ad-hoc (never prepared) statement.
    ///
    /// # Arguments
    ///
    /// * `statement` - Fully resolved query text
    /// * `timeout` - Upper bound for the whole round trip
    ///
    /// # Returns
    ///
    /// A stream of raw result rows. Decoding them is the caller's job.
    fn query(
        &self,
        statement: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<RowStream, AppError>> + Send;

    /// Inserts or fully replaces the document stored under `id`.
    ///
    /// No merge and no optimistic concurrency: the last writer wins.
    fn upsert(
        &self,
        id: &str,
        document: &Value,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}
