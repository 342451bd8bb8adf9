//! vxmeta DB - Couchbase Query Service gateway.

pub mod couchbase;

pub use couchbase::{query_service_url, upsert_statement, CouchbaseClient};
