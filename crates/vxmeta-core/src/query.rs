//! Typed query execution.
//!
//! Every query result crosses this module as a [`QueryResult`] of a declared
//! [`QueryShape`]. Rows are decoded one at a time as they come off the
//! store's stream; the first row that does not fit the shape fails the whole
//! call and nothing decoded so far is returned.

use std::fmt;
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde_json::{Map, Value};

use crate::config::QueryTimeouts;
use crate::template::{Bindings, QueryKind, TemplateName, TemplateSet};
use crate::traits::DocumentStore;
use crate::AppError;

/// Expected shape of every row of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryShape {
    StringList,
    IntList,
    FloatList,
    RecordList,
}

impl fmt::Display for QueryShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryShape::StringList => "StringList",
            QueryShape::IntList => "IntList",
            QueryShape::FloatList => "FloatList",
            QueryShape::RecordList => "RecordList",
        };
        f.write_str(name)
    }
}

/// A fully decoded query result.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResult {
    Strings(Vec<String>),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    Records(Vec<Record>),
}

impl QueryResult {
    pub fn shape(&self) -> QueryShape {
        match self {
            QueryResult::Strings(_) => QueryShape::StringList,
            QueryResult::Ints(_) => QueryShape::IntList,
            QueryResult::Floats(_) => QueryShape::FloatList,
            QueryResult::Records(_) => QueryShape::RecordList,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            QueryResult::Strings(v) => v.len(),
            QueryResult::Ints(v) => v.len(),
            QueryResult::Floats(v) => v.len(),
            QueryResult::Records(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_strings(self) -> Result<Vec<String>, AppError> {
        match self {
            QueryResult::Strings(v) => Ok(v),
            other => Err(mismatch(QueryShape::StringList, &other)),
        }
    }

    pub fn into_ints(self) -> Result<Vec<i64>, AppError> {
        match self {
            QueryResult::Ints(v) => Ok(v),
            other => Err(mismatch(QueryShape::IntList, &other)),
        }
    }

    pub fn into_floats(self) -> Result<Vec<f64>, AppError> {
        match self {
            QueryResult::Floats(v) => Ok(v),
            other => Err(mismatch(QueryShape::FloatList, &other)),
        }
    }

    pub fn into_records(self) -> Result<Vec<Record>, AppError> {
        match self {
            QueryResult::Records(v) => Ok(v),
            other => Err(mismatch(QueryShape::RecordList, &other)),
        }
    }
}

fn mismatch(expected: QueryShape, actual: &QueryResult) -> AppError {
    AppError::ShapeMismatch {
        expected,
        actual: actual.shape(),
    }
}

/// One object row of a `RecordList` result with typed field access.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record(Map<String, Value>);

impl Record {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Integer field; floats are truncated. `None` when absent or null.
    pub fn int(&self, field: &str) -> Result<Option<i64>, AppError> {
        match self.0.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => as_int(value)
                .map(Some)
                .ok_or_else(|| invalid_field(field, value)),
        }
    }

    /// String field. `None` when absent or null.
    pub fn string(&self, field: &str) -> Result<Option<String>, AppError> {
        match self.0.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(value) => Err(invalid_field(field, value)),
        }
    }

    /// Array field whose entries are strings or numbers; numbers are rendered
    /// with their JSON text. `None` when absent or null.
    pub fn string_list(&self, field: &str) -> Result<Option<Vec<String>>, AppError> {
        let items = match self.0.get(field) {
            None | Some(Value::Null) => return Ok(None),
            Some(Value::Array(items)) => items,
            Some(value) => return Err(invalid_field(field, value)),
        };
        items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                Value::Number(n) => Ok(n.to_string()),
                other => Err(invalid_field(field, other)),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }
}

fn invalid_field(field: &str, value: &Value) -> AppError {
    AppError::InvalidField {
        field: field.to_string(),
        found: value.to_string(),
    }
}

fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        _ => None,
    }
}

fn decode_row(result: &mut QueryResult, row: Value, index: usize) -> Result<(), AppError> {
    let expected = result.shape();
    let undecodable = |row: &Value| AppError::Decode {
        row: index,
        expected,
        found: row.to_string(),
    };

    match (result, row) {
        (QueryResult::Strings(out), Value::String(s)) => out.push(s),
        (QueryResult::Ints(out), row) => out.push(as_int(&row).ok_or_else(|| undecodable(&row))?),
        (QueryResult::Floats(out), row) => {
            out.push(row.as_f64().ok_or_else(|| undecodable(&row))?)
        }
        (QueryResult::Records(out), Value::Object(fields)) => out.push(Record(fields)),
        (_, row) => return Err(undecodable(&row)),
    }
    Ok(())
}

fn empty_result(shape: QueryShape) -> QueryResult {
    match shape {
        QueryShape::StringList => QueryResult::Strings(Vec::new()),
        QueryShape::IntList => QueryResult::Ints(Vec::new()),
        QueryShape::FloatList => QueryResult::Floats(Vec::new()),
        QueryShape::RecordList => QueryResult::Records(Vec::new()),
    }
}

/// Runs `statement` and decodes every row as `shape`.
///
/// # Errors
///
/// Fails if the store rejects the statement, if the row stream reports an
/// error, or if any row does not decode as `shape`.
pub async fn execute<S: DocumentStore>(
    store: &S,
    statement: &str,
    shape: QueryShape,
    timeout: Duration,
) -> Result<QueryResult, AppError> {
    let mut rows = store.query(statement, timeout).await?;
    let mut result = empty_result(shape);
    let mut index = 0;

    while let Some(row) = rows.next().await {
        decode_row(&mut result, row?, index)?;
        index += 1;
    }

    Ok(result)
}

/// Named-template front end of [`execute`]: resolves, picks the timeout for
/// the template's [`QueryKind`], runs and decodes.
pub struct TemplateQueries<'a, S> {
    store: &'a S,
    templates: &'a TemplateSet,
    timeouts: QueryTimeouts,
}

impl<'a, S: DocumentStore> TemplateQueries<'a, S> {
    pub fn new(store: &'a S, templates: &'a TemplateSet, timeouts: QueryTimeouts) -> Self {
        Self {
            store,
            templates,
            timeouts,
        }
    }

    pub fn timeout_for(&self, name: TemplateName) -> Duration {
        match name.kind() {
            QueryKind::Lookup => self.timeouts.lookup,
            QueryKind::Aggregate => self.timeouts.aggregate,
        }
    }

    pub async fn fetch(
        &self,
        name: TemplateName,
        bindings: &Bindings,
        shape: QueryShape,
    ) -> Result<QueryResult, AppError> {
        let statement = self.templates.render(name, bindings)?;
        tracing::trace!(template = %name, %statement, "Resolved query");

        let start = Instant::now();
        let result = execute(self.store, &statement, shape, self.timeout_for(name)).await;
        match &result {
            Ok(rows) => tracing::debug!(
                template = %name,
                rows = rows.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Query finished"
            ),
            Err(e) => tracing::debug!(template = %name, error = %e, "Query failed"),
        }
        result
    }

    pub async fn strings(
        &self,
        name: TemplateName,
        bindings: &Bindings,
    ) -> Result<Vec<String>, AppError> {
        self.fetch(name, bindings, QueryShape::StringList)
            .await?
            .into_strings()
    }

    pub async fn ints(
        &self,
        name: TemplateName,
        bindings: &Bindings,
    ) -> Result<Vec<i64>, AppError> {
        self.fetch(name, bindings, QueryShape::IntList).await?.into_ints()
    }

    pub async fn records(
        &self,
        name: TemplateName,
        bindings: &Bindings,
    ) -> Result<Vec<Record>, AppError> {
        self.fetch(name, bindings, QueryShape::RecordList)
            .await?
            .into_records()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use serde_json::json;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn store_returning(rows: Vec<Value>) -> MemoryStore {
        MemoryStore::new(move |_| Ok(rows.clone()))
    }

    #[tokio::test]
    async fn test_execute_string_list() {
        let store = store_returning(vec![json!("RAP_OOPS_130"), json!("HRRR_OPS")]);
        let result = execute(&store, "SELECT", QueryShape::StringList, TIMEOUT).await.unwrap();
        assert_eq!(
            result,
            QueryResult::Strings(vec!["RAP_OOPS_130".into(), "HRRR_OPS".into()])
        );
    }

    #[tokio::test]
    async fn test_execute_int_list_truncates_floats() {
        let store = store_returning(vec![json!(0), json!(6.0), json!(12.9), json!(-1.5)]);
        let result = execute(&store, "SELECT", QueryShape::IntList, TIMEOUT).await.unwrap();
        assert_eq!(result, QueryResult::Ints(vec![0, 6, 12, -1]));
    }

    #[tokio::test]
    async fn test_execute_float_list() {
        let store = store_returning(vec![json!(1), json!(2.5)]);
        let result = execute(&store, "SELECT", QueryShape::FloatList, TIMEOUT).await.unwrap();
        assert_eq!(result.into_floats().unwrap(), vec![1.0, 2.5]);
    }

    #[tokio::test]
    async fn test_execute_record_list() {
        let store = store_returning(vec![json!({"mindate": 1.7e9, "numrecs": 3})]);
        let records = execute(&store, "SELECT", QueryShape::RecordList, TIMEOUT)
            .await
            .unwrap()
            .into_records()
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].int("mindate").unwrap(), Some(1_700_000_000));
        assert_eq!(records[0].int("numrecs").unwrap(), Some(3));
        assert_eq!(records[0].int("maxdate").unwrap(), None);
    }

    #[tokio::test]
    async fn test_execute_fails_on_any_bad_row() {
        let store = store_returning(vec![json!("ok"), json!(5), json!("never reached")]);
        let err = execute(&store, "SELECT", QueryShape::StringList, TIMEOUT).await.unwrap_err();
        match err {
            AppError::Decode { row, expected, .. } => {
                assert_eq!(row, 1);
                assert_eq!(expected, QueryShape::StringList);
            }
            other => panic!("Expected decode error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_execute_rejects_non_numeric_ints() {
        let store = store_returning(vec![json!("6")]);
        let err = execute(&store, "SELECT", QueryShape::IntList, TIMEOUT).await.unwrap_err();
        assert!(matches!(err, AppError::Decode { row: 0, .. }));
    }

    #[tokio::test]
    async fn test_execute_propagates_store_error() {
        let store = MemoryStore::new(|_| Err(AppError::Query("syntax error".into())));
        let err = execute(&store, "SELEC", QueryShape::StringList, TIMEOUT).await.unwrap_err();
        assert!(matches!(err, AppError::Query(_)));
    }

    #[tokio::test]
    async fn test_execute_empty_result() {
        let store = store_returning(Vec::new());
        let result = execute(&store, "SELECT", QueryShape::RecordList, TIMEOUT).await.unwrap();
        assert!(result.is_empty());
        assert_eq!(result.shape(), QueryShape::RecordList);
    }

    #[test]
    fn test_shape_mismatch() {
        let err = QueryResult::Ints(vec![1]).into_strings().unwrap_err();
        assert!(matches!(
            err,
            AppError::ShapeMismatch {
                expected: QueryShape::StringList,
                actual: QueryShape::IntList
            }
        ));
    }

    #[test]
    fn test_record_string_list_accepts_numbers() {
        let record = Record::new(
            json!({"thresholds": ["500", 1000, 3000.5], "bad": [true]})
                .as_object()
                .cloned()
                .unwrap(),
        );
        assert_eq!(
            record.string_list("thresholds").unwrap(),
            Some(vec!["500".into(), "1000".into(), "3000.5".into()])
        );
        assert!(record.string_list("bad").is_err());
        assert_eq!(record.string_list("missing").unwrap(), None);
    }

    #[tokio::test]
    async fn test_template_queries_resolve_and_pick_timeout() {
        let store = store_returning(vec![json!("HRRR_OPS")]);
        let templates = TemplateSet::from_texts([(
            TemplateName::GetModels,
            "models {{vxDOCTYPE}} {{vxSUBDOCTYPE}}",
        )]);
        let queries = TemplateQueries::new(&store, &templates, QueryTimeouts::default());

        let bindings = Bindings::new().with("vxDOCTYPE", "CTC").with("vxSUBDOCTYPE", "CEILING");
        let models = queries.strings(TemplateName::GetModels, &bindings).await.unwrap();

        assert_eq!(models, vec!["HRRR_OPS"]);
        assert_eq!(store.statements(), vec!["models CTC CEILING"]);
        assert_eq!(
            queries.timeout_for(TemplateName::GetModels),
            QueryTimeouts::default().aggregate
        );
        assert_eq!(
            queries.timeout_for(TemplateName::GetModelsWithMetadata),
            QueryTimeouts::default().lookup
        );
    }
}
