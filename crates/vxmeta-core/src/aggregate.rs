//! Per-model aggregation.
//!
//! Each required model gets a fixed battery of aggregate queries whose
//! results are assembled into a [`ModelRecord`]. Models are independent and
//! read-only until the final document write, so they are aggregated with
//! bounded concurrency and sorted back into position order afterwards.

use futures::stream::{self, StreamExt};
use tracing::Instrument;

use crate::config::MissingAggregatePolicy;
use crate::models::{DateSpan, ModelLevels, ModelRecord};
use crate::progress::{PassLabel, ProgressReporter, UpdateEvent};
use crate::query::{Record, TemplateQueries};
use crate::scope::PassScope;
use crate::template::TemplateName;
use crate::traits::DocumentStore;
use crate::AppError;

/// Result of aggregating one model.
#[derive(Debug)]
pub struct ModelOutcome {
    /// 0-based index of the model in the required-models list.
    pub position: usize,
    pub model: String,
    pub result: Result<ModelRecord, AppError>,
}

/// Picks the usable row of a multi-row aggregate.
///
/// Some aggregate queries return an empty artifact row ahead of the real one,
/// so when there is more than one row the second is used.
pub fn select_aggregate_row(rows: Vec<Record>) -> Option<Record> {
    if rows.len() > 1 {
        tracing::debug!(rows = rows.len(), "Multiple aggregate rows, using the second");
        rows.into_iter().nth(1)
    } else {
        rows.into_iter().next()
    }
}

/// Issues the per-model aggregate queries of a pass.
pub struct Aggregator<'q, 'a, S> {
    queries: &'q TemplateQueries<'a, S>,
    missing: MissingAggregatePolicy,
    concurrency: usize,
}

impl<'q, 'a, S: DocumentStore> Aggregator<'q, 'a, S> {
    pub fn new(
        queries: &'q TemplateQueries<'a, S>,
        missing: MissingAggregatePolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            queries,
            missing,
            concurrency: concurrency.max(1),
        }
    }

    fn missing<T: Default>(&self, aggregate: &'static str) -> Result<T, AppError> {
        match self.missing {
            MissingAggregatePolicy::SkipModel => Err(AppError::MissingAggregate { aggregate }),
            MissingAggregatePolicy::ZeroFill => {
                tracing::debug!(aggregate, "No usable row, using default");
                Ok(T::default())
            }
        }
    }

    fn first<T: Default>(&self, values: Vec<T>, aggregate: &'static str) -> Result<T, AppError> {
        match values.into_iter().next() {
            Some(value) => Ok(value),
            None => self.missing(aggregate),
        }
    }

    fn non_empty<T>(&self, values: Vec<T>, aggregate: &'static str) -> Result<Vec<T>, AppError> {
        if values.is_empty() {
            self.missing(aggregate)
        } else {
            Ok(values)
        }
    }

    fn field(&self, record: &Record, field: &'static str) -> Result<i64, AppError> {
        match record.int(field)? {
            Some(value) => Ok(value),
            None => self.missing(field),
        }
    }

    async fn levels(&self, scope: &PassScope<'_>, model: &str) -> Result<ModelLevels, AppError> {
        let rows = self
            .queries
            .records(TemplateName::GetDistinctThresholds, &scope.model_bindings(model))
            .await?;

        let values = match select_aggregate_row(rows) {
            Some(row) => match row.string_list("thresholds")? {
                Some(values) => values,
                None => match row.string_list("variables")? {
                    Some(values) => values,
                    None => self.missing("thresholds")?,
                },
            },
            None => self.missing("thresholds")?,
        };

        Ok(ModelLevels::for_doc_type(scope.doc_type, values))
    }

    async fn date_span(&self, scope: &PassScope<'_>, model: &str) -> Result<DateSpan, AppError> {
        let rows = self
            .queries
            .records(TemplateName::GetMinMaxCountFloor, &scope.model_bindings(model))
            .await?;

        let Some(row) = rows.into_iter().next() else {
            return self.missing("minMaxCount");
        };

        Ok(DateSpan {
            mindate: self.field(&row, "mindate")?,
            maxdate: self.field(&row, "maxdate")?,
            numrecs: self.field(&row, "numrecs")?,
            updated: row.int("updated")?,
        })
    }

    /// Builds the record of the model at `position`.
    ///
    /// # Errors
    ///
    /// Any failed sub-query fails the model. Under
    /// [`MissingAggregatePolicy::SkipModel`] an aggregate with no usable row
    /// does too; under `ZeroFill` the field falls back to its default.
    pub async fn aggregate_model(
        &self,
        scope: &PassScope<'_>,
        position: usize,
        model: &str,
    ) -> Result<ModelRecord, AppError> {
        let bindings = scope.model_bindings(model);

        let levels = self.levels(scope, model).await?;
        let fcst_lens = self.non_empty(
            self.queries
                .ints(TemplateName::GetDistinctFcstLen, &bindings)
                .await?,
            "fcstLens",
        )?;
        let regions = self.non_empty(
            self.queries
                .strings(TemplateName::GetDistinctRegion, &bindings)
                .await?,
            "regions",
        )?;
        let display_text = self.first(
            self.queries
                .strings(TemplateName::GetDistinctDisplayText, &bindings)
                .await?,
            "displayText",
        )?;
        let display_category = self.first(
            self.queries
                .ints(TemplateName::GetDistinctDisplayCategory, &bindings)
                .await?,
            "displayCategory",
        )?;
        let display_order = self.first(
            self.queries
                .ints(
                    TemplateName::GetDistinctDisplayOrder,
                    &scope.indexed_model_bindings(model, position),
                )
                .await?,
            "displayOrder",
        )?;
        let span = self.date_span(scope, model).await?;

        Ok(ModelRecord {
            name: model.to_string(),
            model: model.to_string(),
            levels,
            fcst_lens,
            regions,
            display_text,
            display_category,
            display_order,
            mindate: span.mindate,
            maxdate: span.maxdate,
            numrecs: span.numrecs,
            updated: span.updated,
        })
    }

    /// Aggregates every model and returns the outcomes in position order.
    ///
    /// A failing model never affects another one; the caller decides what a
    /// failed outcome means for the pass.
    pub async fn aggregate_all<R: ProgressReporter>(
        &self,
        scope: &PassScope<'_>,
        models: &[String],
        reporter: &R,
    ) -> Vec<ModelOutcome> {
        let pass = PassLabel {
            dataset: &scope.dataset.name,
            doc_type: scope.doc_type,
        };

        let mut outcomes: Vec<ModelOutcome> = stream::iter(models.iter().enumerate())
            .map(|(position, model)| {
                let span = tracing::info_span!("model", model = %model, position);
                async move {
                    let result = self.aggregate_model(scope, position, model).await;
                    ModelOutcome {
                        position,
                        model: model.clone(),
                        result,
                    }
                }
                .instrument(span)
            })
            .buffer_unordered(self.concurrency)
            .inspect(|outcome| match &outcome.result {
                Ok(_) => reporter.report(UpdateEvent::ModelAggregated {
                    pass,
                    model: &outcome.model,
                    position: outcome.position,
                }),
                Err(e) => {
                    let error = e.to_string();
                    reporter.report(UpdateEvent::ModelSkipped {
                        pass,
                        model: &outcome.model,
                        position: outcome.position,
                        error: &error,
                    });
                }
            })
            .collect()
            .await;

        outcomes.sort_by_key(|o| o.position);
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConnectionTarget, QueryTimeouts};
    use crate::memory::MemoryStore;
    use crate::models::DatasetDefinition;
    use crate::progress::SilentReporter;
    use crate::template::TemplateSet;
    use serde_json::{json, Value};

    fn record(value: Value) -> Record {
        Record::new(value.as_object().cloned().unwrap())
    }

    fn templates() -> TemplateSet {
        TemplateSet::from_texts([
            (TemplateName::GetDistinctThresholds, "thresholds {{vxMODEL}}"),
            (TemplateName::GetDistinctFcstLen, "fcstlen {{vxMODEL}}"),
            (TemplateName::GetDistinctRegion, "region {{vxMODEL}}"),
            (TemplateName::GetDistinctDisplayText, "text {{vxMODEL}}"),
            (TemplateName::GetDistinctDisplayCategory, "category {{vxMODEL}}"),
            (TemplateName::GetDistinctDisplayOrder, "order {{vxMODEL}} {{mindx}}"),
            (TemplateName::GetMinMaxCountFloor, "minmax {{vxMODEL}}"),
        ])
    }

    fn dataset() -> DatasetDefinition {
        DatasetDefinition {
            name: "HRRR".into(),
            app: "cb-visibility".into(),
            sub_doc_type: "VISIBILITY".into(),
            doc_types: vec!["CTC".into()],
        }
    }

    fn target() -> ConnectionTarget {
        ConnectionTarget {
            bucket: "vxdata".into(),
            scope: "_default".into(),
            collection: "METAR".into(),
        }
    }

    /// Answers every aggregate; `minmax` is empty for models listed in `no_span`.
    fn store(threshold_rows: Vec<Value>, no_span: &'static [&'static str]) -> MemoryStore {
        MemoryStore::new(move |statement| {
            let mut words = statement.split_whitespace();
            let kind = words.next().unwrap_or_default();
            let model = words.next().unwrap_or_default().to_string();
            let rows = match kind {
                "thresholds" => threshold_rows.clone(),
                "fcstlen" => vec![json!(0), json!(6.0)],
                "region" => vec![json!("E_US"), json!("W_US")],
                "text" => vec![json!(format!("{model} text")), json!("ignored")],
                "category" => vec![json!(1)],
                "order" => {
                    let mindx: i64 = words.next().unwrap_or_default().parse().unwrap();
                    vec![json!(mindx + 10)]
                }
                "minmax" if no_span.iter().any(|m| *m == model) => Vec::new(),
                "minmax" => vec![json!({
                    "mindate": 100.0,
                    "maxdate": 200,
                    "numrecs": 3.0,
                    "updated": 300,
                })],
                _ => return Err(AppError::Query(format!("unexpected {statement}"))),
            };
            Ok(rows)
        })
    }

    #[test]
    fn test_select_aggregate_row() {
        assert_eq!(select_aggregate_row(Vec::new()), None);
        assert_eq!(
            select_aggregate_row(vec![record(json!({"a": 1}))]),
            Some(record(json!({"a": 1})))
        );
        assert_eq!(
            select_aggregate_row(vec![
                record(json!({})),
                record(json!({"a": 2})),
                record(json!({"a": 3})),
            ]),
            Some(record(json!({"a": 2})))
        );
    }

    #[tokio::test]
    async fn test_aggregate_model_assembles_record() {
        let store = store(vec![json!({}), json!({"thresholds": ["500", "1000"]})], &[]);
        let templates = templates();
        let queries = TemplateQueries::new(&store, &templates, QueryTimeouts::default());
        let (dataset, target) = (dataset(), target());
        let scope = PassScope::new(&dataset, "CTC", &target, "matsGui");

        let record = Aggregator::new(&queries, MissingAggregatePolicy::SkipModel, 1)
            .aggregate_model(&scope, 2, "HRRR_OPS")
            .await
            .unwrap();

        assert_eq!(record.name, "HRRR_OPS");
        assert_eq!(record.levels, ModelLevels::Thresholds(vec!["500".into(), "1000".into()]));
        assert_eq!(record.fcst_lens, vec![0, 6]);
        assert_eq!(record.regions, vec!["E_US", "W_US"]);
        assert_eq!(record.display_text, "HRRR_OPS text");
        assert_eq!(record.display_category, 1);
        assert_eq!(record.display_order, 12);
        assert_eq!((record.mindate, record.maxdate, record.numrecs), (100, 200, 3));
        assert_eq!(record.updated, Some(300));
        assert!(store.statements().contains(&"order HRRR_OPS 2".to_string()));
    }

    #[tokio::test]
    async fn test_sums_doc_type_uses_variables() {
        let store = store(vec![json!({"thresholds": ["2m", "10m"]})], &[]);
        let templates = templates();
        let queries = TemplateQueries::new(&store, &templates, QueryTimeouts::default());
        let (dataset, target) = (dataset(), target());
        let scope = PassScope::new(&dataset, "SUMS", &target, "matsGui");

        let record = Aggregator::new(&queries, MissingAggregatePolicy::SkipModel, 1)
            .aggregate_model(&scope, 0, "HRRR_OPS")
            .await
            .unwrap();
        assert_eq!(record.levels.variables(), Some(&["2m".to_string(), "10m".to_string()][..]));
        assert!(record.levels.thresholds().is_none());
    }

    #[tokio::test]
    async fn test_missing_span_skips_or_zero_fills() {
        let store = store(vec![json!({"thresholds": ["500"]})], &["EMPTY"]);
        let templates = templates();
        let queries = TemplateQueries::new(&store, &templates, QueryTimeouts::default());
        let (dataset, target) = (dataset(), target());
        let scope = PassScope::new(&dataset, "CTC", &target, "matsGui");

        let err = Aggregator::new(&queries, MissingAggregatePolicy::SkipModel, 1)
            .aggregate_model(&scope, 0, "EMPTY")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::MissingAggregate { aggregate: "minMaxCount" }));

        let record = Aggregator::new(&queries, MissingAggregatePolicy::ZeroFill, 1)
            .aggregate_model(&scope, 0, "EMPTY")
            .await
            .unwrap();
        assert_eq!((record.mindate, record.maxdate, record.numrecs), (0, 0, 0));
        assert_eq!(record.updated, None);
    }

    #[tokio::test]
    async fn test_aggregate_all_keeps_position_order_and_isolates_failures() {
        let store = store(vec![json!({"thresholds": ["500"]})], &["B"]);
        let templates = templates();
        let queries = TemplateQueries::new(&store, &templates, QueryTimeouts::default());
        let (dataset, target) = (dataset(), target());
        let scope = PassScope::new(&dataset, "CTC", &target, "matsGui");
        let models: Vec<String> = ["C", "B", "A", "D"].iter().map(|s| s.to_string()).collect();

        let outcomes = Aggregator::new(&queries, MissingAggregatePolicy::SkipModel, 3)
            .aggregate_all(&scope, &models, &SilentReporter)
            .await;

        let order: Vec<_> = outcomes.iter().map(|o| (o.position, o.model.as_str())).collect();
        assert_eq!(order, vec![(0, "C"), (1, "B"), (2, "A"), (3, "D")]);
        assert!(outcomes[1].result.is_err());
        for i in [0, 2, 3] {
            let record = outcomes[i].result.as_ref().unwrap();
            assert_eq!(record.display_order, i as i64 + 10);
        }
    }
}
