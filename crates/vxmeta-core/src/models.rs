//! Domain types: dataset definitions, per-model records and the synthesized
//! metadata document.

use serde::{Deserialize, Serialize};

/// DocType whose "thresholds" aggregate actually lists variables.
pub const SUMS_DOC_TYPE: &str = "SUMS";

/// A dataset entry of the settings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetDefinition {
    pub name: String,
    pub app: String,
    #[serde(rename = "subDocType")]
    pub sub_doc_type: String,
    #[serde(rename = "docType")]
    pub doc_types: Vec<String>,
}

/// Threshold or variable list of a model. A record carries exactly one of
/// the two, chosen by the docType of the pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ModelLevels {
    #[serde(rename = "thresholds")]
    Thresholds(Vec<String>),
    #[serde(rename = "variables")]
    Variables(Vec<String>),
}

impl ModelLevels {
    pub fn for_doc_type(doc_type: &str, values: Vec<String>) -> Self {
        if doc_type == SUMS_DOC_TYPE {
            ModelLevels::Variables(values)
        } else {
            ModelLevels::Thresholds(values)
        }
    }

    pub fn thresholds(&self) -> Option<&[String]> {
        match self {
            ModelLevels::Thresholds(v) => Some(v.as_slice()),
            ModelLevels::Variables(_) => None,
        }
    }

    pub fn variables(&self) -> Option<&[String]> {
        match self {
            ModelLevels::Variables(v) => Some(v.as_slice()),
            ModelLevels::Thresholds(_) => None,
        }
    }
}

/// Date range and record count of a model's raw data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateSpan {
    pub mindate: i64,
    pub maxdate: i64,
    pub numrecs: i64,
    /// Freshness stamp reported by the same aggregate.
    pub updated: Option<i64>,
}

/// Summary of one model, rebuilt from scratch on every run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRecord {
    pub name: String,
    /// Same as `name`; older document readers look the model up here.
    pub model: String,
    #[serde(flatten)]
    pub levels: ModelLevels,
    pub fcst_lens: Vec<i64>,
    pub regions: Vec<String>,
    pub display_text: String,
    pub display_category: i64,
    pub display_order: i64,
    pub mindate: i64,
    pub maxdate: i64,
    pub numrecs: i64,
    #[serde(skip)]
    pub updated: Option<i64>,
}

/// The per-dataset summary document written to the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataDocument {
    pub id: String,
    #[serde(rename = "type")]
    pub doc_kind: String,
    pub doc_type: String,
    pub subset: String,
    pub version: String,
    pub name: String,
    pub app: String,
    pub updated: i64,
    pub models: Vec<ModelRecord>,
}

impl MetadataDocument {
    pub const KIND: &'static str = "MD";
    pub const SUBSET: &'static str = "COMMON";
    pub const VERSION: &'static str = "V01";

    /// Deterministic document id for a dataset.
    pub fn id_for(namespace: &str, dataset_name: &str) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            Self::KIND,
            namespace,
            dataset_name,
            Self::SUBSET,
            Self::VERSION
        )
    }

    pub fn model_names(&self) -> Vec<&str> {
        self.models.iter().map(|m| m.name.as_str()).collect()
    }
}
