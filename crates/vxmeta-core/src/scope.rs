use crate::config::ConnectionTarget;
use crate::models::{DatasetDefinition, MetadataDocument};
use crate::template::Bindings;

pub const TOKEN_DB_TARGET: &str = "vxDBTARGET";
pub const TOKEN_DOC_TYPE: &str = "vxDOCTYPE";
pub const TOKEN_SUB_DOC_TYPE: &str = "vxSUBDOCTYPE";
pub const TOKEN_APP: &str = "vxAPP";
pub const TOKEN_DATASET: &str = "vxDATASET";
pub const TOKEN_METADATA_ID: &str = "vxMETADATAID";
pub const TOKEN_MODEL: &str = "vxMODEL";
pub const TOKEN_MODEL_INDEX: &str = "mindx";

/// Everything that identifies one (dataset, docType) pass.
#[derive(Debug, Clone, Copy)]
pub struct PassScope<'a> {
    pub dataset: &'a DatasetDefinition,
    pub doc_type: &'a str,
    pub target: &'a ConnectionTarget,
    pub namespace: &'a str,
}

impl<'a> PassScope<'a> {
    pub fn new(
        dataset: &'a DatasetDefinition,
        doc_type: &'a str,
        target: &'a ConnectionTarget,
        namespace: &'a str,
    ) -> Self {
        Self {
            dataset,
            doc_type,
            target,
            namespace,
        }
    }

    pub fn metadata_id(&self) -> String {
        MetadataDocument::id_for(self.namespace, &self.dataset.name)
    }

    /// Bindings shared by every query of the pass.
    pub fn bindings(&self) -> Bindings {
        Bindings::new()
            .with(TOKEN_DB_TARGET, self.target.namespace())
            .with(TOKEN_DOC_TYPE, self.doc_type)
            .with(TOKEN_SUB_DOC_TYPE, &self.dataset.sub_doc_type)
            .with(TOKEN_APP, &self.dataset.app)
            .with(TOKEN_DATASET, &self.dataset.name)
            .with(TOKEN_METADATA_ID, self.metadata_id())
    }

    pub fn model_bindings(&self, model: &str) -> Bindings {
        self.bindings().with(TOKEN_MODEL, model)
    }

    /// Model bindings plus its 0-based position in the required-models list.
    pub fn indexed_model_bindings(&self, model: &str, position: usize) -> Bindings {
        self.model_bindings(model).with(TOKEN_MODEL_INDEX, position)
    }
}
