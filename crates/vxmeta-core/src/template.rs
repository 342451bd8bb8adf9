//! Named query templates and `{{token}}` substitution.
//!
//! Templates are plain query text stored as `<name>.sql` files. Tokens are
//! written `{{name}}`; [`resolve`] replaces the ones it has bindings for and
//! leaves every other token in place, so a partially bound template can be
//! inspected or bound again later.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

use crate::AppError;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Token values for one resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Bindings {
    values: BTreeMap<String, String>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a binding, builder style.
    pub fn with(mut self, token: impl Into<String>, value: impl ToString) -> Self {
        self.values.insert(token.into(), value.to_string());
        self
    }

    pub fn insert(&mut self, token: impl Into<String>, value: impl ToString) {
        self.values.insert(token.into(), value.to_string());
    }

    pub fn get(&self, token: &str) -> Option<&str> {
        self.values.get(token).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: ToString> FromIterator<(K, V)> for Bindings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut bindings = Bindings::new();
        for (k, v) in iter {
            bindings.insert(k, v);
        }
        bindings
    }
}

/// Substitutes every bound `{{token}}` in `template`.
///
/// Unbound tokens and a stray or unterminated `{{` are copied through
/// literally.
/// Substituted values are never rescanned, so a value containing `{{x}}`
/// stays as written.
pub fn resolve(template: &str, bindings: &Bindings) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        let after_open = &rest[start + OPEN.len()..];

        let Some(end) = after_open.find(CLOSE) else {
            out.push_str(&rest[start..]);
            return out;
        };

        let token = &after_open[..end];
        if let Some(inner) = token.find(OPEN) {
            out.push_str(OPEN);
            out.push_str(&token[..inner]);
            rest = &after_open[inner..];
            continue;
        }
        match bindings.get(token.trim()) {
            Some(value) => out.push_str(value),
            None => {
                out.push_str(OPEN);
                out.push_str(token);
                out.push_str(CLOSE);
            }
        }
        rest = &after_open[end + CLOSE.len()..];
    }

    out.push_str(rest);
    out
}

/// Tokens referenced by a template, in order of first appearance.
pub fn tokens(template: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find(OPEN) {
        let after_open = &rest[start + OPEN.len()..];
        let Some(end) = after_open.find(CLOSE) else {
            break;
        };
        if let Some(inner) = after_open[..end].find(OPEN) {
            rest = &after_open[inner..];
            continue;
        }
        let token = after_open[..end].trim();
        if !found.contains(&token) {
            found.push(token);
        }
        rest = &after_open[end + CLOSE.len()..];
    }
    found
}

/// Whether a query runs against raw data or only touches metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    /// Short query against metadata documents.
    Lookup,
    /// Long-running aggregate over raw documents.
    Aggregate,
}

/// The fixed set of templates the pipeline issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TemplateName {
    GetModels,
    GetModelsNoData,
    GetModelsWithMetadata,
    DeleteModelMetadata,
    GetDistinctThresholds,
    GetDistinctFcstLen,
    GetDistinctRegion,
    GetDistinctDisplayText,
    GetDistinctDisplayCategory,
    GetDistinctDisplayOrder,
    GetMinMaxCountFloor,
}

impl TemplateName {
    pub const ALL: [TemplateName; 11] = [
        TemplateName::GetModels,
        TemplateName::GetModelsNoData,
        TemplateName::GetModelsWithMetadata,
        TemplateName::DeleteModelMetadata,
        TemplateName::GetDistinctThresholds,
        TemplateName::GetDistinctFcstLen,
        TemplateName::GetDistinctRegion,
        TemplateName::GetDistinctDisplayText,
        TemplateName::GetDistinctDisplayCategory,
        TemplateName::GetDistinctDisplayOrder,
        TemplateName::GetMinMaxCountFloor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateName::GetModels => "getModels",
            TemplateName::GetModelsNoData => "getModelsNoData",
            TemplateName::GetModelsWithMetadata => "getModelsWithMetadata",
            TemplateName::DeleteModelMetadata => "deleteModelMetadata",
            TemplateName::GetDistinctThresholds => "getDistinctThresholds",
            TemplateName::GetDistinctFcstLen => "getDistinctFcstLen",
            TemplateName::GetDistinctRegion => "getDistinctRegion",
            TemplateName::GetDistinctDisplayText => "getDistinctDisplayText",
            TemplateName::GetDistinctDisplayCategory => "getDistinctDisplayCategory",
            TemplateName::GetDistinctDisplayOrder => "getDistinctDisplayOrder",
            TemplateName::GetMinMaxCountFloor => "getMinMaxCountFloor",
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.sql", self.as_str())
    }

    pub fn kind(&self) -> QueryKind {
        match self {
            TemplateName::GetModelsWithMetadata | TemplateName::DeleteModelMetadata => {
                QueryKind::Lookup
            }
            _ => QueryKind::Aggregate,
        }
    }
}

impl fmt::Display for TemplateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable template text keyed by name, loaded once per run.
#[derive(Debug, Clone, Default)]
pub struct TemplateSet {
    texts: HashMap<TemplateName, String>,
}

impl TemplateSet {
    /// Loads `<name>.sql` for every [`TemplateName`] from `dir`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the first file that is missing or unreadable.
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, AppError> {
        let dir = dir.as_ref();
        let mut texts = HashMap::with_capacity(TemplateName::ALL.len());
        for name in TemplateName::ALL {
            let path = dir.join(name.file_name());
            let text = std::fs::read_to_string(&path).map_err(|e| {
                AppError::Config(format!("cannot read template {}: {e}", path.display()))
            })?;
            texts.insert(name, text);
        }
        Ok(Self { texts })
    }

    /// Builds a set from in-memory text. Names not supplied stay unloaded.
    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = (TemplateName, S)>,
        S: Into<String>,
    {
        Self {
            texts: texts.into_iter().map(|(n, t)| (n, t.into())).collect(),
        }
    }

    pub fn get(&self, name: TemplateName) -> Result<&str, AppError> {
        self.texts
            .get(&name)
            .map(String::as_str)
            .ok_or_else(|| AppError::UnknownTemplate(name.to_string()))
    }

    /// Resolves a named template against `bindings`.
    pub fn render(&self, name: TemplateName, bindings: &Bindings) -> Result<String, AppError> {
        Ok(resolve(self.get(name)?, bindings))
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}
