//! Schema module: the field registry consumed by the translator.
//!
//! This module provides the QuerySchema type and builder mapping SQON field
//! ids to engine paths, nesting and facet aggregations. The schema is supplied
//! by the deployment and never mutated by the translator.

use crate::SqonError;
use indexmap::IndexMap;
use serde::{Serialize, Deserialize};
use std::io::Read;

/// Name of the top-level bucket holding every flat facet.
pub const FILTERED_AGGREGATION: &str = "filtered";

/// Name of the top-level bucket scoping the facets of the nested collection at `path`.
pub fn nested_aggregation(path: &str) -> String {
    format!("nested_{}", path)
}

/// What a field id compiles to on the engine side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldTarget {
    /// A single engine path.
    Path(String),
    /// Named boolean flags, each stored in its own engine field.
    Flags(IndexMap<String, String>),
    /// A numeric score sub-field and a categorical call sub-field.
    Composite { score: String, call: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AggregationDef {
    Terms { size: u32 },
    Minmax,
}

impl AggregationDef {
    /// Aggregation names emitted for a facet called `name`.
    pub fn names(self, name: &str) -> Vec<String> {
        match self {
            AggregationDef::Terms { .. } => vec![name.to_string()],
            AggregationDef::Minmax => vec![format!("{}_min", name), format!("{}_max", name)],
        }
    }

    /// The aggregation used for each flag of a flag field. Flags are
    /// booleans, so a min/max becomes a two-bucket histogram.
    pub fn for_flag(self) -> Self {
        match self {
            AggregationDef::Minmax => AggregationDef::Terms { size: 2 },
            terms => terms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldEntry {
    #[serde(flatten)]
    pub target: FieldTarget,
    /// Name of the nested document collection the field lives under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nested: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation: Option<AggregationDef>,
}

impl FieldEntry {
    pub fn path(path: impl Into<String>) -> Self {
        Self::with_target(FieldTarget::Path(path.into()))
    }

    pub fn flags<I, K, V>(flags: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let flags = flags.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        Self::with_target(FieldTarget::Flags(flags))
    }

    pub fn composite(score: impl Into<String>, call: impl Into<String>) -> Self {
        Self::with_target(FieldTarget::Composite { score: score.into(), call: call.into() })
    }

    fn with_target(target: FieldTarget) -> Self {
        Self { target, nested: None, aggregation: None }
    }

    pub fn nested(mut self, path: impl Into<String>) -> Self {
        self.nested = Some(path.into());
        self
    }

    pub fn terms(mut self, size: u32) -> Self {
        self.aggregation = Some(AggregationDef::Terms { size });
        self
    }

    pub fn min_max(mut self) -> Self {
        self.aggregation = Some(AggregationDef::Minmax);
        self
    }

    pub fn is_composite(&self) -> bool {
        matches!(self.target, FieldTarget::Composite { .. })
    }

    /// Names of the histogram aggregations this field contributes to its
    /// facet scope.
    pub fn histogram_names(&self, id: &str) -> Vec<String> {
        let Some(def) = self.aggregation else {
            return Vec::new();
        };
        match &self.target {
            FieldTarget::Path(_) => def.names(id),
            FieldTarget::Flags(flags) => flags.keys().flat_map(|flag| def.for_flag().names(flag)).collect(),
            FieldTarget::Composite { .. } => Vec::new(),
        }
    }
}

/// Sort settings for one result set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultGroup {
    pub sort_field: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paging {
    pub index: u64,
    pub size: u64,
}

impl Default for Paging {
    fn default() -> Self {
        Self { index: 0, size: 25 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub struct QuerySchema {
    subject_field: String,
    #[serde(default)]
    paging: Paging,
    default_group: String,
    groups: IndexMap<String, ResultGroup>,
    fields: IndexMap<String, FieldEntry>,
}

impl QuerySchema {
    pub fn from_json_str(json: &str) -> Result<Self, SqonError> {
        let schema: QuerySchema = serde_json::from_str(json)?;
        schema.validate()?;
        Ok(schema)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, SqonError> {
        let schema: QuerySchema = serde_json::from_reader(reader)?;
        schema.validate()?;
        Ok(schema)
    }

    /// Engine path holding the subject identifier the ACL clause scopes on.
    pub fn subject_field(&self) -> &str {
        &self.subject_field
    }
    pub fn paging(&self) -> Paging {
        self.paging
    }
    pub fn default_group(&self) -> &str {
        &self.default_group
    }
    pub fn group(&self, name: &str) -> Option<&ResultGroup> {
        self.groups.get(name)
    }
    pub fn field(&self, id: &str) -> Option<&FieldEntry> {
        self.fields.get(id)
    }
    /// All fields, in declaration order.
    pub fn fields(&self) -> &IndexMap<String, FieldEntry> {
        &self.fields
    }

    fn validate(&self) -> Result<(), SqonError> {
        if self.subject_field.is_empty() {
            return Err(SqonError::Schema("subject_field is empty".to_string()));
        }
        if self.paging.size == 0 {
            return Err(SqonError::Schema("paging.size must be positive".to_string()));
        }
        if !self.groups.contains_key(&self.default_group) {
            return Err(SqonError::Schema(format!("default group '{}' is not declared", self.default_group)));
        }
        for (name, group) in &self.groups {
            if group.sort_field.is_empty() {
                return Err(SqonError::Schema(format!("group '{}' has an empty sort field", name)));
            }
        }
        for (id, entry) in &self.fields {
            let empty_path = match &entry.target {
                FieldTarget::Path(path) => path.is_empty(),
                FieldTarget::Flags(flags) => flags.is_empty() || flags.values().any(|p| p.is_empty()),
                FieldTarget::Composite { score, call } => score.is_empty() || call.is_empty(),
            };
            if empty_path {
                return Err(SqonError::Schema(format!("field '{}' has an empty engine path", id)));
            }
            if matches!(&entry.nested, Some(path) if path.is_empty()) {
                return Err(SqonError::Schema(format!("field '{}' has an empty nested path", id)));
            }
            if matches!(entry.aggregation, Some(AggregationDef::Terms { size: 0 })) {
                return Err(SqonError::Schema(format!("field '{}' has a zero terms size", id)));
            }
        }
        self.check_aggregation_names()
    }

    /// Every aggregation name must be unique within the map it lands in:
    /// the top level holds `filtered`, one `nested_<path>` per nested path
    /// and one bucket per field id, and each facet scope holds the
    /// histograms of its fields.
    fn check_aggregation_names(&self) -> Result<(), SqonError> {
        let mut top: IndexMap<String, String> = IndexMap::new();
        top.insert(FILTERED_AGGREGATION.to_string(), "the flat facet scope".to_string());
        for path in self.fields.values().filter_map(|e| e.nested.as_deref()) {
            top.entry(nested_aggregation(path)).or_insert_with(|| format!("nested path '{}'", path));
        }
        for id in self.fields.keys() {
            if let Some(owner) = top.get(id) {
                return Err(SqonError::Schema(format!("field id '{}' collides with the aggregation of {}", id, owner)));
            }
        }

        let mut scopes: IndexMap<Option<&str>, IndexMap<String, &str>> = IndexMap::new();
        for (id, entry) in &self.fields {
            let scope = scopes.entry(entry.nested.as_deref()).or_default();
            for name in entry.histogram_names(id) {
                if let Some(owner) = scope.insert(name.clone(), id.as_str()) {
                    return Err(SqonError::Schema(format!(
                        "aggregation '{}' of field '{}' collides with field '{}'",
                        name, id, owner
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct QuerySchemaBuilder {
    subject_field: String,
    paging: Paging,
    default_group: Option<String>,
    groups: IndexMap<String, ResultGroup>,
    fields: IndexMap<String, FieldEntry>,
}

impl QuerySchemaBuilder {
    pub fn new(subject_field: impl Into<String>) -> Self {
        Self { subject_field: subject_field.into(), ..Self::default() }
    }
    pub fn paging(mut self, index: u64, size: u64) -> Self {
        self.paging = Paging { index, size };
        self
    }
    /// Declares a result group. The first group declared is the default.
    pub fn group(mut self, name: impl Into<String>, sort_field: impl Into<String>) -> Self {
        let name = name.into();
        if self.default_group.is_none() {
            self.default_group = Some(name.clone());
        }
        self.groups.insert(name, ResultGroup { sort_field: sort_field.into() });
        self
    }
    pub fn field(mut self, id: impl Into<String>, entry: FieldEntry) -> Self {
        self.fields.insert(id.into(), entry);
        self
    }
    pub fn build(self) -> Result<QuerySchema, SqonError> {
        let schema = QuerySchema {
            subject_field: self.subject_field,
            paging: self.paging,
            default_group: self.default_group.unwrap_or_default(),
            groups: self.groups,
            fields: self.fields,
        };
        schema.validate()?;
        Ok(schema)
    }
}
