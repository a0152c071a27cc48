//! Facets module: aggregations for the faceted query mode.
//!
//! Three groups of buckets are emitted:
//! - `filtered`: every flat facet, under the active query and the ACL
//! - `nested_<path>`: facets of each nested collection, under the ACL only
//! - one global bucket per facet the active statement filters on, and per
//!   composite field, re-filtered by the active statement with that facet's
//!   own filters neutralized

use crate::compiler::FilterCompiler;
use crate::dialect::Dialect;
use crate::expr::StatementSet;
use crate::resolver::Resolver;
use crate::schema::{nested_aggregation, FieldEntry, FieldTarget, FILTERED_AGGREGATION};
use crate::SqonError;
use indexmap::IndexMap;
use log::debug;
use serde_json::{Map, Value};

pub struct FacetGenerator<'a, D: Dialect> {
    compiler: FilterCompiler<'a, D>,
}

impl<'a, D: Dialect> FacetGenerator<'a, D> {
    pub fn new(compiler: FilterCompiler<'a, D>) -> Self {
        Self { compiler }
    }

    /// Builds the aggregation map.
    ///
    /// `resolved` is the active statement's tree, and `active` its key when
    /// it exists in `statements`.
    pub fn generate(
        &self,
        resolved: Option<&Value>,
        active: Option<&'a str>,
        statements: &'a StatementSet<'a>,
    ) -> Result<Map<String, Value>, SqonError> {
        let dialect = self.compiler.dialect();
        let acl = self.compiler.acl();
        let mut aggs = Map::new();

        let mut flat = Map::new();
        let mut nested: IndexMap<&str, Map<String, Value>> = IndexMap::new();
        for (id, entry) in self.compiler.schema().fields() {
            let facets = self.field_aggregations(id, entry);
            match &entry.nested {
                Some(path) => nested.entry(path.as_str()).or_default().extend(facets),
                None => flat.extend(facets),
            }
        }
        let scope = dialect.scoped(resolved.cloned(), acl);
        aggs.insert(FILTERED_AGGREGATION.to_string(), dialect.filter_bucket(scope, flat));
        for (path, facets) in nested {
            aggs.insert(nested_aggregation(path), self.nested_scope(path, facets));
        }

        let referenced = match active {
            Some(key) => statements.referenced_fields(key)?,
            None => Default::default(),
        };
        for (id, entry) in self.compiler.schema().fields() {
            if !referenced.contains(id) && !entry.is_composite() {
                continue;
            }
            let except = match active {
                Some(key) => Resolver::excluding(statements, self.compiler, id).resolve(key)?,
                None => None,
            };
            let filter = dialect.scoped(except, acl);
            let inner = entry.aggregation.map(|_| {
                let facets = self.field_aggregations(id, entry);
                match &entry.nested {
                    Some(path) => {
                        let mut scoped = Map::new();
                        scoped.insert(nested_aggregation(path), self.nested_scope(path, facets));
                        scoped
                    }
                    None => facets,
                }
            });
            aggs.insert(id.clone(), dialect.global_bucket(filter, inner));
        }
        Ok(aggs)
    }

    /// The facet histogram(s) for one field; empty for fields without an
    /// aggregation or with a composite target.
    fn field_aggregations(&self, id: &str, entry: &FieldEntry) -> Map<String, Value> {
        let dialect = self.compiler.dialect();
        let Some(def) = entry.aggregation else {
            if !entry.is_composite() {
                debug!("field '{}' has no aggregation, skipping its histogram", id);
            }
            return Map::new();
        };
        let named: Vec<(String, Value)> = match &entry.target {
            FieldTarget::Path(path) => dialect.facet_aggregations(id, path, def),
            FieldTarget::Flags(flags) => flags
                .iter()
                .flat_map(|(flag, path)| dialect.facet_aggregations(flag, path, def.for_flag()))
                .collect(),
            FieldTarget::Composite { .. } => Vec::new(),
        };
        named.into_iter().collect()
    }

    fn nested_scope(&self, path: &str, facets: Map<String, Value>) -> Value {
        let dialect = self.compiler.dialect();
        let mut scoped = Map::new();
        scoped.insert(FILTERED_AGGREGATION.to_string(), dialect.filter_bucket(self.compiler.acl().clone(), facets));
        dialect.nested_bucket(path, scoped)
    }
}
