//! Query module: assembles the final request bodies.
//!
//! This module provides the QueryCompiler type and the `generate_*` entry
//! points. Every request is scoped by the ACL clause; without an active
//! statement the query is the ACL clause alone.

use crate::compiler::FilterCompiler;
use crate::context::{Acl, QueryContext};
use crate::dialect::{Dialect, ElasticDialect};
use crate::expr::{Statement, StatementSet};
use crate::facets::FacetGenerator;
use crate::resolver::Resolver;
use crate::schema::QuerySchema;
use crate::SqonError;
use log::debug;
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CountQuery {
    pub query: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchQuery {
    pub from: u64,
    pub size: u64,
    pub query: Value,
    pub sort: Value,
}

/// Aggregation-only request; `size` is always 0.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FacetQuery {
    pub size: u64,
    pub query: Value,
    pub aggs: Map<String, Value>,
}

macro_rules! impl_to_json {
    ($($ty:ty),* $(,)?) => {
        $(
            impl $ty {
                pub fn to_json(&self) -> Value {
                    // Plain data of strings, numbers and JSON values always serializes.
                    serde_json::to_value(self).unwrap_or(Value::Null)
                }
            }
        )*
    };
}

impl_to_json!(CountQuery, SearchQuery, FacetQuery);

/// Result page selection; `None` fields fall back to the schema defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page<'g> {
    pub group: Option<&'g str>,
    pub index: Option<u64>,
    pub size: Option<u64>,
}

pub struct QueryCompiler<'s, D: Dialect = ElasticDialect> {
    schema: &'s QuerySchema,
    dialect: D,
}

impl<'s> QueryCompiler<'s> {
    pub fn new(schema: &'s QuerySchema) -> Self {
        Self::with_dialect(schema, ElasticDialect)
    }
}

impl<'s, D: Dialect> QueryCompiler<'s, D> {
    pub fn with_dialect(schema: &'s QuerySchema, dialect: D) -> Self {
        Self { schema, dialect }
    }

    /// The query used when no statement is active: ACL scoping only.
    pub fn empty_translation(&self, ctx: &QueryContext) -> Value {
        let acl = ctx.acl_clause(self.schema, &self.dialect);
        self.dialect.scoped(None, &acl)
    }

    pub fn count_query(
        &self,
        ctx: &QueryContext,
        statements: Option<&[Statement]>,
        active_key: Option<&str>,
    ) -> Result<CountQuery, SqonError> {
        let acl = ctx.acl_clause(self.schema, &self.dialect);
        let compiler = FilterCompiler::new(self.schema, &self.dialect, &acl);
        let set = statement_set(statements)?;
        let tree = resolve_active(compiler, &set, active_statement(&set, active_key))?;
        Ok(CountQuery { query: self.dialect.scoped(tree, &acl) })
    }

    pub fn variant_query(
        &self,
        ctx: &QueryContext,
        statements: Option<&[Statement]>,
        active_key: Option<&str>,
        page: Page<'_>,
    ) -> Result<SearchQuery, SqonError> {
        let group_name = page.group.unwrap_or(self.schema.default_group());
        let group = self
            .schema
            .group(group_name)
            .ok_or_else(|| SqonError::UnknownGroup(group_name.to_string()))?;
        let defaults = self.schema.paging();
        let index = page.index.unwrap_or(defaults.index);
        let size = page.size.unwrap_or(defaults.size);
        let from = index.checked_mul(size).ok_or(SqonError::PageOverflow { index, size })?;

        let count = self.count_query(ctx, statements, active_key)?;
        Ok(SearchQuery {
            from,
            size,
            query: count.query,
            sort: self.dialect.sort(&group.sort_field),
        })
    }

    pub fn facet_query(
        &self,
        ctx: &QueryContext,
        statements: Option<&[Statement]>,
        active_key: Option<&str>,
    ) -> Result<FacetQuery, SqonError> {
        let acl = ctx.acl_clause(self.schema, &self.dialect);
        let compiler = FilterCompiler::new(self.schema, &self.dialect, &acl);
        let set = statement_set(statements)?;
        let active = active_statement(&set, active_key);
        let tree = resolve_active(compiler, &set, active)?;
        let aggs = FacetGenerator::new(compiler).generate(tree.as_ref(), active, &set)?;
        Ok(FacetQuery {
            size: 0,
            query: self.dialect.scoped(tree, &acl),
            aggs,
        })
    }
}

fn statement_set(statements: Option<&[Statement]>) -> Result<StatementSet<'_>, SqonError> {
    match statements {
        Some(statements) => StatementSet::new(statements),
        None => Ok(StatementSet::default()),
    }
}

/// The active key, if it names a supplied statement.
fn active_statement<'a>(set: &StatementSet<'a>, active_key: Option<&str>) -> Option<&'a str> {
    active_key.and_then(|key| set.get(key)).map(|s| s.key.as_str())
}

fn resolve_active<'a, D: Dialect>(
    compiler: FilterCompiler<'a, D>,
    set: &'a StatementSet<'a>,
    active: Option<&str>,
) -> Result<Option<Value>, SqonError> {
    match active {
        Some(key) => Resolver::new(set, compiler).resolve(key),
        None => {
            debug!("no active statement, using the empty translation");
            Ok(None)
        }
    }
}

/// Count request for the active statement.
pub fn generate_count_query(
    subject_id: &str,
    statements: Option<&[Statement]>,
    active_key: Option<&str>,
    acl: &Acl,
    schema: &QuerySchema,
) -> Result<CountQuery, SqonError> {
    let ctx = QueryContext::new(subject_id, acl.clone())?;
    QueryCompiler::new(schema).count_query(&ctx, statements, active_key)
}

/// Paginated result request, sorted descending on the group's ranking field.
#[allow(clippy::too_many_arguments)]
pub fn generate_variant_query(
    subject_id: &str,
    statements: Option<&[Statement]>,
    active_key: Option<&str>,
    acl: &Acl,
    schema: &QuerySchema,
    group: Option<&str>,
    page_index: Option<u64>,
    page_size: Option<u64>,
) -> Result<SearchQuery, SqonError> {
    let ctx = QueryContext::new(subject_id, acl.clone())?;
    let page = Page { group, index: page_index, size: page_size };
    QueryCompiler::new(schema).variant_query(&ctx, statements, active_key, page)
}

/// Aggregation request with self-excluding facets.
pub fn generate_facet_query(
    subject_id: &str,
    statements: Option<&[Statement]>,
    active_key: Option<&str>,
    acl: &Acl,
    schema: &QuerySchema,
) -> Result<FacetQuery, SqonError> {
    let ctx = QueryContext::new(subject_id, acl.clone())?;
    QueryCompiler::new(schema).facet_query(&ctx, statements, active_key)
}
