//! sqon-translator: compiles SQON statement graphs into search-engine queries.
//!
//! A SQON is a list of named statements, each an infix sequence of filters,
//! subquery references and `and`/`or` operators. This crate resolves the
//! active statement into a boolean clause tree and assembles one of three
//! request bodies around it, always scoped by the caller's ACL clause:
//!
//! - a count query (`{ query }`)
//! - a paginated, sorted result query (`{ from, size, query, sort }`)
//! - a faceted aggregation query (`{ size: 0, query, aggs }`) whose facets
//!   are also computed with their own filter neutralized
//!
//! # Architecture
//! - Schema (field ids → engine paths, nesting, aggregations), supplied by the caller
//! - SQON AST and statement index
//! - Filter-kind compiler and nesting/ACL wrapper
//! - Statement resolver (memoized, cycle-detecting)
//! - Facet aggregation generator
//! - Query assembler
//!
//! All engine vocabulary lives behind the [`Dialect`] trait; [`ElasticDialect`]
//! is the bundled implementation.

mod schema;
mod expr;
mod compiler;
mod resolver;
mod facets;
mod query;
mod context;
mod types;
mod dialect;

pub use schema::*;
pub use expr::*;
pub use compiler::*;
pub use resolver::*;
pub use facets::*;
pub use query::*;
pub use context::*;
pub use types::*;
pub use dialect::*;

use thiserror::Error;

/// Unified error type for SQON translation.
///
/// Every variant is a hard failure: the caller never receives a partially
/// applied filter.
#[derive(Debug, Error)]
pub enum SqonError {
    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),
    /// Invalid schema document, including colliding aggregation names.
    #[error("Schema error: {0}")]
    Schema(String),
    #[error("Field not found: {0}")]
    UnknownField(String),
    #[error("Unknown flag '{flag}' for field '{field}'")]
    UnknownFlag { field: String, flag: String },
    #[error("Statement not found: {0}")]
    MissingStatement(String),
    #[error("Statement key '{0}' is declared more than once")]
    DuplicateStatement(String),
    /// Statement keys from the entry point to the re-entered key.
    #[error("Cyclic subquery: {}", path.join(" -> "))]
    CyclicSubquery { path: Vec<String> },
    /// A subquery names a statement with no instructions.
    #[error("Subquery '{0}' resolves to an empty statement")]
    EmptySubquery(String),
    #[error("Malformed statement '{key}': {reason}")]
    MalformedStatement { key: String, reason: String },
    #[error("Invalid values for field '{field}': {reason}")]
    InvalidValues { field: String, reason: String },
    #[error("Invalid bounds for field '{field}': {reason}")]
    InvalidBounds { field: String, reason: String },
    /// The filter kind cannot apply to the field's schema target, e.g.
    /// `genericbool` on a single-path field.
    #[error("Field '{field}' cannot be filtered as {kind}")]
    FieldKindMismatch { field: String, kind: &'static str },
    #[error("Unknown result group: {0}")]
    UnknownGroup(String),
    #[error("A subject id is required to scope the query")]
    MissingSubject,
    /// `index * size` does not fit the result offset.
    #[error("Page {index} of size {size} overflows the result offset")]
    PageOverflow { index: u64, size: u64 },
}
