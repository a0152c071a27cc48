//! Dialect module: the target query language vocabulary.
//!
//! The resolver and the facet generator only decide *what* to combine; every
//! engine-specific clause shape is produced by a [`Dialect`]. [`ElasticDialect`]
//! emits the Elasticsearch query and aggregation DSL.

use crate::schema::AggregationDef;
use crate::types::{Bound, Combinator, Comparator, Operand};
use serde_json::{json, Map, Value};

pub trait Dialect {
    /// Equality on the subject identifier; the ACL clause.
    fn subject_clause(&self, field: &str, subject_id: &str) -> Value;
    /// Set membership of `path` over `values`. `values` may be empty for the
    /// neutral form.
    fn membership(&self, path: &str, values: &[Value], operand: Operand) -> Value;
    /// Union of boolean flags, each stored at its own path.
    fn flags(&self, paths: &[&str]) -> Value;
    /// Numeric range. The neutral form keeps the shape with no bounds.
    fn range(&self, path: &str, bounds: &[Bound], neutral: bool) -> Value;
    /// Scopes `clause` to the nested collection at `path`, restating `acl` inside.
    fn nested(&self, path: &str, clause: Value, acl: &Value) -> Value;
    fn combine(&self, combinator: Combinator, operands: Vec<Value>) -> Value;
    /// The outermost query: the resolved tree, if any, next to the ACL clause.
    fn scoped(&self, tree: Option<Value>, acl: &Value) -> Value;
    fn sort(&self, field: &str) -> Value;
    /// Named aggregations computing one facet over `path`.
    fn facet_aggregations(&self, name: &str, path: &str, def: AggregationDef) -> Vec<(String, Value)>;
    fn filter_bucket(&self, filter: Value, aggs: Map<String, Value>) -> Value;
    fn nested_bucket(&self, path: &str, aggs: Map<String, Value>) -> Value;
    /// A bucket escaping the top-level query, re-filtered by `filter`.
    fn global_bucket(&self, filter: Value, aggs: Option<Map<String, Value>>) -> Value;
}

/// Elasticsearch query DSL.
#[derive(Debug, Clone, Copy, Default)]
pub struct ElasticDialect;

impl ElasticDialect {
    fn should(clauses: Vec<Value>) -> Value {
        json!({"bool": {"should": clauses, "minimum_should_match": 1}})
    }

    fn term(path: &str, value: &Value) -> Value {
        json!({"term": {path: value}})
    }
}

impl Dialect for ElasticDialect {
    fn subject_clause(&self, field: &str, subject_id: &str) -> Value {
        Self::term(field, &Value::from(subject_id))
    }

    fn membership(&self, path: &str, values: &[Value], operand: Operand) -> Value {
        let terms: Vec<Value> = values.iter().map(|v| Self::term(path, v)).collect();
        match operand {
            Operand::One => Self::should(terms),
            Operand::All => json!({"bool": {"must": terms}}),
            Operand::None => json!({"bool": {"must_not": terms}}),
        }
    }

    fn flags(&self, paths: &[&str]) -> Value {
        let terms = paths.iter().map(|p| Self::term(p, &Value::Bool(true))).collect();
        Self::should(terms)
    }

    fn range(&self, path: &str, bounds: &[Bound], neutral: bool) -> Value {
        let mut body = Map::new();
        if !neutral {
            for (comparator, key) in [(Comparator::Gte, "gte"), (Comparator::Lte, "lte")] {
                if let Some(bound) = bounds.iter().find(|b| b.comparator == comparator) {
                    body.insert(key.to_string(), Value::Number(bound.value.clone()));
                }
            }
        }
        let range = json!({"range": {path: body}});
        // Single bounds carry a must envelope, double bounds do not.
        if bounds.len() == 1 {
            json!({"bool": {"must": range}})
        } else {
            range
        }
    }

    fn nested(&self, path: &str, clause: Value, acl: &Value) -> Value {
        json!({"bool": {"must": [{
            "nested": {
                "path": path,
                "query": {"bool": {"must": [clause, acl]}}
            }
        }]}})
    }

    fn combine(&self, combinator: Combinator, operands: Vec<Value>) -> Value {
        match combinator {
            Combinator::And => json!({"bool": {"must": operands}}),
            Combinator::Or => Self::should(operands),
        }
    }

    fn scoped(&self, tree: Option<Value>, acl: &Value) -> Value {
        let mut filter: Vec<Value> = tree.into_iter().collect();
        filter.push(acl.clone());
        json!({"bool": {"filter": filter}})
    }

    fn sort(&self, field: &str) -> Value {
        json!([{field: {"order": "desc"}}])
    }

    fn facet_aggregations(&self, name: &str, path: &str, def: AggregationDef) -> Vec<(String, Value)> {
        match def {
            AggregationDef::Terms { size } => vec![(
                name.to_string(),
                json!({"terms": {"field": path, "order": {"_count": "desc"}, "size": size}}),
            )],
            AggregationDef::Minmax => def
                .names(name)
                .into_iter()
                .zip([json!({"min": {"field": path}}), json!({"max": {"field": path}})])
                .collect(),
        }
    }

    fn filter_bucket(&self, filter: Value, aggs: Map<String, Value>) -> Value {
        json!({"filter": filter, "aggs": aggs})
    }

    fn nested_bucket(&self, path: &str, aggs: Map<String, Value>) -> Value {
        json!({"nested": {"path": path}, "aggs": aggs})
    }

    fn global_bucket(&self, filter: Value, aggs: Option<Map<String, Value>>) -> Value {
        let mut except = Map::new();
        except.insert("filter".to_string(), filter);
        if let Some(aggs) = aggs {
            except.insert("aggs".to_string(), Value::Object(aggs));
        }
        json!({"global": {}, "aggs": {"filtered_except": except}})
    }
}
