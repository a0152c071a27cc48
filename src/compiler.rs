//! Compiler module: compiles single filter instructions into engine clauses.
//!
//! Each filter kind is validated against its schema entry, compiled through
//! the [`Dialect`], then scoped to its nested collection when the field lives
//! under one. Compiling in neutral mode keeps every shape and empties the
//! values, which is what facet self-exclusion substitutes for a filter.

use crate::dialect::Dialect;
use crate::expr::{Filter, FilterKind};
use crate::schema::{FieldEntry, FieldTarget, QuerySchema};
use crate::types::{is_scalar, Bound, Comparator, CompositeValue, Operand, SubtypeKind};
use crate::SqonError;
use log::trace;
use serde_json::Value;

pub struct FilterCompiler<'a, D: Dialect> {
    schema: &'a QuerySchema,
    dialect: &'a D,
    acl: &'a Value,
}

// Manual impls: a derive would require `D: Clone`.
impl<D: Dialect> Clone for FilterCompiler<'_, D> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<D: Dialect> Copy for FilterCompiler<'_, D> {}

impl<'a, D: Dialect> FilterCompiler<'a, D> {
    pub fn new(schema: &'a QuerySchema, dialect: &'a D, acl: &'a Value) -> Self {
        Self { schema, dialect, acl }
    }

    pub fn schema(&self) -> &'a QuerySchema {
        self.schema
    }

    pub fn dialect(&self) -> &'a D {
        self.dialect
    }

    pub fn acl(&self) -> &'a Value {
        self.acl
    }

    /// Compiles `filter` and wraps it for its nested collection, if any.
    pub fn compile(&self, filter: &Filter, neutral: bool) -> Result<Value, SqonError> {
        let entry = self
            .schema
            .field(&filter.id)
            .ok_or_else(|| SqonError::UnknownField(filter.id.clone()))?;
        trace!("compiling {} filter on '{}' (neutral: {})", filter.kind.name(), filter.id, neutral);
        let clause = self.compile_kind(&filter.id, &filter.kind, entry, neutral)?;
        Ok(wrap_if_nested(self.dialect, clause, entry, self.acl))
    }

    fn compile_kind(
        &self,
        id: &str,
        kind: &FilterKind,
        entry: &FieldEntry,
        neutral: bool,
    ) -> Result<Value, SqonError> {
        match kind {
            FilterKind::Generic { operand, values } => {
                let path = single_path(id, entry, kind)?;
                check_scalars(id, values)?;
                Ok(self.dialect.membership(path, neutral_or(values, neutral), *operand))
            }
            FilterKind::Genericbool { values } => {
                let flags = match &entry.target {
                    FieldTarget::Flags(flags) => flags,
                    _ => return Err(mismatch(id, kind)),
                };
                if values.is_empty() {
                    return Err(invalid_values(id, "no flags selected"));
                }
                let paths = values
                    .iter()
                    .map(|flag| {
                        flags.get(flag).map(String::as_str).ok_or_else(|| SqonError::UnknownFlag {
                            field: id.to_string(),
                            flag: flag.clone(),
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(self.dialect.flags(neutral_or(&paths, neutral)))
            }
            FilterKind::Numcomparison { values } => {
                let path = single_path(id, entry, kind)?;
                check_bounds(id, values)?;
                Ok(self.dialect.range(path, values, neutral))
            }
            FilterKind::Composite { values } => {
                let (score, call) = match &entry.target {
                    FieldTarget::Composite { score, call } => (score, call),
                    _ => return Err(mismatch(id, kind)),
                };
                match split_composite(id, values)? {
                    CompositeSplit::Score(bounds) => {
                        check_bounds(id, &bounds)?;
                        Ok(self.dialect.range(score, &bounds, neutral))
                    }
                    CompositeSplit::Call(calls) => {
                        check_scalars(id, &calls)?;
                        Ok(self.dialect.membership(call, neutral_or(&calls, neutral), Operand::One))
                    }
                }
            }
            FilterKind::Autocomplete { subtype, selection } => {
                let expanded = match subtype.kind {
                    SubtypeKind::Generic => FilterKind::Generic {
                        operand: subtype.operand,
                        values: selection.clone(),
                    },
                    SubtypeKind::Genericbool => FilterKind::Genericbool {
                        values: selection
                            .iter()
                            .map(|v| match v {
                                Value::String(s) => Ok(s.clone()),
                                _ => Err(invalid_values(id, "flag selections must be strings")),
                            })
                            .collect::<Result<_, _>>()?,
                    },
                };
                self.compile_kind(id, &expanded, entry, neutral)
            }
        }
    }
}

/// Scopes `clause` to the field's nested collection, restating `acl` inside it.
/// Fields outside any nested collection pass through unchanged.
pub fn wrap_if_nested<D: Dialect>(dialect: &D, clause: Value, entry: &FieldEntry, acl: &Value) -> Value {
    match &entry.nested {
        Some(path) => dialect.nested(path, clause, acl),
        None => clause,
    }
}

enum CompositeSplit {
    Score(Vec<Bound>),
    Call(Vec<Value>),
}

fn split_composite(id: &str, values: &[CompositeValue]) -> Result<CompositeSplit, SqonError> {
    match values.first() {
        None => Err(invalid_values(id, "no composite values")),
        Some(CompositeValue::Score(_)) => values
            .iter()
            .map(|v| match v {
                CompositeValue::Score(bound) => Ok(bound.clone()),
                CompositeValue::Call { .. } => Err(invalid_values(id, "score bounds mixed with calls")),
            })
            .collect::<Result<_, _>>()
            .map(CompositeSplit::Score),
        Some(CompositeValue::Call { .. }) => values
            .iter()
            .map(|v| match v {
                CompositeValue::Call { value } => Ok(value.clone()),
                CompositeValue::Score(_) => Err(invalid_values(id, "calls mixed with score bounds")),
            })
            .collect::<Result<_, _>>()
            .map(CompositeSplit::Call),
    }
}

fn single_path<'e>(id: &str, entry: &'e FieldEntry, kind: &FilterKind) -> Result<&'e str, SqonError> {
    match &entry.target {
        FieldTarget::Path(path) => Ok(path.as_str()),
        _ => Err(mismatch(id, kind)),
    }
}

fn neutral_or<T>(values: &[T], neutral: bool) -> &[T] {
    if neutral {
        &[]
    } else {
        values
    }
}

fn check_scalars(id: &str, values: &[Value]) -> Result<(), SqonError> {
    if values.is_empty() {
        return Err(invalid_values(id, "no values"));
    }
    match values.iter().find(|v| !is_scalar(v)) {
        Some(bad) => Err(invalid_values(id, &format!("{} is not a scalar", bad))),
        None => Ok(()),
    }
}

fn check_bounds(id: &str, bounds: &[Bound]) -> Result<(), SqonError> {
    let invalid = |reason: &str| SqonError::InvalidBounds { field: id.to_string(), reason: reason.to_string() };
    match bounds {
        [_] => Ok(()),
        [a, b] if a.comparator != b.comparator => Ok(()),
        [a, _] => Err(invalid(&format!("both bounds use {}", a.comparator.as_str()))),
        [] => Err(invalid("no bounds")),
        _ => Err(invalid(&format!("{} bounds, at most one {} and one {}",
            bounds.len(), Comparator::Gte.as_str(), Comparator::Lte.as_str()))),
    }
}

fn invalid_values(id: &str, reason: &str) -> SqonError {
    SqonError::InvalidValues { field: id.to_string(), reason: reason.to_string() }
}

fn mismatch(id: &str, kind: &FilterKind) -> SqonError {
    SqonError::FieldKindMismatch { field: id.to_string(), kind: kind.name() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::ElasticDialect;
    use crate::schema::QuerySchemaBuilder;
    use crate::types::Subtype;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn schema() -> QuerySchema {
        QuerySchemaBuilder::new("donors.patient_id")
            .group("patient", "impact_score")
            .field("variant_type", FieldEntry::path("variant_class").terms(10))
            .field("extdb", FieldEntry::flags([("dbsnp", "bdExt.dbsnp"), ("clinvar", "bdExt.clinvar")]))
            .field("gnomad_exomes", FieldEntry::path("frequencies.gnomad_exomes.af").min_max())
            .field("prediction_fathmm", FieldEntry::composite(
                "prediction.fathmm_converted_rank_score",
                "prediction.fathmm_pred",
            ))
            .field("gene_symbol", FieldEntry::path("genes.symbol").terms(20))
            .field("zygosity", FieldEntry::path("donors.zygosity").nested("donors").terms(5))
            .build()
            .unwrap()
    }

    fn acl() -> Value {
        json!({"term": {"donors.patient_id": "PA00001"}})
    }

    fn compile(filter: Value) -> Result<Value, SqonError> {
        let schema = schema();
        let acl = acl();
        let filter: Filter = serde_json::from_value(filter).unwrap();
        FilterCompiler::new(&schema, &ElasticDialect, &acl).compile(&filter, false)
    }

    fn compile_neutral(filter: Value) -> Value {
        let schema = schema();
        let acl = acl();
        let filter: Filter = serde_json::from_value(filter).unwrap();
        FilterCompiler::new(&schema, &ElasticDialect, &acl).compile(&filter, true).unwrap()
    }

    #[test]
    fn test_generic_one() {
        let clause = compile(json!({"id": "variant_type", "type": "generic", "operand": "one", "values": ["SNV", "deletion"]})).unwrap();
        assert_eq!(clause, json!({"bool": {
            "should": [
                {"term": {"variant_class": "SNV"}},
                {"term": {"variant_class": "deletion"}}
            ],
            "minimum_should_match": 1
        }}));
    }

    #[test]
    fn test_generic_all_and_none() {
        let all = compile(json!({"id": "variant_type", "type": "generic", "operand": "all", "values": ["SNV", "deletion"]})).unwrap();
        assert_eq!(all, json!({"bool": {"must": [
            {"term": {"variant_class": "SNV"}},
            {"term": {"variant_class": "deletion"}}
        ]}}));
        let none = compile(json!({"id": "variant_type", "type": "generic", "operand": "none", "values": ["insertion"]})).unwrap();
        assert_eq!(none, json!({"bool": {"must_not": [{"term": {"variant_class": "insertion"}}]}}));
    }

    #[test]
    fn test_genericbool_resolves_flags() {
        let clause = compile(json!({"id": "extdb", "type": "genericbool", "values": ["clinvar", "dbsnp"]})).unwrap();
        assert_eq!(clause, json!({"bool": {
            "should": [
                {"term": {"bdExt.clinvar": true}},
                {"term": {"bdExt.dbsnp": true}}
            ],
            "minimum_should_match": 1
        }}));
    }

    #[test]
    fn test_genericbool_unknown_flag() {
        let res = compile(json!({"id": "extdb", "type": "genericbool", "values": ["pubmed"]}));
        assert!(matches!(res, Err(SqonError::UnknownFlag { flag, .. }) if flag == "pubmed"));
    }

    #[test]
    fn test_numcomparison_ranges() {
        let one = compile(json!({"id": "gnomad_exomes", "type": "numcomparison",
            "values": [{"comparator": ">=", "value": 0.01}]})).unwrap();
        assert_eq!(one, json!({"bool": {"must": {"range": {"frequencies.gnomad_exomes.af": {"gte": 0.01}}}}}));
        let two = compile(json!({"id": "gnomad_exomes", "type": "numcomparison",
            "values": [{"comparator": ">=", "value": 0.01}, {"comparator": "<=", "value": 0.5}]})).unwrap();
        assert_eq!(two, json!({"range": {"frequencies.gnomad_exomes.af": {"gte": 0.01, "lte": 0.5}}}));
    }

    #[test]
    fn test_numcomparison_bad_bounds() {
        let same = compile(json!({"id": "gnomad_exomes", "type": "numcomparison",
            "values": [{"comparator": ">=", "value": 1}, {"comparator": ">=", "value": 2}]}));
        assert!(matches!(same, Err(SqonError::InvalidBounds { .. })));
        let empty = compile(json!({"id": "gnomad_exomes", "type": "numcomparison", "values": []}));
        assert!(matches!(empty, Err(SqonError::InvalidBounds { .. })));
        let three = compile(json!({"id": "gnomad_exomes", "type": "numcomparison", "values": [
            {"comparator": ">=", "value": 1}, {"comparator": "<=", "value": 2}, {"comparator": "<=", "value": 3}
        ]}));
        assert!(matches!(three, Err(SqonError::InvalidBounds { .. })));
    }

    #[test]
    fn test_composite_dispatch() {
        let call = compile(json!({"id": "prediction_fathmm", "type": "composite", "values": [{"value": "TOLERATED"}]})).unwrap();
        assert_eq!(call, json!({"bool": {
            "should": [{"term": {"prediction.fathmm_pred": "TOLERATED"}}],
            "minimum_should_match": 1
        }}));
        let score = compile(json!({"id": "prediction_fathmm", "type": "composite",
            "values": [{"comparator": ">=", "value": 0.3}]})).unwrap();
        assert_eq!(score, json!({"bool": {"must": {"range": {
            "prediction.fathmm_converted_rank_score": {"gte": 0.3}
        }}}}));
    }

    #[test]
    fn test_composite_mixed_values_rejected() {
        let res = compile(json!({"id": "prediction_fathmm", "type": "composite",
            "values": [{"value": "TOLERATED"}, {"comparator": ">=", "value": 0.3}]}));
        assert!(matches!(res, Err(SqonError::InvalidValues { .. })));
    }

    #[test]
    fn test_autocomplete_redispatches_to_subtype() {
        let clause = compile(json!({"id": "gene_symbol", "type": "autocomplete",
            "subtype": {"type": "generic", "operand": "one"}, "selection": ["BRAF"]})).unwrap();
        assert_eq!(clause, json!({"bool": {
            "should": [{"term": {"genes.symbol": "BRAF"}}],
            "minimum_should_match": 1
        }}));
    }

    #[test]
    fn test_autocomplete_matches_generic() {
        let schema = schema();
        let acl = acl();
        let compiler = FilterCompiler::new(&schema, &ElasticDialect, &acl);
        let auto = Filter {
            id: "gene_symbol".to_string(),
            kind: FilterKind::Autocomplete {
                subtype: Subtype { kind: SubtypeKind::Generic, operand: Operand::All },
                selection: vec![json!("BRAF"), json!("TP53")],
            },
        };
        let generic = Filter {
            id: "gene_symbol".to_string(),
            kind: FilterKind::Generic { operand: Operand::All, values: vec![json!("BRAF"), json!("TP53")] },
        };
        assert_eq!(compiler.compile(&auto, false).unwrap(), compiler.compile(&generic, false).unwrap());
    }

    #[test]
    fn test_nested_field_is_wrapped() {
        let clause = compile(json!({"id": "zygosity", "type": "generic", "values": ["HOM"]})).unwrap();
        assert_eq!(clause, json!({"bool": {"must": [{
            "nested": {
                "path": "donors",
                "query": {"bool": {"must": [
                    {"bool": {"should": [{"term": {"donors.zygosity": "HOM"}}], "minimum_should_match": 1}},
                    {"term": {"donors.patient_id": "PA00001"}}
                ]}}
            }
        }]}}));
    }

    #[test]
    fn test_neutral_forms_keep_shape() {
        assert_eq!(
            compile_neutral(json!({"id": "variant_type", "type": "generic", "operand": "all", "values": ["SNV"]})),
            json!({"bool": {"must": []}})
        );
        assert_eq!(
            compile_neutral(json!({"id": "gnomad_exomes", "type": "numcomparison",
                "values": [{"comparator": "<=", "value": 0.5}]})),
            json!({"bool": {"must": {"range": {"frequencies.gnomad_exomes.af": {}}}}})
        );
        assert_eq!(
            compile_neutral(json!({"id": "zygosity", "type": "generic", "values": ["HOM"]})),
            json!({"bool": {"must": [{
                "nested": {
                    "path": "donors",
                    "query": {"bool": {"must": [
                        {"bool": {"should": [], "minimum_should_match": 1}},
                        {"term": {"donors.patient_id": "PA00001"}}
                    ]}}
                }
            }]}})
        );
    }

    #[test]
    fn test_unknown_field() {
        let res = compile(json!({"id": "unknown", "type": "generic", "values": ["a"]}));
        assert!(matches!(res, Err(SqonError::UnknownField(id)) if id == "unknown"));
    }

    #[test]
    fn test_kind_mismatch_and_bad_values() {
        let res = compile(json!({"id": "variant_type", "type": "genericbool", "values": ["dbsnp"]}));
        assert!(matches!(res, Err(SqonError::FieldKindMismatch { kind: "genericbool", .. })));
        let res = compile(json!({"id": "extdb", "type": "generic", "values": ["dbsnp"]}));
        assert!(matches!(res, Err(SqonError::FieldKindMismatch { kind: "generic", .. })));
        let res = compile(json!({"id": "variant_type", "type": "generic", "values": []}));
        assert!(matches!(res, Err(SqonError::InvalidValues { .. })));
        let res = compile(json!({"id": "variant_type", "type": "generic", "values": [{"nested": 1}]}));
        assert!(matches!(res, Err(SqonError::InvalidValues { .. })));
    }
}
