//! Expression (AST) module: the parsed SQON statement graph.
//!
//! This module provides the Statement, Instruction and Filter types, and the
//! StatementSet index used to resolve subquery references.

use crate::types::{Bound, Combinator, CompositeValue, Operand, Subtype};
use crate::SqonError;
use indexmap::{IndexMap, IndexSet};
use serde::{Serialize, Deserialize};
use serde_json::Value;

/// A named, addressable query definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    pub key: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub instructions: Vec<Instruction>,
}

impl Statement {
    pub fn new(key: impl Into<String>, instructions: Vec<Instruction>) -> Self {
        Self { key: key.into(), title: String::new(), instructions }
    }
}

/// One step of a statement's infix instruction list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Instruction {
    Filter(Filter),
    Subquery(Subquery),
    Operator(Operator),
}

impl Instruction {
    pub fn filter(id: impl Into<String>, kind: FilterKind) -> Self {
        Instruction::Filter(Filter { id: id.into(), kind })
    }
    pub fn subquery(key: impl Into<String>) -> Self {
        Instruction::Subquery(Subquery { query: key.into() })
    }
    pub fn and() -> Self {
        Instruction::Operator(Operator { kind: Combinator::And })
    }
    pub fn or() -> Self {
        Instruction::Operator(Operator { kind: Combinator::Or })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subquery {
    pub query: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operator {
    #[serde(rename = "type")]
    pub kind: Combinator,
}

/// A leaf predicate on one schema field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub id: String,
    #[serde(flatten)]
    pub kind: FilterKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FilterKind {
    /// Categorical set membership.
    Generic {
        #[serde(default)]
        operand: Operand,
        values: Vec<Value>,
    },
    /// Named boolean flags, always combined as a union.
    Genericbool { values: Vec<String> },
    /// One or two numeric bounds.
    Numcomparison { values: Vec<Bound> },
    /// Either score bounds or categorical calls on a composite field.
    Composite { values: Vec<CompositeValue> },
    /// A free-text selection following the semantics of `subtype`.
    Autocomplete { subtype: Subtype, selection: Vec<Value> },
}

impl FilterKind {
    pub fn name(&self) -> &'static str {
        match self {
            FilterKind::Generic { .. } => "generic",
            FilterKind::Genericbool { .. } => "genericbool",
            FilterKind::Numcomparison { .. } => "numcomparison",
            FilterKind::Composite { .. } => "composite",
            FilterKind::Autocomplete { .. } => "autocomplete",
        }
    }
}

/// Parses a JSON array of statements.
pub fn parse_statements(json: &str) -> Result<Vec<Statement>, SqonError> {
    Ok(serde_json::from_str(json)?)
}

/// Statements indexed by key, in the order supplied.
#[derive(Debug, Clone, Default)]
pub struct StatementSet<'a> {
    statements: IndexMap<&'a str, &'a Statement>,
}

impl<'a> StatementSet<'a> {
    pub fn new(statements: &'a [Statement]) -> Result<Self, SqonError> {
        let mut index = IndexMap::with_capacity(statements.len());
        for statement in statements {
            if index.insert(statement.key.as_str(), statement).is_some() {
                return Err(SqonError::DuplicateStatement(statement.key.clone()));
            }
        }
        Ok(Self { statements: index })
    }

    pub fn get(&self, key: &str) -> Option<&'a Statement> {
        self.statements.get(key).copied()
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Field ids filtered on by `key`, including through subqueries, in
    /// first-seen order.
    pub fn referenced_fields(&self, key: &str) -> Result<IndexSet<String>, SqonError> {
        let mut fields = IndexSet::new();
        let mut visiting = IndexSet::new();
        self.collect_fields(key, &mut visiting, &mut fields)?;
        Ok(fields)
    }

    fn collect_fields(
        &self,
        key: &str,
        visiting: &mut IndexSet<&'a str>,
        fields: &mut IndexSet<String>,
    ) -> Result<(), SqonError> {
        let statement = self.get(key).ok_or_else(|| SqonError::MissingStatement(key.to_string()))?;
        if !visiting.insert(statement.key.as_str()) {
            return Err(cycle_error(visiting, &statement.key));
        }
        for instruction in &statement.instructions {
            match instruction {
                Instruction::Filter(filter) => {
                    fields.insert(filter.id.clone());
                }
                Instruction::Subquery(sub) => self.collect_fields(&sub.query, visiting, fields)?,
                Instruction::Operator(_) => {}
            }
        }
        visiting.pop();
        Ok(())
    }
}

/// Builds the cycle error for `key` being re-entered while `visiting`.
pub(crate) fn cycle_error(visiting: &IndexSet<&str>, key: &str) -> SqonError {
    let mut path: Vec<String> = visiting.iter().map(|k| k.to_string()).collect();
    path.push(key.to_string());
    SqonError::CyclicSubquery { path }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Comparator, SubtypeKind};
    use serde_json::json;

    #[test]
    fn test_parse_filter_instruction() {
        let instruction: Instruction = serde_json::from_value(json!({
            "type": "filter",
            "data": {"id": "variant_type", "type": "generic", "operand": "all", "values": ["SNV", "deletion"]}
        }))
        .unwrap();
        assert_eq!(instruction, Instruction::filter("variant_type", FilterKind::Generic {
            operand: Operand::All,
            values: vec![json!("SNV"), json!("deletion")],
        }));
    }

    #[test]
    fn test_parse_operand_defaults_to_one() {
        let filter: Filter = serde_json::from_value(json!({
            "id": "variant_type", "type": "generic", "values": ["SNV"]
        }))
        .unwrap();
        assert!(matches!(filter.kind, FilterKind::Generic { operand: Operand::One, .. }));
    }

    #[test]
    fn test_parse_operator_and_subquery() {
        let ops: Vec<Instruction> = serde_json::from_value(json!([
            {"type": "operator", "data": {"type": "or"}},
            {"type": "subquery", "data": {"query": "s0"}}
        ]))
        .unwrap();
        assert_eq!(ops, vec![Instruction::or(), Instruction::subquery("s0")]);
    }

    #[test]
    fn test_parse_numcomparison_and_autocomplete() {
        let filter: Filter = serde_json::from_value(json!({
            "id": "gnomad_exomes", "type": "numcomparison",
            "values": [{"comparator": ">=", "value": 0.01}, {"comparator": "<=", "value": 0.5}]
        }))
        .unwrap();
        match filter.kind {
            FilterKind::Numcomparison { values } => {
                assert_eq!(values.len(), 2);
                assert_eq!(values[1].comparator, Comparator::Lte);
            }
            other => panic!("unexpected kind {:?}", other),
        }

        let filter: Filter = serde_json::from_value(json!({
            "id": "gene_symbol", "type": "autocomplete",
            "subtype": {"type": "generic", "operand": "one"},
            "selection": ["BRAF", "TP53"]
        }))
        .unwrap();
        match filter.kind {
            FilterKind::Autocomplete { subtype, selection } => {
                assert_eq!(subtype.kind, SubtypeKind::Generic);
                assert_eq!(selection, vec![json!("BRAF"), json!("TP53")]);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_unknown_filter_kind_rejected() {
        let res = parse_statements(&json!([{
            "key": "s1", "title": "Query 1",
            "instructions": [{"type": "filter", "data": {"id": "x", "type": "fuzzy", "values": ["a"]}}]
        }]).to_string());
        assert!(matches!(res, Err(SqonError::Parse(_))));
    }

    #[test]
    fn test_statement_set_rejects_duplicates() {
        let statements = vec![Statement::new("s1", vec![]), Statement::new("s1", vec![])];
        assert!(matches!(StatementSet::new(&statements), Err(SqonError::DuplicateStatement(k)) if k == "s1"));
    }

    #[test]
    fn test_referenced_fields_through_subqueries() {
        let generic = |values: &[&str]| FilterKind::Generic {
            operand: Operand::One,
            values: values.iter().map(|v| json!(v)).collect(),
        };
        let statements = vec![
            Statement::new("s0", vec![
                Instruction::filter("consequence", generic(&["missense"])),
                Instruction::and(),
                Instruction::filter("variant_type", generic(&["SNV"])),
            ]),
            Statement::new("s1", vec![
                Instruction::filter("variant_type", generic(&["deletion"])),
                Instruction::or(),
                Instruction::subquery("s0"),
            ]),
        ];
        let set = StatementSet::new(&statements).unwrap();
        let fields: Vec<_> = set.referenced_fields("s1").unwrap().into_iter().collect();
        assert_eq!(fields, vec!["variant_type", "consequence"]);
    }

    #[test]
    fn test_referenced_fields_detects_cycles() {
        let statements = vec![
            Statement::new("a", vec![Instruction::subquery("b")]),
            Statement::new("b", vec![Instruction::subquery("a")]),
        ];
        let set = StatementSet::new(&statements).unwrap();
        match set.referenced_fields("a") {
            Err(SqonError::CyclicSubquery { path }) => assert_eq!(path, vec!["a", "b", "a"]),
            other => panic!("expected cycle, got {:?}", other),
        }
    }
}
