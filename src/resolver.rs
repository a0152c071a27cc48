//! Resolver module: folds a statement's instruction list into one clause tree.
//!
//! Subqueries are resolved recursively, at most once per resolver, and a key
//! re-entered while it is still being resolved is reported as a cycle.

use crate::compiler::FilterCompiler;
use crate::dialect::Dialect;
use crate::expr::{cycle_error, Instruction, Statement, StatementSet};
use crate::types::Combinator;
use crate::SqonError;
use indexmap::IndexSet;
use log::debug;
use serde_json::Value;
use std::collections::HashMap;

pub struct Resolver<'a, D: Dialect> {
    statements: &'a StatementSet<'a>,
    compiler: FilterCompiler<'a, D>,
    /// Field whose filters compile to their neutral form.
    exclude: Option<&'a str>,
    cache: HashMap<&'a str, Option<Value>>,
    visiting: IndexSet<&'a str>,
}

impl<'a, D: Dialect> Resolver<'a, D> {
    pub fn new(statements: &'a StatementSet<'a>, compiler: FilterCompiler<'a, D>) -> Self {
        Self {
            statements,
            compiler,
            exclude: None,
            cache: HashMap::new(),
            visiting: IndexSet::new(),
        }
    }

    /// A resolver that neutralizes every filter on `field`.
    pub fn excluding(statements: &'a StatementSet<'a>, compiler: FilterCompiler<'a, D>, field: &'a str) -> Self {
        Self { exclude: Some(field), ..Self::new(statements, compiler) }
    }

    /// Resolves the statement at `key`. Returns `None` for a statement
    /// without instructions.
    pub fn resolve(&mut self, key: &str) -> Result<Option<Value>, SqonError> {
        let statement = self
            .statements
            .get(key)
            .ok_or_else(|| SqonError::MissingStatement(key.to_string()))?;
        let key = statement.key.as_str();
        if let Some(resolved) = self.cache.get(key) {
            debug!("reusing resolved statement '{}'", key);
            return Ok(resolved.clone());
        }
        if !self.visiting.insert(key) {
            return Err(cycle_error(&self.visiting, key));
        }
        let resolved = self.fold(statement);
        self.visiting.pop();
        let resolved = resolved?;
        self.cache.insert(key, resolved.clone());
        Ok(resolved)
    }

    fn fold(&mut self, statement: &'a Statement) -> Result<Option<Value>, SqonError> {
        let dialect = self.compiler.dialect();
        let mut fold = Fold::new(&statement.key);
        for instruction in &statement.instructions {
            match instruction {
                Instruction::Filter(filter) => {
                    let neutral = self.exclude == Some(filter.id.as_str());
                    let clause = self.compiler.compile(filter, neutral)?;
                    fold.push_operand(dialect, clause)?;
                }
                Instruction::Subquery(sub) => {
                    let clause = self
                        .resolve(&sub.query)?
                        .ok_or_else(|| SqonError::EmptySubquery(sub.query.clone()))?;
                    fold.push_operand(dialect, clause)?;
                }
                Instruction::Operator(op) => fold.push_combinator(op.kind)?,
            }
        }
        fold.finish(dialect)
    }
}

/// Left-to-right fold of `operand (combinator operand)*`.
///
/// A run of one combinator collects into a single array; switching
/// combinators closes the run into one operand of the next.
struct Fold<'k> {
    key: &'k str,
    operands: Vec<Value>,
    current: Option<Combinator>,
    pending: Option<Combinator>,
}

impl<'k> Fold<'k> {
    fn new(key: &'k str) -> Self {
        Self { key, operands: Vec::new(), current: None, pending: None }
    }

    fn push_operand<D: Dialect>(&mut self, dialect: &D, operand: Value) -> Result<(), SqonError> {
        if !self.operands.is_empty() {
            let combinator = self.pending.take().ok_or_else(|| self.malformed("missing operator between operands"))?;
            match self.current {
                Some(current) if current != combinator => {
                    let run = std::mem::take(&mut self.operands);
                    self.operands.push(dialect.combine(current, run));
                }
                _ => {}
            }
            self.current = Some(combinator);
        }
        self.operands.push(operand);
        Ok(())
    }

    fn push_combinator(&mut self, combinator: Combinator) -> Result<(), SqonError> {
        if self.operands.is_empty() {
            return Err(self.malformed("operator before any operand"));
        }
        if self.pending.is_some() {
            return Err(self.malformed("consecutive operators"));
        }
        self.pending = Some(combinator);
        Ok(())
    }

    fn finish<D: Dialect>(mut self, dialect: &D) -> Result<Option<Value>, SqonError> {
        if self.pending.is_some() {
            return Err(self.malformed("trailing operator"));
        }
        Ok(match self.current {
            Some(combinator) => Some(dialect.combine(combinator, self.operands)),
            None => self.operands.pop(),
        })
    }

    fn malformed(&self, reason: &str) -> SqonError {
        SqonError::MalformedStatement { key: self.key.to_string(), reason: reason.to_string() }
    }
}
