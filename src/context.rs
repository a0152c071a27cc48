//! Context module: request-scoped access control for a translation.
//!
//! This module provides the Acl and QueryContext types.

use crate::dialect::Dialect;
use crate::schema::QuerySchema;
use crate::SqonError;
use log::debug;
use serde::{Serialize, Deserialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Administrator,
    Genetician,
    Practitioner,
    #[serde(other)]
    Unknown,
}

/// Caller identity as resolved by the access-control layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acl {
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub practitioner_id: Option<String>,
}

/// The subject a query is scoped to, plus the caller's ACL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryContext {
    subject_id: String,
    acl: Acl,
}

impl QueryContext {
    pub fn new(subject_id: impl Into<String>, acl: Acl) -> Result<Self, SqonError> {
        let subject_id = subject_id.into();
        if subject_id.trim().is_empty() {
            return Err(SqonError::MissingSubject);
        }
        Ok(Self { subject_id, acl })
    }

    pub fn subject_id(&self) -> &str {
        &self.subject_id
    }

    pub fn acl(&self) -> &Acl {
        &self.acl
    }

    /// Builds the mandatory scoping clause.
    ///
    /// The clause depends only on the subject: every role receives the same
    /// one. Role-based redaction is applied outside the translator.
    pub fn acl_clause<D: Dialect>(&self, schema: &QuerySchema, dialect: &D) -> Value {
        debug!(
            "scoping query to subject {} (roles {:?}, organization {:?})",
            self.subject_id, self.acl.roles, self.acl.organization_id
        );
        dialect.subject_clause(schema.subject_field(), &self.subject_id)
    }
}
