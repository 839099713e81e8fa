//! # Criteria
//!
//! A query's filter is a flat list of comparison terms joined by `AND` / `OR`
//! connectives, evaluated strictly left to right with no precedence and no grouping:
//!
//! ```text
//! term0 op0 term1 op1 term2 ...   ==   ((term0 op0 term1) op1 term2) ...
//! ```
//!
//! The shape invariant is `terms == connectives + 1` for any non-empty criteria. Terms and
//! connectives are checked as they are appended, so a malformed chain is caught while
//! the plan is being built, never at execution time. An empty criteria selects every row
//! of the type.
//!
//! Values are either literal or *deferred*: a deferred term (from `from_previous()`) is
//! bound to the result slot of an earlier query in the same plan and is only evaluated
//! when its own query executes, producing a [`ResolvedCriteria`].

use crate::framework::error::PlanError;
use crate::framework::registry::ReferenceDescriptor;
use crate::framework::resource::{attribute, Resource};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

/// Comparison operator of one term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equals,
    In,
    GreaterThan,
    LessThan,
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Comparison::Equals => "==",
            Comparison::In => "IN",
            Comparison::GreaterThan => ">",
            Comparison::LessThan => "<",
        })
    }
}

/// Boolean connective between two adjacent terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connective {
    And,
    Or,
}

impl fmt::Display for Connective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Connective::And => "AND",
            Connective::Or => "OR",
        })
    }
}

/// Where a term's values come from.
#[derive(Clone)]
pub enum ValueSource<R: Resource> {
    Literal(Vec<Value>),
    /// Keys extracted from the result of query `query_index` when this term's query runs.
    Deferred {
        query_index: usize,
        descriptor: ReferenceDescriptor<R>,
    },
}

impl<R: Resource> fmt::Debug for ValueSource<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueSource::Literal(values) => f.debug_tuple("Literal").field(values).finish(),
            ValueSource::Deferred { query_index, .. } => f
                .debug_struct("Deferred")
                .field("query_index", query_index)
                .finish_non_exhaustive(),
        }
    }
}

/// One comparison against an attribute of the queried aggregate.
#[derive(Debug, Clone)]
pub struct Term<R: Resource> {
    pub attribute: String,
    pub comparison: Comparison,
    pub source: ValueSource<R>,
}

/// An unresolved filter, owned by a [`Query`](crate::framework::Query).
#[derive(Debug, Clone)]
pub struct Criteria<R: Resource> {
    terms: Vec<Term<R>>,
    connectives: Vec<Connective>,
}

impl<R: Resource> Default for Criteria<R> {
    fn default() -> Self {
        Self {
            terms: Vec::new(),
            connectives: Vec::new(),
        }
    }
}

impl<R: Resource> Criteria<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty() && self.connectives.is_empty()
    }

    pub fn terms(&self) -> &[Term<R>] {
        &self.terms
    }

    pub fn connectives(&self) -> &[Connective] {
        &self.connectives
    }

    /// Appends a term. Only valid at the start or right after a connective.
    pub fn push_term(&mut self, term: Term<R>) -> Result<(), PlanError> {
        if self.terms.len() != self.connectives.len() {
            return Err(PlanError::InvalidCriteria(format!(
                "term on `{}` must follow and_() or or_()",
                term.attribute
            )));
        }
        self.terms.push(term);
        Ok(())
    }

    /// Appends a connective. Only valid right after a term.
    pub fn push_connective(&mut self, connective: Connective) -> Result<(), PlanError> {
        if self.terms.len() != self.connectives.len() + 1 {
            return Err(PlanError::InvalidCriteria(format!(
                "{connective} must follow a term"
            )));
        }
        self.connectives.push(connective);
        Ok(())
    }

    /// Checks the final shape: empty, or `terms == connectives + 1`.
    pub fn validate(&self) -> Result<(), PlanError> {
        if self.is_empty() || self.terms.len() == self.connectives.len() + 1 {
            Ok(())
        } else {
            Err(PlanError::InvalidCriteria(format!(
                "{} terms and {} connectives",
                self.terms.len(),
                self.connectives.len()
            )))
        }
    }

    /// Evaluates every deferred term against the results handed out by `result_of`.
    pub fn resolve<'a, F>(&self, mut result_of: F) -> Result<ResolvedCriteria, PlanError>
    where
        F: FnMut(usize) -> Result<&'a [R], PlanError>,
    {
        let mut terms = Vec::with_capacity(self.terms.len());
        for term in &self.terms {
            let values = match &term.source {
                ValueSource::Literal(values) => values.clone(),
                ValueSource::Deferred {
                    query_index,
                    descriptor,
                } => descriptor.extract(result_of(*query_index)?),
            };
            terms.push(ResolvedTerm::new(&term.attribute, term.comparison, values));
        }
        ResolvedCriteria::new(terms, self.connectives.clone())
    }
}

/// A term whose values are concrete.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTerm {
    pub attribute: String,
    pub comparison: Comparison,
    pub values: Vec<Value>,
}

impl ResolvedTerm {
    pub fn new(attribute: impl Into<String>, comparison: Comparison, values: Vec<Value>) -> Self {
        Self {
            attribute: attribute.into(),
            comparison,
            values,
        }
    }

    fn matches(&self, item: &Value) -> bool {
        let actual = attribute(item, &self.attribute);
        match self.comparison {
            Comparison::Equals => self.values.first() == Some(actual),
            Comparison::In => self.values.iter().any(|value| value == actual),
            Comparison::GreaterThan => self
                .values
                .first()
                .and_then(|value| compare_values(actual, value))
                == Some(Ordering::Greater),
            Comparison::LessThan => self
                .values
                .first()
                .and_then(|value| compare_values(actual, value))
                == Some(Ordering::Less),
        }
    }
}

/// A fully evaluated filter, ready for the storage collaborator.
///
/// Always well-formed: empty, or exactly one more term than connectives.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolvedCriteria {
    terms: Vec<ResolvedTerm>,
    connectives: Vec<Connective>,
}

impl ResolvedCriteria {
    pub fn new(terms: Vec<ResolvedTerm>, connectives: Vec<Connective>) -> Result<Self, PlanError> {
        let well_formed = (terms.is_empty() && connectives.is_empty())
            || terms.len() == connectives.len() + 1;
        if !well_formed {
            return Err(PlanError::InvalidCriteria(format!(
                "{} terms and {} connectives",
                terms.len(),
                connectives.len()
            )));
        }
        Ok(Self { terms, connectives })
    }

    /// Filter on a single term.
    pub fn single(term: ResolvedTerm) -> Self {
        Self {
            terms: vec![term],
            connectives: Vec::new(),
        }
    }

    pub fn terms(&self) -> &[ResolvedTerm] {
        &self.terms
    }

    pub fn connectives(&self) -> &[Connective] {
        &self.connectives
    }

    /// Evaluates the filter against a serialized aggregate, left to right.
    pub fn matches(&self, item: &Value) -> bool {
        let Some((first, rest)) = self.terms.split_first() else {
            return true;
        };
        let mut result = first.matches(item);
        for (connective, term) in self.connectives.iter().zip(rest) {
            result = match connective {
                Connective::And => result && term.matches(item),
                Connective::Or => result || term.matches(item),
            };
        }
        result
    }
}

impl fmt::Display for ResolvedCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some((first, rest)) = self.terms.split_first() else {
            return f.write_str("*");
        };
        write_term(f, first)?;
        for (connective, term) in self.connectives.iter().zip(rest) {
            write!(f, " {connective} ")?;
            write_term(f, term)?;
        }
        Ok(())
    }
}

fn write_term(f: &mut fmt::Formatter<'_>, term: &ResolvedTerm) -> fmt::Result {
    write!(
        f,
        "{} {} {}",
        term.attribute,
        term.comparison,
        Value::Array(term.values.clone())
    )
}

/// Orders two JSON scalars of the same kind; mixed kinds are incomparable.
pub fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => Some(a.cmp(&b)),
            _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
        },
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}
