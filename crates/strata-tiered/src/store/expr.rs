//! Update and condition expressions over record attributes
//!
//! A tiny algebra in the shape of conditional-update KV stores: paths
//! address nested attributes (`commits[2].id`), updates combine set/remove/
//! append clauses, and conditions are conjunctions of equality terms.
//! Evaluation semantics follow the same stores: conditions are checked
//! against the stored document, set and append clauses see original list
//! positions, and list-index removes resolve against the original indices.

use crate::error::{Result, TieredError};
use smol_str::SmolStr;
use std::cmp::Ordering;
use std::fmt;
use strata_common::Entity;

/// One step of an attribute path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Map attribute by name
    Name(SmolStr),
    /// List element by position
    Index(usize),
}

/// A nested attribute path, built root-first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpressionPath {
    segments: Vec<PathSegment>,
}

impl ExpressionPath {
    /// Start a path at a root attribute
    pub fn name(root: impl Into<SmolStr>) -> Self {
        ExpressionPath {
            segments: vec![PathSegment::Name(root.into())],
        }
    }

    /// Descend into a map attribute
    pub fn field(mut self, name: impl Into<SmolStr>) -> Self {
        self.segments.push(PathSegment::Name(name.into()));
        self
    }

    /// Descend into a list element
    pub fn index(mut self, position: usize) -> Self {
        self.segments.push(PathSegment::Index(position));
        self
    }

    /// The path's segments
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    fn split_last(&self) -> Option<(&[PathSegment], &PathSegment)> {
        self.segments
            .split_last()
            .map(|(last, parents)| (parents, last))
    }
}

impl fmt::Display for ExpressionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                PathSegment::Name(n) => {
                    if i > 0 {
                        write!(f, ".")?;
                    }
                    write!(f, "{n}")?;
                }
                PathSegment::Index(p) => write!(f, "[{p}]")?,
            }
        }
        Ok(())
    }
}

/// One mutation of an update expression
#[derive(Debug, Clone)]
pub enum UpdateClause {
    /// Set an attribute, creating map attributes that are absent
    Set(ExpressionPath, Entity),
    /// Remove an attribute; removing an absent map attribute is a no-op
    Remove(ExpressionPath),
    /// Push a value onto an existing list
    Append(ExpressionPath, Entity),
}

/// A combined update over one record
#[derive(Debug, Clone, Default)]
pub struct UpdateExpression {
    clauses: Vec<UpdateClause>,
}

impl UpdateExpression {
    /// An empty update
    pub fn initial() -> Self {
        Self::default()
    }

    /// Add a clause
    pub fn and(mut self, clause: UpdateClause) -> Self {
        self.clauses.push(clause);
        self
    }

    /// Whether no clauses were added
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Apply all clauses to a document, all-or-nothing
    ///
    /// Callers get either the fully updated document or an error; partial
    /// application never escapes because the input is consumed and rebuilt.
    pub fn apply(&self, mut doc: Entity) -> Result<Entity> {
        for clause in &self.clauses {
            match clause {
                UpdateClause::Set(path, value) => set_at(&mut doc, path, value.clone())?,
                UpdateClause::Append(path, value) => append_at(&mut doc, path, value.clone())?,
                UpdateClause::Remove(_) => {}
            }
        }

        // List-index removes address the original document, so within a
        // parent the highest index must go first.
        let mut removes: Vec<&ExpressionPath> = self
            .clauses
            .iter()
            .filter_map(|c| match c {
                UpdateClause::Remove(path) => Some(path),
                _ => None,
            })
            .collect();
        removes.sort_by(|a, b| remove_order(a, b));

        for path in removes {
            remove_at(&mut doc, path)?;
        }
        Ok(doc)
    }
}

/// A conjunction of equality terms over one record
#[derive(Debug, Clone, Default)]
pub struct ConditionExpression {
    terms: Vec<(ExpressionPath, Entity)>,
}

impl ConditionExpression {
    /// An empty (always-true) condition
    pub fn initial() -> Self {
        Self::default()
    }

    /// Require an attribute to equal a value
    pub fn and_equals(mut self, path: ExpressionPath, value: Entity) -> Self {
        self.terms.push((path, value));
        self
    }

    /// The equality terms
    pub fn terms(&self) -> &[(ExpressionPath, Entity)] {
        &self.terms
    }

    /// Whether every term holds against the document
    ///
    /// A missing or differently-typed attribute fails the term rather than
    /// erroring, matching conditional-write stores.
    pub fn holds(&self, doc: &Entity) -> bool {
        self.terms
            .iter()
            .all(|(path, value)| resolve(doc, path) == Some(value))
    }
}

fn path_error(path: &ExpressionPath, reason: &str) -> TieredError {
    TieredError::illegal_argument(format!("update path {path}: {reason}"))
}

fn resolve<'a>(doc: &'a Entity, path: &ExpressionPath) -> Option<&'a Entity> {
    let mut cur = doc;
    for segment in path.segments() {
        cur = match segment {
            PathSegment::Name(n) => cur.as_map().ok()?.get(n.as_str())?,
            PathSegment::Index(i) => cur.as_list().ok()?.get(*i)?,
        };
    }
    Some(cur)
}

fn navigate<'a>(
    doc: &'a mut Entity,
    segments: &[PathSegment],
    path: &ExpressionPath,
) -> Result<&'a mut Entity> {
    let mut cur = doc;
    for segment in segments {
        cur = match segment {
            PathSegment::Name(n) => cur
                .as_map_mut()?
                .get_mut(n.as_str())
                .ok_or_else(|| path_error(path, "attribute missing"))?,
            PathSegment::Index(i) => cur
                .as_list_mut()?
                .get_mut(*i)
                .ok_or_else(|| path_error(path, "list index out of range"))?,
        };
    }
    Ok(cur)
}

fn set_at(doc: &mut Entity, path: &ExpressionPath, value: Entity) -> Result<()> {
    let (parents, last) = path
        .split_last()
        .ok_or_else(|| path_error(path, "empty path"))?;
    let parent = navigate(doc, parents, path)?;
    match last {
        PathSegment::Name(n) => {
            parent.as_map_mut()?.insert(n.clone(), value);
        }
        PathSegment::Index(i) => {
            let slot = parent
                .as_list_mut()?
                .get_mut(*i)
                .ok_or_else(|| path_error(path, "list index out of range"))?;
            *slot = value;
        }
    }
    Ok(())
}

fn append_at(doc: &mut Entity, path: &ExpressionPath, value: Entity) -> Result<()> {
    navigate(doc, path.segments(), path)?
        .as_list_mut()?
        .push(value);
    Ok(())
}

fn remove_at(doc: &mut Entity, path: &ExpressionPath) -> Result<()> {
    let (parents, last) = path
        .split_last()
        .ok_or_else(|| path_error(path, "empty path"))?;
    let parent = navigate(doc, parents, path)?;
    match last {
        PathSegment::Name(n) => {
            parent.as_map_mut()?.remove(n.as_str());
        }
        PathSegment::Index(i) => {
            let list = parent.as_list_mut()?;
            if *i >= list.len() {
                return Err(path_error(path, "list index out of range"));
            }
            list.remove(*i);
        }
    }
    Ok(())
}

fn remove_order(a: &ExpressionPath, b: &ExpressionPath) -> Ordering {
    for (sa, sb) in a.segments().iter().zip(b.segments()) {
        let step = match (sa, sb) {
            (PathSegment::Name(na), PathSegment::Name(nb)) => na.cmp(nb),
            (PathSegment::Index(ia), PathSegment::Index(ib)) => ia.cmp(ib),
            (PathSegment::Name(_), PathSegment::Index(_)) => Ordering::Less,
            (PathSegment::Index(_), PathSegment::Name(_)) => Ordering::Greater,
        };
        if step != Ordering::Equal {
            // Highest index first.
            return step.reverse();
        }
    }
    b.segments().len().cmp(&a.segments().len())
}
