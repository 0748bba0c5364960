use crate::error::{Result, StrataError};
use serde_json::Value as Document;
use std::fmt;

/// One step of a nested attribute path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum PathSegment {
    Field(String),
    Index(usize),
}

/// Path addressing a nested attribute inside a stored document, e.g.
/// `commits[2].id` or `tree[7]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ExprPath {
    segments: Vec<PathSegment>,
}

impl ExprPath {
    pub fn field(name: impl Into<String>) -> ExprPath {
        ExprPath {
            segments: vec![PathSegment::Field(name.into())],
        }
    }

    pub fn dot(mut self, name: impl Into<String>) -> ExprPath {
        self.segments.push(PathSegment::Field(name.into()));
        self
    }

    pub fn index(mut self, i: usize) -> ExprPath {
        self.segments.push(PathSegment::Index(i));
        self
    }

    fn resolve<'a>(&self, doc: &'a Document) -> Option<&'a Document> {
        let mut current = doc;
        for seg in &self.segments {
            current = match seg {
                PathSegment::Field(name) => current.as_object()?.get(name)?,
                PathSegment::Index(i) => current.as_array()?.get(*i)?,
            };
        }
        Some(current)
    }

    fn resolve_parent_mut<'a>(&self, doc: &'a mut Document) -> Option<&'a mut Document> {
        let mut current = doc;
        for seg in &self.segments[..self.segments.len() - 1] {
            current = match seg {
                PathSegment::Field(name) => current.as_object_mut()?.get_mut(name)?,
                PathSegment::Index(i) => current.as_array_mut()?.get_mut(*i)?,
            };
        }
        Some(current)
    }

    /// Write `value` at this path.
    fn set(&self, doc: &mut Document, value: Document) -> Result<()> {
        let last = self.segments.last().expect("path is never empty").clone();
        let parent = self
            .resolve_parent_mut(doc)
            .ok_or_else(|| StrataError::IllegalArgument(format!("path {} not found", self)))?;
        match last {
            PathSegment::Field(name) => {
                let obj = parent.as_object_mut().ok_or_else(|| {
                    StrataError::IllegalArgument(format!("{} is not an object path", self))
                })?;
                obj.insert(name, value);
            }
            PathSegment::Index(i) => {
                let arr = parent.as_array_mut().ok_or_else(|| {
                    StrataError::IllegalArgument(format!("{} is not a list path", self))
                })?;
                if i >= arr.len() {
                    return Err(StrataError::IllegalArgument(format!(
                        "index {} past end of list at {}",
                        i, self
                    )));
                }
                arr[i] = value;
            }
        }
        Ok(())
    }

    /// Push `value` onto the end of the list this path names, wherever
    /// that end is when the update applies.
    fn append(&self, doc: &mut Document, value: Document) -> Result<()> {
        let last = self.segments.last().expect("path is never empty").clone();
        let parent = self
            .resolve_parent_mut(doc)
            .ok_or_else(|| StrataError::IllegalArgument(format!("path {} not found", self)))?;
        let list = match last {
            PathSegment::Field(name) => parent.as_object_mut().and_then(|o| o.get_mut(&name)),
            PathSegment::Index(i) => parent.as_array_mut().and_then(|a| a.get_mut(i)),
        }
        .and_then(|v| v.as_array_mut())
        .ok_or_else(|| StrataError::IllegalArgument(format!("{} is not a list path", self)))?;
        list.push(value);
        Ok(())
    }

    /// Remove the attribute at this path. Missing targets are a no-op.
    fn remove(&self, doc: &mut Document) {
        let last = self.segments.last().expect("path is never empty").clone();
        let Some(parent) = self.resolve_parent_mut(doc) else {
            return;
        };
        match last {
            PathSegment::Field(name) => {
                if let Some(obj) = parent.as_object_mut() {
                    obj.remove(&name);
                }
            }
            PathSegment::Index(i) => {
                if let Some(arr) = parent.as_array_mut() {
                    if i < arr.len() {
                        arr.remove(i);
                    }
                }
            }
        }
    }
}

impl fmt::Display for ExprPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.segments.iter().enumerate() {
            match seg {
                PathSegment::Field(name) => {
                    if i > 0 {
                        f.write_str(".")?;
                    }
                    f.write_str(name)?;
                }
                PathSegment::Index(idx) => write!(f, "[{}]", idx)?,
            }
        }
        Ok(())
    }
}

/// Conjunction of set/append/remove clauses applied atomically to one
/// document.
///
/// Set and remove clauses address the document as it looked before the
/// update: sets run first in insertion order, appends push onto whatever
/// the list's end is at that point, and removals run last, deepest index
/// first, so list indices never shift under a pending clause.
#[derive(Debug, Clone, Default)]
pub struct UpdateExpression {
    sets: Vec<(ExprPath, Document)>,
    appends: Vec<(ExprPath, Document)>,
    removes: Vec<ExprPath>,
}

impl UpdateExpression {
    pub fn new() -> UpdateExpression {
        UpdateExpression::default()
    }

    pub fn set(mut self, path: ExprPath, value: Document) -> UpdateExpression {
        self.sets.push((path, value));
        self
    }

    pub fn append(mut self, path: ExprPath, value: Document) -> UpdateExpression {
        self.appends.push((path, value));
        self
    }

    pub fn remove(mut self, path: ExprPath) -> UpdateExpression {
        self.removes.push(path);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty() && self.appends.is_empty() && self.removes.is_empty()
    }

    pub fn apply(&self, doc: &mut Document) -> Result<()> {
        for (path, value) in &self.sets {
            path.set(doc, value.clone())?;
        }
        for (path, value) in &self.appends {
            path.append(doc, value.clone())?;
        }
        let mut removes = self.removes.clone();
        removes.sort();
        for path in removes.iter().rev() {
            path.remove(doc);
        }
        Ok(())
    }
}

/// Conjunction of equality predicates over document attributes.
#[derive(Debug, Clone, Default)]
pub struct ConditionExpression {
    clauses: Vec<(ExprPath, Document)>,
}

impl ConditionExpression {
    pub fn equals(path: ExprPath, value: Document) -> ConditionExpression {
        ConditionExpression {
            clauses: vec![(path, value)],
        }
    }

    pub fn and_equals(mut self, path: ExprPath, value: Document) -> ConditionExpression {
        self.clauses.push((path, value));
        self
    }

    pub fn and(mut self, other: ConditionExpression) -> ConditionExpression {
        self.clauses.extend(other.clauses);
        self
    }

    /// True when every predicate holds. A missing attribute never equals.
    pub fn check(&self, doc: &Document) -> bool {
        self.clauses
            .iter()
            .all(|(path, value)| path.resolve(doc) == Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_replaces_in_place() {
        let mut doc = json!({"items": ["a", "b"], "n": 1});
        UpdateExpression::new()
            .set(ExprPath::field("items").index(1), json!("B"))
            .set(ExprPath::field("n"), json!(2))
            .apply(&mut doc)
            .unwrap();
        assert_eq!(doc, json!({"items": ["a", "B"], "n": 2}));
    }

    #[test]
    fn set_past_end_is_error() {
        let mut doc = json!({"items": []});
        let err = UpdateExpression::new()
            .set(ExprPath::field("items").index(0), json!("x"))
            .apply(&mut doc);
        assert!(err.is_err());
    }

    #[test]
    fn append_pushes_at_current_end() {
        let mut doc = json!({"items": ["a"]});
        UpdateExpression::new()
            .append(ExprPath::field("items"), json!("b"))
            .append(ExprPath::field("items"), json!("c"))
            .apply(&mut doc)
            .unwrap();
        assert_eq!(doc, json!({"items": ["a", "b", "c"]}));

        let err = UpdateExpression::new()
            .append(ExprPath::field("n"), json!(1))
            .apply(&mut doc);
        assert!(err.is_err());
    }

    #[test]
    fn removals_apply_deepest_index_first() {
        let mut doc = json!({"items": [
            {"id": 0}, {"id": 1}, {"id": 2}, {"id": 3, "extra": true}
        ]});
        // All indices address the original document.
        UpdateExpression::new()
            .remove(ExprPath::field("items").index(0))
            .remove(ExprPath::field("items").index(3).dot("extra"))
            .remove(ExprPath::field("items").index(1))
            .remove(ExprPath::field("items").index(2))
            .apply(&mut doc)
            .unwrap();
        assert_eq!(doc, json!({"items": [{"id": 3}]}));
    }

    #[test]
    fn remove_missing_is_noop() {
        let mut doc = json!({"a": 1});
        UpdateExpression::new()
            .remove(ExprPath::field("b"))
            .remove(ExprPath::field("a").dot("nested"))
            .apply(&mut doc)
            .unwrap();
        assert_eq!(doc, json!({"a": 1}));
    }

    #[test]
    fn sets_run_before_removals() {
        let mut doc = json!({"items": [{"v": 1}, {"v": 2}]});
        UpdateExpression::new()
            .set(ExprPath::field("items").index(1).dot("v"), json!(9))
            .remove(ExprPath::field("items").index(0))
            .apply(&mut doc)
            .unwrap();
        assert_eq!(doc, json!({"items": [{"v": 9}]}));
    }

    #[test]
    fn condition_checks_all_clauses() {
        let doc = json!({"items": [{"id": "x"}], "n": 1});
        let ok = ConditionExpression::equals(ExprPath::field("items").index(0).dot("id"), json!("x"))
            .and_equals(ExprPath::field("n"), json!(1));
        assert!(ok.check(&doc));

        let bad = ConditionExpression::equals(ExprPath::field("n"), json!(2));
        assert!(!bad.check(&doc));

        let missing = ConditionExpression::equals(ExprPath::field("items").index(1).dot("id"), json!("x"));
        assert!(!missing.check(&doc));
    }

    #[test]
    fn path_display() {
        let p = ExprPath::field("commits").index(2).dot("id");
        assert_eq!(p.to_string(), "commits[2].id");
    }
}
