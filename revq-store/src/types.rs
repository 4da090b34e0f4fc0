use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::fmt;

/// JSON object body of a document
pub type Body = Map<String, Value>;

/// Identifier of a document within a container
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocId(pub String);

impl DocId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DocId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for DocId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Opaque revision marker, replaced by the store on every successful write
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Revision(pub String);

impl Revision {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Revision {
    fn from(rev: String) -> Self {
        Self(rev)
    }
}

impl From<&str> for Revision {
    fn from(rev: &str) -> Self {
        Self(rev.to_string())
    }
}

/// A stored document: id, revision and JSON body
///
/// `rev` is the revision the document was read at. Writes that take a
/// `Document` use it as the expected current revision.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: DocId,
    pub rev: Option<Revision>,
    pub body: Body,
}

impl Document {
    pub fn new(id: impl Into<DocId>, body: Body) -> Self {
        Self {
            id: id.into(),
            rev: None,
            body,
        }
    }

    pub fn with_rev(mut self, rev: Revision) -> Self {
        self.rev = Some(rev);
        self
    }

    /// Look up a field by JSON pointer (`/lock/locked_at`)
    pub fn field(&self, pointer: &str) -> Option<&Value> {
        lookup(&self.body, pointer)
    }
}

/// Resolve a JSON pointer against an object body
pub fn lookup<'a>(body: &'a Body, pointer: &str) -> Option<&'a Value> {
    let mut segments = pointer.strip_prefix('/')?.split('/');
    let first = segments.next()?;
    let mut current = body.get(first)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Per-document result of a bulk write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkOutcome {
    /// The write was applied and produced a new revision
    Saved { id: DocId, rev: Revision },
    /// The write was refused, `error` is the store's short code (`conflict`, `not_found`, ...)
    Rejected { id: DocId, error: String, reason: String },
}

impl BulkOutcome {
    pub fn id(&self) -> &DocId {
        match self {
            Self::Saved { id, .. } | Self::Rejected { id, .. } => id,
        }
    }

    pub fn is_saved(&self) -> bool {
        matches!(self, Self::Saved { .. })
    }

    pub fn rev(&self) -> Option<&Revision> {
        match self {
            Self::Saved { rev, .. } => Some(rev),
            Self::Rejected { .. } => None,
        }
    }
}

/// Which documents an index contains
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "field", rename_all = "snake_case")]
pub enum FieldFilter {
    /// Field exists and is not null
    Present(String),
    /// Field is missing or null
    Absent(String),
}

impl FieldFilter {
    pub fn matches(&self, body: &Body) -> bool {
        let present = |pointer: &str| lookup(body, pointer).is_some_and(|v| !v.is_null());
        match self {
            Self::Present(pointer) => present(pointer),
            Self::Absent(pointer) => !present(pointer),
        }
    }

    pub fn pointer(&self) -> &str {
        match self {
            Self::Present(pointer) | Self::Absent(pointer) => pointer,
        }
    }
}

static NULL_KEY: Value = Value::Null;

/// Secondary index definition: a filter plus the field to order by
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub name: String,
    pub filter: FieldFilter,
    /// JSON pointer of the sort key
    pub key: String,
}

impl IndexSpec {
    pub fn new(name: impl Into<String>, filter: FieldFilter, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            filter,
            key: key.into(),
        }
    }

    /// The key this document is indexed under, or None if it is not in the index
    pub fn key_of<'a>(&self, body: &'a Body) -> Option<&'a Value> {
        if !self.filter.matches(body) {
            return None;
        }
        Some(lookup(body, &self.key).unwrap_or(&NULL_KEY))
    }
}

/// A named group of indexes installed into a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignDoc {
    pub name: String,
    pub indexes: Vec<IndexSpec>,
}

impl DesignDoc {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            indexes: Vec::new(),
        }
    }

    pub fn with_index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn index(&self, name: &str) -> Option<&IndexSpec> {
        self.indexes.iter().find(|index| index.name == name)
    }

    /// True if every index in `other` is defined here identically
    pub fn covers(&self, other: &DesignDoc) -> bool {
        other
            .indexes
            .iter()
            .all(|wanted| self.index(&wanted.name) == Some(wanted))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

/// Parameters of an index range query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexQuery {
    pub limit: Option<usize>,
    pub direction: SortDirection,
}

impl IndexQuery {
    pub fn ascending() -> Self {
        Self::default()
    }

    pub fn descending() -> Self {
        Self {
            limit: None,
            direction: SortDirection::Descending,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Total order over JSON index keys
///
/// null < false < true < numbers < strings < arrays < objects, arrays and
/// objects compared element by element.
pub fn collate(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(false) => 1,
            Value::Bool(true) => 2,
            Value::Number(_) => 3,
            Value::String(_) => 4,
            Value::Array(_) => 5,
            Value::Object(_) => 6,
        }
    }

    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .unwrap_or(f64::NAN)
                .total_cmp(&y.as_f64().unwrap_or(f64::NAN)),
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y.iter())
            .map(|(x, y)| collate(x, y))
            .find(|ord| ord.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Value::Object(x), Value::Object(y)) => x
            .iter()
            .zip(y.iter())
            .map(|((kx, vx), (ky, vy))| kx.cmp(ky).then_with(|| collate(vx, vy)))
            .find(|ord| ord.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: Value) -> Body {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_lookup_nested_pointer() {
        let body = body(json!({"sent_at": 5, "lock": {"locked_at": 7}}));
        assert_eq!(lookup(&body, "/sent_at"), Some(&json!(5)));
        assert_eq!(lookup(&body, "/lock/locked_at"), Some(&json!(7)));
        assert_eq!(lookup(&body, "/lock/missing"), None);
        assert_eq!(lookup(&body, "sent_at"), None);
    }

    #[test]
    fn test_filter_treats_null_as_absent() {
        let with_null = body(json!({"lock": null}));
        let with_lock = body(json!({"lock": {"locked_by": "a"}}));
        let without = body(json!({}));

        let absent = FieldFilter::Absent("/lock".to_string());
        assert!(absent.matches(&with_null));
        assert!(absent.matches(&without));
        assert!(!absent.matches(&with_lock));
        assert!(FieldFilter::Present("/lock".to_string()).matches(&with_lock));
    }

    #[test]
    fn test_collation_order() {
        let mut keys = vec![json!("b"), json!(10), json!(null), json!(2), json!(true), json!("a")];
        keys.sort_by(collate);
        assert_eq!(keys, vec![json!(null), json!(true), json!(2), json!(10), json!("a"), json!("b")]);
    }

    #[test]
    fn test_design_covers() {
        let pending = IndexSpec::new("pending", FieldFilter::Absent("/lock".into()), "/sent_at");
        let locked = IndexSpec::new("locked", FieldFilter::Present("/lock".into()), "/lock/locked_at");
        let full = DesignDoc::new("d").with_index(pending.clone()).with_index(locked);
        let partial = DesignDoc::new("d").with_index(pending);

        assert!(full.covers(&partial));
        assert!(!partial.covers(&full));
    }
}
