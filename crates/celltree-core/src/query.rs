//! Structured queries against the document store.
//!
//! Queries are closed trees of term, missing-field and boolean predicates.
//! Every [`SearchRequest`] is built around a [`ScopeFilter`] whose cell id is
//! mandatory, so a search can never cross tenant boundaries. The scope terms
//! are prepended most-specific-first ahead of the caller's own predicates.
//!
//! The same tree renders to the store's native JSON shape via
//! [`SearchRequest::to_native`] and evaluates directly against a document via
//! [`Query::matches`], which is what the in-memory store uses.

use std::cmp::Ordering;

use serde::Serialize;
use serde_json::{Value, json};

/// Field holding the owning cell id on every scoped document.
pub const FIELD_CELL_ID: &str = "cell_id";
/// Field holding the owning box id.
pub const FIELD_BOX_ID: &str = "box_id";
/// Field holding the owning node id.
pub const FIELD_NODE_ID: &str = "node_id";
/// Field holding the entity type id.
pub const FIELD_ENTITY_TYPE_ID: &str = "entity_type_id";

/// A predicate over a single document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Query {
    MatchAll,
    Term { field: String, value: Value },
    Terms { field: String, values: Vec<Value> },
    /// Field absent or null.
    Missing { field: String },
    Bool(BoolQuery),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BoolQuery {
    pub must: Vec<Query>,
    pub should: Vec<Query>,
    pub must_not: Vec<Query>,
}

impl Query {
    pub fn term(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Query::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn terms<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Query::Terms {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn missing(field: impl Into<String>) -> Self {
        Query::Missing {
            field: field.into(),
        }
    }

    /// All clauses must match.
    pub fn and(clauses: Vec<Query>) -> Self {
        Query::Bool(BoolQuery {
            must: clauses,
            ..BoolQuery::default()
        })
    }

    /// At least one clause must match.
    pub fn or(clauses: Vec<Query>) -> Self {
        Query::Bool(BoolQuery {
            should: clauses,
            ..BoolQuery::default()
        })
    }

    pub fn not(clause: Query) -> Self {
        Query::Bool(BoolQuery {
            must_not: vec![clause],
            ..BoolQuery::default()
        })
    }

    /// Evaluate against a JSON document.
    ///
    /// A non-empty `should` list requires at least one of its clauses to match.
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Query::MatchAll => true,
            Query::Term { field, value } => field_matches(doc, field, |v| v == value),
            Query::Terms { field, values } => {
                field_matches(doc, field, |v| values.iter().any(|candidate| candidate == v))
            }
            Query::Missing { field } => lookup(doc, field).is_none_or(Value::is_null),
            Query::Bool(b) => {
                b.must.iter().all(|q| q.matches(doc))
                    && !b.must_not.iter().any(|q| q.matches(doc))
                    && (b.should.is_empty() || b.should.iter().any(|q| q.matches(doc)))
            }
        }
    }

    /// Render in the store's native query shape.
    pub fn to_native(&self) -> Value {
        match self {
            Query::MatchAll => json!({ "match_all": {} }),
            Query::Term { field, value } => json!({ "term": { field.as_str(): value } }),
            Query::Terms { field, values } => json!({ "terms": { field.as_str(): values } }),
            Query::Missing { field } => json!({ "missing": { "field": field } }),
            Query::Bool(b) => {
                let mut body = serde_json::Map::new();
                for (name, clauses) in [("must", &b.must), ("should", &b.should), ("must_not", &b.must_not)] {
                    if !clauses.is_empty() {
                        body.insert(
                            name.to_string(),
                            Value::Array(clauses.iter().map(Query::to_native).collect()),
                        );
                    }
                }
                json!({ "bool": body })
            }
        }
    }
}

/// Look up a dotted field path inside a document.
pub fn lookup<'a>(doc: &'a Value, field: &str) -> Option<&'a Value> {
    field
        .split('.')
        .try_fold(doc, |current, segment| current.as_object()?.get(segment))
}

fn field_matches(doc: &Value, field: &str, pred: impl Fn(&Value) -> bool) -> bool {
    match lookup(doc, field) {
        Some(Value::Array(items)) => items.iter().any(&pred),
        Some(v) => pred(v),
        None => false,
    }
}

/// Tenant scope prepended to every search.
///
/// The cell id is required; narrower scopes are optional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeFilter {
    cell_id: String,
    box_id: Option<String>,
    node_id: Option<String>,
    entity_type_id: Option<String>,
}

impl ScopeFilter {
    pub fn new(cell_id: impl Into<String>) -> Self {
        let cell_id = cell_id.into();
        debug_assert!(!cell_id.is_empty(), "scope filter requires a cell id");
        Self {
            cell_id,
            box_id: None,
            node_id: None,
            entity_type_id: None,
        }
    }

    pub fn with_box(mut self, box_id: impl Into<String>) -> Self {
        self.box_id = Some(box_id.into());
        self
    }

    pub fn with_node(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn with_entity_type(mut self, entity_type_id: impl Into<String>) -> Self {
        self.entity_type_id = Some(entity_type_id.into());
        self
    }

    pub fn cell_id(&self) -> &str {
        &self.cell_id
    }

    /// Scope terms, most specific first.
    pub fn clauses(&self) -> Vec<Query> {
        let mut clauses = Vec::with_capacity(4);
        if let Some(ref id) = self.entity_type_id {
            clauses.push(Query::term(FIELD_ENTITY_TYPE_ID, id.as_str()));
        }
        if let Some(ref id) = self.node_id {
            clauses.push(Query::term(FIELD_NODE_ID, id.as_str()));
        }
        if let Some(ref id) = self.box_id {
            clauses.push(Query::term(FIELD_BOX_ID, id.as_str()));
        }
        clauses.push(Query::term(FIELD_CELL_ID, self.cell_id.as_str()));
        clauses
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortField {
    pub field: String,
    pub order: SortOrder,
}

/// A scoped search: scope filter, optional predicate, sort and page size.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    scope: ScopeFilter,
    filter: Option<Query>,
    sort: Vec<SortField>,
    size: Option<usize>,
}

impl SearchRequest {
    pub fn scoped(scope: ScopeFilter) -> Self {
        Self {
            scope,
            filter: None,
            sort: Vec::new(),
            size: None,
        }
    }

    /// Add a predicate; repeated calls are ANDed together.
    #[must_use]
    pub fn filter(mut self, query: Query) -> Self {
        self.filter = Some(match self.filter.take() {
            None => query,
            Some(Query::Bool(mut b)) if b.should.is_empty() && b.must_not.is_empty() => {
                b.must.push(query);
                Query::Bool(b)
            }
            Some(existing) => Query::and(vec![existing, query]),
        });
        self
    }

    #[must_use]
    pub fn sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push(SortField {
            field: field.into(),
            order,
        });
        self
    }

    #[must_use]
    pub fn size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    /// Clamp the page size to `cap`, defaulting to `cap` when unset.
    #[must_use]
    pub fn capped(mut self, cap: usize) -> Self {
        self.size = Some(self.size.map_or(cap, |s| s.min(cap)));
        self
    }

    pub fn scope(&self) -> &ScopeFilter {
        &self.scope
    }

    pub fn sort_fields(&self) -> &[SortField] {
        &self.sort
    }

    pub fn page_size(&self) -> Option<usize> {
        self.size
    }

    /// Scope clauses followed by the caller's predicate.
    pub fn effective_query(&self) -> Query {
        let mut must = self.scope.clauses();
        if let Some(ref q) = self.filter {
            must.push(q.clone());
        }
        Query::and(must)
    }

    pub fn matches(&self, doc: &Value) -> bool {
        self.effective_query().matches(doc)
    }

    /// Render as a filtered query in the store's native shape.
    pub fn to_native(&self) -> Value {
        let filter: Vec<Value> = self.scope.clauses().iter().map(Query::to_native).collect();
        let query = self
            .filter
            .as_ref()
            .map_or_else(|| Query::MatchAll.to_native(), Query::to_native);
        let mut native = json!({
            "query": {
                "filtered": {
                    "query": query,
                    "filter": { "and": filter }
                }
            }
        });
        if !self.sort.is_empty() {
            let sort: Vec<Value> = self
                .sort
                .iter()
                .map(|s| {
                    let order = match s.order {
                        SortOrder::Asc => "asc",
                        SortOrder::Desc => "desc",
                    };
                    json!({ s.field.as_str(): { "order": order } })
                })
                .collect();
            native["sort"] = Value::Array(sort);
        }
        if let Some(size) = self.size {
            native["size"] = json!(size);
        }
        native
    }

    /// Order two documents according to the sort fields.
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        for s in &self.sort {
            let ord = compare_values(lookup(a, &s.field), lookup(b, &s.field));
            let ord = match s.order {
                SortOrder::Asc => ord,
                SortOrder::Desc => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

// Missing values sort first.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}
