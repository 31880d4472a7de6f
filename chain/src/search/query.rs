//! Structured query grammar accepted by the search endpoint.
//!
//! The JSON shape follows the usual full-text request convention: a top
//! level `{"query": {...}, "size": n, "from": n}` envelope, where the
//! query node is discriminated by its keys:
//!
//! - `{"match": "words", "field": "f"}`: analyzed match (any token),
//! - `{"term": "exact", "field": "f"}`: unanalyzed exact term,
//! - `{"prefix": "ab", "field": "f"}`: prefix on analyzed tokens,
//! - `{"field": "n", "min": 1, "max": 10}`: numeric range,
//! - `{"conjuncts": [...]}` / `{"disjuncts": [...], "min": k}`,
//! - `{"match_all": {}}`.
//!
//! Omitting `field` searches every field of the document.

use serde::Deserialize;
use serde_json::Value;

fn default_size() -> usize {
    10
}

/// A search request against one collection.
#[derive(Clone, Debug, Deserialize)]
pub struct SearchRequest {
    pub query: Query,
    #[serde(default = "default_size")]
    pub size: usize,
    #[serde(default)]
    pub from: usize,
}

/// One node of the query tree.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum Query {
    Match {
        #[serde(rename = "match")]
        value: String,
        #[serde(default)]
        field: Option<String>,
    },
    Term {
        term: String,
        #[serde(default)]
        field: Option<String>,
    },
    Prefix {
        prefix: String,
        #[serde(default)]
        field: Option<String>,
    },
    Conjunction {
        conjuncts: Vec<Query>,
    },
    Disjunction {
        disjuncts: Vec<Query>,
        #[serde(default)]
        min: Option<usize>,
    },
    MatchAll {
        #[allow(dead_code)]
        match_all: Value,
    },
    Range {
        field: String,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
        #[serde(default)]
        inclusive_min: Option<bool>,
        #[serde(default)]
        inclusive_max: Option<bool>,
    },
}

impl Query {
    /// Restricts `self` to documents readable by `address`, by conjoining
    /// a match on the `_permittedAddresses` system field.
    pub fn restricted_to(self, address: &str) -> Query {
        Query::Conjunction {
            conjuncts: vec![
                self,
                Query::Match {
                    value: address.to_string(),
                    field: Some("_permittedAddresses".to_string()),
                },
            ],
        }
    }

    /// Whether `doc` satisfies this query.
    pub fn matches(&self, doc: &serde_json::Map<String, Value>) -> bool {
        match self {
            Query::Match { value, field } => {
                let needles = tokenize(value);
                if needles.is_empty() {
                    return false;
                }
                let haystack = field_tokens(doc, field.as_deref());
                needles.iter().any(|n| haystack.iter().any(|h| h == n))
            }
            Query::Term { term, field } => field_strings(doc, field.as_deref())
                .iter()
                .any(|s| s == term),
            Query::Prefix { prefix, field } => {
                let prefix = prefix.to_lowercase();
                field_tokens(doc, field.as_deref())
                    .iter()
                    .any(|t| t.starts_with(&prefix))
            }
            Query::Conjunction { conjuncts } => conjuncts.iter().all(|q| q.matches(doc)),
            Query::Disjunction { disjuncts, min } => {
                let needed = min.unwrap_or(1).max(1);
                disjuncts.iter().filter(|q| q.matches(doc)).count() >= needed
            }
            Query::MatchAll { .. } => true,
            Query::Range {
                field,
                min,
                max,
                inclusive_min,
                inclusive_max,
            } => field_numbers(doc, field).iter().any(|n| {
                let lower_ok = match min {
                    Some(m) => {
                        if inclusive_min.unwrap_or(true) {
                            n >= m
                        } else {
                            n > m
                        }
                    }
                    None => true,
                };
                let upper_ok = match max {
                    Some(m) => {
                        if inclusive_max.unwrap_or(false) {
                            n <= m
                        } else {
                            n < m
                        }
                    }
                    None => true,
                };
                lower_ok && upper_ok
            }),
        }
    }
}

/// Lowercase alphanumeric tokens of a string.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

fn value_tokens(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.extend(tokenize(s)),
        Value::Number(n) => out.push(n.to_string()),
        Value::Bool(b) => out.push(b.to_string()),
        Value::Array(elements) => {
            for element in elements {
                value_tokens(element, out);
            }
        }
        _ => {}
    }
}

fn field_tokens(doc: &serde_json::Map<String, Value>, field: Option<&str>) -> Vec<String> {
    let mut out = Vec::new();
    match field {
        Some(name) => {
            if let Some(value) = doc.get(name) {
                value_tokens(value, &mut out);
            }
        }
        None => {
            for value in doc.values() {
                value_tokens(value, &mut out);
            }
        }
    }
    out
}

fn value_strings(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.push(s.clone()),
        Value::Array(elements) => {
            for element in elements {
                value_strings(element, out);
            }
        }
        _ => {}
    }
}

fn field_strings(doc: &serde_json::Map<String, Value>, field: Option<&str>) -> Vec<String> {
    let mut out = Vec::new();
    match field {
        Some(name) => {
            if let Some(value) = doc.get(name) {
                value_strings(value, &mut out);
            }
        }
        None => {
            for value in doc.values() {
                value_strings(value, &mut out);
            }
        }
    }
    out
}

fn field_numbers(doc: &serde_json::Map<String, Value>, field: &str) -> Vec<f64> {
    let mut out = Vec::new();
    if let Some(value) = doc.get(field) {
        match value {
            Value::Number(n) => out.extend(n.as_f64()),
            Value::Array(elements) => {
                out.extend(elements.iter().filter_map(Value::as_f64));
            }
            _ => {}
        }
    }
    out
}
