//! Aggregation pipelines for the document store
//!
//! Supports the stages the document backend needs to resolve reference
//! arrays: `Match`, `Lookup`, `Unwind`, `Sort`, `Group`, `Skip`, `Limit`.
//! Stages run in order over owned copies; the source collection is never
//! modified.

use serde_json::Value;
use std::cmp::Ordering;

use super::document_store::{collection, get_path, Collections, Document, Filter};

/// Per-group accumulator
#[derive(Debug, Clone)]
pub enum Accumulator {
    /// Value of the field in the first document of the group (null if absent)
    First(String),
    /// Array of the field across the group, skipping documents without it
    Push(String),
}

#[derive(Debug, Clone)]
pub enum Stage {
    Match(Filter),
    /// Join documents from `from` whose `foreign_field` equals `local_field`
    /// (or any element of it, when it is an array) into `as_field`
    Lookup {
        from: String,
        local_field: String,
        foreign_field: String,
        as_field: String,
    },
    /// One output document per element of the array at `path`. A document
    /// whose array is missing or empty passes through without the field.
    Unwind(String),
    /// Ascending on each key in turn
    Sort(Vec<String>),
    /// Group by the value at `key`; output documents carry it as `_id`
    Group {
        key: String,
        accumulators: Vec<(String, Accumulator)>,
    },
    Skip(usize),
    Limit(usize),
}

impl Stage {
    pub fn lookup(from: &str, local_field: &str, foreign_field: &str, as_field: &str) -> Self {
        Self::Lookup {
            from: from.to_string(),
            local_field: local_field.to_string(),
            foreign_field: foreign_field.to_string(),
            as_field: as_field.to_string(),
        }
    }

    pub fn unwind_preserving(path: &str) -> Self {
        Self::Unwind(path.to_string())
    }

    pub fn sort_by(field: &str) -> Self {
        Self::Sort(vec![field.to_string()])
    }
}

/// Execute `stages` over the documents of `source`
pub fn run(collections: &Collections, source: &str, stages: &[Stage]) -> Vec<Document> {
    let mut docs: Vec<Document> = collection(collections, source).documents().cloned().collect();
    for stage in stages {
        docs = apply(collections, docs, stage);
    }
    docs
}

fn apply(collections: &Collections, docs: Vec<Document>, stage: &Stage) -> Vec<Document> {
    match stage {
        Stage::Match(filter) => docs.into_iter().filter(|d| filter.matches(d)).collect(),
        Stage::Lookup {
            from,
            local_field,
            foreign_field,
            as_field,
        } => {
            let foreign = collection(collections, from);
            docs.into_iter()
                .map(|mut doc| {
                    let local = get_path(&doc, local_field).cloned().unwrap_or(Value::Null);
                    let joined: Vec<Value> = foreign
                        .documents()
                        .filter(|candidate| {
                            let theirs = get_path(candidate, foreign_field).unwrap_or(&Value::Null);
                            match &local {
                                Value::Array(items) => items.contains(theirs),
                                value => value == theirs,
                            }
                        })
                        .map(|candidate| Value::Object(candidate.clone()))
                        .collect();
                    doc.insert(as_field.clone(), Value::Array(joined));
                    doc
                })
                .collect()
        }
        Stage::Unwind(path) => {
            let mut out = Vec::with_capacity(docs.len());
            for mut doc in docs {
                let items = match doc.get(path) {
                    Some(Value::Array(items)) => items.clone(),
                    Some(Value::Null) | None => Vec::new(),
                    // A scalar unwinds to itself
                    Some(_) => {
                        out.push(doc);
                        continue;
                    }
                };

                if items.is_empty() {
                    doc.remove(path);
                    out.push(doc);
                    continue;
                }

                for item in items {
                    let mut copy = doc.clone();
                    copy.insert(path.clone(), item);
                    out.push(copy);
                }
            }
            out
        }
        Stage::Sort(keys) => {
            let mut docs = docs;
            docs.sort_by(|a, b| {
                keys.iter()
                    .map(|field| compare_values(get_path(a, field), get_path(b, field)))
                    .find(|o| *o != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
            docs
        }
        Stage::Group { key, accumulators } => group(docs, key, accumulators),
        Stage::Skip(n) => docs.into_iter().skip(*n).collect(),
        Stage::Limit(n) => docs.into_iter().take(*n).collect(),
    }
}

/// Groups come out in first-seen order
fn group(docs: Vec<Document>, key: &str, accumulators: &[(String, Accumulator)]) -> Vec<Document> {
    let mut groups: Vec<(Value, Document)> = Vec::new();

    for doc in docs {
        let group_key = get_path(&doc, key).cloned().unwrap_or(Value::Null);
        let index = match groups.iter().position(|(k, _)| *k == group_key) {
            Some(index) => index,
            None => {
                let mut seed = Document::new();
                seed.insert("_id".to_string(), group_key.clone());
                for (name, accumulator) in accumulators {
                    let initial = match accumulator {
                        Accumulator::First(field) => get_path(&doc, field).cloned().unwrap_or(Value::Null),
                        Accumulator::Push(_) => Value::Array(Vec::new()),
                    };
                    seed.insert(name.clone(), initial);
                }
                groups.push((group_key, seed));
                groups.len() - 1
            }
        };

        let output = &mut groups[index].1;
        for (name, accumulator) in accumulators {
            if let Accumulator::Push(field) = accumulator {
                if let (Some(value), Some(Value::Array(items))) = (get_path(&doc, field), output.get_mut(name)) {
                    items.push(value.clone());
                }
            }
        }
    }

    groups.into_iter().map(|(_, doc)| doc).collect()
}

/// Total order over JSON values: missing < null < bool < number < string < array < object
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None => 0,
            Some(Value::Null) => 1,
            Some(Value::Bool(_)) => 2,
            Some(Value::Number(_)) => 3,
            Some(Value::String(_)) => 4,
            Some(Value::Array(_)) => 5,
            Some(Value::Object(_)) => 6,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::document_store::DocumentStore;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn seeded_store() -> DocumentStore {
        let store = DocumentStore::new(false);
        let mut session = store.start_session();
        let one = session.insert_one("pokemon", doc(json!({"no": "0001", "name": "Bulbasaur"}))).unwrap();
        let three = session.insert_one("pokemon", doc(json!({"no": "0003", "name": "Venusaur"}))).unwrap();
        session
            .insert_one(
                "pokemon",
                doc(json!({"no": "0002", "name": "Ivysaur", "refs": [three.to_string(), one.to_string()]})),
            )
            .unwrap();
        store
    }

    #[test]
    fn test_lookup_unwind_sort_group_round() {
        let store = seeded_store();
        let session = store.start_session();

        let out = session.aggregate(
            "pokemon",
            &[
                Stage::Match(Filter::eq("no", "0002")),
                Stage::lookup("pokemon", "refs", "_id", "linked"),
                Stage::unwind_preserving("linked"),
                Stage::sort_by("linked.no"),
                Stage::Group {
                    key: "_id".to_string(),
                    accumulators: vec![
                        ("name".to_string(), Accumulator::First("name".to_string())),
                        ("linked".to_string(), Accumulator::Push("linked".to_string())),
                    ],
                },
            ],
        );

        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["name"], json!("Ivysaur"));
        let linked: Vec<&str> = out[0]["linked"]
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["no"].as_str().unwrap())
            .collect();
        assert_eq!(linked, vec!["0001", "0003"]);
    }

    #[test]
    fn test_unwind_preserves_documents_without_links() {
        let store = seeded_store();
        let session = store.start_session();

        let out = session.aggregate(
            "pokemon",
            &[
                Stage::Match(Filter::eq("no", "0001")),
                Stage::lookup("pokemon", "refs", "_id", "linked"),
                Stage::unwind_preserving("linked"),
                Stage::Group {
                    key: "_id".to_string(),
                    accumulators: vec![("linked".to_string(), Accumulator::Push("linked".to_string()))],
                },
            ],
        );

        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["linked"], json!([]));
    }

    #[test]
    fn test_sort_skip_limit() {
        let store = seeded_store();
        let session = store.start_session();
        let out = session.aggregate("pokemon", &[Stage::sort_by("no"), Stage::Skip(1), Stage::Limit(1)]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["no"], json!("0002"));
    }

    #[test]
    fn test_compare_values_orders_missing_first() {
        assert_eq!(compare_values(None, Some(&json!("a"))), Ordering::Less);
        assert_eq!(compare_values(Some(&json!(2)), Some(&json!(10))), Ordering::Less);
        assert_eq!(compare_values(Some(&json!("b")), Some(&json!("a"))), Ordering::Greater);
    }
}
