//! In-process document store
//!
//! A small document database used by the document backend: named
//! collections of JSON documents, each with a generated `_id`, queried with
//! filters, updated with array operators and read through aggregation
//! pipelines (see `document_pipeline`). There are no foreign keys; links are
//! arrays of `_id` values maintained by the caller.
//!
//! ## Sessions and transactions
//!
//! ```text
//!            start_session()
//! DocumentStore ───────────► DocumentSession
//!   version N                  snapshot @ N (copy-on-write per collection)
//!      ▲                            │ writes recorded per (collection, _id)
//!      └──── commit ────────────────┘
//!            every written doc unchanged since N  else WriteConflict
//!            unique indexes still hold            else DuplicateKey
//! ```
//!
//! With transactions enabled, a session works on a snapshot taken at start.
//! On commit its write set is replayed onto the current state, so sessions
//! writing disjoint documents both succeed; a document written by someone
//! else after the snapshot aborts the whole transaction.
//! With transactions disabled, every write lands in the shared state
//! immediately and a failed unit of work leaves earlier writes behind.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use super::document_pipeline::{self, Stage};
use crate::config::BackendKind;
use crate::error::PokedexError;

/// A stored document
pub type Document = Map<String, Value>;

/// Name of the identifier field on every document
pub const ID_FIELD: &str = "_id";

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

/// Generated document identifier: 24 hex chars, increasing in creation order
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(String);

impl ObjectId {
    pub fn generate() -> Self {
        let seconds = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        let counter = NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed);
        Self(format!("{:08x}{:016x}", seconds as u32, counter))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Read an id back out of a document value
    pub fn from_value(value: &Value) -> Option<Self> {
        value.as_str().map(|s| Self(s.to_string()))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<ObjectId> for Value {
    fn from(id: ObjectId) -> Self {
        Value::String(id.0)
    }
}

/// Error type for document store operations
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("Duplicate key in {collection}.{field}: {value}")]
    DuplicateKey {
        collection: String,
        field: String,
        value: String,
    },
    #[error("Write conflict on {collection}/{id}: modified by another session")]
    WriteConflict { collection: String, id: ObjectId },
    #[error("Malformed document in {collection}: {reason}")]
    Malformed { collection: String, reason: String },
}

impl From<DocumentError> for PokedexError {
    fn from(err: DocumentError) -> Self {
        PokedexError::storage(BackendKind::Document, err)
    }
}

// ============================================================================
// Filters and updates
// ============================================================================

/// Query filter. Equality against an array field matches when the array
/// contains the value.
#[derive(Debug, Clone)]
pub enum Filter {
    All,
    Eq(String, Value),
    In(String, Vec<Value>),
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Self::Eq(field.to_string(), value.into())
    }

    pub fn any_of<I, V>(field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::In(field.to_string(), values.into_iter().map(Into::into).collect())
    }

    pub fn by_id(id: &ObjectId) -> Self {
        Self::eq(ID_FIELD, id.clone())
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Self::All => true,
            Self::Eq(field, value) => field_matches(get_path(doc, field), value),
            Self::In(field, values) => {
                let actual = get_path(doc, field);
                values.iter().any(|v| field_matches(actual, v))
            }
        }
    }
}

fn field_matches(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        Some(value @ Value::Array(items)) => items.contains(expected) || value == expected,
        Some(value) => value == expected,
        None => expected.is_null(),
    }
}

/// Resolve a dotted path (`a.b.c`) inside a document
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Single-document update operator
#[derive(Debug, Clone)]
pub enum Update {
    Set(String, Value),
    /// Append unless already present
    AddToSet(String, Value),
    /// Remove every occurrence
    Pull(String, Value),
}

impl Update {
    pub fn set(field: &str, value: impl Into<Value>) -> Self {
        Self::Set(field.to_string(), value.into())
    }

    pub fn add_to_set(field: &str, value: impl Into<Value>) -> Self {
        Self::AddToSet(field.to_string(), value.into())
    }

    pub fn pull(field: &str, value: impl Into<Value>) -> Self {
        Self::Pull(field.to_string(), value.into())
    }

    fn field(&self) -> &str {
        match self {
            Self::Set(f, _) | Self::AddToSet(f, _) | Self::Pull(f, _) => f,
        }
    }

    /// Apply to `doc`; returns whether anything changed
    fn apply(&self, collection: &str, doc: &mut Document) -> Result<bool, DocumentError> {
        if self.field() == ID_FIELD {
            return Err(DocumentError::Malformed {
                collection: collection.to_string(),
                reason: "_id is immutable".to_string(),
            });
        }
        match self {
            Self::Set(field, value) => {
                let previous = doc.insert(field.clone(), value.clone());
                Ok(previous.as_ref() != Some(value))
            }
            Self::AddToSet(field, value) => {
                let array = array_field(collection, doc, field)?;
                if array.contains(value) {
                    return Ok(false);
                }
                array.push(value.clone());
                Ok(true)
            }
            Self::Pull(field, value) => {
                if !doc.contains_key(field) {
                    return Ok(false);
                }
                let array = array_field(collection, doc, field)?;
                let before = array.len();
                array.retain(|item| item != value);
                Ok(array.len() != before)
            }
        }
    }
}

fn array_field<'a>(collection: &str, doc: &'a mut Document, field: &str) -> Result<&'a mut Vec<Value>, DocumentError> {
    let slot = doc
        .entry(field.to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    match slot {
        Value::Array(items) => Ok(items),
        _ => Err(DocumentError::Malformed {
            collection: collection.to_string(),
            reason: format!("field {} is not an array", field),
        }),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateResult {
    pub matched: usize,
    pub modified: usize,
}

// ============================================================================
// Collections and shared state
// ============================================================================

/// Documents of one collection in `_id` (creation) order
#[derive(Debug, Clone, Default)]
pub struct Collection {
    documents: BTreeMap<ObjectId, Document>,
    unique_fields: Vec<String>,
}

static EMPTY_COLLECTION: Collection = Collection {
    documents: BTreeMap::new(),
    unique_fields: Vec::new(),
};

impl Collection {
    pub fn documents(&self) -> impl Iterator<Item = &Document> {
        self.documents.values()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Reject `doc` if it collides with another document on a unique field
    fn check_unique(&self, name: &str, id: &ObjectId, doc: &Document) -> Result<(), DocumentError> {
        for field in &self.unique_fields {
            let Some(value) = doc.get(field) else { continue };
            let clash = self
                .documents
                .iter()
                .any(|(other_id, other)| other_id != id && other.get(field) == Some(value));
            if clash {
                return Err(DocumentError::DuplicateKey {
                    collection: name.to_string(),
                    field: field.clone(),
                    value: value.to_string(),
                });
            }
        }
        Ok(())
    }
}

pub(crate) type Collections = HashMap<String, Arc<Collection>>;

/// Resolve a collection by name, treating unknown names as empty
pub(crate) fn collection<'a>(collections: &'a Collections, name: &str) -> &'a Collection {
    collections.get(name).map(Arc::as_ref).unwrap_or(&EMPTY_COLLECTION)
}

/// Documents written by a transaction, keyed by collection
type WriteSet = BTreeSet<(String, ObjectId)>;

#[derive(Debug, Default)]
struct SharedState {
    version: u64,
    collections: Collections,
    /// Version of the last write to each document; deletions stay as tombstones
    written_at: HashMap<(String, ObjectId), u64>,
    /// Version of the last `clear`
    cleared_at: u64,
}

impl SharedState {
    fn record_writes<'a>(&mut self, collection_name: &str, ids: impl IntoIterator<Item = &'a ObjectId>) {
        let version = self.version;
        for id in ids {
            self.written_at
                .insert((collection_name.to_string(), id.clone()), version);
        }
    }

    /// First document in `writes` that changed after `base_version`
    fn conflict(&self, base_version: u64, writes: &WriteSet) -> Option<DocumentError> {
        if self.cleared_at > base_version {
            return writes.iter().next().map(|(collection, id)| DocumentError::WriteConflict {
                collection: collection.clone(),
                id: id.clone(),
            });
        }
        writes
            .iter()
            .find(|key| self.written_at.get(*key).is_some_and(|v| *v > base_version))
            .map(|(collection, id)| DocumentError::WriteConflict {
                collection: collection.clone(),
                id: id.clone(),
            })
    }
}

/// Shared handle to the document database
#[derive(Clone)]
pub struct DocumentStore {
    state: Arc<RwLock<SharedState>>,
    transactions: bool,
}

impl DocumentStore {
    pub fn new(transactions: bool) -> Self {
        info!(
            "Document store initialized (transactions {})",
            if transactions { "enabled" } else { "disabled" }
        );
        Self {
            state: Arc::new(RwLock::new(SharedState::default())),
            transactions,
        }
    }

    /// Declare a unique field on a collection (idempotent)
    pub fn create_unique_index(&self, collection: &str, field: &str) -> Result<(), DocumentError> {
        let mut state = self.state.write();
        let coll = Arc::make_mut(state.collections.entry(collection.to_string()).or_default());
        if coll.unique_fields.iter().any(|f| f == field) {
            return Ok(());
        }
        for (id, doc) in &coll.documents {
            coll.check_unique(collection, id, doc)?;
        }
        coll.unique_fields.push(field.to_string());
        state.version += 1;
        debug!("Created unique index {}.{}", collection, field);
        Ok(())
    }

    /// Remove every document, keeping collections and their indexes
    pub fn clear(&self) {
        let mut state = self.state.write();
        for coll in state.collections.values_mut() {
            Arc::make_mut(coll).documents.clear();
        }
        state.version += 1;
        state.cleared_at = state.version;
        state.written_at.clear();
        info!("Document store cleared");
    }

    /// Committed document count of one collection
    pub fn len(&self, collection_name: &str) -> usize {
        collection(&self.state.read().collections, collection_name).len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().collections.values().all(|c| c.is_empty())
    }

    /// Open a session; it starts a transaction when the store has them enabled
    pub fn start_session(&self) -> DocumentSession {
        let transaction = if self.transactions {
            let state = self.state.read();
            Some(Transaction {
                base_version: state.version,
                collections: state.collections.clone(),
                writes: WriteSet::new(),
            })
        } else {
            None
        };
        DocumentSession {
            store: self.clone(),
            transaction,
        }
    }
}

// ============================================================================
// Sessions
// ============================================================================

struct Transaction {
    base_version: u64,
    collections: Collections,
    writes: WriteSet,
}

/// A client session. Dropping it without `commit` discards its transaction.
pub struct DocumentSession {
    store: DocumentStore,
    transaction: Option<Transaction>,
}

impl DocumentSession {
    fn read<R>(&self, f: impl FnOnce(&Collections) -> R) -> R {
        match &self.transaction {
            Some(txn) => f(&txn.collections),
            None => f(&self.store.state.read().collections),
        }
    }

    /// Run `f` against one collection; `f` returns the ids it changed
    fn write<R>(
        &mut self,
        collection_name: &str,
        f: impl FnOnce(&mut Collection) -> Result<(R, Vec<ObjectId>), DocumentError>,
    ) -> Result<R, DocumentError> {
        match &mut self.transaction {
            Some(txn) => {
                let coll = Arc::make_mut(txn.collections.entry(collection_name.to_string()).or_default());
                let (result, changed) = f(coll)?;
                txn.writes
                    .extend(changed.into_iter().map(|id| (collection_name.to_string(), id)));
                Ok(result)
            }
            None => {
                let mut state = self.store.state.write();
                let coll = Arc::make_mut(state.collections.entry(collection_name.to_string()).or_default());
                let (result, changed) = f(coll)?;
                if !changed.is_empty() {
                    state.version += 1;
                    state.record_writes(collection_name, &changed);
                }
                Ok(result)
            }
        }
    }

    /// Insert a document, assigning it a fresh `_id`
    pub fn insert_one(&mut self, collection_name: &str, mut doc: Document) -> Result<ObjectId, DocumentError> {
        let id = ObjectId::generate();
        doc.insert(ID_FIELD.to_string(), id.clone().into());
        self.write(collection_name, |coll| {
            coll.check_unique(collection_name, &id, &doc)?;
            coll.documents.insert(id.clone(), doc);
            Ok((id.clone(), vec![id]))
        })
    }

    /// Matching documents in natural order
    pub fn find(&self, collection_name: &str, filter: &Filter) -> Vec<Document> {
        self.read(|collections| {
            collection(collections, collection_name)
                .documents()
                .filter(|doc| filter.matches(doc))
                .cloned()
                .collect()
        })
    }

    pub fn find_one(&self, collection_name: &str, filter: &Filter) -> Option<Document> {
        self.read(|collections| {
            collection(collections, collection_name)
                .documents()
                .find(|doc| filter.matches(doc))
                .cloned()
        })
    }

    pub fn count_documents(&self, collection_name: &str, filter: &Filter) -> usize {
        self.read(|collections| {
            collection(collections, collection_name)
                .documents()
                .filter(|doc| filter.matches(doc))
                .count()
        })
    }

    pub fn update_one(&mut self, collection_name: &str, filter: &Filter, updates: &[Update]) -> Result<UpdateResult, DocumentError> {
        self.update(collection_name, filter, updates, Some(1))
    }

    pub fn update_many(&mut self, collection_name: &str, filter: &Filter, updates: &[Update]) -> Result<UpdateResult, DocumentError> {
        self.update(collection_name, filter, updates, None)
    }

    fn update(
        &mut self,
        collection_name: &str,
        filter: &Filter,
        updates: &[Update],
        limit: Option<usize>,
    ) -> Result<UpdateResult, DocumentError> {
        // Nothing to touch: skip the write so read-only filters don't bump versions.
        let targets: Vec<ObjectId> = self.read(|collections| {
            collection(collections, collection_name)
                .documents
                .iter()
                .filter(|(_, doc)| filter.matches(doc))
                .map(|(id, _)| id.clone())
                .take(limit.unwrap_or(usize::MAX))
                .collect()
        });
        if targets.is_empty() {
            return Ok(UpdateResult::default());
        }

        self.write(collection_name, |coll| {
            let mut result = UpdateResult::default();
            let mut modified = Vec::new();
            for id in targets {
                let Some(original) = coll.documents.get(&id) else { continue };
                let mut doc = original.clone();
                let mut changed = false;
                for update in updates {
                    changed |= update.apply(collection_name, &mut doc)?;
                }
                result.matched += 1;
                if changed {
                    coll.check_unique(collection_name, &id, &doc)?;
                    coll.documents.insert(id.clone(), doc);
                    modified.push(id);
                }
            }
            result.modified = modified.len();
            Ok((result, modified))
        })
    }

    /// Delete the first matching document; returns the number removed
    pub fn delete_one(&mut self, collection_name: &str, filter: &Filter) -> Result<usize, DocumentError> {
        let target = self.read(|collections| {
            collection(collections, collection_name)
                .documents
                .iter()
                .find(|(_, doc)| filter.matches(doc))
                .map(|(id, _)| id.clone())
        });
        let Some(id) = target else { return Ok(0) };

        self.write(collection_name, |coll| {
            if coll.documents.remove(&id).is_some() {
                Ok((1, vec![id]))
            } else {
                Ok((0, Vec::new()))
            }
        })
    }

    /// Run an aggregation pipeline against `collection_name`
    pub fn aggregate(&self, collection_name: &str, stages: &[Stage]) -> Vec<Document> {
        self.read(|collections| document_pipeline::run(collections, collection_name, stages))
    }

    /// Publish the transaction's writes. A no-op outside a transaction.
    pub fn commit(mut self) -> Result<(), DocumentError> {
        let Some(txn) = self.transaction.take() else {
            return Ok(());
        };
        if txn.writes.is_empty() {
            return Ok(());
        }

        let mut state = self.store.state.write();
        if let Some(conflict) = state.conflict(txn.base_version, &txn.writes) {
            warn!(
                "Document transaction aborted at snapshot version {}: {}",
                txn.base_version, conflict
            );
            return Err(conflict);
        }

        // Replay onto a copy so a unique-index violation leaves the state untouched
        let mut next = state.collections.clone();
        for (collection_name, id) in &txn.writes {
            let staged = collection(&txn.collections, collection_name).documents.get(id);
            let coll = Arc::make_mut(next.entry(collection_name.clone()).or_default());
            match staged {
                Some(doc) => {
                    coll.documents.insert(id.clone(), doc.clone());
                }
                None => {
                    coll.documents.remove(id);
                }
            }
        }
        for (collection_name, id) in &txn.writes {
            let coll = collection(&next, collection_name);
            if let Some(doc) = coll.documents.get(id) {
                coll.check_unique(collection_name, id, doc)?;
            }
        }

        state.collections = next;
        state.version += 1;
        let version = state.version;
        for key in txn.writes {
            state.written_at.insert(key, version);
        }
        debug!("Document transaction committed (version {})", version);
        Ok(())
    }

    /// Discard the transaction's writes
    pub fn abort(mut self) {
        if let Some(txn) = self.transaction.take() {
            debug!("Document transaction aborted ({} pending writes)", txn.writes.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_object_ids_increase() {
        let a = ObjectId::generate();
        let b = ObjectId::generate();
        assert_eq!(a.as_str().len(), 24);
        assert!(a < b);
    }

    #[test]
    fn test_filter_eq_matches_array_members() {
        let d = doc(json!({"team": ["0001", "0004"], "name": "Red"}));
        assert!(Filter::eq("team", "0004").matches(&d));
        assert!(!Filter::eq("team", "0007").matches(&d));
        assert!(Filter::eq("name", "Red").matches(&d));
        assert!(Filter::any_of("name", ["Blue", "Red"]).matches(&d));
    }

    #[test]
    fn test_get_path_nested() {
        let d = doc(json!({"stats": {"hp": 45}}));
        assert_eq!(get_path(&d, "stats.hp"), Some(&json!(45)));
        assert_eq!(get_path(&d, "stats.speed"), None);
    }

    #[test]
    fn test_unique_index_rejects_duplicates() {
        let store = DocumentStore::new(false);
        store.create_unique_index("pokemon", "no").unwrap();
        let mut session = store.start_session();
        session.insert_one("pokemon", doc(json!({"no": "0001"}))).unwrap();
        let err = session.insert_one("pokemon", doc(json!({"no": "0001"}))).unwrap_err();
        assert!(matches!(err, DocumentError::DuplicateKey { .. }));
    }

    #[test]
    fn test_add_to_set_and_pull() {
        let store = DocumentStore::new(false);
        let mut session = store.start_session();
        let id = session.insert_one("c", doc(json!({"refs": []}))).unwrap();

        let filter = Filter::by_id(&id);
        session.update_one("c", &filter, &[Update::add_to_set("refs", "x")]).unwrap();
        let again = session.update_one("c", &filter, &[Update::add_to_set("refs", "x")]).unwrap();
        assert_eq!(again, UpdateResult { matched: 1, modified: 0 });

        session.update_one("c", &filter, &[Update::pull("refs", "x")]).unwrap();
        let stored = session.find_one("c", &filter).unwrap();
        assert_eq!(stored["refs"], json!([]));
    }

    #[test]
    fn test_transaction_isolation_and_commit() {
        let store = DocumentStore::new(true);
        let mut session = store.start_session();
        session.insert_one("c", doc(json!({"k": 1}))).unwrap();

        // Not visible outside until commit
        assert_eq!(store.len("c"), 0);
        session.commit().unwrap();
        assert_eq!(store.len("c"), 1);
    }

    #[test]
    fn test_abort_discards_writes() {
        let store = DocumentStore::new(true);
        let mut session = store.start_session();
        session.insert_one("c", doc(json!({"k": 1}))).unwrap();
        session.abort();
        assert_eq!(store.len("c"), 0);
    }

    #[test]
    fn test_disjoint_transactions_both_commit() {
        let store = DocumentStore::new(true);
        let mut first = store.start_session();
        let mut second = store.start_session();

        first.insert_one("c", doc(json!({"k": 1}))).unwrap();
        second.insert_one("c", doc(json!({"k": 2}))).unwrap();

        first.commit().unwrap();
        second.commit().unwrap();
        assert_eq!(store.len("c"), 2);
    }

    #[test]
    fn test_overlapping_writes_conflict() {
        let store = DocumentStore::new(false);
        let id = store
            .start_session()
            .insert_one("c", doc(json!({"refs": []})))
            .unwrap();

        let store = DocumentStore {
            transactions: true,
            ..store
        };
        let filter = Filter::by_id(&id);
        let mut first = store.start_session();
        let mut second = store.start_session();
        first.update_one("c", &filter, &[Update::add_to_set("refs", "a")]).unwrap();
        second.update_one("c", &filter, &[Update::add_to_set("refs", "b")]).unwrap();

        first.commit().unwrap();
        let err = second.commit().unwrap_err();
        assert!(matches!(err, DocumentError::WriteConflict { id: conflicted, .. } if conflicted == id));

        let stored = store.start_session().find_one("c", &filter).unwrap();
        assert_eq!(stored["refs"], json!(["a"]));
    }

    #[test]
    fn test_commit_rechecks_unique_index() {
        let store = DocumentStore::new(true);
        store.create_unique_index("pokemon", "no").unwrap();
        let mut first = store.start_session();
        let mut second = store.start_session();

        first.insert_one("pokemon", doc(json!({"no": "0010"}))).unwrap();
        second.insert_one("pokemon", doc(json!({"no": "0010"}))).unwrap();
        second.insert_one("pokemon", doc(json!({"no": "0011"}))).unwrap();

        first.commit().unwrap();
        assert!(matches!(second.commit(), Err(DocumentError::DuplicateKey { .. })));
        // Nothing of the failed transaction is published
        assert_eq!(store.len("pokemon"), 1);
    }

    #[test]
    fn test_clear_conflicts_with_open_transactions() {
        let store = DocumentStore::new(true);
        let mut session = store.start_session();
        session.insert_one("c", doc(json!({"k": 1}))).unwrap();
        store.clear();
        assert!(matches!(session.commit(), Err(DocumentError::WriteConflict { .. })));
        assert_eq!(store.len("c"), 0);
    }

    #[test]
    fn test_read_only_session_never_conflicts() {
        let store = DocumentStore::new(true);
        let reader = store.start_session();
        let mut writer = store.start_session();
        writer.insert_one("c", doc(json!({"k": 1}))).unwrap();
        writer.commit().unwrap();

        assert_eq!(reader.count_documents("c", &Filter::All), 0);
        reader.commit().unwrap();
    }
}
