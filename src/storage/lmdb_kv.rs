//! LMDB Key-Value Store - hash and set commands over one LMDB database
//!
//! Provides the small command set the key-value backend needs (`EXISTS`,
//! `HGETALL`, `HSET`, `SMEMBERS`, `SADD`, `SREM`, `DEL`, `SCAN`). Every value is
//! either a hash or a set, bincode-encoded under a string key.
//!
//! Each command runs in its own LMDB transaction. A [`Pipeline`] batches
//! commands into one call but is NOT atomic: a failure part-way leaves the
//! earlier commands applied.
//!
//! ## Performance
//! - Read: memory-mapped, zero-copy until decode
//! - Write: one ACID transaction per command
//! - Scan: full key-space walk filtered by glob pattern

use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::BackendKind;
use crate::error::PokedexError;

pub type Hash = BTreeMap<String, String>;
pub type Set = BTreeSet<String>;

/// A stored value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoredValue {
    Hash(Hash),
    Set(Set),
}

impl StoredValue {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Hash(_) => "hash",
            Self::Set(_) => "set",
        }
    }
}

/// Error type for key-value operations
#[derive(Debug, thiserror::Error)]
pub enum KeyValueError {
    #[error("LMDB error: {0}")]
    Heed(#[from] heed::Error),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("WRONGTYPE key {key} holds a {actual}, expected a {expected}")]
    WrongType {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("Connection is closed")]
    ConnectionClosed,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<KeyValueError> for PokedexError {
    fn from(err: KeyValueError) -> Self {
        PokedexError::storage(BackendKind::KeyValue, err)
    }
}

type KvResult<T> = Result<T, KeyValueError>;

fn encode(value: &StoredValue) -> KvResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| KeyValueError::Serialization(e.to_string()))
}

fn decode(bytes: &[u8]) -> KvResult<StoredValue> {
    bincode::deserialize(bytes).map_err(|e| KeyValueError::Serialization(e.to_string()))
}

/// Glob match supporting `*` (any run) and `?` (any one char)
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let key: Vec<char> = key.chars().collect();
    let (mut p, mut k) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while k < key.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == key[k]) {
            p += 1;
            k += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, k));
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            k = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|c| *c == '*')
}

/// LMDB-backed key-value store
#[derive(Clone)]
pub struct LmdbKeyValueStore {
    env: Arc<Env>,
    db: Database<Str, Bytes>,
}

impl LmdbKeyValueStore {
    /// Open or create the store
    ///
    /// # Arguments
    /// * `path` - Directory for LMDB data files
    /// * `max_size` - Maximum database size in bytes (multiple of the page size)
    pub fn new<P: AsRef<Path>>(path: P, max_size: usize) -> KvResult<Self> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size)
                .max_dbs(1)
                .open(path.as_ref())?
        };

        let mut wtxn = env.write_txn()?;
        let db = env.create_database::<Str, Bytes>(&mut wtxn, Some("keyspace"))?;
        wtxn.commit()?;

        info!(
            "LMDB key-value store opened at {} ({}MB)",
            path.as_ref().display(),
            max_size / (1024 * 1024)
        );

        Ok(Self {
            env: Arc::new(env),
            db,
        })
    }

    /// Check out a connection handle
    pub fn connect(&self) -> KeyValueConnection {
        KeyValueConnection {
            store: self.clone(),
            open: AtomicBool::new(true),
        }
    }

    fn read(&self, key: &str) -> KvResult<Option<StoredValue>> {
        let rtxn = self.env.read_txn()?;
        match self.db.get(&rtxn, key)? {
            Some(bytes) => Ok(Some(decode(bytes)?)),
            None => Ok(None),
        }
    }

    /// Read-modify-write of one key inside a single write transaction.
    /// `f` returns the new value (`None` deletes the key) and a reply.
    fn modify<R>(&self, key: &str, f: impl FnOnce(Option<StoredValue>) -> KvResult<(Option<StoredValue>, R)>) -> KvResult<R> {
        let mut wtxn = self.env.write_txn()?;
        let current = match self.db.get(&wtxn, key)? {
            Some(bytes) => Some(decode(bytes)?),
            None => None,
        };
        let (next, reply) = f(current)?;
        match next {
            Some(value) => self.db.put(&mut wtxn, key, &encode(&value)?)?,
            None => {
                self.db.delete(&mut wtxn, key)?;
            }
        }
        wtxn.commit()?;
        Ok(reply)
    }

    // ========================================================================
    // Commands
    // ========================================================================

    pub fn exists(&self, key: &str) -> KvResult<bool> {
        let rtxn = self.env.read_txn()?;
        Ok(self.db.get(&rtxn, key)?.is_some())
    }

    /// All fields of a hash; empty when the key is missing
    pub fn hgetall(&self, key: &str) -> KvResult<Hash> {
        match self.read(key)? {
            None => Ok(Hash::new()),
            Some(StoredValue::Hash(hash)) => Ok(hash),
            Some(other) => Err(wrong_type(key, "hash", &other)),
        }
    }

    /// Set hash fields; returns how many were newly added
    pub fn hset(&self, key: &str, fields: &[(String, String)]) -> KvResult<usize> {
        if fields.is_empty() {
            return Ok(0);
        }
        self.modify(key, |current| {
            let mut hash = match current {
                None => Hash::new(),
                Some(StoredValue::Hash(hash)) => hash,
                Some(other) => return Err(wrong_type(key, "hash", &other)),
            };
            let added = fields
                .iter()
                .filter(|(field, value)| hash.insert(field.clone(), value.clone()).is_none())
                .count();
            Ok((Some(StoredValue::Hash(hash)), added))
        })
    }

    /// Members of a set; empty when the key is missing
    pub fn smembers(&self, key: &str) -> KvResult<Set> {
        match self.read(key)? {
            None => Ok(Set::new()),
            Some(StoredValue::Set(set)) => Ok(set),
            Some(other) => Err(wrong_type(key, "set", &other)),
        }
    }

    /// Add members; returns how many were not already present
    pub fn sadd(&self, key: &str, members: &[String]) -> KvResult<usize> {
        if members.is_empty() {
            return Ok(0);
        }
        self.modify(key, |current| {
            let mut set = match current {
                None => Set::new(),
                Some(StoredValue::Set(set)) => set,
                Some(other) => return Err(wrong_type(key, "set", &other)),
            };
            let added = members.iter().filter(|m| set.insert((*m).clone())).count();
            Ok((Some(StoredValue::Set(set)), added))
        })
    }

    /// Remove members; an emptied set is deleted
    pub fn srem(&self, key: &str, members: &[String]) -> KvResult<usize> {
        if members.is_empty() || !self.exists(key)? {
            return Ok(0);
        }
        self.modify(key, |current| {
            let mut set = match current {
                None => return Ok((None, 0)),
                Some(StoredValue::Set(set)) => set,
                Some(other) => return Err(wrong_type(key, "set", &other)),
            };
            let removed = members.iter().filter(|m| set.remove(*m)).count();
            let next = (!set.is_empty()).then_some(StoredValue::Set(set));
            Ok((next, removed))
        })
    }

    /// Delete keys; returns how many existed
    pub fn del(&self, keys: &[String]) -> KvResult<usize> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut wtxn = self.env.write_txn()?;
        let mut removed = 0;
        for key in keys {
            if self.db.delete(&mut wtxn, key)? {
                removed += 1;
            }
        }
        wtxn.commit()?;
        Ok(removed)
    }

    /// Keys matching a glob pattern, in key order
    pub fn scan(&self, pattern: &str) -> KvResult<Vec<String>> {
        let rtxn = self.env.read_txn()?;
        let mut keys = Vec::new();
        for entry in self.db.iter(&rtxn)? {
            let (key, _) = entry?;
            if glob_match(pattern, key) {
                keys.push(key.to_string());
            }
        }
        Ok(keys)
    }

    pub fn dbsize(&self) -> KvResult<usize> {
        let rtxn = self.env.read_txn()?;
        Ok(self.db.len(&rtxn)? as usize)
    }

    /// Remove every key
    pub fn flush_all(&self) -> KvResult<()> {
        let mut wtxn = self.env.write_txn()?;
        self.db.clear(&mut wtxn)?;
        wtxn.commit()?;
        info!("LMDB key-value store flushed");
        Ok(())
    }
}

fn wrong_type(key: &str, expected: &'static str, actual: &StoredValue) -> KeyValueError {
    KeyValueError::WrongType {
        key: key.to_string(),
        expected,
        actual: actual.type_name(),
    }
}

// ============================================================================
// Connections and pipelines
// ============================================================================

/// A per-unit-of-work handle; commands fail once it is closed
pub struct KeyValueConnection {
    store: LmdbKeyValueStore,
    open: AtomicBool,
}

impl KeyValueConnection {
    fn store(&self) -> KvResult<&LmdbKeyValueStore> {
        if self.is_open() {
            Ok(&self.store)
        } else {
            Err(KeyValueError::ConnectionClosed)
        }
    }

    pub fn exists(&self, key: &str) -> KvResult<bool> {
        self.store()?.exists(key)
    }

    pub fn hgetall(&self, key: &str) -> KvResult<Hash> {
        self.store()?.hgetall(key)
    }

    pub fn hset(&self, key: &str, fields: &[(String, String)]) -> KvResult<usize> {
        self.store()?.hset(key, fields)
    }

    pub fn smembers(&self, key: &str) -> KvResult<Set> {
        self.store()?.smembers(key)
    }

    pub fn sadd(&self, key: &str, members: &[String]) -> KvResult<usize> {
        self.store()?.sadd(key, members)
    }

    pub fn srem(&self, key: &str, members: &[String]) -> KvResult<usize> {
        self.store()?.srem(key, members)
    }

    pub fn del(&self, keys: &[String]) -> KvResult<usize> {
        self.store()?.del(keys)
    }

    pub fn scan(&self, pattern: &str) -> KvResult<Vec<String>> {
        self.store()?.scan(pattern)
    }

    pub fn pipeline(&self) -> Pipeline<'_> {
        Pipeline {
            connection: self,
            commands: Vec::new(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Release the handle
    pub fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            debug!("Key-value connection released");
        }
    }
}

#[derive(Debug, Clone)]
pub enum Command {
    Exists(String),
    HGetAll(String),
    HSet(String, Vec<(String, String)>),
    SMembers(String),
    SAdd(String, Vec<String>),
    SRem(String, Vec<String>),
    Del(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Bool(bool),
    Int(usize),
    Hash(Hash),
    Set(Set),
}

impl Reply {
    fn mismatch(expected: &'static str) -> KeyValueError {
        KeyValueError::Serialization(format!("pipeline reply is not a {}", expected))
    }

    pub fn into_bool(self) -> KvResult<bool> {
        match self {
            Self::Bool(b) => Ok(b),
            _ => Err(Self::mismatch("bool")),
        }
    }

    pub fn into_hash(self) -> KvResult<Hash> {
        match self {
            Self::Hash(h) => Ok(h),
            _ => Err(Self::mismatch("hash")),
        }
    }

    pub fn into_set(self) -> KvResult<Set> {
        match self {
            Self::Set(s) => Ok(s),
            _ => Err(Self::mismatch("set")),
        }
    }
}

/// Buffered commands sent in one batch, applied one by one
pub struct Pipeline<'c> {
    connection: &'c KeyValueConnection,
    commands: Vec<Command>,
}

impl Pipeline<'_> {
    pub fn exists(&mut self, key: impl Into<String>) -> &mut Self {
        self.commands.push(Command::Exists(key.into()));
        self
    }

    pub fn hgetall(&mut self, key: impl Into<String>) -> &mut Self {
        self.commands.push(Command::HGetAll(key.into()));
        self
    }

    pub fn hset(&mut self, key: impl Into<String>, fields: Vec<(String, String)>) -> &mut Self {
        self.commands.push(Command::HSet(key.into(), fields));
        self
    }

    pub fn smembers(&mut self, key: impl Into<String>) -> &mut Self {
        self.commands.push(Command::SMembers(key.into()));
        self
    }

    pub fn sadd(&mut self, key: impl Into<String>, members: Vec<String>) -> &mut Self {
        self.commands.push(Command::SAdd(key.into(), members));
        self
    }

    pub fn srem(&mut self, key: impl Into<String>, members: Vec<String>) -> &mut Self {
        self.commands.push(Command::SRem(key.into(), members));
        self
    }

    pub fn del(&mut self, keys: Vec<String>) -> &mut Self {
        self.commands.push(Command::Del(keys));
        self
    }

    /// Send the buffered commands; replies come back in command order.
    /// Stops at the first failing command without undoing earlier ones.
    pub fn execute(&mut self) -> KvResult<Vec<Reply>> {
        let connection = self.connection;
        let store = connection.store()?;
        let commands = std::mem::take(&mut self.commands);
        let mut replies = Vec::with_capacity(commands.len());
        for command in commands {
            let reply = match command {
                Command::Exists(key) => Reply::Bool(store.exists(&key)?),
                Command::HGetAll(key) => Reply::Hash(store.hgetall(&key)?),
                Command::HSet(key, fields) => Reply::Int(store.hset(&key, &fields)?),
                Command::SMembers(key) => Reply::Set(store.smembers(&key)?),
                Command::SAdd(key, members) => Reply::Int(store.sadd(&key, &members)?),
                Command::SRem(key, members) => Reply::Int(store.srem(&key, &members)?),
                Command::Del(keys) => Reply::Int(store.del(&keys)?),
            };
            replies.push(reply);
        }
        Ok(replies)
    }
}
