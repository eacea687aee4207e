//! Sparse-item key-value store with transactional writes
//!
//! Items are sparse JSON attribute maps addressed by a (partition, sort)
//! key. All writes are expressed as update specs (set / set-if-absent /
//! numeric add / list append) applied read-modify-write under a single
//! writer lock and committed in one RocksDB `WriteBatch`, so a multi-item
//! write is all-or-nothing and no partial state is ever observable.
//!
//! Items carrying the reserved `index_partition` / `index_sort` attributes
//! are mirrored into a secondary index column family inside the same batch;
//! the stale entry for the item's previous version is removed in that batch
//! too, so the index never diverges from the items.

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};
use serde_json::{Map, Value};
use std::path::Path;

use crate::metrics;

/// Reserved attribute: secondary-index partition key.
pub const INDEX_PARTITION_ATTR: &str = "index_partition";
/// Reserved attribute: secondary-index sort key.
pub const INDEX_SORT_ATTR: &str = "index_sort";

const CF_ITEMS: &str = "items";
const CF_INDEX: &str = "status_index";

/// Separator between partition and sort key in the encoded keyspace.
/// Member ids are validated to never contain it.
const KEY_SEPARATOR: char = '/';

/// A stored item: a sparse, self-describing attribute map.
pub type Item = Map<String, Value>;

/// Primary key of an item.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemKey {
    pub partition: String,
    pub sort: String,
}

impl ItemKey {
    pub fn new(partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: sort.into(),
        }
    }

    fn encode(&self) -> Vec<u8> {
        format!("{}{}{}", self.partition, KEY_SEPARATOR, self.sort).into_bytes()
    }
}

/// Declarative mutation applied to one item.
///
/// Mirrors the write primitives of a sparse document store: attributes are
/// overwritten, written only when absent, numerically incremented (missing
/// treated as 0), or appended to a list (missing treated as empty).
#[derive(Debug, Clone, Default)]
pub struct UpdateSpec {
    set: Map<String, Value>,
    set_if_absent: Map<String, Value>,
    add: Vec<(String, i64)>,
    append: Vec<(String, Value)>,
}

impl UpdateSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite an attribute.
    pub fn set(mut self, attr: &str, value: Value) -> Self {
        self.set.insert(attr.to_string(), value);
        self
    }

    /// Write an attribute only when the item does not already have it.
    pub fn set_if_absent(mut self, attr: &str, value: Value) -> Self {
        self.set_if_absent.insert(attr.to_string(), value);
        self
    }

    /// Increment an integer attribute; a missing attribute counts as 0.
    pub fn add(mut self, attr: &str, delta: i64) -> Self {
        self.add.push((attr.to_string(), delta));
        self
    }

    /// Append to a list attribute; a missing attribute counts as an empty
    /// list.
    pub fn append(mut self, attr: &str, value: Value) -> Self {
        self.append.push((attr.to_string(), value));
        self
    }
}

/// Range query over the primary keyspace or the secondary index.
#[derive(Debug, Clone)]
pub enum QueryTarget {
    Primary {
        partition: String,
        sort_prefix: Option<String>,
    },
    Index {
        partition: String,
        sort_prefix: Option<String>,
    },
}

/// Helper trait to safely iterate over RocksDB results with error logging.
/// Unlike `.flatten()` which silently ignores errors, this logs them.
trait LogErrors<T> {
    fn log_errors(self) -> impl Iterator<Item = T>;
}

impl<I, T, E> LogErrors<T> for I
where
    I: Iterator<Item = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    fn log_errors(self) -> impl Iterator<Item = T> {
        self.filter_map(|r| match r {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!("RocksDB iterator error (continuing): {}", e);
                None
            }
        })
    }
}

/// Embedded relationship store.
pub struct RelationStore {
    db: DB,
    /// Serializes read-modify-write cycles so a batch commit reflects a
    /// consistent pre-state for every item it touches.
    write_lock: Mutex<()>,
}

impl RelationStore {
    /// Open (or create) the store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = vec![
            ColumnFamilyDescriptor::new(CF_ITEMS, Options::default()),
            ColumnFamilyDescriptor::new(CF_INDEX, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, cfs)
            .with_context(|| format!("failed to open store at {}", path.display()))?;

        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| anyhow!("missing column family: {name}"))
    }

    /// Apply several update specs as one all-or-nothing write.
    ///
    /// Either every item (and its index mirror) is written or none is.
    pub fn transactional_write(&self, ops: Vec<(ItemKey, UpdateSpec)>) -> Result<()> {
        let _timer = metrics::Timer::new(
            metrics::STORE_OP_DURATION.with_label_values(&["transactional_write"]),
        );
        let result = self.transactional_write_inner(ops);
        metrics::STORE_OPS_TOTAL
            .with_label_values(&[
                "transactional_write",
                if result.is_ok() { "ok" } else { "error" },
            ])
            .inc();
        result
    }

    fn transactional_write_inner(&self, ops: Vec<(ItemKey, UpdateSpec)>) -> Result<()> {
        let _guard = self.write_lock.lock();
        let items_cf = self.cf(CF_ITEMS)?;
        let index_cf = self.cf(CF_INDEX)?;

        let mut batch = WriteBatch::default();
        for (key, spec) in &ops {
            let encoded = key.encode();
            let previous = self.read_item(&encoded)?;
            let updated = apply_update(previous.clone(), spec)?;

            let old_index = index_key_of(previous.as_ref());
            let new_index = index_key_of(Some(&updated));
            if old_index != new_index {
                if let Some(stale) = old_index {
                    batch.delete_cf(index_cf, stale.encode());
                }
            }
            if let Some(index_key) = new_index {
                batch.put_cf(index_cf, index_key.encode(), &encoded);
            }

            let bytes = serde_json::to_vec(&updated).context("failed to serialize item")?;
            batch.put_cf(items_cf, &encoded, bytes);
        }

        self.db.write(batch).context("transactional write failed")
    }

    /// Apply one update spec to a single item, creating it when absent.
    /// Returns the item as written.
    pub fn conditional_update(&self, key: &ItemKey, spec: UpdateSpec) -> Result<Item> {
        let _timer = metrics::Timer::new(
            metrics::STORE_OP_DURATION.with_label_values(&["conditional_update"]),
        );
        let result = self.conditional_update_inner(key, spec);
        metrics::STORE_OPS_TOTAL
            .with_label_values(&[
                "conditional_update",
                if result.is_ok() { "ok" } else { "error" },
            ])
            .inc();
        result
    }

    fn conditional_update_inner(&self, key: &ItemKey, spec: UpdateSpec) -> Result<Item> {
        let _guard = self.write_lock.lock();
        let items_cf = self.cf(CF_ITEMS)?;
        let index_cf = self.cf(CF_INDEX)?;

        let encoded = key.encode();
        let previous = self.read_item(&encoded)?;
        let updated = apply_update(previous.clone(), &spec)?;

        let mut batch = WriteBatch::default();
        let old_index = index_key_of(previous.as_ref());
        let new_index = index_key_of(Some(&updated));
        if old_index != new_index {
            if let Some(stale) = old_index {
                batch.delete_cf(index_cf, stale.encode());
            }
        }
        if let Some(index_key) = new_index {
            batch.put_cf(index_cf, index_key.encode(), &encoded);
        }
        let bytes = serde_json::to_vec(&updated).context("failed to serialize item")?;
        batch.put_cf(items_cf, &encoded, bytes);

        self.db.write(batch).context("conditional update failed")?;
        Ok(updated)
    }

    /// Point lookup.
    pub fn get(&self, key: &ItemKey) -> Result<Option<Item>> {
        let _timer =
            metrics::Timer::new(metrics::STORE_OP_DURATION.with_label_values(&["get"]));
        let result = self.read_item(&key.encode());
        metrics::STORE_OPS_TOTAL
            .with_label_values(&["get", if result.is_ok() { "ok" } else { "error" }])
            .inc();
        result
    }

    /// Range query over a partition, optionally narrowed by a sort-key
    /// prefix. Index queries resolve their entries back to primary items;
    /// dangling references are logged and skipped.
    pub fn query(&self, target: QueryTarget) -> Result<Vec<Item>> {
        let _timer =
            metrics::Timer::new(metrics::STORE_OP_DURATION.with_label_values(&["query"]));
        let result = self.query_inner(target);
        metrics::STORE_OPS_TOTAL
            .with_label_values(&["query", if result.is_ok() { "ok" } else { "error" }])
            .inc();
        result
    }

    fn query_inner(&self, target: QueryTarget) -> Result<Vec<Item>> {
        match target {
            QueryTarget::Primary {
                partition,
                sort_prefix,
            } => {
                let items_cf = self.cf(CF_ITEMS)?;
                let prefix = scan_prefix(&partition, sort_prefix.as_deref());
                let mut items = Vec::new();
                let iter = self.db.iterator_cf(
                    items_cf,
                    IteratorMode::From(prefix.as_bytes(), Direction::Forward),
                );
                for (key, value) in iter.log_errors() {
                    if !key.starts_with(prefix.as_bytes()) {
                        break;
                    }
                    match serde_json::from_slice::<Item>(&value) {
                        Ok(item) => items.push(item),
                        Err(e) => {
                            tracing::warn!("skipping undecodable item in scan: {}", e);
                        }
                    }
                }
                Ok(items)
            }
            QueryTarget::Index {
                partition,
                sort_prefix,
            } => {
                let index_cf = self.cf(CF_INDEX)?;
                let prefix = scan_prefix(&partition, sort_prefix.as_deref());
                let mut refs = Vec::new();
                let iter = self.db.iterator_cf(
                    index_cf,
                    IteratorMode::From(prefix.as_bytes(), Direction::Forward),
                );
                for (key, value) in iter.log_errors() {
                    if !key.starts_with(prefix.as_bytes()) {
                        break;
                    }
                    refs.push(value.to_vec());
                }

                let mut items = Vec::with_capacity(refs.len());
                for primary_key in refs {
                    match self.read_item(&primary_key)? {
                        Some(item) => items.push(item),
                        None => {
                            tracing::warn!(
                                "dangling index entry -> {}",
                                String::from_utf8_lossy(&primary_key)
                            );
                        }
                    }
                }
                Ok(items)
            }
        }
    }

    /// Non-mutating reachability probe for health checks.
    pub fn ping(&self) -> Result<()> {
        let items_cf = self.cf(CF_ITEMS)?;
        self.db
            .get_cf(items_cf, b"__ping__")
            .context("store unreachable")?;
        Ok(())
    }

    fn read_item(&self, encoded_key: &[u8]) -> Result<Option<Item>> {
        let items_cf = self.cf(CF_ITEMS)?;
        match self.db.get_cf(items_cf, encoded_key)? {
            Some(bytes) => {
                let item = serde_json::from_slice(&bytes)
                    .context("stored item is not a JSON object")?;
                Ok(Some(item))
            }
            None => Ok(None),
        }
    }
}

/// Compute the new version of an item under an update spec.
///
/// `set_if_absent` is evaluated against the pre-state, before `set`.
fn apply_update(existing: Option<Item>, spec: &UpdateSpec) -> Result<Item> {
    let mut item = existing.unwrap_or_default();

    for (attr, value) in &spec.set_if_absent {
        if !item.contains_key(attr) {
            item.insert(attr.clone(), value.clone());
        }
    }
    for (attr, value) in &spec.set {
        item.insert(attr.clone(), value.clone());
    }
    for (attr, delta) in &spec.add {
        let current = item.get(attr).and_then(Value::as_i64).unwrap_or(0);
        item.insert(attr.clone(), Value::from(current + delta));
    }
    for (attr, value) in &spec.append {
        let entry = item
            .entry(attr.clone())
            .or_insert_with(|| Value::Array(Vec::new()));
        match entry {
            Value::Array(list) => list.push(value.clone()),
            _ => return Err(anyhow!("attribute '{attr}' is not a list")),
        }
    }

    Ok(item)
}

/// Secondary-index key of an item, when it carries the reserved attributes.
fn index_key_of(item: Option<&Item>) -> Option<ItemKey> {
    let item = item?;
    let partition = item.get(INDEX_PARTITION_ATTR)?.as_str()?;
    let sort = item.get(INDEX_SORT_ATTR)?.as_str()?;
    Some(ItemKey::new(partition, sort))
}

fn scan_prefix(partition: &str, sort_prefix: Option<&str>) -> String {
    format!(
        "{}{}{}",
        partition,
        KEY_SEPARATOR,
        sort_prefix.unwrap_or("")
    )
}
