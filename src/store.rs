use crate::error::{Result, StrataError};
use crate::expression::{ConditionExpression, UpdateExpression};
use crate::id::Id;
use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A stored record in its wire form.
pub type Document = serde_json::Value;

/// The typed value kinds a store keeps apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Ref,
    L1,
    L2,
    L3,
    Value,
    CommitMeta,
}

impl EntityKind {
    fn dir_name(&self) -> &'static str {
        match self {
            EntityKind::Ref => "refs",
            EntityKind::L1 => "l1",
            EntityKind::L2 => "l2",
            EntityKind::L3 => "l3",
            EntityKind::Value => "values",
            EntityKind::CommitMeta => "metadata",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// A persisted node of the entity graph.
///
/// `compute_id` re-derives the id from the canonical encoding; loads
/// verify it against the stored id and treat a mismatch as corruption.
pub trait Entity: Serialize + DeserializeOwned {
    const KIND: EntityKind;

    fn id(&self) -> Id;

    fn compute_id(&self) -> Id;

    fn ensure_consistent_id(&self) -> Result<()> {
        if self.id() != self.compute_id() {
            return Err(StrataError::Corruption(format!(
                "{} {} does not match its content hash {}",
                Self::KIND,
                self.id(),
                self.compute_id()
            )));
        }
        Ok(())
    }
}

/// One item of a batched save.
#[derive(Debug, Clone)]
pub struct SaveOp {
    pub kind: EntityKind,
    pub id: Id,
    pub document: Document,
}

impl SaveOp {
    pub fn of<T: Entity>(entity: &T) -> Result<SaveOp> {
        Ok(SaveOp {
            kind: T::KIND,
            id: entity.id(),
            document: serde_json::to_value(entity)?,
        })
    }
}

/// KV persistence with typed kinds, conditional updates and batched saves.
///
/// Implementations must provide strong per-key consistency, atomic
/// conditional updates, and idempotent writes keyed by content id.
pub trait Store: Send + Sync {
    fn load(&self, kind: EntityKind, id: Id) -> Result<Document>;

    fn load_multi(&self, kind: EntityKind, ids: &[Id]) -> Result<Vec<Document>> {
        ids.iter().map(|id| self.load(kind, *id)).collect()
    }

    /// Persist a batch. Writing an already-present content-addressed id
    /// is a no-op, so the batch as a whole is idempotent.
    fn save(&self, ops: &[SaveOp]) -> Result<()>;

    /// Create-new semantics for records keyed by name hash rather than
    /// content. Returns false when the id already exists.
    fn put_if_absent(&self, kind: EntityKind, id: Id, document: Document) -> Result<bool>;

    /// Conditionally mutate one record. Returns `None` (not an error) on
    /// condition mismatch, the updated document on success.
    fn update(
        &self,
        kind: EntityKind,
        id: Id,
        update: &UpdateExpression,
        condition: Option<&ConditionExpression>,
    ) -> Result<Option<Document>>;

    /// Returns false when the record is absent or the condition fails.
    fn delete(
        &self,
        kind: EntityKind,
        id: Id,
        condition: Option<&ConditionExpression>,
    ) -> Result<bool>;
}

/// Load one entity and verify its content hash.
pub fn load_entity<T: Entity>(store: &dyn Store, id: Id) -> Result<T> {
    let document = store.load(T::KIND, id)?;
    let entity: T = serde_json::from_value(document)?;
    if entity.id() != id {
        return Err(StrataError::Corruption(format!(
            "{} loaded under id {} but records id {}",
            T::KIND,
            id,
            entity.id()
        )));
    }
    entity.ensure_consistent_id()?;
    Ok(entity)
}

/// In-memory store, the reference backend for tests and embedding.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<(EntityKind, Id), Document>>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    pub fn contains(&self, kind: EntityKind, id: Id) -> bool {
        self.entries.lock().unwrap().contains_key(&(kind, id))
    }
}

impl Store for MemoryStore {
    fn load(&self, kind: EntityKind, id: Id) -> Result<Document> {
        self.entries
            .lock()
            .unwrap()
            .get(&(kind, id))
            .cloned()
            .ok_or(StrataError::NotFound { kind, id })
    }

    fn load_multi(&self, kind: EntityKind, ids: &[Id]) -> Result<Vec<Document>> {
        let entries = self.entries.lock().unwrap();
        ids.iter()
            .map(|id| {
                entries
                    .get(&(kind, *id))
                    .cloned()
                    .ok_or(StrataError::NotFound { kind, id: *id })
            })
            .collect()
    }

    fn save(&self, ops: &[SaveOp]) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        for op in ops {
            entries
                .entry((op.kind, op.id))
                .or_insert_with(|| op.document.clone());
        }
        Ok(())
    }

    fn put_if_absent(&self, kind: EntityKind, id: Id, document: Document) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap();
        if entries.contains_key(&(kind, id)) {
            return Ok(false);
        }
        entries.insert((kind, id), document);
        Ok(true)
    }

    fn update(
        &self,
        kind: EntityKind,
        id: Id,
        update: &UpdateExpression,
        condition: Option<&ConditionExpression>,
    ) -> Result<Option<Document>> {
        let mut entries = self.entries.lock().unwrap();
        let document = entries
            .get_mut(&(kind, id))
            .ok_or(StrataError::NotFound { kind, id })?;
        if let Some(condition) = condition {
            if !condition.check(document) {
                return Ok(None);
            }
        }
        let mut next = document.clone();
        update.apply(&mut next)?;
        *document = next.clone();
        Ok(Some(next))
    }

    fn delete(
        &self,
        kind: EntityKind,
        id: Id,
        condition: Option<&ConditionExpression>,
    ) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap();
        let Some(document) = entries.get(&(kind, id)) else {
            return Ok(false);
        };
        if let Some(condition) = condition {
            if !condition.check(document) {
                return Ok(false);
            }
        }
        entries.remove(&(kind, id));
        Ok(true)
    }
}

/// File-backed store: one lz4-compressed JSON file per entity, fanned out
/// under per-kind directories by the first two hex chars of the id.
///
/// Mutating operations serialize through a store-wide lock, which gives
/// the per-key consistency the branch update protocol needs within one
/// process.
pub struct FileStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

const KINDS: [EntityKind; 6] = [
    EntityKind::Ref,
    EntityKind::L1,
    EntityKind::L2,
    EntityKind::L3,
    EntityKind::Value,
    EntityKind::CommitMeta,
];

impl FileStore {
    /// Open or create a store at the given directory.
    pub fn open(dir: &Path) -> Result<FileStore> {
        for kind in KINDS {
            fs::create_dir_all(dir.join(kind.dir_name()))?;
        }
        Ok(FileStore {
            dir: dir.to_path_buf(),
            lock: Mutex::new(()),
        })
    }

    fn entity_path(&self, kind: EntityKind, id: Id) -> PathBuf {
        let hex = id.to_hex();
        let dir = self.dir.join(kind.dir_name()).join(&hex[..2]);
        let _ = fs::create_dir_all(&dir);
        dir.join(hex)
    }

    fn read(&self, kind: EntityKind, id: Id) -> Result<Document> {
        let path = self.entity_path(kind, id);
        if !path.exists() {
            return Err(StrataError::NotFound { kind, id });
        }
        let compressed = fs::read(&path)?;
        let data = decompress_size_prepended(&compressed)
            .map_err(|e| StrataError::Corruption(format!("{} {}: {}", kind, id, e)))?;
        Ok(serde_json::from_slice(&data)?)
    }

    fn write(&self, kind: EntityKind, id: Id, document: &Document) -> Result<()> {
        let data = serde_json::to_vec(document)?;
        fs::write(self.entity_path(kind, id), compress_prepend_size(&data))?;
        Ok(())
    }

    /// Total bytes used by entity files.
    pub fn disk_usage(&self) -> Result<u64> {
        let mut total = 0u64;
        for kind in KINDS {
            let kind_dir = self.dir.join(kind.dir_name());
            for prefix in fs::read_dir(&kind_dir)? {
                for entry in fs::read_dir(prefix?.path())? {
                    total += entry?.metadata()?.len();
                }
            }
        }
        Ok(total)
    }
}

impl Store for FileStore {
    fn load(&self, kind: EntityKind, id: Id) -> Result<Document> {
        self.read(kind, id)
    }

    fn save(&self, ops: &[SaveOp]) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        for op in ops {
            if !self.entity_path(op.kind, op.id).exists() {
                self.write(op.kind, op.id, &op.document)?;
            }
        }
        Ok(())
    }

    fn put_if_absent(&self, kind: EntityKind, id: Id, document: Document) -> Result<bool> {
        let _guard = self.lock.lock().unwrap();
        if self.entity_path(kind, id).exists() {
            return Ok(false);
        }
        self.write(kind, id, &document)?;
        Ok(true)
    }

    fn update(
        &self,
        kind: EntityKind,
        id: Id,
        update: &UpdateExpression,
        condition: Option<&ConditionExpression>,
    ) -> Result<Option<Document>> {
        let _guard = self.lock.lock().unwrap();
        let mut document = self.read(kind, id)?;
        if let Some(condition) = condition {
            if !condition.check(&document) {
                return Ok(None);
            }
        }
        update.apply(&mut document)?;
        self.write(kind, id, &document)?;
        Ok(Some(document))
    }

    fn delete(
        &self,
        kind: EntityKind,
        id: Id,
        condition: Option<&ConditionExpression>,
    ) -> Result<bool> {
        let _guard = self.lock.lock().unwrap();
        let path = self.entity_path(kind, id);
        if !path.exists() {
            return Ok(false);
        }
        if let Some(condition) = condition {
            let document = self.read(kind, id)?;
            if !condition.check(&document) {
                return Ok(false);
            }
        }
        fs::remove_file(path)?;
        Ok(true)
    }
}
