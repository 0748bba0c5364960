use crate::error::Result;
use crate::id::Id;
use crate::key::ContentsKey;
use crate::store::{load_entity, Entity, EntityKind, Store};
use serde::{Deserialize, Serialize};

/// One key → value-id binding in the leaf tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEntry {
    pub key: ContentsKey,
    pub value: Id,
}

/// Leaf tier of the tree: maps keys to value ids.
///
/// Entries are kept sorted by key, so the canonical encoding is
/// deterministic for free.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L3 {
    pub id: Id,
    pub entries: Vec<KeyEntry>,
}

impl L3 {
    pub fn empty() -> L3 {
        L3::build(Vec::new())
    }

    /// Id of the canonical empty L3.
    pub fn empty_id() -> Id {
        L3::empty().id
    }

    fn build(entries: Vec<KeyEntry>) -> L3 {
        let id = Id::build(&canonical_bytes(&entries));
        L3 { id, entries }
    }

    pub fn get(&self, key: &ContentsKey) -> Option<Id> {
        self.entries
            .binary_search_by(|e| e.key.cmp(key))
            .ok()
            .map(|i| self.entries[i].value)
    }

    /// Insert or update one key. Returns a new L3 (immutable).
    pub fn with_entry(&self, key: ContentsKey, value: Id) -> L3 {
        let mut entries = self.entries.clone();
        match entries.binary_search_by(|e| e.key.cmp(&key)) {
            Ok(i) => entries[i].value = value,
            Err(i) => entries.insert(i, KeyEntry { key, value }),
        }
        L3::build(entries)
    }

    /// Drop one key. Returns a new L3; dropping the last entry yields a
    /// tier that hashes back to the canonical empty id.
    pub fn without(&self, key: &ContentsKey) -> L3 {
        let mut entries = self.entries.clone();
        if let Ok(i) = entries.binary_search_by(|e| e.key.cmp(key)) {
            entries.remove(i);
        }
        L3::build(entries)
    }

    /// Resolve an L3 id, short-circuiting the canonical empty tier so the
    /// empty chain never needs seeding in the store.
    pub fn load_or_empty(store: &dyn Store, id: Id) -> Result<L3> {
        if id == L3::empty_id() {
            return Ok(L3::empty());
        }
        load_entity(store, id)
    }
}

impl Entity for L3 {
    const KIND: EntityKind = EntityKind::L3;

    fn id(&self) -> Id {
        self.id
    }

    fn compute_id(&self) -> Id {
        Id::build(&canonical_bytes(&self.entries))
    }
}

fn canonical_bytes(entries: &[KeyEntry]) -> Vec<u8> {
    let mut buf = Vec::new();
    for entry in entries {
        let key = entry.key.canonical_bytes();
        buf.extend_from_slice(&(key.len() as u32).to_be_bytes());
        buf.extend_from_slice(&key);
        buf.extend_from_slice(entry.value.as_bytes());
    }
    buf
}
