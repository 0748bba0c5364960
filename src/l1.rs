use crate::error::{Result, StrataError};
use crate::id::Id;
use crate::idmap::IdMap;
use crate::key::{ContentsKey, KeyMutationList};
use crate::l2::L2;
use crate::l3::L3;
use crate::store::{load_entity, Entity, EntityKind, Store};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How many direct ancestors an L1 carries before the tail of the list is
/// rolled into a checkpoint pointer.
const ANCESTOR_SPAN: usize = 150;

/// Root tier: the complete tree state at one commit.
///
/// The bounded ancestry list plus the checkpoint pointer keep history
/// walks amortised O(1) per step regardless of chain length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L1 {
    pub id: Id,
    /// Commit metadata id.
    pub metadata: Id,
    /// Children pointing into L2s.
    pub tree: IdMap,
    /// Immediate parent L1 (empty for the root).
    pub parent: Id,
    /// Recent ancestry, newest first, bounded by `ANCESTOR_SPAN`.
    pub ancestors: Vec<Id>,
    /// Oldest reachable summary once the ancestry list has been rolled;
    /// empty until then.
    pub checkpoint: Id,
    /// Key-level changes the commit introduced.
    pub keys: KeyMutationList,
}

impl L1 {
    pub const SIZE: usize = 43;

    /// The canonical empty L1. Never persisted; its id is the
    /// distinguished empty id rather than a content hash.
    pub fn empty() -> L1 {
        L1 {
            id: Id::EMPTY,
            metadata: Id::EMPTY,
            tree: IdMap::filled(L1::SIZE, L2::empty_id()),
            parent: Id::EMPTY,
            ancestors: Vec::new(),
            checkpoint: Id::EMPTY,
            keys: KeyMutationList::default(),
        }
    }

    fn build(
        metadata: Id,
        tree: IdMap,
        parent: Id,
        ancestors: Vec<Id>,
        checkpoint: Id,
        keys: KeyMutationList,
    ) -> L1 {
        let id = Id::build(&canonical_bytes(
            &metadata,
            &tree,
            &parent,
            &ancestors,
            &checkpoint,
            &keys,
        ));
        L1 {
            id,
            metadata,
            tree,
            parent,
            ancestors,
            checkpoint,
            keys,
        }
    }

    /// Derive the successor L1 for a commit: same lineage, new frontier.
    pub fn get_child_with_tree(&self, commit: Id, tree: IdMap, keys: KeyMutationList) -> L1 {
        let mut ancestors = Vec::with_capacity(self.ancestors.len() + 1);
        if !self.id.is_empty() {
            ancestors.push(self.id);
            ancestors.extend_from_slice(&self.ancestors);
        }
        L1::build(commit, tree, self.id, ancestors, self.checkpoint, keys)
    }

    /// Roll the ancestry list into a checkpoint once it outgrows the
    /// span. The rolled-off ancestor must resolve (through the map of
    /// not-yet-persisted L1s first, then the store) before it is pinned;
    /// a dangling checkpoint is corruption.
    pub fn with_checkpoint_as_necessary(
        self,
        store: &dyn Store,
        unsaved: &HashMap<Id, L1>,
    ) -> Result<L1> {
        if self.ancestors.len() <= ANCESTOR_SPAN {
            return Ok(self);
        }
        let rolled = self.ancestors[ANCESTOR_SPAN];
        if !unsaved.contains_key(&rolled) {
            load_entity::<L1>(store, rolled).map_err(|e| match e {
                StrataError::NotFound { .. } => StrataError::Corruption(format!(
                    "checkpoint candidate {} is not reachable",
                    rolled
                )),
                other => other,
            })?;
        }
        let kept = self.ancestors[..ANCESTOR_SPAN].to_vec();
        Ok(L1::build(
            self.metadata,
            self.tree,
            self.parent,
            kept,
            rolled,
            self.keys,
        ))
    }

    /// Slot an object key hashes to within this tier.
    pub fn key_position(key: &ContentsKey) -> usize {
        let id = key.id();
        let bytes = id.as_bytes();
        let v = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        v as usize % L1::SIZE
    }

    /// Resolve one key down the tiers to its value id.
    pub fn get_key(&self, store: &dyn Store, key: &ContentsKey) -> Result<Option<Id>> {
        let l2 = L2::load_or_empty(store, self.tree.get(L1::key_position(key))?)?;
        let l3 = L3::load_or_empty(store, l2.child(L2::key_position(key))?)?;
        Ok(l3.get(key))
    }

    /// Walk up to `limit` ancestor ids, following checkpoint jumps.
    pub fn ancestry(&self, store: &dyn Store, limit: usize) -> Result<Vec<Id>> {
        let mut out = Vec::new();
        let mut current = self.clone();
        loop {
            for a in &current.ancestors {
                if out.len() == limit {
                    return Ok(out);
                }
                out.push(*a);
            }
            if current.checkpoint.is_empty() || out.len() == limit {
                return Ok(out);
            }
            out.push(current.checkpoint);
            current = load_entity(store, current.checkpoint)?;
        }
    }
}

impl Entity for L1 {
    const KIND: EntityKind = EntityKind::L1;

    fn id(&self) -> Id {
        self.id
    }

    fn compute_id(&self) -> Id {
        Id::build(&canonical_bytes(
            &self.metadata,
            &self.tree,
            &self.parent,
            &self.ancestors,
            &self.checkpoint,
            &self.keys,
        ))
    }
}

fn canonical_bytes(
    metadata: &Id,
    tree: &IdMap,
    parent: &Id,
    ancestors: &[Id],
    checkpoint: &Id,
    keys: &KeyMutationList,
) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(metadata.as_bytes());
    buf.extend_from_slice(&tree.canonical_bytes());
    buf.extend_from_slice(parent.as_bytes());
    buf.extend_from_slice(checkpoint.as_bytes());
    buf.extend_from_slice(&(ancestors.len() as u32).to_be_bytes());
    for a in ancestors {
        buf.extend_from_slice(a.as_bytes());
    }
    buf.extend_from_slice(&keys.canonical_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, SaveOp};

    #[test]
    fn empty_l1_has_empty_id() {
        let l1 = L1::empty();
        assert!(l1.id.is_empty());
        assert_eq!(l1.tree.size(), L1::SIZE);
        assert!(l1.tree.iter().all(|id| *id == L2::empty_id()));
    }

    #[test]
    fn child_links_to_parent() {
        let root = L1::empty();
        let tree = root.tree.with_id(3, Id::build(b"l2")).unwrap();
        let child = root.get_child_with_tree(Id::build(b"meta"), tree, KeyMutationList::default());
        assert_eq!(child.parent, Id::EMPTY);
        assert!(child.ancestors.is_empty());
        child.ensure_consistent_id().unwrap();

        let grand =
            child.get_child_with_tree(Id::build(b"meta2"), child.tree.clone(), KeyMutationList::default());
        assert_eq!(grand.parent, child.id);
        assert_eq!(grand.ancestors, vec![child.id]);
    }

    #[test]
    fn checkpoint_rolls_past_span() {
        let store = MemoryStore::new();
        let mut unsaved: HashMap<Id, L1> = HashMap::new();
        let mut current = L1::empty();
        for i in 0..(ANCESTOR_SPAN + 2) {
            let tree = current
                .tree
                .with_id(i % L1::SIZE, Id::build(format!("l2-{}", i).as_bytes()))
                .unwrap();
            let child = current
                .get_child_with_tree(Id::build(format!("m{}", i).as_bytes()), tree, KeyMutationList::default())
                .with_checkpoint_as_necessary(&store, &unsaved)
                .unwrap();
            unsaved.insert(child.id, child.clone());
            current = child;
        }
        assert_eq!(current.ancestors.len(), ANCESTOR_SPAN);
        assert!(!current.checkpoint.is_empty());
        // the rolled-off ancestor is the checkpoint
        assert!(unsaved.contains_key(&current.checkpoint));
    }

    #[test]
    fn dangling_checkpoint_is_corruption() {
        let store = MemoryStore::new();
        let unsaved = HashMap::new();
        let mut l1 = L1::empty().get_child_with_tree(
            Id::build(b"m"),
            L1::empty().tree.clone(),
            KeyMutationList::default(),
        );
        l1.ancestors = (0..(ANCESTOR_SPAN + 1))
            .map(|i| Id::build(format!("a{}", i).as_bytes()))
            .collect();
        let err = l1.with_checkpoint_as_necessary(&store, &unsaved).unwrap_err();
        assert!(matches!(err, StrataError::Corruption(_)));
    }

    #[test]
    fn get_key_resolves_through_tiers() {
        let store = MemoryStore::new();
        let key = ContentsKey::of(vec!["db", "table"]).unwrap();
        let value = Id::build(b"value");

        let l3 = L3::empty().with_entry(key.clone(), value);
        let l2 = L2::empty().with_child(L2::key_position(&key), l3.id).unwrap();
        store
            .save(&[SaveOp::of(&l3).unwrap(), SaveOp::of(&l2).unwrap()])
            .unwrap();

        let root = L1::empty();
        let tree = root.tree.with_id(L1::key_position(&key), l2.id).unwrap();
        let l1 = root.get_child_with_tree(Id::build(b"m"), tree, KeyMutationList::default());

        assert_eq!(l1.get_key(&store, &key).unwrap(), Some(value));
        let other = ContentsKey::of(vec!["missing"]).unwrap();
        assert_eq!(l1.get_key(&store, &other).unwrap(), None);
    }

    #[test]
    fn ancestry_walk_is_bounded() {
        let store = MemoryStore::new();
        let mut chain = Vec::new();
        let mut current = L1::empty();
        for i in 0..5 {
            current = current.get_child_with_tree(
                Id::build(format!("m{}", i).as_bytes()),
                current.tree.clone(),
                KeyMutationList::default(),
            );
            chain.push(current.id);
        }
        let ids = current.ancestry(&store, 3).unwrap();
        assert_eq!(ids.len(), 3);
        // newest ancestor first
        assert_eq!(ids[0], chain[3]);
        assert_eq!(ids[1], chain[2]);
    }
}
