use crate::error::Result;
use crate::id::Id;
use crate::idmap::IdMap;
use crate::key::ContentsKey;
use crate::l3::L3;
use crate::store::{load_entity, Entity, EntityKind, Store};
use serde::{Deserialize, Serialize};

/// Middle tier of the tree: a fixed-width map of L3 ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L2 {
    pub id: Id,
    pub children: IdMap,
}

impl L2 {
    pub const SIZE: usize = 199;

    pub fn empty() -> L2 {
        L2::build(IdMap::filled(L2::SIZE, L3::empty_id()))
    }

    pub fn empty_id() -> Id {
        L2::empty().id
    }

    fn build(children: IdMap) -> L2 {
        let id = Id::build(&children.canonical_bytes());
        L2 { id, children }
    }

    /// Slot an object key hashes to within this tier.
    pub fn key_position(key: &ContentsKey) -> usize {
        let id = key.id();
        let bytes = id.as_bytes();
        let v = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        v as usize % L2::SIZE
    }

    pub fn child(&self, position: usize) -> Result<Id> {
        self.children.get(position)
    }

    /// Replace one child slot, returning a new L2. An L2 whose slots all
    /// point at the empty L3 hashes back to the canonical empty id.
    pub fn with_child(&self, position: usize, id: Id) -> Result<L2> {
        Ok(L2::build(self.children.with_id(position, id)?))
    }

    /// Resolve an L2 id, short-circuiting the canonical empty tier.
    pub fn load_or_empty(store: &dyn Store, id: Id) -> Result<L2> {
        if id == L2::empty_id() {
            return Ok(L2::empty());
        }
        load_entity(store, id)
    }
}

impl Entity for L2 {
    const KIND: EntityKind = EntityKind::L2;

    fn id(&self) -> Id {
        self.id
    }

    fn compute_id(&self) -> Id {
        Id::build(&self.children.canonical_bytes())
    }
}
