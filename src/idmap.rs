use crate::error::{Result, StrataError};
use crate::id::{Id, ID_LEN};
use serde::{Deserialize, Serialize};

/// Dense fixed-width map from slot index to child id.
///
/// The width is chosen at construction and never changes; `with_id`
/// produces a new map (copy-on-write semantics).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdMap {
    ids: Vec<Id>,
}

impl IdMap {
    /// A map of the given width with every slot set to `id`.
    pub fn filled(size: usize, id: Id) -> IdMap {
        IdMap {
            ids: vec![id; size],
        }
    }

    pub fn size(&self) -> usize {
        self.ids.len()
    }

    pub fn get(&self, position: usize) -> Result<Id> {
        self.ids.get(position).copied().ok_or_else(|| {
            StrataError::IllegalArgument(format!(
                "position {} out of range for map of {} slots",
                position,
                self.ids.len()
            ))
        })
    }

    /// Replace one slot, returning a new map. The original is untouched.
    pub fn with_id(&self, position: usize, id: Id) -> Result<IdMap> {
        if position >= self.ids.len() {
            return Err(StrataError::IllegalArgument(format!(
                "position {} out of range for map of {} slots",
                position,
                self.ids.len()
            )));
        }
        let mut ids = self.ids.clone();
        ids[position] = id;
        Ok(IdMap { ids })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Id> {
        self.ids.iter()
    }

    pub fn ensure_size(&self, expected: usize) -> Result<()> {
        if self.ids.len() != expected {
            return Err(StrataError::Corruption(format!(
                "id map has {} slots, expected {}",
                self.ids.len(),
                expected
            )));
        }
        Ok(())
    }

    /// Order-sensitive byte encoding used when hashing a parent entity.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.ids.len() * ID_LEN);
        for id in &self.ids {
            buf.extend_from_slice(id.as_bytes());
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filled_map_has_fixed_size() {
        let m = IdMap::filled(43, Id::EMPTY);
        assert_eq!(m.size(), 43);
        assert!(m.iter().all(|id| id.is_empty()));
    }

    #[test]
    fn with_id_is_immutable_update() {
        let m1 = IdMap::filled(4, Id::EMPTY);
        let id = Id::build(b"child");
        let m2 = m1.with_id(2, id).unwrap();
        assert_eq!(m1.get(2).unwrap(), Id::EMPTY); // original unchanged
        assert_eq!(m2.get(2).unwrap(), id);
        assert_eq!(m2.size(), 4);
    }

    #[test]
    fn out_of_range_rejected() {
        let m = IdMap::filled(4, Id::EMPTY);
        assert!(m.get(4).is_err());
        assert!(m.with_id(4, Id::EMPTY).is_err());
    }

    #[test]
    fn equality_is_element_wise() {
        let a = IdMap::filled(3, Id::EMPTY).with_id(1, Id::build(b"x")).unwrap();
        let b = IdMap::filled(3, Id::EMPTY).with_id(1, Id::build(b"x")).unwrap();
        let c = IdMap::filled(3, Id::EMPTY).with_id(0, Id::build(b"x")).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn canonical_bytes_are_order_sensitive() {
        let a = IdMap::filled(2, Id::EMPTY).with_id(0, Id::build(b"x")).unwrap();
        let b = IdMap::filled(2, Id::EMPTY).with_id(1, Id::build(b"x")).unwrap();
        assert_ne!(a.canonical_bytes(), b.canonical_bytes());
    }

    #[test]
    fn serializes_as_plain_array() {
        let m = IdMap::filled(2, Id::EMPTY);
        let json = serde_json::to_value(&m).unwrap();
        assert!(json.is_array());
        let back: IdMap = serde_json::from_value(json).unwrap();
        assert_eq!(back, m);
    }
}
