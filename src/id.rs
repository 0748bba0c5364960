use crate::error::{Result, StrataError};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

/// Width of every content hash in bytes.
pub const ID_LEN: usize = 20;

/// A fixed-width content hash identifying an entity (SHA-256 truncated to
/// 20 bytes). Equality and ordering are bytewise.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Id([u8; ID_LEN]);

impl Id {
    /// The distinguished empty id (all zero bytes).
    pub const EMPTY: Id = Id([0u8; ID_LEN]);

    /// Hash canonical-encoded content into an id.
    pub fn build(data: &[u8]) -> Id {
        let digest = Sha256::digest(data);
        let mut bytes = [0u8; ID_LEN];
        bytes.copy_from_slice(&digest[..ID_LEN]);
        Id(bytes)
    }

    /// A random id, used as the placeholder of a pending commit entry so
    /// a conditional update can detect racing writers.
    pub fn random() -> Id {
        Id::build(Uuid::new_v4().as_bytes())
    }

    pub fn is_empty(&self) -> bool {
        *self == Id::EMPTY
    }

    pub fn as_bytes(&self) -> &[u8; ID_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(ID_LEN * 2);
        for b in &self.0 {
            s.push_str(&format!("{:02x}", b));
        }
        s
    }

    pub fn from_hex(hex: &str) -> Result<Id> {
        if hex.len() != ID_LEN * 2 {
            return Err(StrataError::IllegalArgument(format!(
                "id must be {} hex chars, got {}",
                ID_LEN * 2,
                hex.len()
            )));
        }
        let mut bytes = [0u8; ID_LEN];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let s = std::str::from_utf8(chunk)
                .map_err(|_| StrataError::IllegalArgument("non-ascii id".into()))?;
            bytes[i] = u8::from_str_radix(s, 16)
                .map_err(|_| StrataError::IllegalArgument(format!("bad hex in id: {}", s)))?;
        }
        Ok(Id(bytes))
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.to_hex())
    }
}

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

struct IdVisitor;

impl<'de> Visitor<'de> for IdVisitor {
    type Value = Id;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a {}-char hex string", ID_LEN * 2)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Id, E> {
        Id::from_hex(v).map_err(de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Id, D::Error> {
        deserializer.deserialize_str(IdVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn same_content_same_id() {
        assert_eq!(Id::build(b"hello"), Id::build(b"hello"));
        assert_ne!(Id::build(b"hello"), Id::build(b"world"));
    }

    #[test]
    fn empty_is_all_zero() {
        assert!(Id::EMPTY.is_empty());
        assert_eq!(Id::EMPTY.to_hex(), "0".repeat(ID_LEN * 2));
        assert!(!Id::build(b"").is_empty());
    }

    #[test]
    fn random_ids_differ() {
        assert_ne!(Id::random(), Id::random());
    }

    #[test]
    fn hex_round_trip() {
        let id = Id::build(b"round trip");
        assert_eq!(Id::from_hex(&id.to_hex()).unwrap(), id);
    }

    #[test]
    fn bad_hex_rejected() {
        assert!(Id::from_hex("abc").is_err());
        assert!(Id::from_hex(&"zz".repeat(ID_LEN)).is_err());
    }

    #[test]
    fn ordering_is_bytewise() {
        let a = Id::build(b"a");
        let b = Id::build(b"b");
        assert_eq!(a.cmp(&b), a.as_bytes().cmp(b.as_bytes()));
    }

    #[test]
    fn serde_as_hex_string() {
        let id = Id::build(b"json");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.to_hex()));
        let back: Id = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    proptest! {
        #[test]
        fn build_is_deterministic(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            prop_assert_eq!(Id::build(&data), Id::build(&data));
        }

        #[test]
        fn hex_round_trips_any_id(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            let id = Id::build(&data);
            prop_assert_eq!(Id::from_hex(&id.to_hex()).unwrap(), id);
        }
    }
}
