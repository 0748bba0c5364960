use crate::error::{Result, StrataError};
use crate::id::Id;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered list of string segments identifying a catalog object.
///
/// Segments may not contain the NUL byte; that byte is reserved by the
/// path-string encoding, which joins segments with `.` and escapes a
/// literal `.` inside a segment as NUL.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct ContentsKey {
    elements: Vec<String>,
}

impl ContentsKey {
    pub fn of<S: Into<String>>(elements: Vec<S>) -> Result<ContentsKey> {
        let elements: Vec<String> = elements.into_iter().map(Into::into).collect();
        if elements.is_empty() {
            return Err(StrataError::IllegalArgument(
                "key requires at least one element".into(),
            ));
        }
        for e in &elements {
            if e.contains('\u{0000}') {
                return Err(StrataError::IllegalArgument(
                    "key element must not contain the NUL byte".into(),
                ));
            }
        }
        Ok(ContentsKey { elements })
    }

    pub fn elements(&self) -> &[String] {
        &self.elements
    }

    /// URL path form: segments joined by `.`, a literal `.` inside a
    /// segment written as NUL.
    pub fn to_path_string(&self) -> String {
        self.elements
            .iter()
            .map(|e| e.replace('.', "\u{0000}"))
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Exact inverse of [`ContentsKey::to_path_string`].
    pub fn from_path_string(path: &str) -> Result<ContentsKey> {
        ContentsKey::of(
            path.split('.')
                .map(|e| e.replace('\u{0000}', "."))
                .collect::<Vec<_>>(),
        )
    }

    /// Content hash of the key, used for slot placement in the tree tiers.
    pub fn id(&self) -> Id {
        Id::build(&self.canonical_bytes())
    }

    /// NUL-joined segments; injective because segments cannot contain NUL.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for (i, e) in self.elements.iter().enumerate() {
            if i > 0 {
                buf.push(0);
            }
            buf.extend_from_slice(e.as_bytes());
        }
        buf
    }
}

impl TryFrom<Vec<String>> for ContentsKey {
    type Error = StrataError;

    fn try_from(elements: Vec<String>) -> Result<ContentsKey> {
        ContentsKey::of(elements)
    }
}

impl From<ContentsKey> for Vec<String> {
    fn from(key: ContentsKey) -> Vec<String> {
        key.elements
    }
}

impl fmt::Display for ContentsKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.elements.join("."))
    }
}

/// A single key-level change recorded by a commit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum KeyMutation {
    Addition(ContentsKey),
    Removal(ContentsKey),
}

impl KeyMutation {
    pub fn key(&self) -> &ContentsKey {
        match self {
            KeyMutation::Addition(k) | KeyMutation::Removal(k) => k,
        }
    }

    fn tag(&self) -> u8 {
        match self {
            KeyMutation::Addition(_) => 0,
            KeyMutation::Removal(_) => 1,
        }
    }
}

/// Set-like list of key mutations. Equality ignores order; the canonical
/// encoding sorts by (kind, key) so hashing stays deterministic.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyMutationList {
    mutations: Vec<KeyMutation>,
}

impl KeyMutationList {
    pub fn new(mutations: Vec<KeyMutation>) -> KeyMutationList {
        KeyMutationList { mutations }
    }

    pub fn push(&mut self, mutation: KeyMutation) {
        self.mutations.push(mutation);
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyMutation> {
        self.mutations.iter()
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    fn sorted(&self) -> Vec<KeyMutation> {
        let mut v = self.mutations.clone();
        v.sort();
        v
    }

    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        for m in self.sorted() {
            let key = m.key().canonical_bytes();
            buf.push(m.tag());
            buf.extend_from_slice(&(key.len() as u32).to_be_bytes());
            buf.extend_from_slice(&key);
        }
        buf
    }
}

impl PartialEq for KeyMutationList {
    fn eq(&self, other: &Self) -> bool {
        self.sorted() == other.sorted()
    }
}

impl Eq for KeyMutationList {}

impl FromIterator<KeyMutation> for KeyMutationList {
    fn from_iter<I: IntoIterator<Item = KeyMutation>>(iter: I) -> Self {
        KeyMutationList {
            mutations: iter.into_iter().collect(),
        }
    }
}
