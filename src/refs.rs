use crate::branch::InternalBranch;
use crate::error::{Result, StrataError};
use crate::expression::{ConditionExpression, ExprPath, UpdateExpression};
use crate::id::Id;
use crate::store::{Entity, EntityKind, Store};
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// A named, movable pointer into the commit graph.
///
/// Stored without an explicit tag: a branch document carries an intention
/// log, a tag document only a commit id, so the variant falls out of the
/// attributes present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Ref {
    Branch(InternalBranch),
    Tag(InternalTag),
}

impl Ref {
    pub fn name(&self) -> &str {
        match self {
            Ref::Branch(b) => &b.name,
            Ref::Tag(t) => &t.name,
        }
    }
}

impl Entity for Ref {
    const KIND: EntityKind = EntityKind::Ref;

    fn id(&self) -> Id {
        match self {
            Ref::Branch(b) => b.id,
            Ref::Tag(t) => t.id,
        }
    }

    fn compute_id(&self) -> Id {
        Id::build(self.name().as_bytes())
    }
}

/// A named, immutable-by-convention pointer to a single commit. Unlike a
/// branch it carries no intention log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InternalTag {
    pub id: Id,
    pub name: String,
    /// The L1 this tag points to.
    pub commit: Id,
    pub dt: i64,
}

impl InternalTag {
    pub fn new(name: impl Into<String>, commit: Id) -> InternalTag {
        let name = name.into();
        InternalTag {
            id: Id::build(name.as_bytes()),
            name,
            commit,
            dt: Utc::now().timestamp_millis(),
        }
    }

    /// Persist a new tag. An existing ref of the same name is an error.
    pub fn create(store: &dyn Store, name: &str, commit: Id) -> Result<InternalTag> {
        let tag = InternalTag::new(name, commit);
        if !store.put_if_absent(EntityKind::Ref, tag.id, serde_json::to_value(&tag)?)? {
            return Err(StrataError::ReferenceAlreadyExists(name.to_string()));
        }
        Ok(tag)
    }

    /// Point the tag at another commit, conditional on its current
    /// target. Returns the updated tag, or None when the target moved.
    pub fn retarget(
        &self,
        store: &dyn Store,
        commit: Id,
    ) -> Result<Option<InternalTag>> {
        let update = UpdateExpression::new()
            .set(ExprPath::field("commit"), serde_json::to_value(commit)?)
            .set(
                ExprPath::field("dt"),
                serde_json::to_value(Utc::now().timestamp_millis())?,
            );
        let condition = ConditionExpression::equals(
            ExprPath::field("commit"),
            serde_json::to_value(self.commit)?,
        );
        match store.update(EntityKind::Ref, self.id, &update, Some(&condition))? {
            Some(document) => Ok(Some(serde_json::from_value(document)?)),
            None => Ok(None),
        }
    }
}

impl Entity for InternalTag {
    const KIND: EntityKind = EntityKind::Ref;

    fn id(&self) -> Id {
        self.id
    }

    fn compute_id(&self) -> Id {
        Id::build(self.name.as_bytes())
    }
}

/// Load a ref by name, whichever variant it is.
pub fn load_ref(store: &dyn Store, name: &str) -> Result<Ref> {
    let id = Id::build(name.as_bytes());
    let document = store.load(EntityKind::Ref, id).map_err(|e| match e {
        StrataError::NotFound { .. } => StrataError::ReferenceNotFound(name.to_string()),
        other => other,
    })?;
    let r: Ref = serde_json::from_value(document)?;
    r.ensure_consistent_id()?;
    Ok(r)
}

/// Delete a ref by name, optionally conditional on its current state.
pub fn delete_ref(
    store: &dyn Store,
    name: &str,
    condition: Option<&ConditionExpression>,
) -> Result<bool> {
    store.delete(EntityKind::Ref, Id::build(name.as_bytes()), condition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn tag_identity_is_name_hash() {
        let t = InternalTag::new("v1.0", Id::build(b"l1"));
        assert_eq!(t.id, Id::build(b"v1.0"));
        t.ensure_consistent_id().unwrap();
    }

    #[test]
    fn create_and_load_round_trip() {
        let store = MemoryStore::new();
        let tag = InternalTag::create(&store, "v1.0", Id::build(b"l1")).unwrap();
        match load_ref(&store, "v1.0").unwrap() {
            Ref::Tag(loaded) => assert_eq!(loaded, tag),
            Ref::Branch(_) => panic!("tag loaded as branch"),
        }
    }

    #[test]
    fn duplicate_name_rejected() {
        let store = MemoryStore::new();
        InternalTag::create(&store, "v1.0", Id::build(b"a")).unwrap();
        let err = InternalTag::create(&store, "v1.0", Id::build(b"b")).unwrap_err();
        assert!(matches!(err, StrataError::ReferenceAlreadyExists(_)));
    }

    #[test]
    fn missing_ref_not_found() {
        let store = MemoryStore::new();
        let err = load_ref(&store, "nope").unwrap_err();
        assert!(matches!(err, StrataError::ReferenceNotFound(_)));
    }

    #[test]
    fn retarget_is_conditional() {
        let store = MemoryStore::new();
        let tag = InternalTag::create(&store, "v1.0", Id::build(b"a")).unwrap();

        let moved = tag.retarget(&store, Id::build(b"b")).unwrap().unwrap();
        assert_eq!(moved.commit, Id::build(b"b"));

        // the original handle now holds a stale target
        assert!(tag.retarget(&store, Id::build(b"c")).unwrap().is_none());
    }

    #[test]
    fn delete_ref_by_name() {
        let store = MemoryStore::new();
        InternalTag::create(&store, "v1.0", Id::build(b"a")).unwrap();
        assert!(delete_ref(&store, "v1.0", None).unwrap());
        assert!(!delete_ref(&store, "v1.0", None).unwrap());
    }
}
