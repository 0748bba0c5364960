use crate::branch::UnsavedDelta;
use crate::error::{Result, StrataError};
use crate::id::Id;
use crate::key::{ContentsKey, KeyMutation, KeyMutationList};
use crate::l1::L1;
use crate::l2::L2;
use crate::l3::L3;
use crate::store::{Entity, EntityKind, SaveOp, Store};
use crate::value::Value;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Commit metadata: who committed what, when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMeta {
    /// Unique hash of this record (covers all fields).
    pub id: Id,
    pub committer: String,
    pub author: String,
    pub email: String,
    pub message: String,
    /// Milliseconds since epoch.
    pub commit_time: i64,
    pub properties: BTreeMap<String, String>,
}

impl CommitMeta {
    /// Create commit metadata stamped with the current time.
    pub fn new(
        committer: impl Into<String>,
        author: impl Into<String>,
        email: impl Into<String>,
        message: impl Into<String>,
        properties: BTreeMap<String, String>,
    ) -> CommitMeta {
        CommitMeta::with_time(
            committer,
            author,
            email,
            message,
            properties,
            Utc::now().timestamp_millis(),
        )
    }

    /// Create commit metadata with an explicit timestamp (for testing /
    /// determinism).
    pub fn with_time(
        committer: impl Into<String>,
        author: impl Into<String>,
        email: impl Into<String>,
        message: impl Into<String>,
        properties: BTreeMap<String, String>,
        commit_time: i64,
    ) -> CommitMeta {
        let committer = committer.into();
        let author = author.into();
        let email = email.into();
        let message = message.into();
        let id = compute_id(&committer, &author, &email, &message, commit_time, &properties);
        CommitMeta {
            id,
            committer,
            author,
            email,
            message,
            commit_time,
            properties,
        }
    }
}

impl Entity for CommitMeta {
    const KIND: EntityKind = EntityKind::CommitMeta;

    fn id(&self) -> Id {
        self.id
    }

    fn compute_id(&self) -> Id {
        compute_id(
            &self.committer,
            &self.author,
            &self.email,
            &self.message,
            self.commit_time,
            &self.properties,
        )
    }
}

fn compute_id(
    committer: &str,
    author: &str,
    email: &str,
    message: &str,
    commit_time: i64,
    properties: &BTreeMap<String, String>,
) -> Id {
    let mut payload = format!(
        "committer:{}\nauthor:{}\nemail:{}\ntime:{}\nmsg:{}",
        committer, author, email, commit_time, message,
    );
    for (k, v) in properties {
        payload.push_str(&format!("\nprop:{}={}", k, v));
    }
    Id::build(payload.as_bytes())
}

/// One key-level operation of a proposed commit.
#[derive(Debug, Clone)]
pub enum CommitOp {
    Put { key: ContentsKey, value: Value },
    Delete { key: ContentsKey },
}

impl CommitOp {
    fn key(&self) -> &ContentsKey {
        match self {
            CommitOp::Put { key, .. } | CommitOp::Delete { key } => key,
        }
    }
}

/// A proposed commit: metadata plus the key operations to apply.
#[derive(Debug, Clone)]
pub struct CommitIntent {
    pub meta: CommitMeta,
    pub ops: Vec<CommitOp>,
}

/// Everything derived from an intent against a concrete head: the slot
/// deltas for the branch frontier, the key mutations, and the save batch
/// for the new L2/L3 tiers, values and metadata.
#[derive(Debug, Clone)]
pub struct PreparedCommit {
    pub deltas: Vec<UnsavedDelta>,
    pub key_mutations: KeyMutationList,
    pub saves: Vec<SaveOp>,
    pub meta_id: Id,
}

impl CommitIntent {
    pub fn new(meta: CommitMeta, ops: Vec<CommitOp>) -> CommitIntent {
        CommitIntent { meta, ops }
    }

    /// Derive the new tree tiers for this intent against `head`.
    ///
    /// Later operations on the same key win. Deleting the last entry of a
    /// tier collapses its id back toward the canonical empty chain.
    pub fn prepare(&self, store: &dyn Store, head: &L1) -> Result<PreparedCommit> {
        if self.ops.is_empty() {
            return Err(StrataError::IllegalArgument(
                "commit requires at least one operation".into(),
            ));
        }

        let mut by_l1: BTreeMap<usize, BTreeMap<usize, Vec<&CommitOp>>> = BTreeMap::new();
        for op in &self.ops {
            by_l1
                .entry(L1::key_position(op.key()))
                .or_default()
                .entry(L2::key_position(op.key()))
                .or_default()
                .push(op);
        }

        let mut saves = Vec::new();
        let mut deltas = Vec::new();
        let mut key_mutations = KeyMutationList::default();

        for (l1_position, by_l2) in by_l1 {
            let old_l2_id = head.tree.get(l1_position)?;
            let mut l2 = L2::load_or_empty(store, old_l2_id)?;

            for (l2_position, ops) in by_l2 {
                let mut l3 = L3::load_or_empty(store, l2.child(l2_position)?)?;
                for op in ops {
                    match op {
                        CommitOp::Put { key, value } => {
                            value.ensure_consistent_id()?;
                            saves.push(SaveOp::of(value)?);
                            l3 = l3.with_entry(key.clone(), value.id);
                            key_mutations.push(KeyMutation::Addition(key.clone()));
                        }
                        CommitOp::Delete { key } => {
                            l3 = l3.without(key);
                            key_mutations.push(KeyMutation::Removal(key.clone()));
                        }
                    }
                }
                saves.push(SaveOp::of(&l3)?);
                l2 = l2.with_child(l2_position, l3.id)?;
            }

            saves.push(SaveOp::of(&l2)?);
            deltas.push(UnsavedDelta {
                position: l1_position,
                old_id: old_l2_id,
                new_id: l2.id,
            });
        }

        saves.push(SaveOp::of(&self.meta)?);
        Ok(PreparedCommit {
            deltas,
            key_mutations,
            saves,
            meta_id: self.meta.id,
        })
    }
}
