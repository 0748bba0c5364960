use crate::commit::CommitIntent;
use crate::config::StoreConfig;
use crate::error::{Result, StrataError};
use crate::executor::{Executor, TaskHandle};
use crate::expression::{ConditionExpression, ExprPath, UpdateExpression};
use crate::id::Id;
use crate::idmap::IdMap;
use crate::key::KeyMutationList;
use crate::l1::L1;
use crate::refs::{load_ref, Ref};
use crate::store::{load_entity, Entity, EntityKind, SaveOp, Store};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A single slot change in the branch frontier, applied and reversed
/// point-wise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsavedDelta {
    pub position: usize,
    pub old_id: Id,
    pub new_id: Id,
}

impl UnsavedDelta {
    pub fn apply(&self, tree: &IdMap) -> Result<IdMap> {
        let current = tree.get(self.position)?;
        if current != self.old_id {
            return Err(StrataError::Corruption(format!(
                "slot {} holds {}, cannot apply delta expecting {}",
                self.position, current, self.old_id
            )));
        }
        tree.with_id(self.position, self.new_id)
    }

    pub fn reverse(&self, tree: &IdMap) -> Result<IdMap> {
        let current = tree.get(self.position)?;
        if current != self.new_id {
            return Err(StrataError::Corruption(format!(
                "slot {} holds {}, cannot reverse delta producing {}",
                self.position, current, self.new_id
            )));
        }
        tree.with_id(self.position, self.old_id)
    }
}

/// One entry of a branch's commit log.
///
/// Stored without an explicit tag: a pending entry carries deltas and key
/// mutations, a persisted one a parent pointer, so the variant falls out
/// of the attributes present. The collapse update turns one into the
/// other in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommitEntry {
    /// Refers to a persisted L1 whose id equals `id`.
    Saved { id: Id, commit: Id, parent: Id },
    /// A pending intention; `id` is a random placeholder.
    Unsaved {
        id: Id,
        commit: Id,
        deltas: Vec<UnsavedDelta>,
        keys: KeyMutationList,
    },
}

impl CommitEntry {
    pub fn id(&self) -> Id {
        match self {
            CommitEntry::Saved { id, .. } | CommitEntry::Unsaved { id, .. } => *id,
        }
    }

    pub fn is_saved(&self) -> bool {
        matches!(self, CommitEntry::Saved { .. })
    }
}

/// The mutable branch record: a saved anchor plus a short log of pending
/// commit intentions. Everything else in the graph is write-once; this
/// record only ever changes through conditional updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternalBranch {
    /// Hash of `name`; branch identity is derived from the name.
    pub id: Id,
    pub name: String,
    /// The frontier after all pending deltas are applied.
    pub tree: IdMap,
    pub metadata: Id,
    pub commits: Vec<CommitEntry>,
    pub dt: i64,
}

impl InternalBranch {
    /// Persist a new branch, anchored at `target` or at the canonical
    /// empty L1.
    pub fn create(store: &dyn Store, name: &str, target: Option<&L1>) -> Result<InternalBranch> {
        let (tree, metadata, entry) = match target {
            Some(l1) => (
                l1.tree.clone(),
                l1.metadata,
                CommitEntry::Saved {
                    id: l1.id,
                    commit: l1.metadata,
                    parent: l1.parent,
                },
            ),
            None => (
                L1::empty().tree.clone(),
                Id::EMPTY,
                CommitEntry::Saved {
                    id: Id::EMPTY,
                    commit: Id::EMPTY,
                    parent: Id::EMPTY,
                },
            ),
        };
        let branch = InternalBranch {
            id: Id::build(name.as_bytes()),
            name: name.to_string(),
            tree,
            metadata,
            commits: vec![entry],
            dt: Utc::now().timestamp_millis(),
        };
        if !store.put_if_absent(EntityKind::Ref, branch.id, serde_json::to_value(&branch)?)? {
            return Err(StrataError::ReferenceAlreadyExists(name.to_string()));
        }
        Ok(branch)
    }

    /// Load a branch by name; a tag of the same name is not a branch.
    pub fn load(store: &dyn Store, name: &str) -> Result<InternalBranch> {
        match load_ref(store, name)? {
            Ref::Branch(branch) => Ok(branch),
            Ref::Tag(_) => Err(StrataError::ReferenceNotFound(name.to_string())),
        }
    }

    /// The most recent persisted anchor, reachable without replaying the
    /// pending suffix. Garbage collection keys off this.
    pub fn last_defined_parent(&self) -> Id {
        self.commits
            .iter()
            .rev()
            .find_map(|entry| match entry {
                CommitEntry::Saved { id, .. } => Some(*id),
                CommitEntry::Unsaved { .. } => None,
            })
            .unwrap_or(Id::EMPTY)
    }

    /// Stage one commit as a pending intention on this branch.
    ///
    /// The tier and value entities are persisted eagerly; only the
    /// derived L1 is deferred to the collapse. The conditional append
    /// pins every touched frontier slot, so writers on disjoint slots
    /// interleave freely and a same-slot race loses deterministically
    /// and rebases on reload.
    pub fn commit(
        &self,
        store: &dyn Store,
        intent: &CommitIntent,
        config: &StoreConfig,
    ) -> Result<InternalBranch> {
        let mut branch = self.clone();
        for _ in 0..config.p2_commit_attempts {
            let state = UpdateState::compute(branch, store)?;
            let prepared = intent.prepare(store, state.final_l1())?;
            store.save(&prepared.saves)?;

            let entry = CommitEntry::Unsaved {
                id: Id::random(),
                commit: prepared.meta_id,
                deltas: prepared.deltas.clone(),
                keys: prepared.key_mutations.clone(),
            };
            let mut update = UpdateExpression::new()
                .append(ExprPath::field("commits"), serde_json::to_value(&entry)?)
                .set(
                    ExprPath::field("dt"),
                    serde_json::to_value(Utc::now().timestamp_millis())?,
                );
            let mut condition: Option<ConditionExpression> = None;
            for delta in &prepared.deltas {
                update = update.set(
                    ExprPath::field("tree").index(delta.position),
                    serde_json::to_value(delta.new_id)?,
                );
                let clause = ExprPath::field("tree").index(delta.position);
                let expected = serde_json::to_value(delta.old_id)?;
                condition = Some(match condition {
                    None => ConditionExpression::equals(clause, expected),
                    Some(c) => c.and_equals(clause, expected),
                });
            }

            match store.update(EntityKind::Ref, self.id, &update, condition.as_ref())? {
                Some(document) => return Ok(serde_json::from_value(document)?),
                None => branch = InternalBranch::load(store, &self.name)?,
            }
        }
        Err(StrataError::ReferenceConflict {
            name: self.name.clone(),
            attempts: config.p2_commit_attempts,
        })
    }
}

impl Entity for InternalBranch {
    const KIND: EntityKind = EntityKind::Ref;

    fn id(&self) -> Id {
        self.id
    }

    fn compute_id(&self) -> Id {
        Id::build(self.name.as_bytes())
    }
}

#[derive(Debug, Clone)]
struct PendingDelete {
    position: usize,
    expected: Id,
}

/// The plan for driving a loaded branch record back to a single saved
/// anchor: which L1s to persist, which log positions to drop, and how to
/// rewrite the tail.
#[derive(Debug)]
pub struct UpdateState {
    branch: InternalBranch,
    saves: Vec<L1>,
    deletes: Vec<PendingDelete>,
    final_l1: L1,
    final_position: usize,
    final_expected: Id,
    saved: Mutex<bool>,
}

impl UpdateState {
    /// Rewind the pending suffix off the recorded frontier, verify it
    /// lands exactly on the saved anchor, then replay it forward deriving
    /// one L1 per pending entry. Either verification failing means the
    /// record or the graph is corrupt.
    pub fn compute(branch: InternalBranch, store: &dyn Store) -> Result<UpdateState> {
        branch.ensure_consistent_id()?;
        branch.tree.ensure_size(L1::SIZE)?;
        if branch.commits.is_empty() {
            return Err(StrataError::Corruption(format!(
                "branch '{}' has an empty commit log",
                branch.name
            )));
        }

        let mut unsaved_start = None;
        for (position, entry) in branch.commits.iter().enumerate() {
            match entry {
                CommitEntry::Saved { .. } if unsaved_start.is_some() => {
                    return Err(StrataError::Corruption(format!(
                        "branch '{}' has a saved entry after pending entries",
                        branch.name
                    )));
                }
                CommitEntry::Unsaved { .. } if unsaved_start.is_none() => {
                    unsaved_start = Some(position);
                }
                _ => {}
            }
        }
        let unsaved_start = unsaved_start.unwrap_or(branch.commits.len());
        if unsaved_start == 0 {
            return Err(StrataError::Corruption(format!(
                "branch '{}' has no saved anchor",
                branch.name
            )));
        }

        let anchor_id = branch.commits[unsaved_start - 1].id();
        let anchor = if anchor_id.is_empty() {
            L1::empty()
        } else {
            load_entity::<L1>(store, anchor_id)?
        };

        // rewind the suffix off the recorded frontier
        let mut tree = branch.tree.clone();
        for entry in branch.commits[unsaved_start..].iter().rev() {
            if let CommitEntry::Unsaved { deltas, .. } = entry {
                for delta in deltas.iter().rev() {
                    tree = delta.reverse(&tree)?;
                }
            }
        }
        if tree != anchor.tree {
            return Err(StrataError::Corruption(format!(
                "rewound frontier of '{}' diverges from saved anchor {}",
                branch.name, anchor_id
            )));
        }

        // replay forward, deriving the missing L1s
        let mut saves = Vec::new();
        let mut unsaved_map: HashMap<Id, L1> = HashMap::new();
        let mut last = anchor;
        let mut final_position = branch.commits.len() - 1;
        for (offset, entry) in branch.commits[unsaved_start..].iter().enumerate() {
            if let CommitEntry::Unsaved {
                commit,
                deltas,
                keys,
                ..
            } = entry
            {
                for delta in deltas {
                    tree = delta.apply(&tree)?;
                }
                let l1 = last
                    .get_child_with_tree(*commit, tree.clone(), keys.clone())
                    .with_checkpoint_as_necessary(store, &unsaved_map)?;
                unsaved_map.insert(l1.id, l1.clone());
                saves.push(l1.clone());
                last = l1;
                final_position = unsaved_start + offset;
            }
        }
        if tree != branch.tree {
            return Err(StrataError::Corruption(format!(
                "replayed frontier of '{}' diverges from the branch record",
                branch.name
            )));
        }

        let deletes: Vec<PendingDelete> = branch.commits[..branch.commits.len() - 1]
            .iter()
            .enumerate()
            .map(|(position, entry)| PendingDelete {
                position,
                expected: entry.id(),
            })
            .collect();
        if final_position == 0 && !deletes.is_empty() {
            return Err(StrataError::Corruption(format!(
                "branch '{}' schedules deletes but its tail sits at position 0",
                branch.name
            )));
        }

        let final_expected = branch.commits[branch.commits.len() - 1].id();
        Ok(UpdateState {
            branch,
            saves,
            deletes,
            final_l1: last,
            final_position,
            final_expected,
            saved: Mutex::new(false),
        })
    }

    /// The logical head of the branch, whether or not it is persisted yet.
    pub fn final_l1(&self) -> &L1 {
        &self.final_l1
    }

    pub fn branch(&self) -> &InternalBranch {
        &self.branch
    }

    pub fn num_saves(&self) -> usize {
        self.saves.len()
    }

    pub fn num_deletes(&self) -> usize {
        self.deletes.len()
    }

    fn is_clean(&self) -> bool {
        self.saves.is_empty()
            && self.deletes.is_empty()
            && self.branch.commits.last().map(CommitEntry::is_saved) == Some(true)
    }

    /// Persist the derived L1s. Idempotent: concurrent and repeated calls
    /// reach the store at most once.
    pub fn save(&self, store: &dyn Store) -> Result<()> {
        let mut saved = self.saved.lock().unwrap();
        if *saved {
            return Ok(());
        }
        if !self.saves.is_empty() {
            let ops = self
                .saves
                .iter()
                .map(SaveOp::of)
                .collect::<Result<Vec<_>>>()?;
            store.save(&ops)?;
        }
        *saved = true;
        Ok(())
    }

    /// Make the logical head readable: persist the derived L1s, then
    /// schedule the collapse of the intention log on `executor`. With
    /// `wait_on_collapse` the call blocks on the collapse and surfaces
    /// its failure; otherwise the returned handle can be joined or
    /// dropped. A dropped collapse still runs to completion, and a later
    /// writer will drive any collapse that never finished.
    pub fn ensure_available(
        self: &Arc<Self>,
        store: &Arc<dyn Store>,
        executor: &dyn Executor,
        config: &StoreConfig,
    ) -> Result<Option<TaskHandle>> {
        if self.saves.is_empty() {
            // the head L1 is already persisted and reachable
            return Ok(None);
        }
        self.save(store.as_ref())?;

        let state = Arc::clone(self);
        let store = Arc::clone(store);
        let config_for_task = config.clone();
        let handle = executor.spawn(Box::new(move || {
            state
                .collapse_intention_log(store.as_ref(), &config_for_task)
                .map(|_| ())
        }));
        if config.wait_on_collapse {
            handle.join()?;
            return Ok(None);
        }
        Ok(Some(handle))
    }

    /// Drive the branch record to a single saved entry with a bounded
    /// number of optimistic attempts.
    ///
    /// Each attempt pins every log position it removes to the exact id
    /// seen there, and the tail to its placeholder; a racing writer who
    /// restaged the tail cannot share the placeholder, so the condition
    /// fails deterministically and the attempt reloads and recomputes.
    pub fn collapse_intention_log(
        self: &Arc<Self>,
        store: &dyn Store,
        config: &StoreConfig,
    ) -> Result<InternalBranch> {
        let span = config.enable_tracing.then(|| {
            tracing::info_span!(
                "collapse_intention_log",
                operation = "collapse",
                branch = %self.branch.name,
                num_saves = self.saves.len(),
                num_deletes = self.deletes.len(),
                completed = tracing::field::Empty,
            )
        });
        let _guard = span.as_ref().map(|s| s.enter());

        let mut current = Arc::clone(self);
        for attempt in 1..=config.p2_commit_attempts {
            let attempt_span = config.enable_tracing.then(|| {
                tracing::debug_span!(
                    "attempt",
                    n = attempt,
                    num_saves = current.saves.len(),
                    num_deletes = current.deletes.len(),
                )
            });
            let _attempt_guard = attempt_span.as_ref().map(|s| s.enter());

            if current.is_clean() {
                if let Some(s) = &span {
                    s.record("completed", true);
                }
                return Ok(current.branch.clone());
            }

            current.save(store)?;
            let (update, condition) = current.collapse_expressions()?;
            let updated = match store.update(
                EntityKind::Ref,
                current.branch.id,
                &update,
                Some(&condition),
            ) {
                Ok(result) => result,
                Err(StrataError::NotFound { .. }) => {
                    return Err(StrataError::ReferenceNotFound(self.branch.name.clone()))
                }
                Err(other) => return Err(other),
            };
            match updated {
                Some(document) => {
                    let next: InternalBranch = serde_json::from_value(document)?;
                    if let Some(s) = &span {
                        s.record("completed", true);
                    }
                    return Ok(next);
                }
                None => {
                    let document =
                        store
                            .load(EntityKind::Ref, current.branch.id)
                            .map_err(|e| match e {
                                StrataError::NotFound { .. } => {
                                    StrataError::ReferenceNotFound(self.branch.name.clone())
                                }
                                other => other,
                            })?;
                    match serde_json::from_value::<Ref>(document)? {
                        Ref::Branch(branch) => {
                            current = Arc::new(UpdateState::compute(branch, store)?);
                        }
                        Ref::Tag(_) => {
                            return Err(StrataError::ReferenceNotFound(
                                self.branch.name.clone(),
                            ))
                        }
                    }
                }
            }
        }
        if let Some(s) = &span {
            s.record("completed", false);
        }
        Err(StrataError::ReferenceConflict {
            name: self.branch.name.clone(),
            attempts: config.p2_commit_attempts,
        })
    }

    fn collapse_expressions(&self) -> Result<(UpdateExpression, ConditionExpression)> {
        fn entry(position: usize) -> ExprPath {
            ExprPath::field("commits").index(position)
        }

        let mut condition = ConditionExpression::equals(
            entry(self.final_position).dot("id"),
            serde_json::to_value(self.final_expected)?,
        );
        let mut update = UpdateExpression::new();
        for delete in &self.deletes {
            condition = condition.and_equals(
                entry(delete.position).dot("id"),
                serde_json::to_value(delete.expected)?,
            );
            update = update.remove(entry(delete.position));
        }
        update = update
            .remove(entry(self.final_position).dot("deltas"))
            .remove(entry(self.final_position).dot("keys"))
            .set(
                entry(self.final_position).dot("parent"),
                serde_json::to_value(self.final_l1.parent)?,
            )
            .set(
                entry(self.final_position).dot("id"),
                serde_json::to_value(self.final_l1.id)?,
            );
        Ok((update, condition))
    }
}
