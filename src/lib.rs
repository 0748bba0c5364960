//! Tiered, content-addressed version store with git-like branching for
//! catalog metadata.
//!
//! The entity graph (commits, tree tiers, values) is write-once and
//! addressed by content hash. Only branch and tag records move, and they
//! move exclusively through optimistic conditional updates: writers stage
//! commits as pending intentions on the branch record, and a collapse
//! step materialises the derived tree summaries and rewrites the record
//! back to a single saved anchor.

pub mod branch;
pub mod commit;
pub mod config;
pub mod error;
pub mod executor;
pub mod expression;
pub mod id;
pub mod idmap;
pub mod key;
pub mod l1;
pub mod l2;
pub mod l3;
pub mod refs;
pub mod store;
pub mod value;

pub use branch::{CommitEntry, InternalBranch, UnsavedDelta, UpdateState};
pub use commit::{CommitIntent, CommitMeta, CommitOp};
pub use config::StoreConfig;
pub use error::{Result, StrataError};
pub use executor::{Executor, TaskHandle, ThreadExecutor};
pub use id::Id;
pub use idmap::IdMap;
pub use key::{ContentsKey, KeyMutation, KeyMutationList};
pub use l1::L1;
pub use l2::L2;
pub use l3::L3;
pub use refs::{InternalTag, Ref};
pub use store::{EntityKind, FileStore, MemoryStore, SaveOp, Store};
pub use value::{Payload, Value};
