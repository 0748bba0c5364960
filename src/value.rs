use crate::id::Id;
use crate::store::{Entity, EntityKind};
use serde::{Deserialize, Serialize};

/// Opaque catalog payload. The store never parses these; it only hashes
/// and persists them verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    Iceberg {
        metadata_location: String,
    },
    HiveTable {
        table: Vec<u8>,
        partitions: Vec<Vec<u8>>,
    },
    HiveDatabase {
        database: Vec<u8>,
    },
    SqlView {
        sql: String,
        dialect: String,
    },
    DeltaLake {
        last_checkpoint: String,
        checkpoint_location_history: Vec<String>,
        metadata_location_history: Vec<String>,
    },
}

/// A leaf of the entity graph: one payload under its content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Value {
    pub id: Id,
    pub payload: Payload,
}

impl Value {
    pub fn new(payload: Payload) -> Value {
        let id = Id::build(&canonical_bytes(&payload));
        Value { id, payload }
    }
}

impl Entity for Value {
    const KIND: EntityKind = EntityKind::Value;

    fn id(&self) -> Id {
        self.id
    }

    fn compute_id(&self) -> Id {
        Id::build(&canonical_bytes(&self.payload))
    }
}

fn canonical_bytes(payload: &Payload) -> Vec<u8> {
    let mut buf = Vec::new();
    match payload {
        Payload::Iceberg { metadata_location } => {
            put(&mut buf, b"iceberg");
            put(&mut buf, metadata_location.as_bytes());
        }
        Payload::HiveTable { table, partitions } => {
            put(&mut buf, b"hive-table");
            put(&mut buf, table);
            for p in partitions {
                put(&mut buf, p);
            }
        }
        Payload::HiveDatabase { database } => {
            put(&mut buf, b"hive-database");
            put(&mut buf, database);
        }
        Payload::SqlView { sql, dialect } => {
            put(&mut buf, b"sql-view");
            put(&mut buf, sql.as_bytes());
            put(&mut buf, dialect.as_bytes());
        }
        Payload::DeltaLake {
            last_checkpoint,
            checkpoint_location_history,
            metadata_location_history,
        } => {
            put(&mut buf, b"delta-lake");
            put(&mut buf, last_checkpoint.as_bytes());
            marker(&mut buf);
            for c in checkpoint_location_history {
                put(&mut buf, c.as_bytes());
            }
            marker(&mut buf);
            for m in metadata_location_history {
                put(&mut buf, m.as_bytes());
            }
        }
    }
    buf
}

fn put(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    buf.extend_from_slice(bytes);
}

// Separates the two history lists; u32::MAX can never be a real length
// prefix of the payloads this store accepts.
fn marker(buf: &mut Vec<u8>) {
    buf.extend_from_slice(&u32::MAX.to_be_bytes());
}
