//! Newtype identifiers. Record paths that juggle an origin id, a sequence
//! number, and a worker thread index in the same function are exactly where a
//! raw `u64`/`usize` gets transposed; these types make that a compile error.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_newtype {
    ($name:ident, $inner:ty) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub $inner);

        impl $name {
            pub fn new(value: $inner) -> Self {
                Self(value)
            }

            pub fn get(self) -> $inner {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$inner> for $name {
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }
    };
}

id_newtype!(QueryId, u64);
id_newtype!(OperatorId, u64);
id_newtype!(OriginId, u64);

/// Stable index into the worker's fixed-size thread pool, `0..num_worker_threads`.
/// Used to index `Vec<T>`-partitioned operator state directly, never hashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerThreadId(pub usize);

impl WorkerThreadId {
    pub fn new(value: usize) -> Self {
        Self(value)
    }

    pub fn get(self) -> usize {
        self.0
    }
}

impl fmt::Display for WorkerThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The address of one point-to-point network channel: a query's operator's
/// partition, further split into sub-partitions for parallel sinks/sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    pub query_id: QueryId,
    pub operator_id: OperatorId,
    pub partition_id: u32,
    pub sub_partition_id: u32,
}

impl PartitionKey {
    pub fn new(query_id: QueryId, operator_id: OperatorId, partition_id: u32, sub_partition_id: u32) -> Self {
        Self {
            query_id,
            operator_id,
            partition_id,
            sub_partition_id,
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.query_id, self.operator_id, self.partition_id, self.sub_partition_id
        )
    }
}
