//! Offset Hash Map: the aggregation state container.

mod offset_map;

pub use offset_map::OffsetHashMap;
