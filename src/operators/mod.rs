//! Aggregation Operator Handler and Nested-Loop Join Handler: the two
//! concrete record-path operators built on the slicing store.

pub mod aggregation;
pub mod join;
