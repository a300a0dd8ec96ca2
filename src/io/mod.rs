//! Source and Sink Drivers (component I): the ingress loop that fills
//! buffers from a format parser and the egress loop that writes them out.

pub mod sink;
pub mod source;

pub use sink::{SinkDriver, SinkHandle, SinkWriter};
pub use source::{RecordParser, SourceDriver};
