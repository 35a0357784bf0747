//! # Batch Processing
//!
//! Paginated iteration over scans and queries, and the sinks that consume the
//! resulting batches.

pub mod iterator;
pub mod writer;

pub use iterator::{
    Batch, BatchCursor, BatchIterator, BatchSink, BatchTotals, DecodeFailure, DecodePolicy,
    DecodedItem,
};
pub use writer::BatchFileWriter;
