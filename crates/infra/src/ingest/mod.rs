//! Log ingestion front door: buffer, then partition into jobs.

pub mod buffer;
pub mod partitioner;

pub use buffer::{
    BufferError, FlushReason, FlushSink, InMemoryFlushSink, LogBuffer, LogBufferConfig,
    LogBufferHandle, normalize_entry,
};
pub use partitioner::{
    BatchPartitioner, DEFAULT_SERVICE, PartitionReport, SubBatch, partition_entries, service_of,
};
