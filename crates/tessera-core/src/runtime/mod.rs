//! Runtime support objects called from generated code
//!
//! Everything here is native code that compiled queries reach through the
//! proxy layer: per-query state, hash tables and bloom filters for joins and
//! aggregation, per-tuple insert/update/delete helpers bound to the running
//! transaction, index scan buffers, the sort buffer, result consumers, the
//! builtin function library, and the thread pool and latch that parallel
//! pipelines fan out with.

pub mod aggregation;
mod bloom_filter;
mod buffer;
mod consumer;
mod count_down;
mod deleter;
pub mod functions;
pub mod hash;
mod hash_table;
mod index_scan_iterator;
mod inserter;
mod selection_vector;
mod sorter;
mod state;
mod task_info;
mod thread_pool;
mod updater;

pub use aggregation::{AggregateKind, GlobalAggregator};
pub use bloom_filter::BloomFilter;
pub use buffer::Buffer;
pub use consumer::{
    BufferingConsumer, ConsumerHandle, CountingConsumer, QueryResultConsumer, consumer_consume,
};
pub use count_down::CountDown;
pub use deleter::Deleter;
pub use functions::BuiltinFunction;
pub use hash_table::{CCHashTable, DEFAULT_MAX_TUPLE_BYTES};
pub use index_scan_iterator::{IndexScanIterator, ScanMode};
pub use inserter::Inserter;
pub use selection_vector::SelectionVector;
pub use sorter::Sorter;
pub use state::{LocalSlot, LocalState, RuntimeState, RuntimeStateBuilder, RuntimeStateLayout};
pub use task_info::TaskInfo;
pub use thread_pool::{ExecutorThreadPool, ThreadPoolStats};
pub(crate) use thread_pool::panic_message;
pub use updater::Updater;
