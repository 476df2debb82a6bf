//! Sinks receiving the rows a compiled query produces

use crate::error::Result;
use crate::proxy::Tuple;
use crate::types::Value;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Receiver of output rows
///
/// Parallel pipelines call `consume` from several worker threads at once.
pub trait QueryResultConsumer: Send + Sync + fmt::Debug {
    /// Accept one row
    fn consume(&self, row: &[Value]) -> Result<()>;
}

/// Collects every row in memory
#[derive(Debug, Default)]
pub struct BufferingConsumer {
    rows: Mutex<Vec<Vec<Value>>>,
}

impl BufferingConsumer {
    /// Empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the rows received so far
    pub fn rows(&self) -> Vec<Vec<Value>> {
        self.rows.lock().clone()
    }

    /// Take the rows, leaving the buffer empty
    pub fn take_rows(&self) -> Vec<Vec<Value>> {
        std::mem::take(&mut *self.rows.lock())
    }

    /// Rows received so far
    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    /// No rows received
    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }
}

impl QueryResultConsumer for BufferingConsumer {
    fn consume(&self, row: &[Value]) -> Result<()> {
        self.rows.lock().push(row.to_vec());
        Ok(())
    }
}

/// Counts rows and drops them
#[derive(Debug, Default)]
pub struct CountingConsumer {
    count: AtomicU64,
}

impl CountingConsumer {
    /// Rows received so far
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }
}

impl QueryResultConsumer for CountingConsumer {
    fn consume(&self, _row: &[Value]) -> Result<()> {
        self.count.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}

/// Type-erased consumer as generated code holds it
#[derive(Debug, Clone)]
pub struct ConsumerHandle(pub Arc<dyn QueryResultConsumer>);

crate::proxy_opaque!(ConsumerHandle => "QueryResultConsumer");

impl ConsumerHandle {
    /// Wrap a consumer
    pub fn new(consumer: Arc<dyn QueryResultConsumer>) -> Self {
        Self(consumer)
    }
}

/// Hand one output row to the consumer
pub fn consumer_consume(consumer: Arc<ConsumerHandle>, row: Tuple) -> Result<()> {
    consumer.0.consume(row.values())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffering_consumer_through_handle() {
        let buffer = Arc::new(BufferingConsumer::new());
        let handle = Arc::new(ConsumerHandle::new(buffer.clone()));
        consumer_consume(handle.clone(), Tuple::new(vec![Value::integer(1)])).unwrap();
        consumer_consume(handle, Tuple::new(vec![Value::integer(2)])).unwrap();
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.take_rows()[1], vec![Value::integer(2)]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_counting_consumer() {
        let counter = CountingConsumer::default();
        for _ in 0..3 {
            counter.consume(&[]).unwrap();
        }
        assert_eq!(counter.count(), 3);
    }
}
