// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Output log client.
//!
//! The leader produces resolved records (chunks, manifests and plain
//! values) to the version topic. The log acknowledges each record
//! asynchronously by invoking its [`ProduceCallback`].
//!
//! # Ordering
//!
//! Within a partition, callbacks run strictly in submission order and one
//! at a time: the next callback starts only after the previous one's future
//! has completed. Callbacks of different partitions run concurrently. A
//! callback that waits on a full persistence queue therefore stalls only
//! its own partition.
//!
//! ```text
//! produce(p0, r1) ─┐
//! produce(p0, r2) ─┼─► [p0 ack task] ─► cb(r1).await ─► cb(r2).await ─► ...
//! produce(p1, r3) ─┴─► [p1 ack task] ─► cb(r3).await
//! ```

use crate::error::{Result, WritePathError};
use crate::record::WritePayload;
use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info_span, Instrument};

/// A record as written to the output log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub key: Vec<u8>,
    pub payload: WritePayload,
}

impl LogRecord {
    pub fn serialized_size(&self) -> usize {
        self.key.len() + self.payload.size_bytes()
    }
}

/// Acknowledgement of a produced record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProduceResult {
    /// Offset assigned by the log.
    pub offset: i64,
    pub serialized_size: usize,
}

/// Future returned by a completion callback.
pub type CallbackFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Invoked once when the log accepts or rejects a produced record.
pub trait ProduceCallback: Send + 'static {
    fn on_completion(self: Box<Self>, result: Result<ProduceResult>) -> CallbackFuture;
}

impl<F, Fut> ProduceCallback for F
where
    F: FnOnce(Result<ProduceResult>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn on_completion(self: Box<Self>, result: Result<ProduceResult>) -> CallbackFuture {
        Box::pin((*self)(result))
    }
}

/// What the write path needs from the output log client.
pub trait OutputLog: Send + Sync + 'static {
    /// Topic records are produced to.
    fn topic(&self) -> &str;

    /// Submit a record. Returns once the record is queued for sending; the
    /// outcome is reported through `callback`.
    fn produce(
        &self,
        partition: u32,
        record: LogRecord,
        callback: Option<Box<dyn ProduceCallback>>,
    ) -> Result<()>;
}

enum PendingAck {
    Record {
        result: Result<ProduceResult>,
        callback: Option<Box<dyn ProduceCallback>>,
    },
    Flush(oneshot::Sender<()>),
}

struct PartitionLog {
    tx: mpsc::UnboundedSender<PendingAck>,
    next_offset: i64,
    fail_next: usize,
    records: Arc<Mutex<Vec<(i64, LogRecord)>>>,
}

/// In-memory output log with per-partition acknowledgement tasks.
///
/// Accepted records get consecutive offsets starting at 0 per partition.
/// Failures can be injected per partition with [`fail_next`](Self::fail_next).
pub struct InMemoryOutputLog {
    topic: String,
    partitions: DashMap<u32, PartitionLog>,
    produced: AtomicUsize,
}

impl InMemoryOutputLog {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            partitions: DashMap::new(),
            produced: AtomicUsize::new(0),
        }
    }

    fn spawn_partition(&self, partition: u32) -> PartitionLog {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_ack_loop(self.topic.clone(), partition, rx));
        PartitionLog {
            tx,
            next_offset: 0,
            fail_next: 0,
            records: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Reject the next `n` records produced to `partition`.
    pub fn fail_next(&self, partition: u32, n: usize) {
        self.partitions
            .entry(partition)
            .or_insert_with(|| self.spawn_partition(partition))
            .fail_next = n;
    }

    /// Records accepted on `partition`, with their offsets, in offset order.
    pub fn records(&self, partition: u32) -> Vec<(i64, LogRecord)> {
        let Some(records) = self.partitions.get(&partition).map(|p| Arc::clone(&p.records)) else {
            return Vec::new();
        };
        let guard = records.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.clone()
    }

    /// Total produce calls, accepted or not.
    pub fn produce_count(&self) -> usize {
        self.produced.load(Ordering::Relaxed)
    }

    /// Wait until every callback submitted so far has completed.
    pub async fn flush(&self) {
        let waiters: Vec<_> = self
            .partitions
            .iter()
            .filter_map(|p| {
                let (tx, rx) = oneshot::channel();
                p.tx.send(PendingAck::Flush(tx)).ok().map(|_| rx)
            })
            .collect();
        for waiter in waiters {
            let _ = waiter.await;
        }
    }
}

impl OutputLog for InMemoryOutputLog {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn produce(
        &self,
        partition: u32,
        record: LogRecord,
        callback: Option<Box<dyn ProduceCallback>>,
    ) -> Result<()> {
        self.produced.fetch_add(1, Ordering::Relaxed);
        let mut log = self
            .partitions
            .entry(partition)
            .or_insert_with(|| self.spawn_partition(partition));

        let result = if log.fail_next > 0 {
            log.fail_next -= 1;
            Err(WritePathError::transport(&self.topic, partition, "injected produce failure"))
        } else {
            let offset = log.next_offset;
            log.next_offset += 1;
            let serialized_size = record.serialized_size();
            log.records
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push((offset, record));
            Ok(ProduceResult {
                offset,
                serialized_size,
            })
        };

        log.tx
            .send(PendingAck::Record { result, callback })
            .map_err(|_| WritePathError::Shutdown)
    }
}

async fn run_ack_loop(topic: String, partition: u32, mut rx: mpsc::UnboundedReceiver<PendingAck>) {
    let span = info_span!("output_log_ack", topic = %topic, partition);

    async move {
        while let Some(pending) = rx.recv().await {
            match pending {
                PendingAck::Record { result, callback } => {
                    if let Some(callback) = callback {
                        callback.on_completion(result).await;
                    }
                }
                PendingAck::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
        debug!("Acknowledgement task stopped");
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::PutPayload;
    use std::time::Duration;

    fn record(key: &[u8]) -> LogRecord {
        LogRecord {
            key: key.to_vec(),
            payload: WritePayload::Put(PutPayload {
                value: b"v".to_vec(),
                schema_id: 1,
                rmd_version_id: 1,
                rmd_payload: Vec::new(),
            }),
        }
    }

    fn recording_callback(sink: Arc<Mutex<Vec<Result<i64>>>>) -> Box<dyn ProduceCallback> {
        Box::new(move |result: Result<ProduceResult>| async move {
            sink.lock().unwrap().push(result.map(|r| r.offset));
        })
    }

    #[tokio::test]
    async fn test_offsets_are_per_partition_and_sequential() {
        let log = InMemoryOutputLog::new("s_v1");
        let sink = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..3 {
            log.produce(0, record(b"a"), Some(recording_callback(Arc::clone(&sink)))).unwrap();
        }
        log.produce(1, record(b"b"), None).unwrap();
        log.flush().await;

        let offsets: Vec<i64> = sink.lock().unwrap().iter().map(|r| *r.as_ref().unwrap()).collect();
        assert_eq!(offsets, vec![0, 1, 2]);
        assert_eq!(log.records(1), vec![(0, record(b"b"))]);
        assert_eq!(log.produce_count(), 4);
        assert_eq!(log.topic(), "s_v1");
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let log = InMemoryOutputLog::new("s_v1");
        let sink = Arc::new(Mutex::new(Vec::new()));
        log.fail_next(0, 1);
        log.produce(0, record(b"a"), Some(recording_callback(Arc::clone(&sink)))).unwrap();
        log.produce(0, record(b"b"), Some(recording_callback(Arc::clone(&sink)))).unwrap();
        log.flush().await;

        let results = sink.lock().unwrap();
        assert!(matches!(results[0], Err(WritePathError::Transport { .. })));
        assert_eq!(*results[1].as_ref().unwrap(), 0);
        assert_eq!(log.records(0).len(), 1);
    }

    #[tokio::test]
    async fn test_callbacks_run_one_at_a_time_per_partition() {
        let log = InMemoryOutputLog::new("s_v1");
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3u64 {
            let order = Arc::clone(&order);
            let callback = move |_result: Result<ProduceResult>| async move {
                order.lock().unwrap().push(("start", i));
                tokio::time::sleep(Duration::from_millis(5 * (3 - i))).await;
                order.lock().unwrap().push(("end", i));
            };
            log.produce(0, record(b"k"), Some(Box::new(callback))).unwrap();
        }
        log.flush().await;

        let order = order.lock().unwrap().clone();
        assert_eq!(
            order,
            vec![("start", 0), ("end", 0), ("start", 1), ("end", 1), ("start", 2), ("end", 2)]
        );
    }

    #[tokio::test]
    async fn test_records_of_unknown_partition_empty() {
        let log = InMemoryOutputLog::new("s_v1");
        assert!(log.records(7).is_empty());
        log.flush().await;
    }
}
