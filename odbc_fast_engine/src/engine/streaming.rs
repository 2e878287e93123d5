use crate::engine::bind::to_driver_params;
use crate::engine::connection::ConnectionRecord;
use crate::engine::query::{describe_columns, fetch_rows};
use crate::error::{structured_from_driver, EngineError, Result};
use crate::observability::Metrics;
use crate::protocol::{EncodeLimits, ParamValue, ResultEncoder};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

pub(crate) enum StreamMessage {
    Chunk(Vec<u8>),
    Done,
    Failed(EngineError),
}

/// Consumer side of one open stream. The producing worker owns the cursor
/// and parks on the bounded channel between chunks, so memory stays at one
/// chunk regardless of result size.
pub struct StreamHandle {
    pub conn_id: u64,
    receiver: Mutex<Receiver<StreamMessage>>,
    finished: AtomicBool,
    _worker: JoinHandle<()>,
}

impl StreamHandle {
    /// Blocks for the next encoded chunk. `Ok(None)` is end-of-stream and
    /// stays end-of-stream on every later call.
    pub fn next_chunk(&self) -> Result<Option<Vec<u8>>> {
        if self.finished.load(Ordering::SeqCst) {
            return Ok(None);
        }
        let receiver = self
            .receiver
            .lock()
            .map_err(|_| EngineError::Internal("stream receiver mutex poisoned".to_string()))?;
        match receiver.recv() {
            Ok(StreamMessage::Chunk(chunk)) => Ok(Some(chunk)),
            Ok(StreamMessage::Done) => {
                self.finished.store(true, Ordering::SeqCst);
                Ok(None)
            }
            Ok(StreamMessage::Failed(err)) => {
                self.finished.store(true, Ordering::SeqCst);
                Err(err)
            }
            // Worker is gone without a Done: treat as exhausted.
            Err(_) => {
                self.finished.store(true, Ordering::SeqCst);
                Ok(None)
            }
        }
    }
}

/// Starts the worker for a forward-only streaming query. The worker holds
/// the connection lock until it finishes or the handle is dropped, which is
/// what keeps the owning connection `Busy` for the stream's lifetime.
pub fn open_stream(
    record: Arc<ConnectionRecord>,
    conn_id: u64,
    sql: String,
    params: Vec<ParamValue>,
    chunk_rows: usize,
    limits: EncodeLimits,
    timeout_secs: Option<usize>,
    metrics: Arc<Metrics>,
) -> StreamHandle {
    let (tx, rx) = sync_channel::<StreamMessage>(1);

    let worker = std::thread::spawn(move || {
        run_worker(record, sql, params, chunk_rows, limits, timeout_secs, metrics, tx);
    });

    StreamHandle {
        conn_id,
        receiver: Mutex::new(rx),
        finished: AtomicBool::new(false),
        _worker: worker,
    }
}

#[allow(clippy::too_many_arguments)]
fn run_worker(
    record: Arc<ConnectionRecord>,
    sql: String,
    params: Vec<ParamValue>,
    chunk_rows: usize,
    limits: EncodeLimits,
    timeout_secs: Option<usize>,
    metrics: Arc<Metrics>,
    tx: SyncSender<StreamMessage>,
) {
    let result = record.with_connection(|conn| {
        let bound = to_driver_params(&params);
        let cursor = conn
            .execute(&sql, &bound[..], timeout_secs)
            .map_err(|e| EngineError::Stream(structured_from_driver(&e)))?;

        let Some(mut cursor) = cursor else {
            // Statement produced no result set; the stream is just empty.
            let _ = tx.send(StreamMessage::Done);
            return Ok(());
        };

        let (meta, kinds) = describe_columns(&mut cursor)?;
        let mut first = true;

        loop {
            if record.take_cancel() {
                return Err(EngineError::Cancelled);
            }

            let mut chunk = meta.empty_like();
            let more = fetch_rows(&mut cursor, &mut chunk, &kinds, Some(chunk_rows))?;

            if chunk.row_count() > 0 || first {
                let encoded = ResultEncoder::encode_with_limits(&chunk, &limits)?;
                metrics.record_stream_chunk();
                metrics.add_bytes_encoded(encoded.len() as u64);
                if tx.send(StreamMessage::Chunk(encoded)).is_err() {
                    // Consumer closed the stream; stop fetching.
                    return Ok(());
                }
            }
            first = false;

            if !more {
                let _ = tx.send(StreamMessage::Done);
                return Ok(());
            }
        }
    });

    if let Err(err) = result {
        // Slot, metrics and the broken transition are handled when the
        // consumer observes the failure in stream_next.
        let _ = tx.send(StreamMessage::Failed(err));
    }
}
