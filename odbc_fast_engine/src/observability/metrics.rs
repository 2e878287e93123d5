use crate::error::ErrorCategory;
use crate::protocol::{sql_type, ResultEncoder, RowSet};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Operation classes with their own latency histogram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpClass {
    Connect = 0,
    Execute = 1,
    ExecutePrepared = 2,
    StreamNext = 3,
}

const OP_CLASS_COUNT: usize = 4;
const OP_CLASS_NAMES: [&str; OP_CLASS_COUNT] =
    ["connect", "execute", "execute_prepared", "stream_next"];

/// Upper bucket bounds in microseconds; the last bucket is open-ended.
const BUCKET_BOUNDS_US: [u64; 8] = [
    250, 1_000, 4_000, 16_000, 64_000, 250_000, 1_000_000, 4_000_000,
];
const BUCKET_COUNT: usize = BUCKET_BOUNDS_US.len() + 1;

#[derive(Default)]
struct Histogram {
    buckets: [AtomicU64; BUCKET_COUNT],
    count: AtomicU64,
    total_us: AtomicU64,
}

impl Histogram {
    fn record(&self, latency: Duration) {
        let us = latency.as_micros().min(u64::MAX as u128) as u64;
        let idx = BUCKET_BOUNDS_US
            .iter()
            .position(|bound| us <= *bound)
            .unwrap_or(BUCKET_COUNT - 1);
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_us.fetch_add(us, Ordering::Relaxed);
    }

    fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            buckets: self
                .buckets
                .iter()
                .map(|b| b.load(Ordering::Relaxed))
                .collect(),
            count: self.count.load(Ordering::Relaxed),
            total_micros: self.total_us.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HistogramSnapshot {
    pub buckets: Vec<u64>,
    pub count: u64,
    pub total_micros: u64,
}

/// Engine-wide counters and latency histograms. Everything is atomic; the
/// hot path never locks or allocates.
#[derive(Default)]
pub struct Metrics {
    connections_opened: AtomicU64,
    connections_closed: AtomicU64,
    queries_executed: AtomicU64,
    errors_transient: AtomicU64,
    errors_connection_lost: AtomicU64,
    errors_fatal: AtomicU64,
    errors_validation: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    stream_chunks: AtomicU64,
    bytes_encoded: AtomicU64,
    op_latency: [Histogram; OP_CLASS_COUNT],
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_connection_opened(&self) {
        self.connections_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection_closed(&self) {
        self.connections_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_query(&self) {
        self.queries_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, category: ErrorCategory) {
        let counter = match category {
            ErrorCategory::Transient => &self.errors_transient,
            ErrorCategory::ConnectionLost => &self.errors_connection_lost,
            ErrorCategory::Fatal => &self.errors_fatal,
            ErrorCategory::Validation => &self.errors_validation,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stream_chunk(&self) {
        self.stream_chunks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes_encoded(&self, bytes: u64) {
        self.bytes_encoded.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_latency(&self, op: OpClass, latency: Duration) {
        self.op_latency[op as usize].record(latency);
    }

    pub fn cache_hit_count(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_miss_count(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            connections_closed: self.connections_closed.load(Ordering::Relaxed),
            queries_executed: self.queries_executed.load(Ordering::Relaxed),
            errors_transient: self.errors_transient.load(Ordering::Relaxed),
            errors_connection_lost: self.errors_connection_lost.load(Ordering::Relaxed),
            errors_fatal: self.errors_fatal.load(Ordering::Relaxed),
            errors_validation: self.errors_validation.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            stream_chunks: self.stream_chunks.load(Ordering::Relaxed),
            bytes_encoded: self.bytes_encoded.load(Ordering::Relaxed),
            op_latency: OP_CLASS_NAMES
                .iter()
                .zip(self.op_latency.iter())
                .map(|(name, h)| OpLatencySnapshot {
                    op: (*name).to_string(),
                    histogram: h.snapshot(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OpLatencySnapshot {
    pub op: String,
    pub histogram: HistogramSnapshot,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub connections_opened: u64,
    pub connections_closed: u64,
    pub queries_executed: u64,
    pub errors_transient: u64,
    pub errors_connection_lost: u64,
    pub errors_fatal: u64,
    pub errors_validation: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub stream_chunks: u64,
    pub bytes_encoded: u64,
    pub op_latency: Vec<OpLatencySnapshot>,
}

impl MetricsSnapshot {
    /// Renders the snapshot as one synthetic row in the engine's result
    /// format, so bindings reuse their result decoder for metrics.
    pub fn to_row_set(&self) -> RowSet {
        let mut rows = RowSet::new();
        let mut cells: Vec<Option<Vec<u8>>> = Vec::new();

        let push = |rows: &mut RowSet, cells: &mut Vec<Option<Vec<u8>>>, name: &str, v: u64| {
            rows.add_column(name.to_string(), sql_type::BIGINT, false, 19);
            cells.push(Some((v as i64).to_le_bytes().to_vec()));
        };

        push(&mut rows, &mut cells, "connections_opened", self.connections_opened);
        push(&mut rows, &mut cells, "connections_closed", self.connections_closed);
        push(&mut rows, &mut cells, "queries_executed", self.queries_executed);
        push(&mut rows, &mut cells, "errors_transient", self.errors_transient);
        push(&mut rows, &mut cells, "errors_connection_lost", self.errors_connection_lost);
        push(&mut rows, &mut cells, "errors_fatal", self.errors_fatal);
        push(&mut rows, &mut cells, "errors_validation", self.errors_validation);
        push(&mut rows, &mut cells, "cache_hits", self.cache_hits);
        push(&mut rows, &mut cells, "cache_misses", self.cache_misses);
        push(&mut rows, &mut cells, "stream_chunks", self.stream_chunks);
        push(&mut rows, &mut cells, "bytes_encoded", self.bytes_encoded);
        for op in &self.op_latency {
            push(
                &mut rows,
                &mut cells,
                &format!("{}_count", op.op),
                op.histogram.count,
            );
            push(
                &mut rows,
                &mut cells,
                &format!("{}_total_micros", op.op),
                op.histogram.total_micros,
            );
        }

        rows.add_row(cells);
        rows
    }

    pub fn to_buffer(&self) -> Vec<u8> {
        ResultEncoder::encode(&self.to_row_set())
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
