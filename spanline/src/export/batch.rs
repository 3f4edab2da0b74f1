use std::collections::VecDeque;
use std::env;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::export::{ExportError, ExportResult, SpanExporter, SpanProcessor};
use crate::trace::SpanData;

/// Maximum spans held before export.
const SPANLINE_BSP_MAX_QUEUE_SIZE: &str = "SPANLINE_BSP_MAX_QUEUE_SIZE";
/// Delay interval (ms) between two consecutive flushes.
const SPANLINE_BSP_SCHEDULE_DELAY: &str = "SPANLINE_BSP_SCHEDULE_DELAY";
/// Maximum spans sent in one export call.
const SPANLINE_BSP_MAX_EXPORT_BATCH_SIZE: &str = "SPANLINE_BSP_MAX_EXPORT_BATCH_SIZE";

const DEFAULT_MAX_QUEUE_SIZE: usize = 2048;
const DEFAULT_SCHEDULE_DELAY: Duration = Duration::from_millis(5_000);
const DEFAULT_MAX_EXPORT_BATCH_SIZE: usize = 512;
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// What to do with a finished span when the queue is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Discard the incoming span; the queue keeps the oldest spans.
    #[default]
    DropIncoming,
    /// Evict the oldest queued span to make room for the incoming one.
    DropOldest,
}

/// Batching parameters for [`BatchSpanProcessor`].
#[derive(Clone, Debug)]
pub struct BatchConfig {
    pub(crate) max_queue_size: usize,
    pub(crate) scheduled_delay: Duration,
    pub(crate) max_export_batch_size: usize,
    pub(crate) shutdown_timeout: Duration,
    pub(crate) overflow_policy: OverflowPolicy,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfigBuilder::default().build()
    }
}

/// Builder for [`BatchConfig`].
///
/// `default()` seeds the built-in values and then applies the
/// `SPANLINE_BSP_*` environment overrides; explicit setters win over both.
#[derive(Clone, Debug)]
pub struct BatchConfigBuilder {
    max_queue_size: usize,
    scheduled_delay: Duration,
    max_export_batch_size: usize,
    shutdown_timeout: Duration,
    overflow_policy: OverflowPolicy,
}

impl Default for BatchConfigBuilder {
    fn default() -> Self {
        BatchConfigBuilder {
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            scheduled_delay: DEFAULT_SCHEDULE_DELAY,
            max_export_batch_size: DEFAULT_MAX_EXPORT_BATCH_SIZE,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            overflow_policy: OverflowPolicy::default(),
        }
        .init_from_env_vars()
    }
}

impl BatchConfigBuilder {
    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size.max(1);
        self
    }

    pub fn with_scheduled_delay(mut self, scheduled_delay: Duration) -> Self {
        self.scheduled_delay = scheduled_delay;
        self
    }

    pub fn with_max_export_batch_size(mut self, max_export_batch_size: usize) -> Self {
        self.max_export_batch_size = max_export_batch_size.max(1);
        self
    }

    pub fn with_shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    pub fn with_overflow_policy(mut self, overflow_policy: OverflowPolicy) -> Self {
        self.overflow_policy = overflow_policy;
        self
    }

    /// Build the config. A batch can never exceed the queue, so the batch
    /// size is clamped to the queue size.
    pub fn build(self) -> BatchConfig {
        BatchConfig {
            max_queue_size: self.max_queue_size,
            scheduled_delay: self.scheduled_delay,
            max_export_batch_size: self.max_export_batch_size.min(self.max_queue_size),
            shutdown_timeout: self.shutdown_timeout,
            overflow_policy: self.overflow_policy,
        }
    }

    fn init_from_env_vars(mut self) -> Self {
        if let Some(max_queue_size) = parse_env::<usize>(SPANLINE_BSP_MAX_QUEUE_SIZE) {
            self.max_queue_size = max_queue_size.max(1);
        }
        if let Some(delay_ms) = parse_env::<u64>(SPANLINE_BSP_SCHEDULE_DELAY) {
            self.scheduled_delay = Duration::from_millis(delay_ms);
        }
        if let Some(batch_size) = parse_env::<usize>(SPANLINE_BSP_MAX_EXPORT_BATCH_SIZE) {
            self.max_export_batch_size = batch_size.max(1);
        }
        self
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            crate::diag_warn!(name: "batch_config.invalid_env_value", var = name, value = raw);
            None
        }
    }
}

enum BatchMessage {
    /// The queue reached a full batch; drain eagerly.
    Wake,
    ForceFlush(SyncSender<ExportResult>),
    Shutdown(SyncSender<ExportResult>),
}

/// Queues finished spans and exports them from a dedicated worker thread.
///
/// `on_end` is a bounded-queue push under a short lock, so finishing a span
/// costs the same whether the collector is healthy, slow, or down. The
/// worker flushes when a full batch accumulates or `scheduled_delay`
/// elapses, whichever comes first. On queue overflow spans are dropped per
/// the configured [`OverflowPolicy`] and counted; on export failure the
/// batch is dropped and logged, never retried.
#[derive(Debug)]
pub struct BatchSpanProcessor {
    queue: Arc<Mutex<VecDeque<SpanData>>>,
    message_sender: SyncSender<BatchMessage>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
    dropped_spans: AtomicUsize,
    drop_warned: AtomicBool,
    is_shutdown: AtomicBool,
    max_queue_size: usize,
    max_export_batch_size: usize,
    overflow_policy: OverflowPolicy,
    shutdown_timeout: Duration,
}

impl BatchSpanProcessor {
    /// Spawn the worker thread and return the processor.
    pub fn new(exporter: impl SpanExporter + 'static, config: BatchConfig) -> Self {
        let queue = Arc::new(Mutex::new(VecDeque::with_capacity(
            config.max_queue_size.min(DEFAULT_MAX_QUEUE_SIZE),
        )));
        let (message_sender, message_receiver) = mpsc::sync_channel(8);

        let worker = Worker {
            exporter,
            queue: Arc::clone(&queue),
            receiver: message_receiver,
            scheduled_delay: config.scheduled_delay,
            max_export_batch_size: config.max_export_batch_size,
        };
        let handle = thread::Builder::new()
            .name("spanline-batch-exporter".to_string())
            .spawn(move || worker.run())
            .expect("batch worker thread spawn failed");

        BatchSpanProcessor {
            queue,
            message_sender,
            handle: Mutex::new(Some(handle)),
            dropped_spans: AtomicUsize::new(0),
            drop_warned: AtomicBool::new(false),
            is_shutdown: AtomicBool::new(false),
            max_queue_size: config.max_queue_size,
            max_export_batch_size: config.max_export_batch_size,
            overflow_policy: config.overflow_policy,
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    /// Processor with default batching over `exporter`.
    pub fn with_defaults(exporter: impl SpanExporter + 'static) -> Self {
        BatchSpanProcessor::new(exporter, BatchConfig::default())
    }

    /// Spans discarded so far due to queue overflow or post-shutdown ends.
    pub fn dropped_spans(&self) -> usize {
        self.dropped_spans.load(Ordering::Relaxed)
    }

    fn record_drop(&self) {
        self.dropped_spans.fetch_add(1, Ordering::Relaxed);
        if !self.drop_warned.swap(true, Ordering::Relaxed) {
            crate::diag_warn!(
                name: "batch_processor.queue_full",
                policy = format!("{:?}", self.overflow_policy)
            );
        }
    }
}

impl SpanProcessor for BatchSpanProcessor {
    fn on_end(&self, span: SpanData) {
        if self.is_shutdown.load(Ordering::Relaxed) {
            self.record_drop();
            return;
        }

        let full_batch_queued = {
            let Ok(mut queue) = self.queue.lock() else {
                return;
            };
            if queue.len() >= self.max_queue_size {
                match self.overflow_policy {
                    OverflowPolicy::DropIncoming => {
                        drop(queue);
                        self.record_drop();
                        return;
                    }
                    OverflowPolicy::DropOldest => {
                        queue.pop_front();
                        queue.push_back(span);
                        let full = queue.len() >= self.max_export_batch_size;
                        drop(queue);
                        self.record_drop();
                        full
                    }
                }
            } else {
                queue.push_back(span);
                queue.len() >= self.max_export_batch_size
            }
        };

        if full_batch_queued {
            // Full control channel means a wake is already pending.
            let _ = self.message_sender.try_send(BatchMessage::Wake);
        }
    }

    fn force_flush(&self) -> ExportResult {
        if self.is_shutdown.load(Ordering::Relaxed) {
            return Err(ExportError::AlreadyShutdown);
        }
        let (reply_sender, reply_receiver) = mpsc::sync_channel(1);
        self.message_sender
            .try_send(BatchMessage::ForceFlush(reply_sender))
            .map_err(|err| ExportError::Internal(format!("flush request not accepted: {err}")))?;
        reply_receiver
            .recv_timeout(self.shutdown_timeout)
            .map_err(|_| ExportError::Timeout(self.shutdown_timeout))?
    }

    fn shutdown(&self) -> ExportResult {
        if self.is_shutdown.swap(true, Ordering::Relaxed) {
            return Err(ExportError::AlreadyShutdown);
        }
        let (reply_sender, reply_receiver) = mpsc::sync_channel(1);
        self.message_sender
            .try_send(BatchMessage::Shutdown(reply_sender))
            .map_err(|err| ExportError::Internal(format!("shutdown request not accepted: {err}")))?;
        let result = reply_receiver
            .recv_timeout(self.shutdown_timeout)
            .map_err(|_| ExportError::Timeout(self.shutdown_timeout))?;
        // Join only after the worker acknowledged; a stuck exporter past the
        // deadline is abandoned rather than waited on.
        if let Ok(mut handle) = self.handle.lock() {
            if let Some(handle) = handle.take() {
                let _ = handle.join();
            }
        }
        result
    }
}

struct Worker<E> {
    exporter: E,
    queue: Arc<Mutex<VecDeque<SpanData>>>,
    receiver: Receiver<BatchMessage>,
    scheduled_delay: Duration,
    max_export_batch_size: usize,
}

impl<E: SpanExporter> Worker<E> {
    fn run(mut self) {
        crate::diag_debug!(name: "batch_processor.worker_started");
        let mut next_flush = Instant::now() + self.scheduled_delay;
        loop {
            let timeout = next_flush.saturating_duration_since(Instant::now());
            match self.receiver.recv_timeout(timeout) {
                Ok(BatchMessage::Wake) => {
                    while self.queue_len() >= self.max_export_batch_size {
                        let _ = self.export_one_batch();
                    }
                }
                Ok(BatchMessage::ForceFlush(reply)) => {
                    let result = self.drain();
                    let _ = reply.send(result);
                    next_flush = Instant::now() + self.scheduled_delay;
                }
                Ok(BatchMessage::Shutdown(reply)) => {
                    let result = self.drain();
                    self.exporter.shutdown();
                    let _ = reply.send(result);
                    crate::diag_debug!(name: "batch_processor.worker_stopped");
                    return;
                }
                Err(RecvTimeoutError::Timeout) => {
                    let _ = self.drain();
                    next_flush = Instant::now() + self.scheduled_delay;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    let _ = self.drain();
                    self.exporter.shutdown();
                    crate::diag_debug!(name: "batch_processor.worker_stopped");
                    return;
                }
            }
        }
    }

    fn queue_len(&self) -> usize {
        self.queue.lock().map(|queue| queue.len()).unwrap_or(0)
    }

    fn take_batch(&self) -> Vec<SpanData> {
        match self.queue.lock() {
            Ok(mut queue) => {
                let take = queue.len().min(self.max_export_batch_size);
                queue.drain(..take).collect()
            }
            Err(_) => Vec::new(),
        }
    }

    fn export_one_batch(&mut self) -> ExportResult {
        let batch = self.take_batch();
        if batch.is_empty() {
            return Ok(());
        }
        let batch_size = batch.len();
        match futures_executor::block_on(self.exporter.export(batch)) {
            Ok(()) => Ok(()),
            Err(err) => {
                crate::diag_error!(
                    name: "batch_processor.export_failed",
                    dropped = batch_size,
                    error = format!("{err}")
                );
                Err(err)
            }
        }
    }

    fn drain(&mut self) -> ExportResult {
        let mut result = Ok(());
        while self.queue_len() > 0 {
            if let Err(err) = self.export_one_batch() {
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }
}
