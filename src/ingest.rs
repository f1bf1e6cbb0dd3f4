//! Fan-out of accepted sample batches to auxiliary processors (indexers, caches, ...).

use crate::error::TsError;
use crate::telemetry::{noop_event_listener, pipeline_metrics, PipelineEvent, PipelineEventListener};
use crate::types::Sample;

use rayon::prelude::*;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Receives every batch accepted by the store.
pub trait SampleProcessor: std::fmt::Debug + Send + Sync + 'static {
    fn name(&self) -> &str;

    fn submit(&self, samples: &[Sample]) -> Result<(), TsError>;
}

/// Configuration for [`SampleProcessorService`].
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Worker threads used to run processors in parallel.
    pub max_threads: usize,
    /// Batches that may wait for dispatch before `submit` blocks.
    pub queue_capacity: usize,
    pub event_listener: Arc<dyn PipelineEventListener>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_threads: thread::available_parallelism().map_or(4, |n| n.get()),
            queue_capacity: 1024,
            event_listener: noop_event_listener(),
        }
    }
}

enum IngestCommand {
    Batch(Arc<Vec<Sample>>),
    Flush { ack: mpsc::Sender<()> },
    Shutdown,
}

/// Bounded, backpressure-applying fan-out of sample batches.
///
/// Batches queue on a bounded channel; when it is full, [`submit`](Self::submit) blocks the
/// producer. A dispatcher thread hands each batch to all processors in parallel on a
/// dedicated rayon pool and waits for them before taking the next batch. Processor errors
/// and panics are reported as events and never reach the producer.
#[derive(Debug)]
pub struct SampleProcessorService {
    tx: Mutex<Option<SyncSender<IngestCommand>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    listener: Arc<dyn PipelineEventListener>,
}

impl std::fmt::Debug for IngestCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestCommand::Batch(b) => write!(f, "Batch({} samples)", b.len()),
            IngestCommand::Flush { .. } => f.write_str("Flush"),
            IngestCommand::Shutdown => f.write_str("Shutdown"),
        }
    }
}

impl SampleProcessorService {
    /// Starts the dispatcher thread and worker pool.
    ///
    /// # Errors
    /// [`TsError::Config`] for a zero queue capacity or thread count, or when the pool
    /// cannot be built; [`TsError::Io`] when the dispatcher thread cannot be spawned.
    pub fn new(
        processors: Vec<Arc<dyn SampleProcessor>>,
        config: IngestConfig,
    ) -> Result<Self, TsError> {
        if config.queue_capacity == 0 || config.max_threads == 0 {
            return Err(TsError::config(
                "ingest queue capacity and thread count must be greater than zero",
            ));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.max_threads)
            .thread_name(|i| format!("tsrollup-ingest-{}", i))
            .build()
            .map_err(|e| TsError::config(format!("ingest pool: {}", e)))?;

        let (tx, rx) = mpsc::sync_channel::<IngestCommand>(config.queue_capacity);
        let events = config.event_listener.clone();

        let handle = thread::Builder::new()
            .name("tsrollup-ingest-dispatch".to_string())
            .spawn(move || {
                events.on_event(PipelineEvent::IngestDispatcherStarted);
                for cmd in rx {
                    match cmd {
                        IngestCommand::Batch(batch) => pool.install(|| {
                            processors
                                .par_iter()
                                .for_each(|p| run_processor(p.as_ref(), &batch, events.as_ref()))
                        }),
                        IngestCommand::Flush { ack } => {
                            let _ = ack.send(());
                        }
                        IngestCommand::Shutdown => break,
                    }
                }
                events.on_event(PipelineEvent::IngestDispatcherStopping);
            })?;

        Ok(Self {
            tx: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
            listener: config.event_listener,
        })
    }

    /// Queues a batch for all processors, blocking while the queue is full.
    ///
    /// # Errors
    /// [`TsError::ServiceStopped`] after [`shutdown`](Self::shutdown).
    pub fn submit(&self, samples: Vec<Sample>) -> Result<(), TsError> {
        if samples.is_empty() {
            return Ok(());
        }
        let count = samples.len() as u64;
        self.send(IngestCommand::Batch(Arc::new(samples)))?;
        pipeline_metrics::record_ingest_samples(count);
        Ok(())
    }

    /// Blocks until every batch queued before this call has been processed.
    pub fn flush(&self) -> Result<(), TsError> {
        let (ack, done) = mpsc::channel();
        self.send(IngestCommand::Flush { ack })?;
        done.recv().map_err(|_| TsError::ServiceStopped)
    }

    /// Drains queued batches, stops the dispatcher and joins it. Idempotent.
    pub fn shutdown(&self) -> Result<(), TsError> {
        let tx = self.tx.lock()?.take();
        if let Some(tx) = tx {
            // Fails only when the dispatcher is already gone.
            let _ = tx.send(IngestCommand::Shutdown);
        }
        if let Some(handle) = self.handle.lock()?.take() {
            if handle.join().is_err() {
                self.listener.on_event(PipelineEvent::SampleProcessorPanicked {
                    processor: "dispatcher".to_string(),
                });
            }
        }
        Ok(())
    }

    fn send(&self, cmd: IngestCommand) -> Result<(), TsError> {
        // Blocking on a full queue must not hold the lock, or shutdown would wait on it.
        let tx = self.tx.lock()?.clone().ok_or(TsError::ServiceStopped)?;
        tx.send(cmd).map_err(|_| TsError::ServiceStopped)
    }
}

fn run_processor(processor: &dyn SampleProcessor, batch: &[Sample], events: &dyn PipelineEventListener) {
    match panic::catch_unwind(AssertUnwindSafe(|| processor.submit(batch))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            pipeline_metrics::record_processor_failure();
            events.on_event(PipelineEvent::SampleProcessorFailed {
                processor: processor.name().to_string(),
                error: e.to_string(),
            });
        }
        Err(_) => {
            pipeline_metrics::record_processor_failure();
            events.on_event(PipelineEvent::SampleProcessorPanicked {
                processor: processor.name().to_string(),
            });
        }
    }
}

impl Drop for SampleProcessorService {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::Timestamp;
    use crate::types::{Resource, ValueType};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Default)]
    struct Counting(AtomicUsize);

    impl SampleProcessor for Counting {
        fn name(&self) -> &str {
            "counting"
        }
        fn submit(&self, samples: &[Sample]) -> Result<(), TsError> {
            self.0.fetch_add(samples.len(), Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Debug)]
    struct Failing;

    impl SampleProcessor for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn submit(&self, _samples: &[Sample]) -> Result<(), TsError> {
            Err(TsError::Storage("index unavailable".into()))
        }
    }

    #[derive(Debug, Default)]
    struct Gated(AtomicBool);

    impl SampleProcessor for Gated {
        fn name(&self) -> &str {
            "gated"
        }
        fn submit(&self, _samples: &[Sample]) -> Result<(), TsError> {
            while !self.0.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(5));
            }
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct Capture(Mutex<Vec<PipelineEvent>>);

    impl PipelineEventListener for Capture {
        fn on_event(&self, event: PipelineEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    fn batch(n: usize) -> Vec<Sample> {
        (0..n)
            .map(|i| {
                Sample::new(
                    Timestamp::from_epoch_seconds(i as i64),
                    Resource::new("r"),
                    "m0",
                    ValueType::Counter(i as u64),
                )
            })
            .collect()
    }

    #[test]
    fn test_every_processor_sees_every_batch() {
        let a = Arc::new(Counting::default());
        let b = Arc::new(Counting::default());
        let service = SampleProcessorService::new(
            vec![a.clone() as Arc<dyn SampleProcessor>, b.clone()],
            IngestConfig {
                max_threads: 2,
                queue_capacity: 4,
                ..IngestConfig::default()
            },
        )
        .unwrap();
        for _ in 0..10 {
            service.submit(batch(3)).unwrap();
        }
        service.flush().unwrap();
        assert_eq!(a.0.load(Ordering::SeqCst), 30);
        assert_eq!(b.0.load(Ordering::SeqCst), 30);
    }

    #[test]
    fn test_failures_are_reported_not_propagated() {
        let counting = Arc::new(Counting::default());
        let capture = Arc::new(Capture::default());
        let service = SampleProcessorService::new(
            vec![Arc::new(Failing) as Arc<dyn SampleProcessor>, counting.clone()],
            IngestConfig {
                max_threads: 2,
                queue_capacity: 4,
                event_listener: capture.clone(),
            },
        )
        .unwrap();
        service.submit(batch(2)).unwrap();
        service.flush().unwrap();
        assert_eq!(counting.0.load(Ordering::SeqCst), 2);
        let events = capture.0.lock().unwrap();
        assert!(events.iter().any(|e| matches!(
            e,
            PipelineEvent::SampleProcessorFailed { processor, .. } if processor == "failing"
        )));
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let service =
            SampleProcessorService::new(vec![Arc::new(Counting::default()) as Arc<dyn SampleProcessor>], IngestConfig::default())
                .unwrap();
        service.shutdown().unwrap();
        service.shutdown().unwrap();
        assert!(matches!(service.submit(batch(1)), Err(TsError::ServiceStopped)));
        assert!(matches!(service.flush(), Err(TsError::ServiceStopped)));
    }

    #[test]
    fn test_full_queue_blocks_producer() {
        let gate = Arc::new(Gated::default());
        let service = Arc::new(
            SampleProcessorService::new(
                vec![gate.clone() as Arc<dyn SampleProcessor>],
                IngestConfig {
                    max_threads: 1,
                    queue_capacity: 1,
                    ..IngestConfig::default()
                },
            )
            .unwrap(),
        );
        let finished = Arc::new(AtomicBool::new(false));
        let producer = {
            let service = service.clone();
            let finished = finished.clone();
            thread::spawn(move || {
                // One batch in flight, one queued, the third has to wait.
                for _ in 0..3 {
                    service.submit(batch(1)).unwrap();
                }
                finished.store(true, Ordering::SeqCst);
            })
        };
        thread::sleep(Duration::from_millis(200));
        assert!(!finished.load(Ordering::SeqCst));
        gate.0.store(true, Ordering::SeqCst);
        producer.join().unwrap();
        assert!(finished.load(Ordering::SeqCst));
    }

    #[test]
    fn test_shutdown_while_producer_blocked_stops_new_submits() {
        let gate = Arc::new(Gated::default());
        let service = Arc::new(
            SampleProcessorService::new(
                vec![gate.clone() as Arc<dyn SampleProcessor>],
                IngestConfig {
                    max_threads: 1,
                    queue_capacity: 1,
                    ..IngestConfig::default()
                },
            )
            .unwrap(),
        );
        let blocked = {
            let service = service.clone();
            thread::spawn(move || {
                for _ in 0..3 {
                    // The last one races the shutdown marker for the queue slot.
                    let _ = service.submit(batch(1));
                }
            })
        };
        thread::sleep(Duration::from_millis(200));
        let stopper = {
            let service = service.clone();
            thread::spawn(move || service.shutdown())
        };
        thread::sleep(Duration::from_millis(100));

        let (result_tx, result_rx) = mpsc::channel();
        let late = {
            let service = service.clone();
            thread::spawn(move || {
                let _ = result_tx.send(service.submit(batch(1)));
            })
        };
        let result = result_rx.recv_timeout(Duration::from_secs(2));
        gate.0.store(true, Ordering::SeqCst);
        assert!(matches!(result, Ok(Err(TsError::ServiceStopped))), "{:?}", result);

        blocked.join().unwrap();
        stopper.join().unwrap().unwrap();
        late.join().unwrap();
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let result = SampleProcessorService::new(
            Vec::new(),
            IngestConfig {
                queue_capacity: 0,
                ..IngestConfig::default()
            },
        );
        assert!(matches!(result, Err(TsError::Config(_))));
    }
}
