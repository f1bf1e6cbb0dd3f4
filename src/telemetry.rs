use crate::time::Timestamp;
use std::sync::Arc;

use std::time::Duration;

/// Structured, in-process event hook for observability.
///
/// The library does not log on its own. Callers provide an implementation that forwards
/// these events wherever they like; [`TracingEventListener`] forwards them to `tracing`.
pub trait PipelineEventListener: std::fmt::Debug + Send + Sync + 'static {
    fn on_event(&self, event: PipelineEvent);
}

/// Structured events emitted by the pipeline and the ingest service.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    CounterWrapped {
        resource: String,
        metric: String,
        timestamp: Timestamp,
        previous: u64,
        current: u64,
    },
    UnorderedInput {
        resource: String,
        previous: Timestamp,
        current: Timestamp,
    },

    QueryCompleted {
        resource: String,
        rows: u64,
        duration: Duration,
    },
    QueryFailed {
        resource: String,
        error: String,
    },

    IngestDispatcherStarted,
    IngestDispatcherStopping,
    SampleProcessorFailed {
        processor: String,
        error: String,
    },
    SampleProcessorPanicked {
        processor: String,
    },
}

#[derive(Debug)]
pub struct NoopEventListener;

impl PipelineEventListener for NoopEventListener {
    #[inline]
    fn on_event(&self, _event: PipelineEvent) {}
}

pub fn noop_event_listener() -> Arc<dyn PipelineEventListener> {
    Arc::new(NoopEventListener)
}

/// Forwards every event to the `tracing` macros at a level matching its severity.
#[derive(Debug, Default)]
pub struct TracingEventListener;

impl PipelineEventListener for TracingEventListener {
    fn on_event(&self, event: PipelineEvent) {
        match event {
            PipelineEvent::CounterWrapped {
                resource,
                metric,
                timestamp,
                previous,
                current,
            } => tracing::debug!(
                %resource, %metric, %timestamp, previous, current,
                "counter wrap detected"
            ),
            PipelineEvent::UnorderedInput {
                resource,
                previous,
                current,
            } => tracing::warn!(%resource, %previous, %current, "sample rows out of order"),
            PipelineEvent::QueryCompleted {
                resource,
                rows,
                duration,
            } => tracing::debug!(%resource, rows, ?duration, "query completed"),
            PipelineEvent::QueryFailed { resource, error } => {
                tracing::warn!(%resource, %error, "query failed")
            }
            PipelineEvent::IngestDispatcherStarted => tracing::info!("ingest dispatcher started"),
            PipelineEvent::IngestDispatcherStopping => {
                tracing::info!("ingest dispatcher stopping")
            }
            PipelineEvent::SampleProcessorFailed { processor, error } => {
                tracing::warn!(%processor, %error, "sample processor failed")
            }
            PipelineEvent::SampleProcessorPanicked { processor } => {
                tracing::error!(%processor, "sample processor panicked")
            }
        }
    }
}

pub fn tracing_event_listener() -> Arc<dyn PipelineEventListener> {
    Arc::new(TracingEventListener)
}

/// Metrics instrumentation through the `metrics` facade.
///
/// Recording is a no-op until a recorder is installed. With the `prometheus` feature,
/// [`PrometheusExposition`](pipeline_metrics::PrometheusExposition) installs one and renders
/// the exposition text in-process.
pub mod pipeline_metrics {
    use super::*;

    use ::metrics::{describe_counter, describe_histogram, Unit};

    #[cfg(feature = "prometheus")]
    use crate::error::TsError;
    #[cfg(feature = "prometheus")]
    use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
    #[cfg(feature = "prometheus")]
    use std::sync::mpsc::{self, RecvTimeoutError};
    #[cfg(feature = "prometheus")]
    use std::thread::{self, JoinHandle};

    // --- metric names ---

    pub const ROWS_EMITTED: &str = "tsrollup_rows_emitted";
    pub const COUNTER_WRAPS: &str = "tsrollup_counter_wraps";
    pub const QUERY_DURATION_SECONDS: &str = "tsrollup_query_duration_seconds";
    pub const QUERY_FAILURES: &str = "tsrollup_query_failures";
    pub const INGEST_SAMPLES: &str = "tsrollup_ingest_samples";
    pub const PROCESSOR_FAILURES: &str = "tsrollup_sample_processor_failures";

    /// Process-wide Prometheus recorder whose exposition text is rendered on demand,
    /// for callers that serve `/metrics` themselves.
    ///
    /// Histograms and idle series are compacted by a background thread every
    /// `upkeep_every`; the thread exits when the value is dropped.
    #[cfg(feature = "prometheus")]
    #[derive(Debug)]
    pub struct PrometheusExposition {
        handle: PrometheusHandle,
        stop: Option<mpsc::Sender<()>>,
        upkeep: Option<JoinHandle<()>>,
    }

    #[cfg(feature = "prometheus")]
    impl PrometheusExposition {
        /// Registers the pipeline's metric descriptions and installs the global recorder.
        ///
        /// # Errors
        /// [`TsError::Metrics`] when a recorder is already installed in this process,
        /// [`TsError::Io`] when the upkeep thread cannot be started.
        pub fn install(upkeep_every: Duration) -> Result<Self, TsError> {
            describe_all();
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .map_err(|e| TsError::Metrics(e.to_string()))?;

            let (stop, stopped) = mpsc::channel::<()>();
            let compactor = handle.clone();
            let upkeep = thread::Builder::new()
                .name("tsrollup-metrics-upkeep".to_string())
                .spawn(move || {
                    while let Err(RecvTimeoutError::Timeout) = stopped.recv_timeout(upkeep_every) {
                        compactor.run_upkeep();
                    }
                })?;

            Ok(Self {
                handle,
                stop: Some(stop),
                upkeep: Some(upkeep),
            })
        }

        /// Current values in the Prometheus text format.
        pub fn render(&self) -> String {
            self.handle.render()
        }
    }

    #[cfg(feature = "prometheus")]
    impl Drop for PrometheusExposition {
        fn drop(&mut self) {
            // Disconnecting the channel wakes the upkeep loop.
            self.stop.take();
            if let Some(upkeep) = self.upkeep.take() {
                let _ = upkeep.join();
            }
        }
    }

    #[inline]
    pub fn record_rows_emitted(rows: u64) {
        if rows > 0 {
            ::metrics::counter!(ROWS_EMITTED).increment(rows);
        }
    }

    #[inline]
    pub fn record_counter_wrap() {
        ::metrics::counter!(COUNTER_WRAPS).increment(1);
    }

    #[inline]
    pub fn record_query(duration: Duration) {
        ::metrics::histogram!(QUERY_DURATION_SECONDS).record(duration.as_secs_f64());
    }

    #[inline]
    pub fn record_query_failure() {
        ::metrics::counter!(QUERY_FAILURES).increment(1);
    }

    #[inline]
    pub fn record_ingest_samples(samples: u64) {
        if samples > 0 {
            ::metrics::counter!(INGEST_SAMPLES).increment(samples);
        }
    }

    #[inline]
    pub fn record_processor_failure() {
        ::metrics::counter!(PROCESSOR_FAILURES).increment(1);
    }

    pub fn describe_all() {
        describe_counter!(
            ROWS_EMITTED,
            Unit::Count,
            "Total number of result rows produced by measurement queries."
        );
        describe_counter!(
            COUNTER_WRAPS,
            Unit::Count,
            "Counter wraparounds detected while computing rates."
        );
        describe_counter!(
            QUERY_FAILURES,
            Unit::Count,
            "Measurement queries that ended with an error."
        );
        describe_counter!(
            INGEST_SAMPLES,
            Unit::Count,
            "Samples handed to the sample processor service."
        );
        describe_counter!(
            PROCESSOR_FAILURES,
            Unit::Count,
            "Sample processor invocations that returned an error or panicked."
        );
        describe_histogram!(
            QUERY_DURATION_SECONDS,
            Unit::Seconds,
            "Wall time from query start until the last row was produced."
        );
    }
}
