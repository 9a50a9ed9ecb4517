// Every-Minute Sampler
// Periodic encoder statistics while a multitrack stream is live

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::services::{ivs_events, TelemetrySubmitter, VideoEncoder};

pub const SAMPLE_PERIOD: Duration = Duration::from_secs(60);

/// Background sampler; stops when dropped or once every encoder is gone.
///
/// Encoders are held weakly so the session alone decides when they are freed.
pub struct EveryMinute {
    task: JoinHandle<()>,
}

impl EveryMinute {
    pub fn start(
        handle: &tokio::runtime::Handle,
        telemetry: Arc<TelemetrySubmitter>,
        encoders: Vec<Weak<dyn VideoEncoder>>,
    ) -> Self {
        Self::start_with_period(handle, telemetry, encoders, SAMPLE_PERIOD)
    }

    pub fn start_with_period(
        handle: &tokio::runtime::Handle,
        telemetry: Arc<TelemetrySubmitter>,
        encoders: Vec<Weak<dyn VideoEncoder>>,
        period: Duration,
    ) -> Self {
        let started = Instant::now();
        let task = handle.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let samples: Vec<_> = encoders
                    .iter()
                    .filter_map(Weak::upgrade)
                    .map(|encoder| (encoder.name(), encoder.frame_counts()))
                    .collect();
                if samples.is_empty() {
                    log::debug!("Stream encoders released, stopping per-minute stats");
                    break;
                }
                let event = ivs_events::stream_minute(started.elapsed().as_secs(), &samples);
                telemetry.submit(ivs_events::STREAM_MINUTE, event);
            }
        });
        Self { task }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for EveryMinute {
    fn drop(&mut self) {
        self.task.abort();
    }
}
