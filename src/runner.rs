//! Sampling loop: read a sample, publish it, wait, repeat
//!
//! Each cycle is independent. A failed delivery is logged and the loop moves
//! on to the next sample; only a fatal connection failure under
//! [`FailurePolicy::Exit`] ends the loop with an error.

use crate::config::{FailurePolicy, TelemetryConfig};
use crate::cycle_span;
use crate::error::{sanitize_error_message, TelemetryResult};
use crate::publisher::{shutdown_requested, DeliveryReceipt, PublishCoordinator};
use crate::sensor::{SampleReading, Sensor};
use crate::transport::{BrokerTransport, Message};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn, Instrument};

/// Result of one sampling cycle
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The broker acknowledged the sample
    Delivered(DeliveryReceipt),
    /// Delivery failed; the next cycle starts fresh
    Failed(String),
    /// The sensor could not be read, nothing was published
    Skipped(String),
    /// Shutdown interrupted the cycle
    Stopped,
}

/// Drives the sensor and publisher
pub struct TelemetryRunner<T: BrokerTransport, S: Sensor> {
    coordinator: PublishCoordinator<T>,
    sensor: S,
    device_id: String,
    topic: String,
    interval: Duration,
    policy: FailurePolicy,
}

impl<T: BrokerTransport, S: Sensor> TelemetryRunner<T, S> {
    pub fn new(
        coordinator: PublishCoordinator<T>,
        sensor: S,
        device_id: impl Into<String>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            coordinator,
            sensor,
            device_id: device_id.into(),
            topic: topic.into(),
            interval: Duration::from_secs(1),
            policy: FailurePolicy::default(),
        }
    }

    /// Build a runner from the device, sampling and runtime sections
    pub fn from_config(coordinator: PublishCoordinator<T>, sensor: S, config: &TelemetryConfig) -> Self {
        Self::new(
            coordinator,
            sensor,
            config.device.device_id.clone(),
            config.events_topic(),
        )
        .with_interval(Duration::from_millis(config.sampling.interval_ms))
        .with_policy(config.runtime.on_fatal)
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn sensor(&self) -> &S {
        &self.sensor
    }

    /// Sample once and publish the reading
    ///
    /// Returns an error only for a fatal connection failure under
    /// [`FailurePolicy::Exit`] or when the payload cannot be encoded.
    pub async fn run_cycle(&mut self) -> TelemetryResult<CycleOutcome> {
        let value = match self.sensor.read_sample() {
            Ok(value) => value,
            Err(e) => {
                warn!(phase = "sample", error = %e, "Sensor read failed, skipping cycle");
                return Ok(CycleOutcome::Skipped(e.to_string()));
            }
        };

        let reading = SampleReading::new(self.device_id.as_str(), self.sensor.pin(), value);
        let message = Message::new(self.topic.as_str(), reading.to_payload()?);

        let span = cycle_span!(device_id = %self.device_id, pin = reading.pin, value);
        match self.coordinator.publish_once(&message).instrument(span).await {
            Ok(receipt) => Ok(CycleOutcome::Delivered(receipt)),
            Err(e) if e.is_cancelled() => Ok(CycleOutcome::Stopped),
            Err(e) if e.is_fatal_connect() => match self.policy {
                FailurePolicy::Exit => {
                    error!(
                        phase = "connect",
                        error = %sanitize_error_message(&e.to_string()),
                        "Fatal connection failure, stopping"
                    );
                    Err(e.into())
                }
                FailurePolicy::Continue => {
                    error!(
                        phase = "connect",
                        error = %sanitize_error_message(&e.to_string()),
                        "Fatal connection failure, continuing with next sample"
                    );
                    Ok(CycleOutcome::Failed(e.to_string()))
                }
            },
            Err(e) => Ok(CycleOutcome::Failed(e.to_string())),
        }
    }

    /// Run until `shutdown` flips to `true`
    ///
    /// Returns the number of acknowledged samples.
    pub async fn run(&mut self, shutdown: watch::Receiver<bool>) -> TelemetryResult<u64> {
        info!(
            topic = %self.topic,
            interval_ms = self.interval.as_millis() as u64,
            "Sampling loop started"
        );

        let mut delivered = 0u64;
        while !*shutdown.borrow() {
            match self.run_cycle().await? {
                CycleOutcome::Delivered(_) => delivered += 1,
                CycleOutcome::Stopped => break,
                CycleOutcome::Failed(_) | CycleOutcome::Skipped(_) => {}
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown_requested(Some(shutdown.clone())) => break,
            }
        }

        info!(delivered, "Sampling loop stopped");
        Ok(delivered)
    }

    /// Run exactly `cycles` cycles, sleeping the interval between them
    pub async fn run_cycles(&mut self, cycles: usize) -> TelemetryResult<Vec<CycleOutcome>> {
        let mut outcomes = Vec::with_capacity(cycles);
        for index in 0..cycles {
            if index > 0 {
                tokio::time::sleep(self.interval).await;
            }
            let outcome = self.run_cycle().await?;
            let stopped = outcome == CycleOutcome::Stopped;
            outcomes.push(outcome);
            if stopped {
                break;
            }
        }
        Ok(outcomes)
    }
}
