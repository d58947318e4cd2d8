//! # sipmsim-runner
//!
//! Batch driver for the SiPM event engine.
//!
//! The runner accepts one photon list per event (optionally paired with
//! wavelengths), fans the events out over a rayon thread pool with one
//! [`Sensor`] per worker, and harvests a per-event [`EventResult`] with the
//! waveform statistics inside a configurable integration window.
//!
//! ## Determinism
//!
//! Each event reseeds its worker's sensor from the batch seed mixed with
//! the event index, so results do not depend on how rayon schedules events
//! onto workers. Results are returned in event order and every record also
//! carries its original index.

use rayon::prelude::*;
use serde::Serialize;
use sipmsim_common::DebugInfo;
use sipmsim_model::{PdeType, Properties, PropertyError};
use sipmsim_sensor::{Sensor, SensorError};
use std::io::Write;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while configuring or running a batch.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Device configuration error.
    #[error("configuration error: {0}")]
    Property(#[from] PropertyError),

    /// Photon input contract violation.
    #[error("photon data error: {0}")]
    Sensor(#[from] SensorError),

    /// IO error while writing results.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Batch Configuration
// ============================================================================

/// Integration window and seeding for a batch run.
#[derive(Debug, Clone, Copy)]
pub struct BatchConfig {
    /// Window start in ns.
    pub start: f64,
    /// Gate length in ns. Zero (the default) means the whole signal window
    /// from `start`.
    pub gate: f64,
    /// Threshold the in-window peak must exceed for statistics to be
    /// reported.
    pub threshold: f64,
    /// Base RNG seed, mixed with the event index per event.
    pub seed: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            start: 0.0,
            gate: 0.0,
            threshold: 0.5,
            seed: 0,
        }
    }
}

// ============================================================================
// Events and Results
// ============================================================================

/// One queued event: a photon list, optionally with wavelengths.
#[derive(Debug, Clone)]
struct BatchEvent {
    times: Vec<f64>,
    wavelengths: Option<Vec<f64>>,
}

/// Waveform statistics of one simulated event.
#[derive(Debug, Clone, Serialize)]
pub struct EventResult {
    /// Index of the event in submission order.
    pub idx: usize,
    /// Photon arrival times fed to the event.
    pub times: Vec<f64>,
    /// Photon wavelengths, when the event carried them.
    pub wavelengths: Option<Vec<f64>>,
    /// Charge integral over the window, absent below threshold.
    pub integral: Option<f64>,
    /// Peak amplitude over the window.
    pub peak: Option<f64>,
    /// Time over threshold in ns.
    pub tot: Option<f64>,
    /// Time of arrival relative to the window start in ns.
    pub toa: Option<f64>,
    /// Time of peak relative to the window start in ns.
    pub top: Option<f64>,
    /// Hit counters of the event.
    pub debug: DebugInfo,
}

// ============================================================================
// Batch Runner
// ============================================================================

/// Runs batches of SiPM events in parallel.
pub struct BatchRunner {
    properties: Properties,
    config: BatchConfig,
    events: Vec<BatchEvent>,
}

impl BatchRunner {
    /// Create a runner. The properties are validated once here so the run
    /// itself cannot fail on configuration.
    pub fn new(properties: Properties, config: BatchConfig) -> Result<Self, RunnerError> {
        // Surface distribution and template errors before any event is queued.
        Sensor::new(properties.clone())?;
        Ok(BatchRunner {
            properties,
            config,
            events: Vec::new(),
        })
    }

    /// Number of queued events.
    pub fn n_events(&self) -> usize {
        self.events.len()
    }

    /// Queue one event from photon arrival times.
    pub fn add_event(&mut self, times: Vec<f64>) {
        self.events.push(BatchEvent {
            times,
            wavelengths: None,
        });
    }

    /// Queue one event from photon times and wavelengths. The two lists
    /// must have equal length; on mismatch nothing is queued.
    pub fn add_event_with_wavelengths(
        &mut self,
        times: Vec<f64>,
        wavelengths: Vec<f64>,
    ) -> Result<(), RunnerError> {
        if times.len() != wavelengths.len() {
            return Err(SensorError::MismatchedPhotonData {
                times: times.len(),
                wavelengths: wavelengths.len(),
            }
            .into());
        }
        self.events.push(BatchEvent {
            times,
            wavelengths: Some(wavelengths),
        });
        Ok(())
    }

    /// Queue a whole batch of photon time lists.
    pub fn add_events<I>(&mut self, batches: I)
    where
        I: IntoIterator<Item = Vec<f64>>,
    {
        for times in batches {
            self.add_event(times);
        }
    }

    /// Drop all queued events.
    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Run every queued event and return one result per event, in
    /// submission order.
    ///
    /// If the properties request spectrum PDE but any queued event lacks
    /// wavelengths, the whole run is demoted to no PDE and a single
    /// warning is logged.
    pub fn run(&self) -> Result<Vec<EventResult>, RunnerError> {
        let mut properties = self.properties.clone();
        let missing_wavelengths = self.events.iter().any(|e| e.wavelengths.is_none());
        if properties.pde_type() == PdeType::Spectrum && missing_wavelengths {
            tracing::warn!(
                "spectrum PDE requested but wavelengths are missing; running without PDE"
            );
            properties.set_pde_type(PdeType::None);
        }

        let start = self.config.start;
        let gate = if self.config.gate > 0.0 {
            self.config.gate
        } else {
            properties.signal_length() - start
        };
        let threshold = self.config.threshold;
        let base_seed = self.config.seed;

        let template = Sensor::new(properties)?;

        let results: Vec<EventResult> = self
            .events
            .par_iter()
            .enumerate()
            .map_init(
                || template.clone(),
                |sensor, (idx, event)| {
                    sensor.reset_state();
                    sensor.seed(mix_seed(base_seed, idx as u64));
                    match &event.wavelengths {
                        // Lengths are validated when the event is queued.
                        Some(wavelengths) => {
                            let _ = sensor.add_photons_with_wavelengths(&event.times, wavelengths);
                        }
                        None => sensor.add_photons(&event.times),
                    }
                    sensor.run_event();

                    let signal = sensor.signal();
                    EventResult {
                        idx,
                        times: event.times.clone(),
                        wavelengths: event.wavelengths.clone(),
                        integral: signal.integral(start, gate, threshold),
                        peak: signal.peak(start, gate, threshold),
                        tot: signal.tot(start, gate, threshold),
                        toa: signal.toa(start, gate, threshold),
                        top: signal.top(start, gate, threshold),
                        debug: sensor.debug(),
                    }
                },
            )
            .collect();

        Ok(results)
    }
}

/// Mix the batch seed with an event index (splitmix64 finalizer), so
/// per-event streams are decorrelated and independent of worker scheduling.
fn mix_seed(base: u64, idx: u64) -> u64 {
    let mut z = base ^ idx.wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Write batch results as pretty-printed JSON.
pub fn write_json<W: Write>(mut writer: W, results: &[EventResult]) -> Result<(), RunnerError> {
    let json = serde_json::to_string_pretty(results)?;
    writeln!(writer, "{}", json)?;
    Ok(())
}
