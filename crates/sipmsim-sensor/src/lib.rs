//! # sipmsim-sensor
//!
//! The SiPM event engine.
//!
//! A [`Sensor`] is configured with device [`Properties`], receives a list
//! of photon arrival times (optionally with wavelengths), and produces the
//! analog waveform of one event through a fixed six-stage pipeline:
//!
//! 1. Dark counts over the signal window (Poisson process at `dcr` Hz)
//! 2. Photoelectrons from the photon list, thinned by detection efficiency
//! 3. Optical crosstalk, cascading through the growing hit list
//! 4. Amplitude reconciliation for cells fired more than once
//! 5. Afterpulses, delayed re-triggers of already fired cells
//! 6. Waveform synthesis onto a Gaussian noise baseline
//!
//! Stages 3 and 5 iterate with a cursor against the live length of the hit
//! list, so hits they append are themselves revisited and can spawn further
//! correlated noise.
//!
//! A sensor owns its random generator and is not safe to share across
//! threads during an event; parallel drivers run one sensor per worker and
//! fan out over events (see `sipmsim-runner`).
//!
//! ## Units
//!
//! Times are nanoseconds throughout. `dcr` is in Hz; the dark count stage
//! converts it to a mean inter-arrival time of `1e9 / dcr` ns.

pub mod shape;
pub mod synth;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Exp, Normal, StandardNormal};
use sipmsim_common::{AnalogSignal, DebugInfo, Hit, HitKind};
use sipmsim_model::{HitDistribution, PdeType, Properties, PropertyError, PropertyValue};
use thiserror::Error;

/// Default RNG seed for sensors created without an explicit seed.
const DEFAULT_SEED: u64 = 0;

/// The dark count cursor starts this far before the signal window so the
/// first arrival is not biased towards t = 0.
const DCR_LEAD_IN_NS: f64 = -100.0;

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised while feeding photon data to a [`Sensor`].
#[derive(Debug, Error)]
pub enum SensorError {
    /// Photon time and wavelength arrays must have equal length.
    #[error("photon times and wavelengths differ in length ({times} vs {wavelengths})")]
    MismatchedPhotonData {
        /// Number of photon times supplied.
        times: usize,
        /// Number of wavelengths supplied.
        wavelengths: usize,
    },
}

// ============================================================================
// Cached Distributions
// ============================================================================

/// Sampling distributions derived from [`Properties`].
///
/// Built once per configuration change so that no sampling path during an
/// event can fail.
#[derive(Debug, Clone, Copy)]
struct Distributions {
    /// Electronic noise baseline, N(0, snrLinear).
    noise: Normal<f64>,
    /// Per-hit gain variation factor, N(1, ccgv).
    gain: Normal<f64>,
    /// Dark count inter-arrival times in ns; absent when dcr is 0.
    dcr_interarrival: Option<Exp<f64>>,
    /// Fast afterpulse delay in ns.
    ap_fast: Exp<f64>,
    /// Slow afterpulse delay in ns.
    ap_slow: Exp<f64>,
}

fn distribution_error(name: &str, err: impl std::fmt::Display) -> PropertyError {
    PropertyError::OutOfRange {
        name: name.to_string(),
        reason: err.to_string(),
    }
}

impl Distributions {
    fn build(properties: &Properties) -> Result<Self, PropertyError> {
        let noise = Normal::new(0.0, properties.snr_linear())
            .map_err(|e| distribution_error("snrLinear", e))?;
        let gain =
            Normal::new(1.0, properties.ccgv()).map_err(|e| distribution_error("ccgv", e))?;
        let dcr_interarrival = if properties.has_dcr() {
            // Rate in Hz against times in ns fixes the mean inter-arrival
            // at 1e9 / dcr nanoseconds.
            Some(Exp::new(properties.dcr() / 1e9).map_err(|e| distribution_error("dcr", e))?)
        } else {
            None
        };
        let ap_fast = Exp::new(1.0 / properties.tau_ap_fast())
            .map_err(|e| distribution_error("tauApFast", e))?;
        let ap_slow = Exp::new(1.0 / properties.tau_ap_slow())
            .map_err(|e| distribution_error("tauApSlow", e))?;
        Ok(Distributions {
            noise,
            gain,
            dcr_interarrival,
            ap_fast,
            ap_slow,
        })
    }
}

// ============================================================================
// Sensor
// ============================================================================

/// A simulated SiPM sensor.
///
/// Construct it from [`Properties`], push photons, call
/// [`run_event`](Sensor::run_event), then read the waveform with
/// [`signal`](Sensor::signal). [`reset_state`](Sensor::reset_state) clears
/// per-event state while keeping the configuration and pulse template.
///
/// Cloning a sensor copies the configuration, template and RNG state;
/// batch drivers clone one template sensor per worker and reseed per event.
#[derive(Clone)]
pub struct Sensor {
    properties: Properties,
    rng: ChaCha8Rng,
    shape: Vec<f64>,
    dists: Distributions,
    photon_times: Vec<f64>,
    photon_wavelengths: Vec<f64>,
    hits: Vec<Hit>,
    signal: AnalogSignal,
    n_pe: u32,
    n_dcr: u32,
    n_xt: u32,
    n_ap: u32,
}

impl Sensor {
    /// Create a sensor with the default RNG seed.
    ///
    /// The seed is fixed so two sensors built from the same properties
    /// produce identical events; drivers reseed per event via
    /// [`seed`](Sensor::seed).
    pub fn new(properties: Properties) -> Result<Self, PropertyError> {
        Self::with_seed(properties, DEFAULT_SEED)
    }

    /// Create a sensor seeded with `seed`.
    pub fn with_seed(properties: Properties, seed: u64) -> Result<Self, PropertyError> {
        let dists = Distributions::build(&properties)?;
        let shape = shape::signal_shape(&properties);
        let sampling = properties.sampling();
        Ok(Sensor {
            properties,
            rng: ChaCha8Rng::seed_from_u64(seed),
            shape,
            dists,
            photon_times: Vec::new(),
            photon_wavelengths: Vec::new(),
            hits: Vec::new(),
            signal: AnalogSignal::empty(sampling),
            n_pe: 0,
            n_dcr: 0,
            n_xt: 0,
            n_ap: 0,
        })
    }

    /// Reseed the random generator.
    pub fn seed(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }

    /// The device configuration.
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// The cached pulse template (peak-normalized, one sample per signal
    /// point). Intended for diagnostics.
    pub fn pulse_shape(&self) -> &[f64] {
        &self.shape
    }

    /// Set a single property by registry name and rebuild the pulse
    /// template and cached distributions. On error the previous
    /// configuration is untouched.
    pub fn set_property(&mut self, name: &str, value: PropertyValue) -> Result<(), PropertyError> {
        let mut next = self.properties.clone();
        next.set_named(name, value)?;
        self.set_properties(next)
    }

    /// Replace the whole configuration, rebuilding the pulse template and
    /// cached distributions.
    pub fn set_properties(&mut self, properties: Properties) -> Result<(), PropertyError> {
        let dists = Distributions::build(&properties)?;
        self.shape = shape::signal_shape(&properties);
        self.signal.set_sampling(properties.sampling());
        self.dists = dists;
        self.properties = properties;
        Ok(())
    }

    /// Queue a photon arrival time in ns.
    pub fn add_photon(&mut self, time: f64) {
        self.photon_times.push(time);
    }

    /// Queue a photon with its wavelength (nm), for spectrum PDE mode.
    pub fn add_photon_with_wavelength(&mut self, time: f64, wavelength: f64) {
        self.photon_times.push(time);
        self.photon_wavelengths.push(wavelength);
    }

    /// Queue a batch of photon arrival times.
    pub fn add_photons(&mut self, times: &[f64]) {
        self.photon_times.extend_from_slice(times);
    }

    /// Queue a batch of photons with wavelengths. The two slices must have
    /// equal length; on mismatch nothing is queued.
    pub fn add_photons_with_wavelengths(
        &mut self,
        times: &[f64],
        wavelengths: &[f64],
    ) -> Result<(), SensorError> {
        if times.len() != wavelengths.len() {
            return Err(SensorError::MismatchedPhotonData {
                times: times.len(),
                wavelengths: wavelengths.len(),
            });
        }
        self.photon_times.extend_from_slice(times);
        self.photon_wavelengths.extend_from_slice(wavelengths);
        Ok(())
    }

    /// Run one complete event over the queued photons.
    ///
    /// Stages with zero probability or rate are skipped. The waveform is
    /// rebuilt from scratch, so running twice without
    /// [`reset_state`](Sensor::reset_state) doubles the hit list but not
    /// the noise baseline.
    pub fn run_event(&mut self) {
        if self.properties.has_dcr() {
            self.add_dcr_events();
        }
        self.add_photoelectrons();
        if self.properties.has_xt() {
            self.add_xt_events();
        }
        self.reconcile_amplitudes();
        if self.properties.has_ap() {
            self.add_ap_events();
        }
        self.generate_signal();
    }

    /// The waveform produced by the last event.
    pub fn signal(&self) -> &AnalogSignal {
        &self.signal
    }

    /// All hits of the last event: time-sorted through reconciliation,
    /// with afterpulses appended at the end. Intended for diagnostics.
    pub fn hits(&self) -> &[Hit] {
        &self.hits
    }

    /// Per-event counters.
    pub fn debug(&self) -> DebugInfo {
        DebugInfo {
            n_photons: self.photon_times.len() as u32,
            n_pe: self.n_pe,
            n_dcr: self.n_dcr,
            n_xt: self.n_xt,
            n_ap: self.n_ap,
        }
    }

    /// Clear hits, photon buffers, counters and the waveform. Properties,
    /// pulse template and RNG state are retained.
    pub fn reset_state(&mut self) {
        self.hits.clear();
        self.photon_times.clear();
        self.photon_wavelengths.clear();
        self.signal.clear();
        self.n_pe = 0;
        self.n_dcr = 0;
        self.n_xt = 0;
        self.n_ap = 0;
    }

    // ------------------------------------------------------------------
    // Stage 1: dark counts
    // ------------------------------------------------------------------

    /// Emit dark count hits as a Poisson process over the signal window.
    ///
    /// The cursor starts at -100 ns and accumulates exponential
    /// inter-arrival times; only arrivals strictly inside (0, signalLength)
    /// become hits, at a uniformly random cell.
    fn add_dcr_events(&mut self) {
        let signal_length = self.properties.signal_length();
        let n_side = self.properties.n_side_cells();
        let interarrival = match self.dists.dcr_interarrival {
            Some(dist) => dist,
            None => return,
        };

        let mut cursor = DCR_LEAD_IN_NS;
        while cursor < signal_length {
            cursor += interarrival.sample(&mut self.rng);
            if cursor > 0.0 && cursor < signal_length {
                let row = self.rng.gen_range(0..n_side);
                let col = self.rng.gen_range(0..n_side);
                self.hits.push(Hit::new(cursor, row, col, HitKind::DarkCount));
                self.n_dcr += 1;
            }
        }
    }

    // ------------------------------------------------------------------
    // Stage 2: photoelectrons
    // ------------------------------------------------------------------

    /// Convert queued photons into photoelectron hits, thinned by the
    /// detection efficiency mode.
    fn add_photoelectrons(&mut self) {
        let n_photons = self.photon_times.len();
        self.hits.reserve(n_photons);

        let mut pde_type = self.properties.pde_type();
        if pde_type == PdeType::Spectrum && self.photon_wavelengths.len() != n_photons {
            tracing::warn!(
                n_photons,
                n_wavelengths = self.photon_wavelengths.len(),
                "spectrum PDE requested without matching wavelengths; running without PDE"
            );
            pde_type = PdeType::None;
        }

        for i in 0..n_photons {
            let time = self.photon_times[i];
            let detected = match pde_type {
                PdeType::None => true,
                PdeType::Scalar => self.is_detected(self.properties.pde()),
                PdeType::Spectrum => {
                    let pde = self.properties.interpolate_pde(self.photon_wavelengths[i]);
                    self.is_detected(pde)
                }
            };
            if detected {
                let (row, col) = self.hit_cell();
                self.hits.push(Hit::new(time, row, col, HitKind::Photoelectron));
                self.n_pe += 1;
            }
        }
    }

    fn is_detected(&mut self, pde: f64) -> bool {
        self.rng.gen::<f64>() < pde
    }

    /// Pick the cell a photoelectron lands in, per the configured spatial
    /// distribution. Coordinates are clamped onto the grid.
    fn hit_cell(&mut self) -> (u32, u32) {
        let n_side = self.properties.n_side_cells();
        match self.properties.hit_distribution() {
            HitDistribution::Uniform => {
                (self.rng.gen_range(0..n_side), self.rng.gen_range(0..n_side))
            }
            HitDistribution::Circle => {
                let inside = self.rng.gen::<f64>() < 0.95;
                let (x, y) = loop {
                    let x = self.rng.gen::<f64>() * 2.0 - 1.0;
                    let y = self.rng.gen::<f64>() * 2.0 - 1.0;
                    let in_disc = x * x + y * y <= 1.0;
                    if in_disc == inside {
                        break (x, y);
                    }
                };
                let scale = f64::from(n_side) / 2.0;
                (
                    clamp_to_grid((x + 1.0) * scale, n_side),
                    clamp_to_grid((y + 1.0) * scale, n_side),
                )
            }
            HitDistribution::Gaussian => {
                let x: f64 = self.rng.sample(StandardNormal);
                let y: f64 = self.rng.sample(StandardNormal);
                if x.abs() < 3.0 && y.abs() < 3.0 {
                    let scale = f64::from(n_side) / 6.0;
                    (
                        clamp_to_grid((x + 3.0) * scale, n_side),
                        clamp_to_grid((y + 3.0) * scale, n_side),
                    )
                } else {
                    // Beyond three sigma, fall back to uniform.
                    (self.rng.gen_range(0..n_side), self.rng.gen_range(0..n_side))
                }
            }
        }
    }

    fn is_in_sensor(&self, row: i64, col: i64) -> bool {
        let n_side = i64::from(self.properties.n_side_cells());
        row >= 0 && col >= 0 && row < n_side && col < n_side
    }

    // ------------------------------------------------------------------
    // Stage 3: optical crosstalk
    // ------------------------------------------------------------------

    /// Expand the hit list with crosstalk hits in neighbour cells.
    ///
    /// The cursor runs against the live length of the hit list, so
    /// crosstalk can cascade through previously generated crosstalk. The
    /// per-hit secondary count is Poisson(xt), realized by multiplicative
    /// uniform thinning against exp(-xt).
    ///
    /// The neighbour offset is drawn by rejection on `dr + dc != 0`, which
    /// also rejects the (-1, 1) and (1, -1) diagonals: only six of the
    /// eight neighbours are reachable. That distribution is the contract.
    fn add_xt_events(&mut self) {
        let threshold = (-self.properties.xt()).exp();

        let mut cursor = 0;
        while cursor < self.hits.len() {
            let parent = self.hits[cursor];
            cursor += 1;

            let mut test: f64 = self.rng.gen();
            while test > threshold {
                let (dr, dc) = loop {
                    let dr = self.rng.gen_range(0i64..=2) - 1;
                    let dc = self.rng.gen_range(0i64..=2) - 1;
                    if dr + dc != 0 {
                        break (dr, dc);
                    }
                };
                let row = i64::from(parent.row) + dr;
                let col = i64::from(parent.col) + dc;
                if self.is_in_sensor(row, col) {
                    self.hits.push(Hit::new(
                        parent.time,
                        row as u32,
                        col as u32,
                        HitKind::OpticalCrosstalk,
                    ));
                    self.n_xt += 1;
                }
                test *= self.rng.gen::<f64>();
            }
        }
    }

    // ------------------------------------------------------------------
    // Stage 4: amplitude reconciliation
    // ------------------------------------------------------------------

    /// Recompute amplitudes for cells fired more than once.
    ///
    /// Hits are stably sorted by time; within each cell the first hit keeps
    /// amplitude 1 and every later hit discharges a cell that has only
    /// recharged for the gap since the previous hit in that cell:
    /// `a = 1 - exp(-gap / recoveryTime)`.
    fn reconcile_amplitudes(&mut self) {
        self.hits.sort_by(|a, b| a.time.total_cmp(&b.time));

        let n_side = self.properties.n_side_cells();
        let recovery = self.properties.recovery_time();
        let mut last_fired: std::collections::HashMap<u32, f64> =
            std::collections::HashMap::with_capacity(self.hits.len());

        for hit in &mut self.hits {
            let id = hit.cell_id(n_side);
            match last_fired.entry(id) {
                std::collections::hash_map::Entry::Occupied(mut entry) => {
                    let gap = hit.time - *entry.get();
                    hit.amplitude = 1.0 - (-gap / recovery).exp();
                    entry.insert(hit.time);
                }
                std::collections::hash_map::Entry::Vacant(entry) => {
                    entry.insert(hit.time);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Stage 5: afterpulses
    // ------------------------------------------------------------------

    /// Expand the hit list with delayed re-triggers of fired cells.
    ///
    /// Same cursor-against-live-length traversal and Poisson thinning as
    /// crosstalk. The delay is exponential with the slow constant at
    /// probability `apSlowFraction`, the fast constant otherwise. The
    /// afterpulse amplitude scales the already reconciled parent amplitude
    /// by the cell's partial recharge over the delay; afterpulses created
    /// here are not reconciled again within the event.
    fn add_ap_events(&mut self) {
        let threshold = (-self.properties.ap()).exp();
        let slow_fraction = self.properties.ap_slow_fraction();
        let signal_length = self.properties.signal_length();
        let recovery = self.properties.recovery_time();
        let (fast, slow) = (self.dists.ap_fast, self.dists.ap_slow);

        let mut cursor = 0;
        while cursor < self.hits.len() {
            let parent = self.hits[cursor];
            cursor += 1;

            let mut test: f64 = self.rng.gen();
            while test > threshold {
                let delay = if self.rng.gen::<f64>() < slow_fraction {
                    slow.sample(&mut self.rng)
                } else {
                    fast.sample(&mut self.rng)
                };
                if parent.time + delay < signal_length {
                    let amplitude = parent.amplitude * (1.0 - (-delay / recovery).exp());
                    self.hits.push(Hit::with_amplitude(
                        parent.time + delay,
                        amplitude,
                        parent.row,
                        parent.col,
                        HitKind::Afterpulse,
                    ));
                    self.n_ap += 1;
                }
                test *= self.rng.gen::<f64>();
            }
        }
    }

    // ------------------------------------------------------------------
    // Stage 6: waveform synthesis
    // ------------------------------------------------------------------

    /// Superimpose every hit's scaled pulse template onto a fresh Gaussian
    /// noise baseline.
    ///
    /// Hits whose start sample falls outside the window contribute nothing.
    fn generate_signal(&mut self) {
        let n_points = self.properties.n_signal_points();
        let sampling = self.properties.sampling();

        let mut samples: Vec<f64> = (0..n_points)
            .map(|_| self.dists.noise.sample(&mut self.rng))
            .collect();

        for hit in &self.hits {
            let offset = (hit.time / sampling).floor() as i64;
            let amplitude = hit.amplitude * self.dists.gain.sample(&mut self.rng);
            if offset < 0 || offset >= n_points as i64 {
                continue;
            }
            let offset = offset as usize;
            synth::deposit(&mut samples[offset..], &self.shape, amplitude);
        }

        self.signal.set_sampling(sampling);
        self.signal.set_samples(samples);
    }
}

/// Map a non-negative continuous coordinate onto a grid index.
fn clamp_to_grid(coordinate: f64, n_side: u32) -> u32 {
    (coordinate as u32).min(n_side - 1)
}
