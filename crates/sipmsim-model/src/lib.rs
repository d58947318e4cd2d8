//! # sipmsim-model
//!
//! Device properties and configuration for the sipmsim workspace.
//!
//! This crate provides:
//! - The [`Properties`] value object holding all device parameters
//! - Tagged modes for detection efficiency ([`PdeType`]) and hit placement
//!   ([`HitDistribution`])
//! - A name-keyed property registry ([`registry`]) so callers can set
//!   parameters by string name ([`Properties::set_named`])
//! - YAML loading ([`Properties::from_yaml_str`], [`Properties::from_yaml_file`])
//!
//! ## Validation
//!
//! Every typed setter validates its argument and returns
//! `Result<(), PropertyError>`. On error the previous value is preserved,
//! so a `Properties` instance is valid at all times. Nothing downstream of
//! configuration can fail: the sensor drains all fallible paths here.

pub mod registry;

use serde::Serialize;
use std::path::Path;

pub use registry::{is_known_property, PropertyError, PropertyValue, PROPERTY_NAMES};

// ============================================================================
// Modes
// ============================================================================

/// Photon detection efficiency mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PdeType {
    /// Every photon converts.
    None,
    /// A single scalar efficiency for all wavelengths.
    Scalar,
    /// Efficiency interpolated from a tabulated spectrum.
    Spectrum,
}

impl PdeType {
    /// Decode the integer tag used by the name-keyed registry (0, 1, 2).
    pub fn from_tag(tag: i64) -> Option<Self> {
        match tag {
            0 => Some(PdeType::None),
            1 => Some(PdeType::Scalar),
            2 => Some(PdeType::Spectrum),
            _ => None,
        }
    }
}

/// Spatial distribution of photoelectron hits on the cell grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HitDistribution {
    /// Independent uniform row and column.
    Uniform,
    /// 95% of hits inside the inscribed disc, the rest in the corners.
    Circle,
    /// Standard normal in both axes, mapped over the grid at three sigma.
    Gaussian,
}

impl HitDistribution {
    /// Decode the integer tag used by the name-keyed registry (0, 1, 2).
    pub fn from_tag(tag: i64) -> Option<Self> {
        match tag {
            0 => Some(HitDistribution::Uniform),
            1 => Some(HitDistribution::Circle),
            2 => Some(HitDistribution::Gaussian),
            _ => None,
        }
    }
}

// ============================================================================
// Properties
// ============================================================================

/// All device parameters of a simulated SiPM.
///
/// Times are in nanoseconds; `dcr` is in Hz (the sensor converts it to a
/// mean inter-arrival of `1e9 / dcr` ns). Fields are private so every
/// mutation goes through a validating setter.
#[derive(Debug, Clone, Serialize)]
pub struct Properties {
    n_side_cells: u32,
    sampling: f64,
    signal_length: f64,
    rising_time: f64,
    falling_time_fast: f64,
    falling_time_slow: f64,
    slow_component_fraction: f64,
    has_slow_component: bool,
    pde_type: PdeType,
    pde: f64,
    pde_spectrum: Vec<(f64, f64)>,
    hit_distribution: HitDistribution,
    dcr: f64,
    xt: f64,
    ap: f64,
    tau_ap_fast: f64,
    tau_ap_slow: f64,
    ap_slow_fraction: f64,
    recovery_time: f64,
    ccgv: f64,
    snr_linear: f64,
}

impl Default for Properties {
    /// A plausible 20x20-cell device: 1 ns sampling over a 500 ns window,
    /// 200 kHz dark rate, 5% crosstalk, 3% afterpulsing.
    fn default() -> Self {
        Properties {
            n_side_cells: 20,
            sampling: 1.0,
            signal_length: 500.0,
            rising_time: 1.0,
            falling_time_fast: 50.0,
            falling_time_slow: 100.0,
            slow_component_fraction: 0.2,
            has_slow_component: false,
            pde_type: PdeType::None,
            pde: 0.3,
            pde_spectrum: Vec::new(),
            hit_distribution: HitDistribution::Uniform,
            dcr: 200e3,
            xt: 0.05,
            ap: 0.03,
            tau_ap_fast: 10.0,
            tau_ap_slow: 80.0,
            ap_slow_fraction: 0.8,
            recovery_time: 50.0,
            ccgv: 0.05,
            snr_linear: 0.03,
        }
    }
}

/// Validation helpers shared by the typed setters.
fn check_positive(name: &'static str, value: f64) -> Result<(), PropertyError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(PropertyError::OutOfRange {
            name: name.to_string(),
            reason: format!("must be a positive finite number, got {}", value),
        })
    }
}

fn check_non_negative(name: &'static str, value: f64) -> Result<(), PropertyError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(PropertyError::OutOfRange {
            name: name.to_string(),
            reason: format!("must be a non-negative finite number, got {}", value),
        })
    }
}

fn check_probability(name: &'static str, value: f64) -> Result<(), PropertyError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(PropertyError::OutOfRange {
            name: name.to_string(),
            reason: format!("must lie in [0, 1], got {}", value),
        })
    }
}

impl Properties {
    // ------------------------------------------------------------------
    // Getters
    // ------------------------------------------------------------------

    /// Side length of the square cell grid.
    pub fn n_side_cells(&self) -> u32 {
        self.n_side_cells
    }

    /// Sampling period in ns.
    pub fn sampling(&self) -> f64 {
        self.sampling
    }

    /// Total signal window length in ns.
    pub fn signal_length(&self) -> f64 {
        self.signal_length
    }

    /// Number of sample points in the signal window.
    pub fn n_signal_points(&self) -> usize {
        (self.signal_length / self.sampling).ceil() as usize
    }

    /// Pulse rising time constant in ns.
    pub fn rising_time(&self) -> f64 {
        self.rising_time
    }

    /// Fast falling time constant in ns.
    pub fn falling_time_fast(&self) -> f64 {
        self.falling_time_fast
    }

    /// Slow falling time constant in ns (used when the slow component is on).
    pub fn falling_time_slow(&self) -> f64 {
        self.falling_time_slow
    }

    /// Weight of the slow falling component.
    pub fn slow_component_fraction(&self) -> f64 {
        self.slow_component_fraction
    }

    /// Whether the pulse shape carries a slow falling component.
    pub fn has_slow_component(&self) -> bool {
        self.has_slow_component
    }

    /// Photon detection efficiency mode.
    pub fn pde_type(&self) -> PdeType {
        self.pde_type
    }

    /// Scalar photon detection efficiency.
    pub fn pde(&self) -> f64 {
        self.pde
    }

    /// Tabulated PDE spectrum, sorted by wavelength.
    pub fn pde_spectrum(&self) -> &[(f64, f64)] {
        &self.pde_spectrum
    }

    /// Spatial distribution of photoelectron hits.
    pub fn hit_distribution(&self) -> HitDistribution {
        self.hit_distribution
    }

    /// Dark count rate in Hz.
    pub fn dcr(&self) -> f64 {
        self.dcr
    }

    /// Optical crosstalk probability.
    pub fn xt(&self) -> f64 {
        self.xt
    }

    /// Afterpulse probability.
    pub fn ap(&self) -> f64 {
        self.ap
    }

    /// Fast afterpulse delay constant in ns.
    pub fn tau_ap_fast(&self) -> f64 {
        self.tau_ap_fast
    }

    /// Slow afterpulse delay constant in ns.
    pub fn tau_ap_slow(&self) -> f64 {
        self.tau_ap_slow
    }

    /// Fraction of afterpulses drawn from the slow delay constant.
    pub fn ap_slow_fraction(&self) -> f64 {
        self.ap_slow_fraction
    }

    /// Cell recovery time constant in ns.
    pub fn recovery_time(&self) -> f64 {
        self.recovery_time
    }

    /// Cell-to-cell gain variation sigma.
    pub fn ccgv(&self) -> f64 {
        self.ccgv
    }

    /// Electronic noise sigma in linear units.
    pub fn snr_linear(&self) -> f64 {
        self.snr_linear
    }

    /// True if dark count generation is enabled.
    pub fn has_dcr(&self) -> bool {
        self.dcr > 0.0
    }

    /// True if crosstalk expansion is enabled.
    pub fn has_xt(&self) -> bool {
        self.xt > 0.0
    }

    /// True if afterpulse expansion is enabled.
    pub fn has_ap(&self) -> bool {
        self.ap > 0.0
    }

    // ------------------------------------------------------------------
    // Typed setters
    // ------------------------------------------------------------------

    /// Set the cell grid side length. Must be at least 1.
    pub fn set_n_side_cells(&mut self, n: u32) -> Result<(), PropertyError> {
        if n == 0 {
            return Err(PropertyError::OutOfRange {
                name: "nSideCells".to_string(),
                reason: "grid side must be at least 1".to_string(),
            });
        }
        self.n_side_cells = n;
        Ok(())
    }

    /// Set the sampling period in ns.
    pub fn set_sampling(&mut self, value: f64) -> Result<(), PropertyError> {
        check_positive("sampling", value)?;
        self.sampling = value;
        Ok(())
    }

    /// Set the signal window length in ns.
    pub fn set_signal_length(&mut self, value: f64) -> Result<(), PropertyError> {
        check_positive("signalLength", value)?;
        self.signal_length = value;
        Ok(())
    }

    /// Set the pulse rising time constant in ns.
    pub fn set_rising_time(&mut self, value: f64) -> Result<(), PropertyError> {
        check_positive("risingTime", value)?;
        self.rising_time = value;
        Ok(())
    }

    /// Set the fast falling time constant in ns.
    pub fn set_falling_time_fast(&mut self, value: f64) -> Result<(), PropertyError> {
        check_positive("fallingTimeFast", value)?;
        self.falling_time_fast = value;
        Ok(())
    }

    /// Set the slow falling time constant in ns.
    pub fn set_falling_time_slow(&mut self, value: f64) -> Result<(), PropertyError> {
        check_positive("fallingTimeSlow", value)?;
        self.falling_time_slow = value;
        Ok(())
    }

    /// Set the slow component weight.
    pub fn set_slow_component_fraction(&mut self, value: f64) -> Result<(), PropertyError> {
        check_probability("slowComponentFraction", value)?;
        self.slow_component_fraction = value;
        Ok(())
    }

    /// Enable or disable the slow falling component.
    pub fn set_has_slow_component(&mut self, value: bool) {
        self.has_slow_component = value;
    }

    /// Set the detection efficiency mode.
    pub fn set_pde_type(&mut self, value: PdeType) {
        self.pde_type = value;
    }

    /// Set the scalar detection efficiency.
    pub fn set_pde(&mut self, value: f64) -> Result<(), PropertyError> {
        check_probability("pde", value)?;
        self.pde = value;
        Ok(())
    }

    /// Set the tabulated PDE spectrum from (wavelength, probability) pairs.
    ///
    /// Points are sorted by wavelength. Probabilities must lie in [0, 1]
    /// and wavelengths must be finite; the spectrum must not be empty.
    pub fn set_pde_spectrum<I>(&mut self, points: I) -> Result<(), PropertyError>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let mut spectrum: Vec<(f64, f64)> = points.into_iter().collect();
        if spectrum.is_empty() {
            return Err(PropertyError::OutOfRange {
                name: "pdeSpectrum".to_string(),
                reason: "spectrum must hold at least one point".to_string(),
            });
        }
        for &(wavelength, probability) in &spectrum {
            if !wavelength.is_finite() {
                return Err(PropertyError::OutOfRange {
                    name: "pdeSpectrum".to_string(),
                    reason: format!("wavelength {} is not finite", wavelength),
                });
            }
            if !probability.is_finite() || !(0.0..=1.0).contains(&probability) {
                return Err(PropertyError::OutOfRange {
                    name: "pdeSpectrum".to_string(),
                    reason: format!(
                        "probability {} at wavelength {} must lie in [0, 1]",
                        probability, wavelength
                    ),
                });
            }
        }
        spectrum.sort_by(|a, b| a.0.total_cmp(&b.0));
        self.pde_spectrum = spectrum;
        Ok(())
    }

    /// Set the spatial distribution of photoelectron hits.
    pub fn set_hit_distribution(&mut self, value: HitDistribution) {
        self.hit_distribution = value;
    }

    /// Set the dark count rate in Hz. Zero disables dark counts.
    pub fn set_dcr(&mut self, value: f64) -> Result<(), PropertyError> {
        check_non_negative("dcr", value)?;
        self.dcr = value;
        Ok(())
    }

    /// Set the crosstalk probability. Zero disables crosstalk.
    pub fn set_xt(&mut self, value: f64) -> Result<(), PropertyError> {
        check_probability("xt", value)?;
        self.xt = value;
        Ok(())
    }

    /// Set the afterpulse probability. Zero disables afterpulses.
    pub fn set_ap(&mut self, value: f64) -> Result<(), PropertyError> {
        check_probability("ap", value)?;
        self.ap = value;
        Ok(())
    }

    /// Set the fast afterpulse delay constant in ns.
    pub fn set_tau_ap_fast(&mut self, value: f64) -> Result<(), PropertyError> {
        check_positive("tauApFast", value)?;
        self.tau_ap_fast = value;
        Ok(())
    }

    /// Set the slow afterpulse delay constant in ns.
    pub fn set_tau_ap_slow(&mut self, value: f64) -> Result<(), PropertyError> {
        check_positive("tauApSlow", value)?;
        self.tau_ap_slow = value;
        Ok(())
    }

    /// Set the fraction of afterpulses drawn from the slow constant.
    pub fn set_ap_slow_fraction(&mut self, value: f64) -> Result<(), PropertyError> {
        check_probability("apSlowFraction", value)?;
        self.ap_slow_fraction = value;
        Ok(())
    }

    /// Set the cell recovery time constant in ns.
    pub fn set_recovery_time(&mut self, value: f64) -> Result<(), PropertyError> {
        check_positive("recoveryTime", value)?;
        self.recovery_time = value;
        Ok(())
    }

    /// Set the cell-to-cell gain variation sigma.
    pub fn set_ccgv(&mut self, value: f64) -> Result<(), PropertyError> {
        check_non_negative("ccgv", value)?;
        self.ccgv = value;
        Ok(())
    }

    /// Set the electronic noise sigma in linear units.
    pub fn set_snr_linear(&mut self, value: f64) -> Result<(), PropertyError> {
        check_non_negative("snrLinear", value)?;
        self.snr_linear = value;
        Ok(())
    }

    // ------------------------------------------------------------------
    // PDE spectrum interpolation
    // ------------------------------------------------------------------

    /// Evaluate the PDE at a wavelength by linear interpolation over the
    /// tabulated spectrum, clamping to the endpoint values outside the
    /// tabulated range. Returns 0 for an empty spectrum.
    pub fn interpolate_pde(&self, wavelength: f64) -> f64 {
        let spectrum = &self.pde_spectrum;
        match spectrum.len() {
            0 => return 0.0,
            1 => return spectrum[0].1,
            _ => {}
        }
        let first = spectrum[0];
        let last = spectrum[spectrum.len() - 1];
        if wavelength <= first.0 {
            return first.1;
        }
        if wavelength >= last.0 {
            return last.1;
        }
        // First point with wavelength strictly above the query.
        let hi = spectrum.partition_point(|&(w, _)| w <= wavelength);
        let (w0, p0) = spectrum[hi - 1];
        let (w1, p1) = spectrum[hi];
        let weight = (wavelength - w0) / (w1 - w0);
        weight * p1 + (1.0 - weight) * p0
    }

    // ------------------------------------------------------------------
    // YAML loading
    // ------------------------------------------------------------------

    /// Build properties from a flat YAML mapping of registry names,
    /// applied over the defaults.
    ///
    /// ```yaml
    /// nSideCells: 10
    /// sampling: 1.0
    /// dcr: 100e3
    /// pdeSpectrum:
    ///   400.0: 0.2
    ///   500.0: 0.35
    /// ```
    pub fn from_yaml_str(yaml: &str) -> Result<Self, PropertyError> {
        let value: serde_yaml::Value = serde_yaml::from_str(yaml)?;
        let mapping = value.as_mapping().ok_or_else(|| PropertyError::OutOfRange {
            name: "<document>".to_string(),
            reason: "expected a YAML mapping of property names".to_string(),
        })?;

        let mut properties = Properties::default();
        for (key, value) in mapping {
            let name = key.as_str().ok_or_else(|| PropertyError::OutOfRange {
                name: format!("{:?}", key),
                reason: "property names must be strings".to_string(),
            })?;
            let value = registry::yaml_to_property_value(name, value)?;
            properties.set_named(name, value)?;
        }
        Ok(properties)
    }

    /// Build properties from a YAML file. See [`Properties::from_yaml_str`].
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, PropertyError> {
        let text = std::fs::read_to_string(path).map_err(PropertyError::Io)?;
        Self::from_yaml_str(&text)
    }
}
