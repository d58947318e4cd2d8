//! # sipmsim-common
//!
//! Common types for the sipmsim SiPM simulation workspace.
//!
//! This crate provides the value types shared by every layer:
//! - Avalanche records ([`Hit`], [`HitKind`])
//! - Per-event counters ([`DebugInfo`])
//! - The sampled analog waveform ([`AnalogSignal`]) and its window
//!   statistics (`integral`, `peak`, `tot`, `toa`, `top`)
//!
//! ## Unit contract
//!
//! All times are in nanoseconds. The dark count rate is the one exception:
//! it is given in Hz, and the sensor converts it to a mean inter-arrival
//! time of `1e9 / dcr` nanoseconds.

pub mod signal;

use serde::{Deserialize, Serialize};

pub use signal::AnalogSignal;

// ============================================================================
// Hit Types
// ============================================================================

/// Physical origin of an avalanche.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HitKind {
    /// Primary avalanche from a detected photon.
    Photoelectron,
    /// Thermally induced avalanche with no photon.
    DarkCount,
    /// Prompt avalanche in a neighbour cell, triggered optically.
    OpticalCrosstalk,
    /// Delayed re-trigger of the same cell from trapped carriers.
    Afterpulse,
}

/// A single cell avalanche.
///
/// Hits are append-only within an event. The one field mutated after
/// creation is `amplitude`, which the recovery reconciliation stage
/// rewrites for cells fired more than once.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    /// Arrival time in nanoseconds.
    pub time: f64,
    /// Pulse amplitude in units of one fully recharged cell.
    pub amplitude: f64,
    /// Cell row, in `0..n_side_cells`.
    pub row: u32,
    /// Cell column, in `0..n_side_cells`.
    pub col: u32,
    /// Physical origin of the avalanche.
    pub kind: HitKind,
}

impl Hit {
    /// Create a hit with unit amplitude.
    pub fn new(time: f64, row: u32, col: u32, kind: HitKind) -> Self {
        Hit {
            time,
            amplitude: 1.0,
            row,
            col,
            kind,
        }
    }

    /// Create a hit with an explicit amplitude (afterpulses).
    pub fn with_amplitude(time: f64, amplitude: f64, row: u32, col: u32, kind: HitKind) -> Self {
        Hit {
            time,
            amplitude,
            row,
            col,
            kind,
        }
    }

    /// Flat cell index, unique per cell on an `n_side` x `n_side` grid.
    pub fn cell_id(&self, n_side: u32) -> u32 {
        self.row * n_side + self.col
    }
}

// ============================================================================
// Debug Counters
// ============================================================================

/// Per-event hit counters, one per [`HitKind`] plus the raw photon count.
///
/// The invariant `n_pe + n_dcr + n_xt + n_ap == total hits` holds after
/// every event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebugInfo {
    /// Photons pushed to the sensor before the event.
    pub n_photons: u32,
    /// Photoelectron hits.
    pub n_pe: u32,
    /// Dark count hits.
    pub n_dcr: u32,
    /// Optical crosstalk hits.
    pub n_xt: u32,
    /// Afterpulse hits.
    pub n_ap: u32,
}

impl DebugInfo {
    /// Total number of hits of any kind.
    pub fn n_total(&self) -> u32 {
        self.n_pe + self.n_dcr + self.n_xt + self.n_ap
    }
}

impl std::fmt::Display for DebugInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "photons: {}  pe: {}  dcr: {}  xt: {}  ap: {}",
            self.n_photons, self.n_pe, self.n_dcr, self.n_xt, self.n_ap
        )
    }
}
