//! Name-keyed property registry.
//!
//! Drivers and configuration files address device parameters by the string
//! names listed in [`PROPERTY_NAMES`]. [`Properties::set_named`] routes a
//! [`PropertyValue`] to the matching typed setter, so name-keyed mutation
//! goes through exactly the same validation as typed mutation.

use crate::{HitDistribution, PdeType, Properties};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised while configuring [`Properties`].
#[derive(Debug, Error)]
pub enum PropertyError {
    /// The property name is not in [`PROPERTY_NAMES`].
    #[error("unknown property '{0}'")]
    UnknownProperty(String),

    /// The value fails the property's range check.
    #[error("value for '{name}' out of range: {reason}")]
    OutOfRange {
        /// Property name.
        name: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The value has the wrong [`PropertyValue`] variant.
    #[error("type mismatch for '{name}': expected {expected}, got {actual}")]
    TypeMismatch {
        /// Property name.
        name: String,
        /// Variant the property requires.
        expected: &'static str,
        /// Variant that was supplied.
        actual: &'static str,
    },

    /// YAML parse failure while loading a configuration file.
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O failure while reading a configuration file.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// Property Values
// ============================================================================

/// A dynamically typed property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// Floating point value.
    Float(f64),
    /// Integer value (grid size, enum tags).
    Integer(i64),
    /// Boolean value.
    Bool(bool),
    /// A PDE spectrum as (wavelength, probability) pairs.
    Spectrum(Vec<(f64, f64)>),
}

impl PropertyValue {
    fn describe(&self) -> &'static str {
        match self {
            PropertyValue::Float(_) => "float",
            PropertyValue::Integer(_) => "integer",
            PropertyValue::Bool(_) => "bool",
            PropertyValue::Spectrum(_) => "spectrum",
        }
    }

    /// Numeric coercion: integers widen to floats.
    fn as_f64(&self) -> Option<f64> {
        match *self {
            PropertyValue::Float(value) => Some(value),
            PropertyValue::Integer(value) => Some(value as f64),
            _ => None,
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match *self {
            PropertyValue::Integer(value) => Some(value),
            _ => None,
        }
    }

    /// Booleans, with 0/1 integers accepted for configuration files that
    /// carry every value as a number.
    fn as_bool(&self) -> Option<bool> {
        match *self {
            PropertyValue::Bool(value) => Some(value),
            PropertyValue::Integer(0) => Some(false),
            PropertyValue::Integer(1) => Some(true),
            _ => None,
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// All recognized property names.
pub const PROPERTY_NAMES: &[&str] = &[
    "nSideCells",
    "sampling",
    "signalLength",
    "risingTime",
    "fallingTimeFast",
    "fallingTimeSlow",
    "slowComponentFraction",
    "hasSlowComponent",
    "pdeType",
    "pde",
    "pdeSpectrum",
    "hitDistribution",
    "dcr",
    "xt",
    "ap",
    "tauApFast",
    "tauApSlow",
    "apSlowFraction",
    "recoveryTime",
    "ccgv",
    "snrLinear",
];

/// Check if a property name is registered.
pub fn is_known_property(name: &str) -> bool {
    PROPERTY_NAMES.contains(&name)
}

fn mismatch(name: &str, expected: &'static str, value: &PropertyValue) -> PropertyError {
    PropertyError::TypeMismatch {
        name: name.to_string(),
        expected,
        actual: value.describe(),
    }
}

impl Properties {
    /// Set a property by name.
    ///
    /// The value is routed to the matching typed setter; on any error the
    /// previous value is preserved.
    pub fn set_named(&mut self, name: &str, value: PropertyValue) -> Result<(), PropertyError> {
        let float = |value: &PropertyValue| {
            value.as_f64().ok_or_else(|| mismatch(name, "float", value))
        };
        match name {
            "nSideCells" => {
                let n = value.as_i64().ok_or_else(|| mismatch(name, "integer", &value))?;
                if !(1..=i64::from(u32::MAX)).contains(&n) {
                    return Err(PropertyError::OutOfRange {
                        name: name.to_string(),
                        reason: format!("grid side must be at least 1, got {}", n),
                    });
                }
                self.set_n_side_cells(n as u32)
            }
            "sampling" => self.set_sampling(float(&value)?),
            "signalLength" => self.set_signal_length(float(&value)?),
            "risingTime" => self.set_rising_time(float(&value)?),
            "fallingTimeFast" => self.set_falling_time_fast(float(&value)?),
            "fallingTimeSlow" => self.set_falling_time_slow(float(&value)?),
            "slowComponentFraction" => self.set_slow_component_fraction(float(&value)?),
            "hasSlowComponent" => {
                let flag = value.as_bool().ok_or_else(|| mismatch(name, "bool", &value))?;
                self.set_has_slow_component(flag);
                Ok(())
            }
            "pdeType" => {
                let tag = value.as_i64().ok_or_else(|| mismatch(name, "integer", &value))?;
                let mode = PdeType::from_tag(tag).ok_or_else(|| PropertyError::OutOfRange {
                    name: name.to_string(),
                    reason: format!("mode tag must be 0 (none), 1 (scalar) or 2 (spectrum), got {}", tag),
                })?;
                self.set_pde_type(mode);
                Ok(())
            }
            "pde" => self.set_pde(float(&value)?),
            "pdeSpectrum" => match value {
                PropertyValue::Spectrum(points) => self.set_pde_spectrum(points),
                other => Err(mismatch(name, "spectrum", &other)),
            },
            "hitDistribution" => {
                let tag = value.as_i64().ok_or_else(|| mismatch(name, "integer", &value))?;
                let dist =
                    HitDistribution::from_tag(tag).ok_or_else(|| PropertyError::OutOfRange {
                        name: name.to_string(),
                        reason: format!(
                            "distribution tag must be 0 (uniform), 1 (circle) or 2 (gaussian), got {}",
                            tag
                        ),
                    })?;
                self.set_hit_distribution(dist);
                Ok(())
            }
            "dcr" => self.set_dcr(float(&value)?),
            "xt" => self.set_xt(float(&value)?),
            "ap" => self.set_ap(float(&value)?),
            "tauApFast" => self.set_tau_ap_fast(float(&value)?),
            "tauApSlow" => self.set_tau_ap_slow(float(&value)?),
            "apSlowFraction" => self.set_ap_slow_fraction(float(&value)?),
            "recoveryTime" => self.set_recovery_time(float(&value)?),
            "ccgv" => self.set_ccgv(float(&value)?),
            "snrLinear" => self.set_snr_linear(float(&value)?),
            _ => Err(PropertyError::UnknownProperty(name.to_string())),
        }
    }

    /// Read a property by name.
    pub fn get_named(&self, name: &str) -> Result<PropertyValue, PropertyError> {
        let value = match name {
            "nSideCells" => PropertyValue::Integer(i64::from(self.n_side_cells())),
            "sampling" => PropertyValue::Float(self.sampling()),
            "signalLength" => PropertyValue::Float(self.signal_length()),
            "risingTime" => PropertyValue::Float(self.rising_time()),
            "fallingTimeFast" => PropertyValue::Float(self.falling_time_fast()),
            "fallingTimeSlow" => PropertyValue::Float(self.falling_time_slow()),
            "slowComponentFraction" => PropertyValue::Float(self.slow_component_fraction()),
            "hasSlowComponent" => PropertyValue::Bool(self.has_slow_component()),
            "pdeType" => PropertyValue::Integer(self.pde_type() as i64),
            "pde" => PropertyValue::Float(self.pde()),
            "pdeSpectrum" => PropertyValue::Spectrum(self.pde_spectrum().to_vec()),
            "hitDistribution" => PropertyValue::Integer(self.hit_distribution() as i64),
            "dcr" => PropertyValue::Float(self.dcr()),
            "xt" => PropertyValue::Float(self.xt()),
            "ap" => PropertyValue::Float(self.ap()),
            "tauApFast" => PropertyValue::Float(self.tau_ap_fast()),
            "tauApSlow" => PropertyValue::Float(self.tau_ap_slow()),
            "apSlowFraction" => PropertyValue::Float(self.ap_slow_fraction()),
            "recoveryTime" => PropertyValue::Float(self.recovery_time()),
            "ccgv" => PropertyValue::Float(self.ccgv()),
            "snrLinear" => PropertyValue::Float(self.snr_linear()),
            _ => return Err(PropertyError::UnknownProperty(name.to_string())),
        };
        Ok(value)
    }
}

// ============================================================================
// YAML Conversion
// ============================================================================

/// Convert a YAML value to the [`PropertyValue`] the named property expects.
///
/// The PDE spectrum accepts either a `wavelength: probability` mapping or a
/// sequence of `[wavelength, probability]` pairs; every other property is a
/// scalar.
pub(crate) fn yaml_to_property_value(
    name: &str,
    value: &serde_yaml::Value,
) -> Result<PropertyValue, PropertyError> {
    use serde_yaml::Value;

    if name == "pdeSpectrum" {
        let points = match value {
            Value::Mapping(mapping) => mapping
                .iter()
                .map(|(k, v)| Ok((yaml_number(name, k)?, yaml_number(name, v)?)))
                .collect::<Result<Vec<_>, PropertyError>>()?,
            Value::Sequence(sequence) => sequence
                .iter()
                .map(|pair| match pair.as_sequence() {
                    Some(pair) if pair.len() == 2 => {
                        Ok((yaml_number(name, &pair[0])?, yaml_number(name, &pair[1])?))
                    }
                    _ => Err(PropertyError::OutOfRange {
                        name: name.to_string(),
                        reason: "spectrum entries must be [wavelength, probability] pairs"
                            .to_string(),
                    }),
                })
                .collect::<Result<Vec<_>, PropertyError>>()?,
            _ => {
                return Err(PropertyError::OutOfRange {
                    name: name.to_string(),
                    reason: "expected a mapping or a sequence of pairs".to_string(),
                })
            }
        };
        return Ok(PropertyValue::Spectrum(points));
    }

    match value {
        Value::Bool(flag) => Ok(PropertyValue::Bool(*flag)),
        Value::Number(number) => {
            if let Some(integer) = number.as_i64() {
                Ok(PropertyValue::Integer(integer))
            } else if let Some(float) = number.as_f64() {
                Ok(PropertyValue::Float(float))
            } else {
                Err(PropertyError::OutOfRange {
                    name: name.to_string(),
                    reason: format!("unrepresentable number {:?}", number),
                })
            }
        }
        other => Err(PropertyError::OutOfRange {
            name: name.to_string(),
            reason: format!("expected a scalar value, got {:?}", other),
        }),
    }
}

fn yaml_number(name: &str, value: &serde_yaml::Value) -> Result<f64, PropertyError> {
    // Mapping keys like `400.0:` may arrive as strings depending on the
    // YAML emitter, so accept numeric strings too.
    if let Some(number) = value.as_f64() {
        return Ok(number);
    }
    if let Some(text) = value.as_str() {
        if let Ok(number) = text.parse::<f64>() {
            return Ok(number);
        }
    }
    Err(PropertyError::OutOfRange {
        name: name.to_string(),
        reason: format!("expected a number, got {:?}", value),
    })
}
