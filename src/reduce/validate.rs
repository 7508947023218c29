//! Post-hoc layout validation.
//!
//! Distinguishes the ways a layout can be unusable: non-finite coordinates,
//! runaway magnitudes, and a collapsed (near-zero variance) embedding. Each
//! is surfaced as its own failure mode; none may pass as a silent success.

use std::fmt;

/// Coordinates beyond this magnitude indicate a diverged optimization.
pub const MAGNITUDE_LIMIT: f32 = 1e6;

/// Per-dimension variance below this (for every dimension) means the layout
/// collapsed to a point.
const VARIANCE_FLOOR: f32 = 1e-12;

/// A distinct way a layout can fail validation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LayoutFailure {
    /// A coordinate is NaN or infinite.
    NonFinite {
        /// Index of the offending point.
        point: usize,
    },
    /// A coordinate exceeds [`MAGNITUDE_LIMIT`].
    ExtremeMagnitude {
        /// Index of the offending point.
        point: usize,
        /// The offending value.
        value: f32,
    },
    /// All dimensions have near-zero variance; the layout carries no
    /// structure for clustering to find.
    Collapsed,
}

impl fmt::Display for LayoutFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutFailure::NonFinite { point } => {
                write!(f, "non-finite coordinate at point {point}")
            }
            LayoutFailure::ExtremeMagnitude { point, value } => {
                write!(f, "extreme coordinate magnitude {value} at point {point}")
            }
            LayoutFailure::Collapsed => write!(f, "layout collapsed to near-zero variance"),
        }
    }
}

/// Validate a layout, returning the first failure found.
pub fn validate_layout(coords: &[Vec<f32>]) -> Result<(), LayoutFailure> {
    for (point, values) in coords.iter().enumerate() {
        for &value in values {
            if !value.is_finite() {
                return Err(LayoutFailure::NonFinite { point });
            }
            if value.abs() > MAGNITUDE_LIMIT {
                return Err(LayoutFailure::ExtremeMagnitude { point, value });
            }
        }
    }

    if coords.len() > 1 {
        let dim = coords[0].len();
        let n = coords.len() as f32;
        let collapsed = (0..dim).all(|d| {
            let mean: f32 = coords.iter().map(|point| point[d]).sum::<f32>() / n;
            let variance: f32 = coords
                .iter()
                .map(|point| (point[d] - mean).powi(2))
                .sum::<f32>()
                / n;
            variance < VARIANCE_FLOOR
        });
        if collapsed {
            return Err(LayoutFailure::Collapsed);
        }
    }

    Ok(())
}
