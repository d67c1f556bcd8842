//! Data Sanitization
//!
//! Boundary validation for values crossing into the engine.
//!
//! Functions:
//! - Finite / range / probability checks returning `MalformedInput`
//! - Feature sanitization for already-validated intermediate values
//! - Logistic helpers that stay finite for extreme arguments

use crate::error::{LexisError, Result};

/// Largest magnitude passed to `exp` in logistic computations
const MAX_EXPONENT: f64 = 35.0;

/// True if any value is NaN or infinite
pub fn has_invalid_values(arr: &[f64]) -> bool {
    arr.iter().any(|&x| x.is_nan() || x.is_infinite())
}

pub fn ensure_finite(field: &str, value: f64) -> Result<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(LexisError::malformed(field, format!("must be finite, got {value}")))
    }
}

pub fn ensure_positive(field: &str, value: f64) -> Result<f64> {
    ensure_finite(field, value)?;
    if value > 0.0 {
        Ok(value)
    } else {
        Err(LexisError::malformed(field, format!("must be > 0, got {value}")))
    }
}

pub fn ensure_non_negative(field: &str, value: f64) -> Result<f64> {
    ensure_finite(field, value)?;
    if value >= 0.0 {
        Ok(value)
    } else {
        Err(LexisError::malformed(field, format!("must be >= 0, got {value}")))
    }
}

pub fn ensure_in_range(field: &str, value: f64, min: f64, max: f64) -> Result<f64> {
    ensure_finite(field, value)?;
    if value < min || value > max {
        return Err(LexisError::malformed(
            field,
            format!("must be within [{min}, {max}], got {value}"),
        ));
    }
    Ok(value)
}

/// Open-interval probability check, used for retention targets.
pub fn ensure_probability(field: &str, value: f64) -> Result<f64> {
    ensure_finite(field, value)?;
    if value <= 0.0 || value >= 1.0 {
        return Err(LexisError::malformed(
            field,
            format!("must be a probability in (0, 1), got {value}"),
        ));
    }
    Ok(value)
}

pub fn ensure_all_finite(field: &str, values: &[f64]) -> Result<()> {
    if has_invalid_values(values) {
        return Err(LexisError::malformed(field, "contains NaN or Infinity"));
    }
    Ok(())
}

/// Replace a non-finite value with `fallback`
pub fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

/// Logistic function with the argument clamped so the result never hits 0 or 1 exactly
/// for moderate inputs and never produces NaN.
pub fn logistic(x: f64) -> f64 {
    let x = x.clamp(-MAX_EXPONENT, MAX_EXPONENT);
    1.0 / (1.0 + (-x).exp())
}
