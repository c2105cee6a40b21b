use thiserror::Error;

/// An invalid tuning parameter handed to a filter, estimator or config.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParamError {
    #[error("{name} must be finite and > 0, got {value}")]
    NotPositive { name: &'static str, value: f64 },

    #[error("{name} must be at least {min}, got {value}")]
    TooSmall {
        name: &'static str,
        value: usize,
        min: usize,
    },

    #[error("{name} is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Reject zero, negative, NaN and infinite values.
pub fn ensure_positive(name: &'static str, value: f32) -> Result<f32, ParamError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(ParamError::NotPositive {
            name,
            value: value as f64,
        })
    }
}

pub fn ensure_at_least(name: &'static str, value: usize, min: usize) -> Result<usize, ParamError> {
    if value >= min {
        Ok(value)
    } else {
        Err(ParamError::TooSmall { name, value, min })
    }
}
