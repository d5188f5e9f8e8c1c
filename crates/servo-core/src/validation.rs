//! # Validation Module
//!
//! Operator input parsing for the panel.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Input surface                                                │
//! │  └── Slider min/max attributes (advisory only)                         │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  ├── Preset names (trimmed, non-empty, bounded)                        │
//! │  └── Typed numbers (finite f64)                                        │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: CommandDispatcher                                            │
//! │  └── Per-actuator bounds (clamp / reject / advisory)                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Validation never mutates state. A failed parse leaves the store exactly as
//! it was.

use crate::error::ValidationError;
use crate::MAX_PRESET_NAME_LEN;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validates a preset name and returns it trimmed.
///
/// ## Example
/// ```rust
/// use servo_core::validation::validate_preset_name;
///
/// assert_eq!(validate_preset_name("  Greeting ").unwrap(), "Greeting");
/// assert!(validate_preset_name("   ").is_err());
/// ```
pub fn validate_preset_name(name: &str) -> ValidationResult<String> {
    let name = name.trim();

    if name.is_empty() {
        return Err(ValidationError::Required {
            field: "preset name".to_string(),
        });
    }

    if name.chars().count() > MAX_PRESET_NAME_LEN {
        return Err(ValidationError::TooLong {
            field: "preset name".to_string(),
            max: MAX_PRESET_NAME_LEN,
        });
    }

    Ok(name.to_string())
}

/// Parses a signed fine-tune delta typed by the operator.
///
/// Accepts anything `f64` accepts after trimming ("5", "-2.5", "+10").
/// Non-finite results are rejected.
pub fn parse_delta(input: &str) -> ValidationResult<f64> {
    parse_number("delta", input)
}

/// Parses an absolute angle typed into a numeric field.
pub fn parse_angle(input: &str) -> ValidationResult<f64> {
    parse_number("angle", input)
}

/// Rejects NaN and infinities.
pub fn ensure_finite(field: &str, value: f64) -> ValidationResult<f64> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ValidationError::NotFinite {
            field: field.to_string(),
        })
    }
}

fn parse_number(field: &str, input: &str) -> ValidationResult<f64> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    let value: f64 = trimmed.parse().map_err(|_| ValidationError::InvalidFormat {
        field: field.to_string(),
        reason: format!("'{}' is not a number", trimmed),
    })?;

    ensure_finite(field, value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_preset_name() {
        assert_eq!(validate_preset_name("Wave Ready").unwrap(), "Wave Ready");
        assert_eq!(validate_preset_name("\tRest\n").unwrap(), "Rest");

        assert!(matches!(
            validate_preset_name(""),
            Err(ValidationError::Required { .. })
        ));
        assert!(matches!(
            validate_preset_name(&"x".repeat(MAX_PRESET_NAME_LEN + 1)),
            Err(ValidationError::TooLong { .. })
        ));
        // Multi-byte names are measured in characters
        assert!(validate_preset_name(&"ä".repeat(MAX_PRESET_NAME_LEN)).is_ok());
    }

    #[test]
    fn test_parse_delta() {
        assert_eq!(parse_delta("5").unwrap(), 5.0);
        assert_eq!(parse_delta(" -2.5 ").unwrap(), -2.5);
        assert_eq!(parse_delta("+10").unwrap(), 10.0);

        assert!(matches!(
            parse_delta("abc"),
            Err(ValidationError::InvalidFormat { .. })
        ));
        assert!(matches!(
            parse_delta(""),
            Err(ValidationError::Required { .. })
        ));
        assert!(matches!(
            parse_delta("inf"),
            Err(ValidationError::NotFinite { .. })
        ));
        assert!(parse_delta("NaN").is_err());
    }

    #[test]
    fn test_parse_angle() {
        assert_eq!(parse_angle("45").unwrap(), 45.0);
        assert!(parse_angle("forty-five").is_err());
    }
}
