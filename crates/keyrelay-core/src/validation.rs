//! # Validation Module
//!
//! Rules for the physical presence-check input: card UIDs coming off the
//! reader and PINs coming off the keypad.
//!
//! ## Usage
//! ```rust
//! use keyrelay_core::validation::{format_card_uid, validate_card_uid, validate_pin};
//!
//! let uid = format_card_uid(&[0x04, 0xa1, 0xb2, 0xc3]);
//! assert_eq!(uid, "04A1B2C3");
//! validate_card_uid(&uid).unwrap();
//! validate_pin("1234").unwrap();
//! ```

use std::fmt::Write;

use crate::error::ValidationError;
use crate::{MAX_CARD_UID_BYTES, PIN_LENGTH};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Formats raw UID bytes the way the reader publishes them: uppercase hex,
/// two characters per byte, no separators.
pub fn format_card_uid(uid: &[u8]) -> String {
    uid.iter().fold(String::with_capacity(uid.len() * 2), |mut out, byte| {
        let _ = write!(out, "{:02X}", byte);
        out
    })
}

/// Validates a card UID string.
///
/// ## Rules
/// - Must not be empty
/// - Uppercase hex digits only, even length
/// - At most [`MAX_CARD_UID_BYTES`] bytes
pub fn validate_card_uid(uid: &str) -> ValidationResult<()> {
    if uid.is_empty() {
        return Err(ValidationError::Required {
            field: "card_uid".to_string(),
        });
    }

    if uid.len() > MAX_CARD_UID_BYTES * 2 {
        return Err(ValidationError::TooLong {
            field: "card_uid".to_string(),
            max: MAX_CARD_UID_BYTES * 2,
        });
    }

    if uid.len() % 2 != 0 || !uid.chars().all(|c| matches!(c, '0'..='9' | 'A'..='F')) {
        return Err(ValidationError::InvalidFormat {
            field: "card_uid".to_string(),
            reason: "must be uppercase hex bytes".to_string(),
        });
    }

    Ok(())
}

/// Validates a keypad PIN: exactly [`PIN_LENGTH`] ASCII digits.
pub fn validate_pin(pin: &str) -> ValidationResult<()> {
    if pin.is_empty() {
        return Err(ValidationError::Required {
            field: "pin".to_string(),
        });
    }

    if pin.len() != PIN_LENGTH {
        return Err(ValidationError::WrongLength {
            field: "pin".to_string(),
            expected: PIN_LENGTH,
            actual: pin.chars().count(),
        });
    }

    if !pin.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::InvalidFormat {
            field: "pin".to_string(),
            reason: "must contain only digits".to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_card_uid() {
        assert_eq!(format_card_uid(&[0x04, 0xa1, 0x0b, 0xff]), "04A10BFF");
        assert_eq!(format_card_uid(&[]), "");
    }

    #[test]
    fn test_validate_card_uid() {
        assert!(validate_card_uid("04A1B2C3").is_ok());
        assert!(validate_card_uid("04A1B2C3D4E5F6").is_ok());
        assert!(validate_card_uid("").is_err());
        assert!(validate_card_uid("04a1b2c3").is_err());
        assert!(validate_card_uid("04A1B").is_err());
        assert!(validate_card_uid(&"AB".repeat(11)).is_err());
    }

    #[test]
    fn test_validate_pin() {
        assert!(validate_pin("1234").is_ok());
        assert!(validate_pin("").is_err());
        assert!(matches!(
            validate_pin("123"),
            Err(ValidationError::WrongLength { expected: 4, actual: 3, .. })
        ));
        assert!(validate_pin("12a4").is_err());
    }
}
