//! # Validation
//!
//! Input checks run at the boundary of each operation, before any
//! storage access. Failures are never retried.

use crate::cart::BundleDiscountTier;
use crate::error::ValidationError;
use crate::MAX_PAGE_SIZE;

/// Result type for validation functions.
pub type ValidationResult<T> = Result<T, ValidationError>;

const MAX_REASON_LEN: usize = 500;
const MAX_REFERENCE_LEN: usize = 120;
const MAX_ID_LEN: usize = 64;

/// Validates an opaque identifier (user, item, staff, bundle).
pub fn validate_id(field: &str, value: &str) -> ValidationResult<()> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    if value.len() > MAX_ID_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_ID_LEN,
        });
    }
    if value.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "must not contain whitespace or control characters".to_string(),
        });
    }
    Ok(())
}

/// Validates a rejection reason. Required and non-blank.
///
/// Returns the trimmed reason.
pub fn validate_reason(reason: &str) -> ValidationResult<String> {
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Required {
            field: "reason".to_string(),
        });
    }
    if trimmed.chars().count() > MAX_REASON_LEN {
        return Err(ValidationError::TooLong {
            field: "reason".to_string(),
            max: MAX_REASON_LEN,
        });
    }
    Ok(trimmed.to_string())
}

/// Validates an optional payment reference note.
///
/// Blank notes are treated as absent.
pub fn validate_reference(reference: Option<&str>) -> ValidationResult<Option<String>> {
    let Some(trimmed) = reference.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(None);
    };
    if trimmed.chars().count() > MAX_REFERENCE_LEN {
        return Err(ValidationError::TooLong {
            field: "reference".to_string(),
            max: MAX_REFERENCE_LEN,
        });
    }
    Ok(Some(trimmed.to_string()))
}

/// Validates an item price.
pub fn validate_price(price_cents: i64) -> ValidationResult<()> {
    if price_cents < 0 {
        return Err(ValidationError::Negative {
            field: "price".to_string(),
        });
    }
    Ok(())
}

/// Validates pagination. Pages start at 1.
pub fn validate_page(page: u32, per_page: u32) -> ValidationResult<()> {
    if page == 0 {
        return Err(ValidationError::OutOfRange {
            field: "page".to_string(),
            min: 1,
            max: u32::MAX as i64,
        });
    }
    if per_page == 0 || per_page > MAX_PAGE_SIZE {
        return Err(ValidationError::OutOfRange {
            field: "per_page".to_string(),
            min: 1,
            max: MAX_PAGE_SIZE as i64,
        });
    }
    Ok(())
}

/// Validates a discount tier table.
pub fn validate_discount_tiers(tiers: &[BundleDiscountTier]) -> ValidationResult<()> {
    crate::cart::validate_tiers(tiers)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_id() {
        assert!(validate_id("user_id", "user-1").is_ok());
        assert!(validate_id("user_id", "").is_err());
        assert!(validate_id("user_id", "   ").is_err());
        assert!(validate_id("user_id", "user 1").is_err());
        assert!(validate_id("user_id", &"u".repeat(65)).is_err());
    }

    #[test]
    fn test_validate_reason() {
        assert_eq!(validate_reason("  no transfer found ").unwrap(), "no transfer found");
        assert!(matches!(
            validate_reason("   "),
            Err(ValidationError::Required { .. })
        ));
        assert!(validate_reason(&"r".repeat(501)).is_err());
    }

    #[test]
    fn test_validate_reference() {
        assert_eq!(validate_reference(None).unwrap(), None);
        assert_eq!(validate_reference(Some("  ")).unwrap(), None);
        assert_eq!(validate_reference(Some(" REF1 ")).unwrap(), Some("REF1".to_string()));
        assert!(validate_reference(Some(&"x".repeat(121))).is_err());
    }

    #[test]
    fn test_validate_page() {
        assert!(validate_page(1, 20).is_ok());
        assert!(validate_page(0, 20).is_err());
        assert!(validate_page(1, 0).is_err());
        assert!(validate_page(1, 101).is_err());
    }

    #[test]
    fn test_validate_price() {
        assert!(validate_price(0).is_ok());
        assert!(validate_price(9_900).is_ok());
        assert!(validate_price(-1).is_err());
    }
}
