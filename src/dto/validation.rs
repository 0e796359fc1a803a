//! Validation helpers for DTOs.

use validator::ValidationError;

const MAX_CODE_LENGTH: usize = 12;
const MAX_NAME_LENGTH: usize = 40;

/// Validates a join code: 4 to 12 ASCII letters or digits, case-insensitive.
///
/// # Examples
///
/// ```ignore
/// validate_game_code("STAR482") // Ok
/// validate_game_code("star482") // Ok, stored uppercase
/// validate_game_code("ST 48")   // Err - space
/// ```
pub fn validate_game_code(code: &str) -> Result<(), ValidationError> {
    if code.len() < 4 || code.len() > MAX_CODE_LENGTH {
        let mut err = ValidationError::new("game_code_length");
        err.message = Some(
            format!(
                "Game code must be 4 to {MAX_CODE_LENGTH} characters (got {})",
                code.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        let mut err = ValidationError::new("game_code_format");
        err.message = Some("Game code must contain only letters and digits".into());
        return Err(err);
    }

    Ok(())
}

/// Validates a GM PIN: no whitespace. The minimum length comes from the configuration.
pub fn validate_pin(pin: &str) -> Result<(), ValidationError> {
    if pin.is_empty() || pin.chars().any(char::is_whitespace) {
        let mut err = ValidationError::new("gm_pin_format");
        err.message = Some("GM PIN must not be empty or contain whitespace".into());
        return Err(err);
    }
    Ok(())
}

/// Validates a player or item name: not blank, at most 40 characters.
pub fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    if name.trim().is_empty() {
        let mut err = ValidationError::new("name_blank");
        err.message = Some("Name must not be blank".into());
        return Err(err);
    }
    if name.chars().count() > MAX_NAME_LENGTH {
        let mut err = ValidationError::new("name_length");
        err.message = Some(format!("Name must be at most {MAX_NAME_LENGTH} characters").into());
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_game_code_valid() {
        assert!(validate_game_code("STAR482").is_ok());
        assert!(validate_game_code("frost001").is_ok());
        assert!(validate_game_code("ABCD").is_ok());
    }

    #[test]
    fn test_validate_game_code_invalid() {
        assert!(validate_game_code("ABC").is_err()); // too short
        assert!(validate_game_code("ABCDEFGHIJKLM").is_err()); // too long
        assert!(validate_game_code("STAR-48").is_err()); // dash
        assert!(validate_game_code("ST R48").is_err()); // space
    }

    #[test]
    fn test_validate_pin() {
        assert!(validate_pin("1234").is_ok());
        assert!(validate_pin("").is_err());
        assert!(validate_pin("12 34").is_err());
    }

    #[test]
    fn test_validate_display_name() {
        assert!(validate_display_name("Grandma").is_ok());
        assert!(validate_display_name("   ").is_err());
        assert!(validate_display_name(&"x".repeat(41)).is_err());
    }
}
