//! Input validation utilities

use regex::Regex;
use std::sync::OnceLock;

/// Validate username
pub fn validate_username(username: &str) -> Result<(), String> {
    if username.is_empty() {
        return Err("Username is required".to_string());
    }

    if username.len() < 3 {
        return Err("Username must be at least 3 characters long".to_string());
    }

    if username.len() > 32 {
        return Err("Username must be at most 32 characters long".to_string());
    }

    static USERNAME_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = USERNAME_REGEX
        .get_or_init(|| Regex::new(r"^[a-zA-Z0-9_]+$").expect("Failed to compile username regex"));

    if !regex.is_match(username) {
        return Err("Username can only contain letters, numbers, and underscores".to_string());
    }

    Ok(())
}

/// Validate email
pub fn validate_email(email: &str) -> Result<(), String> {
    if email.is_empty() {
        return Err("Email is required".to_string());
    }

    if email.len() > 254 {
        return Err("Email must be at most 254 characters long".to_string());
    }

    static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = EMAIL_REGEX.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .expect("Failed to compile email regex")
    });

    if !regex.is_match(email) {
        return Err("Invalid email format".to_string());
    }

    Ok(())
}

/// Validate a login identifier, which is either a username or an email
pub fn validate_login_identifier(identifier: &str) -> Result<(), String> {
    if identifier.contains('@') {
        validate_email(identifier)
    } else {
        validate_username(identifier)
    }
}

/// Login passwords are only checked for presence and length; strength rules
/// apply when a password is set, not when it is presented.
pub fn validate_login_password(password: &str) -> Result<(), String> {
    if password.is_empty() {
        return Err("Password is required".to_string());
    }

    if password.len() > 128 {
        return Err("Password must be at most 128 characters long".to_string());
    }

    Ok(())
}

/// Post-login redirect target: a local path, never another origin
pub fn is_local_redirect(target: &str) -> bool {
    target.starts_with('/') && !target.starts_with("//") && !target.contains('\\')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_rules() {
        assert!(validate_username("ada_l").is_ok());
        assert!(validate_username("ab").is_err());
        assert!(validate_username("ada lovelace").is_err());
        assert!(validate_username(&"a".repeat(33)).is_err());
    }

    #[test]
    fn test_email_rules() {
        assert!(validate_email("ada@example.com").is_ok());
        assert!(validate_email("ada@example").is_err());
        assert!(validate_email("").is_err());
    }

    #[test]
    fn test_login_identifier_accepts_either_form() {
        assert!(validate_login_identifier("ada_l").is_ok());
        assert!(validate_login_identifier("ada@example.com").is_ok());
        assert!(validate_login_identifier("ada@").is_err());
        assert!(validate_login_identifier("' OR 1=1 --").is_err());
    }

    #[test]
    fn test_login_password_presence() {
        assert!(validate_login_password("x").is_ok());
        assert!(validate_login_password("").is_err());
    }

    #[test]
    fn test_local_redirects() {
        assert!(is_local_redirect("/index.php?page=invoices"));
        assert!(!is_local_redirect("//evil.example/"));
        assert!(!is_local_redirect("https://evil.example/"));
        assert!(!is_local_redirect("/\\evil.example"));
    }
}
