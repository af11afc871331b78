//! Input validation for the interactive menu.
//!
//! Every validator takes the raw line the user typed and either returns the
//! parsed value or a [`ValidationError`] whose message is shown before the
//! prompt repeats.

use thiserror::Error;

use crate::task::{validate_field, TaskError};

/// Maximum allowed length for user names.
pub const MAX_NAME_LENGTH: usize = 64;

/// Errors for rejected menu input. The message is shown to the user.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Name cannot be empty")]
    EmptyName,

    #[error("Name must be 64 characters or less")]
    NameTooLong,

    #[error("Name can only contain letters, numbers, hyphens, and underscores")]
    InvalidNameCharacters,

    #[error("Please enter a number")]
    NotANumber,

    #[error("Please enter a number between {min} and {max}")]
    OutOfRange { min: usize, max: usize },

    #[error("{0}")]
    Field(#[from] TaskError),
}

/// Validates a user name.
///
/// The name becomes part of file names, so it must be non-empty after
/// trimming, at most 64 characters, and contain only ASCII letters, digits,
/// hyphens and underscores.
///
/// # Examples
///
/// ```
/// use taskwatch::cli::validate::validate_name;
///
/// assert_eq!(validate_name("  alice ").unwrap(), "alice");
/// assert!(validate_name("../etc").is_err());
/// assert!(validate_name("two words").is_err());
/// ```
pub fn validate_name(input: &str) -> Result<String, ValidationError> {
    let trimmed = input.trim();

    if trimmed.is_empty() {
        return Err(ValidationError::EmptyName);
    }

    if trimmed.len() > MAX_NAME_LENGTH {
        return Err(ValidationError::NameTooLong);
    }

    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ValidationError::InvalidNameCharacters);
    }

    Ok(trimmed.to_string())
}

/// Parses a menu choice in `0..=max`.
pub fn validate_choice(input: &str, max: usize) -> Result<usize, ValidationError> {
    let choice = input
        .trim()
        .parse::<usize>()
        .map_err(|_| ValidationError::NotANumber)?;

    if choice > max {
        return Err(ValidationError::OutOfRange { min: 0, max });
    }
    Ok(choice)
}

/// Parses a 1-based task number for a list of `len` tasks.
///
/// `0` means "go back" and yields `None`; `n` yields `Some(n - 1)`.
pub fn validate_index(input: &str, len: usize) -> Result<Option<usize>, ValidationError> {
    match validate_choice(input, len)? {
        0 => Ok(None),
        n => Ok(Some(n - 1)),
    }
}

/// Validates a task title.
pub fn validate_title(input: &str) -> Result<String, ValidationError> {
    let title = input.trim();
    validate_field("title", title)?;
    Ok(title.to_string())
}

/// Validates a task description.
pub fn validate_description(input: &str) -> Result<String, ValidationError> {
    let description = input.trim();
    validate_field("description", description)?;
    Ok(description.to_string())
}
