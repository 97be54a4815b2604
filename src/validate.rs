// SPDX-License-Identifier: MPL-2.0

//! Form input limits. Lengths are user-perceived characters (grapheme
//! clusters), so an emoji with modifiers counts once.

use thiserror::Error;
use unicode_segmentation::UnicodeSegmentation;

pub const TRIBE_NAME_MAX: usize = 50;
pub const TRIBE_DESCRIPTION_MAX: usize = 500;
pub const TOPIC_TITLE_MAX: usize = 200;
pub const TOPIC_CONTENT_MAX: usize = 2000;
pub const COMPETITION_TITLE_MAX: usize = 120;
pub const COMPETITION_DESCRIPTION_MAX: usize = 800;

/// Minimum [`password_strength`] score accepted at sign-up.
pub const MIN_PASSWORD_SCORE: u8 = 3;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} is required")]
    Required(&'static str),
    #[error("{field} must be at most {max} characters (got {len})")]
    TooLong {
        field: &'static str,
        max: usize,
        len: usize,
    },
    #[error("password is too weak ({0})")]
    WeakPassword(&'static str),
    #[error("{field} is invalid: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

pub fn char_count(text: &str) -> usize {
    text.graphemes(true).count()
}

fn required(field: &'static str, text: &str, max: usize) -> Result<(), ValidationError> {
    if text.trim().is_empty() {
        return Err(ValidationError::Required(field));
    }
    optional(field, text, max)
}

fn optional(field: &'static str, text: &str, max: usize) -> Result<(), ValidationError> {
    let len = char_count(text);
    if len > max {
        return Err(ValidationError::TooLong { field, max, len });
    }
    Ok(())
}

pub fn tribe(name: &str, description: &str) -> Result<(), ValidationError> {
    required("tribe name", name, TRIBE_NAME_MAX)?;
    optional("tribe description", description, TRIBE_DESCRIPTION_MAX)
}

pub fn topic(title: &str, content: &str) -> Result<(), ValidationError> {
    required("topic title", title, TOPIC_TITLE_MAX)?;
    required("topic content", content, TOPIC_CONTENT_MAX)
}

pub fn reply(content: &str) -> Result<(), ValidationError> {
    required("reply", content, TOPIC_CONTENT_MAX)
}

pub fn competition(title: &str, description: &str) -> Result<(), ValidationError> {
    required("competition title", title, COMPETITION_TITLE_MAX)?;
    optional(
        "competition description",
        description,
        COMPETITION_DESCRIPTION_MAX,
    )
}

pub fn post(content: &str) -> Result<(), ValidationError> {
    if content.trim().is_empty() {
        return Err(ValidationError::Required("post content"));
    }
    Ok(())
}

/// Score 0..=4: one point each for length >= 8, an uppercase letter, a digit
/// and a character outside `[A-Za-z0-9]`.
pub fn password_strength(password: &str) -> u8 {
    let checks = [
        password.chars().count() >= 8,
        password.chars().any(|c| c.is_ascii_uppercase()),
        password.chars().any(|c| c.is_ascii_digit()),
        password.chars().any(|c| !c.is_ascii_alphanumeric()),
    ];
    checks.iter().filter(|passed| **passed).count() as u8
}

pub fn strength_label(score: u8) -> &'static str {
    match score {
        0 | 1 => "Weak",
        2 => "Fair",
        3 => "Good",
        _ => "Strong",
    }
}

pub fn sign_up(
    email: &str,
    password: &str,
    username: &str,
    full_name: &str,
) -> Result<(), ValidationError> {
    if full_name.trim().is_empty() {
        return Err(ValidationError::Required("full name"));
    }
    if username.trim().is_empty() {
        return Err(ValidationError::Required("username"));
    }
    if username.chars().any(char::is_whitespace) {
        return Err(ValidationError::Invalid {
            field: "username",
            reason: "must not contain spaces",
        });
    }
    if email.trim().is_empty() {
        return Err(ValidationError::Required("email"));
    }
    if !email.contains('@') {
        return Err(ValidationError::Invalid {
            field: "email",
            reason: "must contain @",
        });
    }
    if password.is_empty() {
        return Err(ValidationError::Required("password"));
    }

    let score = password_strength(password);
    if score < MIN_PASSWORD_SCORE {
        return Err(ValidationError::WeakPassword(strength_label(score)));
    }
    Ok(())
}
