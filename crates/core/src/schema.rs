//! Record validation.
//!
//! Every failing rule is collected; nothing short-circuits. Invalid records
//! are returned (not dropped) so downstream reporting can count them.

use regex::Regex;
use std::sync::LazyLock;
use validator::{Validate, ValidationErrors};

use crate::events::{RawEvent, RawUser, ValidatedEvent, ValidatedUser};
use crate::limits::EMAIL_PATTERN;

/// Compiled email regex (lazy initialization).
static EMAIL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(EMAIL_PATTERN).expect("invalid email pattern"));

fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

/// Whether `email` is a well-formed address.
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_REGEX.is_match(email.trim())
}

/// Flattens derive-level field errors into sorted rule codes.
fn field_limit_violations(result: Result<(), ValidationErrors>) -> Vec<String> {
    let Err(errors) = result else {
        return Vec::new();
    };

    let mut codes: Vec<String> = errors
        .field_errors()
        .into_values()
        .flat_map(|errs| errs.iter().map(|e| e.code.to_string()))
        .collect();
    codes.sort();
    codes.dedup();
    codes
}

/// Validates a raw event against the required-field and field-limit rules.
pub fn validate_event(event: RawEvent) -> ValidatedEvent {
    let mut violations = Vec::new();

    if is_blank(&event.event_id) {
        violations.push("missing_event_id".to_string());
    }
    if is_blank(&event.entity_id) {
        violations.push("missing_entity_id".to_string());
    }
    if is_blank(&event.event_type) {
        violations.push("missing_event_type".to_string());
    }
    if event.timestamp.is_none() {
        violations.push("missing_timestamp".to_string());
    }

    violations.extend(field_limit_violations(event.validate()));

    ValidatedEvent {
        is_valid: violations.is_empty(),
        validation_errors: violations,
        event,
    }
}

/// Validates a raw user record.
pub fn validate_user(user: RawUser) -> ValidatedUser {
    let mut violations = Vec::new();

    if is_blank(&user.entity_id) {
        violations.push("missing_entity_id".to_string());
    }
    match user.email.as_deref().map(str::trim) {
        None | Some("") => violations.push("missing_email".to_string()),
        Some(email) if !is_valid_email(email) => violations.push("invalid_email".to_string()),
        Some(_) => {}
    }
    if user.created_at.is_none() {
        violations.push("missing_created_at".to_string());
    }

    violations.extend(field_limit_violations(user.validate()));

    ValidatedUser {
        is_valid: violations.is_empty(),
        validation_errors: violations,
        user,
    }
}

/// Validates a batch of events, preserving input order.
pub fn validate_events(events: Vec<RawEvent>) -> Vec<ValidatedEvent> {
    events.into_iter().map(validate_event).collect()
}

/// Validates a batch of users, preserving input order.
pub fn validate_users(users: Vec<RawUser>) -> Vec<ValidatedUser> {
    users.into_iter().map(validate_user).collect()
}
