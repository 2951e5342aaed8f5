//! Structured audit events for license lifecycle and validation outcomes.

use std::fmt;

use tracing::{info, info_span, warn};

/// License events worth an audit line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LicenseEvent {
    /// License was created
    Created,
    /// Administrative flag set back to active
    Activated,
    /// Administrative flag set to inactive
    Deactivated,
    /// Validation succeeded and consumed quota
    Validated,
    /// Validation was rejected
    ValidationFailed,
    /// Validation was rejected because today's quota is used up
    QuotaExhausted,
}

impl fmt::Display for LicenseEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LicenseEvent::Created => "created",
            LicenseEvent::Activated => "activated",
            LicenseEvent::Deactivated => "deactivated",
            LicenseEvent::Validated => "validated",
            LicenseEvent::ValidationFailed => "validation_failed",
            LicenseEvent::QuotaExhausted => "quota_exhausted",
        };
        write!(f, "{}", s)
    }
}

/// Log a license event.
///
/// Rejections are logged at `warn` with their internal reason; the reason
/// never leaves the server.
pub fn log_license_event(event: LicenseEvent, license_key: &str, details: Option<&str>) {
    let span = info_span!(
        "license_event",
        event = %event,
        license_key = %license_key,
    );
    let _enter = span.enter();

    match event {
        LicenseEvent::ValidationFailed | LicenseEvent::QuotaExhausted => {
            if let Some(d) = details {
                warn!(reason = %d, "License event occurred");
            } else {
                warn!("License event occurred");
            }
        }
        _ => {
            if let Some(d) = details {
                info!(details = %d, "License event occurred");
            } else {
                info!("License event occurred");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_are_snake_case() {
        assert_eq!(LicenseEvent::ValidationFailed.to_string(), "validation_failed");
        assert_eq!(LicenseEvent::QuotaExhausted.to_string(), "quota_exhausted");
        assert_eq!(LicenseEvent::Created.to_string(), "created");
    }
}
