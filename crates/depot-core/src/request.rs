//! Aggregated request types, statuses and availability results.

use crate::Checksum;
use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// Kind of physical operation an aggregated request asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    Storage,
    Deletion,
    Availability,
    Copy,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Storage => "storage",
            Self::Deletion => "deletion",
            Self::Availability => "availability",
            Self::Copy => "copy",
        }
    }

    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "storage" => Ok(Self::Storage),
            "deletion" => Ok(Self::Deletion),
            "availability" => Ok(Self::Availability),
            "copy" => Ok(Self::Copy),
            other => Err(crate::Error::InvalidRequestType(other.to_string())),
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of an aggregated request.
///
/// At most one non-terminal request exists per
/// `(checksum, storage, request type)`; concurrent submissions merge into
/// that request's owner set instead of creating duplicates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Waiting for the dispatcher to issue the backend operation.
    ToHandle,
    /// The prerequisite file reference already existed at ingress; the
    /// check sweep finalizes these without a backend call.
    Granted,
    /// The backend operation returned a terminal result.
    Handled,
    /// The backend operation failed; eligible for explicit retry.
    Error,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ToHandle => "to_handle",
            Self::Granted => "granted",
            Self::Handled => "handled",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "to_handle" => Ok(Self::ToHandle),
            "granted" => Ok(Self::Granted),
            "handled" => Ok(Self::Handled),
            "error" => Ok(Self::Error),
            other => Err(crate::Error::InvalidRequestStatus(other.to_string())),
        }
    }

    /// Terminal requests are eligible for retention-based deletion.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Handled | Self::Error)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Availability of one checksum, as resolved across storage tiers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum Availability {
    Available {
        /// When the file stops being directly accessible, if time-limited
        /// (restored nearline copies expire; online copies do not).
        #[serde(skip_serializing_if = "Option::is_none")]
        expiration: Option<OffsetDateTime>,
    },
    NotAvailable,
}

/// Availability resolution result for one input checksum.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityStatus {
    pub checksum: Checksum,
    #[serde(flatten)]
    pub availability: Availability,
}

impl AvailabilityStatus {
    pub fn available(checksum: Checksum, expiration: Option<OffsetDateTime>) -> Self {
        Self {
            checksum,
            availability: Availability::Available { expiration },
        }
    }

    pub fn not_available(checksum: Checksum) -> Self {
        Self {
            checksum,
            availability: Availability::NotAvailable,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self.availability, Availability::Available { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            RequestStatus::ToHandle,
            RequestStatus::Granted,
            RequestStatus::Handled,
            RequestStatus::Error,
        ] {
            assert_eq!(RequestStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(RequestStatus::parse("pending").is_err());
    }

    #[test]
    fn test_availability_status_serialization() {
        let checksum = crate::Checksum::compute(b"data");
        let available = AvailabilityStatus::available(checksum.clone(), None);
        let json = serde_json::to_value(&available).unwrap();
        assert_eq!(json["status"], "available");
        assert_eq!(json["checksum"], checksum.as_str());
        assert!(json.get("expiration").is_none());

        let not_available = AvailabilityStatus::not_available(checksum);
        let json = serde_json::to_value(&not_available).unwrap();
        assert_eq!(json["status"], "not_available");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(RequestStatus::Handled.is_terminal());
        assert!(RequestStatus::Error.is_terminal());
        assert!(!RequestStatus::ToHandle.is_terminal());
        assert!(!RequestStatus::Granted.is_terminal());
    }
}
