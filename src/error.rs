//! Error types shared by the HTTP surface, the capture engine and subscriber delivery.
//!
//! `MonitorError` is the single error type returned by every HTTP handler.
//! It serializes as `{ "kind": "...", "message": "..." }` so dashboard clients can
//! programmatically distinguish error categories.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::ser::SerializeStruct;

/// Application-level error returned by the query surface.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// A device identity that has never been observed.
    #[error("Device not found: {0}")]
    NotFound(String),

    /// Errors from the packet capture engine.
    #[error("{0}")]
    Capture(String),

    /// I/O and OS-level errors (sockets, interface handles).
    #[error("{0}")]
    Io(String),

    /// Invalid or missing user input.
    #[error("{0}")]
    InvalidInput(String),

    /// Snapshot or record could not be encoded.
    #[error("{0}")]
    Serialization(String),
}

impl MonitorError {
    /// Returns the error kind as a string matching the variant name.
    pub fn kind(&self) -> &'static str {
        match self {
            MonitorError::NotFound(_) => "NotFound",
            MonitorError::Capture(_) => "Capture",
            MonitorError::Io(_) => "Io",
            MonitorError::InvalidInput(_) => "InvalidInput",
            MonitorError::Serialization(_) => "Serialization",
        }
    }

    /// HTTP status used when this error reaches a client.
    pub fn status(&self) -> StatusCode {
        match self {
            MonitorError::NotFound(_) => StatusCode::NOT_FOUND,
            MonitorError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            MonitorError::Capture(_) | MonitorError::Io(_) => StatusCode::SERVICE_UNAVAILABLE,
            MonitorError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Custom Serialize: produces `{ "kind": "Variant", "message": "..." }`.
impl serde::Serialize for MonitorError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut s = serializer.serialize_struct("MonitorError", 2)?;
        s.serialize_field("kind", self.kind())?;
        s.serialize_field("message", &self.to_string())?;
        s.end()
    }
}

impl IntoResponse for MonitorError {
    fn into_response(self) -> Response {
        (self.status(), Json(self)).into_response()
    }
}

// ---- From implementations for ergonomic error conversion ----

impl From<std::io::Error> for MonitorError {
    fn from(err: std::io::Error) -> Self {
        MonitorError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for MonitorError {
    fn from(err: serde_json::Error) -> Self {
        MonitorError::Serialization(err.to_string())
    }
}

impl From<CaptureError> for MonitorError {
    fn from(err: CaptureError) -> Self {
        MonitorError::Capture(err.to_string())
    }
}

/// Failures of the capture source. Any of these ends ingestion.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("no network interfaces found")]
    NoInterfaces,

    #[error("network interface not found: {0}")]
    NoSuchInterface(String),

    #[error("failed to open capture on {interface}: {reason}")]
    Open { interface: String, reason: String },

    #[error("unsupported datalink channel type on {0}")]
    UnsupportedChannel(String),

    #[error("capture read failed: {0}")]
    Read(String),
}

/// Failure to push one payload to one subscriber. Never propagated past that subscriber.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("connection closed")]
    Closed,

    #[error("delivery timed out after {0:?}")]
    TimedOut(Duration),

    #[error("transport error: {0}")]
    Transport(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_returns_correct_variant_name() {
        assert_eq!(MonitorError::NotFound("aa".into()).kind(), "NotFound");
        assert_eq!(MonitorError::Capture("cap fail".into()).kind(), "Capture");
        assert_eq!(MonitorError::Io("io fail".into()).kind(), "Io");
        assert_eq!(
            MonitorError::InvalidInput("bad input".into()).kind(),
            "InvalidInput"
        );
        assert_eq!(
            MonitorError::Serialization("bad json".into()).kind(),
            "Serialization"
        );
    }

    #[test]
    fn test_not_found_mentions_identity() {
        let err = MonitorError::NotFound("aa:bb:cc:dd:ee:ff".into());
        assert_eq!(err.to_string(), "Device not found: aa:bb:cc:dd:ee:ff");
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_error_serializes_as_kind_and_message() {
        let err = MonitorError::Capture("interface went down".into());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "Capture");
        assert_eq!(json["message"], "interface went down");
    }

    #[test]
    fn test_from_capture_error_produces_capture_variant() {
        let err: MonitorError = CaptureError::NoSuchInterface("eth9".into()).into();
        assert_eq!(err.kind(), "Capture");
        assert!(err.to_string().contains("eth9"));
    }

    #[test]
    fn test_from_io_error_produces_io_variant() {
        let io_err = std::io::Error::new(std::io::ErrorKind::AddrInUse, "port taken");
        let err: MonitorError = io_err.into();
        assert_eq!(err.kind(), "Io");
        assert!(err.to_string().contains("port taken"));
    }

    #[test]
    fn test_delivery_timeout_display() {
        let err = DeliveryError::TimedOut(Duration::from_millis(250));
        assert_eq!(err.to_string(), "delivery timed out after 250ms");
    }
}
