//! Booking confirmation event and its wire codec.
//!
//! The upstream booking service publishes one [`BookingConfirmationEvent`] per confirmed
//! booking. Events are immutable facts: this system never persists or mutates them, and
//! each one is scoped to a single processing attempt.
//!
//! # Wire Format
//!
//! Events travel as JSON objects with camelCase keys:
//!
//! ```json
//! {
//!   "bookingId": "B-100",
//!   "userEmail": "a@x.com",
//!   "bookingSummary": "Sedan, 2 days",
//!   "timestamp": "2024-01-01T10:00:00Z"
//! }
//! ```
//!
//! - `timeStamp` is accepted as an alias of `timestamp` (the booking service emits it)
//! - Timestamps are written as RFC 3339 with as many fractional digits as needed, so
//!   nanosecond precision survives a round trip
//! - Numeric epoch seconds (`1704103200` or `1704103200.25`) are accepted on read
//!
//! # Example
//!
//! ```
//! use notifier_core::event::BookingConfirmationEvent;
//!
//! let payload = br#"{
//!     "bookingId": "B-100",
//!     "userEmail": "a@x.com",
//!     "bookingSummary": "Sedan, 2 days",
//!     "timestamp": "2024-01-01T10:00:00Z"
//! }"#;
//!
//! let event = BookingConfirmationEvent::decode(Some(payload)).unwrap();
//! assert_eq!(event.booking_id(), "B-100");
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while encoding or decoding event payloads.
///
/// Any decode error is permanent: the same bytes will never decode on a later attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The broker record carried no payload at all.
    #[error("Message has no payload")]
    EmptyPayload,

    /// The payload is not a booking confirmation.
    #[error("Malformed booking confirmation payload: {0}")]
    Malformed(String),

    /// The payload decoded but its booking id is empty.
    #[error("Booking confirmation has an empty booking id")]
    MissingBookingId,

    /// The event could not be serialized.
    #[error("Failed to encode booking confirmation: {0}")]
    Encode(String),
}

/// A confirmed booking, as published by the booking service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingConfirmationEvent {
    booking_id: String,
    user_email: String,
    booking_summary: String,
    #[serde(alias = "timeStamp", with = "instant")]
    timestamp: DateTime<Utc>,
}

impl BookingConfirmationEvent {
    /// Create a new event.
    #[must_use]
    pub fn new(
        booking_id: impl Into<String>,
        user_email: impl Into<String>,
        booking_summary: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            booking_id: booking_id.into(),
            user_email: user_email.into(),
            booking_summary: booking_summary.into(),
            timestamp,
        }
    }

    /// Correlation id of the booking.
    #[must_use]
    pub fn booking_id(&self) -> &str {
        &self.booking_id
    }

    /// Destination address for the confirmation.
    #[must_use]
    pub fn user_email(&self) -> &str {
        &self.user_email
    }

    /// Human-readable description of what was booked.
    #[must_use]
    pub fn booking_summary(&self) -> &str {
        &self.booking_summary
    }

    /// When the booking was placed. Used for display only.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Decode an event from a raw broker payload.
    ///
    /// # Errors
    ///
    /// - [`CodecError::EmptyPayload`] if there is no payload or it is empty
    /// - [`CodecError::Malformed`] if the bytes are not a booking confirmation
    /// - [`CodecError::MissingBookingId`] if the booking id is blank
    pub fn decode(payload: Option<&[u8]>) -> Result<Self, CodecError> {
        let bytes = match payload {
            Some(bytes) if !bytes.is_empty() => bytes,
            _ => return Err(CodecError::EmptyPayload),
        };

        let event: Self =
            serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed(e.to_string()))?;

        if event.booking_id.trim().is_empty() {
            return Err(CodecError::MissingBookingId);
        }

        Ok(event)
    }

    /// Encode the event into its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(|e| CodecError::Encode(e.to_string()))
    }
}

/// Serde adapter for instants: RFC 3339 on write, RFC 3339 or epoch seconds on read.
mod instant {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Seconds(i64),
        Fractional(f64),
    }

    pub(super) fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Raw::deserialize(deserializer)? {
            Raw::Text(text) => DateTime::parse_from_rfc3339(&text)
                .map(|parsed| parsed.with_timezone(&Utc))
                .map_err(|e| D::Error::custom(format!("invalid timestamp '{text}': {e}"))),
            Raw::Seconds(secs) => DateTime::from_timestamp(secs, 0)
                .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {secs}"))),
            Raw::Fractional(value) => {
                let secs = value.floor();
                let nanos = (((value - secs) * 1e9).round() as u32).min(999_999_999);
                DateTime::from_timestamp(secs as i64, nanos)
                    .ok_or_else(|| D::Error::custom(format!("timestamp out of range: {value}")))
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn sample() -> BookingConfirmationEvent {
        BookingConfirmationEvent::new(
            "B-100",
            "a@x.com",
            "Sedan, 2 days",
            Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(),
        )
    }

    #[test]
    fn decodes_camel_case_payload() {
        let payload = br#"{"bookingId":"B-100","userEmail":"a@x.com","bookingSummary":"Sedan, 2 days","timestamp":"2024-01-01T10:00:00Z"}"#;
        let event = BookingConfirmationEvent::decode(Some(payload)).unwrap();
        assert_eq!(event, sample());
    }

    #[test]
    fn accepts_time_stamp_alias() {
        let payload = br#"{"bookingId":"B-100","userEmail":"a@x.com","bookingSummary":"Sedan, 2 days","timeStamp":"2024-01-01T10:00:00Z"}"#;
        let event = BookingConfirmationEvent::decode(Some(payload)).unwrap();
        assert_eq!(event.timestamp(), sample().timestamp());
    }

    #[test]
    fn accepts_epoch_seconds() {
        let payload = br#"{"bookingId":"B-100","userEmail":"a@x.com","bookingSummary":"s","timeStamp":1704103200}"#;
        let event = BookingConfirmationEvent::decode(Some(payload)).unwrap();
        assert_eq!(event.timestamp(), sample().timestamp());

        let payload = br#"{"bookingId":"B-100","userEmail":"a@x.com","bookingSummary":"s","timeStamp":1704103200.5}"#;
        let event = BookingConfirmationEvent::decode(Some(payload)).unwrap();
        assert_eq!(event.timestamp().timestamp_subsec_millis(), 500);
    }

    #[test]
    fn missing_payload_is_rejected() {
        assert_eq!(BookingConfirmationEvent::decode(None), Err(CodecError::EmptyPayload));
        assert_eq!(BookingConfirmationEvent::decode(Some(b"")), Err(CodecError::EmptyPayload));
    }

    #[test]
    fn garbage_is_malformed() {
        let err = BookingConfirmationEvent::decode(Some(b"not json")).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));

        let err = BookingConfirmationEvent::decode(Some(br#"{"bookingId":"B-1"}"#)).unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }

    #[test]
    fn blank_booking_id_is_rejected() {
        let payload = br#"{"bookingId":"  ","userEmail":"a@x.com","bookingSummary":"s","timestamp":"2024-01-01T10:00:00Z"}"#;
        assert_eq!(
            BookingConfirmationEvent::decode(Some(payload)),
            Err(CodecError::MissingBookingId)
        );
    }

    #[test]
    fn encode_writes_rfc3339() {
        let bytes = sample().encode().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["timestamp"], "2024-01-01T10:00:00Z");
        assert_eq!(json["bookingId"], "B-100");
    }

    proptest! {
        #[test]
        fn timestamps_keep_nanosecond_precision(secs in 0i64..4_102_444_800, nanos in 0u32..1_000_000_000) {
            let ts = DateTime::from_timestamp(secs, nanos).unwrap();
            let event = BookingConfirmationEvent::new("B-1", "a@x.com", "s", ts);
            let decoded = BookingConfirmationEvent::decode(Some(&event.encode().unwrap())).unwrap();
            prop_assert_eq!(decoded.timestamp(), ts);
        }
    }
}
