//! The tagged event variant (spec §3) and its decoder (spec §4.2).

use chrono::{DateTime, Utc};
use log::warn;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Register {
        name: String,
    },
    Referral {
        referred_by: String,
        user: String,
    },
    AddFriend {
        user1_name: String,
        user2_name: String,
    },
    Unfriend {
        user1_name: String,
        user2_name: String,
    },
}

#[derive(Debug, Deserialize)]
struct RegisterPayload {
    name: String,
    #[serde(default)]
    #[allow(dead_code)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct ReferralPayload {
    #[serde(rename = "referredBy")]
    referred_by: String,
    user: String,
    #[serde(default)]
    #[allow(dead_code)]
    created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct FriendPayload {
    user1_name: String,
    user2_name: String,
    #[serde(default)]
    #[allow(dead_code)]
    created_at: Option<DateTime<Utc>>,
}

/// Parses a raw queue payload into an `Event`. Pure and stateless.
/// Malformed or unrecognized payloads return `None`; the caller is
/// responsible for logging and continuing (spec §4.2, §7).
pub fn decode(raw: &[u8]) -> Option<Event> {
    let value: Value = match serde_json::from_slice(raw) {
        Ok(value) => value,
        Err(err) => {
            warn!("dropping malformed event payload (not valid JSON): {err}");
            return None;
        }
    };

    let Some(kind) = value.get("type").and_then(Value::as_str) else {
        warn!("dropping event payload with missing or non-string \"type\" field");
        return None;
    };

    match kind {
        "register" => match serde_json::from_value::<RegisterPayload>(value) {
            Ok(payload) => Some(Event::Register { name: payload.name }),
            Err(err) => {
                warn!("dropping malformed register event: {err}");
                None
            }
        },
        "referral" => match serde_json::from_value::<ReferralPayload>(value) {
            Ok(payload) => Some(Event::Referral {
                referred_by: payload.referred_by,
                user: payload.user,
            }),
            Err(err) => {
                warn!("dropping malformed referral event: {err}");
                None
            }
        },
        "addfriend" => match serde_json::from_value::<FriendPayload>(value) {
            Ok(payload) => Some(Event::AddFriend {
                user1_name: payload.user1_name,
                user2_name: payload.user2_name,
            }),
            Err(err) => {
                warn!("dropping malformed addfriend event: {err}");
                None
            }
        },
        "unfriend" => match serde_json::from_value::<FriendPayload>(value) {
            Ok(payload) => Some(Event::Unfriend {
                user1_name: payload.user1_name,
                user2_name: payload.user2_name,
            }),
            Err(err) => {
                warn!("dropping malformed unfriend event: {err}");
                None
            }
        },
        other => {
            warn!("dropping event payload with unknown type {other:?}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_register() {
        let raw = br#"{"type":"register","name":"alice","created_at":"2024-01-01T12:00:00.000Z"}"#;
        assert_eq!(decode(raw), Some(Event::Register { name: "alice".into() }));
    }

    #[test]
    fn decodes_referral_with_camelcase_field() {
        let raw = br#"{"type":"referral","referredBy":"alice","user":"carol","created_at":"2024-01-01T12:00:00.000Z"}"#;
        assert_eq!(
            decode(raw),
            Some(Event::Referral {
                referred_by: "alice".into(),
                user: "carol".into(),
            })
        );
    }

    #[test]
    fn decodes_addfriend_and_unfriend() {
        let add = br#"{"type":"addfriend","user1_name":"a","user2_name":"b","created_at":"2024-01-01T12:00:00.000Z"}"#;
        assert_eq!(
            decode(add),
            Some(Event::AddFriend { user1_name: "a".into(), user2_name: "b".into() })
        );

        let unfriend = br#"{"type":"unfriend","user1_name":"a","user2_name":"b","created_at":"2024-01-01T12:00:00.000Z"}"#;
        assert_eq!(
            decode(unfriend),
            Some(Event::Unfriend { user1_name: "a".into(), user2_name: "b".into() })
        );
    }

    #[test]
    fn drops_unknown_type() {
        let raw = br#"{"type":"garbage"}"#;
        assert_eq!(decode(raw), None);
    }

    #[test]
    fn drops_invalid_json() {
        assert_eq!(decode(b"not json"), None);
    }

    #[test]
    fn drops_missing_required_field() {
        let raw = br#"{"type":"register"}"#;
        assert_eq!(decode(raw), None);
    }
}
