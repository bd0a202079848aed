//! Wire protocol: `<kind>#<payload>` text frames.
//!
//! Decoding never fails. Any text is a valid frame, and a kind the server
//! does not recognize is simply relayed to the other participants. Parsing a
//! payload into a typed shape is a separate, fallible step.

use std::sync::Arc;

use serde::{Deserialize, Serialize, Serializer};

use crate::clock::{MAX_BPM, MIN_BPM, is_valid_bpm};
use crate::errors::{Result, ThumpError};
use crate::ids::ClientId;
use crate::presence::PresenceProfile;

/// Separator between kind and payload.
pub const HEADER_END: char = '#';

/// Server → client, once at connect: `{originMs}`.
pub const CLOCK_ORIGIN: &str = "clock/origin";
/// Server → client, once at connect: `{clientId}`.
pub const CLIENT_ID: &str = "client/id";
/// Both directions: `{bpm}`.
pub const CLOCK_UPDATE: &str = "clock/update";
/// Request with empty payload, response `{nowMs}`.
pub const CLOCK_NOW: &str = "clock/now";
/// Client → server: a full presence profile.
pub const USER_UPDATE: &str = "user/update";
/// Server → clients: every current presence profile.
pub const USERS_ALL: &str = "user/all";
/// Client → other clients: application defined, relayed verbatim.
pub const USER_EVENT: &str = "user/event";

/// An encoded frame as held in mailboxes. Cheap to clone for fan-out.
pub type RawFrame = Arc<str>;

/// Kinds the server knows about. Everything else is [`FrameKind::Other`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameKind<'a> {
    /// `clock/origin`
    ClockOrigin,
    /// `client/id`
    ClientId,
    /// `clock/update`
    ClockUpdate,
    /// `clock/now`
    ClockNow,
    /// `user/update`
    UserUpdate,
    /// `user/all`
    UsersAll,
    /// `user/event`
    UserEvent,
    /// Any other token, including the empty string.
    Other(&'a str),
}

impl<'a> FrameKind<'a> {
    /// Classify a kind token.
    pub fn parse(token: &'a str) -> Self {
        match token {
            CLOCK_ORIGIN => Self::ClockOrigin,
            CLIENT_ID => Self::ClientId,
            CLOCK_UPDATE => Self::ClockUpdate,
            CLOCK_NOW => Self::ClockNow,
            USER_UPDATE => Self::UserUpdate,
            USERS_ALL => Self::UsersAll,
            USER_EVENT => Self::UserEvent,
            other => Self::Other(other),
        }
    }

}

/// A decoded frame borrowing from the received text.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Everything before the first `#`.
    pub kind: &'a str,
    /// Everything after the first `#` (may itself contain `#`).
    pub payload: &'a str,
}

impl<'a> Frame<'a> {
    /// Split `text` on the first `#`. Without a `#` the whole text is the
    /// kind and the payload is empty.
    pub fn decode(text: &'a str) -> Self {
        match text.split_once(HEADER_END) {
            Some((kind, payload)) => Self { kind, payload },
            None => Self {
                kind: text,
                payload: "",
            },
        }
    }

    /// Classified kind.
    pub fn frame_kind(&self) -> FrameKind<'a> {
        FrameKind::parse(self.kind)
    }

    /// Re-encode as `kind#payload`.
    pub fn encode(&self) -> String {
        encode(self.kind, self.payload)
    }
}

/// Exact concatenation `kind + "#" + payload`.
pub fn encode(kind: &str, payload: &str) -> String {
    let mut out = String::with_capacity(kind.len() + 1 + payload.len());
    out.push_str(kind);
    out.push(HEADER_END);
    out.push_str(payload);
    out
}

/// Serialize `payload` as JSON and frame it under `kind`.
pub fn encode_json<T: Serialize + ?Sized>(kind: &str, payload: &T) -> Result<String> {
    let body = serde_json::to_string(payload).map_err(|e| ThumpError::Encode {
        kind: kind.to_owned(),
        reason: e.to_string(),
    })?;
    Ok(encode(kind, &body))
}

/// Serialize integral floats as JSON integers (`95`, not `95.0`).
///
/// Clients compare these payloads textually in a few places, so server
/// output keeps the compact form.
#[allow(clippy::cast_possible_truncation, clippy::trivially_copy_pass_by_ref)]
pub fn json_number<S: Serializer>(
    value: &f64,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    const MAX_EXACT: f64 = 9_007_199_254_740_992.0;
    if value.is_finite() && value.fract() == 0.0 && value.abs() <= MAX_EXACT {
        serializer.serialize_i64(*value as i64)
    } else {
        serializer.serialize_f64(*value)
    }
}

// ── Payload shapes ─────────────────────────────────────────────────────────

/// Tempo settings carried by `clock/update`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClockOptions {
    /// Beats per minute, within [`MIN_BPM`]..=[`MAX_BPM`].
    #[serde(serialize_with = "json_number")]
    pub bpm: f64,
}

/// Response to `clock/now`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockNowResponse {
    /// Milliseconds since the shared origin.
    pub now_ms: f64,
}

/// Payload of `clock/origin`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockOriginResponse {
    /// Absolute UNIX-epoch milliseconds of the shared zero point.
    pub origin_ms: f64,
}

/// Payload of `client/id`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientIdResponse {
    /// The id assigned to the receiving connection.
    pub client_id: ClientId,
}

/// Parse a `clock/update` payload.
///
/// Rejects invalid JSON and tempos outside [`MIN_BPM`]..=[`MAX_BPM`].
pub fn parse_clock_update(payload: &str) -> Result<ClockOptions> {
    let opts: ClockOptions =
        serde_json::from_str(payload).map_err(|e| ThumpError::malformed(CLOCK_UPDATE, e))?;
    check_bpm(opts.bpm)?;
    Ok(opts)
}

/// `MalformedPayload` unless `bpm` is an accepted tempo.
pub fn check_bpm(bpm: f64) -> Result<()> {
    if is_valid_bpm(bpm) {
        Ok(())
    } else {
        Err(ThumpError::malformed(
            CLOCK_UPDATE,
            format!("bpm must be between {MIN_BPM} and {MAX_BPM}, got {bpm}"),
        ))
    }
}

/// Parse a `user/update` payload into a profile.
pub fn parse_user_update(payload: &str) -> Result<PresenceProfile> {
    serde_json::from_str(payload).map_err(|e| ThumpError::malformed(USER_UPDATE, e))
}

// ── Server-synthesized frames ──────────────────────────────────────────────

/// `clock/origin#{"originMs":..}`
pub fn clock_origin_frame(origin_ms: f64) -> Result<String> {
    encode_json(CLOCK_ORIGIN, &ClockOriginResponse { origin_ms })
}

/// `client/id#{"clientId":..}`
pub fn client_id_frame(client_id: ClientId) -> Result<String> {
    encode_json(CLIENT_ID, &ClientIdResponse { client_id })
}

/// `clock/update#{"bpm":..}`
pub fn clock_update_frame(bpm: f64) -> Result<String> {
    encode_json(CLOCK_UPDATE, &ClockOptions { bpm })
}

/// `clock/now#{"nowMs":..}`
pub fn clock_now_frame(now_ms: f64) -> Result<String> {
    encode_json(CLOCK_NOW, &ClockNowResponse { now_ms })
}
