//! Participant presence profiles.

use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::ids::ClientId;
use crate::protocol::{USERS_ALL, encode_json, json_number};

/// Self-reported state of one participant.
///
/// Missing fields default to zero values and unknown fields are ignored, so
/// older and newer clients can share a room.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PresenceProfile {
    /// Owning session. The bus overwrites whatever the client sent.
    pub client_id: ClientId,
    /// Display name.
    pub name: String,
    /// Selected instrument.
    pub instrument: String,
    /// Selected input device.
    pub input_device: String,
    /// Scheduling lookahead in beats.
    #[serde(serialize_with = "json_number")]
    pub offset: f64,
    /// Horizontal position in the shared scene.
    #[serde(serialize_with = "json_number")]
    pub pos_x: f64,
    /// Vertical position in the shared scene.
    #[serde(serialize_with = "json_number")]
    pub pos_y: f64,
}

/// Collect profiles into a snapshot ordered by client id.
pub fn snapshot<'a, I>(profiles: I) -> Vec<PresenceProfile>
where
    I: IntoIterator<Item = &'a PresenceProfile>,
{
    let mut all: Vec<PresenceProfile> = profiles.into_iter().cloned().collect();
    all.sort_by_key(|p| p.client_id);
    all
}

/// Encode a snapshot as `user/all#[...]`.
pub fn users_all_frame(profiles: &[PresenceProfile]) -> Result<String> {
    encode_json(USERS_ALL, profiles)
}
