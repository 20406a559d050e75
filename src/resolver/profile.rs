//! Cached user profile and fast-cache key layout

use serde::{Deserialize, Deserializer, Serialize};

/// Read-only view of a user profile row as cached by the profile service.
///
/// Nullable columns arrive as JSON `null` and read as the empty value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    #[serde(deserialize_with = "null_as_default")]
    pub id: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub bio: String,
    #[serde(deserialize_with = "null_as_default")]
    pub banner_hash: String,
    #[serde(deserialize_with = "null_as_default")]
    pub audio_hash: String,
    #[serde(deserialize_with = "null_as_default")]
    pub audio_mime_type: String,
    #[serde(deserialize_with = "null_as_default")]
    pub audio_name: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl UserProfile {
    /// Parse a cached profile blob
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// The audio name, but only if it still belongs to `hash`.
    ///
    /// A profile cached before the user replaced their track carries the old
    /// hash and must not name the new file.
    pub fn audio_name_for(&self, hash: &str) -> Option<&str> {
        if self.audio_hash == hash && !self.audio_name.is_empty() {
            Some(&self.audio_name)
        } else {
            None
        }
    }
}

/// `user:profile:<user_id>`
pub fn profile_key(user_id: &str) -> String {
    format!("user:profile:{}", user_id)
}

/// `audio_name:<user_id>:<hash>`
pub fn audio_name_key(user_id: &str, hash: &str) -> String {
    format!("audio_name:{}:{}", user_id, hash)
}
