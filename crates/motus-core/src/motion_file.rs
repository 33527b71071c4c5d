//! Motion-capture file descriptors as served by the backend

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::identity::{AccessToken, UserId};

/// Backend identifier of a motion file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MotionFileId(pub i64);

impl std::fmt::Display for MotionFileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A recorded motion file. Immutable once created; the backend owns its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionFile {
    pub id: MotionFileId,
    /// Blob name, also shown to the user
    pub name: String,
    /// Storage location of the model asset (needs an access token to fetch)
    pub url: String,
    /// Recording type as reported by the uploader (e.g. "gltf")
    #[serde(rename = "type", default)]
    pub kind: String,
    /// Upload time
    #[serde(rename = "createdAt", deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
    /// Owning patient, if assigned
    #[serde(default)]
    pub patient_id: Option<UserId>,
}

impl MotionFile {
    /// Asset URL with the storage access token appended as a query suffix
    pub fn authorized_url(&self, token: &AccessToken) -> String {
        append_token(&self.url, token)
    }

    /// Upload date formatted as `YYYY-MM-DD`
    pub fn upload_date(&self) -> String {
        self.created_at.format("%Y-%m-%d").to_string()
    }
}

/// Append a storage access token to `url` as a query suffix
pub fn append_token(url: &str, token: &AccessToken) -> String {
    let token = token.as_str().trim_start_matches('?');
    if token.is_empty() {
        return url.to_string();
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}{}", url, separator, token)
}

/// Accepts RFC 3339 as well as the RFC 2822 dates the backend's JSON encoder emits
/// (`"Tue, 15 Apr 2025 10:00:00 GMT"`).
pub(crate) fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw)))
}

/// Parse a backend timestamp in any of the formats it is known to produce
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(ts) = DateTime::parse_from_rfc2822(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    // Python's str(datetime): "2025-04-15 10:00:00.123456+00:00"
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(ts.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MotionFile {
        serde_json::from_str(
            r#"{
                "id": 7,
                "name": "squat-session.gltf",
                "url": "https://store.example.net/motion-files/squat-session.gltf",
                "type": "gltf",
                "createdAt": "Tue, 15 Apr 2025 10:00:00 GMT",
                "patient_id": 3
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_parse_backend_json() {
        let file = sample();
        assert_eq!(file.id, MotionFileId(7));
        assert_eq!(file.kind, "gltf");
        assert_eq!(file.patient_id, Some(UserId(3)));
        assert_eq!(file.upload_date(), "2025-04-15");
    }

    #[test]
    fn test_authorized_url() {
        let mut file = sample();
        let token = AccessToken::new("sv=2024&sig=abc");
        assert_eq!(
            file.authorized_url(&token),
            "https://store.example.net/motion-files/squat-session.gltf?sv=2024&sig=abc"
        );

        file.url.push_str("?download=1");
        assert!(file.authorized_url(&token).ends_with("?download=1&sv=2024&sig=abc"));
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert!(parse_timestamp("2025-04-15T10:00:00Z").is_some());
        assert!(parse_timestamp("2025-04-15 10:00:00.123456+00:00").is_some());
        assert!(parse_timestamp("2025-04-15 10:00:00").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }
}
