//! Recording job descriptors.

use serde::{Deserialize, Serialize};

use crate::error::{QueueError, QueueResult};

/// One recording request for a specific room/tenant pair.
///
/// The wire format is the JSON body published by the scheduling service:
/// `{"RoomName": "...", "TenantId": "..."}`. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobDescriptor {
    #[serde(rename = "RoomName")]
    room_name: String,
    #[serde(rename = "TenantId")]
    tenant_id: String,
}

impl JobDescriptor {
    /// Create a descriptor, validating the room name.
    pub fn new(room_name: impl Into<String>, tenant_id: impl Into<String>) -> QueueResult<Self> {
        let job = Self {
            room_name: room_name.into(),
            tenant_id: tenant_id.into(),
        };
        job.validate()?;
        Ok(job)
    }

    /// Parse a descriptor from a queue message body.
    ///
    /// A missing body, invalid JSON, or an unusable room name are all
    /// reported as [`QueueError::MalformedMessage`].
    pub fn parse(body: Option<&str>) -> QueueResult<Self> {
        let body = body.ok_or_else(|| QueueError::malformed("message has no body"))?;
        let job: Self = serde_json::from_str(body)
            .map_err(|e| QueueError::malformed(format!("invalid job payload: {}", e)))?;
        job.validate()?;
        Ok(job)
    }

    pub fn room_name(&self) -> &str {
        &self.room_name
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    // The room name becomes a directory name and an object key prefix.
    fn validate(&self) -> QueueResult<()> {
        let room = self.room_name.trim();
        if room.is_empty() {
            return Err(QueueError::malformed("RoomName is empty"));
        }
        if room != self.room_name
            || room == "."
            || room == ".."
            || room.contains(['/', '\\', '\0'])
        {
            return Err(QueueError::malformed(format!(
                "RoomName '{}' is not a valid path segment",
                self.room_name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_body() {
        let job = JobDescriptor::parse(Some(r#"{"RoomName":"room1","TenantId":"t1"}"#)).unwrap();
        assert_eq!(job.room_name(), "room1");
        assert_eq!(job.tenant_id(), "t1");
    }

    #[test]
    fn test_parse_ignores_extra_fields() {
        let job = JobDescriptor::parse(Some(
            r#"{"RoomName":"room1","TenantId":"t1","RequestedBy":"scheduler"}"#,
        ))
        .unwrap();
        assert_eq!(job.room_name(), "room1");
    }

    #[test]
    fn test_parse_missing_body() {
        let err = JobDescriptor::parse(None).unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn test_parse_invalid_json() {
        let err = JobDescriptor::parse(Some("not json")).unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn test_parse_missing_tenant() {
        let err = JobDescriptor::parse(Some(r#"{"RoomName":"room1"}"#)).unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn test_rejects_unusable_room_names() {
        for room in ["", "   ", "..", "a/b", "..\\x", " padded"] {
            let body = serde_json::json!({ "RoomName": room, "TenantId": "t1" }).to_string();
            assert!(
                JobDescriptor::parse(Some(&body)).is_err(),
                "room name {:?} should be rejected",
                room
            );
        }
    }

    #[test]
    fn test_serializes_to_wire_names() {
        let job = JobDescriptor::new("room1", "t1").unwrap();
        let json = serde_json::to_string(&job).unwrap();
        assert_eq!(json, r#"{"RoomName":"room1","TenantId":"t1"}"#);
    }
}
