//! Object key and content type helpers.

use std::path::Path;

use crate::error::{StorageError, StorageResult};

/// Build the object key for an artifact: `<prefix>/<file name>`.
pub fn artifact_key(prefix: &str, path: &Path) -> StorageResult<String> {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| StorageError::invalid_key(format!("no file name in {}", path.display())))?;

    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        Ok(file_name.to_string())
    } else {
        Ok(format!("{}/{}", prefix, file_name))
    }
}

/// Content type for an HLS artifact.
pub fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("ts") => "video/mp2t",
        Some("m3u8") => "application/vnd.apple.mpegurl",
        Some("mp4") => "video/mp4",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_artifact_key() {
        let path = PathBuf::from("/tmp/videos/room1-abc/data03.ts");
        assert_eq!(artifact_key("room1/abc", &path).unwrap(), "room1/abc/data03.ts");
        assert_eq!(artifact_key("/room1/", &path).unwrap(), "room1/data03.ts");
        assert_eq!(artifact_key("", &path).unwrap(), "data03.ts");
    }

    #[test]
    fn test_artifact_key_without_file_name() {
        assert!(artifact_key("room1", Path::new("/")).is_err());
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for(Path::new("data00.ts")), "video/mp2t");
        assert_eq!(
            content_type_for(Path::new("master.m3u8")),
            "application/vnd.apple.mpegurl"
        );
        assert_eq!(content_type_for(Path::new("notes")), "application/octet-stream");
    }
}
