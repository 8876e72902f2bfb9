//! File identifier codec.
//!
//! A file id is URL-safe base64 (no padding) of `{environment}:{relativePath}`.
//! Absolute-path registrations carry an `ABS:` prefix before encoding. The
//! codec is bijective: decoding an encoded reference yields the original
//! environment and path.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use crate::error::{FileError, FileResult};

/// Decoded storage reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    /// Owning environment.
    pub environment: String,
    /// Path relative to the environment directory, or the full path for
    /// absolute registrations.
    pub path: String,
    /// Whether the reference targets an absolute path.
    pub absolute: bool,
}

/// Encode a relative storage reference.
#[must_use]
pub fn encode(environment: &str, relative_path: &str) -> String {
    URL_SAFE_NO_PAD.encode(format!("{environment}:{relative_path}"))
}

/// Encode an absolute-path registration.
#[must_use]
pub fn encode_absolute(environment: &str, absolute_path: &str) -> String {
    URL_SAFE_NO_PAD.encode(format!("ABS:{environment}:{absolute_path}"))
}

/// Decode a presented file id.
///
/// # Errors
///
/// Returns [`FileError::InvalidFileId`] for undecodable or malformed ids.
pub fn decode(file_id: &str) -> FileResult<FileRef> {
    let raw = URL_SAFE_NO_PAD
        .decode(file_id)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| FileError::InvalidFileId {
            file_id: file_id.to_string(),
        })?;

    let (absolute, remainder) = raw
        .strip_prefix("ABS:")
        .map_or((false, raw.as_str()), |rest| (true, rest));

    let (environment, path) =
        remainder
            .split_once(':')
            .ok_or_else(|| FileError::InvalidFileId {
                file_id: file_id.to_string(),
            })?;
    if environment.is_empty() || path.is_empty() {
        return Err(FileError::InvalidFileId {
            file_id: file_id.to_string(),
        });
    }

    Ok(FileRef {
        environment: environment.to_string(),
        path: path.to_string(),
        absolute,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_ids_round_trip() {
        let id = encode("prod", "reports/q1.pdf");
        let decoded = decode(&id).expect("decode");
        assert_eq!(
            decoded,
            FileRef {
                environment: "prod".to_string(),
                path: "reports/q1.pdf".to_string(),
                absolute: false,
            }
        );
    }

    #[test]
    fn absolute_ids_round_trip_with_prefix() {
        let id = encode_absolute("prod", "/srv/files/prod/shared.bin");
        let decoded = decode(&id).expect("decode");
        assert!(decoded.absolute);
        assert_eq!(decoded.environment, "prod");
        assert_eq!(decoded.path, "/srv/files/prod/shared.bin");
    }

    #[test]
    fn ids_are_url_safe() {
        let id = encode("prod", "a file+name.pdf");
        assert!(!id.contains('+'));
        assert!(!id.contains('/'));
        assert!(!id.contains('='));
    }

    #[test]
    fn garbage_ids_are_rejected() {
        assert!(matches!(
            decode("not-base64!!"),
            Err(FileError::InvalidFileId { .. })
        ));
        let no_separator = URL_SAFE_NO_PAD.encode("justonepart");
        assert!(matches!(
            decode(&no_separator),
            Err(FileError::InvalidFileId { .. })
        ));
    }

    #[test]
    fn distinct_environments_produce_distinct_ids() {
        assert_ne!(encode("prod", "x.pdf"), encode("dev", "x.pdf"));
    }
}
