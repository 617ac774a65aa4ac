//! Repository names, tags, and the canonical/staging path layout persisted
//! state lives under on a backing driver.

use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use crate::digest::Digest;
use crate::errors::{Error, Result};

/// A slash-separated sequence of components matching a fixed regular
/// expression; total length bounded; no leading/trailing slashes;
/// case-sensitive.
static REPOSITORY_COMPONENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z0-9]+((\.|_|__|-+)[a-z0-9]+)*$").unwrap());

const MAX_REPOSITORY_NAME_LEN: usize = 255;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RepositoryName(String);

impl RepositoryName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for RepositoryName {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        if s.is_empty() || s.len() > MAX_REPOSITORY_NAME_LEN {
            return Err(Error::NameInvalid {
                detail: Default::default(),
            });
        }
        if s.starts_with('/') || s.ends_with('/') {
            return Err(Error::NameInvalid {
                detail: Default::default(),
            });
        }
        for component in s.split('/') {
            if !REPOSITORY_COMPONENT_RE.is_match(component) {
                return Err(Error::NameInvalid {
                    detail: Default::default(),
                });
            }
        }
        Ok(RepositoryName(s.to_string()))
    }
}

/// The OCI distribution-spec tag grammar — a narrower regular expression
/// than a repository name component.
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_][a-zA-Z0-9._-]{0,127}$").unwrap());

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Tag(String);

impl Tag {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for Tag {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        if TAG_RE.is_match(s) {
            Ok(Tag(s.to_string()))
        } else {
            Err(Error::TagInvalid {
                detail: Default::default(),
            })
        }
    }
}

/// The canonical validation regex applied to every path handed to a driver
/// by the path-validating wrapper. Absolute, `/`-separated, no `.`/`..`
/// segments, no doubled slashes.
pub static DRIVER_PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(/[a-zA-Z0-9._-]+)+$").unwrap());

/// Returns `true` for the literal root `/`, which `List` additionally
/// permits.
pub fn is_root(path: &str) -> bool {
    path == "/"
}

pub fn validate_driver_path(path: &str, allow_root: bool) -> Result<()> {
    if allow_root && is_root(path) {
        return Ok(());
    }
    if DRIVER_PATH_RE.is_match(path) {
        Ok(())
    } else {
        Err(Error::invalid_path(path))
    }
}

/// `blobs/<algo>/<prefix2>/<hex>/data`.
pub fn canonical_blob_path(digest: &Digest) -> String {
    format!(
        "/blobs/{}/{}/{}/data",
        algo_path_segment(digest),
        digest.hex_prefix2(),
        digest.hex(),
    )
}

fn algo_path_segment(digest: &Digest) -> String {
    // the `+` in `tarsum.v1+sha256` is not a legal filesystem-safe
    // directory separator candidate on every backend, so it is normalized
    // to `.` for on-disk/on-bucket storage purposes only; the in-memory
    // `Digest` keeps the canonical `<algo>:<hex>` form for comparisons.
    match digest.algorithm() {
        crate::digest::Algorithm::Sha256 => "sha256".to_string(),
        crate::digest::Algorithm::TarsumV1Sha256 => "tarsum.v1.sha256".to_string(),
    }
}

/// `_uploads/<uuid>/data`.
pub fn staging_data_path(session_uuid: &Uuid) -> String {
    format!("/_uploads/{}/data", session_uuid)
}

/// `_uploads/<uuid>/hashstates/<algo>/<N>`.
pub fn hashstate_path(session_uuid: &Uuid, algo: &str, n: u64) -> String {
    format!("/_uploads/{}/hashstates/{}/{}", session_uuid, algo, n)
}

/// `_uploads/<uuid>/` prefix for a whole session's staging resources, used
/// when cancelling/reaping a session.
pub fn staging_prefix(session_uuid: &Uuid) -> String {
    format!("/_uploads/{}", session_uuid)
}

#[cfg(test)]
mod tests {
    use rstest::*;

    use super::*;

    #[rstest]
    #[case::simple("library/nginx", true)]
    #[case::nested("org/team/project", true)]
    #[case::leading_slash("/library/nginx", false)]
    #[case::trailing_slash("library/nginx/", false)]
    #[case::uppercase("Library/Nginx", false)]
    #[case::empty("", false)]
    fn repository_name(#[case] input: &str, #[case] ok: bool) {
        assert_eq!(RepositoryName::try_from(input).is_ok(), ok);
    }

    #[rstest]
    #[case::simple("latest", true)]
    #[case::versioned("1.2.3-alpine", true)]
    #[case::leading_dot(".latest", false)]
    #[case::empty("", false)]
    fn tag(#[case] input: &str, #[case] ok: bool) {
        assert_eq!(Tag::try_from(input).is_ok(), ok);
    }

    #[test]
    fn blob_path_layout() {
        let d = Digest::try_from("sha256:deadbeef").unwrap();
        assert_eq!(canonical_blob_path(&d), "/blobs/sha256/de/deadbeef/data");
    }

    #[test]
    fn root_is_only_allowed_when_requested() {
        assert!(validate_driver_path("/", false).is_err());
        assert!(validate_driver_path("/", true).is_ok());
    }

    #[test]
    fn rejects_relative_segments() {
        assert!(validate_driver_path("/a/../b", false).is_err());
    }
}
