//! `GET|PUT|DELETE /v2/<name>/manifests/<reference>`, out of core scope
//! except for path/digest validation.
//!
//! Manifest parsing, signature verification, and tag indexing consume the
//! blob API from outside this crate's scope; what belongs here is
//! validating that the repository name and reference are well-formed
//! before reporting that manifest storage isn't wired up.

use axum::extract::Path;
use axum::response::Response;

use ocistore_core::digest::Digest;
use ocistore_core::path::{RepositoryName, Tag};

use crate::errors::{Error, Result};

fn validate(name: &str, reference: &str) -> Result<()> {
    RepositoryName::try_from(name).map_err(Error::Core)?;
    // A reference is either a tag or a digest; accept whichever parses.
    if Tag::try_from(reference).is_err() && Digest::try_from(reference).is_err() {
        return Err(Error::Core(ocistore_core::errors::Error::TagInvalid {
            detail: Default::default(),
        }));
    }
    Ok(())
}

fn unsupported() -> Result<Response> {
    Err(Error::Core(ocistore_core::errors::Error::unsupported_method()
        .with_detail("reason", "manifest storage is outside this core's scope")))
}

pub async fn get_manifest(Path((name, reference)): Path<(String, String)>) -> Result<Response> {
    validate(&name, &reference)?;
    unsupported()
}

pub async fn put_manifest(Path((name, reference)): Path<(String, String)>) -> Result<Response> {
    validate(&name, &reference)?;
    unsupported()
}

pub async fn delete_manifest(Path((name, reference)): Path<(String, String)>) -> Result<Response> {
    validate(&name, &reference)?;
    unsupported()
}
