//! `GET /v2/<name>/tags/list`.
//!
//! Tag indexing itself is out of core scope — it consumes the blob API,
//! but its internals live elsewhere — so this always reports an empty tag
//! set for a validated repository name rather than reaching into a
//! manifest/tag store this crate doesn't own.

use axum::extract::Path;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use ocistore_core::path::RepositoryName;

use crate::errors::{Error, Result};

#[derive(Serialize)]
struct TagsList {
    name: String,
    tags: Vec<String>,
}

pub async fn list_tags(Path(name): Path<String>) -> Result<Response> {
    let name = RepositoryName::try_from(name.as_str()).map_err(Error::Core)?;
    Ok(Json(TagsList {
        name: name.as_str().to_string(),
        tags: Vec::new(),
    })
    .into_response())
}
