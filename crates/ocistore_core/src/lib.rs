//! # ocistore-core
//!
//! Digest parsing, repository/blob path validation, and the driver-agnostic
//! error taxonomy shared by every other crate in the `ocistore` workspace.
//!
//! Nothing in this crate talks to a backend or to the network — it exists
//! so that [`ocistore_driver`], [`ocistore_storage`], and `ocistore_http`
//! agree on what a digest, a path, and an error look like without any of
//! them depending on each other.

pub mod digest;
pub use digest::{Algorithm, Digest, Digester};

pub mod errors;
pub use errors::{Detail, Error, Result};

pub mod path;
pub use path::{RepositoryName, Tag};
