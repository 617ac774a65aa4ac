//! Content-address digests.
//!
//! A [`Digest`] is `<algorithm>:<hex>`, canonical form lower-case, parsed
//! strictly. Two digests compare equal iff their canonical forms are
//! byte-equal, which falls straight out of deriving `PartialEq` on the
//! normalized fields below.

use std::fmt;

use digest::{Digest as _, DynDigest};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::Sha256;

use crate::errors::{Error, Result};

/// The bounded set of digest algorithms this registry recognizes.
///
/// `TarsumV1Sha256` is accepted for parsing existing digests, historically
/// `tarsum.v1+sha256`, but [`Algorithm::digester`] refuses to build a
/// [`Digester`] for it — it is a legacy read-path-only algorithm, not
/// something new uploads may claim.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Algorithm {
    Sha256,
    TarsumV1Sha256,
}

impl Algorithm {
    fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
            Algorithm::TarsumV1Sha256 => "tarsum.v1+sha256",
        }
    }

    pub fn digester(&self) -> Result<Digester> {
        match self {
            Algorithm::Sha256 => Ok(Digester::new(*self, Box::new(Sha256::new()))),
            Algorithm::TarsumV1Sha256 => Err(Error::digest_unsupported(self.as_str())),
        }
    }
}

impl TryFrom<&str> for Algorithm {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        match s {
            "sha256" => Ok(Algorithm::Sha256),
            "tarsum.v1+sha256" => Ok(Algorithm::TarsumV1Sha256),
            other => Err(Error::digest_unsupported(other)),
        }
    }
}

/// A parsed, canonical `<algorithm>:<hex>` content address.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Digest {
    algorithm: Algorithm,
    hex: String,
}

static HEX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-f0-9]+$").unwrap());

impl Digest {
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// The `<first-two-hex>` path component used when constructing the
    /// canonical blob path `blobs/<algo>/<prefix2>/<hex>/data`.
    pub fn hex_prefix2(&self) -> &str {
        &self.hex[..2]
    }

    pub fn digester(&self) -> Result<Digester> {
        self.algorithm.digester()
    }
}

impl TryFrom<&str> for Digest {
    type Error = Error;

    /// Strict parse: exactly one `:`, a recognized algorithm on the left,
    /// a non-empty lower-case hex string on the right.
    fn try_from(s: &str) -> Result<Self> {
        let idx = s
            .find(':')
            .ok_or_else(|| Error::digest_invalid(s).with_detail("reason", "missing ':'"))?;
        let (algo, rest) = (&s[..idx], &s[idx + 1..]);
        if rest.is_empty() {
            return Err(Error::digest_invalid(s).with_detail("reason", "empty hex"));
        }
        if !HEX_RE.is_match(rest) {
            return Err(Error::digest_invalid(s).with_detail("reason", "hex must be lower-case"));
        }
        let algorithm = Algorithm::try_from(algo).map_err(|_| Error::digest_invalid(s))?;
        Ok(Digest {
            algorithm,
            hex: rest.to_string(),
        })
    }
}

impl TryFrom<String> for Digest {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Digest::try_from(s.as_str())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.as_str(), self.hex)
    }
}

/// Streaming hasher used by the Blob Service and Upload Session Manager to
/// verify the caller-supplied digest against bytes actually written, and
/// by [`crate::Digest::digester`] for new uploads.
///
/// Wraps a [`DynDigest`] trait object so the same type works across
/// algorithms without generics leaking into every caller.
pub struct Digester {
    algorithm: Algorithm,
    inner: Box<dyn DynDigest + Send>,
    bytes: u64,
}

impl Digester {
    pub fn new(algorithm: Algorithm, inner: Box<dyn DynDigest + Send>) -> Self {
        Self {
            algorithm,
            inner,
            bytes: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
        self.bytes += data.len() as u64;
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Consume the hasher and return the finished [`Digest`].
    pub fn finalize(self) -> Digest {
        let hex = hex_encode(&self.inner.finalize());
        Digest {
            algorithm: self.algorithm,
            hex,
        }
    }

    /// Verify the accumulated hash against a caller-supplied digest
    /// string, consuming `self` either way.
    pub fn verify(self, expected: &Digest) -> Result<()> {
        let actual = self.finalize();
        if &actual == expected {
            Ok(())
        } else {
            Err(Error::digest_invalid(expected.to_string())
                .with_detail("actual", actual.to_string()))
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

#[cfg(test)]
mod tests {
    use rstest::*;

    use super::*;

    #[rstest]
    #[case::sha256("sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824", true)]
    #[case::tarsum("tarsum.v1+sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824", true)]
    #[case::unsupported_algo("sha666:aaaa", false)]
    #[case::no_colon("sha256aaaa", false)]
    #[case::empty_hex("sha256:", false)]
    #[case::uppercase_hex("sha256:AAAA", false)]
    fn parse(#[case] input: &str, #[case] ok: bool) {
        assert_eq!(Digest::try_from(input).is_ok(), ok);
    }

    #[test]
    fn display_round_trips_canonical_form() {
        let d = Digest::try_from("sha256:deadbeef").unwrap();
        assert_eq!(d.to_string(), "sha256:deadbeef");
    }

    #[test]
    fn equality_is_based_on_canonical_form() {
        let a = Digest::try_from("sha256:deadbeef").unwrap();
        let b = Digest::try_from("sha256:deadbeef").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn digester_computes_real_sha256() {
        let d = Digest::try_from("sha256:deadbeef").unwrap();
        let mut digester = d.digester().unwrap();
        digester.update(b"hello");
        let out = digester.finalize();
        assert_eq!(
            out.to_string(),
            "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn verify_rejects_mismatch() {
        let wrong = Digest::try_from(
            "sha256:0000000000000000000000000000000000000000000000000000000000000000",
        )
        .unwrap();
        let mut digester = Algorithm::Sha256.digester().unwrap();
        digester.update(b"hello");
        assert!(digester.verify(&wrong).is_err());
    }

    #[test]
    fn tarsum_digester_is_unsupported_for_new_uploads() {
        let d = Digest::try_from("tarsum.v1+sha256:deadbeef").unwrap();
        assert!(d.digester().is_err());
    }
}
