//! Dataset and subarray file locations.
//!
//! A [`Uri`] is either a remote object location of the form
//! `scheme://host/bucket/key-path` or, when it carries no scheme, a local
//! filesystem path. The bucket is the first path segment after the host and
//! the key is the remainder. Keys may contain the wildcards `*` and `?` for
//! read-only enumeration.

use derive_more::Display;
use thiserror::Error;

/// The location of a master or subarray file.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Display)]
#[display("{raw}")]
pub struct Uri {
    raw: String,
}

impl Uri {
    /// Create a URI from a string.
    ///
    /// # Errors
    /// Returns [`UriError`] if `uri` is empty or a remote form is missing its host.
    pub fn new(uri: &str) -> Result<Self, UriError> {
        if uri.is_empty() {
            return Err(UriError::Empty);
        }
        if let Some((scheme, rest)) = uri.split_once("://") {
            if scheme.is_empty() || rest.is_empty() || rest.starts_with('/') {
                return Err(UriError::MissingHost(uri.to_string()));
            }
        }
        Ok(Self {
            raw: uri.to_string(),
        })
    }

    /// The URI as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns true if the URI refers to a remote object store.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        self.raw.contains("://")
    }

    /// The scheme, or [`None`] for a local path.
    #[must_use]
    pub fn scheme(&self) -> Option<&str> {
        self.raw.split_once("://").map(|(scheme, _)| scheme)
    }

    /// The host, or [`None`] for a local path.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        let (_, rest) = self.raw.split_once("://")?;
        Some(rest.split('/').next().unwrap_or(rest))
    }

    /// The bucket (first path segment after the host), or [`None`] for a local path.
    #[must_use]
    pub fn bucket(&self) -> Option<&str> {
        let (_, rest) = self.raw.split_once("://")?;
        rest.split('/').nth(1)
    }

    /// The key within the bucket for a remote URI, or the whole path for a local one.
    #[must_use]
    pub fn key(&self) -> &str {
        match self.raw.split_once("://") {
            Some((_, rest)) => match rest.splitn(3, '/').nth(2) {
                Some(key) => key,
                None => "",
            },
            None => &self.raw,
        }
    }

    /// The final path segment.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.raw.rsplit('/').next().unwrap_or(&self.raw)
    }

    /// The URI with the final path segment's extension removed.
    #[must_use]
    pub fn strip_extension(&self) -> Self {
        let file_name = self.file_name();
        match file_name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => Self {
                raw: format!("{}{stem}", &self.raw[..self.raw.len() - file_name.len()]),
            },
            _ => self.clone(),
        }
    }

    /// The URI with `segment` appended as a new path segment.
    #[must_use]
    pub fn join(&self, segment: &str) -> Self {
        Self {
            raw: format!("{}/{segment}", self.raw.trim_end_matches('/')),
        }
    }

    /// Returns true if the URI contains listing wildcards.
    #[must_use]
    pub fn has_wildcards(&self) -> bool {
        self.raw.contains('*') || self.raw.contains('?')
    }

    /// Match `candidate` against `pattern`, where `*` matches any sequence and `?` any single
    /// character.
    #[must_use]
    pub fn wildcard_match(pattern: &str, candidate: &str) -> bool {
        wildcard_match_inner(pattern.as_bytes(), candidate.as_bytes())
    }
}

fn wildcard_match_inner(pattern: &[u8], candidate: &[u8]) -> bool {
    match pattern.split_first() {
        None => candidate.is_empty(),
        Some((b'*', rest)) => (0..=candidate.len())
            .any(|skip| wildcard_match_inner(rest, &candidate[skip..])),
        Some((b'?', rest)) => match candidate.split_first() {
            Some((_, candidate_rest)) => wildcard_match_inner(rest, candidate_rest),
            None => false,
        },
        Some((c, rest)) => match candidate.split_first() {
            Some((candidate_c, candidate_rest)) => {
                c == candidate_c && wildcard_match_inner(rest, candidate_rest)
            }
            None => false,
        },
    }
}

impl TryFrom<&str> for Uri {
    type Error = UriError;

    fn try_from(uri: &str) -> Result<Self, Self::Error> {
        Self::new(uri)
    }
}

impl std::str::FromStr for Uri {
    type Err = UriError;

    fn from_str(uri: &str) -> Result<Self, Self::Err> {
        Self::new(uri)
    }
}

/// An invalid URI.
#[derive(Clone, Debug, Error)]
pub enum UriError {
    /// The URI is empty.
    #[error("URI is empty")]
    Empty,
    /// A remote URI has no host.
    #[error("remote URI {0} has no host")]
    MissingHost(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_uri() {
        let uri = Uri::new("/data/weather/master.nc").unwrap();
        assert!(!uri.is_remote());
        assert_eq!(uri.scheme(), None);
        assert_eq!(uri.key(), "/data/weather/master.nc");
        assert_eq!(uri.file_name(), "master.nc");
        assert_eq!(
            uri.strip_extension().as_str(),
            "/data/weather/master"
        );
        assert_eq!(
            uri.strip_extension().join("t.0.1.nc").as_str(),
            "/data/weather/master/t.0.1.nc"
        );
    }

    #[test]
    fn remote_uri() {
        let uri = Uri::new("s3://minio.example.org/climate/runs/master.nc").unwrap();
        assert!(uri.is_remote());
        assert_eq!(uri.scheme(), Some("s3"));
        assert_eq!(uri.host(), Some("minio.example.org"));
        assert_eq!(uri.bucket(), Some("climate"));
        assert_eq!(uri.key(), "runs/master.nc");
    }

    #[test]
    fn invalid_uri() {
        assert!(Uri::new("").is_err());
        assert!(Uri::new("s3:///bucket/key").is_err());
    }

    #[test]
    fn wildcards() {
        assert!(Uri::new("s3://h/b/runs/t.*.nc").unwrap().has_wildcards());
        assert!(!Uri::new("/runs/t.0.0.nc").unwrap().has_wildcards());
        assert!(Uri::wildcard_match("t.*.nc", "t.0.0.nc"));
        assert!(Uri::wildcard_match("t.?.?.nc", "t.0.1.nc"));
        assert!(!Uri::wildcard_match("t.?.nc", "t.10.nc"));
        assert!(Uri::wildcard_match("*", "anything/at/all"));
        assert!(!Uri::wildcard_match("t.*.nc", "u.0.0.nc"));
    }
}
