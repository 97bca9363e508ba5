use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::HsError;

/// Address of one object in a bucket: `scheme://bucket/object`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlobUri {
    pub scheme: String,
    pub bucket: String,
    pub object: String,
}

impl BlobUri {
    pub fn new(scheme: &str, bucket: &str, object: &str) -> Self {
        Self {
            scheme: scheme.to_string(),
            bucket: bucket.to_string(),
            object: object.to_string(),
        }
    }

    /// Splits `scheme://bucket/object` into its parts.
    pub fn parse(uri: &str) -> Result<Self, HsError> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| HsError::InvalidUri(uri.to_string()))?;
        let (bucket, object) = rest
            .split_once('/')
            .ok_or_else(|| HsError::InvalidUri(uri.to_string()))?;

        if scheme.is_empty() || bucket.is_empty() || object.is_empty() {
            return Err(HsError::InvalidUri(uri.to_string()));
        }

        Ok(Self::new(scheme, bucket, object))
    }

    /// True when `value` looks like a blob reference rather than inline data.
    pub fn is_uri(value: &str) -> bool {
        Self::parse(value).is_ok()
    }
}

impl fmt::Display for BlobUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.bucket, self.object)
    }
}

impl FromStr for BlobUri {
    type Err = HsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for BlobUri {
    type Error = HsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<BlobUri> for String {
    fn from(uri: BlobUri) -> Self {
        uri.to_string()
    }
}
