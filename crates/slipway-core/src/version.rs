//! Semantic version parsing for release identification.

use crate::error::{OrchestratorError, Result};

/// A `major.minor.patch[-prerelease]` version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub prerelease: Option<String>,
}

impl Version {
    /// Parse a version string, tolerating a leading `v`.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim().trim_start_matches('v');

        let (numbers, prerelease) = match trimmed.split_once('-') {
            Some((head, tail)) => (head, Some(tail.to_string())),
            None => (trimmed, None),
        };

        let mut parts = numbers.split('.');
        let mut next_number = |label: &str| -> Result<u32> {
            parts
                .next()
                .and_then(|p| p.parse::<u32>().ok())
                .ok_or_else(|| {
                    OrchestratorError::Internal(format!(
                        "invalid {label} component in version string: {raw}"
                    ))
                })
        };

        let major = next_number("major")?;
        let minor = next_number("minor")?;
        let patch = next_number("patch")?;

        if parts.next().is_some() {
            return Err(OrchestratorError::Internal(format!(
                "too many components in version string: {raw}"
            )));
        }

        Ok(Version {
            major,
            minor,
            patch,
            prerelease,
        })
    }

    /// A zero version used when no tag information is available.
    pub fn zero() -> Self {
        Version {
            major: 0,
            minor: 0,
            patch: 0,
            prerelease: None,
        }
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.prerelease {
            write!(f, "-{pre}")?;
        }
        Ok(())
    }
}
