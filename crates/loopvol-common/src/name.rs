//! Volume name and lease id validation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{VolumeError, VolumeResult};

/// A validated volume name.
///
/// Volume names must:
/// - Be 2-251 characters long
/// - Start with an ASCII alphanumeric character
/// - Contain only ASCII alphanumeric characters, hyphens, and underscores
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VolumeName(String);

impl VolumeName {
    /// Minimum length of a volume name.
    pub const MIN_LENGTH: usize = 2;

    /// Maximum length of a volume name.
    pub const MAX_LENGTH: usize = 251;

    /// Create a new volume name, validating the format.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::InvalidName`] if the name does not match the grammar.
    pub fn new(name: impl Into<String>) -> VolumeResult<Self> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    /// Get the volume name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validate a volume name string.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::InvalidName`] if the name does not match the grammar.
    pub fn validate(name: &str) -> VolumeResult<()> {
        let invalid = |reason: &str| VolumeError::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        let Some(first) = name.chars().next() else {
            return Err(invalid("cannot be an empty string"));
        };
        if !first.is_ascii_alphanumeric() {
            return Err(invalid("must start with a letter or digit"));
        }
        // Every accepted character is ASCII, so byte length equals char count.
        if let Some(c) = name
            .chars()
            .find(|c| !c.is_ascii_alphanumeric() && *c != '-' && *c != '_')
        {
            return Err(invalid(&format!("contains disallowed character '{c}'")));
        }
        if name.len() < Self::MIN_LENGTH || name.len() > Self::MAX_LENGTH {
            return Err(invalid(&format!(
                "must be {}-{} characters long",
                Self::MIN_LENGTH,
                Self::MAX_LENGTH
            )));
        }

        Ok(())
    }
}

impl fmt::Display for VolumeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for VolumeName {
    type Err = VolumeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for VolumeName {
    type Error = VolumeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<VolumeName> for String {
    fn from(name: VolumeName) -> Self {
        name.0
    }
}

impl AsRef<str> for VolumeName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A consumer-supplied lease identifier.
///
/// Lease ids name marker files inside a volume's state directory, so they
/// must be usable as a single path component. Ids starting with `.` are
/// reserved for leases the manager takes on its own behalf.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeaseId(String);

impl LeaseId {
    /// Maximum length of a lease id in bytes (a file name limit).
    pub const MAX_LENGTH: usize = 255;

    /// Create a consumer lease id, validating the format.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::InvalidLeaseId`] if the id cannot name a marker file
    /// or falls in the reserved namespace.
    pub fn new(lease: impl Into<String>) -> VolumeResult<Self> {
        let lease = lease.into();
        let invalid = |reason: &str| VolumeError::InvalidLeaseId {
            lease: lease.clone(),
            reason: reason.to_string(),
        };

        if lease.is_empty() {
            return Err(invalid("cannot be an empty string"));
        }
        if lease.len() > Self::MAX_LENGTH {
            return Err(invalid("is longer than 255 bytes"));
        }
        if lease.contains(['/', '\0']) {
            return Err(invalid("must not contain '/' or NUL"));
        }
        if lease.starts_with('.') {
            return Err(invalid("must not start with '.'"));
        }

        Ok(Self(lease))
    }

    /// Create a lease id in the reserved namespace.
    ///
    /// Only the manager itself uses these; they can never collide with ids
    /// accepted by [`LeaseId::new`].
    #[must_use]
    pub fn reserved(suffix: &str) -> Self {
        Self(format!(".{suffix}"))
    }

    /// Get the lease id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for LeaseId {
    type Err = VolumeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for LeaseId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const GRAMMAR: &str = r"^[A-Za-z0-9][A-Za-z0-9_-]{1,250}$";

    #[test]
    fn valid_volume_names() {
        assert!(VolumeName::new("vol1").is_ok());
        assert!(VolumeName::new("ab").is_ok());
        assert!(VolumeName::new("my-volume").is_ok());
        assert!(VolumeName::new("my_volume").is_ok());
        assert!(VolumeName::new("0-data_Set").is_ok());
        assert!(VolumeName::new("a".repeat(251)).is_ok());
    }

    #[test]
    fn invalid_volume_names() {
        assert!(VolumeName::new("").is_err());
        assert!(VolumeName::new("a").is_err());
        assert!(VolumeName::new("-invalid").is_err());
        assert!(VolumeName::new("_invalid").is_err());
        assert!(VolumeName::new("bad name!").is_err());
        assert!(VolumeName::new("dots.not.allowed").is_err());
        assert!(VolumeName::new("../escape").is_err());
        assert!(VolumeName::new("a".repeat(252)).is_err());
    }

    #[test]
    fn empty_name_reason() {
        let err = VolumeName::new("").unwrap_err();
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn try_from_string_validates() {
        assert!(VolumeName::try_from("bad name!".to_string()).is_err());
        let name = VolumeName::try_from("good-name".to_string()).unwrap();
        assert_eq!(String::from(name), "good-name");
    }

    #[test]
    fn lease_ids() {
        assert!(LeaseId::new("c1").is_ok());
        assert!(LeaseId::new("4f1c2e9a0b7d").is_ok());
        assert!(LeaseId::new("").is_err());
        assert!(LeaseId::new(".").is_err());
        assert!(LeaseId::new("..").is_err());
        assert!(LeaseId::new(".hidden").is_err());
        assert!(LeaseId::new("a/b").is_err());
        assert!(LeaseId::new("nul\0byte").is_err());
        assert!(LeaseId::new("x".repeat(256)).is_err());
    }

    #[test]
    fn reserved_lease_is_not_accepted_from_consumers() {
        let reserved = LeaseId::reserved("loopvol-ownership");
        assert_eq!(reserved.as_str(), ".loopvol-ownership");
        assert!(LeaseId::new(reserved.as_str()).is_err());
    }

    proptest! {
        #[test]
        fn validator_matches_grammar(name in "[A-Za-z0-9_!. -]{0,260}") {
            let re = regex::Regex::new(GRAMMAR).unwrap();
            prop_assert_eq!(VolumeName::validate(&name).is_ok(), re.is_match(&name));
        }

        #[test]
        fn grammar_names_are_accepted(name in "[A-Za-z0-9][A-Za-z0-9_-]{1,250}") {
            prop_assert!(VolumeName::validate(&name).is_ok());
        }
    }
}
