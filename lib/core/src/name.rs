//! Validated integration names.
//!
//! A name is the identity of an integration. It is embedded verbatim in
//! shared-store keys (`cache:<name>:...`, `rate_limit:<name>`), so it must
//! not contain the `:` separator or whitespace.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

/// Error returned when a string is not a valid integration name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseNameError {
    /// The rejected input.
    pub input: String,
    /// Why it was rejected.
    pub reason: &'static str,
}

impl fmt::Display for ParseNameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid integration name '{}': {}", self.input, self.reason)
    }
}

impl std::error::Error for ParseNameError {}

/// The unique name of a registered integration (e.g. `"salesforce"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IntegrationName(String);

impl IntegrationName {
    /// Validates and wraps a name.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty, contains whitespace, or
    /// contains the `:` key separator.
    pub fn new(name: impl Into<String>) -> Result<Self, ParseNameError> {
        let name = name.into();
        let reason = if name.is_empty() {
            Some("name is empty")
        } else if name.chars().any(char::is_whitespace) {
            Some("name contains whitespace")
        } else if name.contains(':') {
            Some("name contains ':'")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(ParseNameError {
                input: name,
                reason,
            }),
            None => Ok(Self(name)),
        }
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IntegrationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for IntegrationName {
    type Err = ParseNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for IntegrationName {
    type Error = ParseNameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<IntegrationName> for String {
    fn from(name: IntegrationName) -> Self {
        name.0
    }
}

impl Borrow<str> for IntegrationName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for IntegrationName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
