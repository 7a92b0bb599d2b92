use std::fmt;
use thiserror::Error;

/// Suffix appended to the original key for the derived JSON object
pub const DERIVED_SUFFIX: &str = ".json";

/// Why a key could not be built from client input
#[derive(Error, Debug, PartialEq, Eq)]
pub enum KeyError {
    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("{field} contains a path separator or control character")]
    UnsafeCharacter { field: &'static str },

    #[error("{0} must not be a relative path segment")]
    RelativeSegment(&'static str),

    #[error("filename must not end with .json")]
    ReservedSuffix,
}

/// Key of an object in the artifact store.
///
/// Layout is `{prefix}/{owner_id}/{artifact_id}/{filename}`, with the derived
/// JSON at the same key plus [`DERIVED_SUFFIX`]. Components are kept verbatim,
/// so distinct uploads never share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteKey(String);

impl RemoteKey {
    /// Key of the uploaded replay itself
    pub fn original(
        prefix: &str,
        owner_id: &str,
        artifact_id: &str,
        filename: &str,
    ) -> Result<Self, KeyError> {
        check_segment("ownerID", owner_id)?;
        check_segment("artifactID", artifact_id)?;
        check_segment("filename", filename)?;
        // Otherwise an upload named `x.json` lands on the derived object of `x`
        if filename.ends_with(DERIVED_SUFFIX) {
            return Err(KeyError::ReservedSuffix);
        }

        let prefix = prefix.trim_matches('/');
        let key = if prefix.is_empty() {
            format!("{}/{}/{}", owner_id, artifact_id, filename)
        } else {
            format!("{}/{}/{}/{}", prefix, owner_id, artifact_id, filename)
        };
        Ok(RemoteKey(key))
    }

    /// Key of the derived JSON object paired with this key
    pub fn derived(&self) -> Self {
        RemoteKey(format!("{}{}", self.0, DERIVED_SUFFIX))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for RemoteKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Accept a single path segment as is, or reject it
fn check_segment(field: &'static str, value: &str) -> Result<(), KeyError> {
    if value.trim().is_empty() {
        return Err(KeyError::Empty(field));
    }
    if value.chars().any(|c| c == '/' || c == '\\' || c.is_control()) {
        return Err(KeyError::UnsafeCharacter { field });
    }
    if value == "." || value == ".." {
        return Err(KeyError::RelativeSegment(field));
    }
    Ok(())
}
