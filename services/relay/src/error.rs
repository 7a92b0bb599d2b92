use crate::decoder::DecodeError;
use crate::keys::KeyError;
use crate::staging::StagingError;
use crate::store::RelayError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Problems with the upload request itself
#[derive(Error, Debug)]
pub enum InputError {
    #[error("no file provided in field {0}")]
    MissingFile(String),

    #[error("file has no name")]
    MissingFilename,

    #[error("file is empty")]
    EmptyFile,

    #[error("missing required field {0}")]
    MissingIdentifier(&'static str),

    #[error("{0}")]
    InvalidName(#[from] KeyError),

    #[error("more than one file provided in field {0}")]
    DuplicateFile(String),

    #[error("malformed multipart request: {0}")]
    Multipart(String),

    #[error(transparent)]
    Staging(#[from] StagingError),
}

/// Terminal failure of the upload pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid upload: {0}")]
    Input(#[from] InputError),

    #[error("failed to decode replay: {0}")]
    Decode(#[from] DecodeError),

    #[error("failed to relay replay: {0}")]
    Relay(#[from] RelayError),
}

impl From<StagingError> for PipelineError {
    fn from(e: StagingError) -> Self {
        PipelineError::Input(InputError::Staging(e))
    }
}

impl PipelineError {
    /// Short error kind used as a metrics label
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Input(_) => "input",
            PipelineError::Decode(_) => "decode",
            PipelineError::Relay(_) => "relay",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            PipelineError::Input(InputError::Staging(StagingError::TooLarge { .. })) => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            PipelineError::Input(_) => StatusCode::BAD_REQUEST,
            PipelineError::Decode(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PipelineError::Relay(RelayError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            PipelineError::Relay(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Message shown to the caller. Never includes local paths or backend details.
    pub fn public_message(&self) -> String {
        match self {
            PipelineError::Input(InputError::Staging(e)) if e.is_storage() => {
                "Could not accept the upload".to_string()
            }
            PipelineError::Input(e) => format!("Invalid upload: {}", e),
            PipelineError::Decode(DecodeError::Internal(_)) => "Failed to parse replay".to_string(),
            PipelineError::Decode(e) => format!("Failed to parse replay: {}", e),
            PipelineError::Relay(RelayError::Timeout { .. }) => {
                "Timed out uploading the file".to_string()
            }
            PipelineError::Relay(_) => "Something went wrong uploading the file".to_string(),
        }
    }
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        (self.status_code(), self.public_message()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::time::Duration;

    #[test]
    fn test_status_codes() {
        let missing: PipelineError = InputError::MissingFile("repFile".into()).into();
        assert_eq!(missing.status_code(), StatusCode::BAD_REQUEST);

        let too_large: PipelineError = StagingError::TooLarge { limit: 10 }.into();
        assert_eq!(too_large.status_code(), StatusCode::PAYLOAD_TOO_LARGE);

        let decode: PipelineError = DecodeError::Truncated.into();
        assert_eq!(decode.status_code(), StatusCode::INTERNAL_SERVER_ERROR);

        let relay: PipelineError = RelayError::Upload {
            key: "k".into(),
            message: "denied".into(),
        }
        .into();
        assert_eq!(relay.status_code(), StatusCode::BAD_GATEWAY);

        let timeout: PipelineError = RelayError::Timeout {
            key: "k".into(),
            timeout: Duration::from_secs(1),
        }
        .into();
        assert_eq!(timeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_storage_failures_hide_details() {
        let err: PipelineError = StagingError::Write(io::Error::new(
            io::ErrorKind::Other,
            "/var/tmp/replay-relay/abc.rep.pending: no space left",
        ))
        .into();

        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(!err.public_message().contains("/var/tmp"));
    }

    #[test]
    fn test_decoder_crash_hides_details() {
        let err: PipelineError =
            DecodeError::Internal("task 17 panicked with message \"index out of bounds\"".into())
                .into();

        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "Failed to parse replay");
    }

    #[test]
    fn test_unsafe_name_is_bad_request() {
        let err: PipelineError = InputError::from(KeyError::UnsafeCharacter { field: "filename" }).into();

        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            err.public_message(),
            "Invalid upload: filename contains a path separator or control character"
        );
    }

    #[test]
    fn test_relay_failures_hide_backend_message() {
        let err: PipelineError = RelayError::Upload {
            key: "replays/u1/r1/game.rep".into(),
            message: "AccessDenied: secret bucket policy".into(),
        }
        .into();

        assert_eq!(
            err.public_message(),
            "Something went wrong uploading the file"
        );
        assert_eq!(err.kind(), "relay");
    }
}
