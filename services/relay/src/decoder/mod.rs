mod annotate;
mod header;
pub mod model;
mod sections;

pub use model::Replay;

use header::{parse_header, parse_map_data, HEADER_SIZE};
use sections::SectionReader;
use thiserror::Error;

/// Version of the decoder, reported at startup
pub const DECODER_VERSION: &str = "1.0.0";

/// Replay id of modern replays
const MODERN_REPLAY_ID: &[u8] = b"seRS";
/// Replay id of pre-1.18 replays
const LEGACY_REPLAY_ID: &[u8] = b"reRS";

/// Why a replay could not be decoded
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("replay data is truncated")]
    Truncated,

    #[error("not a replay file")]
    InvalidMagic,

    #[error("unsupported replay version: {0}")]
    UnsupportedVersion(String),

    #[error("corrupt {section} section: {reason}")]
    Corrupt {
        section: &'static str,
        reason: String,
    },

    #[error("decoder failed: {0}")]
    Internal(String),
}

impl DecodeError {
    pub(crate) fn corrupt(section: &'static str, reason: impl Into<String>) -> Self {
        DecodeError::Corrupt {
            section,
            reason: reason.into(),
        }
    }
}

/// Decoding engine used by the upload pipeline: raw bytes in, a [`Replay`]
/// record or a [`DecodeError`] out
pub trait ReplayDecoder: Send + Sync {
    /// Structurally validate and decode replay bytes
    fn decode(&self, data: &[u8]) -> Result<Replay, DecodeError>;

    /// Compute derived fields of an already decoded replay
    fn annotate(&self, replay: Replay) -> Replay;
}

/// Decoder for modern (1.18+) replay files
#[derive(Debug, Clone, Copy, Default)]
pub struct ScrepDecoder;

impl ScrepDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl ReplayDecoder for ScrepDecoder {
    fn decode(&self, data: &[u8]) -> Result<Replay, DecodeError> {
        let mut reader = SectionReader::new(data);

        let replay_id = reader.section("replay id", 4).map_err(|e| match e {
            DecodeError::Truncated => DecodeError::Truncated,
            _ => DecodeError::InvalidMagic,
        })?;
        match replay_id.as_slice() {
            MODERN_REPLAY_ID => {}
            LEGACY_REPLAY_ID => {
                return Err(DecodeError::UnsupportedVersion(
                    "legacy (pre-1.18) replay".to_string(),
                ))
            }
            _ => return Err(DecodeError::InvalidMagic),
        }

        let header = parse_header(&reader.section("header", HEADER_SIZE)?);
        let commands = reader.sized_section("commands")?;
        let map_data = parse_map_data(&reader.sized_section("map data")?);

        // 1.21+ replays append extra tagged sections; they carry nothing we report.

        Ok(Replay {
            header,
            map_data,
            commands_size: commands.len(),
            computed: None,
        })
    }

    fn annotate(&self, replay: Replay) -> Replay {
        annotate::annotate(replay)
    }
}
