//! Replay Relay Service
//!
//! Upload, decode and relay service for StarCraft: Brood War replays.
//! Clients post a replay as a multipart form; the service stages it on local
//! disk, relays the original to the object store, decodes it into a JSON
//! document and relays that next to the original.
//!
//! ## Features
//!
//! - **Streaming Uploads**: request bodies go straight to a uniquely named
//!   staging file with a hard size ceiling
//! - **Replay Decoding**: header, players and map data of modern (1.18+)
//!   replays, plus derived fields such as duration and matchup
//! - **Object Relay**: S3 (multipart for large objects) or a local directory,
//!   one deterministic key pair per upload
//! - **Static Retrieval**: relayed files are served back under `/replays`
//!
//! ## Architecture
//!
//! ```text
//! POST /upload               Staging Dir                Object Store
//! ┌──────────────┐           ┌──────────────┐          ┌──────────────────────┐
//! │ HTTP API     │──────────▶│ {uuid}.rep   │          │ replays/             │
//! │ (multipart)  │           │   .pending   │          │   {owner}/{id}/      │
//! └──────────────┘           └──────────────┘          │     {file}           │
//!        │                          │                  │     {file}.json      │
//!        ▼                          ▼                  └──────────────────────┘
//! ┌──────────────┐           ┌──────────────┐                    ▲
//! │ Upload       │──────────▶│ Replay       │                    │
//! │ Pipeline     │           │ Decoder      │                    │
//! └──────────────┘           └──────────────┘                    │
//!        │                                                       │
//!        └───────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod decoder;
pub mod error;
pub mod keys;
pub mod pipeline;
pub mod staging;
pub mod store;

pub use api::{create_router, start_api_server, AppState};
pub use config::Config;
pub use decoder::{DecodeError, ReplayDecoder, ScrepDecoder, DECODER_VERSION};
pub use error::{InputError, PipelineError};
pub use keys::RemoteKey;
pub use pipeline::{PipelineSettings, UploadOutcome, UploadPipeline, UploadRequest};
pub use staging::{StagedArtifact, StagingArea, StagingError};
pub use store::{ArtifactStore, LocalArtifactStore, RelayError, S3ArtifactStore};
