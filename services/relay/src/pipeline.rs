use crate::config::{Config, RelayMode};
use crate::decoder::{DecodeError, Replay, ReplayDecoder};
use crate::error::{InputError, PipelineError};
use crate::keys::RemoteKey;
use crate::staging::{StagedArtifact, StagingArea};
use crate::store::{ArtifactStore, Object, RelayError};
use bytes::Bytes;
use futures::Stream;
use std::fmt::Display;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

/// Metadata attached to every relayed object
const OWNER_METADATA: &str = "owner-id";
const ARTIFACT_METADATA: &str = "artifact-id";

/// Pipeline settings taken from [`Config`]
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_upload_bytes: u64,
    pub relay_mode: RelayMode,
    pub relay_timeout: Duration,
    pub key_prefix: String,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_upload_bytes: config.upload.max_upload_bytes,
            relay_mode: config.upload.relay_mode,
            relay_timeout: config.relay_timeout(),
            key_prefix: config.store.key_prefix.clone(),
        }
    }
}

/// A single upload as handed over by the HTTP layer
pub struct UploadRequest<S> {
    pub owner_id: String,
    pub artifact_id: String,
    pub filename: String,
    pub payload: S,
}

/// What got relayed for an upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub original_key: Option<RemoteKey>,
    pub derived_key: Option<RemoteKey>,
    pub size_bytes: u64,
}

impl UploadOutcome {
    /// Key reported back to the uploader: the derived JSON when there is one
    pub fn response_key(&self) -> Option<&RemoteKey> {
        self.derived_key.as_ref().or(self.original_key.as_ref())
    }
}

/// Stage, decode and relay uploaded replays.
///
/// One call to [`UploadPipeline::process`] takes an upload from request body
/// to relayed objects. The staged files are removed on every exit path.
#[derive(Clone)]
pub struct UploadPipeline {
    staging: StagingArea,
    store: Arc<dyn ArtifactStore>,
    decoder: Arc<dyn ReplayDecoder>,
    settings: PipelineSettings,
}

impl UploadPipeline {
    pub fn new(
        staging: StagingArea,
        store: Arc<dyn ArtifactStore>,
        decoder: Arc<dyn ReplayDecoder>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            staging,
            store,
            decoder,
            settings,
        }
    }

    /// Name of the store objects are relayed to
    pub fn store_backend(&self) -> &'static str {
        self.store.backend()
    }

    /// Run one upload through the pipeline
    #[instrument(
        skip(self, request),
        fields(
            owner_id = %request.owner_id,
            artifact_id = %request.artifact_id,
            filename = %request.filename,
        )
    )]
    pub async fn process<S, E>(
        &self,
        request: UploadRequest<S>,
    ) -> Result<UploadOutcome, PipelineError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin + Send,
        E: Display,
    {
        let start = Instant::now();
        let result = self.run(request).await;
        metrics::histogram!("relay.pipeline.duration_seconds")
            .record(start.elapsed().as_secs_f64());

        match &result {
            Ok(outcome) => {
                metrics::counter!("relay.uploads.accepted").increment(1);
                info!(
                    size_bytes = outcome.size_bytes,
                    original_key = ?outcome.original_key.as_ref().map(RemoteKey::as_str),
                    derived_key = ?outcome.derived_key.as_ref().map(RemoteKey::as_str),
                    "Upload relayed"
                );
            }
            Err(e) => {
                metrics::counter!("relay.uploads.rejected", "kind" => e.kind()).increment(1);
                warn!(error = %e, kind = e.kind(), "Upload failed");
            }
        }

        result
    }

    async fn run<S, E>(&self, request: UploadRequest<S>) -> Result<UploadOutcome, PipelineError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin + Send,
        E: Display,
    {
        validate(&request)?;
        let key = RemoteKey::original(
            &self.settings.key_prefix,
            &request.owner_id,
            &request.artifact_id,
            &request.filename,
        )
        .map_err(InputError::from)?;

        let mut staged = self.staging.create().await?;
        let result = self.process_staged(&mut staged, key, request).await;

        // The staged files never outlive the request, whatever the outcome
        if let Err(e) = self.staging.remove(&mut staged).await {
            warn!(
                handle = %staged.handle(),
                error = %e,
                "Failed to remove staging files"
            );
        }

        result
    }

    async fn process_staged<S, E>(
        &self,
        staged: &mut StagedArtifact,
        key: RemoteKey,
        request: UploadRequest<S>,
    ) -> Result<UploadOutcome, PipelineError>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin + Send,
        E: Display,
    {
        let UploadRequest {
            owner_id,
            artifact_id,
            payload,
            ..
        } = request;

        let size_bytes = self
            .staging
            .write(staged, payload, self.settings.max_upload_bytes)
            .await?;
        if size_bytes == 0 {
            return Err(InputError::EmptyFile.into());
        }
        metrics::counter!("relay.bytes.staged").increment(size_bytes);
        debug!(handle = %staged.handle(), size_bytes, "Upload staged");

        let data = self.staging.read(staged).await?;

        let mut outcome = UploadOutcome {
            original_key: None,
            derived_key: None,
            size_bytes,
        };

        if self.settings.relay_mode.relays_original() {
            let object = Object::replay(data.clone())
                .with_metadata(OWNER_METADATA, owner_id.as_str())
                .with_metadata(ARTIFACT_METADATA, artifact_id.as_str());
            self.relay(&key, object).await?;
            outcome.original_key = Some(key.clone());
        }

        if !self.settings.relay_mode.relays_derived() {
            return Ok(outcome);
        }

        let replay = self.decode(data).await?;
        let json = to_derived_json(&replay)?;
        self.staging.write_derived(staged, &json).await?;

        let derived_key = key.derived();
        let object = Object::derived(Bytes::from(json))
            .with_metadata(OWNER_METADATA, owner_id.as_str())
            .with_metadata(ARTIFACT_METADATA, artifact_id.as_str());
        self.relay(&derived_key, object).await?;
        outcome.derived_key = Some(derived_key);

        Ok(outcome)
    }

    /// Decode and annotate off the async runtime
    async fn decode(&self, data: Bytes) -> Result<Replay, DecodeError> {
        let decoder = self.decoder.clone();
        tokio::task::spawn_blocking(move || {
            let replay = decoder.decode(&data)?;
            Ok::<_, DecodeError>(decoder.annotate(replay))
        })
        .await
        .map_err(|e| DecodeError::Internal(e.to_string()))?
    }

    async fn relay(&self, key: &RemoteKey, object: Object) -> Result<(), RelayError> {
        let size = object.body.len();
        let timeout = self.settings.relay_timeout;

        match tokio::time::timeout(timeout, self.store.put(key, object)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(RelayError::Timeout {
                    key: key.to_string(),
                    timeout,
                })
            }
        }

        metrics::counter!("relay.objects.relayed").increment(1);
        debug!(
            key = %key,
            backend = self.store.backend(),
            size_bytes = size,
            "Object relayed"
        );
        Ok(())
    }
}

fn validate<S>(request: &UploadRequest<S>) -> Result<(), InputError> {
    if request.owner_id.trim().is_empty() {
        return Err(InputError::MissingIdentifier("ownerID"));
    }
    if request.artifact_id.trim().is_empty() {
        return Err(InputError::MissingIdentifier("artifactID"));
    }
    if request.filename.trim().is_empty() {
        return Err(InputError::MissingFilename);
    }
    Ok(())
}

/// Pretty JSON with a trailing newline
fn to_derived_json(replay: &Replay) -> Result<Vec<u8>, DecodeError> {
    let mut json = serde_json::to_vec_pretty(replay)
        .map_err(|e| DecodeError::Internal(format!("failed to encode replay: {}", e)))?;
    json.push(b'\n');
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::fixtures::{replay_bytes, replay_on};
    use crate::decoder::ScrepDecoder;
    use crate::staging::StagingError;
    use crate::store::MockArtifactStore;
    use async_trait::async_trait;
    use futures::stream::{self, BoxStream, StreamExt};
    use std::collections::HashMap;
    use std::io;
    use std::sync::Mutex;

    /// Store keeping objects in memory
    #[derive(Default)]
    struct MemoryStore {
        objects: Mutex<HashMap<String, Object>>,
        puts: Mutex<Vec<String>>,
    }

    impl MemoryStore {
        fn get(&self, key: &str) -> Option<Object> {
            self.objects.lock().unwrap().get(key).cloned()
        }

        fn keys(&self) -> Vec<String> {
            let mut keys: Vec<String> = self.objects.lock().unwrap().keys().cloned().collect();
            keys.sort();
            keys
        }

        fn put_count(&self) -> usize {
            self.puts.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ArtifactStore for MemoryStore {
        async fn put(&self, key: &RemoteKey, object: Object) -> Result<(), RelayError> {
            self.puts.lock().unwrap().push(key.to_string());
            self.objects
                .lock()
                .unwrap()
                .insert(key.to_string(), object);
            Ok(())
        }

        fn backend(&self) -> &'static str {
            "memory"
        }
    }

    /// Store that never answers in time
    struct StalledStore;

    #[async_trait]
    impl ArtifactStore for StalledStore {
        async fn put(&self, _key: &RemoteKey, _object: Object) -> Result<(), RelayError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }

        fn backend(&self) -> &'static str {
            "stalled"
        }
    }

    fn settings(mode: RelayMode) -> PipelineSettings {
        PipelineSettings {
            max_upload_bytes: 1 << 20,
            relay_mode: mode,
            relay_timeout: Duration::from_secs(5),
            key_prefix: "replays".to_string(),
        }
    }

    async fn pipeline_with(
        store: Arc<dyn ArtifactStore>,
        settings: PipelineSettings,
    ) -> (tempfile::TempDir, UploadPipeline) {
        let dir = tempfile::tempdir().unwrap();
        let staging = StagingArea::new(dir.path().join("staging")).await.unwrap();
        let pipeline = UploadPipeline::new(staging, store, Arc::new(ScrepDecoder::new()), settings);
        (dir, pipeline)
    }

    fn request(
        owner: &str,
        artifact: &str,
        filename: &str,
        data: Vec<u8>,
    ) -> UploadRequest<BoxStream<'static, Result<Bytes, io::Error>>> {
        // Split into a few chunks like a network body would arrive
        let chunks: Vec<Result<Bytes, io::Error>> = data
            .chunks(4096)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        UploadRequest {
            owner_id: owner.to_string(),
            artifact_id: artifact.to_string(),
            filename: filename.to_string(),
            payload: stream::iter(chunks).boxed(),
        }
    }

    fn staged_files(pipeline: &UploadPipeline) -> usize {
        std::fs::read_dir(pipeline.staging.dir()).unwrap().count()
    }

    #[tokio::test]
    async fn test_relays_original_and_derived() {
        let store = Arc::new(MemoryStore::default());
        let (_tmp, pipeline) = pipeline_with(store.clone(), settings(RelayMode::Both)).await;
        let data = replay_bytes();

        let outcome = pipeline
            .process(request("u1", "r1", "game.rep", data.clone()))
            .await
            .unwrap();

        assert_eq!(
            outcome.original_key.as_ref().map(RemoteKey::as_str),
            Some("replays/u1/r1/game.rep")
        );
        assert_eq!(
            outcome.response_key().map(RemoteKey::as_str),
            Some("replays/u1/r1/game.rep.json")
        );
        assert_eq!(outcome.size_bytes, data.len() as u64);

        let original = store.get("replays/u1/r1/game.rep").unwrap();
        assert_eq!(original.body.as_ref(), data.as_slice());
        assert!(original
            .metadata
            .contains(&("owner-id".to_string(), "u1".to_string())));

        let derived = store.get("replays/u1/r1/game.rep.json").unwrap();
        assert_eq!(derived.content_type, "application/json");
        assert!(derived.body.ends_with(b"\n"));
        let json: serde_json::Value = serde_json::from_slice(&derived.body).unwrap();
        assert_eq!(json["Header"]["Map"], "Fighting Spirit");
        assert_eq!(json["Computed"]["Matchup"], "TvP");

        assert_eq!(staged_files(&pipeline), 0);
    }

    #[tokio::test]
    async fn test_oversized_upload_is_rejected() {
        let store = Arc::new(MemoryStore::default());
        let mut s = settings(RelayMode::Both);
        s.max_upload_bytes = 1024;
        let (_tmp, pipeline) = pipeline_with(store.clone(), s).await;

        let err = pipeline
            .process(request("u1", "r1", "game.rep", vec![7u8; 8192]))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Input(InputError::Staging(StagingError::TooLarge { limit: 1024 }))
        ));
        assert_eq!(err.status_code(), axum::http::StatusCode::PAYLOAD_TOO_LARGE);
        assert!(store.keys().is_empty());
        assert_eq!(staged_files(&pipeline), 0);
    }

    #[tokio::test]
    async fn test_empty_upload_is_rejected() {
        let store = Arc::new(MemoryStore::default());
        let (_tmp, pipeline) = pipeline_with(store.clone(), settings(RelayMode::Both)).await;

        let err = pipeline
            .process(request("u1", "r1", "game.rep", Vec::new()))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Input(InputError::EmptyFile)));
        assert_eq!(store.put_count(), 0);
        assert_eq!(staged_files(&pipeline), 0);
    }

    #[tokio::test]
    async fn test_missing_identifiers_are_rejected_before_staging() {
        let store = Arc::new(MemoryStore::default());
        let (_tmp, pipeline) = pipeline_with(store.clone(), settings(RelayMode::Both)).await;

        let err = pipeline
            .process(request("", "r1", "game.rep", replay_bytes()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Input(InputError::MissingIdentifier("ownerID"))
        ));

        let err = pipeline
            .process(request("u1", "r1", " ", replay_bytes()))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Input(InputError::MissingFilename)));

        assert_eq!(store.put_count(), 0);
        assert_eq!(staged_files(&pipeline), 0);
    }

    #[tokio::test]
    async fn test_undecodable_upload_keeps_original() {
        let store = Arc::new(MemoryStore::default());
        let (_tmp, pipeline) = pipeline_with(store.clone(), settings(RelayMode::Both)).await;

        let err = pipeline
            .process(request("u1", "r1", "notes.rep", b"definitely not a replay".to_vec()))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Decode(_)));
        assert_eq!(store.keys(), vec!["replays/u1/r1/notes.rep".to_string()]);
        assert_eq!(staged_files(&pipeline), 0);
    }

    #[tokio::test]
    async fn test_resubmission_overwrites() {
        let store = Arc::new(MemoryStore::default());
        let (_tmp, pipeline) = pipeline_with(store.clone(), settings(RelayMode::Both)).await;

        for _ in 0..2 {
            pipeline
                .process(request("u1", "r1", "game.rep", replay_bytes()))
                .await
                .unwrap();
        }

        assert_eq!(store.put_count(), 4);
        assert_eq!(
            store.keys(),
            vec![
                "replays/u1/r1/game.rep".to_string(),
                "replays/u1/r1/game.rep.json".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_concurrent_uploads_stay_separate() {
        let store = Arc::new(MemoryStore::default());
        let (_tmp, pipeline) = pipeline_with(store.clone(), settings(RelayMode::Both)).await;

        let tasks: Vec<_> = (0..12)
            .map(|i| {
                let pipeline = pipeline.clone();
                tokio::spawn(async move {
                    let body = replay_on(&format!("Arena {}", i));
                    pipeline
                        .process(request("u1", &format!("r{}", i), "game.rep", body))
                        .await
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        for i in 0..12 {
            let original = store.get(&format!("replays/u1/r{}/game.rep", i)).unwrap();
            assert_eq!(original.body.as_ref(), replay_on(&format!("Arena {}", i)).as_slice());

            let derived = store
                .get(&format!("replays/u1/r{}/game.rep.json", i))
                .unwrap();
            let json: serde_json::Value = serde_json::from_slice(&derived.body).unwrap();
            assert_eq!(json["Header"]["Map"], format!("Arena {}", i));
        }
        assert_eq!(store.keys().len(), 24);
        assert_eq!(staged_files(&pipeline), 0);
    }

    #[tokio::test]
    async fn test_similar_names_do_not_collide() {
        let store = Arc::new(MemoryStore::default());
        let (_tmp, pipeline) = pipeline_with(store.clone(), settings(RelayMode::Original)).await;

        let uploads = [
            ("alice.kim", "game.rep", "ALICE"),
            ("alice_kim", "game.rep", "BOB"),
            ("u1", "가.rep", "GA"),
            ("u1", "나.rep", "NA"),
        ];
        for (owner, filename, body) in uploads {
            let outcome = pipeline
                .process(request(owner, "r1", filename, body.as_bytes().to_vec()))
                .await
                .unwrap();
            assert_eq!(
                outcome.response_key().map(RemoteKey::as_str),
                Some(format!("replays/{}/r1/{}", owner, filename).as_str())
            );
        }

        for (owner, filename, body) in uploads {
            let object = store
                .get(&format!("replays/{}/r1/{}", owner, filename))
                .unwrap();
            assert_eq!(object.body.as_ref(), body.as_bytes());
        }
        assert_eq!(store.put_count(), 4);
    }

    #[tokio::test]
    async fn test_unsafe_names_are_rejected_before_staging() {
        let store = Arc::new(MemoryStore::default());
        let (_tmp, pipeline) = pipeline_with(store.clone(), settings(RelayMode::Both)).await;

        for (owner, filename) in [("u1", "../game.rep"), ("a/b", "game.rep"), ("u1", "..")] {
            let err = pipeline
                .process(request(owner, "r1", filename, replay_bytes()))
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                PipelineError::Input(InputError::InvalidName(_))
            ));
        }

        assert_eq!(store.put_count(), 0);
        assert_eq!(staged_files(&pipeline), 0);
    }

    #[tokio::test]
    async fn test_original_mode_skips_decoding() {
        let store = Arc::new(MemoryStore::default());
        let (_tmp, pipeline) = pipeline_with(store.clone(), settings(RelayMode::Original)).await;

        let outcome = pipeline
            .process(request("u1", "r1", "raw.rep", b"not decoded".to_vec()))
            .await
            .unwrap();

        assert!(outcome.derived_key.is_none());
        assert_eq!(
            outcome.response_key().map(RemoteKey::as_str),
            Some("replays/u1/r1/raw.rep")
        );
        assert_eq!(store.keys(), vec!["replays/u1/r1/raw.rep".to_string()]);
    }

    #[tokio::test]
    async fn test_derived_mode_relays_json_only() {
        let store = Arc::new(MemoryStore::default());
        let (_tmp, pipeline) = pipeline_with(store.clone(), settings(RelayMode::Derived)).await;

        let outcome = pipeline
            .process(request("u1", "r1", "game.rep", replay_bytes()))
            .await
            .unwrap();

        assert!(outcome.original_key.is_none());
        assert_eq!(store.keys(), vec!["replays/u1/r1/game.rep.json".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_original_relay_stops_pipeline() {
        let mut store = MockArtifactStore::new();
        store.expect_backend().return_const("mock");
        store
            .expect_put()
            .withf(|key, _| key.as_str() == "replays/u1/r1/game.rep")
            .times(1)
            .returning(|key, _| {
                Err(RelayError::Upload {
                    key: key.to_string(),
                    message: "access denied".to_string(),
                })
            });

        let (_tmp, pipeline) = pipeline_with(Arc::new(store), settings(RelayMode::Both)).await;
        let err = pipeline
            .process(request("u1", "r1", "game.rep", replay_bytes()))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Relay(RelayError::Upload { .. })));
        assert_eq!(staged_files(&pipeline), 0);
    }

    #[tokio::test]
    async fn test_failed_derived_relay_is_reported() {
        let mut store = MockArtifactStore::new();
        store.expect_backend().return_const("mock");
        store
            .expect_put()
            .withf(|key, object| {
                key.as_str() == "replays/u1/r1/game.rep"
                    && object.content_type == "application/octet-stream"
            })
            .times(1)
            .returning(|_, _| Ok(()));
        store
            .expect_put()
            .withf(|key, _| key.as_str() == "replays/u1/r1/game.rep.json")
            .times(1)
            .returning(|key, _| {
                Err(RelayError::Upload {
                    key: key.to_string(),
                    message: "slow down".to_string(),
                })
            });

        let (_tmp, pipeline) = pipeline_with(Arc::new(store), settings(RelayMode::Both)).await;
        let err = pipeline
            .process(request("u1", "r1", "game.rep", replay_bytes()))
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "relay");
        assert_eq!(staged_files(&pipeline), 0);
    }

    #[tokio::test]
    async fn test_stalled_store_times_out() {
        let mut s = settings(RelayMode::Both);
        s.relay_timeout = Duration::from_millis(50);
        let (_tmp, pipeline) = pipeline_with(Arc::new(StalledStore), s).await;

        let err = pipeline
            .process(request("u1", "r1", "game.rep", replay_bytes()))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Relay(RelayError::Timeout { .. })));
        assert_eq!(err.status_code(), axum::http::StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(staged_files(&pipeline), 0);
    }

    #[tokio::test]
    async fn test_broken_body_relays_nothing() {
        let store = Arc::new(MemoryStore::default());
        let (_tmp, pipeline) = pipeline_with(store.clone(), settings(RelayMode::Both)).await;

        let chunks: Vec<Result<Bytes, io::Error>> = vec![
            Ok(Bytes::from_static(b"seRS")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset")),
        ];
        let err = pipeline
            .process(UploadRequest {
                owner_id: "u1".to_string(),
                artifact_id: "r1".to_string(),
                filename: "game.rep".to_string(),
                payload: stream::iter(chunks),
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Input(InputError::Staging(StagingError::Body(_)))
        ));
        assert_eq!(store.put_count(), 0);
        assert_eq!(staged_files(&pipeline), 0);
    }

    #[tokio::test]
    async fn test_dropped_request_cleans_up() {
        let store = Arc::new(MemoryStore::default());
        let (_tmp, pipeline) = pipeline_with(store.clone(), settings(RelayMode::Both)).await;

        // A body that never finishes, as when the client stalls and the server drops the request
        let body = stream::iter(vec![Ok::<_, io::Error>(Bytes::from_static(b"seRS"))])
            .chain(stream::pending())
            .boxed();
        let upload = pipeline.process(UploadRequest {
            owner_id: "u1".to_string(),
            artifact_id: "r1".to_string(),
            filename: "game.rep".to_string(),
            payload: body,
        });

        let result = tokio::time::timeout(Duration::from_millis(100), upload).await;
        assert!(result.is_err());
        assert_eq!(staged_files(&pipeline), 0);
        assert_eq!(store.put_count(), 0);
    }
}
