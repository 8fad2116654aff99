//! Transcription job pipeline
//!
//! One job per incoming media item: size check, fetch into the cache
//! directory, admission, transcription, cleanup.

use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::source::MediaSource;
use super::transcriber::Transcriber;
use crate::config::PipelineConfig;
use crate::metrics;
use crate::rate_limit::{AdmissionController, UserId};

/// Result of a single job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Transcription succeeded
    Transcribed { job_id: String, text: String },

    /// Media exceeds the configured size limit; nothing was fetched
    TooLarge { size_bytes: u64, limit_bytes: u64 },

    /// User has no quota left
    RateLimited,

    /// Admission could not be decided because the store failed
    Unavailable,

    /// Media could not be described or fetched
    FetchFailed(String),

    /// Provider call failed; the cached file is kept at `cached_path`
    TranscriptionFailed { job_id: String, cached_path: PathBuf },
}

impl JobOutcome {
    /// Metrics label for this outcome
    pub fn label(&self) -> &'static str {
        match self {
            Self::Transcribed { .. } => "transcribed",
            Self::TooLarge { .. } => "too_large",
            Self::RateLimited => "rate_limited",
            Self::Unavailable => "unavailable",
            Self::FetchFailed(_) => "fetch_failed",
            Self::TranscriptionFailed { .. } => "transcription_failed",
        }
    }

    /// Message shown to the user who submitted the job
    pub fn reply_text(&self) -> String {
        match self {
            Self::Transcribed { text, .. } => text.clone(),
            Self::TooLarge { .. } => "File too large to process.".to_string(),
            Self::RateLimited => {
                "You have reached the rate limit. Please try again later.".to_string()
            }
            Self::Unavailable => {
                "The service is temporarily unavailable. Please try again later.".to_string()
            }
            Self::FetchFailed(_) => "Could not download the file. Please send it again.".to_string(),
            Self::TranscriptionFailed { .. } => {
                "Transcription failed, please try again later.".to_string()
            }
        }
    }
}

/// Runs jobs through admission and transcription
pub struct JobPipeline<T: Transcriber> {
    controller: AdmissionController,
    transcriber: T,
    cache_dir: PathBuf,
    max_file_size_bytes: u64,
}

impl<T: Transcriber> JobPipeline<T> {
    /// Create a pipeline
    pub fn new(controller: AdmissionController, transcriber: T, config: &PipelineConfig) -> Self {
        Self {
            controller,
            transcriber,
            cache_dir: PathBuf::from(&config.cache_dir),
            max_file_size_bytes: config.max_file_size_bytes,
        }
    }

    /// Directory cached media is written to
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Process one media item for `user_id`
    pub async fn run<S>(&self, user_id: &UserId, media: &S) -> JobOutcome
    where
        S: MediaSource + ?Sized,
    {
        let outcome = self.process(user_id, media).await;
        metrics::PIPELINE_JOBS_TOTAL
            .with_label_values(&[outcome.label()])
            .inc();
        outcome
    }

    async fn process<S>(&self, user_id: &UserId, media: &S) -> JobOutcome
    where
        S: MediaSource + ?Sized,
    {
        let info = match media.describe().await {
            Ok(info) => info,
            Err(e) => {
                warn!("Could not describe media for user {}: {}", user_id, e);
                return JobOutcome::FetchFailed(e.to_string());
            }
        };

        if info.size_bytes > self.max_file_size_bytes {
            info!(
                "Rejecting {} byte file from user {} (limit {})",
                info.size_bytes, user_id, self.max_file_size_bytes
            );
            return JobOutcome::TooLarge {
                size_bytes: info.size_bytes,
                limit_bytes: self.max_file_size_bytes,
            };
        }

        let job_id = Uuid::new_v4().to_string();
        let cached_path = self.cached_path(&job_id, &info.extension);

        if let Err(e) = tokio::fs::create_dir_all(&self.cache_dir).await {
            error!("Failed to create cache dir {}: {}", self.cache_dir.display(), e);
            return JobOutcome::FetchFailed(e.to_string());
        }
        if let Err(e) = media.fetch(&cached_path).await {
            warn!(job = %job_id, "Fetch failed for user {}: {}", user_id, e);
            remove_cached(&cached_path).await;
            return JobOutcome::FetchFailed(e.to_string());
        }
        debug!(job = %job_id, "Cached media at {}", cached_path.display());

        match self.controller.try_consume(user_id).await {
            Ok(true) => {}
            Ok(false) => {
                info!(job = %job_id, "User {} is rate limited", user_id);
                remove_cached(&cached_path).await;
                return JobOutcome::RateLimited;
            }
            Err(e) => {
                error!(job = %job_id, "Admission failed for user {}: {}", user_id, e);
                remove_cached(&cached_path).await;
                return JobOutcome::Unavailable;
            }
        }

        match self.transcriber.transcribe(&cached_path, &job_id).await {
            Ok(text) => {
                remove_cached(&cached_path).await;
                JobOutcome::Transcribed { job_id, text }
            }
            Err(e) => {
                error!(
                    job = %job_id,
                    "Transcription failed, keeping {}: {}",
                    cached_path.display(),
                    e
                );
                JobOutcome::TranscriptionFailed {
                    job_id,
                    cached_path,
                }
            }
        }
    }

    fn cached_path(&self, job_id: &str, extension: &str) -> PathBuf {
        let timestamp = chrono::Local::now().format("%Y%m%d%H%M%S");
        self.cache_dir
            .join(format!("{}_{}.{}", timestamp, job_id, extension))
    }
}

async fn remove_cached(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed cached file {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove cached file {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{LocalFileSource, MediaInfo, PipelineError};
    use crate::rate_limit::error::StoreResult;
    use crate::rate_limit::{
        QuotaRecord, QuotaState, QuotaStore, RateLimitConfig, StoreError,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tempfile::TempDir;

    struct EchoTranscriber {
        calls: AtomicUsize,
    }

    impl EchoTranscriber {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Transcriber for EchoTranscriber {
        async fn transcribe(&self, audio_path: &Path, _job_id: &str) -> Result<String, PipelineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let bytes = tokio::fs::read(audio_path).await?;
            Ok(String::from_utf8_lossy(&bytes).to_string())
        }
    }

    struct FailingTranscriber;

    #[async_trait]
    impl Transcriber for FailingTranscriber {
        async fn transcribe(&self, _audio_path: &Path, _job_id: &str) -> Result<String, PipelineError> {
            Err(PipelineError::Provider {
                status: 500,
                body: "boom".to_string(),
            })
        }
    }

    struct OversizeSource;

    #[async_trait]
    impl MediaSource for OversizeSource {
        async fn describe(&self) -> Result<MediaInfo, PipelineError> {
            Ok(MediaInfo {
                size_bytes: u64::MAX,
                extension: "ogg".to_string(),
            })
        }

        async fn fetch(&self, _dest: &Path) -> Result<(), PipelineError> {
            panic!("oversize media must not be fetched");
        }
    }

    struct BrokenStore;

    impl QuotaStore for BrokenStore {
        fn ensure(&self, _user_id: &UserId, _default_quota: u32) -> StoreResult<()> {
            Err(StoreError::Unavailable("offline".to_string()))
        }
        fn get(&self, _user_id: &UserId) -> StoreResult<QuotaState> {
            Err(StoreError::Unavailable("offline".to_string()))
        }
        fn set_quota(&self, _user_id: &UserId, _quota: u32) -> StoreResult<()> {
            Err(StoreError::Unavailable("offline".to_string()))
        }
        fn set_recovering(&self, _user_id: &UserId, _recovering: bool) -> StoreResult<()> {
            Err(StoreError::Unavailable("offline".to_string()))
        }
        fn set_state(&self, _user_id: &UserId, _quota: u32, _recovering: bool) -> StoreResult<()> {
            Err(StoreError::Unavailable("offline".to_string()))
        }
        fn record(&self, _user_id: &UserId) -> StoreResult<Option<QuotaRecord>> {
            Err(StoreError::Unavailable("offline".to_string()))
        }
        fn records(&self) -> StoreResult<Vec<QuotaRecord>> {
            Err(StoreError::Unavailable("offline".to_string()))
        }
    }

    struct Fixture {
        dir: TempDir,
        config: PipelineConfig,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let config = PipelineConfig {
                cache_dir: dir.path().join("cache").to_string_lossy().to_string(),
                max_file_size_bytes: 1024,
                ..PipelineConfig::default()
            };
            Self { dir, config }
        }

        fn media(&self, name: &str, body: &[u8]) -> LocalFileSource {
            let path = self.dir.path().join(name);
            std::fs::write(&path, body).unwrap();
            LocalFileSource::new(path)
        }

        fn cached_files(&self) -> usize {
            std::fs::read_dir(&self.config.cache_dir)
                .map(|entries| entries.count())
                .unwrap_or(0)
        }
    }

    #[tokio::test]
    async fn test_transcribes_and_cleans_up() {
        let fixture = Fixture::new();
        let controller = AdmissionController::in_memory(RateLimitConfig::new(2, 600));
        let pipeline = JobPipeline::new(controller.clone(), EchoTranscriber::new(), &fixture.config);
        let media = fixture.media("hello.ogg", b"hello world");

        let outcome = pipeline.run(&UserId::from("u1"), &media).await;

        match &outcome {
            JobOutcome::Transcribed { text, .. } => assert_eq!(text, "hello world"),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(outcome.reply_text(), "hello world");
        assert_eq!(fixture.cached_files(), 0);
        let record = controller.status(&UserId::from("u1")).await.unwrap().unwrap();
        assert_eq!(record.quota, 1);
    }

    #[tokio::test]
    async fn test_rate_limited_discards_download() {
        let fixture = Fixture::new();
        let controller = AdmissionController::in_memory(RateLimitConfig::new(1, 600));
        let transcriber = EchoTranscriber::new();
        let pipeline = JobPipeline::new(controller, transcriber, &fixture.config);
        let media = fixture.media("voice.ogg", b"audio");
        let user = UserId::from("u1");

        assert!(matches!(pipeline.run(&user, &media).await, JobOutcome::Transcribed { .. }));
        let outcome = pipeline.run(&user, &media).await;

        assert_eq!(outcome, JobOutcome::RateLimited);
        assert_eq!(pipeline.transcriber.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fixture.cached_files(), 0);
    }

    #[tokio::test]
    async fn test_oversize_rejected_before_fetch() {
        let fixture = Fixture::new();
        let controller = AdmissionController::in_memory(RateLimitConfig::new(1, 600));
        let pipeline = JobPipeline::new(controller.clone(), EchoTranscriber::new(), &fixture.config);

        let outcome = pipeline.run(&UserId::from("u1"), &OversizeSource).await;

        assert!(matches!(outcome, JobOutcome::TooLarge { limit_bytes: 1024, .. }));
        assert!(controller.status(&UserId::from("u1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_transcription_keeps_file() {
        let fixture = Fixture::new();
        let controller = AdmissionController::in_memory(RateLimitConfig::new(1, 600));
        let pipeline = JobPipeline::new(controller, FailingTranscriber, &fixture.config);
        let media = fixture.media("voice.wav", b"audio");

        let outcome = pipeline.run(&UserId::from("u1"), &media).await;

        match outcome {
            JobOutcome::TranscriptionFailed { cached_path, .. } => {
                assert!(cached_path.exists());
                assert_eq!(cached_path.extension().unwrap(), "wav");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(fixture.cached_files(), 1);
    }

    #[tokio::test]
    async fn test_store_failure_is_unavailable() {
        let fixture = Fixture::new();
        let controller =
            AdmissionController::new(RateLimitConfig::new(1, 600), Arc::new(BrokenStore));
        let pipeline = JobPipeline::new(controller, EchoTranscriber::new(), &fixture.config);
        let media = fixture.media("voice.ogg", b"audio");

        let outcome = pipeline.run(&UserId::from("u1"), &media).await;

        assert_eq!(outcome, JobOutcome::Unavailable);
        assert_eq!(pipeline.transcriber.calls.load(Ordering::SeqCst), 0);
        assert_eq!(fixture.cached_files(), 0);
    }

    #[tokio::test]
    async fn test_missing_media_is_fetch_failure() {
        let fixture = Fixture::new();
        let controller = AdmissionController::in_memory(RateLimitConfig::new(1, 600));
        let pipeline = JobPipeline::new(controller.clone(), EchoTranscriber::new(), &fixture.config);

        let outcome = pipeline
            .run(&UserId::from("u1"), &LocalFileSource::new("/nonexistent/voice.ogg"))
            .await;

        assert!(matches!(outcome, JobOutcome::FetchFailed(_)));
        assert!(controller.status(&UserId::from("u1")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disabled_gate_always_transcribes() {
        let fixture = Fixture::new();
        let pipeline =
            JobPipeline::new(AdmissionController::disabled(), EchoTranscriber::new(), &fixture.config);
        let media = fixture.media("voice.ogg", b"audio");
        let user = UserId::from("u1");

        for _ in 0..10 {
            assert!(matches!(pipeline.run(&user, &media).await, JobOutcome::Transcribed { .. }));
        }
    }

    #[test]
    fn test_outcome_labels_and_replies() {
        assert_eq!(JobOutcome::RateLimited.label(), "rate_limited");
        assert!(JobOutcome::RateLimited.reply_text().contains("rate limit"));
        let too_large = JobOutcome::TooLarge {
            size_bytes: 10,
            limit_bytes: 5,
        };
        assert_eq!(too_large.label(), "too_large");
        assert_eq!(too_large.reply_text(), "File too large to process.");
    }
}
