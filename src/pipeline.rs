//! Wiring between the store, the resolver, the derivers and the job runner.

use std::sync::Arc;

use crate::config::DaemonConfig;
use crate::derive::{Toolchain, Transcoder, WaveformDeriver};
use crate::error::{DaemonError, Result};
use crate::jobs::{JobRunner, RunnerConfig};
use crate::resolve::PathResolver;
use crate::store::{PlayHistory, PlayRecord, TrackStore};
use crate::types::{DerivationJob, JobKind};

/// Everything a request handler or job worker needs.
#[derive(Clone)]
pub struct Pipeline {
    pub config: Arc<DaemonConfig>,
    pub store: TrackStore,
    pub resolver: PathResolver,
    pub waveforms: WaveformDeriver,
    pub transcoder: Transcoder,
    pub history: PlayHistory,
}

impl Pipeline {
    /// Opens the persistent store and history under the data directory.
    pub async fn open(config: DaemonConfig, tools: &Toolchain) -> Result<Self> {
        let store = TrackStore::open(&config.track_store_path()).await?;
        let history = PlayHistory::new(config.play_history_path());
        Ok(Self::new(config, store, history, tools))
    }

    /// Builds the derivers for `store` using the probed toolchain.
    pub fn new(
        config: DaemonConfig,
        store: TrackStore,
        history: PlayHistory,
        tools: &Toolchain,
    ) -> Self {
        let resolver = PathResolver::new(
            store.clone(),
            config.effective_media_root(),
            config.scan_depth,
        );
        let waveforms =
            WaveformDeriver::from_toolchain(&config, tools, store.clone(), resolver.clone());
        let transcoder =
            Transcoder::from_toolchain(&config, tools, store.clone(), resolver.clone());

        Self {
            config: Arc::new(config),
            store,
            resolver,
            waveforms,
            transcoder,
            history,
        }
    }

    /// Replaces the derivers, keeping everything else.
    pub fn with_derivers(mut self, waveforms: WaveformDeriver, transcoder: Transcoder) -> Self {
        self.waveforms = waveforms;
        self.transcoder = transcoder;
        self
    }

    /// Runs one derivation job to completion.
    pub async fn run_job(&self, job: DerivationJob) -> Result<()> {
        if self.store.get(&job.track_id).await.is_none() {
            return Err(DaemonError::track_not_found(&job.track_id));
        }
        match job.kind {
            JobKind::Waveform => self.waveforms.ensure(&job.track_id).await.map(|_| ()),
            JobKind::Transcode => self.transcoder.ensure(&job.track_id).await.map(|_| ()),
        }
    }

    /// Starts the background runner for this pipeline's jobs.
    pub fn start_jobs(&self) -> JobRunner {
        let pipeline = self.clone();
        JobRunner::new(RunnerConfig::from_config(&self.config), move |job| {
            let pipeline = pipeline.clone();
            async move { pipeline.run_job(job).await }
        })
    }

    /// Counts a play and, when attributed, appends it to the history.
    ///
    /// Failures are logged and never returned.
    pub async fn record_play(&self, track_id: &str, listener: Option<&str>) {
        match self.store.update(track_id, |t| t.plays += 1).await {
            Ok(Some(track)) => tracing::debug!(track_id, plays = track.plays, "play counted"),
            Ok(None) => return,
            Err(e) => tracing::warn!(track_id, error = %e, "failed to persist play count"),
        }

        if let Some(listener) = listener {
            let record = PlayRecord::now(track_id, listener);
            if let Err(e) = self.history.append(&record).await {
                tracing::warn!(track_id, listener, error = %e, "failed to append play history");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::jobs::JobResult;
    use crate::testing::insert_wav_track;
    use std::time::Duration;
    use tempfile::tempdir;

    fn config_for(root: &std::path::Path) -> DaemonConfig {
        DaemonConfig {
            media_root: Some(root.join("media")),
            data_dir: Some(root.join("data")),
            waveform_buckets: 32,
            ..DaemonConfig::default()
        }
    }

    #[tokio::test]
    async fn waveform_job_publishes_placeholder_without_tools() {
        let dir = tempdir().unwrap();
        let config = config_for(dir.path());
        let source = config.uploads_dir().join("a-00000000000000a1.wav");
        let store = TrackStore::in_memory();
        insert_wav_track(&store, "00000000000000a1", &source, "A").await;

        let pipeline = Pipeline::new(config, store.clone(), PlayHistory::disabled(), &Toolchain::none());
        pipeline
            .run_job(DerivationJob::new("00000000000000a1", JobKind::Waveform))
            .await
            .unwrap();
        assert!(store.get("00000000000000a1").await.unwrap().waveform_ready);

        let err = pipeline
            .run_job(DerivationJob::new("00000000000000a1", JobKind::Transcode))
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::ToolUnavailable);
    }

    #[tokio::test]
    async fn jobs_for_unknown_track_fail_permanently() {
        let dir = tempdir().unwrap();
        let pipeline = Pipeline::new(
            config_for(dir.path()),
            TrackStore::in_memory(),
            PlayHistory::disabled(),
            &Toolchain::none(),
        );
        let runner = pipeline.start_jobs();
        let mut rx = runner.subscribe();
        runner.submit_track("missing").unwrap();

        for _ in 0..2 {
            let result = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            match result {
                JobResult::Failed {
                    error_code,
                    attempts,
                    ..
                } => {
                    assert_eq!(error_code, ErrorCode::NotFound);
                    assert_eq!(attempts, 1);
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        runner.shutdown().await;
    }

    #[tokio::test]
    async fn record_play_counts_and_attributes() {
        let dir = tempdir().unwrap();
        let config = config_for(dir.path());
        let store = TrackStore::in_memory();
        insert_wav_track(&store, "00000000000000b2", &dir.path().join("b.wav"), "B").await;
        let history = PlayHistory::new(config.play_history_path());
        let pipeline = Pipeline::new(config, store.clone(), history.clone(), &Toolchain::none());

        pipeline.record_play("00000000000000b2", None).await;
        pipeline.record_play("00000000000000b2", Some("listener-7")).await;
        pipeline.record_play("unknown", Some("listener-7")).await;

        assert_eq!(store.get("00000000000000b2").await.unwrap().plays, 2);
        let records = history.read_all().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].track_id, "00000000000000b2");
        assert_eq!(records[0].listener, "listener-7");
        assert!(records.iter().all(|r| r.track_id != "unknown"));
        assert!(store.get("unknown").await.is_none());
    }
}
