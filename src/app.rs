// Application context
//
// Built once at startup and handed to every caller. Owns the job registry,
// the pipeline and its collaborators; there is no global state.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::Config;
use crate::error::{BisubError, Result};
use crate::job::{JobRegistry, JobRequest, JobSnapshot, Outbox, SharedJob};
use crate::media::FfmpegProcessor;
use crate::pipeline::Pipeline;
use crate::source::YtDlpSource;
use crate::transcribe::WhisperApiTranscriber;
use crate::translate::{
    ChatCompletionsClient, LanguagePair, RetranslateEntry, SubtitleTranslator, VideoContext,
};

/// How far a submitted job runs on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitMode {
    /// Acquisition through completion, optionally burning the styled track
    Full { burn: bool },
    /// Stop at `download_complete`; continue with `start_subtitle`
    DownloadOnly,
}

/// Partial retranslation request against an existing job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetranslateRequest {
    pub rows: Vec<RetranslateEntry>,
    pub targets: Vec<usize>,
    #[serde(default)]
    pub hint: Option<String>,
}

pub struct AppContext {
    config: Config,
    registry: Arc<JobRegistry>,
    pipeline: Arc<Pipeline>,
    translator: Arc<SubtitleTranslator>,
}

impl AppContext {
    /// Wire the ffmpeg, yt-dlp and HTTP model collaborators from `config`.
    pub fn new(config: Config) -> Result<Self> {
        let media = Arc::new(FfmpegProcessor::new(config.media.clone()));
        let source = Arc::new(YtDlpSource::new(config.downloader.clone(), media.clone()));
        let transcriber = Arc::new(WhisperApiTranscriber::new(
            config.transcriber.clone(),
            media.clone(),
        )?);
        let model = Arc::new(ChatCompletionsClient::new(config.translate.clone())?);
        let translator = Arc::new(SubtitleTranslator::new(model, config.translate.clone()));

        let pipeline = Arc::new(Pipeline::new(
            source,
            media,
            transcriber,
            translator.clone(),
            config.progress.clone(),
        ));
        let registry = Arc::new(JobRegistry::new(&config.jobs));

        Ok(Self::with_parts(config, registry, pipeline, translator))
    }

    pub fn with_parts(
        config: Config,
        registry: Arc<JobRegistry>,
        pipeline: Arc<Pipeline>,
        translator: Arc<SubtitleTranslator>,
    ) -> Self {
        Self {
            config,
            registry,
            pipeline,
            translator,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn translator(&self) -> Arc<SubtitleTranslator> {
        self.translator.clone()
    }

    /// Register a job and start it in the background, returning its id.
    pub fn submit(&self, request: JobRequest, mode: SubmitMode) -> Result<String> {
        let job = self.registry.create(request)?;
        let id = job.read().id().to_string();
        let pipeline = self.pipeline.clone();

        info!(job_id = %id, ?mode, "Job submitted");
        tokio::spawn(async move {
            match mode {
                SubmitMode::Full { burn } => pipeline.run_pipeline(&job, burn).await,
                SubmitMode::DownloadOnly => pipeline.run_download(&job).await,
            }
        });
        Ok(id)
    }

    /// Continue a `download_complete` job with transcription and translation.
    pub fn start_subtitle(&self, job_id: &str, burn: bool) -> Result<Arc<Outbox>> {
        let job = self.job(job_id)?;
        let outbox = self.pipeline.begin_subtitle(&job)?;
        let pipeline = self.pipeline.clone();

        tokio::spawn(async move { pipeline.run_subtitle(&job, burn).await });
        Ok(outbox)
    }

    /// Burn client-edited SRT text into a completed job's video.
    pub fn request_burn(&self, job_id: &str, subtitle_text: String) -> Result<Arc<Outbox>> {
        let job = self.job(job_id)?;
        let outbox = self.pipeline.begin_burn(&job)?;
        let pipeline = self.pipeline.clone();

        tokio::spawn(async move { pipeline.run_burn(&job, &subtitle_text).await });
        Ok(outbox)
    }

    pub fn status(&self, job_id: &str) -> Result<JobSnapshot> {
        Ok(self.job(job_id)?.read().snapshot())
    }

    /// Outbox of the job's current run.
    pub fn events(&self, job_id: &str) -> Result<Arc<Outbox>> {
        Ok(self.job(job_id)?.read().outbox())
    }

    /// Retranslate selected rows using the job's languages and video metadata.
    pub async fn retranslate(
        &self,
        job_id: &str,
        request: &RetranslateRequest,
    ) -> Result<BTreeMap<usize, String>> {
        let (languages, video) = {
            let job = self.job(job_id)?;
            let job = job.read();
            let params = job.request();
            let video = job.metadata().map(|m| VideoContext {
                title: Some(m.title.clone()),
                description: m.description.clone(),
            });
            (
                LanguagePair::new(&params.source_lang, &params.target_lang),
                video,
            )
        };

        self.translator
            .retranslate(
                &request.rows,
                &request.targets,
                &languages,
                request.hint.as_deref(),
                video.as_ref(),
            )
            .await
    }

    /// Start the periodic TTL sweep.
    pub fn spawn_cleanup(&self) -> JoinHandle<()> {
        self.registry
            .clone()
            .spawn_cleanup_loop(self.config.jobs.cleanup_interval())
    }

    fn job(&self, job_id: &str) -> Result<SharedJob> {
        self.registry
            .get(job_id)
            .ok_or_else(|| BisubError::JobNotFound(job_id.to_string()))
    }
}
