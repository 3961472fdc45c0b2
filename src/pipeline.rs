// Pipeline orchestrator
//
// Entry points never return errors: each stage failure is caught once at the
// entry point, recorded on the job and emitted as a terminal error event.
//
// Stages:
// 1. Acquire: fetch (with trim), extract audio, `download_complete`
// 2. Subtitle: transcribe, translate, merge, write SRT + ASS, optional burn
// 3. Burn: render client-edited SRT text onto the source video

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use crate::config::ProgressConfig;
use crate::error::{BisubError, Result};
use crate::job::{JobStatus, Outbox, OutputKind, SharedJob};
use crate::media::MediaProcessor;
use crate::source::VideoSource;
use crate::subtitle::{self, ass, srt};
use crate::transcribe::Transcriber;
use crate::translate::{LanguagePair, SubtitleTranslator, VideoContext};

const SRT_FILE: &str = "subtitle.srt";
const ASS_FILE: &str = "subtitle.ass";
const AUDIO_FILE: &str = "audio.mp3";
const BURN_INPUT_FILE: &str = "burn_input.srt";
const OUTPUT_VIDEO_FILE: &str = "output.mp4";

/// Sequences the stages of a job over its collaborators.
pub struct Pipeline {
    source: Arc<dyn VideoSource>,
    media: Arc<dyn MediaProcessor>,
    transcriber: Arc<dyn Transcriber>,
    translator: Arc<SubtitleTranslator>,
    progress: ProgressConfig,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn VideoSource>,
        media: Arc<dyn MediaProcessor>,
        transcriber: Arc<dyn Transcriber>,
        translator: Arc<SubtitleTranslator>,
        progress: ProgressConfig,
    ) -> Self {
        Self {
            source,
            media,
            transcriber,
            translator,
            progress,
        }
    }

    /// Acquire the video and its audio, stopping at `download_complete`.
    pub async fn run_download(&self, job: &SharedJob) {
        if let Err(e) = self.acquire(job).await {
            fail(job, &e);
        }
    }

    /// Transcribe, translate and serialize an acquired job.
    pub async fn run_subtitle(&self, job: &SharedJob, burn: bool) {
        if let Err(e) = self.subtitle(job, burn).await {
            fail(job, &e);
        }
    }

    /// Acquisition through completion in one run.
    pub async fn run_pipeline(&self, job: &SharedJob, burn: bool) {
        let result = async {
            self.acquire(job).await?;
            self.subtitle(job, burn).await
        }
        .await;

        if let Err(e) = result {
            fail(job, &e);
        }
    }

    /// Claim an acquired job for its subtitle run and give it a fresh outbox.
    ///
    /// Progress events for the run start arriving once `run_subtitle` executes.
    pub fn begin_subtitle(&self, job: &SharedJob) -> Result<Arc<Outbox>> {
        let mut job = job.write();
        if job.status() != JobStatus::DownloadComplete {
            return Err(BisubError::InvalidState(format!(
                "job {} is {}, subtitles need a downloaded video",
                job.id(),
                job.status()
            )));
        }
        job.transition(JobStatus::Transcribing)?;
        Ok(job.reset_outbox())
    }

    /// Claim a completed job for a burn run.
    ///
    /// Rejected without touching the job while another burn is in flight.
    pub fn begin_burn(&self, job: &SharedJob) -> Result<Arc<Outbox>> {
        let mut job = job.write();
        match job.status() {
            JobStatus::Burning => Err(BisubError::BurnInProgress(job.id().to_string())),
            JobStatus::Completed if job.output(OutputKind::SourceVideo).is_some() => {
                let outbox = job.reset_outbox();
                job.report_progress(
                    JobStatus::Burning,
                    self.progress.burn,
                    "burn",
                    "Burning subtitles into video",
                )?;
                Ok(outbox)
            }
            JobStatus::Completed => Err(BisubError::InvalidState(format!(
                "job {} has no source video to burn into",
                job.id()
            ))),
            status => Err(BisubError::InvalidState(format!(
                "job {} is {}, burning needs a completed job",
                job.id(),
                status
            ))),
        }
    }

    /// Burn `subtitle_text` (SRT) into a job claimed with `begin_burn`.
    pub async fn run_burn(&self, job: &SharedJob, subtitle_text: &str) {
        if let Err(e) = self.burn(job, subtitle_text).await {
            fail(job, &e);
        }
    }

    async fn acquire(&self, job: &SharedJob) -> Result<()> {
        let (id, request, work_dir) = {
            let job = job.read();
            (job.id().to_string(), job.request().clone(), job.work_dir().clone())
        };

        job.write().report_progress(
            JobStatus::Downloading,
            self.progress.download,
            "download",
            "Downloading video",
        )?;
        let started = Instant::now();
        let fetched = self
            .source
            .fetch(&request.fetch_request(), &work_dir)
            .await?;
        let metadata = fetched.metadata.with_trim(request.start, request.end);
        job.write()
            .record_output(OutputKind::SourceVideo, fetched.path.clone());
        step_done(&id, "download", started);

        job.write().report_progress(
            JobStatus::Downloading,
            self.progress.extract_audio,
            "extract_audio",
            "Extracting audio",
        )?;
        let started = Instant::now();
        let audio = work_dir.join(AUDIO_FILE);
        self.media.extract_audio(&fetched.path, &audio).await?;
        job.write().record_output(OutputKind::Audio, audio);
        step_done(&id, "extract_audio", started);

        info!(
            job_id = %id,
            title = %metadata.title,
            duration = metadata.duration,
            "Download complete"
        );
        job.write()
            .finish_download(metadata, self.progress.download_complete)
    }

    async fn subtitle(&self, job: &SharedJob, burn: bool) -> Result<()> {
        let (id, request, work_dir, audio, metadata) = {
            let job = job.read();
            (
                job.id().to_string(),
                job.request().clone(),
                job.work_dir().clone(),
                job.output(OutputKind::Audio).cloned(),
                job.metadata().cloned(),
            )
        };
        let audio = audio.ok_or_else(|| {
            BisubError::InvalidState(format!("job {} has no extracted audio", id))
        })?;

        job.write().report_progress(
            JobStatus::Transcribing,
            self.progress.transcribe,
            "transcribe",
            "Transcribing audio",
        )?;
        let started = Instant::now();
        let original = self
            .transcriber
            .transcribe(&audio, &request.source_lang)
            .await?;
        info!(job_id = %id, entries = original.len(), "Transcription finished");
        step_done(&id, "transcribe", started);

        job.write().report_progress(
            JobStatus::Translating,
            self.progress.translate_start,
            "translate",
            "Translating subtitles",
        )?;
        let started = Instant::now();
        let languages = LanguagePair::new(&request.source_lang, &request.target_lang);
        let video = metadata.as_ref().map(|m| VideoContext {
            title: Some(m.title.clone()),
            description: m.description.clone(),
        });
        let progress = &self.progress;
        let mut on_progress = |done: usize, total: usize| {
            let message = format!("Translated {}/{} entries", done, total);
            if let Err(e) = job.write().report_progress(
                JobStatus::Translating,
                progress.translation(done, total),
                "translate",
                &message,
            ) {
                warn!("Translation progress not recorded: {}", e);
            }
        };
        let translated = self
            .translator
            .translate_subtitle(&original, &languages, video.as_ref(), &mut on_progress)
            .await?;
        step_done(&id, "translate", started);

        job.write().report_progress(
            JobStatus::Merging,
            self.progress.merge,
            "merge",
            "Merging bilingual subtitles",
        )?;
        let started = Instant::now();
        let merged = subtitle::merge(&original, &translated)?;

        let srt_path = work_dir.join(SRT_FILE);
        tokio::fs::write(&srt_path, srt::serialize(&merged)).await?;
        job.write().record_output(OutputKind::Srt, srt_path);

        let (width, height) = metadata
            .as_ref()
            .map(|m| (m.width, m.height))
            .unwrap_or((1920, 1080));
        let ass_path = work_dir.join(ASS_FILE);
        let styled = ass::serialize_bilingual(&original, &translated, width, height)?;
        tokio::fs::write(&ass_path, styled).await?;
        job.write().record_output(OutputKind::Ass, ass_path.clone());
        step_done(&id, "merge", started);

        if burn {
            job.write().report_progress(
                JobStatus::Burning,
                self.progress.burn,
                "burn",
                "Burning subtitles into video",
            )?;
            self.render(job, &id, &ass_path, &work_dir).await?;
        }

        job.write().complete()?;
        info!(job_id = %id, "Pipeline complete");
        Ok(())
    }

    async fn burn(&self, job: &SharedJob, subtitle_text: &str) -> Result<()> {
        let (id, work_dir) = {
            let job = job.read();
            (job.id().to_string(), job.work_dir().clone())
        };

        let parsed = srt::parse(subtitle_text)?;
        info!(job_id = %id, entries = parsed.len(), "Burn requested");

        let input = work_dir.join(BURN_INPUT_FILE);
        tokio::fs::write(&input, subtitle_text).await?;
        self.render(job, &id, &input, &work_dir).await?;

        job.write().complete()?;
        info!(job_id = %id, "Burn complete");
        Ok(())
    }

    /// Burn `subtitles` onto the job's source video and record the result.
    async fn render(
        &self,
        job: &SharedJob,
        id: &str,
        subtitles: &Path,
        work_dir: &Path,
    ) -> Result<()> {
        let video = job
            .read()
            .output(OutputKind::SourceVideo)
            .cloned()
            .ok_or_else(|| BisubError::InvalidState(format!("job {} has no source video", id)))?;

        let started = Instant::now();
        let output = work_dir.join(OUTPUT_VIDEO_FILE);
        self.media.burn_subtitles(&video, subtitles, &output).await?;
        job.write().record_output(OutputKind::Video, output);
        step_done(id, "burn", started);
        Ok(())
    }
}

fn step_done(job_id: &str, step: &str, started: Instant) {
    info!(
        job_id = %job_id,
        step = step,
        duration_ms = started.elapsed().as_millis() as u64,
        "Step done"
    );
}

/// Record `err` on the job and close its event stream.
fn fail(job: &SharedJob, err: &BisubError) {
    let mut job = job.write();
    let (code, _) = err.code();
    if job.fail(err) {
        error!(job_id = %job.id(), error_code = code, error = %err, "Pipeline failed");
    } else {
        warn!(
            job_id = %job.id(),
            status = %job.status(),
            error = %err,
            "Error after job finished, status kept"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranslateConfig;
    use crate::job::test_support::{job_in, remote_request};
    use crate::job::{Job, JobEvent};
    use crate::media::MockMediaProcessor;
    use crate::source::{FetchedVideo, MockVideoSource, VideoMetadata};
    use crate::subtitle::test_support::numbered_subtitle;
    use crate::transcribe::MockTranscriber;
    use crate::translate::client::MockChatModel;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Mocks {
        source: MockVideoSource,
        media: MockMediaProcessor,
        transcriber: MockTranscriber,
        model: MockChatModel,
    }

    impl Mocks {
        fn new() -> Self {
            Self {
                source: MockVideoSource::new(),
                media: MockMediaProcessor::new(),
                transcriber: MockTranscriber::new(),
                model: MockChatModel::new(),
            }
        }

        fn into_pipeline(self) -> Pipeline {
            Pipeline::new(
                Arc::new(self.source),
                Arc::new(self.media),
                Arc::new(self.transcriber),
                Arc::new(SubtitleTranslator::new(
                    Arc::new(self.model),
                    TranslateConfig::default(),
                )),
                ProgressConfig::default(),
            )
        }

        /// Acquisition that succeeds with a 300 s, 1280x720 video.
        fn acquisition_ok(&mut self, dir: &Path) {
            let video = dir.join("source.mp4");
            std::fs::write(&video, b"video").unwrap();
            self.source.expect_fetch().times(1).returning(move |_, _| {
                Ok(FetchedVideo {
                    path: video.clone(),
                    metadata: VideoMetadata {
                        title: "Conference talk".to_string(),
                        description: Some("About subtitles".to_string()),
                        duration: 300.0,
                        width: 1280,
                        height: 720,
                        fps: 30.0,
                    },
                })
            });
            self.media
                .expect_extract_audio()
                .times(1)
                .returning(|_, audio| {
                    std::fs::write(audio, b"audio").unwrap();
                    Ok(())
                });
        }

        fn transcribes(&mut self, entries: usize) {
            self.transcriber
                .expect_transcribe()
                .times(1)
                .returning(move |_, language| {
                    assert_eq!(language, "en");
                    Ok(numbered_subtitle(entries))
                });
        }

        fn translates(&mut self, calls: usize) {
            self.model
                .expect_complete()
                .times(calls)
                .returning(|_, prompt| Ok(answer_batch(prompt)));
        }
    }

    fn answer_batch(prompt: &str) -> String {
        prompt
            .lines()
            .filter_map(|line| {
                let (number, text) = line.split_once(". ")?;
                number.parse::<usize>().ok()?;
                Some(format!("{}. 譯 {}", number, text))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn steps(events: &[JobEvent]) -> Vec<String> {
        events
            .iter()
            .map(|event| match event {
                JobEvent::Progress {
                    current_step,
                    progress,
                    ..
                } => format!("{}@{}", current_step, progress),
                other => other.kind().to_string(),
            })
            .collect()
    }

    fn completed_job(dir: &Path) -> SharedJob {
        let mut job = job_in(dir);
        for status in [
            JobStatus::Downloading,
            JobStatus::DownloadComplete,
            JobStatus::Transcribing,
            JobStatus::Translating,
            JobStatus::Merging,
            JobStatus::Completed,
        ] {
            job.transition(status).unwrap();
        }
        let video = dir.join("source.mp4");
        std::fs::write(&video, b"video").unwrap();
        job.record_output(OutputKind::SourceVideo, video);
        job.into_shared()
    }

    const EDITED_SRT: &str = "1\n00:00:01,000 --> 00:00:02,000\n你好\nHello\n";

    #[tokio::test]
    async fn test_stray_run_keeps_completed_job() {
        let dir = tempfile::tempdir().unwrap();
        let mut mocks = Mocks::new();
        mocks.transcriber.expect_transcribe().never();
        let pipeline = mocks.into_pipeline();
        let job = completed_job(dir.path());

        pipeline.run_subtitle(&job, false).await;

        let job = job.read();
        assert_eq!(job.status(), JobStatus::Completed);
        assert!(job.error().is_none());
        assert!(job.outbox().is_empty());
    }

    #[tokio::test]
    async fn test_full_pipeline_three_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut mocks = Mocks::new();
        mocks.acquisition_ok(dir.path());
        mocks.transcribes(3);
        mocks.translates(1);
        let pipeline = mocks.into_pipeline();
        let job = job_in(dir.path()).into_shared();

        pipeline.run_pipeline(&job, false).await;

        let snapshot = job.read().snapshot();
        assert_eq!(snapshot.status, JobStatus::Completed);
        assert_eq!(snapshot.progress, 100.0);
        assert!(snapshot.error.is_none());

        let events = job.read().outbox().drain();
        assert_eq!(
            steps(&events),
            vec![
                "download@0",
                "extract_audio@15",
                "download_complete",
                "transcribe@20",
                "translate@50",
                "translate@70",
                "merge@70",
                "complete",
            ]
        );

        let srt_text = std::fs::read_to_string(&snapshot.outputs[&OutputKind::Srt]).unwrap();
        assert!(srt_text.contains("譯 Line 1\nLine 1\n"));
        let ass_text = std::fs::read_to_string(&snapshot.outputs[&OutputKind::Ass]).unwrap();
        assert!(ass_text.contains("Dialogue:"));
        assert!(!snapshot.outputs.contains_key(&OutputKind::Video));
    }

    #[tokio::test]
    async fn test_acquisition_failure_skips_later_stages() {
        let dir = tempfile::tempdir().unwrap();
        let mut mocks = Mocks::new();
        mocks
            .source
            .expect_fetch()
            .times(1)
            .returning(|_, _| Err(BisubError::Download("Video unavailable".to_string())));
        mocks.media.expect_extract_audio().never();
        mocks.transcriber.expect_transcribe().never();
        mocks.model.expect_complete().never();
        let pipeline = mocks.into_pipeline();
        let job = job_in(dir.path()).into_shared();

        pipeline.run_pipeline(&job, false).await;

        let snapshot = job.read().snapshot();
        assert_eq!(snapshot.status, JobStatus::Failed);
        let error = snapshot.error.unwrap();
        assert_eq!(error.code, "download_failed");
        assert!(error.detail.contains("Video unavailable"));

        let events = job.read().outbox().drain();
        assert_eq!(steps(&events), vec!["download@0", "error"]);
        assert!(events.last().unwrap().is_terminal());
    }

    #[tokio::test]
    async fn test_twenty_five_entries_report_three_batches() {
        let dir = tempfile::tempdir().unwrap();
        let mut mocks = Mocks::new();
        mocks.acquisition_ok(dir.path());
        mocks.transcribes(25);
        mocks.translates(3);
        let pipeline = mocks.into_pipeline();
        let job = job_in(dir.path()).into_shared();

        pipeline.run_pipeline(&job, false).await;

        assert_eq!(job.read().status(), JobStatus::Completed);
        let messages: Vec<String> = job
            .read()
            .outbox()
            .drain()
            .into_iter()
            .filter_map(|event| match event {
                JobEvent::Progress { message, .. } if message.starts_with("Translated") => {
                    Some(message)
                }
                _ => None,
            })
            .collect();
        assert_eq!(
            messages,
            vec![
                "Translated 10/25 entries",
                "Translated 20/25 entries",
                "Translated 25/25 entries",
            ]
        );
    }

    #[tokio::test]
    async fn test_download_only_then_subtitle_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut mocks = Mocks::new();
        mocks.acquisition_ok(dir.path());
        mocks.transcribes(2);
        mocks.translates(1);
        let pipeline = mocks.into_pipeline();
        let mut request = remote_request();
        request.start = Some(10.0);
        request.end = Some(70.0);
        let job = Job::new("split0000001", request, dir.path().to_path_buf()).into_shared();

        pipeline.run_download(&job).await;

        assert_eq!(job.read().status(), JobStatus::DownloadComplete);
        assert_eq!(job.read().metadata().unwrap().duration, 60.0);
        let first_run = job.read().outbox();
        let events = first_run.drain();
        assert!(matches!(
            events.last(),
            Some(JobEvent::DownloadComplete { width: 1280, duration, .. }) if *duration == 60.0
        ));
        assert!(!events.last().unwrap().is_terminal());

        let second_run = pipeline.begin_subtitle(&job).unwrap();
        assert!(!Arc::ptr_eq(&first_run, &second_run));
        pipeline.run_subtitle(&job, false).await;

        assert_eq!(job.read().status(), JobStatus::Completed);
        let events = second_run.drain();
        assert_eq!(steps(&events)[0], "transcribe@20");
        assert_eq!(steps(&events).last().unwrap(), "complete");
        assert!(first_run.is_empty());
    }

    #[tokio::test]
    async fn test_begin_subtitle_requires_download() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Mocks::new().into_pipeline();
        let job = job_in(dir.path()).into_shared();

        assert!(matches!(
            pipeline.begin_subtitle(&job),
            Err(BisubError::InvalidState(_))
        ));
        assert_eq!(job.read().status(), JobStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_exhaustion_fails_job_keeping_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let mut mocks = Mocks::new();
        mocks.acquisition_ok(dir.path());
        mocks.transcribes(3);
        mocks.model.expect_complete().times(6).returning(|_, _| {
            Ok("Rate limit reached for model. Please try again in 0m1s.".to_string())
        });
        let pipeline = mocks.into_pipeline();
        let job = job_in(dir.path()).into_shared();

        pipeline.run_pipeline(&job, false).await;

        let snapshot = job.read().snapshot();
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(snapshot.error.unwrap().code, "translation_rate_limited");
        assert!(snapshot.outputs.contains_key(&OutputKind::Audio));
        assert!(!snapshot.outputs.contains_key(&OutputKind::Srt));
    }

    #[tokio::test]
    async fn test_full_pipeline_with_burn() {
        let dir = tempfile::tempdir().unwrap();
        let mut mocks = Mocks::new();
        mocks.acquisition_ok(dir.path());
        mocks.transcribes(1);
        mocks.translates(1);
        mocks
            .media
            .expect_burn_subtitles()
            .withf(|video, subtitles, output| {
                video.ends_with("source.mp4")
                    && subtitles.ends_with(ASS_FILE)
                    && output.ends_with(OUTPUT_VIDEO_FILE)
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        let pipeline = mocks.into_pipeline();
        let job = job_in(dir.path()).into_shared();

        pipeline.run_pipeline(&job, true).await;

        let snapshot = job.read().snapshot();
        assert_eq!(snapshot.status, JobStatus::Completed);
        assert!(snapshot.outputs.contains_key(&OutputKind::Video));
        let events = job.read().outbox().drain();
        let steps = steps(&events);
        assert_eq!(steps[steps.len() - 2..], ["burn@80", "complete"]);
    }

    #[tokio::test]
    async fn test_burn_rejected_while_burning() {
        let dir = tempfile::tempdir().unwrap();
        let mut mocks = Mocks::new();
        mocks.media.expect_burn_subtitles().never();
        let pipeline = mocks.into_pipeline();
        let job = completed_job(dir.path());

        let outbox = pipeline.begin_burn(&job).unwrap();
        let before = job.read().snapshot();
        let queued = outbox.len();

        let second = pipeline.begin_burn(&job);

        assert!(matches!(second, Err(BisubError::BurnInProgress(_))));
        assert_eq!(job.read().snapshot(), before);
        assert_eq!(job.read().status(), JobStatus::Burning);
        assert!(Arc::ptr_eq(&outbox, &job.read().outbox()));
        assert_eq!(outbox.len(), queued);
    }

    #[tokio::test]
    async fn test_reburn_writes_edited_text() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut mocks = Mocks::new();
        mocks
            .media
            .expect_burn_subtitles()
            .returning(move |_, subtitles, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                assert_eq!(std::fs::read_to_string(subtitles).unwrap(), EDITED_SRT);
                Ok(())
            });
        let pipeline = mocks.into_pipeline();
        let job = completed_job(dir.path());

        for _ in 0..2 {
            let outbox = pipeline.begin_burn(&job).unwrap();
            pipeline.run_burn(&job, EDITED_SRT).await;
            assert_eq!(steps(&outbox.drain()), vec!["burn@80", "complete"]);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let snapshot = job.read().snapshot();
        assert_eq!(snapshot.status, JobStatus::Completed);
        assert!(snapshot.outputs[&OutputKind::Video].ends_with(OUTPUT_VIDEO_FILE));
    }

    #[tokio::test]
    async fn test_burn_with_malformed_text_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut mocks = Mocks::new();
        mocks.media.expect_burn_subtitles().never();
        let pipeline = mocks.into_pipeline();
        let job = completed_job(dir.path());

        pipeline.begin_burn(&job).unwrap();
        pipeline.run_burn(&job, "not a subtitle").await;

        let snapshot = job.read().snapshot();
        assert_eq!(snapshot.status, JobStatus::Failed);
        assert_eq!(snapshot.error.unwrap().code, "subtitle_parse_failed");
    }

    #[tokio::test]
    async fn test_burn_requires_completed_job() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Mocks::new().into_pipeline();
        let job = job_in(dir.path()).into_shared();

        assert!(matches!(
            pipeline.begin_burn(&job),
            Err(BisubError::InvalidState(_))
        ));
        assert_eq!(job.read().status(), JobStatus::Pending);
    }
}
