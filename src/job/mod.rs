// Job record and state machine
//
// A job is written by the single task running its pipeline and read by
// status queries and the outbox consumer. Every mutation goes through the
// methods below so status changes are checked against the legal transitions
// and each one is mirrored into the outbox.

pub mod outbox;
pub mod registry;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

pub use outbox::Outbox;
pub use registry::JobRegistry;

use crate::error::{BisubError, Result};
use crate::source::{FetchRequest, SourceRef, VideoMetadata, validate_remote, validate_trim};

/// A job shared between its pipeline task and readers.
pub type SharedJob = Arc<RwLock<Job>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Downloading,
    DownloadComplete,
    Transcribing,
    Translating,
    Merging,
    Burning,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Downloading => "downloading",
            JobStatus::DownloadComplete => "download_complete",
            JobStatus::Transcribing => "transcribing",
            JobStatus::Translating => "translating",
            JobStatus::Merging => "merging",
            JobStatus::Burning => "burning",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether a job in this status may move to `next`.
    ///
    /// Working statuses may be re-entered to report progress within a stage.
    /// `burning` is exclusive: a second burn cannot join a running one.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;

        if next == Failed {
            return !self.is_terminal();
        }
        if *self == next {
            return matches!(self, Pending | Downloading | Transcribing | Translating | Merging);
        }
        matches!(
            (self, next),
            (Pending, Downloading)
                | (Downloading, DownloadComplete)
                | (DownloadComplete, Transcribing)
                | (Transcribing, Translating)
                | (Translating, Merging)
                | (Merging, Completed)
                | (Merging, Burning)
                | (Completed, Burning)
                | (Burning, Completed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Files a job can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Srt,
    Ass,
    Audio,
    SourceVideo,
    Video,
}

/// Parameters a job was created with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    pub source: SourceRef,
    pub source_lang: String,
    pub target_lang: String,
    pub start: Option<f64>,
    pub end: Option<f64>,
}

impl JobRequest {
    pub fn validate(&self) -> Result<()> {
        if self.source_lang.trim().is_empty() || self.target_lang.trim().is_empty() {
            return Err(BisubError::InvalidInput(
                "source and target languages are required".to_string(),
            ));
        }
        if let SourceRef::Remote(reference) = &self.source {
            validate_remote(reference)?;
        }
        validate_trim(self.start, self.end)
    }

    pub fn fetch_request(&self) -> FetchRequest {
        FetchRequest {
            source: self.source.clone(),
            start: self.start,
            end: self.end,
        }
    }
}

/// Error triple surfaced to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub code: String,
    pub message: String,
    pub detail: String,
}

impl From<&BisubError> for JobError {
    fn from(err: &BisubError) -> Self {
        let (code, message) = err.code();
        Self {
            code: code.to_string(),
            message: message.to_string(),
            detail: err.to_string(),
        }
    }
}

/// Events delivered through a job's outbox.
///
/// Serialized as `{"event": <kind>, "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum JobEvent {
    Progress {
        status: JobStatus,
        progress: f32,
        current_step: String,
        message: String,
    },
    DownloadComplete {
        status: JobStatus,
        progress: f32,
        title: String,
        duration: f64,
        width: u32,
        height: u32,
        fps: f64,
    },
    Complete {
        status: JobStatus,
        progress: f32,
    },
    Error {
        code: String,
        message: String,
        detail: String,
    },
    /// Keepalive for idle connections
    Ping,
}

impl JobEvent {
    /// No further events follow a terminal event within one run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Complete { .. } | JobEvent::Error { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            JobEvent::Progress { .. } => "progress",
            JobEvent::DownloadComplete { .. } => "download_complete",
            JobEvent::Complete { .. } => "complete",
            JobEvent::Error { .. } => "error",
            JobEvent::Ping => "ping",
        }
    }
}

/// Read model of a job for status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: String,
    pub status: JobStatus,
    pub progress: f32,
    pub current_step: Option<String>,
    pub error: Option<JobError>,
    pub outputs: BTreeMap<OutputKind, PathBuf>,
    pub metadata: Option<VideoMetadata>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct Job {
    id: String,
    request: JobRequest,
    status: JobStatus,
    progress: f32,
    current_step: Option<String>,
    error: Option<JobError>,
    outputs: BTreeMap<OutputKind, PathBuf>,
    metadata: Option<VideoMetadata>,
    work_dir: PathBuf,
    outbox: Arc<Outbox>,
    created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(id: impl Into<String>, request: JobRequest, work_dir: PathBuf) -> Self {
        Self {
            id: id.into(),
            request,
            status: JobStatus::Pending,
            progress: 0.0,
            current_step: None,
            error: None,
            outputs: BTreeMap::new(),
            metadata: None,
            work_dir,
            outbox: Arc::new(Outbox::new()),
            created_at: Utc::now(),
        }
    }

    pub fn into_shared(self) -> SharedJob {
        Arc::new(RwLock::new(self))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn request(&self) -> &JobRequest {
        &self.request
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn current_step(&self) -> Option<&str> {
        self.current_step.as_deref()
    }

    pub fn error(&self) -> Option<&JobError> {
        self.error.as_ref()
    }

    pub fn output(&self, kind: OutputKind) -> Option<&PathBuf> {
        self.outputs.get(&kind)
    }

    pub fn outputs(&self) -> &BTreeMap<OutputKind, PathBuf> {
        &self.outputs
    }

    pub fn metadata(&self) -> Option<&VideoMetadata> {
        self.metadata.as_ref()
    }

    pub fn work_dir(&self) -> &PathBuf {
        &self.work_dir
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Handle to the outbox of the current run.
    pub fn outbox(&self) -> Arc<Outbox> {
        self.outbox.clone()
    }

    /// Start a new run with an empty outbox; readers of the old one keep it.
    pub fn reset_outbox(&mut self) -> Arc<Outbox> {
        self.outbox = Arc::new(Outbox::new());
        self.outbox.clone()
    }

    pub fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(BisubError::InvalidState(format!(
                "job {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Enter `status` at `progress` and emit a progress event.
    pub fn report_progress(
        &mut self,
        status: JobStatus,
        progress: f32,
        step: &str,
        message: &str,
    ) -> Result<()> {
        self.transition(status)?;
        self.progress = progress;
        self.current_step = Some(step.to_string());
        self.outbox.push(JobEvent::Progress {
            status,
            progress,
            current_step: step.to_string(),
            message: message.to_string(),
        });
        Ok(())
    }

    /// Record acquisition results and emit the non-terminal `download_complete` event.
    pub fn finish_download(&mut self, metadata: VideoMetadata, progress: f32) -> Result<()> {
        self.transition(JobStatus::DownloadComplete)?;
        self.progress = progress;
        self.current_step = Some("download_complete".to_string());
        self.outbox.push(JobEvent::DownloadComplete {
            status: JobStatus::DownloadComplete,
            progress,
            title: metadata.title.clone(),
            duration: metadata.duration,
            width: metadata.width,
            height: metadata.height,
            fps: metadata.fps,
        });
        self.metadata = Some(metadata);
        Ok(())
    }

    pub fn complete(&mut self) -> Result<()> {
        self.transition(JobStatus::Completed)?;
        self.progress = 100.0;
        self.current_step = Some("complete".to_string());
        self.outbox.push(JobEvent::Complete {
            status: JobStatus::Completed,
            progress: 100.0,
        });
        Ok(())
    }

    /// Record `err` and emit the terminal error event. Outputs stored so far are kept.
    ///
    /// A job that already finished keeps its status; returns whether it was failed.
    pub fn fail(&mut self, err: &BisubError) -> bool {
        if !self.status.can_transition_to(JobStatus::Failed) {
            return false;
        }
        let error = JobError::from(err);
        self.status = JobStatus::Failed;
        self.outbox.push(JobEvent::Error {
            code: error.code.clone(),
            message: error.message.clone(),
            detail: error.detail.clone(),
        });
        self.error = Some(error);
        true
    }

    pub fn record_output(&mut self, kind: OutputKind, path: PathBuf) {
        self.outputs.insert(kind, path);
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            current_step: self.current_step.clone(),
            error: self.error.clone(),
            outputs: self.outputs.clone(),
            metadata: self.metadata.clone(),
            created_at: self.created_at,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        use JobStatus::*;
        let path = [
            Pending,
            Downloading,
            DownloadComplete,
            Transcribing,
            Translating,
            Merging,
            Burning,
            Completed,
            Burning,
            Completed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_illegal_transitions() {
        use JobStatus::*;
        assert!(!Pending.can_transition_to(Transcribing));
        assert!(!DownloadComplete.can_transition_to(Completed));
        assert!(!Burning.can_transition_to(Burning));
        assert!(!DownloadComplete.can_transition_to(DownloadComplete));
        assert!(!Completed.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Downloading));
        assert!(Translating.can_transition_to(Translating));
        assert!(Merging.can_transition_to(Failed));
    }

    #[test]
    fn test_report_progress_rejects_illegal_move() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = job_in(dir.path());

        let result = job.report_progress(JobStatus::Translating, 50.0, "translate", "Translating");

        assert!(matches!(result, Err(BisubError::InvalidState(_))));
        assert_eq!(job.status(), JobStatus::Pending);
        assert!(job.outbox().is_empty());
    }

    #[test]
    fn test_fail_records_error_triple() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = job_in(dir.path());
        job.report_progress(JobStatus::Downloading, 0.0, "download", "Downloading video")
            .unwrap();
        job.record_output(OutputKind::SourceVideo, dir.path().join("source.mp4"));

        assert!(job.fail(&BisubError::Download("HTTP 403".to_string())));

        let snapshot = job.snapshot();
        assert_eq!(snapshot.status, JobStatus::Failed);
        let error = snapshot.error.unwrap();
        assert_eq!(error.code, "download_failed");
        assert!(error.detail.contains("HTTP 403"));
        assert!(snapshot.outputs.contains_key(&OutputKind::SourceVideo));

        let events = job.outbox().drain();
        assert_eq!(events.len(), 2);
        assert!(events[1].is_terminal());
    }

    #[test]
    fn test_fail_leaves_finished_job_alone() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = job_in(dir.path());
        job.status = JobStatus::Completed;

        assert!(!job.fail(&BisubError::Transcription("late".to_string())));

        assert_eq!(job.status(), JobStatus::Completed);
        assert!(job.error().is_none());
        assert!(job.outbox().is_empty());
    }

    #[test]
    fn test_event_wire_format() {
        let event = JobEvent::Progress {
            status: JobStatus::Translating,
            progress: 50.0,
            current_step: "translate".to_string(),
            message: "Translating subtitles".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "progress");
        assert_eq!(json["data"]["status"], "translating");
        assert_eq!(json["data"]["current_step"], "translate");

        let complete = serde_json::to_value(JobEvent::Complete {
            status: JobStatus::Completed,
            progress: 100.0,
        })
        .unwrap();
        assert_eq!(complete["event"], "complete");
        assert_eq!(complete["data"]["status"], "completed");

        assert_eq!(serde_json::to_value(JobEvent::Ping).unwrap()["event"], "ping");
    }

    #[test]
    fn test_reset_outbox_keeps_old_handle() {
        let dir = tempfile::tempdir().unwrap();
        let mut job = job_in(dir.path());
        let old = job.outbox();
        job.report_progress(JobStatus::Downloading, 0.0, "download", "Downloading video")
            .unwrap();

        let fresh = job.reset_outbox();

        assert_eq!(old.len(), 1);
        assert!(fresh.is_empty());
        assert!(Arc::ptr_eq(&fresh, &job.outbox()));
    }

    #[test]
    fn test_request_validation() {
        let mut request = remote_request();
        assert!(request.validate().is_ok());

        request.start = Some(30.0);
        request.end = Some(10.0);
        assert!(matches!(request.validate(), Err(BisubError::InvalidInput(_))));

        let mut request = remote_request();
        request.source = SourceRef::Remote("file:///etc/passwd".to_string());
        assert!(request.validate().is_err());

        let mut request = remote_request();
        request.target_lang = " ".to_string();
        assert!(request.validate().is_err());
    }
}
