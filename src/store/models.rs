use chrono::{DateTime, Local, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Task lifecycle states. Transitions are monotonic through the pipeline;
/// `Completed` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Queued,
    ExtractingAudio,
    GeneratingSubtitles,
    CorrectingSubtitles,
    Translating,
    Cleaning,
    Completed,
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::ExtractingAudio => "extracting_audio",
            Self::GeneratingSubtitles => "generating_subtitles",
            Self::CorrectingSubtitles => "correcting_subtitles",
            Self::Translating => "translating",
            Self::Cleaning => "cleaning",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(Self::Queued),
            "extracting_audio" => Some(Self::ExtractingAudio),
            "generating_subtitles" => Some(Self::GeneratingSubtitles),
            "correcting_subtitles" => Some(Self::CorrectingSubtitles),
            "translating" => Some(Self::Translating),
            "cleaning" => Some(Self::Cleaning),
            "completed" => Some(Self::Completed),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of media a task was submitted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    Video,
    Audio,
}

const VIDEO_EXTENSIONS: [&str; 4] = ["mp4", "avi", "mkv", "mov"];
const AUDIO_EXTENSIONS: [&str; 5] = ["mp3", "wav", "m4a", "aac", "flac"];

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            _ => None,
        }
    }

    /// Classify a file by extension, or None for unsupported formats.
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_string_lossy().to_lowercase();
        if VIDEO_EXTENSIONS.contains(&extension.as_str()) {
            Some(Self::Video)
        } else if AUDIO_EXTENSIONS.contains(&extension.as_str()) {
            Some(Self::Audio)
        } else {
            None
        }
    }
}

/// Kind of a physical file tied to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    Video,
    Audio,
    Subtitle,
    SubtitleProcessed,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Subtitle => "subtitle",
            Self::SubtitleProcessed => "subtitle_processed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "video" => Some(Self::Video),
            "audio" => Some(Self::Audio),
            "subtitle" => Some(Self::Subtitle),
            "subtitle_processed" => Some(Self::SubtitleProcessed),
            _ => None,
        }
    }
}

macro_rules! sql_string_enum {
    ($name:ident) => {
        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(self.as_str().into())
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let text = value.as_str()?;
                Self::parse(text).ok_or(FromSqlError::InvalidType)
            }
        }
    };
}

sql_string_enum!(TaskStatus);
sql_string_enum!(MediaKind);
sql_string_enum!(FileKind);

/// One unit of work: a media file on its way to becoming a subtitle file.
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub task_id: String,
    pub original_filename: String,
    pub stored_filename: String,
    pub file_type: MediaKind,
    pub status: TaskStatus,
    pub progress: u8,
    pub message: String,
    pub target_lang: Option<String>,
    pub keep_original: bool,
    pub correct: bool,
    pub model_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub process_time: Option<f64>,
}

impl TaskRecord {
    /// A freshly submitted task, queued at zero progress.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_id: String,
        original_filename: String,
        stored_filename: String,
        file_type: MediaKind,
        target_lang: Option<String>,
        keep_original: bool,
        correct: bool,
        model_name: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            original_filename,
            stored_filename,
            file_type,
            status: TaskStatus::Queued,
            progress: 0,
            message: "Waiting in queue".to_string(),
            target_lang,
            keep_original,
            correct,
            model_name,
            created_at: now,
            updated_at: now,
            completed_at: None,
            error_message: None,
            process_time: None,
        }
    }
}

/// A physical file tied to a task. Temporary records (and their files) are
/// reaped during the cleanup stage; the rest persist for later download.
#[derive(Debug, Clone, Serialize)]
pub struct FileRecord {
    pub file_id: String,
    pub task_id: String,
    pub file_type: FileKind,
    pub original_filename: String,
    pub stored_filename: String,
    pub file_path: PathBuf,
    pub is_temporary: bool,
    pub created_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn new(task_id: &str, file_type: FileKind, file_path: PathBuf, is_temporary: bool) -> Self {
        let stored_filename = file_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        Self {
            file_id: Uuid::new_v4().to_string(),
            task_id: task_id.to_string(),
            file_type,
            original_filename: stored_filename.clone(),
            stored_filename,
            file_path,
            is_temporary,
            created_at: Utc::now(),
        }
    }

    pub fn with_original_name(mut self, original_filename: &str) -> Self {
        self.original_filename = original_filename.to_string();
        self
    }
}

/// Timestamped stored filename, keeping concurrently running tasks from
/// colliding on the shared work directory.
pub fn stored_filename(original_filename: &str) -> String {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let path = Path::new(original_filename);
    let stem = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "upload".to_string());
    match path.extension() {
        Some(ext) => format!("{}_{}.{}", stem, timestamp, ext.to_string_lossy()),
        None => format!("{}_{}", stem, timestamp),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_string_round_trip() {
        for status in [
            TaskStatus::Queued,
            TaskStatus::ExtractingAudio,
            TaskStatus::GeneratingSubtitles,
            TaskStatus::CorrectingSubtitles,
            TaskStatus::Translating,
            TaskStatus::Cleaning,
            TaskStatus::Completed,
            TaskStatus::Error,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("bogus"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Error.is_terminal());
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Cleaning.is_terminal());
    }

    #[test]
    fn test_media_kind_from_path() {
        assert_eq!(MediaKind::from_path(Path::new("a.mp4")), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_path(Path::new("b.MKV")), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_path(Path::new("c.flac")), Some(MediaKind::Audio));
        assert_eq!(MediaKind::from_path(Path::new("d.txt")), None);
        assert_eq!(MediaKind::from_path(Path::new("noext")), None);
    }

    #[test]
    fn test_stored_filename_shape() {
        let name = stored_filename("movie.mp4");
        assert!(name.starts_with("movie_"));
        assert!(name.ends_with(".mp4"));
        assert_eq!(name.len(), "movie_YYYYmmdd_HHMMSS.mp4".len());
    }
}
