// Durable task state over SQLite
//
// One row per task, one row per physical file. Exactly one worker owns a
// task at a time, so status updates are plain last-write-wins overwrites.

pub mod models;

pub use models::*;

use chrono::Utc;
use rusqlite::{params, Connection, Row};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::error::{Result, SubflowError};

const CREATE_TASKS_TABLE: &str = "CREATE TABLE IF NOT EXISTS tasks (
    task_id TEXT PRIMARY KEY,
    original_filename TEXT NOT NULL,
    stored_filename TEXT NOT NULL,
    file_type TEXT NOT NULL,
    status TEXT NOT NULL,
    progress INTEGER NOT NULL DEFAULT 0,
    message TEXT NOT NULL DEFAULT '',
    target_lang TEXT,
    keep_original INTEGER NOT NULL DEFAULT 0,
    correct_subtitles INTEGER NOT NULL DEFAULT 0,
    model_name TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    completed_at TEXT,
    error_message TEXT,
    process_time REAL
)";

const CREATE_FILES_TABLE: &str = "CREATE TABLE IF NOT EXISTS files (
    file_id TEXT PRIMARY KEY,
    task_id TEXT NOT NULL,
    file_type TEXT NOT NULL,
    original_filename TEXT NOT NULL,
    stored_filename TEXT NOT NULL,
    file_path TEXT NOT NULL,
    is_temporary INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    FOREIGN KEY (task_id) REFERENCES tasks(task_id)
)";

/// Durable record of every job's identity, lifecycle and files.
#[derive(Clone)]
pub struct TaskStore {
    connection: Arc<Mutex<Connection>>,
}

impl TaskStore {
    /// Open (creating if needed) the task database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(conn)),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<()> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute(CREATE_TASKS_TABLE, [])?;
        conn.execute(CREATE_FILES_TABLE, [])?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.connection
            .lock()
            .map_err(|e| SubflowError::Store(format!("Failed to acquire database lock: {}", e)))
    }

    /// Insert a new task row. Fails with `TaskExists` when the id is taken.
    pub fn create_task(&self, task: &TaskRecord) -> Result<()> {
        let conn = self.conn()?;
        let result = conn.execute(
            "INSERT INTO tasks (
                task_id, original_filename, stored_filename, file_type, status,
                progress, message, target_lang, keep_original, correct_subtitles,
                model_name, created_at, updated_at, completed_at, error_message, process_time
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                task.task_id,
                task.original_filename,
                task.stored_filename,
                task.file_type,
                task.status,
                task.progress,
                task.message,
                task.target_lang,
                task.keep_original,
                task.correct,
                task.model_name,
                task.created_at,
                task.updated_at,
                task.completed_at,
                task.error_message,
                task.process_time,
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(SubflowError::TaskExists(task.task_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Overwrite a task's status, progress and message. Terminal states also
    /// record the completion timestamp and elapsed processing time; an error
    /// message, when given, is stored alongside.
    pub fn update_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        progress: u8,
        message: &str,
        error_message: Option<&str>,
        process_time: Option<f64>,
    ) -> Result<()> {
        let conn = self.conn()?;
        let now = Utc::now();

        let affected = if status.is_terminal() {
            conn.execute(
                "UPDATE tasks SET status = ?1, progress = ?2, message = ?3, updated_at = ?4,
                 completed_at = ?5, process_time = ?6,
                 error_message = COALESCE(?7, error_message)
                 WHERE task_id = ?8",
                params![status, progress, message, now, now, process_time, error_message, task_id],
            )?
        } else {
            conn.execute(
                "UPDATE tasks SET status = ?1, progress = ?2, message = ?3, updated_at = ?4,
                 error_message = COALESCE(?5, error_message)
                 WHERE task_id = ?6",
                params![status, progress, message, now, error_message, task_id],
            )?
        };

        if affected == 0 {
            return Err(SubflowError::TaskNotFound(task_id.to_string()));
        }
        debug!("Task {} -> {} ({}%)", task_id, status, progress);
        Ok(())
    }

    pub fn get_task(&self, task_id: &str) -> Result<TaskRecord> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT * FROM tasks WHERE task_id = ?1",
            params![task_id],
            task_from_row,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => SubflowError::TaskNotFound(task_id.to_string()),
            other => other.into(),
        })
    }

    /// All tasks, newest first.
    pub fn list_tasks(&self, limit: usize) -> Result<Vec<TaskRecord>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT * FROM tasks ORDER BY created_at DESC LIMIT ?1")?;
        let tasks = stmt
            .query_map(params![limit], task_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    /// All tasks not yet in a terminal state, oldest first; the recovery scan
    /// re-queues these in submission order.
    pub fn incomplete_tasks(&self) -> Result<Vec<TaskRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM tasks WHERE status NOT IN ('completed', 'error')
             ORDER BY created_at ASC",
        )?;
        let tasks = stmt
            .query_map([], task_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tasks)
    }

    pub fn add_file(&self, file: &FileRecord) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO files (
                file_id, task_id, file_type, original_filename,
                stored_filename, file_path, is_temporary, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                file.file_id,
                file.task_id,
                file.file_type,
                file.original_filename,
                file.stored_filename,
                file.file_path.to_string_lossy(),
                file.is_temporary,
                file.created_at,
            ],
        )?;
        Ok(())
    }

    /// All file records of a task, oldest first.
    pub fn task_files(&self, task_id: &str) -> Result<Vec<FileRecord>> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT * FROM files WHERE task_id = ?1 ORDER BY created_at ASC")?;
        let files = stmt
            .query_map(params![task_id], file_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(files)
    }

    /// Atomically remove a task's temporary file records and return the paths
    /// the caller must unlink.
    pub fn take_temporary_files(&self, task_id: &str) -> Result<Vec<PathBuf>> {
        let conn = self.conn()?;
        let tx = conn.unchecked_transaction()?;

        let paths = {
            let mut stmt = tx.prepare(
                "SELECT file_path FROM files WHERE task_id = ?1 AND is_temporary = 1",
            )?;
            stmt.query_map(params![task_id], |row| {
                row.get::<_, String>(0).map(PathBuf::from)
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };

        tx.execute(
            "DELETE FROM files WHERE task_id = ?1 AND is_temporary = 1",
            params![task_id],
        )?;
        tx.commit()?;

        Ok(paths)
    }
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<TaskRecord> {
    Ok(TaskRecord {
        task_id: row.get("task_id")?,
        original_filename: row.get("original_filename")?,
        stored_filename: row.get("stored_filename")?,
        file_type: row.get("file_type")?,
        status: row.get("status")?,
        progress: row.get("progress")?,
        message: row.get("message")?,
        target_lang: row.get("target_lang")?,
        keep_original: row.get("keep_original")?,
        correct: row.get("correct_subtitles")?,
        model_name: row.get("model_name")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        completed_at: row.get("completed_at")?,
        error_message: row.get("error_message")?,
        process_time: row.get("process_time")?,
    })
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    Ok(FileRecord {
        file_id: row.get("file_id")?,
        task_id: row.get("task_id")?,
        file_type: row.get("file_type")?,
        original_filename: row.get("original_filename")?,
        stored_filename: row.get("stored_filename")?,
        file_path: PathBuf::from(row.get::<_, String>("file_path")?),
        is_temporary: row.get("is_temporary")?,
        created_at: row.get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task(task_id: &str) -> TaskRecord {
        TaskRecord::new(
            task_id.to_string(),
            "movie.mp4".to_string(),
            "movie_20250101_120000.mp4".to_string(),
            MediaKind::Video,
            Some("en".to_string()),
            false,
            true,
            "large-v3-turbo".to_string(),
        )
    }

    #[test]
    fn test_create_and_get_round_trip() {
        let store = TaskStore::open_in_memory().unwrap();
        store.create_task(&sample_task("t1")).unwrap();

        let task = store.get_task("t1").unwrap();
        assert_eq!(task.task_id, "t1");
        assert_eq!(task.status, TaskStatus::Queued);
        assert_eq!(task.progress, 0);
        assert_eq!(task.file_type, MediaKind::Video);
        assert_eq!(task.target_lang.as_deref(), Some("en"));
        assert!(task.correct);
        assert!(!task.keep_original);
        assert!(task.completed_at.is_none());
    }

    #[test]
    fn test_duplicate_task_id_is_rejected() {
        let store = TaskStore::open_in_memory().unwrap();
        store.create_task(&sample_task("t1")).unwrap();

        let err = store.create_task(&sample_task("t1")).unwrap_err();
        assert!(matches!(err, SubflowError::TaskExists(id) if id == "t1"));
    }

    #[test]
    fn test_get_missing_task() {
        let store = TaskStore::open_in_memory().unwrap();
        let err = store.get_task("nope").unwrap_err();
        assert!(matches!(err, SubflowError::TaskNotFound(_)));
    }

    #[test]
    fn test_update_status_non_terminal() {
        let store = TaskStore::open_in_memory().unwrap();
        store.create_task(&sample_task("t1")).unwrap();

        store
            .update_status("t1", TaskStatus::GeneratingSubtitles, 30, "Transcribing", None, None)
            .unwrap();

        let task = store.get_task("t1").unwrap();
        assert_eq!(task.status, TaskStatus::GeneratingSubtitles);
        assert_eq!(task.progress, 30);
        assert_eq!(task.message, "Transcribing");
        assert!(task.completed_at.is_none());
        assert!(task.process_time.is_none());
    }

    #[test]
    fn test_terminal_update_records_completion() {
        let store = TaskStore::open_in_memory().unwrap();
        store.create_task(&sample_task("t1")).unwrap();

        store
            .update_status("t1", TaskStatus::Completed, 100, "Done", None, Some(12.5))
            .unwrap();

        let task = store.get_task("t1").unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.completed_at.is_some());
        assert_eq!(task.process_time, Some(12.5));
    }

    #[test]
    fn test_error_update_keeps_message() {
        let store = TaskStore::open_in_memory().unwrap();
        store.create_task(&sample_task("t1")).unwrap();

        store
            .update_status(
                "t1",
                TaskStatus::Error,
                30,
                "Processing failed",
                Some("whisper exited with status 1"),
                Some(3.0),
            )
            .unwrap();

        let task = store.get_task("t1").unwrap();
        assert_eq!(task.status, TaskStatus::Error);
        assert_eq!(task.error_message.as_deref(), Some("whisper exited with status 1"));
        assert_eq!(task.process_time, Some(3.0));
    }

    #[test]
    fn test_update_missing_task() {
        let store = TaskStore::open_in_memory().unwrap();
        let err = store
            .update_status("nope", TaskStatus::Cleaning, 90, "x", None, None)
            .unwrap_err();
        assert!(matches!(err, SubflowError::TaskNotFound(_)));
    }

    #[test]
    fn test_incomplete_tasks_excludes_terminal() {
        let store = TaskStore::open_in_memory().unwrap();
        store.create_task(&sample_task("t1")).unwrap();
        store.create_task(&sample_task("t2")).unwrap();
        store.create_task(&sample_task("t3")).unwrap();

        store
            .update_status("t1", TaskStatus::Completed, 100, "Done", None, Some(1.0))
            .unwrap();
        store
            .update_status("t2", TaskStatus::Error, 30, "Failed", Some("boom"), Some(1.0))
            .unwrap();

        let incomplete = store.incomplete_tasks().unwrap();
        assert_eq!(incomplete.len(), 1);
        assert_eq!(incomplete[0].task_id, "t3");
    }

    #[test]
    fn test_file_records_round_trip() {
        let store = TaskStore::open_in_memory().unwrap();
        store.create_task(&sample_task("t1")).unwrap();

        let input = FileRecord::new("t1", FileKind::Video, PathBuf::from("/work/in.mp4"), false)
            .with_original_name("movie.mp4");
        let audio = FileRecord::new("t1", FileKind::Audio, PathBuf::from("/work/in.mp3"), true);
        store.add_file(&input).unwrap();
        store.add_file(&audio).unwrap();

        let files = store.task_files("t1").unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].original_filename, "movie.mp4");
        assert_eq!(files[0].file_type, FileKind::Video);
        assert!(!files[0].is_temporary);
        assert!(files[1].is_temporary);
    }

    #[test]
    fn test_take_temporary_files_is_destructive() {
        let store = TaskStore::open_in_memory().unwrap();
        store.create_task(&sample_task("t1")).unwrap();

        store
            .add_file(&FileRecord::new("t1", FileKind::Video, PathBuf::from("/w/in.mp4"), false))
            .unwrap();
        store
            .add_file(&FileRecord::new("t1", FileKind::Audio, PathBuf::from("/w/a.mp3"), true))
            .unwrap();
        store
            .add_file(&FileRecord::new("t1", FileKind::Subtitle, PathBuf::from("/w/a.srt"), true))
            .unwrap();

        let paths = store.take_temporary_files("t1").unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths.contains(&PathBuf::from("/w/a.mp3")));
        assert!(paths.contains(&PathBuf::from("/w/a.srt")));

        // second call finds nothing; the permanent record survives
        assert!(store.take_temporary_files("t1").unwrap().is_empty());
        let files = store.task_files("t1").unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_type, FileKind::Video);
    }

    #[test]
    fn test_list_tasks_limit() {
        let store = TaskStore::open_in_memory().unwrap();
        for i in 0..5 {
            store.create_task(&sample_task(&format!("t{}", i))).unwrap();
        }
        assert_eq!(store.list_tasks(3).unwrap().len(), 3);
        assert_eq!(store.list_tasks(100).unwrap().len(), 5);
    }
}
