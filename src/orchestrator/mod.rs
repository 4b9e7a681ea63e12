// Task orchestration
//
// A fixed pool of workers drains a shared queue and drives each task through
// extract -> transcribe -> correct -> translate -> clean. Admission is
// bounded by workers * queue_factor; the admission mutex guards only the
// counters and is never held across I/O (capacity is reserved first, then
// released if persisting the task fails).

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Instant;
use tokio::sync::{mpsc, Mutex as TokioMutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::ai::{ChatStageFactory, StageFactory};
use crate::config::Config;
use crate::error::{Result, SubflowError};
use crate::media::{MediaProcessor, MediaProcessorFactory};
use crate::pipeline::{PipelineRunner, TransformStage};
use crate::store::{
    stored_filename, FileKind, FileRecord, MediaKind, TaskRecord, TaskStatus, TaskStore,
};
use crate::transcribe::{self, Transcriber, TranscriberFactory};

/// A job submission, as handed over by the web or CLI layer.
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    /// Caller-supplied id; generated when absent
    pub task_id: Option<String>,
    pub input_path: PathBuf,
    /// Translate into this language when set
    pub target_lang: Option<String>,
    /// Emit dual-language output (original above translation)
    pub keep_original: bool,
    /// Run LLM-based correction before translation
    pub correct: bool,
    /// Transcription model; the configured default when absent
    pub model_name: Option<String>,
}

#[derive(Default)]
struct Admission {
    active: usize,
    queued: usize,
}

struct OrchestratorInner {
    config: Config,
    store: TaskStore,
    media: Box<dyn MediaProcessor>,
    transcriber: Arc<dyn Transcriber>,
    stages: Arc<dyn StageFactory>,
    runner: PipelineRunner,
    max_tasks: usize,
    admission: StdMutex<Admission>,
    queue_tx: mpsc::UnboundedSender<String>,
    queue_rx: TokioMutex<mpsc::UnboundedReceiver<String>>,
}

/// Accepts jobs, bounds concurrency, persists task state and recovers it
/// across restarts. Each instance owns its store and collaborator handles.
pub struct Orchestrator {
    inner: Arc<OrchestratorInner>,
}

impl Orchestrator {
    /// Build an orchestrator with the default collaborators (ffmpeg, whisper
    /// CLI, chat-completions client).
    pub fn new(config: Config) -> Result<Self> {
        std::fs::create_dir_all(&config.storage.work_dir)?;
        let store = TaskStore::open(&config.storage.db_path)?;
        let media = MediaProcessorFactory::create_processor(config.media.clone());
        let transcriber = TranscriberFactory::create(config.transcriber.clone());
        let stages = Arc::new(ChatStageFactory::new(config.transform.clone()));

        Ok(Self::with_components(config, store, media, transcriber, stages))
    }

    /// Build an orchestrator over explicit collaborators.
    pub fn with_components(
        config: Config,
        store: TaskStore,
        media: Box<dyn MediaProcessor>,
        transcriber: Arc<dyn Transcriber>,
        stages: Arc<dyn StageFactory>,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let max_tasks = (config.orchestrator.workers * config.orchestrator.queue_factor).max(1);
        let runner = PipelineRunner::new(config.pipeline.clone());

        Self {
            inner: Arc::new(OrchestratorInner {
                config,
                store,
                media,
                transcriber,
                stages,
                runner,
                max_tasks,
                admission: StdMutex::new(Admission::default()),
                queue_tx,
                queue_rx: TokioMutex::new(queue_rx),
            }),
        }
    }

    /// Verify collaborators, recover unfinished tasks and start the worker
    /// pool. Must run before the first submission.
    pub async fn start(&self) -> Result<()> {
        self.inner.media.check_availability()?;
        self.recover().await?;
        self.spawn_workers();
        Ok(())
    }

    /// Re-queue every unfinished task whose input file survived the restart;
    /// mark the rest failed. Stage progress is never resumed: a recovered
    /// task reruns its whole pipeline, since intermediate artifacts from the
    /// aborted run cannot be trusted.
    pub async fn recover(&self) -> Result<()> {
        let incomplete = self.inner.store.incomplete_tasks()?;
        if incomplete.is_empty() {
            return Ok(());
        }

        info!("Recovering {} unfinished task(s)", incomplete.len());
        for task in incomplete {
            let input_path = self.inner.config.storage.work_dir.join(&task.stored_filename);
            if input_path.exists() {
                info!("Re-queueing task {} from the beginning", task.task_id);
                self.inner.store.update_status(
                    &task.task_id,
                    TaskStatus::Queued,
                    0,
                    "Re-queued after restart",
                    None,
                    None,
                )?;
                self.inner.reserve_recovered();
                self.inner.enqueue(&task.task_id)?;
            } else {
                warn!(
                    "Input file for task {} is gone, marking as failed",
                    task.task_id
                );
                self.inner.store.update_status(
                    &task.task_id,
                    TaskStatus::Error,
                    task.progress,
                    "Processing failed: input file lost",
                    Some("Input file lost across restart"),
                    None,
                )?;
            }
        }
        Ok(())
    }

    /// Start the fixed worker pool. Workers live for the process lifetime,
    /// looping on a blocking dequeue from the shared queue.
    pub fn spawn_workers(&self) {
        let workers = self.inner.config.orchestrator.workers.max(1);
        info!("Starting {} task worker(s)", workers);

        for worker_id in 0..workers {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                debug!("Worker {} started", worker_id);
                loop {
                    let task_id = { inner.queue_rx.lock().await.recv().await };
                    let Some(task_id) = task_id else {
                        debug!("Worker {} stopping, queue closed", worker_id);
                        break;
                    };

                    inner.begin_task();
                    inner.process_task(&task_id).await;
                    inner.finish_task();
                }
            });
        }
    }

    /// Admit, persist and enqueue a new job.
    ///
    /// Capacity is reserved under the admission mutex before any state is
    /// created, so two concurrent submissions can never both slip past the
    /// limit; the reservation is rolled back when persisting fails.
    pub async fn submit(&self, request: SubmitRequest) -> Result<TaskRecord> {
        let input_path = request.input_path.clone();
        let original_filename = input_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| SubflowError::FileNotFound(input_path.display().to_string()))?;

        let media_kind = MediaKind::from_path(&input_path)
            .ok_or_else(|| SubflowError::UnsupportedFormat(original_filename.clone()))?;

        let model_name = request
            .model_name
            .unwrap_or_else(|| self.inner.config.transcriber.default_model.clone());
        transcribe::validate_model(&model_name)?;

        if !input_path.exists() {
            return Err(SubflowError::FileNotFound(input_path.display().to_string()));
        }

        self.inner.try_reserve()?;

        match self
            .persist_submission(request.task_id, &input_path, original_filename, media_kind, request.target_lang, request.keep_original, request.correct, model_name)
            .await
        {
            Ok(task) => Ok(task),
            Err(e) => {
                self.inner.release_reservation();
                Err(e)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn persist_submission(
        &self,
        task_id: Option<String>,
        input_path: &Path,
        original_filename: String,
        media_kind: MediaKind,
        target_lang: Option<String>,
        keep_original: bool,
        correct: bool,
        model_name: String,
    ) -> Result<TaskRecord> {
        let task_id = task_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let stored = stored_filename(&original_filename);
        let stored_path = self.inner.config.storage.work_dir.join(&stored);

        tokio::fs::copy(input_path, &stored_path).await?;

        let task = TaskRecord::new(
            task_id.clone(),
            original_filename.clone(),
            stored,
            media_kind,
            target_lang,
            keep_original,
            correct,
            model_name,
        );

        if let Err(e) = self.inner.store.create_task(&task) {
            let _ = tokio::fs::remove_file(&stored_path).await;
            return Err(e);
        }

        let input_kind = match media_kind {
            MediaKind::Video => FileKind::Video,
            MediaKind::Audio => FileKind::Audio,
        };
        self.inner.store.add_file(
            &FileRecord::new(&task_id, input_kind, stored_path, false)
                .with_original_name(&original_filename),
        )?;

        self.inner.enqueue(&task_id)?;
        info!("Task {} queued ({})", task_id, original_filename);
        Ok(task)
    }

    /// Current record of one task.
    pub fn task(&self, task_id: &str) -> Result<TaskRecord> {
        self.inner.store.get_task(task_id)
    }

    /// All known tasks, newest first.
    pub fn tasks(&self, limit: usize) -> Result<Vec<TaskRecord>> {
        self.inner.store.list_tasks(limit)
    }

    /// Path of the final subtitle artifact; only valid once completed.
    pub fn output_path(&self, task_id: &str) -> Result<PathBuf> {
        let task = self.inner.store.get_task(task_id)?;
        if task.status != TaskStatus::Completed {
            return Err(SubflowError::FileNotFound(format!(
                "Task {} is not completed (status: {})",
                task_id, task.status
            )));
        }

        let files = self.inner.store.task_files(task_id)?;
        files
            .iter()
            .rev()
            .find(|file| !file.is_temporary && file.file_type == FileKind::SubtitleProcessed)
            .or_else(|| {
                files
                    .iter()
                    .rev()
                    .find(|file| !file.is_temporary && file.file_type == FileKind::Subtitle)
            })
            .map(|file| file.file_path.clone())
            .ok_or_else(|| {
                SubflowError::FileNotFound(format!("No subtitle output recorded for task {}", task_id))
            })
    }

    #[cfg(test)]
    fn queue_counts(&self) -> (usize, usize) {
        let admission = self.inner.admission.lock().unwrap();
        (admission.active, admission.queued)
    }
}

impl OrchestratorInner {
    fn try_reserve(&self) -> Result<()> {
        let mut admission = self
            .admission
            .lock()
            .map_err(|e| SubflowError::Store(format!("Admission lock poisoned: {}", e)))?;
        if admission.active + admission.queued >= self.max_tasks {
            return Err(SubflowError::Capacity);
        }
        admission.queued += 1;
        Ok(())
    }

    /// Recovery bypasses the capacity check: tasks admitted before the
    /// restart stay admitted.
    fn reserve_recovered(&self) {
        if let Ok(mut admission) = self.admission.lock() {
            admission.queued += 1;
        }
    }

    fn release_reservation(&self) {
        if let Ok(mut admission) = self.admission.lock() {
            admission.queued = admission.queued.saturating_sub(1);
        }
    }

    fn begin_task(&self) {
        if let Ok(mut admission) = self.admission.lock() {
            admission.queued = admission.queued.saturating_sub(1);
            admission.active += 1;
        }
    }

    fn finish_task(&self) {
        if let Ok(mut admission) = self.admission.lock() {
            admission.active = admission.active.saturating_sub(1);
        }
    }

    fn enqueue(&self, task_id: &str) -> Result<()> {
        self.queue_tx
            .send(task_id.to_string())
            .map_err(|_| SubflowError::Store("Task queue closed".to_string()))
    }

    async fn process_task(&self, task_id: &str) {
        let started = Instant::now();
        let task = match self.store.get_task(task_id) {
            Ok(task) => task,
            Err(e) => {
                error!("Cannot load task {}: {}", task_id, e);
                return;
            }
        };

        info!("Processing task {} ({})", task_id, task.original_filename);
        match self.run_stages(&task, started).await {
            Ok(()) => info!(
                "Task {} completed in {:.1}s",
                task_id,
                started.elapsed().as_secs_f64()
            ),
            Err(e) => {
                error!("Task {} failed: {}", task_id, e);
                let progress = self
                    .store
                    .get_task(task_id)
                    .map(|task| task.progress)
                    .unwrap_or(0);
                if let Err(update_err) = self.store.update_status(
                    task_id,
                    TaskStatus::Error,
                    progress,
                    &format!("Processing failed: {}", e),
                    Some(&e.to_string()),
                    Some(started.elapsed().as_secs_f64()),
                ) {
                    error!("Cannot record failure of task {}: {}", task_id, update_err);
                }
            }
        }
    }

    async fn run_stages(&self, task: &TaskRecord, started: Instant) -> Result<()> {
        let task_id = &task.task_id;
        let work_dir = &self.config.storage.work_dir;
        let input_path = work_dir.join(&task.stored_filename);
        if !input_path.exists() {
            return Err(SubflowError::FileNotFound(input_path.display().to_string()));
        }

        // extract audio from video inputs; audio inputs go straight to whisper
        let audio_path = match task.file_type {
            MediaKind::Video => {
                self.set_stage(task_id, TaskStatus::ExtractingAudio, 10, "Extracting audio")?;

                let stem = Path::new(&task.stored_filename)
                    .file_stem()
                    .map(|stem| stem.to_string_lossy().to_string())
                    .unwrap_or_else(|| task.task_id.clone());
                let audio_path = work_dir.join(format!("{}.mp3", stem));

                self.media.extract_audio(&input_path, &audio_path).await?;
                self.store.add_file(&FileRecord::new(
                    task_id,
                    FileKind::Audio,
                    audio_path.clone(),
                    true,
                ))?;
                audio_path
            }
            MediaKind::Audio => input_path.clone(),
        };

        self.set_stage(
            task_id,
            TaskStatus::GeneratingSubtitles,
            30,
            "Generating subtitles",
        )?;
        let raw_srt = self
            .transcriber
            .transcribe(
                &audio_path,
                work_dir,
                self.config.transcriber.language.as_deref(),
                &task.model_name,
            )
            .await?;

        let has_text_stages = task.correct || task.target_lang.is_some();
        self.store.add_file(&FileRecord::new(
            task_id,
            FileKind::Subtitle,
            raw_srt.clone(),
            has_text_stages,
        ))?;

        let mut current = raw_srt;

        if task.correct {
            self.set_stage(
                task_id,
                TaskStatus::CorrectingSubtitles,
                50,
                "Correcting subtitles",
            )?;
            let stages: Vec<Arc<dyn TransformStage>> = vec![self.stages.correction()];
            let corrected = self.runner.process_file(&current, &stages, false).await?;
            if corrected != current {
                self.store.add_file(&FileRecord::new(
                    task_id,
                    FileKind::SubtitleProcessed,
                    corrected.clone(),
                    task.target_lang.is_some(),
                ))?;
                current = corrected;
            }
        }

        if let Some(target_lang) = &task.target_lang {
            self.set_stage(task_id, TaskStatus::Translating, 70, "Translating subtitles")?;
            let stages: Vec<Arc<dyn TransformStage>> =
                vec![self.stages.translation(target_lang)];
            let translated = self
                .runner
                .process_file(&current, &stages, task.keep_original)
                .await?;
            if translated != current {
                self.store.add_file(&FileRecord::new(
                    task_id,
                    FileKind::SubtitleProcessed,
                    translated.clone(),
                    false,
                ))?;
                current = translated;
            }
        }

        self.set_stage(task_id, TaskStatus::Cleaning, 90, "Cleaning up temporary files")?;
        for path in self.store.take_temporary_files(task_id)? {
            if path == current {
                // degenerate runs can leave the last artifact marked
                // temporary; never delete the file we are about to publish
                continue;
            }
            if let Err(e) = tokio::fs::remove_file(&path).await {
                warn!("Cannot remove temporary file {}: {}", path.display(), e);
            }
        }

        self.store.update_status(
            task_id,
            TaskStatus::Completed,
            100,
            "Processing complete",
            None,
            Some(started.elapsed().as_secs_f64()),
        )?;
        Ok(())
    }

    fn set_stage(
        &self,
        task_id: &str,
        status: TaskStatus,
        progress: u8,
        message: &str,
    ) -> Result<()> {
        info!("Task {}: {}", task_id, message);
        self.store
            .update_status(task_id, status, progress, message, None, None)
    }
}
