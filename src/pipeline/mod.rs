// Subtitle batch pipeline
//
// Scenes are fanned out across a bounded set of workers; within a scene the
// transform stages run in sequence, and results are re-linearized by scene
// index so output order never depends on completion order.

pub mod reassembly;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::error::{Result, SubflowError};
use crate::scene::{self, Scene};
use crate::subtitle::{self, SubtitleBlock};

/// One text-transform step (correction or translation) applied per scene.
#[async_trait]
pub trait TransformStage: Send + Sync {
    /// Short name used in logs
    fn label(&self) -> &str;

    /// Deterministic fragment appended to the output filename
    fn filename_suffix(&self) -> String;

    async fn transform(&self, text: &str) -> Result<String>;
}

/// Runs ordered transform stages over scene-segmented subtitle blocks.
pub struct PipelineRunner {
    config: PipelineConfig,
}

impl PipelineRunner {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Apply `stages` to every scene of `blocks` and return the rendered
    /// blocks in original order.
    ///
    /// Any scene failure fails the whole run; results already computed for
    /// other scenes are discarded and in-flight scenes are abandoned.
    pub async fn run(
        &self,
        blocks: &[SubtitleBlock],
        stages: &[Arc<dyn TransformStage>],
        keep_original: bool,
    ) -> Result<Vec<SubtitleBlock>> {
        let scenes = scene::segment(blocks, &self.config);
        if scenes.is_empty() {
            return Ok(Vec::new());
        }

        let scene_count = scenes.len();
        let semaphore = Arc::new(Semaphore::new(self.config.max_workers.max(1)));
        let mut workers: JoinSet<Result<(usize, Vec<SubtitleBlock>)>> = JoinSet::new();

        for (scene_index, scene) in scenes.into_iter().enumerate() {
            let stages: Vec<Arc<dyn TransformStage>> = stages.to_vec();
            let semaphore = semaphore.clone();

            workers.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| SubflowError::Transform("Scene pool closed".to_string()))?;

                process_scene(scene, &stages, keep_original, scene_index, scene_count).await
            });
        }

        // Collect keyed by scene index; the first failure aborts the run and
        // drops the remaining workers.
        let mut results: Vec<Option<Vec<SubtitleBlock>>> = vec![None; scene_count];
        while let Some(joined) = workers.join_next().await {
            let (scene_index, rendered) = joined
                .map_err(|e| SubflowError::Transform(format!("Scene worker panicked: {}", e)))??;
            results[scene_index] = Some(rendered);
        }

        let mut rendered_blocks = Vec::with_capacity(blocks.len());
        for result in results {
            match result {
                Some(mut scene_blocks) => rendered_blocks.append(&mut scene_blocks),
                None => {
                    return Err(SubflowError::Transform(
                        "Scene result missing after collection".to_string(),
                    ))
                }
            }
        }

        debug_assert_eq!(rendered_blocks.len(), blocks.len());
        Ok(rendered_blocks)
    }

    /// Run the pipeline over an SRT file and write the result next to it.
    ///
    /// Returns the input path unchanged when the file contains no valid
    /// blocks.
    pub async fn process_file(
        &self,
        srt_path: &Path,
        stages: &[Arc<dyn TransformStage>],
        keep_original: bool,
    ) -> Result<PathBuf> {
        let blocks = subtitle::read_srt(srt_path).await?;
        if blocks.is_empty() {
            warn!(
                "No valid subtitle blocks in {}, skipping transform",
                srt_path.display()
            );
            return Ok(srt_path.to_path_buf());
        }

        let labels: Vec<&str> = stages.iter().map(|stage| stage.label()).collect();
        info!(
            "Running {} stage(s) [{}] over {} blocks from {}",
            stages.len(),
            labels.join(", "),
            blocks.len(),
            srt_path.display()
        );

        let rendered = self.run(&blocks, stages, keep_original).await?;

        let output_path = output_filename(srt_path, stages, keep_original);
        subtitle::write_srt(&rendered, &output_path).await?;

        Ok(output_path)
    }
}

async fn process_scene(
    scene: Scene,
    stages: &[Arc<dyn TransformStage>],
    keep_original: bool,
    scene_index: usize,
    scene_count: usize,
) -> Result<(usize, Vec<SubtitleBlock>)> {
    let mut text = scene.joined_text();
    for stage in stages {
        debug!(
            "Scene {}/{}: applying {}",
            scene_index + 1,
            scene_count,
            stage.label()
        );
        text = stage.transform(&text).await?;
    }

    let rendered = reassembly::reassemble(&scene.blocks, &text, keep_original);
    info!("Scene {}/{} processed", scene_index + 1, scene_count);
    Ok((scene_index, rendered))
}

/// Output name encodes every stage applied, plus a bilingual marker when the
/// original text is kept alongside the transformed text.
fn output_filename(
    input: &Path,
    stages: &[Arc<dyn TransformStage>],
    keep_original: bool,
) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "output".to_string());

    let mut name = stem;
    for stage in stages {
        name.push_str(&stage.filename_suffix());
    }
    if keep_original {
        name.push_str("_bilingual");
    }
    name.push_str(".srt");

    input.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> PipelineConfig {
        PipelineConfig {
            max_workers: 3,
            scene_gap: 2.0,
            max_scene_size: 15,
            min_scene_size: 3,
        }
    }

    fn block(index: u32, start: f64, end: f64, text: &str) -> SubtitleBlock {
        SubtitleBlock {
            index,
            start_time: start,
            end_time: end,
            text: text.to_string(),
        }
    }

    /// Two scenes: blocks 1-3 (texts containing "alpha", terminator + gap
    /// after block 3) and blocks 4-6.
    fn two_scene_blocks() -> Vec<SubtitleBlock> {
        vec![
            block(1, 0.0, 1.0, "alpha one"),
            block(2, 1.0, 2.0, "alpha two"),
            block(3, 2.0, 3.0, "alpha three!"),
            block(4, 10.0, 11.0, "beta four"),
            block(5, 11.0, 12.0, "beta five"),
            block(6, 12.0, 13.0, "beta six"),
        ]
    }

    /// Uppercases scene text, sleeping longest for the first scene so that
    /// completion order is the reverse of submission order.
    struct ReverseDelayStage;

    #[async_trait]
    impl TransformStage for ReverseDelayStage {
        fn label(&self) -> &str {
            "reverse-delay"
        }

        fn filename_suffix(&self) -> String {
            "_delayed".to_string()
        }

        async fn transform(&self, text: &str) -> Result<String> {
            let delay = if text.contains("alpha") { 150 } else { 10 };
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(text.to_uppercase())
        }
    }

    struct FailOn {
        needle: &'static str,
    }

    #[async_trait]
    impl TransformStage for FailOn {
        fn label(&self) -> &str {
            "fail-on"
        }

        fn filename_suffix(&self) -> String {
            "_fail".to_string()
        }

        async fn transform(&self, text: &str) -> Result<String> {
            if text.contains(self.needle) {
                Err(SubflowError::Transform("provider rejected scene".to_string()))
            } else {
                Ok(text.to_string())
            }
        }
    }

    struct Suffixed {
        suffix: &'static str,
    }

    #[async_trait]
    impl TransformStage for Suffixed {
        fn label(&self) -> &str {
            "suffixed"
        }

        fn filename_suffix(&self) -> String {
            self.suffix.to_string()
        }

        async fn transform(&self, text: &str) -> Result<String> {
            Ok(text.to_string())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_output_order_is_independent_of_completion_order() {
        let blocks = two_scene_blocks();
        let runner = PipelineRunner::new(config());
        let stages: Vec<Arc<dyn TransformStage>> = vec![Arc::new(ReverseDelayStage)];

        let rendered = runner.run(&blocks, &stages, false).await.unwrap();

        assert_eq!(rendered.len(), blocks.len());
        let indices: Vec<u32> = rendered.iter().map(|b| b.index).collect();
        assert_eq!(indices, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(rendered[0].text, "ALPHA ONE");
        assert_eq!(rendered[5].text, "BETA SIX");
    }

    #[tokio::test]
    async fn test_block_count_is_preserved() {
        let blocks = two_scene_blocks();
        let runner = PipelineRunner::new(config());
        let stages: Vec<Arc<dyn TransformStage>> = vec![Arc::new(ReverseDelayStage)];

        let rendered = runner.run(&blocks, &stages, false).await.unwrap();
        assert_eq!(rendered.len(), blocks.len());
    }

    #[tokio::test]
    async fn test_one_failing_scene_fails_the_run() {
        let blocks = two_scene_blocks();
        let runner = PipelineRunner::new(config());
        let stages: Vec<Arc<dyn TransformStage>> = vec![Arc::new(FailOn { needle: "beta" })];

        let err = runner.run(&blocks, &stages, false).await.unwrap_err();
        assert!(matches!(err, SubflowError::Transform(_)));
    }

    #[tokio::test]
    async fn test_stages_apply_in_sequence() {
        struct Append(&'static str);

        #[async_trait]
        impl TransformStage for Append {
            fn label(&self) -> &str {
                "append"
            }
            fn filename_suffix(&self) -> String {
                String::new()
            }
            async fn transform(&self, text: &str) -> Result<String> {
                // one output line per input line keeps the mapping positional
                Ok(text
                    .lines()
                    .map(|line| format!("{}{}", line, self.0))
                    .collect::<Vec<_>>()
                    .join("\n"))
            }
        }

        let blocks = vec![
            block(1, 0.0, 1.0, "a"),
            block(2, 1.0, 2.0, "b"),
            block(3, 2.0, 3.0, "c"),
        ];
        let runner = PipelineRunner::new(config());
        let stages: Vec<Arc<dyn TransformStage>> =
            vec![Arc::new(Append("-x")), Arc::new(Append("-y"))];

        let rendered = runner.run(&blocks, &stages, false).await.unwrap();
        assert_eq!(rendered[0].text, "a-x-y");
        assert_eq!(rendered[2].text, "c-x-y");
    }

    #[tokio::test]
    async fn test_empty_input_short_circuits() {
        let runner = PipelineRunner::new(config());
        let stages: Vec<Arc<dyn TransformStage>> = vec![Arc::new(ReverseDelayStage)];
        let rendered = runner.run(&[], &stages, false).await.unwrap();
        assert!(rendered.is_empty());
    }

    #[test]
    fn test_output_filename_encodes_stages() {
        let stages: Vec<Arc<dyn TransformStage>> = vec![
            Arc::new(Suffixed { suffix: "_corrected" }),
            Arc::new(Suffixed { suffix: "_en" }),
        ];

        let named = output_filename(Path::new("/tmp/movie_20250101.srt"), &stages, false);
        assert_eq!(
            named,
            PathBuf::from("/tmp/movie_20250101_corrected_en.srt")
        );

        let bilingual = output_filename(Path::new("/tmp/movie.srt"), &stages[1..].to_vec(), true);
        assert_eq!(bilingual, PathBuf::from("/tmp/movie_en_bilingual.srt"));
    }

    #[tokio::test]
    async fn test_process_file_tolerates_malformed_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.srt");

        let content = "1\n00:00:01,000 --> 00:00:02,000\nalpha one\n\nbogus\n00:00:03,000 --> 00:00:04,000\nskipped\n\n2\n00:00:03,000 --> 00:00:04,000\nalpha two\n\n3\n00:00:05,000 --> 00:00:06,000\nalpha three\n";
        tokio::fs::write(&path, content).await.unwrap();

        let runner = PipelineRunner::new(config());
        let stages: Vec<Arc<dyn TransformStage>> = vec![Arc::new(ReverseDelayStage)];
        let output = runner.process_file(&path, &stages, false).await.unwrap();

        let rendered = subtitle::read_srt(&output).await.unwrap();
        assert_eq!(rendered.len(), 3);
        assert_eq!(rendered[0].text, "ALPHA ONE");
        assert_eq!(rendered[2].text, "ALPHA THREE");
    }

    #[tokio::test]
    async fn test_process_file_bilingual() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.srt");

        let content = "1\n00:00:01,000 --> 00:00:02,000\nalpha one\n\n2\n00:00:03,000 --> 00:00:04,000\nalpha two\n\n3\n00:00:05,000 --> 00:00:06,000\nalpha three\n";
        tokio::fs::write(&path, content).await.unwrap();

        let runner = PipelineRunner::new(config());
        let stages: Vec<Arc<dyn TransformStage>> = vec![Arc::new(ReverseDelayStage)];
        let output = runner.process_file(&path, &stages, true).await.unwrap();

        assert!(output.to_string_lossy().ends_with("_delayed_bilingual.srt"));
        let rendered = subtitle::read_srt(&output).await.unwrap();
        assert_eq!(rendered.len(), 3);
        assert_eq!(rendered[0].text, "alpha one\nALPHA ONE");
        assert_eq!(rendered[1].text, "alpha two\nALPHA TWO");
    }

    #[tokio::test]
    async fn test_process_file_with_no_valid_blocks_returns_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.srt");
        tokio::fs::write(&path, "garbage\nwithout structure\n").await.unwrap();

        let runner = PipelineRunner::new(config());
        let stages: Vec<Arc<dyn TransformStage>> = vec![Arc::new(ReverseDelayStage)];
        let output = runner.process_file(&path, &stages, false).await.unwrap();
        assert_eq!(output, path);
    }
}
