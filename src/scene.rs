use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::subtitle::SubtitleBlock;

/// Markers treated as strong sentence terminators when deciding whether a
/// pause in speech is also a semantic boundary.
const SCENE_BREAK_MARKERS: [&str; 6] = ["。。。", "...", "？", "！", "?", "!"];

/// A contiguous run of subtitle blocks processed as one unit by the text
/// transform pipeline.
#[derive(Debug, Clone)]
pub struct Scene {
    pub blocks: Vec<SubtitleBlock>,
}

impl Scene {
    /// Scene text as one chunk: member block texts joined by newline, in
    /// block order.
    pub fn joined_text(&self) -> String {
        self.blocks
            .iter()
            .map(|block| block.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Split an ordered block sequence into scenes.
///
/// A new scene starts before a block only when the current scene already has
/// `min_scene_size` blocks and either the size cap is reached or a time gap
/// larger than `scene_gap` coincides with a sentence terminator at the end of
/// the previous block. Pure time-gap splitting over-fragments naturally
/// paused speech, so both conditions must hold.
pub fn segment(blocks: &[SubtitleBlock], config: &PipelineConfig) -> Vec<Scene> {
    if blocks.is_empty() {
        warn!("No subtitle blocks to segment");
        return Vec::new();
    }

    let mut scenes: Vec<Scene> = Vec::new();
    let mut current: Vec<SubtitleBlock> = Vec::new();
    let mut last_end_time = 0.0_f64;

    for block in blocks {
        if splits_before(block, &current, last_end_time, config) {
            debug!("Scene boundary before block {} ({} blocks)", block.index, current.len());
            scenes.push(Scene {
                blocks: std::mem::take(&mut current),
            });
        }

        current.push(block.clone());
        last_end_time = block.end_time;
    }

    if !current.is_empty() {
        scenes.push(Scene { blocks: current });
    }

    merge_small_scenes(&mut scenes, config.min_scene_size);

    let sizes: Vec<usize> = scenes.iter().map(|scene| scene.blocks.len()).collect();
    info!(
        "Segmented {} blocks into {} scenes (sizes min {} max {})",
        blocks.len(),
        scenes.len(),
        sizes.iter().min().copied().unwrap_or(0),
        sizes.iter().max().copied().unwrap_or(0),
    );

    scenes
}

fn splits_before(
    block: &SubtitleBlock,
    current: &[SubtitleBlock],
    last_end_time: f64,
    config: &PipelineConfig,
) -> bool {
    let Some(previous) = current.last() else {
        return false;
    };
    if current.len() < config.min_scene_size {
        return false;
    }
    if current.len() >= config.max_scene_size {
        return true;
    }

    let time_gap = block.start_time - last_end_time > config.scene_gap;
    let semantic_break = SCENE_BREAK_MARKERS
        .iter()
        .any(|marker| previous.text.contains(marker));

    time_gap && semantic_break
}

/// Merge any scene below `min_size` into a neighbour: forward into the next
/// scene when one exists, otherwise back into the previous one. Scenes this
/// small would make a pathologically context-poor transform call.
fn merge_small_scenes(scenes: &mut Vec<Scene>, min_size: usize) {
    let mut i = 0;
    while i < scenes.len() {
        if scenes.len() == 1 || scenes[i].blocks.len() >= min_size {
            i += 1;
            continue;
        }

        let small = scenes.remove(i);
        if i < scenes.len() {
            let mut merged = small.blocks;
            merged.append(&mut scenes[i].blocks);
            scenes[i].blocks = merged;
            // re-check the merged scene at the same position
        } else {
            scenes[i - 1].blocks.extend(small.blocks);
        }
    }
}
