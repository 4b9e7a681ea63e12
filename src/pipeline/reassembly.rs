use tracing::debug;

use crate::subtitle::SubtitleBlock;

/// Sentence terminators used when snapping a proportional cut point forward
/// so a block never ends mid-sentence.
const SENTENCE_TERMINATORS: [char; 6] = ['。', '？', '！', '.', '?', '!'];

/// Map transformed scene text back onto the scene's blocks.
///
/// When the transform preserved line structure (one non-empty line per
/// block), the mapping is positional. Otherwise the text is redistributed by
/// each block's share of the scene duration, with cut points snapped forward
/// to the nearest sentence terminator.
pub fn reassemble(
    blocks: &[SubtitleBlock],
    transformed: &str,
    keep_original: bool,
) -> Vec<SubtitleBlock> {
    let lines: Vec<&str> = transformed
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    let texts: Vec<String> = if lines.len() == blocks.len() {
        lines.into_iter().map(str::to_string).collect()
    } else {
        debug!(
            "Transformed text has {} lines for {} blocks, splitting by duration",
            lines.len(),
            blocks.len()
        );
        proportional_split(blocks, transformed)
    };

    blocks
        .iter()
        .zip(texts)
        .map(|(block, text)| {
            let text = if keep_original {
                format!("{}\n{}", block.text, text)
            } else {
                text
            };
            SubtitleBlock {
                index: block.index,
                start_time: block.start_time,
                end_time: block.end_time,
                text,
            }
        })
        .collect()
}

/// Allocate each block a slice of the whitespace-normalized text sized by its
/// share of the scene's total duration. The final block absorbs whatever
/// remains. Arithmetic is over chars, not bytes.
fn proportional_split(blocks: &[SubtitleBlock], transformed: &str) -> Vec<String> {
    let normalized = transformed.split_whitespace().collect::<Vec<_>>().join(" ");
    let chars: Vec<char> = normalized.chars().collect();
    let total_chars = chars.len();

    let first_start = blocks.first().map(|block| block.start_time).unwrap_or(0.0);
    let last_end = blocks.last().map(|block| block.end_time).unwrap_or(0.0);
    let total_duration = last_end - first_start;

    let mut texts = Vec::with_capacity(blocks.len());
    let mut start = 0usize;

    for (i, block) in blocks.iter().enumerate() {
        if i == blocks.len() - 1 {
            texts.push(chars[start.min(chars.len())..].iter().collect::<String>().trim().to_string());
            break;
        }

        let share = if total_duration > 0.0 {
            (block.end_time - block.start_time) / total_duration
        } else {
            1.0 / blocks.len() as f64
        };

        let mut end = start + (total_chars as f64 * share) as usize;
        if end < chars.len() {
            if let Some(terminator) = next_terminator(&chars, end) {
                end = terminator + 1;
            }
        }
        let end = end.clamp(start, chars.len());

        texts.push(chars[start..end].iter().collect::<String>().trim().to_string());
        start = end;
    }

    texts
}

fn next_terminator(chars: &[char], from: usize) -> Option<usize> {
    (from..chars.len()).find(|&i| SENTENCE_TERMINATORS.contains(&chars[i]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(index: u32, start: f64, end: f64, text: &str) -> SubtitleBlock {
        SubtitleBlock {
            index,
            start_time: start,
            end_time: end,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_positional_mapping() {
        let blocks = vec![
            block(1, 0.0, 1.0, "eins"),
            block(2, 1.0, 2.0, "zwei"),
            block(3, 2.0, 3.0, "drei"),
        ];
        let result = reassemble(&blocks, "one\ntwo\nthree", false);

        assert_eq!(result.len(), 3);
        assert_eq!(result[0].text, "one");
        assert_eq!(result[1].text, "two");
        assert_eq!(result[2].text, "three");
        assert_eq!(result[0].index, 1);
        assert_eq!(result[0].start_time, 0.0);
    }

    #[test]
    fn test_positional_mapping_ignores_blank_lines() {
        let blocks = vec![block(1, 0.0, 1.0, "a"), block(2, 1.0, 2.0, "b")];
        let result = reassemble(&blocks, "first\n\nsecond\n", false);
        assert_eq!(result[0].text, "first");
        assert_eq!(result[1].text, "second");
    }

    #[test]
    fn test_proportional_split_preserves_block_count() {
        let blocks = vec![
            block(1, 0.0, 2.0, "一句"),
            block(2, 2.0, 4.0, "两句"),
            block(3, 4.0, 6.0, "三句"),
        ];
        // single line for three blocks forces the duration-based path
        let result = reassemble(&blocks, "第一句话。第二句话。第三句话。", false);

        assert_eq!(result.len(), 3);
        let rejoined: String = result.iter().map(|b| b.text.clone()).collect();
        assert_eq!(rejoined, "第一句话。第二句话。第三句话。");
    }

    #[test]
    fn test_proportional_split_snaps_to_terminator() {
        let blocks = vec![block(1, 0.0, 1.0, "x"), block(2, 1.0, 6.0, "y")];
        let result = reassemble(&blocks, "Short one. A somewhat longer second sentence.", false);

        assert_eq!(result[0].text, "Short one.");
        assert_eq!(result[1].text, "A somewhat longer second sentence.");
    }

    #[test]
    fn test_final_block_absorbs_remainder() {
        let blocks = vec![
            block(1, 0.0, 0.5, "x"),
            block(2, 0.5, 1.0, "y"),
        ];
        let result = reassemble(&blocks, "甲。乙。丙。丁。", false);
        assert_eq!(result.len(), 2);
        let rejoined: String = result.iter().map(|b| b.text.clone()).collect();
        assert_eq!(rejoined, "甲。乙。丙。丁。");
        assert!(result[1].text.ends_with("丁。"));
    }

    #[test]
    fn test_bilingual_rendering() {
        let blocks = vec![block(1, 0.0, 1.0, "原文"), block(2, 1.0, 2.0, "第二句")];

        let bilingual = reassemble(&blocks, "translated\nsecond", true);
        assert_eq!(bilingual[0].text, "原文\ntranslated");
        assert_eq!(bilingual[1].text, "第二句\nsecond");

        let plain = reassemble(&blocks, "translated\nsecond", false);
        assert_eq!(plain[0].text, "translated");
        assert_eq!(plain[1].text, "second");
    }

    #[test]
    fn test_whitespace_normalization_in_fallback() {
        let blocks = vec![block(1, 0.0, 1.0, "a"), block(2, 1.0, 2.0, "b")];
        let result = reassemble(&blocks, "  spaced   out.   words  here. extra tail", false);
        assert_eq!(result.len(), 2);
        assert!(!result[0].text.contains("  "));
    }
}
