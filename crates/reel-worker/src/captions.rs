//! Caption timing handed to the render capability.

use reel_models::Segment;
use serde::{Deserialize, Serialize};

/// Characters per caption line.
pub const MAX_LINE_CHARS: usize = 35;
/// Lines per caption cue.
pub const MAX_LINES: usize = 3;
/// Gap left before the end of each cue.
pub const CUE_GAP_SECS: f64 = 0.1;

/// One on-screen caption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionCue {
    pub index: u32,
    pub start_secs: f64,
    pub end_secs: f64,
    pub lines: Vec<String>,
}

/// Captions for the whole composite, one cue per scene.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptionSpec {
    pub cues: Vec<CaptionCue>,
}

impl CaptionSpec {
    /// Build cues for `scenes`, stretched so they span `voiceover_secs`.
    pub fn from_scenes(scenes: &[Segment], voiceover_secs: f64) -> Self {
        let planned_total: f64 = scenes.iter().map(|s| s.planned_duration_secs).sum();
        let scale = if planned_total > 0.0 && voiceover_secs > 0.0 {
            voiceover_secs / planned_total
        } else {
            1.0
        };

        let mut cursor = 0.0;
        let cues = scenes
            .iter()
            .map(|scene| {
                let duration = scene.planned_duration_secs * scale;
                let cue = CaptionCue {
                    index: scene.index,
                    start_secs: cursor,
                    end_secs: (cursor + duration - CUE_GAP_SECS).max(cursor),
                    lines: wrap_caption(&scene.narration_text),
                };
                cursor += duration;
                cue
            })
            .collect();

        Self { cues }
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }
}

/// Greedy word wrap to [`MAX_LINE_CHARS`], keeping at most [`MAX_LINES`]
/// lines. Overflowing text is cut from the last line and marked with `...`.
pub fn wrap_caption(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();
        if !current.is_empty() && current_len + 1 + word_len > MAX_LINE_CHARS {
            lines.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }
    if !current.is_empty() {
        lines.push(current);
    }

    if lines.len() > MAX_LINES {
        lines.truncate(MAX_LINES);
        if let Some(last) = lines.last_mut() {
            let kept: String = last.chars().take(MAX_LINE_CHARS - 3).collect();
            *last = format!("{}...", kept);
        }
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene(index: u32, text: &str) -> Segment {
        Segment {
            index,
            narration_text: text.to_string(),
            visual_prompt: String::new(),
            planned_duration_secs: 5.0,
        }
    }

    #[test]
    fn test_wrap_short_text_is_one_line() {
        assert_eq!(wrap_caption("  The fort fell at dawn  "), vec!["The fort fell at dawn"]);
        assert!(wrap_caption("   ").is_empty());
    }

    #[test]
    fn test_wrap_respects_line_width() {
        let lines = wrap_caption("In the year 1526 the armies met on the plains of Panipat");
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.chars().count() <= MAX_LINE_CHARS));
        assert_eq!(lines.join(" "), "In the year 1526 the armies met on the plains of Panipat");
    }

    #[test]
    fn test_wrap_truncates_to_three_lines() {
        let text = "word ".repeat(60);
        let lines = wrap_caption(&text);
        assert_eq!(lines.len(), MAX_LINES);
        assert!(lines[2].ends_with("..."));
        assert!(lines[2].chars().count() <= MAX_LINE_CHARS);
    }

    #[test]
    fn test_wrap_counts_characters_not_bytes() {
        // 12 Devanagari words of 4 chars each fit in two lines by char count.
        let text = vec!["राजा"; 12].join(" ");
        let lines = wrap_caption(&text);
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn test_cues_scaled_to_voiceover() {
        let scenes = vec![scene(0, "one"), scene(1, "two"), scene(2, "three")];
        let spec = CaptionSpec::from_scenes(&scenes, 30.0);

        assert_eq!(spec.cues.len(), 3);
        assert_eq!(spec.cues[0].start_secs, 0.0);
        assert!((spec.cues[0].end_secs - 9.9).abs() < 1e-9);
        assert!((spec.cues[1].start_secs - 10.0).abs() < 1e-9);
        assert!((spec.cues[2].end_secs - 29.9).abs() < 1e-9);
        assert_eq!(spec.cues[2].lines, vec!["three"]);
    }

    #[test]
    fn test_cues_without_voiceover_use_planned_lengths() {
        let scenes = vec![scene(0, "a"), scene(1, "b")];
        let spec = CaptionSpec::from_scenes(&scenes, 0.0);
        assert!((spec.cues[1].start_secs - 5.0).abs() < 1e-9);
        assert!(CaptionSpec::from_scenes(&[], 12.0).is_empty());
    }
}
