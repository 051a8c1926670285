// crates/deskrelay-agent/src/ocr.rs
// ============================================================================
// Module: OCR Blocks
// Description: Parses and filters tesseract TSV output.
// Purpose: Turn raw OCR rows into bounded, ordered text blocks.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Tesseract's TSV has one row per recognized word with a bounding box and a
//! confidence. Rows without text, below the confidence floor, or smaller than
//! [`MIN_BLOCK_EXTENT`] pixels on either side are dropped. Survivors are
//! sorted top to bottom, then left to right, and capped.
//!
//! [`find_matches`] searches kept words for a [`TextSearch`], one word at a
//! time, and reports each hit with its box and center.

// ============================================================================
// SECTION: Imports
// ============================================================================

use deskrelay_core::Point;
use deskrelay_core::TextSearch;
use serde::Serialize;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Minimum width and height of a kept block in pixels.
pub const MIN_BLOCK_EXTENT: i32 = 3;
/// Columns in a tesseract TSV row.
const TSV_COLUMNS: usize = 12;
/// Characters of recognized text echoed with a search result.
pub const OCR_TEXT_PREVIEW: usize = 500;

// ============================================================================
// SECTION: Types
// ============================================================================

/// One recognized word.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextBlock {
    /// Recognized text.
    pub text: String,
    /// Left edge.
    pub x: i32,
    /// Top edge.
    pub y: i32,
    /// Width in pixels.
    pub width: i32,
    /// Height in pixels.
    pub height: i32,
    /// Confidence (0-100).
    pub confidence: f64,
}

/// Filtered OCR result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextBlocks {
    /// Kept blocks in reading order.
    pub blocks: Vec<TextBlock>,
    /// True when blocks were dropped by the cap.
    pub truncated: bool,
}

/// Bounding box of a search hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MatchBox {
    /// Left edge.
    pub x: i32,
    /// Top edge.
    pub y: i32,
    /// Width in pixels.
    pub width: i32,
    /// Height in pixels.
    pub height: i32,
}

/// One word matching a text search.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextMatch {
    /// Recognized word.
    pub text: String,
    /// Confidence in `[0, 1]`, two decimals.
    pub confidence: f64,
    /// Word box.
    pub position: MatchBox,
    /// Box center, suitable as a click target.
    pub center: Point,
}

// ============================================================================
// SECTION: Parsing
// ============================================================================

/// Parses tesseract TSV and applies the confidence, size, and count limits.
#[must_use]
pub fn parse_tsv(tsv: &str, min_confidence: f64, max_blocks: usize) -> TextBlocks {
    let mut blocks: Vec<TextBlock> = tsv
        .lines()
        .skip_while(|line| line.starts_with("level"))
        .filter_map(parse_row)
        .filter(|block| {
            block.confidence >= min_confidence
                && block.width >= MIN_BLOCK_EXTENT
                && block.height >= MIN_BLOCK_EXTENT
        })
        .collect();
    blocks.sort_by(|a, b| (a.y, a.x).cmp(&(b.y, b.x)));
    let truncated = blocks.len() > max_blocks;
    blocks.truncate(max_blocks);
    TextBlocks {
        blocks,
        truncated,
    }
}

/// Parses one word row; structural rows and malformed lines yield `None`.
fn parse_row(line: &str) -> Option<TextBlock> {
    let columns: Vec<&str> = line.splitn(TSV_COLUMNS, '\t').collect();
    if columns.len() < TSV_COLUMNS {
        return None;
    }
    let text = columns[11].trim();
    if text.is_empty() {
        return None;
    }
    Some(TextBlock {
        text: text.to_string(),
        x: columns[6].trim().parse().ok()?,
        y: columns[7].trim().parse().ok()?,
        width: columns[8].trim().parse().ok()?,
        height: columns[9].trim().parse().ok()?,
        confidence: columns[10].trim().parse().ok()?,
    })
}

// ============================================================================
// SECTION: Search
// ============================================================================

/// Returns the blocks matching `search` in reading order.
#[must_use]
pub fn find_matches(blocks: &[TextBlock], search: &TextSearch) -> Vec<TextMatch> {
    let fold = |text: &str| if search.case_sensitive { text.to_string() } else { text.to_lowercase() };
    let needle = fold(search.text.trim());
    if needle.is_empty() {
        return Vec::new();
    }
    blocks
        .iter()
        .filter(|block| {
            let word = fold(&block.text);
            if search.partial_match { word.contains(&needle) } else { word == needle }
        })
        .map(|block| TextMatch {
            text: block.text.clone(),
            confidence: block.confidence.clamp(0.0, 100.0).round() / 100.0,
            position: MatchBox {
                x: block.x,
                y: block.y,
                width: block.width,
                height: block.height,
            },
            center: Point::new(block.x + block.width / 2, block.y + block.height / 2),
        })
        .collect()
}

/// Joins recognized words, cut to [`OCR_TEXT_PREVIEW`] characters.
#[must_use]
pub fn ocr_text(blocks: &[TextBlock]) -> String {
    let joined = blocks.iter().map(|block| block.text.as_str()).collect::<Vec<_>>().join(" ");
    if joined.chars().count() <= OCR_TEXT_PREVIEW {
        return joined;
    }
    let mut preview: String = joined.chars().take(OCR_TEXT_PREVIEW).collect();
    preview.push_str("...");
    preview
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    fn row(x: i32, y: i32, w: i32, h: i32, conf: f64, text: &str) -> String {
        format!("5\t1\t1\t1\t1\t1\t{x}\t{y}\t{w}\t{h}\t{conf}\t{text}")
    }

    #[test]
    fn rows_are_filtered_and_ordered() {
        let tsv = [
            HEADER.to_string(),
            "1\t1\t0\t0\t0\t0\t0\t0\t800\t600\t-1\t".to_string(),
            row(200, 10, 40, 12, 91.0, "World"),
            row(10, 10, 40, 12, 88.5, "Hello"),
            row(10, 50, 40, 12, 12.0, "noise"),
            row(10, 80, 2, 12, 99.0, "sliver"),
            row(5, 40, 30, 10, 75.0, "Next"),
        ]
        .join("\n");
        let parsed = parse_tsv(&tsv, 30.0, 200);
        let words: Vec<&str> = parsed.blocks.iter().map(|b| b.text.as_str()).collect();
        assert_eq!(words, vec!["Hello", "World", "Next"]);
        assert!(!parsed.truncated);
    }

    #[test]
    fn cap_sets_truncated_flag() {
        let tsv: Vec<String> = (0..5).map(|i| row(i * 50, 0, 20, 10, 90.0, "w")).collect();
        let parsed = parse_tsv(&tsv.join("\n"), 30.0, 3);
        assert_eq!(parsed.blocks.len(), 3);
        assert!(parsed.truncated);
        assert_eq!(parsed.blocks[2].x, 100);
    }

    fn search(text: &str, partial_match: bool, case_sensitive: bool) -> TextSearch {
        TextSearch {
            text: text.to_string(),
            partial_match,
            case_sensitive,
            ocr_min_confidence: 0.0,
            max_matches: 50,
        }
    }

    fn words() -> Vec<TextBlock> {
        let tsv = [
            HEADER.to_string(),
            row(10, 10, 40, 12, 88.0, "Save"),
            row(60, 10, 60, 12, 91.0, "Autosave"),
            row(10, 40, 40, 12, 75.0, "save"),
        ]
        .join("\n");
        parse_tsv(&tsv, 0.0, 200).blocks
    }

    #[test]
    fn partial_search_folds_case_by_default() {
        let hits = find_matches(&words(), &search("save", true, false));
        let texts: Vec<&str> = hits.iter().map(|hit| hit.text.as_str()).collect();
        assert_eq!(texts, vec!["Save", "Autosave", "save"]);
        assert_eq!(hits[0].center, Point::new(30, 16));
        assert_eq!(hits[0].position.width, 40);
        assert!((hits[1].confidence - 0.91).abs() < f64::EPSILON);
    }

    #[test]
    fn exact_and_case_sensitive_search_narrow_hits() {
        let exact = find_matches(&words(), &search("save", false, false));
        assert_eq!(exact.len(), 2);
        let cased = find_matches(&words(), &search("Save", false, true));
        assert_eq!(cased.len(), 1);
        assert_eq!(cased[0].position.y, 10);
        assert!(find_matches(&words(), &search("   ", true, false)).is_empty());
    }

    #[test]
    fn ocr_text_preview_is_cut() {
        let long: Vec<TextBlock> = (0..200)
            .map(|i| TextBlock {
                text: "word".to_string(),
                x: i,
                y: 0,
                width: 10,
                height: 10,
                confidence: 90.0,
            })
            .collect();
        let preview = ocr_text(&long);
        assert_eq!(preview.chars().count(), OCR_TEXT_PREVIEW + 3);
        assert!(preview.ends_with("..."));
        assert_eq!(ocr_text(&words()), "Save Autosave save");
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let parsed = parse_tsv("garbage\n5\t1\tx", 0.0, 10);
        assert!(parsed.blocks.is_empty());
    }
}
