//! External collaborators
//!
//! OCR, vision-model detection and page image storage live outside the core.
//! These traits are the seams they plug into; calls are blocking so async
//! callers run them on a blocking pool under a timeout.

use crate::autocount::DetectionMethod;
use crate::catalog::PageId;
use crate::error::TakeoffResult;
use crate::geometry::BoundingBox;

/// A text block with position information
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TextBlock {
    /// Text content of this block
    pub text: String,

    /// Bounding box in original page pixels
    pub bbox: BoundingBox,

    /// Confidence score for this block (0.0 to 1.0)
    #[serde(default = "full_confidence")]
    pub confidence: f64,
}

fn full_confidence() -> f64 {
    1.0
}

impl TextBlock {
    pub fn new(text: impl Into<String>, bbox: BoundingBox, confidence: f64) -> Self {
        Self {
            text: text.into(),
            bbox,
            confidence,
        }
    }

    /// Whether this block carries `text`, ignoring case and spacing
    pub fn mentions(&self, text: &str) -> bool {
        let needle = squash(text);
        !needle.is_empty() && squash(&self.text).contains(&needle)
    }
}

fn squash(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

/// OCR output for a page
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OcrResult {
    /// Extracted text content
    #[serde(default)]
    pub text: String,

    /// Text blocks with positions
    #[serde(default)]
    pub text_blocks: Vec<TextBlock>,
}

impl OcrResult {
    pub fn new(text: impl Into<String>, text_blocks: Vec<TextBlock>) -> Self {
        Self {
            text: text.into(),
            text_blocks,
        }
    }

    /// First block that carries `text`
    pub fn find_block(&self, text: &str) -> Option<&TextBlock> {
        self.text_blocks.iter().find(|block| block.mentions(text))
    }
}

/// Scale notation located by a vision model
///
/// The model sees a downscaled image, so `bounding_box` is in compressed
/// pixel space until divided by `compression_scale_factor`.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VisionScaleCandidate {
    pub text: String,
    #[serde(default)]
    pub bounding_box: Option<BoundingBox>,
    pub confidence: f64,
    #[serde(default = "full_confidence")]
    pub compression_scale_factor: f64,
}

/// Everything a scale detector found on a page
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ScaleDetectionInput {
    #[serde(default)]
    pub ocr: Option<OcrResult>,
    #[serde(default)]
    pub vision: Option<VisionScaleCandidate>,
}

/// Template-matching request sent to a count detector
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CountRequest {
    pub template_bounding_box: BoundingBox,
    pub confidence_threshold: f64,
    pub scale_tolerance: f64,
    pub rotation_tolerance: f64,
    pub detection_method: DetectionMethod,
    #[serde(default)]
    pub provider: Option<String>,
}

/// A match reported by a count detector
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CountCandidate {
    pub bounding_box: BoundingBox,
    pub confidence: f64,
}

impl CountCandidate {
    pub fn new(bounding_box: BoundingBox, confidence: f64) -> Self {
        Self {
            bounding_box,
            confidence,
        }
    }
}

/// OCR and/or vision model locating the scale notation on a page image
pub trait ScaleDetector: Send + Sync {
    fn detect_scale(&self, image: &[u8]) -> TakeoffResult<ScaleDetectionInput>;
}

/// Symbol detector used by auto-count
pub trait CountDetector: Send + Sync {
    fn detect(&self, image: &[u8], request: &CountRequest) -> TakeoffResult<Vec<CountCandidate>>;
}

/// Source of rendered page images
pub trait ImageStore: Send + Sync {
    fn page_image(&self, page_id: PageId) -> TakeoffResult<Vec<u8>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_matching_ignores_case_and_spacing() {
        let ocr = OcrResult::new(
            "FLOOR PLAN\nSCALE: 1/4\" = 1'-0\"",
            vec![
                TextBlock::new("FLOOR PLAN", BoundingBox::new(10.0, 10.0, 200.0, 30.0), 0.99),
                TextBlock::new(
                    "SCALE: 1/4\"=1'-0\"",
                    BoundingBox::new(10.0, 50.0, 180.0, 20.0),
                    0.93,
                ),
            ],
        );

        let block = ocr.find_block("1/4\" = 1'-0\"").unwrap();
        assert_eq!(block.bbox.y, 50.0);
        assert!(ocr.find_block("1:100").is_none());
        assert!(ocr.find_block("   ").is_none());
    }

    #[test]
    fn test_vision_candidate_defaults() {
        let candidate: VisionScaleCandidate =
            serde_json::from_str(r#"{"text": "1\" = 20'", "confidence": 0.8}"#).unwrap();
        assert_eq!(candidate.bounding_box, None);
        assert_eq!(candidate.compression_scale_factor, 1.0);
    }
}
