//! Page scale calibration
//!
//! A page's scale ratio (real units per pixel) is set either manually from
//! two points and a known distance, or from a detector that read the scale
//! notation off the sheet. Automated results are subject to a preservation
//! policy so a good calibration is never replaced by a worse one:
//!
//! | current record        | automated result with bbox | without bbox |
//! |-----------------------|----------------------------|--------------|
//! | manual                | kept                       | kept         |
//! | bbox (OCR or vision)  | committed                  | kept         |
//! | no bbox / none        | committed                  | committed    |
//!
//! Within one detection the OCR block's box is preferred over the vision
//! model's box when both locate the same text.

use crate::catalog::Page;
use crate::collaborators::{OcrResult, ScaleDetectionInput, VisionScaleCandidate};
use crate::error::{TakeoffError, TakeoffResult};
use crate::geometry::{BoundingBox, PixelPoint};
use crate::scale_detection::{self, DetectedScale};
use chrono::Utc;
use std::fmt;

/// How a page's scale was established
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScaleDetectionMethod {
    Manual,
    OcrPattern,
    VisionModel,
    None,
}

impl fmt::Display for ScaleDetectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScaleDetectionMethod::Manual => "manual",
            ScaleDetectionMethod::OcrPattern => "ocr_pattern",
            ScaleDetectionMethod::VisionModel => "vision_model",
            ScaleDetectionMethod::None => "none",
        };
        f.write_str(name)
    }
}

/// Calibration lifecycle of a page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationState {
    Uncalibrated,
    Detecting,
    Calibrated,
    DetectionFailed,
}

/// Which collaborator located the notation
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BboxSource {
    Ocr,
    Vision,
}

/// Provenance of a committed calibration
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CalibrationRecord {
    pub source_text: Option<String>,
    /// Location of the notation in original page pixels
    pub bounding_box: Option<BoundingBox>,
    pub confidence: f64,
    pub method: ScaleDetectionMethod,
    pub bbox_source: Option<BboxSource>,
}

impl CalibrationRecord {
    /// Preservation rank; a result may replace a record of equal or lower rank
    fn rank(&self) -> u8 {
        match (self.method, self.bounding_box) {
            (ScaleDetectionMethod::Manual, _) => 3,
            (_, Some(_)) => 2,
            (_, None) => 1,
        }
    }
}

/// Ratio and provenance interpreted from a detector's output
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedCalibration {
    pub scale_ratio: f64,
    pub unit: String,
    pub record: CalibrationRecord,
}

/// Calibrate from two points a known real-world distance apart
///
/// Returns the new ratio. Manual calibration always commits.
pub fn calibrate_manual(
    page: &mut Page,
    start: PixelPoint,
    end: PixelPoint,
    known_distance: f64,
    unit: &str,
) -> TakeoffResult<f64> {
    if ![start.x, start.y, end.x, end.y, known_distance]
        .iter()
        .all(|v| v.is_finite())
    {
        return Err(TakeoffError::InvalidGeometry(
            "calibration inputs must be finite".into(),
        ));
    }
    let pixel_distance = start.distance_to(&end);
    if start.coincides_with(&end) {
        return Err(TakeoffError::InvalidGeometry(
            "calibration points coincide".into(),
        ));
    }
    if known_distance <= 0.0 {
        return Err(TakeoffError::InvalidGeometry(format!(
            "known distance must be positive, got {}",
            known_distance
        )));
    }

    let ratio = known_distance / pixel_distance;
    let record = CalibrationRecord {
        source_text: Some(format!(
            "{} {} over {:.1} px",
            known_distance, unit, pixel_distance
        )),
        bounding_box: None,
        confidence: 1.0,
        method: ScaleDetectionMethod::Manual,
        bbox_source: None,
    };
    commit(page, ratio, unit, record);

    tracing::info!(page_id = %page.id, ratio, unit, "manual calibration committed");
    Ok(ratio)
}

/// Mark a page as detecting
pub fn begin_detection(page: &mut Page) {
    page.calibration_state = CalibrationState::Detecting;
    page.last_detection_error = None;
}

/// Interpret detector output into a candidate calibration for `page`
pub fn interpret_detection(
    page: &Page,
    input: &ScaleDetectionInput,
) -> TakeoffResult<DetectedCalibration> {
    let (parsed, record) = match (&input.vision, &input.ocr) {
        (Some(vision), None) => from_vision(vision, None)?,
        (Some(vision), Some(ocr)) => match from_vision(vision, Some(ocr)) {
            Ok(found) => found,
            Err(error) => {
                tracing::debug!(
                    page_id = %page.id,
                    error = %error,
                    "vision scale unusable, falling back to OCR"
                );
                from_ocr(ocr)?
            }
        },
        (None, Some(ocr)) => from_ocr(ocr)?,
        (None, None) => {
            return Err(TakeoffError::DetectionFailure(
                "detector returned neither OCR text nor a vision result".into(),
            ))
        }
    };

    let scale_ratio = parsed.ratio_for_dpi(page.dpi);
    if !(scale_ratio.is_finite() && scale_ratio > 0.0) {
        return Err(TakeoffError::DetectionFailure(format!(
            "scale {:?} gives no usable ratio at {} dpi",
            parsed.source_text, page.dpi
        )));
    }

    Ok(DetectedCalibration {
        scale_ratio,
        unit: parsed.unit,
        record,
    })
}

/// Read a vision result, locating it with a matching OCR block when there is one
fn from_vision(
    vision: &VisionScaleCandidate,
    ocr: Option<&OcrResult>,
) -> TakeoffResult<(DetectedScale, CalibrationRecord)> {
    let parsed = parse(&vision.text)?;
    let factor = vision.compression_scale_factor;
    if !(factor.is_finite() && factor > 0.0) {
        return Err(TakeoffError::DetectionFailure(format!(
            "invalid compression scale factor {}",
            factor
        )));
    }

    let ocr_block = ocr.and_then(|ocr| ocr.find_block(&vision.text));
    let (bounding_box, bbox_source) = match ocr_block {
        Some(block) => (Some(block.bbox), Some(BboxSource::Ocr)),
        None => match vision.bounding_box.map(|b| b.rescaled(factor)) {
            Some(bbox) if bbox.is_valid() => (Some(bbox), Some(BboxSource::Vision)),
            _ => (None, None),
        },
    };

    let record = CalibrationRecord {
        source_text: Some(vision.text.clone()),
        bounding_box,
        confidence: vision.confidence,
        method: ScaleDetectionMethod::VisionModel,
        bbox_source,
    };
    Ok((parsed, record))
}

/// Scan OCR output for the most confident scale notation
fn from_ocr(ocr: &OcrResult) -> TakeoffResult<(DetectedScale, CalibrationRecord)> {
    let best_block = ocr
        .text_blocks
        .iter()
        .filter_map(|block| {
            scale_detection::best_scale(&block.text).map(|parsed| (block, parsed))
        })
        .max_by(|(a_block, a), (b_block, b)| {
            (a.confidence * a_block.confidence).total_cmp(&(b.confidence * b_block.confidence))
        });

    match best_block {
        Some((block, parsed)) => {
            let record = CalibrationRecord {
                source_text: Some(parsed.source_text.clone()),
                bounding_box: Some(block.bbox),
                confidence: parsed.confidence * block.confidence,
                method: ScaleDetectionMethod::OcrPattern,
                bbox_source: Some(BboxSource::Ocr),
            };
            Ok((parsed, record))
        }
        None => {
            let parsed = parse(&ocr.text)?;
            let record = CalibrationRecord {
                source_text: Some(parsed.source_text.clone()),
                bounding_box: None,
                confidence: parsed.confidence,
                method: ScaleDetectionMethod::OcrPattern,
                bbox_source: None,
            };
            Ok((parsed, record))
        }
    }
}

fn parse(text: &str) -> TakeoffResult<DetectedScale> {
    scale_detection::best_scale(text).ok_or_else(|| {
        TakeoffError::DetectionFailure(format!("unrecognised scale notation {:?}", text))
    })
}

/// Commit an automated calibration under the preservation policy
///
/// A discarded result returns `CalibrationRegressionRejected` and leaves the
/// page's ratio and record untouched.
pub fn commit_detection(page: &mut Page, detected: DetectedCalibration) -> TakeoffResult<f64> {
    if let Some(current) = &page.calibration_record {
        if detected.record.rank() < current.rank() {
            let reason = if current.method == ScaleDetectionMethod::Manual {
                "manual calibration takes precedence over detection".to_string()
            } else {
                "detection without a bounding box cannot replace a located calibration".to_string()
            };
            tracing::info!(
                page_id = %page.id,
                method = %detected.record.method,
                reason = %reason,
                "automated calibration discarded"
            );
            restore_state(page);
            return Err(TakeoffError::CalibrationRegressionRejected {
                page_id: page.id,
                reason,
            });
        }
    }

    let ratio = detected.scale_ratio;
    tracing::info!(
        page_id = %page.id,
        ratio,
        method = %detected.record.method,
        "automated calibration committed"
    );
    commit(page, ratio, &detected.unit, detected.record);
    Ok(ratio)
}

/// Interpret and commit in one step
///
/// Any failure is recorded on the page before being returned.
pub fn apply_detection(page: &mut Page, input: &ScaleDetectionInput) -> TakeoffResult<f64> {
    let result = interpret_detection(page, input).and_then(|detected| commit_detection(page, detected));
    if let Err(TakeoffError::DetectionFailure(message)) = &result {
        fail_detection(page, message);
    }
    result
}

/// Record a failed detection attempt
///
/// Calibrated pages stay calibrated.
pub fn fail_detection(page: &mut Page, message: &str) {
    tracing::warn!(page_id = %page.id, error = %message, "scale detection failed");
    page.last_detection_error = Some(message.to_string());
    page.calibration_state = if page.scale_calibrated {
        CalibrationState::Calibrated
    } else {
        CalibrationState::DetectionFailed
    };
}

/// Clear a page's calibration
///
/// Bumps the revision so existing quantities read as stale.
pub fn reset_calibration(page: &mut Page) {
    page.scale_ratio = None;
    page.scale_unit = None;
    page.scale_calibrated = false;
    page.scale_detection_method = ScaleDetectionMethod::None;
    page.calibration_state = CalibrationState::Uncalibrated;
    page.calibration_record = None;
    page.scale_revision += 1;
    page.scale_updated_at = Some(Utc::now());
    page.last_detection_error = None;
}

fn restore_state(page: &mut Page) {
    page.calibration_state = if page.scale_calibrated {
        CalibrationState::Calibrated
    } else {
        CalibrationState::Uncalibrated
    };
}

fn commit(page: &mut Page, ratio: f64, unit: &str, record: CalibrationRecord) {
    page.scale_ratio = Some(ratio);
    page.scale_unit = Some(unit.to_string());
    page.scale_calibrated = true;
    page.scale_detection_method = record.method;
    page.calibration_state = CalibrationState::Calibrated;
    page.calibration_record = Some(record);
    page.scale_revision += 1;
    page.scale_updated_at = Some(Utc::now());
    page.last_detection_error = None;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ProjectId;
    use crate::collaborators::{OcrResult, TextBlock, VisionScaleCandidate};

    fn page() -> Page {
        Page::new(ProjectId::new_v4(), "A-101", 1, 3300, 2550, 150.0)
    }

    fn vision(text: &str, bbox: Option<BoundingBox>, factor: f64) -> ScaleDetectionInput {
        ScaleDetectionInput {
            ocr: None,
            vision: Some(VisionScaleCandidate {
                text: text.to_string(),
                bounding_box: bbox,
                confidence: 0.8,
                compression_scale_factor: factor,
            }),
        }
    }

    #[test]
    fn test_manual_calibration() {
        let mut page = page();
        let ratio = calibrate_manual(
            &mut page,
            PixelPoint::new(0.0, 0.0),
            PixelPoint::new(480.0, 0.0),
            10.0,
            "ft",
        )
        .unwrap();

        assert!((ratio - 10.0 / 480.0).abs() < 1e-12);
        assert_eq!(page.scale_ratio, Some(ratio));
        assert_eq!(page.scale_detection_method, ScaleDetectionMethod::Manual);
        assert_eq!(page.calibration_state, CalibrationState::Calibrated);
        assert_eq!(page.scale_revision, 1);
    }

    #[test]
    fn test_manual_calibration_rejects_degenerate_input() {
        let mut page = page();
        let p = PixelPoint::new(5.0, 5.0);
        assert!(matches!(
            calibrate_manual(&mut page, p, p, 10.0, "ft"),
            Err(TakeoffError::InvalidGeometry(_))
        ));
        assert!(matches!(
            calibrate_manual(&mut page, p, PixelPoint::new(6.0, 5.0), 0.0, "ft"),
            Err(TakeoffError::InvalidGeometry(_))
        ));
        assert_eq!(page.scale_ratio, None);
        assert_eq!(page.scale_revision, 0);
    }

    #[test]
    fn test_vision_bbox_rescaled() {
        let mut page = page();
        let input = vision(
            "1/4\" = 1'-0\"",
            Some(BoundingBox::new(100.0, 200.0, 50.0, 10.0)),
            0.5,
        );

        let ratio = apply_detection(&mut page, &input).unwrap();
        assert!((ratio * 37.5 - 1.0).abs() < 1e-9);

        let record = page.calibration_record.as_ref().unwrap();
        assert_eq!(record.method, ScaleDetectionMethod::VisionModel);
        assert_eq!(record.bbox_source, Some(BboxSource::Vision));
        assert_eq!(
            record.bounding_box,
            Some(BoundingBox::new(200.0, 400.0, 100.0, 20.0))
        );
        assert_eq!(page.scale_unit.as_deref(), Some("ft"));
    }

    #[test]
    fn test_ocr_bbox_preferred_over_vision() {
        let mut page = page();
        let mut input = vision(
            "1/4\" = 1'-0\"",
            Some(BoundingBox::new(100.0, 200.0, 50.0, 10.0)),
            0.5,
        );
        input.ocr = Some(OcrResult::new(
            "SCALE: 1/4\" = 1'-0\"",
            vec![TextBlock::new(
                "SCALE: 1/4\" = 1'-0\"",
                BoundingBox::new(190.0, 395.0, 130.0, 25.0),
                0.95,
            )],
        ));

        apply_detection(&mut page, &input).unwrap();
        let record = page.calibration_record.as_ref().unwrap();
        assert_eq!(record.bbox_source, Some(BboxSource::Ocr));
        assert_eq!(record.method, ScaleDetectionMethod::VisionModel);
        assert_eq!(record.bounding_box.unwrap().x, 190.0);
    }

    #[test]
    fn test_ocr_pattern_fallback() {
        let mut page = page();
        let input = ScaleDetectionInput {
            ocr: Some(OcrResult::new(
                "GRADING PLAN\nSCALE 1\" = 20'",
                vec![
                    TextBlock::new("GRADING PLAN", BoundingBox::new(0.0, 0.0, 90.0, 12.0), 0.99),
                    TextBlock::new("SCALE 1\" = 20'", BoundingBox::new(0.0, 20.0, 90.0, 12.0), 0.9),
                ],
            )),
            vision: None,
        };

        let ratio = apply_detection(&mut page, &input).unwrap();
        assert!((ratio - 20.0 / 150.0).abs() < 1e-12);
        let record = page.calibration_record.as_ref().unwrap();
        assert_eq!(record.method, ScaleDetectionMethod::OcrPattern);
        assert_eq!(record.bounding_box.unwrap().y, 20.0);
    }

    #[test]
    fn test_unreadable_vision_text_falls_back_to_ocr() {
        let mut sheet = page();
        let mut input = vision("NORTH ARROW", Some(BoundingBox::new(5.0, 5.0, 20.0, 20.0)), 0.5);
        input.ocr = Some(OcrResult::new(
            "SCALE 1\" = 20'",
            vec![TextBlock::new("SCALE 1\" = 20'", BoundingBox::new(0.0, 20.0, 90.0, 12.0), 0.9)],
        ));

        let ratio = apply_detection(&mut sheet, &input).unwrap();
        assert!((ratio - 20.0 / 150.0).abs() < 1e-12);
        let record = sheet.calibration_record.as_ref().unwrap();
        assert_eq!(record.method, ScaleDetectionMethod::OcrPattern);
        assert_eq!(record.bbox_source, Some(BboxSource::Ocr));

        // Without OCR evidence the vision failure stands
        let mut blank = page();
        assert!(matches!(
            apply_detection(&mut blank, &vision("NORTH ARROW", None, 1.0)),
            Err(TakeoffError::DetectionFailure(_))
        ));
    }

    #[test]
    fn test_preservation_keeps_located_calibration() {
        let mut page = page();
        apply_detection(
            &mut page,
            &vision("1/4\" = 1'-0\"", Some(BoundingBox::new(10.0, 10.0, 40.0, 8.0)), 1.0),
        )
        .unwrap();
        let before = page.clone();

        begin_detection(&mut page);
        let result = apply_detection(&mut page, &vision("1/8\" = 1'-0\"", None, 1.0));

        assert!(matches!(
            result,
            Err(TakeoffError::CalibrationRegressionRejected { .. })
        ));
        assert_eq!(page.scale_ratio, before.scale_ratio);
        assert_eq!(page.calibration_record, before.calibration_record);
        assert_eq!(page.scale_revision, before.scale_revision);
        assert_eq!(page.calibration_state, CalibrationState::Calibrated);
    }

    #[test]
    fn test_bbox_result_replaces_unlocated_calibration() {
        let mut page = page();
        apply_detection(&mut page, &vision("1/8\" = 1'-0\"", None, 1.0)).unwrap();
        assert_eq!(page.scale_revision, 1);

        apply_detection(
            &mut page,
            &vision("1/4\" = 1'-0\"", Some(BoundingBox::new(10.0, 10.0, 40.0, 8.0)), 1.0),
        )
        .unwrap();
        assert_eq!(page.scale_revision, 2);
        assert!(page.calibration_record.as_ref().unwrap().bounding_box.is_some());
    }

    #[test]
    fn test_manual_never_overwritten() {
        let mut page = page();
        calibrate_manual(
            &mut page,
            PixelPoint::new(0.0, 0.0),
            PixelPoint::new(100.0, 0.0),
            5.0,
            "ft",
        )
        .unwrap();

        let result = apply_detection(
            &mut page,
            &vision("1/4\" = 1'-0\"", Some(BoundingBox::new(10.0, 10.0, 40.0, 8.0)), 1.0),
        );
        assert!(matches!(
            result,
            Err(TakeoffError::CalibrationRegressionRejected { .. })
        ));
        assert_eq!(page.scale_ratio, Some(0.05));
        assert_eq!(page.scale_detection_method, ScaleDetectionMethod::Manual);
    }

    #[test]
    fn test_failed_detection_states() {
        let mut page = page();
        begin_detection(&mut page);
        let result = apply_detection(&mut page, &vision("NOT TO SCALE", None, 1.0));
        assert!(matches!(result, Err(TakeoffError::DetectionFailure(_))));
        assert_eq!(page.calibration_state, CalibrationState::DetectionFailed);
        assert!(page.last_detection_error.is_some());

        apply_detection(&mut page, &vision("1\" = 10'", None, 1.0)).unwrap();
        begin_detection(&mut page);
        fail_detection(&mut page, "detector timed out");
        assert_eq!(page.calibration_state, CalibrationState::Calibrated);
        assert!(page.scale_ratio.is_some());
    }

    #[test]
    fn test_reset_calibration() {
        let mut page = page();
        apply_detection(&mut page, &vision("1\" = 10'", None, 1.0)).unwrap();
        reset_calibration(&mut page);

        assert_eq!(page.scale_ratio, None);
        assert!(!page.scale_calibrated);
        assert_eq!(page.calibration_state, CalibrationState::Uncalibrated);
        assert_eq!(page.scale_revision, 2);
    }
}
