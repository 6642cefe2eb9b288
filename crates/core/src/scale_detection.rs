//! Scale notation parsing
//!
//! Parses the scale notations commonly printed in drawing title blocks and
//! turns them into a real-world distance per paper inch. Combined with the
//! DPI a sheet was rendered at, that yields a page's scale ratio in real
//! units per pixel.

/// Millimetres in one inch
const MM_PER_INCH: f64 = 25.4;

/// Largest metric denominator accepted as a drawing scale
const MAX_DENOMINATOR: f64 = 10_000.0;

/// Largest number of feet per paper inch accepted
const MAX_FEET_PER_INCH: f64 = 1_000.0;

/// A scale notation found in text
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedScale {
    /// Real-world distance represented by one paper inch, in `unit`
    pub real_per_inch: f64,
    /// Confidence score (0.0-1.0)
    pub confidence: f64,
    /// Real-world unit ("ft", "m", "cm", "mm")
    pub unit: String,
    /// Normalised notation that was parsed
    pub source_text: String,
    /// Zero-based line the notation was found on
    pub line: usize,
}

impl DetectedScale {
    fn new(
        real_per_inch: f64,
        confidence: f64,
        unit: &str,
        source_text: String,
        line: usize,
    ) -> Self {
        Self {
            real_per_inch,
            confidence,
            unit: unit.to_string(),
            source_text,
            line,
        }
    }

    /// Real units per pixel for a sheet rendered at `dpi`
    pub fn ratio_for_dpi(&self, dpi: f64) -> f64 {
        self.real_per_inch / dpi
    }
}

/// Parse text for scale notations
///
/// Returns every notation found, highest confidence first. Recognised forms:
/// - `1:100`, `Scale 1:50` (metric ratio, metres unless a unit follows)
/// - `1:20 mm`, `1:5 centimetres`
/// - `1/4" = 1'-0"`, `1-1/2"=1'` (architectural)
/// - `1" = 20'` (engineering)
pub fn detect_scales(text: &str) -> Vec<DetectedScale> {
    let normalized = normalize_quotes(text);
    let mut detections = Vec::new();

    for (line_no, line) in normalized.lines().enumerate() {
        detections.extend(detect_metric_ratio(line, line_no));
        detections.extend(detect_imperial(line, line_no));
    }

    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    detections
}

/// Best (highest confidence) notation in the text
pub fn best_scale(text: &str) -> Option<DetectedScale> {
    detect_scales(text).into_iter().next()
}

/// Map typographic quotes and primes OCR tends to emit onto ASCII
fn normalize_quotes(text: &str) -> String {
    text.replace("''", "\"")
        .chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' | '\u{2033}' => '"',
            '\u{2018}' | '\u{2019}' | '\u{2032}' => '\'',
            other => other,
        })
        .collect()
}

/// Metric units as (spelling, abbreviation, real units per paper inch at 1:1)
const METRIC_UNITS: &[(&str, &str, f64)] = &[
    ("millimetres", "mm", MM_PER_INCH),
    ("millimeters", "mm", MM_PER_INCH),
    ("millimetre", "mm", MM_PER_INCH),
    ("millimeter", "mm", MM_PER_INCH),
    ("mm", "mm", MM_PER_INCH),
    ("centimetres", "cm", MM_PER_INCH / 10.0),
    ("centimeters", "cm", MM_PER_INCH / 10.0),
    ("centimetre", "cm", MM_PER_INCH / 10.0),
    ("centimeter", "cm", MM_PER_INCH / 10.0),
    ("cm", "cm", MM_PER_INCH / 10.0),
    ("metres", "m", MM_PER_INCH / 1000.0),
    ("meters", "m", MM_PER_INCH / 1000.0),
    ("metre", "m", MM_PER_INCH / 1000.0),
    ("meter", "m", MM_PER_INCH / 1000.0),
    ("m", "m", MM_PER_INCH / 1000.0),
];

/// Detect `1:N [unit]`
fn detect_metric_ratio(line: &str, line_no: usize) -> Vec<DetectedScale> {
    let lower = line.to_lowercase();
    let mut detections = Vec::new();
    let mentions_scale = lower.contains("scale");

    for (idx, _) in lower.match_indices("1:") {
        // Reject times and larger ratios such as 11:30
        let preceded_by_digit = lower[..idx]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_ascii_digit() || c == '.');
        if preceded_by_digit {
            continue;
        }

        let rest = &lower[idx + 2..];
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let Ok(denominator) = rest[..number_len].parse::<f64>() else {
            continue;
        };
        if denominator <= 0.0 || denominator > MAX_DENOMINATOR {
            continue;
        }

        let unit_text = rest[number_len..].trim_start();
        let explicit = METRIC_UNITS.iter().find(|(spelling, _, _)| {
            unit_text.starts_with(spelling)
                && !unit_text[spelling.len()..]
                    .chars()
                    .next()
                    .is_some_and(char::is_alphabetic)
        });

        let detection = match explicit {
            Some((_, abbreviation, per_inch)) => DetectedScale::new(
                denominator * per_inch,
                0.95,
                abbreviation,
                format!("1:{} {}", denominator, abbreviation),
                line_no,
            ),
            None => DetectedScale::new(
                denominator * MM_PER_INCH / 1000.0,
                if mentions_scale { 0.9 } else { 0.7 },
                "m",
                format!("1:{}", denominator),
                line_no,
            ),
        };
        detections.push(detection);
    }

    detections
}

/// Detect `P" = F'` in both architectural and engineering flavours
fn detect_imperial(line: &str, line_no: usize) -> Vec<DetectedScale> {
    let mut detections = Vec::new();

    for (quote_idx, _) in line.match_indices('"') {
        let Some((paper_text, paper_inches)) = paper_inches_before(&line[..quote_idx]) else {
            continue;
        };

        let after = line[quote_idx + 1..].trim_start();
        let Some(after_eq) = after.strip_prefix('=') else {
            continue;
        };
        let after_eq = after_eq.trim_start();
        let feet_len = after_eq
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(after_eq.len());
        if !after_eq[feet_len..].starts_with('\'') {
            continue;
        }
        let Ok(feet) = after_eq[..feet_len].parse::<f64>() else {
            continue;
        };

        let real_per_inch = feet / paper_inches;
        if !(real_per_inch > 0.0 && real_per_inch <= MAX_FEET_PER_INCH) {
            continue;
        }

        // Architectural sheets state a fraction of an inch per foot
        let architectural = feet == 1.0;
        let source_text = if architectural {
            format!("{}\" = 1'-0\"", paper_text)
        } else {
            format!("{}\" = {}'", paper_text, feet)
        };
        detections.push(DetectedScale::new(
            real_per_inch,
            if architectural { 0.95 } else { 0.9 },
            "ft",
            source_text,
            line_no,
        ));
    }

    detections
}

/// Parse the paper measurement ending right before a `"` (e.g. `3/16`, `1-1/2`)
fn paper_inches_before(prefix: &str) -> Option<(&str, f64)> {
    let start = prefix
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit() || matches!(c, '/' | '-' | '.'))
        .last()
        .map(|(idx, _)| idx)?;
    let token = prefix[start..].trim_start_matches('-');
    let inches = parse_inches(token)?;
    (inches > 0.0).then_some((token, inches))
}

/// `1`, `0.25`, `3/16`, `1-1/2`
fn parse_inches(token: &str) -> Option<f64> {
    let (whole, fraction) = match token.split_once('-') {
        Some((whole, fraction)) => (Some(whole), fraction),
        None => (None, token),
    };

    let fraction_value = match fraction.split_once('/') {
        Some((numerator, denominator)) => {
            let numerator: f64 = numerator.parse().ok()?;
            let denominator: f64 = denominator.parse().ok()?;
            if denominator == 0.0 {
                return None;
            }
            numerator / denominator
        }
        None => fraction.parse().ok()?,
    };

    match whole {
        Some(whole) => Some(whole.parse::<f64>().ok()? + fraction_value),
        None => Some(fraction_value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_simple_ratio_detection() {
        let scales = detect_scales("Drawing Scale 1:100");

        assert_eq!(scales.len(), 1);
        let best = &scales[0];
        assert!(approx(best.real_per_inch, 2.54));
        assert!(best.confidence > 0.8);
        assert_eq!(best.unit, "m");
    }

    #[test]
    fn test_metric_scale_with_unit() {
        let best = best_scale("Scale 1:50 meters").unwrap();
        assert!(approx(best.real_per_inch, 1.27));
        assert!(best.confidence > 0.9);
        assert_eq!(best.unit, "m");

        let best = best_scale("Scale 1:20 millimeters").unwrap();
        assert!(approx(best.real_per_inch, 508.0));
        assert_eq!(best.unit, "mm");

        let best = best_scale("1:5 centimetres").unwrap();
        assert!(approx(best.real_per_inch, 12.7));
        assert_eq!(best.unit, "cm");
    }

    #[test]
    fn test_imperial_architectural() {
        let best = best_scale("Scale: 1/4\" = 1'-0\"").unwrap();

        assert!(approx(best.real_per_inch, 4.0));
        assert!(best.confidence > 0.9);
        assert_eq!(best.unit, "ft");
        assert_eq!(best.source_text, "1/4\" = 1'-0\"");
    }

    #[test]
    fn test_architectural_ratio_at_150_dpi() {
        // One foot spans 37.5 px
        let best = best_scale("1/4\" = 1'-0\"").unwrap();
        assert!(approx(best.ratio_for_dpi(150.0) * 37.5, 1.0));
    }

    #[test]
    fn test_architectural_scale_variants() {
        for variant in ["1/8\" = 1'-0\"", "1/8\" = 1'", "1/8\"=1'-0\"", "1/8\"=1'"] {
            let best = best_scale(variant)
                .unwrap_or_else(|| panic!("failed to detect scale in: {}", variant));
            assert!(approx(best.real_per_inch, 8.0), "{}", variant);
            assert_eq!(best.unit, "ft");
        }

        let best = best_scale("3/16\" = 1'-0\"").unwrap();
        assert!(approx(best.real_per_inch, 16.0 / 3.0));

        let best = best_scale("1-1/2\" = 1'-0\"").unwrap();
        assert!(approx(best.real_per_inch, 2.0 / 3.0));
    }

    #[test]
    fn test_imperial_engineering() {
        let best = best_scale("Scale: 1\" = 20'").unwrap();
        assert!(approx(best.real_per_inch, 20.0));
        assert!(best.confidence > 0.8);
        assert_eq!(best.unit, "ft");

        let best = best_scale("1\"=30'").unwrap();
        assert!(approx(best.real_per_inch, 30.0));
    }

    #[test]
    fn test_typographic_quotes() {
        let best = best_scale("SCALE: 1/4\u{201D} = 1\u{2019}-0\u{201D}").unwrap();
        assert!(approx(best.real_per_inch, 4.0));
    }

    #[test]
    fn test_multiple_scales() {
        let scales = detect_scales("Main Floor: Scale 1:100\nDetail: Scale 1:50");

        assert_eq!(scales.len(), 2);
        assert!(scales.iter().any(|s| approx(s.real_per_inch, 2.54) && s.line == 0));
        assert!(scales.iter().any(|s| approx(s.real_per_inch, 1.27) && s.line == 1));
    }

    #[test]
    fn test_no_scale_detected() {
        assert!(detect_scales("This is just some text without any scale information").is_empty());
        assert!(best_scale("Meeting at 11:30").is_none());
    }

    #[test]
    fn test_prefers_explicit_unit() {
        let best = best_scale("Scale 1:100 meters\nNote: 1:50").unwrap();
        assert!(approx(best.real_per_inch, 2.54));
        assert_eq!(best.unit, "m");
        assert_eq!(best.line, 0);
    }

    #[test]
    fn test_case_insensitive() {
        let best = best_scale("SCALE 1:100 METERS").unwrap();
        assert_eq!(best.unit, "m");
        assert!(best.confidence > 0.9);
    }

    #[test]
    fn test_invalid_ratios_ignored() {
        let scales = detect_scales("1:0 1:99999 1:-5 0\" = 1'");
        assert!(scales.is_empty());
    }
}
