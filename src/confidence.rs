//! Aggregate trust scoring for an extraction result.

use crate::types::VendorResolution;

const OCR_WEIGHT: f64 = 0.3;
const FIELD_WEIGHT: f64 = 0.5;
const VENDOR_WEIGHT: f64 = 0.2;

/// Advisory review bands surfaced to the reviewer. The score never blocks
/// confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceBand {
    /// >= 70
    LikelyCorrect,
    /// 40..=69
    ReviewRecommended,
    /// < 40
    NeedsCorrection,
}

pub fn band(score: u8) -> ConfidenceBand {
    match score {
        70.. => ConfidenceBand::LikelyCorrect,
        40..=69 => ConfidenceBand::ReviewRecommended,
        _ => ConfidenceBand::NeedsCorrection,
    }
}

/// Combine the OCR quality signal (0-100), the mean per-field extraction
/// confidence (0-1) and the vendor resolution outcome into one score in
/// [0,100].
///
/// When the recognizer reports no quality signal, its weight is
/// redistributed over the remaining terms.
pub fn aggregate(
    ocr_quality: Option<f64>,
    field_mean: f64,
    resolution: &VendorResolution,
) -> u8 {
    let vendor_bonus = match resolution {
        VendorResolution::Matched { .. } => 1.0,
        VendorResolution::Created { .. } => 0.5,
        VendorResolution::Unresolved => 0.0,
    };
    let field_mean = field_mean.clamp(0.0, 1.0);

    let score = match ocr_quality {
        Some(quality) => {
            let quality = (quality / 100.0).clamp(0.0, 1.0);
            OCR_WEIGHT * quality + FIELD_WEIGHT * field_mean + VENDOR_WEIGHT * vendor_bonus
        }
        None => {
            (FIELD_WEIGHT * field_mean + VENDOR_WEIGHT * vendor_bonus)
                / (FIELD_WEIGHT + VENDOR_WEIGHT)
        }
    };

    (score * 100.0).round().clamp(0.0, 100.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_signal_scores_zero() {
        assert_eq!(aggregate(Some(0.0), 0.0, &VendorResolution::Unresolved), 0);
        assert_eq!(aggregate(None, 0.0, &VendorResolution::Unresolved), 0);
    }

    #[test]
    fn perfect_signal_scores_hundred() {
        let resolution = VendorResolution::Matched { vendor_id: 1 };
        assert_eq!(aggregate(Some(100.0), 1.0, &resolution), 100);
    }

    #[test]
    fn weights_apply() {
        // 0.3 * 0.8 + 0.5 * 0.6 + 0.2 * 0.5 = 0.64
        let resolution = VendorResolution::Created { vendor_id: 1 };
        assert_eq!(aggregate(Some(80.0), 0.6, &resolution), 64);
    }

    #[test]
    fn missing_quality_redistributes_weight() {
        // (0.5 * 0.6 + 0.2 * 1.0) / 0.7 = 0.714...
        let resolution = VendorResolution::Matched { vendor_id: 1 };
        assert_eq!(aggregate(None, 0.6, &resolution), 71);
    }

    #[test]
    fn out_of_range_inputs_are_clamped() {
        let resolution = VendorResolution::Matched { vendor_id: 1 };
        assert_eq!(aggregate(Some(250.0), 1.5, &resolution), 100);
        assert_eq!(aggregate(Some(-20.0), -0.5, &resolution), 20);
    }

    #[test]
    fn bands() {
        assert_eq!(band(100), ConfidenceBand::LikelyCorrect);
        assert_eq!(band(70), ConfidenceBand::LikelyCorrect);
        assert_eq!(band(69), ConfidenceBand::ReviewRecommended);
        assert_eq!(band(40), ConfidenceBand::ReviewRecommended);
        assert_eq!(band(39), ConfidenceBand::NeedsCorrection);
        assert_eq!(band(0), ConfidenceBand::NeedsCorrection);
    }
}
