//! Colour composition of a leaf crop and the health heuristic derived from it.
//!
//! Four hue bands are measured independently on the crop (hue on the 0-180 scale):
//!
//! | band   | lower           | upper            |
//! |--------|-----------------|------------------|
//! | green  | (36, 25, 25)    | (86, 255, 255)   |
//! | yellow | (20, 100, 20)   | (35, 255, 255)   |
//! | brown  | (8, 40, 40)     | (20, 255, 200)   |
//! | red    | (0, 100, 20)    | (10, 255, 255)   |
//! |        | (175, 100, 20)  | (180, 255, 255)  |
//!
//! Red is the union of two ranges because hue wraps around. Pixels outside every band
//! are not counted, so the percentages need not add up to 100.

use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::VisionError;
use crate::frame::HsvImage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HueBand {
    pub lower: [u8; 3],
    pub upper: [u8; 3],
}

impl HueBand {
    const fn new(lower: [u8; 3], upper: [u8; 3]) -> Self {
        Self { lower, upper }
    }
}

pub const GREEN_BAND: HueBand = HueBand::new([36, 25, 25], [86, 255, 255]);
pub const YELLOW_BAND: HueBand = HueBand::new([20, 100, 20], [35, 255, 255]);
pub const BROWN_BAND: HueBand = HueBand::new([8, 40, 40], [20, 255, 200]);
pub const RED_LOW_BAND: HueBand = HueBand::new([0, 100, 20], [10, 255, 255]);
pub const RED_HIGH_BAND: HueBand = HueBand::new([175, 100, 20], [180, 255, 255]);

/// Share of the crop, in percent, falling in each hue band.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ColorProfile {
    pub green: f64,
    pub yellow: f64,
    pub brown: f64,
    pub red: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DominantColor {
    Green,
    Yellow,
    Brown,
    Red,
    Mixed,
}

impl ColorProfile {
    pub fn new(green: f64, yellow: f64, brown: f64, red: f64) -> Self {
        Self { green, yellow, brown, red }
    }

    /// The band with the largest share, or `Mixed` when no band exceeds 15%.
    pub fn dominant(&self) -> DominantColor {
        let bands = [
            (DominantColor::Green, self.green),
            (DominantColor::Yellow, self.yellow),
            (DominantColor::Brown, self.brown),
            (DominantColor::Red, self.red),
        ];
        let (color, share) = bands
            .into_iter()
            .fold((DominantColor::Mixed, f64::MIN), |best, band| {
                if band.1 > best.1 {
                    band
                } else {
                    best
                }
            });
        if share > 15.0 {
            color
        } else {
            DominantColor::Mixed
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthAssessment {
    pub status: HealthStatus,
    pub reason: String,
}

impl HealthAssessment {
    fn new(status: HealthStatus, reason: &str) -> Self {
        Self {
            status,
            reason: reason.to_string(),
        }
    }

    /// Placeholder held until the first analysis completes.
    pub fn pending() -> Self {
        Self::new(HealthStatus::Unhealthy, "Analizando...")
    }

    /// Ordered rules, first match wins.
    pub fn from_profile(p: &ColorProfile) -> Self {
        if p.green > 50.0 && p.yellow < 20.0 && p.brown < 10.0 {
            Self::new(HealthStatus::Healthy, "Saludable")
        } else if p.yellow > 25.0 {
            Self::new(HealthStatus::Unhealthy, "Deficiencia nutrientes")
        } else if p.brown > 20.0 {
            Self::new(HealthStatus::Unhealthy, "Falta de agua")
        } else if p.red > 15.0 && p.green < 40.0 {
            Self::new(HealthStatus::Unhealthy, "Posible enfermedad")
        } else if p.green > 30.0 {
            Self::new(HealthStatus::Healthy, "Estado moderado")
        } else {
            Self::new(HealthStatus::Unhealthy, "Color atipico")
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// A measured profile together with the assessment derived from it.
#[derive(Debug, Clone, PartialEq)]
pub struct ColorAnalysis {
    pub profile: ColorProfile,
    pub health: HealthAssessment,
}

#[derive(Debug, Clone, Default)]
pub struct ColorHealthAnalyzer;

impl ColorHealthAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Band percentages of `crop`. An empty crop is an error, never an all-zero profile.
    pub fn profile(&self, crop: &RgbImage) -> Result<ColorProfile, VisionError> {
        if crop.width() == 0 || crop.height() == 0 {
            return Err(VisionError::EmptyCrop);
        }

        let hsv = HsvImage::from_rgb(crop);
        let total = hsv.len() as f64;
        let share = |count: usize| round2(count as f64 / total * 100.0);

        let red = hsv
            .pixels()
            .iter()
            .filter(|p| {
                p.within(RED_LOW_BAND.lower, RED_LOW_BAND.upper)
                    || p.within(RED_HIGH_BAND.lower, RED_HIGH_BAND.upper)
            })
            .count();

        Ok(ColorProfile {
            green: share(hsv.count_in_range(GREEN_BAND.lower, GREEN_BAND.upper)),
            yellow: share(hsv.count_in_range(YELLOW_BAND.lower, YELLOW_BAND.upper)),
            brown: share(hsv.count_in_range(BROWN_BAND.lower, BROWN_BAND.upper)),
            red: share(red),
        })
    }

    pub fn analyze(&self, crop: &RgbImage) -> Result<ColorAnalysis, VisionError> {
        let profile = self.profile(crop)?;
        let health = HealthAssessment::from_profile(&profile);
        debug!(
            "Colour profile green {:.2}% yellow {:.2}% brown {:.2}% red {:.2}% -> {} ({:?} dominant)",
            profile.green,
            profile.yellow,
            profile.brown,
            profile.red,
            health.reason,
            profile.dominant()
        );
        Ok(ColorAnalysis { profile, health })
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn reason(green: f64, yellow: f64, brown: f64, red: f64) -> String {
        HealthAssessment::from_profile(&ColorProfile::new(green, yellow, brown, red)).reason
    }

    #[test]
    fn test_health_rule_precedence() {
        assert_eq!(reason(60.0, 5.0, 2.0, 0.0), "Saludable");
        assert_eq!(reason(10.0, 30.0, 5.0, 0.0), "Deficiencia nutrientes");
        assert_eq!(reason(20.0, 0.0, 25.0, 0.0), "Falta de agua");
        assert_eq!(reason(35.0, 0.0, 0.0, 20.0), "Posible enfermedad");
        assert_eq!(reason(35.0, 0.0, 0.0, 0.0), "Estado moderado");
        assert_eq!(reason(5.0, 5.0, 5.0, 5.0), "Color atipico");
    }

    #[test]
    fn test_health_status_matches_reason() {
        let healthy = HealthAssessment::from_profile(&ColorProfile::new(60.0, 5.0, 2.0, 0.0));
        assert!(healthy.is_healthy());
        let moderate = HealthAssessment::from_profile(&ColorProfile::new(35.0, 0.0, 0.0, 0.0));
        assert!(moderate.is_healthy());
        let dry = HealthAssessment::from_profile(&ColorProfile::new(20.0, 0.0, 25.0, 0.0));
        assert_eq!(dry.status, HealthStatus::Unhealthy);
    }

    #[test]
    fn test_first_matching_rule_wins() {
        // Yellow and brown both qualify; the yellow rule comes first.
        assert_eq!(reason(10.0, 30.0, 30.0, 0.0), "Deficiencia nutrientes");
        // Healthy rule beats the red rule even with red present.
        assert_eq!(reason(55.0, 0.0, 0.0, 30.0), "Saludable");
    }

    #[test]
    fn test_all_zero_profile_is_atypical() {
        assert_eq!(reason(0.0, 0.0, 0.0, 0.0), "Color atipico");
    }

    #[test]
    fn test_empty_crop_fails() {
        let analyzer = ColorHealthAnalyzer::new();
        assert!(matches!(
            analyzer.analyze(&RgbImage::new(0, 10)),
            Err(VisionError::EmptyCrop)
        ));
    }

    #[test]
    fn test_profile_of_split_crop() {
        // Left half pure green, right half black.
        let crop = RgbImage::from_fn(10, 10, |x, _| {
            if x < 5 {
                Rgb([0, 255, 0])
            } else {
                Rgb([0, 0, 0])
            }
        });
        let profile = ColorHealthAnalyzer::new().profile(&crop).unwrap();
        assert_eq!(profile, ColorProfile::new(50.0, 0.0, 0.0, 0.0));
    }

    #[test]
    fn test_red_counts_both_hue_ranges() {
        // Pure red sits at hue 0, magenta-red (255, 0, 40) wraps to hue ~175.
        let crop = RgbImage::from_fn(4, 1, |x, _| match x {
            0 => Rgb([255, 0, 0]),
            1 => Rgb([255, 0, 40]),
            _ => Rgb([0, 0, 0]),
        });
        let profile = ColorHealthAnalyzer::new().profile(&crop).unwrap();
        assert_eq!(profile.red, 50.0);
    }

    #[test]
    fn test_percentages_are_rounded_to_two_decimals() {
        // One green pixel in three: 33.333...% -> 33.33
        let crop = RgbImage::from_fn(3, 1, |x, _| {
            if x == 0 {
                Rgb([0, 255, 0])
            } else {
                Rgb([0, 0, 0])
            }
        });
        let profile = ColorHealthAnalyzer::new().profile(&crop).unwrap();
        assert_eq!(profile.green, 33.33);
        for value in [profile.green, profile.yellow, profile.brown, profile.red] {
            assert!((0.0..=100.0).contains(&value));
            assert_eq!((value * 100.0).round() / 100.0, value);
        }
    }

    #[test]
    fn test_dominant_color() {
        assert_eq!(ColorProfile::new(60.0, 5.0, 2.0, 0.0).dominant(), DominantColor::Green);
        assert_eq!(ColorProfile::new(10.0, 30.0, 5.0, 0.0).dominant(), DominantColor::Yellow);
        assert_eq!(ColorProfile::new(10.0, 12.0, 15.0, 3.0).dominant(), DominantColor::Mixed);
    }
}
