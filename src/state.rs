use anyhow::Result;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tokio::fs;

use crate::classifier::Classification;
use crate::color::{ColorAnalysis, ColorProfile, HealthAssessment};

/// Latest classification plus colour/health result, handed out as one serializable unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionSnapshot {
    pub classification: Classification,
    pub profile: ColorProfile,
    pub health: HealthAssessment,
}

impl Default for DetectionSnapshot {
    fn default() -> Self {
        Self {
            classification: Classification::detecting(),
            profile: ColorProfile::default(),
            health: HealthAssessment::pending(),
        }
    }
}

impl DetectionSnapshot {
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, self.to_json_pretty()?).await?;
        Ok(())
    }
}

/// Process-wide detection result. The pipeline is the only writer; any number of
/// readers may take snapshots concurrently.
///
/// This holds the most recent valid detection observed. When a frame contains several
/// candidates, the last one processed wins; there is no per-region identity tracking.
/// Each update replaces the whole snapshot under the write lock, so a reader sees either
/// the previous or the next state, never a mix of the two.
#[derive(Debug, Clone, Default)]
pub struct DetectionState {
    inner: Arc<RwLock<DetectionSnapshot>>,
}

impl DetectionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> DetectionSnapshot {
        self.inner.read().clone()
    }

    /// Snapshot for status reporting; `None` while the latest label is one the caller
    /// does not want shown.
    pub fn report(&self, ignored_labels: &[String]) -> Option<DetectionSnapshot> {
        let snapshot = self.snapshot();
        let ignored = ignored_labels
            .iter()
            .any(|label| label.eq_ignore_ascii_case(&snapshot.classification.label));
        if ignored {
            None
        } else {
            Some(snapshot)
        }
    }

    /// Overwrites the classification and, when given, the colour/health fields in a single
    /// write.
    pub(crate) fn record(&self, classification: Classification, analysis: Option<ColorAnalysis>) {
        let mut guard = self.inner.write();
        guard.classification = classification;
        if let Some(analysis) = analysis {
            guard.profile = analysis.profile;
            guard.health = analysis.health;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::DETECTING_LABEL;

    #[test]
    fn test_baseline_snapshot() {
        let state = DetectionState::new();
        let snapshot = state.snapshot();
        assert_eq!(snapshot.classification.label, DETECTING_LABEL);
        assert_eq!(snapshot.classification.probability, 0.0);
        assert_eq!(snapshot.profile, ColorProfile::default());
        assert_eq!(snapshot.health.reason, "Analizando...");
    }

    #[test]
    fn test_record_without_analysis_keeps_health() {
        let state = DetectionState::new();
        let profile = ColorProfile::new(60.0, 5.0, 2.0, 0.0);
        state.record(
            Classification::new("menta", 0.9),
            Some(ColorAnalysis {
                profile,
                health: HealthAssessment::from_profile(&profile),
            }),
        );
        state.record(Classification::new("albahaca", 0.7), None);

        let snapshot = state.snapshot();
        assert_eq!(snapshot.classification.label, "albahaca");
        assert_eq!(snapshot.profile, profile);
        assert_eq!(snapshot.health.reason, "Saludable");
    }

    #[test]
    fn test_clones_share_state() {
        let writer = DetectionState::new();
        let reader = writer.clone();
        writer.record(Classification::new("romero", 0.95), None);
        assert_eq!(reader.snapshot().classification.label, "romero");
    }

    #[test]
    fn test_report_hides_ignored_labels() {
        let state = DetectionState::new();
        let ignored = vec!["no_planta".to_string()];
        assert!(state.report(&ignored).is_some());
        state.record(Classification::new("NO_PLANTA", 0.8), None);
        assert!(state.report(&ignored).is_none());
    }

    #[test]
    fn test_snapshot_json_shape() {
        let json = DetectionState::new().snapshot().to_json_pretty().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["classification"]["label"], DETECTING_LABEL);
        assert_eq!(value["health"]["status"], "unhealthy");
        assert_eq!(value["profile"]["green"], 0.0);
    }

    #[test]
    fn test_concurrent_readers_see_whole_updates() {
        let state = DetectionState::new();
        let profile = ColorProfile::new(60.0, 5.0, 2.0, 0.0);
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let state = state.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let snapshot = state.snapshot();
                        // The label and the profile are always written together here.
                        if snapshot.classification.label == "menta" {
                            assert_eq!(snapshot.profile.green, 60.0);
                        }
                    }
                })
            })
            .collect();

        for _ in 0..1000 {
            state.record(
                Classification::new("menta", 0.9),
                Some(ColorAnalysis {
                    profile,
                    health: HealthAssessment::from_profile(&profile),
                }),
            );
        }
        for reader in readers {
            reader.join().unwrap();
        }
    }
}
