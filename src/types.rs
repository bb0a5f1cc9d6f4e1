use serde::Serialize;
use serde_json::{Map, Value};

/// One text hypothesis for a plate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlateCandidate {
    pub text: String,
    pub confidence: f64,
}

impl PlateCandidate {
    pub fn new(text: impl Into<String>, confidence: f64) -> Self {
        PlateCandidate {
            text: text.into(),
            confidence,
        }
    }
}

/// One located plate. The bounding region is passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlateDetection {
    pub bounding_region: Value,
    pub candidates: Vec<PlateCandidate>,
}

impl PlateDetection {
    /// Orders candidates by descending confidence, keeping engine order for
    /// ties, and keeps at most `top_n` of them.
    pub fn rank(&mut self, top_n: usize) {
        for candidate in &mut self.candidates {
            candidate.confidence = clamp_confidence(candidate.confidence);
        }
        // sort_by is stable
        self.candidates
            .sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        self.candidates.truncate(top_n);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionResult {
    pub detections: Vec<PlateDetection>,
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub processing_metadata: Map<String, Value>,
}

impl RecognitionResult {
    /// Ranks every detection in place. Detection order is left as the engine
    /// reported it.
    pub fn rank(&mut self, top_n: usize) {
        for detection in &mut self.detections {
            detection.rank(top_n);
        }
    }
}

fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 100.0)
    }
}
