//! Recognition results reported by an ALPR engine
//!
//! Engines either build these values directly or hand back the engine's JSON
//! response, which is parsed here.

use serde::Deserialize;

use crate::error::EngineError;

/// A single candidate reading of a plate
#[derive(Debug, Clone, PartialEq)]
pub struct PlateCandidate {
    /// Plate text
    pub characters: String,
    /// Overall confidence (0.0 - 100.0)
    pub confidence: f32,
    /// Whether the text matched the region's plate pattern
    pub matches_template: bool,
}

impl PlateCandidate {
    pub fn new(characters: impl Into<String>, confidence: f32) -> Self {
        Self {
            characters: characters.into(),
            confidence,
            matches_template: false,
        }
    }
}

/// One detected plate region with its ranked candidates
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PlateGroup {
    /// Candidates, best first
    pub candidates: Vec<PlateCandidate>,
    /// Region the plate was matched to, if any
    pub region: Option<String>,
    /// Confidence of the region match (0.0 - 100.0)
    pub region_confidence: Option<f32>,
}

impl PlateGroup {
    pub fn new(candidates: Vec<PlateCandidate>) -> Self {
        Self {
            candidates,
            region: None,
            region_confidence: None,
        }
    }

    /// Highest ranked candidate
    pub fn best(&self) -> Option<&PlateCandidate> {
        self.candidates.first()
    }
}

/// Everything the engine reported for one image
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecognitionResult {
    /// Detected plates in engine detection order
    pub plate_groups: Vec<PlateGroup>,
    /// Total engine processing time in milliseconds
    pub total_processing_time_ms: f32,
    /// Decoded image size (width, height) when the engine reports it
    pub image_size: Option<(u32, u32)>,
    /// When the engine produced the result, in milliseconds since the Unix epoch
    pub epoch_time_ms: Option<u64>,
}

impl RecognitionResult {
    pub fn new(plate_groups: Vec<PlateGroup>, total_processing_time_ms: f32) -> Self {
        Self {
            plate_groups,
            total_processing_time_ms,
            image_size: None,
            epoch_time_ms: None,
        }
    }

    /// Result with no detected plates
    pub fn empty(total_processing_time_ms: f32) -> Self {
        Self::new(Vec::new(), total_processing_time_ms)
    }

    /// Parse the engine's JSON response format
    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        let raw: RawResults = serde_json::from_str(json)
            .map_err(|e| EngineError::malformed(format!("invalid JSON response: {e}")))?;

        let plate_groups = raw
            .results
            .into_iter()
            .map(|plate| PlateGroup {
                candidates: plate
                    .candidates
                    .into_iter()
                    .map(|c| PlateCandidate {
                        characters: c.plate,
                        confidence: c.confidence,
                        matches_template: c.matches_template != 0,
                    })
                    .collect(),
                region: plate.region.filter(|r| !r.is_empty()),
                region_confidence: plate.region_confidence,
            })
            .collect();

        let image_size = match (raw.img_width, raw.img_height) {
            (Some(w), Some(h)) => Some((w, h)),
            _ => None,
        };

        let result = Self {
            plate_groups,
            total_processing_time_ms: raw.processing_time_ms,
            image_size,
            epoch_time_ms: raw.epoch_time,
        };
        result.validate()?;
        Ok(result)
    }

    /// Check value ranges the stage relies on
    pub fn validate(&self) -> Result<(), EngineError> {
        let time = self.total_processing_time_ms;
        if !time.is_finite() || time < 0.0 {
            return Err(EngineError::malformed(format!(
                "processing time {time} is not a non-negative number"
            )));
        }

        for (index, group) in self.plate_groups.iter().enumerate() {
            for candidate in &group.candidates {
                let confidence = candidate.confidence;
                if !confidence.is_finite() || !(0.0..=100.0).contains(&confidence) {
                    return Err(EngineError::malformed(format!(
                        "plate {index} candidate '{}' has confidence {confidence} outside 0-100",
                        candidate.characters
                    )));
                }
            }
        }

        Ok(())
    }

    /// Cut every group down to `top_n` candidates, returning how many were removed
    pub fn truncate_to(&mut self, top_n: u32) -> usize {
        let limit = top_n as usize;
        let mut removed = 0;
        for group in &mut self.plate_groups {
            if group.candidates.len() > limit {
                removed += group.candidates.len() - limit;
                group.candidates.truncate(limit);
            }
        }
        removed
    }

    /// All candidates of all groups, in reporting order
    pub fn candidates(&self) -> impl Iterator<Item = &PlateCandidate> {
        self.plate_groups.iter().flat_map(|g| g.candidates.iter())
    }

    pub fn is_empty(&self) -> bool {
        self.plate_groups.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct RawResults {
    processing_time_ms: f32,
    #[serde(default)]
    epoch_time: Option<u64>,
    #[serde(default)]
    img_width: Option<u32>,
    #[serde(default)]
    img_height: Option<u32>,
    #[serde(default)]
    results: Vec<RawPlate>,
}

#[derive(Debug, Deserialize)]
struct RawPlate {
    #[serde(default)]
    region: Option<String>,
    #[serde(default)]
    region_confidence: Option<f32>,
    #[serde(default)]
    candidates: Vec<RawCandidate>,
}

#[derive(Debug, Deserialize)]
struct RawCandidate {
    plate: String,
    confidence: f32,
    #[serde(default)]
    matches_template: i64,
}
