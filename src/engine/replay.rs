//! Fixture replay engine
//!
//! Replays recorded engine responses instead of running recognition. The
//! runtime data directory holds one `<sha256 of image>.json` file per known
//! image, in the engine's JSON response format. Unknown images decode fine
//! but yield no plates.

use anyhow::Context;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

use super::{check_engine_paths, AlprEngine, EngineFactory, RecognitionResult};
use crate::config::EngineConfig;
use crate::error::EngineError;

/// Replay engine bound to one fixtures directory
pub struct ReplayEngine {
    fixtures_dir: PathBuf,
    top_n: u32,
    default_region: Option<String>,
}

impl ReplayEngine {
    /// Create a replay engine from an engine configuration
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        check_engine_paths(config)?;

        if !is_code(&config.country_code) {
            return Err(EngineError::Rejected {
                setting: "country_code",
                value: config.country_code.clone(),
            });
        }

        info!(
            "Replay engine using fixtures from {:?}",
            config.runtime_data_path
        );

        Ok(Self {
            fixtures_dir: config.runtime_data_path.clone(),
            top_n: config.top_n,
            default_region: None,
        })
    }

    /// Fixture file name for an image
    pub fn fixture_name(image: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(image);
        format!("{:x}.json", hasher.finalize())
    }

    /// Record `response` as the fixture for `image` in `dir`
    pub fn record_fixture(dir: &Path, image: &[u8], response: &str) -> anyhow::Result<PathBuf> {
        let path = dir.join(Self::fixture_name(image));
        std::fs::write(&path, response)
            .with_context(|| format!("Failed to write fixture {:?}", path))?;
        Ok(path)
    }

    pub fn default_region(&self) -> Option<&str> {
        self.default_region.as_deref()
    }
}

impl AlprEngine for ReplayEngine {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn set_top_n(&mut self, top_n: u32) -> Result<(), EngineError> {
        self.top_n = top_n;
        Ok(())
    }

    fn set_default_region(&mut self, region: &str) -> Result<(), EngineError> {
        if !is_code(region) {
            return Err(EngineError::Rejected {
                setting: "default_region",
                value: region.to_string(),
            });
        }
        self.default_region = Some(region.to_string());
        Ok(())
    }

    fn recognize(&mut self, image: &[u8]) -> Result<RecognitionResult, EngineError> {
        let start = Instant::now();

        let decoded = image::load_from_memory(image)
            .map_err(|e| EngineError::backend(format!("could not decode image: {e}")))?;
        let size = (decoded.width(), decoded.height());

        let fixture = self.fixtures_dir.join(Self::fixture_name(image));
        let mut result = if fixture.is_file() {
            let json = std::fs::read_to_string(&fixture).map_err(|e| {
                EngineError::backend(format!("could not read fixture {:?}: {e}", fixture))
            })?;
            RecognitionResult::from_json(&json)?
        } else {
            debug!("No fixture for {}x{} image, reporting no plates", size.0, size.1);
            RecognitionResult::empty(start.elapsed().as_secs_f32() * 1000.0)
        };

        result.truncate_to(self.top_n);
        result.image_size.get_or_insert(size);
        Ok(result)
    }
}

/// Factory for [`ReplayEngine`]
#[derive(Debug, Default, Clone, Copy)]
pub struct ReplayEngineFactory;

impl EngineFactory for ReplayEngineFactory {
    fn name(&self) -> &'static str {
        "replay"
    }

    fn create(&self, config: &EngineConfig) -> Result<Box<dyn AlprEngine>, EngineError> {
        Ok(Box::new(ReplayEngine::new(config)?))
    }
}

/// Country and region codes are short alphanumeric tokens
fn is_code(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 16
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
