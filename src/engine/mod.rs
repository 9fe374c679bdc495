//! ALPR Engine Layer
//!
//! The recognition engine itself is opaque. Backends implement [`AlprEngine`]
//! and are constructed through an [`EngineFactory`]:
//! - libopenalpr through its C API (feature `engine-openalpr`)
//! - a fixture replay engine for benches and smoke runs

#[cfg(feature = "engine-openalpr")]
pub mod openalpr;
pub mod replay;
pub mod result;

#[cfg(test)]
pub(crate) mod testing;

#[cfg(feature = "engine-openalpr")]
pub use openalpr::{OpenAlprEngine, OpenAlprFactory};
pub use replay::{ReplayEngine, ReplayEngineFactory};
pub use result::{PlateCandidate, PlateGroup, RecognitionResult};

use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;

/// Common interface for all ALPR engines.
///
/// An engine instance is never used by two threads at once; the stage
/// guarantees exclusive access, so implementations need `Send` but not `Sync`.
pub trait AlprEngine: Send {
    fn name(&self) -> &'static str;

    fn set_top_n(&mut self, top_n: u32) -> Result<(), EngineError>;

    fn set_default_region(&mut self, region: &str) -> Result<(), EngineError>;

    /// Recognize plates in an encoded image (JPEG, PNG, ...)
    fn recognize(&mut self, image: &[u8]) -> Result<RecognitionResult, EngineError>;

    /// Free everything the engine holds. Called exactly once.
    fn unload(&mut self) {}
}

/// Builds engine instances bound to one configuration
pub trait EngineFactory: Send + Sync {
    fn name(&self) -> &'static str;

    fn create(&self, config: &EngineConfig) -> Result<Box<dyn AlprEngine>, EngineError>;
}

impl<F> EngineFactory for F
where
    F: Fn(&EngineConfig) -> Result<Box<dyn AlprEngine>, EngineError> + Send + Sync,
{
    fn name(&self) -> &'static str {
        "custom"
    }

    fn create(&self, config: &EngineConfig) -> Result<Box<dyn AlprEngine>, EngineError> {
        self(config)
    }
}

/// Verify the engine configuration file and runtime data directory exist
pub fn check_engine_paths(config: &EngineConfig) -> Result<(), EngineError> {
    if !config.config_path.is_file() {
        return Err(EngineError::ConfigFileMissing(config.config_path.clone()));
    }
    if !config.runtime_data_path.is_dir() {
        return Err(EngineError::RuntimeDataMissing(
            config.runtime_data_path.clone(),
        ));
    }
    Ok(())
}

/// Owned engine instance configured for one activation.
///
/// Releasing consumes the handle, so it cannot be used afterwards. A handle
/// that is dropped without [`EngineHandle::release`] is released on drop.
pub struct EngineHandle {
    engine: Option<Box<dyn AlprEngine>>,
    id: usize,
    top_n: u32,
    poisoned: bool,
}

impl EngineHandle {
    /// Create an engine and apply `top_n` and the default region
    pub fn open(
        factory: &dyn EngineFactory,
        config: &EngineConfig,
        id: usize,
    ) -> Result<Self, EngineError> {
        info!(
            "Creating {} ALPR engine #{} for country '{}'",
            factory.name(),
            id,
            config.country_code
        );

        let engine = factory.create(config)?;
        let mut handle = Self {
            engine: Some(engine),
            id,
            top_n: config.top_n,
            poisoned: false,
        };

        // The handle unloads the engine if either setting is refused
        if let Some(engine) = handle.engine.as_mut() {
            engine.set_top_n(config.top_n)?;
            engine.set_default_region(&config.default_region)?;
        }

        debug!(
            "ALPR engine #{} ready (topN={}, default region '{}')",
            id, config.top_n, config.default_region
        );
        Ok(handle)
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Run recognition and check the result before it is reported
    pub fn recognize(&mut self, image: &[u8]) -> Result<RecognitionResult, EngineError> {
        let engine = self
            .engine
            .as_mut()
            .ok_or_else(|| EngineError::backend("engine handle has been released"))?;

        let mut result = engine.recognize(image)?;
        result.validate()?;

        let removed = result.truncate_to(self.top_n);
        if removed > 0 {
            warn!(
                "Engine #{} returned {} candidates beyond topN={}; dropped them",
                self.id, removed, self.top_n
            );
        }

        Ok(result)
    }

    /// Mark the engine state as untrustworthy (e.g. after a panic)
    pub fn poison(&mut self) {
        self.poisoned = true;
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Release all engine resources
    pub fn release(mut self) {
        self.unload();
    }

    fn unload(&mut self) {
        if let Some(mut engine) = self.engine.take() {
            debug!("Releasing {} ALPR engine #{}", engine.name(), self.id);
            engine.unload();
        }
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.unload();
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("id", &self.id)
            .field("engine", &self.engine.as_ref().map(|e| e.name()))
            .field("top_n", &self.top_n)
            .field("poisoned", &self.poisoned)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{ScriptedEngine, ScriptedFactory};
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_open_applies_settings() {
        let factory = ScriptedFactory::default();
        let mut config = EngineConfig::default();
        config.top_n = 5;
        config.default_region = "wa".to_string();

        let handle = EngineHandle::open(&factory, &config, 0).unwrap();
        assert_eq!(handle.id(), 0);

        let probe = factory.probe();
        assert_eq!(*probe.top_n.lock(), Some(5));
        assert_eq!(probe.default_region.lock().as_deref(), Some("wa"));
        drop(handle);
    }

    #[test]
    fn test_release_unloads_exactly_once() {
        let factory = ScriptedFactory::default();
        let handle = EngineHandle::open(&factory, &EngineConfig::default(), 0).unwrap();
        let probe = factory.probe();

        handle.release();
        assert_eq!(probe.unloads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_unloads_unreleased_handle() {
        let factory = ScriptedFactory::default();
        {
            let _handle = EngineHandle::open(&factory, &EngineConfig::default(), 0).unwrap();
        }
        assert_eq!(factory.probe().unloads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_rejected_region_unloads_engine() {
        let factory = ScriptedFactory::default().reject_region("zz");
        let mut config = EngineConfig::default();
        config.default_region = "zz".to_string();

        let err = EngineHandle::open(&factory, &config, 0).unwrap_err();
        assert!(matches!(err, EngineError::Rejected { setting: "default_region", .. }));
        assert_eq!(factory.probe().unloads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_recognize_enforces_top_n() {
        let engine = ScriptedEngine::with_plates(&[("ABC123", 90.0), ("ABC12B", 80.0), ("A8C123", 70.0)]);
        let factory = ScriptedFactory::from_engine(engine);
        let mut config = EngineConfig::default();
        config.top_n = 2;

        let mut handle = EngineHandle::open(&factory, &config, 0).unwrap();
        let result = handle.recognize(b"image").unwrap();
        assert!(result.plate_groups.iter().all(|g| g.candidates.len() <= 2));
        assert_eq!(result.candidates().count(), 2);
    }

    #[test]
    fn test_recognize_rejects_out_of_range_confidence() {
        let engine = ScriptedEngine::with_plates(&[("ABC123", 130.0)]);
        let factory = ScriptedFactory::from_engine(engine);

        let mut handle = EngineHandle::open(&factory, &EngineConfig::default(), 0).unwrap();
        let err = handle.recognize(b"image").unwrap_err();
        assert!(matches!(err, EngineError::MalformedResult(_)));
    }

    #[test]
    fn test_closure_factory() {
        let factory = |_: &EngineConfig| -> Result<Box<dyn AlprEngine>, EngineError> {
            Err(EngineError::Rejected {
                setting: "country_code",
                value: "xx".to_string(),
            })
        };
        assert_eq!(EngineFactory::name(&factory), "custom");
        assert!(EngineHandle::open(&factory, &EngineConfig::default(), 0).is_err());
    }

    #[test]
    fn test_check_engine_paths() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("openalpr.conf");
        std::fs::write(&conf, "[common]\n").unwrap();

        let mut config = EngineConfig::default();
        config.config_path = conf.clone();
        config.runtime_data_path = dir.path().to_path_buf();
        assert!(check_engine_paths(&config).is_ok());

        config.config_path = dir.path().join("missing.conf");
        assert!(matches!(
            check_engine_paths(&config),
            Err(EngineError::ConfigFileMissing(_))
        ));

        config.config_path = conf;
        config.runtime_data_path = dir.path().join("missing");
        assert!(matches!(
            check_engine_paths(&config),
            Err(EngineError::RuntimeDataMissing(_))
        ));
    }
}
