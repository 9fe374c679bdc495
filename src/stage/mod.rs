//! Recognition Stage
//!
//! Builds the engine handles once per activation, runs every work unit
//! through recognition, and classifies it as `success` or `failure`.
//! Recognized plates are reported through the log only; the unit itself is
//! forwarded unchanged.

mod deadline;
mod pool;

use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, info_span};

use crate::config::StageConfig;
use crate::engine::{EngineFactory, RecognitionResult};
use crate::error::{EngineError, ImageOrigin, StageError};
use crate::routing::{Outcome, Relationship, Router, WorkUnit};

use self::deadline::{recognize_guarded, recognize_with_deadline};
use self::pool::EnginePool;

/// Configured recognition stage; call [`RecognitionStage::prepare`] once per activation
pub struct RecognitionStage {
    config: StageConfig,
    factory: Arc<dyn EngineFactory>,
}

impl RecognitionStage {
    /// Validate the configuration and bind it to an engine backend
    pub fn new(config: StageConfig, factory: Arc<dyn EngineFactory>) -> Result<Self, StageError> {
        if let Err(err) = config.validate() {
            error!("Error in ALPR stage configuration: {}", err);
            return Err(err);
        }
        Ok(Self { config, factory })
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    /// Construct the engine handles for one activation
    pub fn prepare(&self) -> Result<Activation, StageError> {
        info!(
            "Preparing activation: {} {} engine handle(s), topN={}, default region '{}'",
            self.config.pool_size,
            self.factory.name(),
            self.config.engine.top_n,
            self.config.engine.default_region
        );

        let pool = EnginePool::open(
            Arc::clone(&self.factory),
            self.config.engine.clone(),
            self.config.pool_size,
        )
        .map_err(|source| {
            let err = StageError::EngineInit { source };
            error!("Error in ALPR stage: {}", err);
            err
        })?;

        Ok(Activation {
            pool,
            image_override: self.config.image_source_override.clone(),
            deadline: self.config.recognize_timeout_ms.map(Duration::from_millis),
            stats: Mutex::new(ActivationStats::default()),
            started: Instant::now(),
            released: false,
        })
    }
}

/// Counters kept over one activation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActivationStats {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub plates_found: u64,
}

impl ActivationStats {
    fn record(&mut self, outcome: &Outcome) {
        self.processed += 1;
        match outcome.relationship {
            Relationship::Success => self.succeeded += 1,
            Relationship::Failure => self.failed += 1,
        }
        if let Some(result) = &outcome.result {
            self.plates_found += result.plate_groups.len() as u64;
        }
        if matches!(
            outcome.error,
            Some(StageError::Recognition {
                source: EngineError::TimedOut(_)
            })
        ) {
            self.timed_out += 1;
        }
    }
}

/// One scheduling period with live engine handles.
///
/// `process` takes `&self`, so an activation can be shared across threads.
/// Handles are released by [`Activation::release`], or on drop.
pub struct Activation {
    pool: Arc<EnginePool>,
    image_override: Option<PathBuf>,
    deadline: Option<Duration>,
    stats: Mutex<ActivationStats>,
    started: Instant,
    released: bool,
}

impl Activation {
    /// Recognize one unit and decide its relationship. Never panics on
    /// engine or input failures; those become a `failure` outcome.
    pub fn process(&self, unit: WorkUnit) -> Outcome {
        let span = info_span!("process", unit = %unit.id());
        let _enter = span.enter();
        let start = Instant::now();

        let outcome = match self.recognize_unit(&unit) {
            Ok(result) => {
                log_plates(&result);
                Outcome::success(unit, result, start.elapsed())
            }
            Err(err) => {
                error!(kind = ?err.kind(), "Error in ALPR stage: {} ({:?})", err, err);
                Outcome::failure(unit, err, start.elapsed())
            }
        };

        debug!(
            "Unit routed to '{}' after {:?}",
            outcome.relationship, outcome.elapsed
        );
        self.stats.lock().record(&outcome);
        outcome
    }

    /// Process a unit and hand it to `router` exactly once
    pub fn process_and_route(&self, unit: WorkUnit, router: &dyn Router) -> Relationship {
        self.process(unit).route(router)
    }

    pub fn stats(&self) -> ActivationStats {
        *self.stats.lock()
    }

    /// Release every engine handle and return the activation counters
    pub fn release(mut self) -> ActivationStats {
        self.shutdown()
    }

    fn shutdown(&mut self) -> ActivationStats {
        self.released = true;
        let released = self.pool.drain();
        let stats = self.stats();
        info!(
            "Released {} ALPR engine handle(s) after {:?}: {} processed, {} succeeded, {} failed ({} timed out), {} plates",
            released,
            self.started.elapsed(),
            stats.processed,
            stats.succeeded,
            stats.failed,
            stats.timed_out,
            stats.plates_found
        );
        stats
    }

    fn recognize_unit(&self, unit: &WorkUnit) -> Result<RecognitionResult, StageError> {
        let (image, origin) = self.read_image(unit)?;
        check_image(&image, &origin)?;

        // The deadline covers waiting for a free handle as well as the call
        let deadline = self.deadline.map(|budget| (Instant::now() + budget, budget));
        let mut handle = self
            .pool
            .checkout_until(deadline)
            .map_err(|source| StageError::Recognition { source })?;
        debug!("Submitting {} bytes to ALPR engine #{}", image.len(), handle.id());

        let result = match deadline {
            Some((at, budget)) => recognize_with_deadline(handle, image, at, budget),
            None => recognize_guarded(&mut handle, &image),
        };
        result.map_err(|source| StageError::Recognition { source })
    }

    fn read_image(&self, unit: &WorkUnit) -> Result<(Arc<[u8]>, ImageOrigin), StageError> {
        match &self.image_override {
            Some(path) => {
                let origin = ImageOrigin::Override(path.clone());
                let bytes = std::fs::read(path)
                    .map_err(|e| StageError::image_read(origin.clone(), e.to_string()))?;
                Ok((Arc::from(bytes), origin))
            }
            None => Ok((unit.shared_content(), ImageOrigin::WorkUnit)),
        }
    }
}

impl Drop for Activation {
    fn drop(&mut self) {
        if !self.released {
            self.shutdown();
        }
    }
}

/// Reject buffers that cannot be an encoded image before they reach the engine
fn check_image(image: &[u8], origin: &ImageOrigin) -> Result<(), StageError> {
    if image.is_empty() {
        return Err(StageError::image_read(origin.clone(), "image is empty"));
    }
    image::guess_format(image)
        .map_err(|_| StageError::image_read(origin.clone(), "unrecognized image format"))?;
    Ok(())
}

fn log_plates(result: &RecognitionResult) {
    if result.candidates().next().is_none() {
        info!(
            "No license plates found in {:.1} ms",
            result.total_processing_time_ms
        );
        return;
    }

    for group in &result.plate_groups {
        for plate in &group.candidates {
            info!(
                "Found license plate '{}' with confidence {:.1}% in {:.1} ms",
                plate.characters, plate.confidence, result.total_processing_time_ms
            );
        }
    }
}
