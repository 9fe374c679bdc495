//! Scripted engine used by unit tests

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{AlprEngine, EngineFactory, PlateCandidate, PlateGroup, RecognitionResult};
use crate::config::EngineConfig;
use crate::error::EngineError;

pub(crate) const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

/// Bytes that pass the image format sniff, followed by `payload`
pub(crate) fn fake_png(payload: &str) -> Vec<u8> {
    let mut bytes = PNG_MAGIC.to_vec();
    bytes.extend_from_slice(payload.as_bytes());
    bytes
}

/// Observations shared by every engine a factory creates
#[derive(Debug, Default)]
pub(crate) struct Probe {
    pub top_n: Mutex<Option<u32>>,
    pub default_region: Mutex<Option<String>>,
    pub created: AtomicUsize,
    pub unloads: AtomicUsize,
    pub calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

#[derive(Debug, Clone)]
pub(crate) enum Script {
    /// One plate group with these candidates
    Plates(Vec<(String, f32)>),
    /// One plate whose text is the payload after the PNG signature
    EchoPayload,
    /// Every call fails
    Fail(String),
    /// The first call across all engines panics, later calls echo
    PanicFirst,
}

pub(crate) struct ScriptedEngine {
    script: Script,
    delay: Duration,
    reject_region: Option<String>,
    probe: Arc<Probe>,
}

impl ScriptedEngine {
    pub fn with_plates(plates: &[(&str, f32)]) -> Self {
        Self {
            script: Script::Plates(
                plates
                    .iter()
                    .map(|(text, confidence)| (text.to_string(), *confidence))
                    .collect(),
            ),
            delay: Duration::ZERO,
            reject_region: None,
            probe: Arc::new(Probe::default()),
        }
    }
}

impl AlprEngine for ScriptedEngine {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn set_top_n(&mut self, top_n: u32) -> Result<(), EngineError> {
        *self.probe.top_n.lock() = Some(top_n);
        Ok(())
    }

    fn set_default_region(&mut self, region: &str) -> Result<(), EngineError> {
        if self.reject_region.as_deref() == Some(region) {
            return Err(EngineError::Rejected {
                setting: "default_region",
                value: region.to_string(),
            });
        }
        *self.probe.default_region.lock() = Some(region.to_string());
        Ok(())
    }

    fn recognize(&mut self, image: &[u8]) -> Result<RecognitionResult, EngineError> {
        let call = self.probe.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.probe.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        self.probe.in_flight.fetch_sub(1, Ordering::SeqCst);

        let elapsed = self.delay.as_secs_f32() * 1000.0;
        match &self.script {
            Script::Plates(plates) => {
                let candidates = plates
                    .iter()
                    .map(|(text, confidence)| PlateCandidate::new(text.clone(), *confidence))
                    .collect();
                Ok(RecognitionResult::new(vec![PlateGroup::new(candidates)], elapsed))
            }
            Script::Fail(message) => Err(EngineError::backend(message.clone())),
            Script::PanicFirst if call == 0 => panic!("scripted engine failure"),
            Script::EchoPayload | Script::PanicFirst => {
                let payload = &image[PNG_MAGIC.len().min(image.len())..];
                let text = String::from_utf8_lossy(payload).to_string();
                Ok(RecognitionResult::new(
                    vec![PlateGroup::new(vec![PlateCandidate::new(text, 88.0)])],
                    elapsed,
                ))
            }
        }
    }

    fn unload(&mut self) {
        self.probe.unloads.fetch_add(1, Ordering::SeqCst);
    }
}

pub(crate) struct ScriptedFactory {
    script: Script,
    delay: Duration,
    reject_region: Option<String>,
    fail_on_create: Option<usize>,
    probe: Arc<Probe>,
}

impl Default for ScriptedFactory {
    fn default() -> Self {
        Self {
            script: Script::EchoPayload,
            delay: Duration::ZERO,
            reject_region: None,
            fail_on_create: None,
            probe: Arc::new(Probe::default()),
        }
    }
}

impl ScriptedFactory {
    pub fn from_engine(engine: ScriptedEngine) -> Self {
        Self {
            script: engine.script,
            delay: engine.delay,
            reject_region: engine.reject_region,
            fail_on_create: None,
            probe: engine.probe,
        }
    }

    pub fn with_script(mut self, script: Script) -> Self {
        self.script = script;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn reject_region(mut self, region: &str) -> Self {
        self.reject_region = Some(region.to_string());
        self
    }

    /// Fail the `n`th engine construction (0-based)
    pub fn fail_on_create(mut self, n: usize) -> Self {
        self.fail_on_create = Some(n);
        self
    }

    pub fn probe(&self) -> Arc<Probe> {
        Arc::clone(&self.probe)
    }
}

impl EngineFactory for ScriptedFactory {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn create(&self, config: &EngineConfig) -> Result<Box<dyn AlprEngine>, EngineError> {
        let n = self.probe.created.fetch_add(1, Ordering::SeqCst);
        if self.fail_on_create == Some(n) {
            return Err(EngineError::Rejected {
                setting: "country_code",
                value: config.country_code.clone(),
            });
        }
        Ok(Box::new(ScriptedEngine {
            script: self.script.clone(),
            delay: self.delay,
            reject_region: self.reject_region.clone(),
            probe: Arc::clone(&self.probe),
        }))
    }
}
