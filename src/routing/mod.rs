//! Work units and outcome routing
//!
//! A work unit enters the stage, and leaves it on exactly one of two
//! relationships. The unit itself is never modified.

use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;
use uuid::Uuid;

use crate::engine::RecognitionResult;
use crate::error::StageError;

/// One unit of inbound image data
#[derive(Debug, Clone)]
pub struct WorkUnit {
    id: Uuid,
    content: Arc<[u8]>,
    attributes: BTreeMap<String, String>,
}

impl WorkUnit {
    /// Create a unit with a fresh identity
    pub fn new(content: impl Into<Arc<[u8]>>) -> Self {
        Self::with_id(Uuid::new_v4(), content)
    }

    /// Create a unit with a host-supplied identity
    pub fn with_id(id: Uuid, content: impl Into<Arc<[u8]>>) -> Self {
        Self {
            id,
            content: content.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Attach a host attribute (carried untouched through the stage)
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Shared handle to the content, without copying the bytes
    pub fn shared_content(&self) -> Arc<[u8]> {
        Arc::clone(&self.content)
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// Named outbound path of the stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relationship {
    Success,
    Failure,
}

impl Relationship {
    pub const ALL: [Relationship; 2] = [Relationship::Success, Relationship::Failure];

    pub fn name(&self) -> &'static str {
        match self {
            Relationship::Success => "success",
            Relationship::Failure => "failure",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Relationship::Success => {
                "image was submitted to the ALPR engine and recognition completed"
            }
            Relationship::Failure => "problem during execution",
        }
    }
}

impl std::fmt::Display for Relationship {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of processing one unit
#[derive(Debug)]
pub struct Outcome {
    /// The unit, unchanged
    pub unit: WorkUnit,
    /// Where the unit goes next
    pub relationship: Relationship,
    /// Engine result on success
    pub result: Option<RecognitionResult>,
    /// Cause on failure
    pub error: Option<StageError>,
    /// Wall time spent in the stage
    pub elapsed: Duration,
}

impl Outcome {
    pub fn success(unit: WorkUnit, result: RecognitionResult, elapsed: Duration) -> Self {
        Self {
            unit,
            relationship: Relationship::Success,
            result: Some(result),
            error: None,
            elapsed,
        }
    }

    pub fn failure(unit: WorkUnit, error: StageError, elapsed: Duration) -> Self {
        Self {
            unit,
            relationship: Relationship::Failure,
            result: None,
            error: Some(error),
            elapsed,
        }
    }

    pub fn is_success(&self) -> bool {
        self.relationship == Relationship::Success
    }

    /// Hand the unit to `router`, consuming the outcome
    pub fn route(self, router: &dyn Router) -> Relationship {
        let relationship = self.relationship;
        router.transfer(self.unit, relationship);
        relationship
    }
}

/// Seam with the host runtime: receives every routed unit
pub trait Router: Send + Sync {
    fn transfer(&self, unit: WorkUnit, relationship: Relationship);
}

/// Router that forwards units to one channel per relationship
#[derive(Debug, Clone)]
pub struct ChannelRouter {
    success: Sender<WorkUnit>,
    failure: Sender<WorkUnit>,
}

/// Receiving ends of a [`ChannelRouter`]
#[derive(Debug)]
pub struct RoutedReceivers {
    pub success: Receiver<WorkUnit>,
    pub failure: Receiver<WorkUnit>,
}

impl ChannelRouter {
    pub fn unbounded() -> (Self, RoutedReceivers) {
        let (success_tx, success_rx) = unbounded();
        let (failure_tx, failure_rx) = unbounded();
        (
            Self {
                success: success_tx,
                failure: failure_tx,
            },
            RoutedReceivers {
                success: success_rx,
                failure: failure_rx,
            },
        )
    }
}

impl Router for ChannelRouter {
    fn transfer(&self, unit: WorkUnit, relationship: Relationship) {
        let sender = match relationship {
            Relationship::Success => &self.success,
            Relationship::Failure => &self.failure,
        };
        if let Err(e) = sender.send(unit) {
            error!(
                "Unit {} could not be routed to '{}': downstream disconnected",
                e.0.id(),
                relationship
            );
        }
    }
}
