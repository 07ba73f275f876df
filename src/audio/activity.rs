//! Device-wide "audio active" state shared by both pipelines.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::config::ConfigStore;
use crate::gui_bridge::StatusReporter;

const IDLE: u8 = 0;
const PLAYING: u8 = 1;
const RECORDING: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pipeline {
    Playback,
    Capture,
}

impl Pipeline {
    fn tag(self) -> u8 {
        match self {
            Pipeline::Playback => PLAYING,
            Pipeline::Capture => RECORDING,
        }
    }
}

/// At most one session, of either pipeline, is active at any instant.
///
/// Claiming is a single compare-and-swap so a play request and a trigger
/// press racing each other cannot both win.
#[derive(Debug, Default)]
pub struct Activity {
    state: AtomicU8,
}

impl Activity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the device for `pipeline`. Fails if any session is active.
    pub fn try_begin(&self, pipeline: Pipeline) -> bool {
        self.state
            .compare_exchange(IDLE, pipeline.tag(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Release a claim made by `pipeline`; a no-op if it does not hold one.
    pub fn end(&self, pipeline: Pipeline) {
        let _ = self
            .state
            .compare_exchange(pipeline.tag(), IDLE, Ordering::AcqRel, Ordering::Acquire);
    }

    pub fn is_playing(&self) -> bool {
        self.state.load(Ordering::Acquire) == PLAYING
    }

    pub fn is_recording(&self) -> bool {
        self.state.load(Ordering::Acquire) == RECORDING
    }

    /// True when a pipeline other than `me` holds the device.
    pub fn is_other_pipeline_active(&self, me: Pipeline) -> bool {
        let s = self.state.load(Ordering::Acquire);
        s != IDLE && s != me.tag()
    }
}

/// Collaborators both engines consult.
#[derive(Clone)]
pub struct EngineContext {
    pub activity: Arc<Activity>,
    pub display: Arc<dyn StatusReporter>,
    pub config: ConfigStore,
}
