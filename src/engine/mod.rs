pub mod alpr;
#[cfg(test)]
pub mod testing;

use crate::error::EngineError;
use crate::types::RecognitionResult;
use std::path::PathBuf;

/// Process-wide engine settings, applied once by [`crate::recognizer::Recognizer::initialize`].
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Country or region code, e.g. "us" or "eu".
    pub region: String,
    pub config_path: PathBuf,
    pub runtime_data_path: PathBuf,
    /// Plate pattern hint (state/province), if any.
    pub default_region: Option<String>,
    pub detect_region: bool,
}

impl EngineConfig {
    pub fn new(
        region: impl Into<String>,
        config_path: impl Into<PathBuf>,
        runtime_data_path: impl Into<PathBuf>,
    ) -> Self {
        EngineConfig {
            region: region.into(),
            config_path: config_path.into(),
            runtime_data_path: runtime_data_path.into(),
            default_region: None,
            detect_region: false,
        }
    }
}

/// A license plate recognizer.
///
/// Implementations need not be thread-safe; the recognizer only ever calls
/// them from inside its own critical section. Returned candidates may be in
/// any order and any number; ranking and truncation happen in the adapter.
pub trait Engine: Send {
    fn name(&self) -> &'static str;

    /// Loads models and runtime data. May block for a long time.
    fn load(&mut self, config: &EngineConfig) -> Result<(), EngineError>;

    fn set_top_n(&mut self, top_n: usize) -> Result<(), EngineError>;

    fn recognize(&mut self, image: &[u8]) -> Result<RecognitionResult, EngineError>;

    fn version(&self) -> Option<String> {
        None
    }

    /// Releases whatever `load` acquired.
    fn unload(&mut self) {}
}
