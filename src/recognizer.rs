//! Recognition adapter: wraps one [`Engine`] behind a mutex and exposes
//! recognition as a stateless call over process-wide settings.

use crate::engine::{Engine, EngineConfig};
use crate::error::EngineError;
use crate::types::RecognitionResult;
use image::ImageReader;
use log::{error, info, warn};
use serde::Serialize;
use std::io::Cursor;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

const INITIAL_TOP_N: usize = 10;

struct Slot {
    engine: Box<dyn Engine>,
    config: Option<EngineConfig>,
    /// Top-N last pushed into the engine, so it is only re-set on change.
    applied_top_n: Option<usize>,
}

/// What `status` reports, kept outside the engine lock so it never waits on
/// a running recognition.
#[derive(Clone)]
struct Loaded {
    region: String,
    version: Option<String>,
}

pub struct Recognizer {
    slot: Mutex<Slot>,
    engine_name: &'static str,
    loaded: RwLock<Option<Loaded>>,
    top_n: AtomicUsize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub loaded: bool,
    pub engine: &'static str,
    pub version: Option<String>,
    pub region: Option<String>,
    pub top_n: usize,
}

impl Recognizer {
    pub fn new(engine: Box<dyn Engine>) -> Self {
        Recognizer {
            engine_name: engine.name(),
            loaded: RwLock::new(None),
            slot: Mutex::new(Slot {
                engine,
                config: None,
                applied_top_n: None,
            }),
            top_n: AtomicUsize::new(INITIAL_TOP_N),
        }
    }

    /// Loads the engine. A second call while loaded fails with
    /// `AlreadyInitialized`; after [`Recognizer::shutdown`] it may be called again.
    pub fn initialize(&self, config: EngineConfig) -> Result<(), EngineError> {
        if config.region.trim().is_empty() {
            return Err(EngineError::InvalidArgument(
                "region must not be empty".to_string(),
            ));
        }
        let mut slot = self.lock();
        if slot.config.is_some() {
            return Err(EngineError::AlreadyInitialized);
        }
        info!(
            "Loading {} engine for region '{}'",
            slot.engine.name(),
            config.region
        );
        guarded(|| slot.engine.load(&config))?;
        *self.loaded.write().unwrap_or_else(PoisonError::into_inner) = Some(Loaded {
            region: config.region.clone(),
            version: slot.engine.version(),
        });
        slot.config = Some(config);
        slot.applied_top_n = None;
        Ok(())
    }

    /// Sets the global top-N for calls issued from now on.
    pub fn set_top_n(&self, n: usize) -> Result<(), EngineError> {
        if n < 1 {
            return Err(EngineError::InvalidArgument(format!(
                "top-N must be at least 1, got {}",
                n
            )));
        }
        self.top_n.store(n, Ordering::SeqCst);
        info!("Top-N set to {}", n);
        Ok(())
    }

    pub fn top_n(&self) -> usize {
        self.top_n.load(Ordering::SeqCst)
    }

    /// Recognizes plates in `payload`. Blocks for the length of the engine
    /// call; concurrent callers are serialized.
    ///
    /// `top_n` overrides the global setting for this call only.
    pub fn recognize(
        &self,
        payload: &[u8],
        top_n: Option<usize>,
    ) -> Result<RecognitionResult, EngineError> {
        self.recognize_within(payload, top_n, None)
    }

    /// Like [`Recognizer::recognize`], but gives up without calling the
    /// engine once `deadline` has passed.
    ///
    /// Top-N is fixed when the call is issued; the image is decoded before
    /// the call queues for the engine.
    pub fn recognize_within(
        &self,
        payload: &[u8],
        top_n: Option<usize>,
        deadline: Option<Deadline>,
    ) -> Result<RecognitionResult, EngineError> {
        if !self.is_loaded() {
            return Err(EngineError::NotReady);
        }
        let top_n = match top_n {
            Some(0) => {
                return Err(EngineError::InvalidArgument(
                    "top-N must be at least 1".to_string(),
                ))
            }
            Some(n) => n,
            None => self.top_n(),
        };
        check_image(payload)?;
        check_deadline(deadline)?;

        let mut slot = self.lock();
        if slot.config.is_none() {
            return Err(EngineError::NotReady);
        }
        check_deadline(deadline)?;
        if slot.applied_top_n != Some(top_n) {
            guarded(|| slot.engine.set_top_n(top_n))?;
            slot.applied_top_n = Some(top_n);
        }
        let mut result = guarded(|| slot.engine.recognize(payload))?;
        drop(slot);
        result.rank(top_n);
        Ok(result)
    }

    /// Releases the engine. Waits for an in-flight call to finish first.
    pub fn shutdown(&self) {
        let mut slot = self.lock();
        *self.loaded.write().unwrap_or_else(PoisonError::into_inner) = None;
        if slot.config.take().is_some() {
            info!("Unloading {} engine", slot.engine.name());
            if guarded(|| {
                slot.engine.unload();
                Ok(())
            })
            .is_err()
            {
                warn!("Engine failed while unloading");
            }
        }
    }

    pub fn status(&self) -> Status {
        let loaded = self
            .loaded
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        Status {
            loaded: loaded.is_some(),
            engine: self.engine_name,
            version: loaded.as_ref().and_then(|l| l.version.clone()),
            region: loaded.map(|l| l.region),
            top_n: self.top_n(),
        }
    }

    fn is_loaded(&self) -> bool {
        self.loaded
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        // engine panics are caught inside the lock, so poisoning only means a
        // bug in this module; the slot itself is still consistent
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Point in time after which a queued recognition is no longer wanted.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Deadline {
            at: Instant::now() + budget,
            budget,
        }
    }

    fn expired(&self) -> bool {
        Instant::now() >= self.at
    }
}

fn check_deadline(deadline: Option<Deadline>) -> Result<(), EngineError> {
    match deadline {
        Some(deadline) if deadline.expired() => Err(EngineError::Timeout(deadline.budget)),
        _ => Ok(()),
    }
}

/// Runs an engine call, turning a panic into `EngineInternal`.
fn guarded<T>(f: impl FnOnce() -> Result<T, EngineError>) -> Result<T, EngineError> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(cause) => {
            let message = cause
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| cause.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!("Recognition engine panicked: {}", message);
            Err(EngineError::Internal(format!("engine panicked: {}", message)))
        }
    }
}

/// Checks that `payload` decodes as an image with at least one pixel.
fn check_image(payload: &[u8]) -> Result<(), EngineError> {
    if payload.is_empty() {
        return Err(EngineError::InvalidPayload("empty image".to_string()));
    }
    let reader = ImageReader::new(Cursor::new(payload))
        .with_guessed_format()
        .map_err(|e| EngineError::InvalidPayload(e.to_string()))?;
    if reader.format().is_none() {
        return Err(EngineError::InvalidPayload(
            "unrecognized image format".to_string(),
        ));
    }
    match reader.decode() {
        Ok(image) if image.width() > 0 && image.height() > 0 => Ok(()),
        Ok(_) => Err(EngineError::InvalidPayload("image has no pixels".to_string())),
        Err(e) => Err(EngineError::InvalidPayload(e.to_string())),
    }
}
