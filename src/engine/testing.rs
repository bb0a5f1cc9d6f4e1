//! Scriptable engine for tests.

use super::{Engine, EngineConfig};
use crate::error::EngineError;
use crate::types::{PlateCandidate, PlateDetection, RecognitionResult};
use image::{DynamicImage, ImageFormat};
use serde_json::Value;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Clone)]
pub enum Behavior {
    Result(RecognitionResult),
    Fail(EngineError),
    Panic,
}

/// Shared view into what the stub engine saw.
#[derive(Clone, Default)]
pub struct Seen {
    pub loads: Arc<AtomicUsize>,
    pub calls: Arc<AtomicUsize>,
    pub unloads: Arc<AtomicUsize>,
    pub overlaps: Arc<AtomicUsize>,
    pub top_n_seen: Arc<Mutex<Vec<usize>>>,
    busy: Arc<AtomicBool>,
}

impl Seen {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub struct StubEngine {
    behavior: Behavior,
    delay: Duration,
    top_n: usize,
    top_n_error: Option<EngineError>,
    seen: Seen,
}

impl StubEngine {
    pub fn new(behavior: Behavior) -> (Self, Seen) {
        let seen = Seen::default();
        let engine = StubEngine {
            behavior,
            delay: Duration::from_millis(0),
            top_n: 0,
            top_n_error: None,
            seen: seen.clone(),
        };
        (engine, seen)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn rejecting_top_n(mut self, error: EngineError) -> Self {
        self.top_n_error = Some(error);
        self
    }
}

impl Engine for StubEngine {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn load(&mut self, _config: &EngineConfig) -> Result<(), EngineError> {
        self.seen.loads.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn set_top_n(&mut self, top_n: usize) -> Result<(), EngineError> {
        if let Some(error) = &self.top_n_error {
            return Err(error.clone());
        }
        self.top_n = top_n;
        Ok(())
    }

    fn recognize(&mut self, _image: &[u8]) -> Result<RecognitionResult, EngineError> {
        if self.seen.busy.swap(true, Ordering::SeqCst) {
            self.seen.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.seen.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.top_n_seen.lock().unwrap().push(self.top_n);
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.seen.busy.store(false, Ordering::SeqCst);
        match &self.behavior {
            Behavior::Result(result) => Ok(result.clone()),
            Behavior::Fail(error) => Err(error.clone()),
            Behavior::Panic => panic!("stub engine exploded"),
        }
    }

    fn version(&self) -> Option<String> {
        Some("stub-1.0".to_string())
    }

    fn unload(&mut self) {
        self.seen.unloads.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn us_config() -> EngineConfig {
    EngineConfig::new("us", "/etc/openalpr/openalpr.conf", "/usr/share/openalpr/runtime_data")
}

/// Two plates: five unordered candidates, then two.
pub fn two_plates() -> RecognitionResult {
    let plate = |candidates: &[(&str, f64)]| PlateDetection {
        bounding_region: Value::Null,
        candidates: candidates
            .iter()
            .map(|(text, confidence)| PlateCandidate::new(*text, *confidence))
            .collect(),
    };
    RecognitionResult {
        detections: vec![
            plate(&[
                ("7ABC12", 71.0),
                ("7ABC123", 93.5),
                ("7A8C123", 80.2),
                ("TABC123", 64.0),
                ("7ABCI23", 88.9),
            ]),
            plate(&[("XYZ99", 55.0), ("XYZ990", 77.0)]),
        ],
        processing_metadata: Default::default(),
    }
}

/// A small but real PNG.
pub fn png_bytes() -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::new_rgb8(8, 4)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}
