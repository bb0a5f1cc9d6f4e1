//! Engine backed by the OpenALPR command-line tool.
//!
//! Each recognition spawns `alpr -j ... -`, writes the image to its stdin and
//! parses the JSON it prints.

use super::{Engine, EngineConfig};
use crate::error::EngineError;
use crate::types::{PlateCandidate, PlateDetection, RecognitionResult};
use log::{debug, info};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

pub struct AlprEngine {
    binary: PathBuf,
    config: Option<EngineConfig>,
    top_n: usize,
    version: Option<String>,
}

impl AlprEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        AlprEngine {
            binary: binary.into(),
            config: None,
            top_n: 10,
            version: None,
        }
    }

    fn args(&self, config: &EngineConfig) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-j".into(),
            "-c".into(),
            config.region.clone().into(),
            "--config".into(),
            config.config_path.clone().into(),
            "-n".into(),
            self.top_n.to_string().into(),
        ];
        if let Some(pattern) = &config.default_region {
            args.push("-p".into());
            args.push(pattern.clone().into());
        }
        if config.detect_region {
            args.push("-d".into());
        }
        // read the image from stdin
        args.push("-".into());
        args
    }
}

impl Engine for AlprEngine {
    fn name(&self) -> &'static str {
        "alpr"
    }

    fn load(&mut self, config: &EngineConfig) -> Result<(), EngineError> {
        if !config.config_path.is_file() {
            return Err(EngineError::Internal(format!(
                "config file {:?} not found",
                config.config_path
            )));
        }
        if !config.runtime_data_path.is_dir() {
            return Err(EngineError::Internal(format!(
                "runtime data directory {:?} not found",
                config.runtime_data_path
            )));
        }
        let output = Command::new(&self.binary)
            .arg("--version")
            .output()
            .map_err(|e| EngineError::Internal(format!("unable to run {:?}: {}", self.binary, e)))?;
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!("Using {:?} ({})", self.binary, version);
        self.version = Some(version).filter(|v| !v.is_empty());
        self.config = Some(config.clone());
        Ok(())
    }

    fn set_top_n(&mut self, top_n: usize) -> Result<(), EngineError> {
        self.top_n = top_n;
        Ok(())
    }

    fn recognize(&mut self, image: &[u8]) -> Result<RecognitionResult, EngineError> {
        let config = self.config.as_ref().ok_or(EngineError::NotReady)?;
        let args = self.args(config);
        debug!("Running {:?} {:?}", self.binary, args);
        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| EngineError::Internal(format!("unable to spawn alpr: {}", e)))?;
        // stdin is closed at the end of this block so alpr sees EOF
        let written = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(image),
            None => Ok(()),
        };
        let output = child
            .wait_with_output()
            .map_err(|e| EngineError::Internal(format!("alpr did not finish: {}", e)))?;
        if !output.status.success() {
            return Err(EngineError::Internal(format!(
                "alpr exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        written.map_err(|e| EngineError::Internal(format!("unable to write image: {}", e)))?;
        parse_output(&output.stdout)
    }

    fn version(&self) -> Option<String> {
        self.version.clone()
    }

    fn unload(&mut self) {
        self.config = None;
    }
}

#[derive(Deserialize)]
struct AlprOutput {
    #[serde(default)]
    results: Vec<AlprPlate>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

#[derive(Deserialize)]
struct AlprPlate {
    #[serde(default)]
    coordinates: Value,
    #[serde(default)]
    candidates: Vec<AlprCandidate>,
}

#[derive(Deserialize)]
struct AlprCandidate {
    plate: String,
    confidence: f64,
}

fn parse_output(stdout: &[u8]) -> Result<RecognitionResult, EngineError> {
    let output: AlprOutput = serde_json::from_slice(stdout)
        .map_err(|e| EngineError::Internal(format!("unreadable alpr output: {}", e)))?;
    let detections = output
        .results
        .into_iter()
        .map(|plate| PlateDetection {
            bounding_region: plate.coordinates,
            candidates: plate
                .candidates
                .into_iter()
                .map(|c| PlateCandidate::new(c.plate, c.confidence))
                .collect(),
        })
        .collect();
    Ok(RecognitionResult {
        detections,
        processing_metadata: output.rest,
    })
}
