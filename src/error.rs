//! Error taxonomy shared by every stage of a test run

use std::fmt;
use std::path::PathBuf;

/// Everything that can stop a test.
///
/// All variants are test-scoped: the orchestrator catches them at the test
/// boundary, reports them, and moves on to the next test.
#[derive(Debug)]
pub enum HarnessError {
    /// Malformed step or test record
    Config(String),
    /// Step names an action nobody registered
    UnknownAction(String),
    /// Step omits a parameter its action requires
    MissingParam { action: String, param: String },
    /// Parameter present but of the wrong type or out of range
    InvalidParam {
        action: String,
        param: String,
        reason: String,
    },
    /// Modifier outside {Shift, Control, Alt}
    InvalidModifier(String),
    /// Cursor target not a pair of floats in [0, 1]
    InvalidPosition(String),
    /// `key-up` for a key that is not down
    UnpressedKeyRelease(String),
    /// Capture and ground truth differ in dimensions
    ShapeMismatch {
        capture: (u32, u32),
        truth: (u32, u32),
        artifacts: PathBuf,
    },
    /// Divergence score above the allowed bound
    ThresholdExceeded {
        method: String,
        diff: f64,
        threshold: f64,
        artifacts: PathBuf,
    },
    /// Explicit `fail` action or a harness-level failure
    Failed(String),
    /// `poll_event` called with nothing queued
    EmptyEventQueue,
    /// Render loop reported a frame older than the previous tick
    FrameRegression { previous: u64, current: u64 },
    /// The program under test gave up on its own
    Program(String),
    Io(std::io::Error),
    Image(image::ImageError),
    Database(rusqlite::Error),
}

impl fmt::Display for HarnessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HarnessError::Config(msg) => write!(f, "config error: {}", msg),
            HarnessError::UnknownAction(name) => write!(f, "unknown action '{}'", name),
            HarnessError::MissingParam { action, param } => {
                write!(f, "action '{}' requires parameter '{}'", action, param)
            }
            HarnessError::InvalidParam {
                action,
                param,
                reason,
            } => write!(
                f,
                "action '{}' got invalid '{}': {}",
                action, param, reason
            ),
            HarnessError::InvalidModifier(m) => {
                write!(f, "invalid modifier '{}' (expected Shift, Control or Alt)", m)
            }
            HarnessError::InvalidPosition(msg) => write!(f, "invalid position: {}", msg),
            HarnessError::UnpressedKeyRelease(key) => {
                write!(f, "key '{}' released while not pressed", key)
            }
            HarnessError::ShapeMismatch {
                capture,
                truth,
                artifacts,
            } => write!(
                f,
                "capture-and-compare shape mismatch: capture {}x{}, truth {}x{} (artifacts in {})",
                capture.0,
                capture.1,
                truth.0,
                truth.1,
                artifacts.display()
            ),
            HarnessError::ThresholdExceeded {
                method,
                diff,
                threshold,
                artifacts,
            } => write!(
                f,
                "capture-and-compare failed! {} diff({}) > threshold({}) (artifacts in {})",
                method,
                diff,
                threshold,
                artifacts.display()
            ),
            HarnessError::Failed(msg) => write!(f, "failed: {}", msg),
            HarnessError::EmptyEventQueue => write!(f, "poll_event called with an empty event queue"),
            HarnessError::FrameRegression { previous, current } => write!(
                f,
                "frame counter went backwards: {} after {}",
                current, previous
            ),
            HarnessError::Program(msg) => write!(f, "program error: {}", msg),
            HarnessError::Io(e) => write!(f, "io error: {}", e),
            HarnessError::Image(e) => write!(f, "image error: {}", e),
            HarnessError::Database(e) => write!(f, "database error: {}", e),
        }
    }
}

impl std::error::Error for HarnessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HarnessError::Io(e) => Some(e),
            HarnessError::Image(e) => Some(e),
            HarnessError::Database(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for HarnessError {
    fn from(e: std::io::Error) -> Self {
        HarnessError::Io(e)
    }
}

impl From<image::ImageError> for HarnessError {
    fn from(e: image::ImageError) -> Self {
        HarnessError::Image(e)
    }
}

impl From<rusqlite::Error> for HarnessError {
    fn from(e: rusqlite::Error) -> Self {
        HarnessError::Database(e)
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;
