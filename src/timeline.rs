//! Test-definition documents (TOML)
//!
//! A timeline document holds an array of `[[test]]` tables:
//!
//! ```toml
//! [[test]]
//! path = "paint"
//! args = ["--size", "64"]
//! machine = ["x86_64", "aarch64"]
//! steps = [
//!     { action = "key-down", frame = 0, key = "a" },
//!     { action = "key-up", frame = 5, key = "a" },
//!     { action = "succeed", frame = "@30" },
//! ]
//! ```
//!
//! Unloadable documents and malformed tests are dropped with a logged error;
//! they never abort the batch.

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{error, info, warn};

use crate::error::{HarnessError, Result};

/// When a step fires relative to the render loop's frame counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSpec {
    /// N ticks after the previous step fired
    After(u64),
    /// At absolute tick N (written `"@N"`)
    At(u64),
}

impl FrameSpec {
    /// Tick on which the step becomes due, given when the previous step fired
    pub fn due(&self, last_step_frame: u64) -> u64 {
        match *self {
            FrameSpec::After(n) => last_step_frame.saturating_add(n),
            FrameSpec::At(n) => n,
        }
    }
}

impl Default for FrameSpec {
    fn default() -> Self {
        FrameSpec::After(0)
    }
}

impl fmt::Display for FrameSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameSpec::After(n) => write!(f, "{}", n),
            FrameSpec::At(n) => write!(f, "@{}", n),
        }
    }
}

impl FromStr for FrameSpec {
    type Err = HarnessError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (absolute, digits) = match s.strip_prefix('@') {
            Some(rest) => (true, rest.trim()),
            None => (false, s),
        };
        let n: u64 = digits
            .parse()
            .map_err(|_| HarnessError::Config(format!("invalid frame spec '{}'", s)))?;
        Ok(if absolute {
            FrameSpec::At(n)
        } else {
            FrameSpec::After(n)
        })
    }
}

impl<'de> Deserialize<'de> for FrameSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Int(n) if n >= 0 => Ok(FrameSpec::After(n as u64)),
            Raw::Int(n) => Err(de::Error::custom(format!("negative frame offset {}", n))),
            Raw::Text(s) => s.parse().map_err(de::Error::custom),
        }
    }
}

impl Serialize for FrameSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match *self {
            FrameSpec::After(n) => serializer.serialize_u64(n),
            FrameSpec::At(_) => serializer.serialize_str(&self.to_string()),
        }
    }
}

/// One scripted action bound to a frame spec
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub action: String,
    pub frame: FrameSpec,
    /// Action-specific parameters (everything besides `action` and `frame`)
    #[serde(flatten)]
    pub params: toml::Table,
}

impl Step {
    pub fn new(action: &str, frame: FrameSpec) -> Self {
        Self {
            action: action.to_string(),
            frame,
            params: toml::Table::new(),
        }
    }

    /// Builder-style parameter insertion
    pub fn with(mut self, name: &str, value: impl Into<toml::Value>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{frame: {}, action: {}", self.frame, self.action)?;
        for (k, v) in &self.params {
            write!(f, ", {}: {}", k, v)?;
        }
        write!(f, "}}")
    }
}

/// A target program plus the script that drives it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Test {
    /// Program locator, resolved against the program catalog
    pub path: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Compatible architectures; absent means all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine: Option<Vec<String>>,
    /// Hook text handed to the program before it starts rendering
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before_first_kernel: Option<String>,
    /// Document this test was loaded from
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl Test {
    pub fn new(path: &str, steps: Vec<Step>) -> Self {
        Self {
            path: path.to_string(),
            args: Vec::new(),
            steps,
            machine: None,
            before_first_kernel: None,
            source: None,
        }
    }

    /// Whether this test may run on the given architecture
    pub fn runs_on(&self, arch: &str) -> bool {
        match &self.machine {
            Some(archs) => archs.iter().any(|a| a == arch),
            None => true,
        }
    }

    /// Identity used in logs and reports
    pub fn name(&self) -> String {
        match &self.source {
            Some(src) => format!("{} ({})", self.path, src.display()),
            None => self.path.clone(),
        }
    }
}

/// Ordered group of tests, immutable once loaded
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    pub tests: Vec<Test>,
}

/// On-disk shape of a timeline document
#[derive(Debug, Default, Serialize, Deserialize)]
struct TimelineDocument {
    #[serde(default)]
    test: Vec<toml::Value>,
}

impl Timeline {
    pub fn new(tests: Vec<Test>) -> Self {
        Self { tests }
    }

    /// Parse a document, dropping tests that do not deserialize
    pub fn parse(content: &str, source: Option<&Path>) -> Result<Self> {
        let doc: TimelineDocument = toml::from_str(content).map_err(|e| {
            HarnessError::Config(format!(
                "failed to parse {}: {}",
                source.map(|p| p.display().to_string()).unwrap_or_default(),
                e
            ))
        })?;

        let mut tests = Vec::with_capacity(doc.test.len());
        for (idx, raw) in doc.test.into_iter().enumerate() {
            match raw.try_into::<Test>() {
                Ok(mut test) => {
                    test.source = source.map(Path::to_path_buf);
                    tests.push(test);
                }
                Err(e) => {
                    error!(
                        "Dropping test #{} in {}: {}",
                        idx + 1,
                        source.map(|p| p.display().to_string()).unwrap_or_default(),
                        e
                    );
                }
            }
        }
        Ok(Self { tests })
    }

    /// Load a single document
    pub fn load_file(path: &Path) -> Result<Self> {
        info!("Collecting cases in {}", path.display());
        let content = fs::read_to_string(path)?;
        Self::parse(&content, Some(path))
    }

    /// Load a document or walk a directory of `*.toml` documents.
    ///
    /// Documents that fail to load are logged and skipped.
    pub fn load_path(path: &Path) -> Result<Self> {
        if path.is_file() {
            return Self::load_file(path);
        }
        if !path.is_dir() {
            return Err(HarnessError::Config(format!(
                "don't know how to run {}",
                path.display()
            )));
        }

        info!("Run timelines in {}", path.display());
        let mut files = Vec::new();
        discover_documents(path, &mut files);
        files.sort();

        let mut timeline = Timeline::default();
        for file in files {
            match Self::load_file(&file) {
                Ok(t) => timeline.tests.extend(t.tests),
                Err(e) => error!("Skipping {}: {}", file.display(), e),
            }
        }
        Ok(timeline)
    }

    /// Keep only the tests compatible with `arch`
    pub fn for_machine(self, arch: &str) -> Self {
        let (keep, skip): (Vec<_>, Vec<_>) = self.tests.into_iter().partition(|t| t.runs_on(arch));
        for t in &skip {
            info!("Skipping {} (not for {})", t.name(), arch);
        }
        Self { tests: keep }
    }

    /// Serialize back to a document
    pub fn to_toml(&self) -> Result<String> {
        let doc = TimelineDocument {
            test: self
                .tests
                .iter()
                .map(toml::Value::try_from)
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| HarnessError::Config(e.to_string()))?,
        };
        toml::to_string(&doc).map_err(|e| HarnessError::Config(e.to_string()))
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Test> {
        self.tests.iter()
    }
}

fn discover_documents(current: &Path, out: &mut Vec<PathBuf>) {
    let entries = match fs::read_dir(current) {
        Ok(e) => e,
        Err(e) => {
            warn!("Cannot read {}: {}", current.display(), e);
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            discover_documents(&path, out);
        } else if path.extension().map(|e| e == "toml").unwrap_or(false) {
            out.push(path);
        }
    }
}
