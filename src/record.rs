//! Input recorder
//!
//! Sits in the host seam in front of a real input backend, passes everything
//! through unchanged, and writes down what it saw as timeline steps. The
//! result replays through [`crate::host::ScriptedHost`] as an ordinary test.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::capture::Surface;
use crate::error::{HarnessError, Result};
use crate::host::{InputSource, RenderLoopHost};
use crate::input::{EventTag, PolledEvent, is_mouse_button};
use crate::scheduler::TickFlow;
use crate::timeline::{FrameSpec, Step, Test, Timeline};

/// Frames to wait after the last recorded input before succeeding
pub const TRAILING_FRAMES: u64 = 30;

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

fn key_action(key: &str, down: bool) -> &'static str {
    match (is_mouse_button(key), down) {
        (true, true) => "mouse-down",
        (true, false) => "mouse-up",
        (false, true) => "key-down",
        (false, false) => "key-up",
    }
}

pub struct Recorder<S: InputSource> {
    source: S,
    path: String,
    args: Vec<String>,
    steps: Vec<Step>,
    /// Frames completed so far
    frame: u64,
    last_step_frame: u64,
    last_pos: (f64, f64),
    pressed: BTreeSet<String>,
    frame_limit: Option<u64>,
}

impl<S: InputSource> Recorder<S> {
    pub fn new(source: S, path: &str, args: Vec<String>) -> Self {
        Self {
            source,
            path: path.to_string(),
            args,
            steps: Vec::new(),
            frame: 0,
            last_step_frame: 0,
            last_pos: (0.0, 0.0),
            pressed: BTreeSet::new(),
            frame_limit: None,
        }
    }

    /// Stop the program after `frames` frames
    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.frame_limit = Some(frames);
        self
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Tick a step must fire on so the program sees it where the user's
    /// input appeared: input read while frame N is processed replays at the
    /// end of frame N-1.
    fn input_tick(&self) -> u64 {
        self.frame.saturating_sub(1)
    }

    fn push(&mut self, at: u64, action: &str, param: &str, value: toml::Value) {
        let at = at.max(self.last_step_frame);
        let step = Step::new(action, FrameSpec::After(at - self.last_step_frame)).with(param, value);
        debug!("Recorded {}", step);
        self.steps.push(step);
        self.last_step_frame = at;
    }

    fn record_key(&mut self, at: u64, key: &str, down: bool) {
        self.push(at, key_action(key, down), "key", key.into());
    }

    fn record_move(&mut self, pos: (f64, f64)) {
        if pos == self.last_pos {
            return;
        }
        self.last_pos = pos;
        let position = vec![round3(pos.0), round3(pos.1)];
        self.push(self.input_tick(), "move", "position", position.into());
    }

    /// Reconcile held-key state with what the backend reports
    fn sync_key(&mut self, at: u64, key: &str, down: bool) {
        let held = self.pressed.contains(key);
        if held && !down {
            self.pressed.remove(key);
            self.record_key(at, key, false);
        } else if !held && down {
            self.pressed.insert(key.to_string());
            self.record_key(at, key, true);
        }
    }

    /// The recorded test, ending with a trailing `succeed`
    pub fn finish(self) -> Test {
        let mut test = Test::new(&self.path, self.steps);
        test.args = self.args;
        test.steps
            .push(Step::new("succeed", FrameSpec::After(TRAILING_FRAMES)));
        test
    }

    /// Finish and write the test as a timeline document
    pub fn write(self, output: &Path) -> Result<Test> {
        let test = self.finish();
        let text = Timeline::new(vec![test.clone()]).to_toml()?;
        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(output, text)?;
        info!("Recorded {} steps to {}", test.steps.len(), output.display());
        Ok(test)
    }
}

impl<S: InputSource> RenderLoopHost for Recorder<S> {
    fn on_tick(&mut self, frame: u64, _surface: Option<&mut dyn Surface>) -> Result<TickFlow> {
        let held: Vec<String> = self.pressed.iter().cloned().collect();
        for key in held {
            let down = self.source.is_pressed(&key);
            self.sync_key(frame, &key, down);
        }
        self.frame = frame + 1;

        match self.frame_limit {
            Some(limit) if self.frame >= limit => Ok(TickFlow::Stop),
            _ => Ok(TickFlow::Continue),
        }
    }

    fn has_pending_input(&mut self) -> bool {
        self.source.has_pending_input()
    }

    fn poll_event(&mut self) -> Result<PolledEvent> {
        let event = self
            .source
            .poll_event()
            .ok_or(HarnessError::EmptyEventQueue)?;
        match event.tag {
            EventTag::Motion => self.record_move(event.position),
            EventTag::Press => {
                self.pressed.insert(event.key.clone());
                self.record_key(self.input_tick(), &event.key, true);
            }
            EventTag::Release => {
                self.pressed.remove(&event.key);
                self.record_key(self.input_tick(), &event.key, false);
            }
        }
        Ok(event)
    }

    fn is_pressed(&mut self, keys: &[&str]) -> bool {
        let mut any = false;
        for key in keys {
            let down = self.source.is_pressed(key);
            self.sync_key(self.input_tick(), key, down);
            any |= down;
        }
        any
    }

    fn cursor_position(&mut self) -> (f64, f64) {
        let pos = self.source.cursor_position();
        self.record_move(pos);
        pos
    }
}
