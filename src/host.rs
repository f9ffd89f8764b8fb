//! Render-loop host - the seam between a program under test and the harness
//!
//! A program never reads hardware input directly. It asks its
//! [`RenderLoopHost`] whether input is pending, polls events, queries held
//! keys and the cursor, and reports every finished frame through
//! [`RenderLoopHost::on_tick`]. Under test the host is a [`ScriptedHost`],
//! which answers from the scripted [`InputState`] and fires timeline steps as
//! their frames come due.

use tracing::{debug, info};

use crate::actions::{ActionContext, ActionRegistry, CaptureSettings};
use crate::capture::Surface;
use crate::error::Result;
use crate::input::{EventTag, InputState, PolledEvent};
use crate::scheduler::{FiringMode, Scheduler, TickFlow};
use crate::timeline::Test;

/// Input and frame services a render loop relies on
pub trait RenderLoopHost {
    /// Called once per rendered frame, after the frame is shown
    fn on_tick(&mut self, frame: u64, surface: Option<&mut dyn Surface>) -> Result<TickFlow>;

    fn has_pending_input(&mut self) -> bool;

    /// Next event, oldest first. Errors when nothing is pending.
    fn poll_event(&mut self) -> Result<PolledEvent>;

    /// True if any of `keys` is held
    fn is_pressed(&mut self, keys: &[&str]) -> bool;

    /// Normalized cursor position
    fn cursor_position(&mut self) -> (f64, f64);

    /// Window-style polling: consumes one event and yields it only if it is a
    /// press or release matching `tag` (any press/release when `None`).
    /// Motion events are consumed silently.
    fn next_event(&mut self, tag: Option<EventTag>) -> Option<PolledEvent> {
        if !self.has_pending_input() {
            return None;
        }
        let event = self.poll_event().ok()?;
        match (event.tag, tag) {
            (EventTag::Motion, _) => None,
            (_, None) => Some(event),
            (actual, Some(wanted)) if actual == wanted => Some(event),
            _ => None,
        }
    }
}

/// A real input backend (window system, device driver)
pub trait InputSource {
    fn has_pending_input(&mut self) -> bool;
    fn poll_event(&mut self) -> Option<PolledEvent>;
    fn is_pressed(&mut self, key: &str) -> bool;
    fn cursor_position(&mut self) -> (f64, f64);
}

/// Drives one test: owns its scheduler and input state for the whole run
pub struct ScriptedHost<'h> {
    test: &'h Test,
    registry: &'h ActionRegistry,
    settings: &'h CaptureSettings,
    scheduler: Scheduler,
    input: InputState,
    native: Option<Box<dyn InputSource + 'h>>,
    failure: Option<String>,
    ticks: u64,
}

impl<'h> ScriptedHost<'h> {
    pub fn new(
        test: &'h Test,
        registry: &'h ActionRegistry,
        settings: &'h CaptureSettings,
        mode: FiringMode,
    ) -> Self {
        Self {
            test,
            registry,
            settings,
            scheduler: Scheduler::new(test.steps.clone(), mode),
            input: InputState::new(),
            native: None,
            failure: None,
            ticks: 0,
        }
    }

    /// Keep a native backend alive underneath the script. Its input is read
    /// and thrown away so its queues never back up.
    pub fn with_native(mut self, native: Box<dyn InputSource + 'h>) -> Self {
        self.native = Some(native);
        self
    }

    /// Run every registered reset hook against this host's state
    pub fn reset(&mut self) -> Result<()> {
        let mut ctx = ActionContext {
            input: &mut self.input,
            surface: None,
            test: Some(self.test),
            capture: self.settings,
            dry: false,
        };
        self.registry.reset_all(&mut ctx)
    }

    /// Pull the first step; `Stop` means there is nothing to run
    pub fn start(&mut self) -> TickFlow {
        info!("Running {}...", self.test.path);
        self.scheduler.start()
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn input(&self) -> &InputState {
        &self.input
    }

    /// Message of the step failure, if one happened
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    fn drain_native(&mut self) {
        if let Some(native) = self.native.as_mut() {
            while native.has_pending_input() {
                if native.poll_event().is_none() {
                    break;
                }
            }
        }
    }
}

impl RenderLoopHost for ScriptedHost<'_> {
    fn on_tick(&mut self, frame: u64, mut surface: Option<&mut dyn Surface>) -> Result<TickFlow> {
        self.ticks += 1;
        let Self {
            test,
            registry,
            settings,
            scheduler,
            input,
            ..
        } = self;

        let result = scheduler.tick(frame, |step| {
            let mut ctx = ActionContext {
                input: &mut *input,
                surface: surface.as_mut().map(|s| &mut **s as &mut dyn Surface),
                test: Some(*test),
                capture: *settings,
                dry: false,
            };
            registry.dispatch_step(step, &mut ctx)
        });

        match result {
            Ok(flow) => {
                if flow.is_stop() {
                    debug!("Frame {}: script complete", frame);
                }
                Ok(flow)
            }
            Err(e) => {
                if self.failure.is_none() {
                    self.failure = Some(e.to_string());
                }
                Err(e)
            }
        }
    }

    fn has_pending_input(&mut self) -> bool {
        if let Some(native) = self.native.as_mut() {
            native.has_pending_input();
        }
        self.input.has_pending()
    }

    fn poll_event(&mut self) -> Result<PolledEvent> {
        self.drain_native();
        self.input.poll()
    }

    fn is_pressed(&mut self, keys: &[&str]) -> bool {
        if let Some(native) = self.native.as_mut() {
            for key in keys {
                native.is_pressed(key);
            }
        }
        self.input.is_pressed(keys)
    }

    fn cursor_position(&mut self) -> (f64, f64) {
        if let Some(native) = self.native.as_mut() {
            native.cursor_position();
        }
        self.input.cursor()
    }
}
