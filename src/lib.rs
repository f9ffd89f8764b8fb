//! Framecheck - scripted visual testing for frame-stepped programs
//!
//! A timeline says when (in render-loop frames) to inject input and when to
//! capture a frame and compare it against a stored ground truth. Programs run
//! against a [`RenderLoopHost`] and never know whether the input they read is
//! real or scripted.

// Script model
pub mod error;
pub mod input;
pub mod timeline;

// Execution
pub mod actions;
pub mod host;
pub mod orchestrator;
pub mod program;
pub mod scheduler;

// Capture and comparison
pub mod capture;
pub mod compare;

// Tooling
pub mod config;
pub mod demos;
pub mod history;
pub mod record;

/// Default location of timeline documents
pub const TIMELINES_DIR: &str = "timelines";

pub use actions::{
    ActionContext, ActionHandler, ActionOutcome, ActionRegistry, CaptureSettings, ParamSpec, Params,
};
pub use capture::{FigureExport, FrameSource, FrameSurface, Surface, WindowReadback, capture};
pub use compare::{CompareMethod, Comparison, PixelBuffer, Threshold, compare_images};
pub use config::{RunnerConfig, init_logging};
pub use error::{HarnessError, Result};
pub use history::RunHistory;
pub use host::{InputSource, RenderLoopHost, ScriptedHost};
pub use input::{Event, EventTag, InputState, Modifier, PolledEvent};
pub use orchestrator::{Orchestrator, RunOptions, RunSummary, TestReport, TestResult};
pub use program::{Program, ProgramCatalog, ProgramContext};
pub use record::Recorder;
pub use scheduler::{FiringMode, Scheduler, SchedulerState, TickFlow};
pub use timeline::{FrameSpec, Step, Test, Timeline};
