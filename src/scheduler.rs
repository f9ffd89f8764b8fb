//! Frame-synchronized step scheduler
//!
//! Rides the program's render loop passively: every tick hands over the
//! loop's frame counter, and any step that has come due is dispatched before
//! the tick returns. The scheduler never owns a thread and never waits.

use std::mem;
use tracing::debug;

use crate::actions::ActionOutcome;
use crate::error::{HarnessError, Result};
use crate::timeline::Step;

/// Whether several due steps may fire within one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FiringMode {
    /// At most one step per tick
    OnePerTick,
    /// Keep firing until no step is due
    #[default]
    Drain,
}

/// What the render loop should do after a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickFlow {
    Continue,
    /// Script finished; the program should wind down
    Stop,
}

impl TickFlow {
    pub fn is_stop(&self) -> bool {
        matches!(self, TickFlow::Stop)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerState {
    /// Created, first step not pulled yet
    AwaitingIterator,
    StepPending(Step),
    /// Script completed successfully
    Done,
    /// A dispatched step failed; no further steps fire
    Halted(Step),
}

/// Per-test single-pass cursor over the script
#[derive(Debug)]
pub struct Scheduler {
    steps: std::vec::IntoIter<Step>,
    state: SchedulerState,
    mode: FiringMode,
    last_step_frame: u64,
    current_frame: Option<u64>,
    fired: usize,
}

impl Scheduler {
    pub fn new(steps: Vec<Step>, mode: FiringMode) -> Self {
        Self {
            steps: steps.into_iter(),
            state: SchedulerState::AwaitingIterator,
            mode,
            last_step_frame: 0,
            current_frame: None,
            fired: 0,
        }
    }

    /// Pull the first step. An empty script completes immediately.
    pub fn start(&mut self) -> TickFlow {
        if self.state == SchedulerState::AwaitingIterator {
            self.advance();
        }
        self.flow()
    }

    /// One render-loop iteration at `frame`.
    ///
    /// Fires the pending step if due (and, in drain mode, every following
    /// step that is due at the same frame). `dispatch` runs synchronously.
    pub fn tick<F>(&mut self, frame: u64, mut dispatch: F) -> Result<TickFlow>
    where
        F: FnMut(&Step) -> Result<ActionOutcome>,
    {
        if let Some(previous) = self.current_frame {
            if frame < previous {
                return Err(HarnessError::FrameRegression {
                    previous,
                    current: frame,
                });
            }
        }
        self.current_frame = Some(frame);

        if let SchedulerState::Halted(step) = &self.state {
            return Err(HarnessError::Failed(format!(
                "render loop kept ticking after step {} failed",
                step
            )));
        }

        self.start();

        loop {
            let step = match mem::replace(&mut self.state, SchedulerState::AwaitingIterator) {
                SchedulerState::StepPending(step) if frame >= step.frame.due(self.last_step_frame) => {
                    step
                }
                other => {
                    self.state = other;
                    break;
                }
            };
            self.last_step_frame = frame;
            debug!("Frame {}: firing {}", frame, step);

            match dispatch(&step) {
                Ok(ActionOutcome::Continue) => {
                    self.fired += 1;
                    self.advance();
                }
                Ok(ActionOutcome::Succeed) => {
                    self.fired += 1;
                    self.state = SchedulerState::Done;
                }
                Err(e) => {
                    self.state = SchedulerState::Halted(step);
                    return Err(e);
                }
            }

            if self.mode == FiringMode::OnePerTick {
                break;
            }
        }

        Ok(self.flow())
    }

    fn advance(&mut self) {
        self.state = match self.steps.next() {
            Some(step) => SchedulerState::StepPending(step),
            None => SchedulerState::Done,
        };
    }

    fn flow(&self) -> TickFlow {
        if self.is_done() {
            TickFlow::Stop
        } else {
            TickFlow::Continue
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == SchedulerState::Done
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    pub fn mode(&self) -> FiringMode {
        self.mode
    }

    /// Steps that have not fired, the pending or failed one first
    pub fn remaining(&self) -> Vec<Step> {
        let head = match &self.state {
            SchedulerState::StepPending(step) | SchedulerState::Halted(step) => Some(step.clone()),
            _ => None,
        };
        if self.is_done() {
            return Vec::new();
        }
        head.into_iter().chain(self.steps.as_slice().iter().cloned()).collect()
    }

    pub fn fired(&self) -> usize {
        self.fired
    }

    pub fn last_step_frame(&self) -> u64 {
        self.last_step_frame
    }

    pub fn current_frame(&self) -> Option<u64> {
        self.current_frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::FrameSpec;

    fn step(action: &str, frame: FrameSpec) -> Step {
        Step::new(action, frame)
    }

    /// Tick frames `0..end` and record which action fired on which frame
    fn run(scheduler: &mut Scheduler, end: u64) -> Vec<(u64, String)> {
        let mut log = Vec::new();
        for frame in 0..end {
            let flow = scheduler
                .tick(frame, |s| {
                    log.push((frame, s.action.clone()));
                    Ok(if s.action == "succeed" {
                        ActionOutcome::Succeed
                    } else {
                        ActionOutcome::Continue
                    })
                })
                .unwrap();
            if flow.is_stop() {
                break;
            }
        }
        log
    }

    #[test]
    fn test_empty_script_is_done_at_start() {
        let mut scheduler = Scheduler::new(Vec::new(), FiringMode::Drain);
        assert_eq!(scheduler.start(), TickFlow::Stop);
        assert!(scheduler.is_done());
    }

    #[test]
    fn test_relative_and_absolute_frames() {
        let mut scheduler = Scheduler::new(
            vec![
                step("key-down", FrameSpec::After(0)),
                step("key-up", FrameSpec::After(5)),
                step("succeed", FrameSpec::At(30)),
            ],
            FiringMode::Drain,
        );
        let log = run(&mut scheduler, 100);
        assert_eq!(
            log,
            vec![
                (0, "key-down".to_string()),
                (5, "key-up".to_string()),
                (30, "succeed".to_string()),
            ]
        );
        assert!(scheduler.is_done());
        assert_eq!(scheduler.fired(), 3);
    }

    #[test]
    fn test_relative_offset_counts_from_actual_firing_frame() {
        let mut scheduler = Scheduler::new(
            vec![step("a", FrameSpec::At(3)), step("b", FrameSpec::After(2))],
            FiringMode::Drain,
        );
        // Loop starts late: first step fires at 10, second at 12
        let mut log = Vec::new();
        for frame in [10, 11, 12, 13] {
            scheduler
                .tick(frame, |s| {
                    log.push((frame, s.action.clone()));
                    Ok(ActionOutcome::Continue)
                })
                .unwrap();
        }
        assert_eq!(log, vec![(10, "a".to_string()), (12, "b".to_string())]);
    }

    #[test]
    fn test_drain_fires_all_due_steps_in_one_tick() {
        let mut scheduler = Scheduler::new(
            vec![
                step("a", FrameSpec::After(2)),
                step("b", FrameSpec::After(0)),
                step("c", FrameSpec::At(1)),
                step("d", FrameSpec::After(1)),
            ],
            FiringMode::Drain,
        );
        let log = run(&mut scheduler, 10);
        assert_eq!(
            log,
            vec![
                (2, "a".to_string()),
                (2, "b".to_string()),
                (2, "c".to_string()),
                (3, "d".to_string()),
            ]
        );
    }

    #[test]
    fn test_one_per_tick_defers_to_next_tick() {
        let mut scheduler = Scheduler::new(
            vec![
                step("a", FrameSpec::After(2)),
                step("b", FrameSpec::After(0)),
                step("c", FrameSpec::At(1)),
            ],
            FiringMode::OnePerTick,
        );
        let log = run(&mut scheduler, 10);
        assert_eq!(
            log,
            vec![(2, "a".to_string()), (3, "b".to_string()), (4, "c".to_string())]
        );
    }

    #[test]
    fn test_succeed_stops_before_remaining_steps() {
        let mut scheduler = Scheduler::new(
            vec![step("succeed", FrameSpec::After(1)), step("never", FrameSpec::After(0))],
            FiringMode::Drain,
        );
        let log = run(&mut scheduler, 10);
        assert_eq!(log, vec![(1, "succeed".to_string())]);
        assert!(scheduler.is_done());
        assert!(scheduler.remaining().is_empty());
    }

    #[test]
    fn test_done_is_never_reentered() {
        let mut scheduler = Scheduler::new(vec![step("a", FrameSpec::After(0))], FiringMode::Drain);
        let mut calls = 0;
        for frame in 0..5 {
            scheduler
                .tick(frame, |_| {
                    calls += 1;
                    Ok(ActionOutcome::Continue)
                })
                .unwrap();
        }
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_failed_step_halts_and_is_reported() {
        let mut scheduler = Scheduler::new(
            vec![step("boom", FrameSpec::After(0)), step("after", FrameSpec::After(1))],
            FiringMode::Drain,
        );
        let err = scheduler
            .tick(0, |_| Err(HarnessError::Failed("boom".to_string())))
            .unwrap_err();
        assert!(matches!(err, HarnessError::Failed(_)));

        let remaining: Vec<String> = scheduler.remaining().into_iter().map(|s| s.action).collect();
        assert_eq!(remaining, vec!["boom", "after"]);
        assert!(scheduler.tick(1, |_| Ok(ActionOutcome::Continue)).is_err());
    }

    #[test]
    fn test_frame_regression_is_rejected() {
        let mut scheduler = Scheduler::new(vec![step("a", FrameSpec::At(50))], FiringMode::Drain);
        scheduler.tick(5, |_| Ok(ActionOutcome::Continue)).unwrap();
        scheduler.tick(5, |_| Ok(ActionOutcome::Continue)).unwrap();
        assert!(matches!(
            scheduler.tick(4, |_| Ok(ActionOutcome::Continue)),
            Err(HarnessError::FrameRegression { previous: 5, current: 4 })
        ));
    }
}
