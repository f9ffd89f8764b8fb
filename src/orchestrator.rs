//! Test orchestration
//!
//! Collects tests from timelines, validates them dry, and runs each one in
//! isolation: fresh input state, fresh scheduler, fresh seeded program.
//! Results come back in timeline order whether tests ran one after another
//! or on a worker pool.

use rayon::prelude::*;
use serde::Serialize;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::actions::{ActionRegistry, CaptureSettings};
use crate::error::{HarnessError, Result};
use crate::host::ScriptedHost;
use crate::program::{ProgramCatalog, ProgramContext};
use crate::scheduler::FiringMode;
use crate::timeline::{Test, Timeline};

/// Seed forced on every program run unless configured otherwise
pub const DEFAULT_SEED: u64 = 23333;

/// Result of running a test
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TestResult {
    Pass {
        frames: u64,
    },
    Fail {
        error: String,
        /// Steps that never fired, the failing one first
        remaining: Vec<String>,
    },
    /// The harness itself could not run the test
    Error {
        message: String,
    },
}

impl TestResult {
    pub fn is_pass(&self) -> bool {
        matches!(self, TestResult::Pass { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            TestResult::Pass { .. } => "PASS",
            TestResult::Fail { .. } => "FAIL",
            TestResult::Error { .. } => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TestReport {
    pub name: String,
    pub path: String,
    pub result: TestResult,
    pub elapsed_ms: u64,
    pub steps_fired: usize,
    /// RFC 3339
    pub started_at: String,
}

impl TestReport {
    fn new(test: &Test, result: TestResult) -> Self {
        Self {
            name: test.name(),
            path: test.path.clone(),
            result,
            elapsed_ms: 0,
            steps_fired: 0,
            started_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub reports: Vec<TestReport>,
}

impl RunSummary {
    pub fn passed(&self) -> usize {
        self.reports.iter().filter(|r| r.result.is_pass()).count()
    }

    pub fn failed(&self) -> usize {
        self.reports.len() - self.passed()
    }

    pub fn all_passed(&self) -> bool {
        self.failed() == 0
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| HarnessError::Config(format!("could not serialize report: {}", e)))
    }
}

/// How tests are run
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub capture: CaptureSettings,
    pub seed: u64,
    /// 0 or 1 runs sequentially
    pub workers: usize,
    pub mode: FiringMode,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            capture: CaptureSettings::default(),
            seed: DEFAULT_SEED,
            workers: 0,
            mode: FiringMode::Drain,
        }
    }
}

/// A collected test: runnable, or already failed at collection
#[derive(Debug, Clone)]
pub enum Collected {
    Run(Test),
    Rejected(TestReport),
}

pub struct Orchestrator {
    registry: ActionRegistry,
    catalog: ProgramCatalog,
    options: RunOptions,
}

impl Orchestrator {
    pub fn new(registry: ActionRegistry, catalog: ProgramCatalog, options: RunOptions) -> Self {
        Self {
            registry,
            catalog,
            options,
        }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn catalog(&self) -> &ProgramCatalog {
        &self.catalog
    }

    /// Drop tests whose program is unknown; fail tests whose steps do not validate
    pub fn collect(&self, timeline: Timeline) -> Vec<Collected> {
        let mut collected = Vec::with_capacity(timeline.len());
        for test in timeline.tests {
            if !self.catalog.contains(&test.path) {
                error!("{} does not exist!", test.path);
                continue;
            }
            match self.registry.validate(&test, &self.options.capture) {
                Ok(()) => collected.push(Collected::Run(test)),
                Err(e) => {
                    error!("{} failed validation: {}", test.name(), e);
                    let remaining = test.steps.iter().map(ToString::to_string).collect();
                    let report = TestReport::new(
                        &test,
                        TestResult::Fail {
                            error: e.to_string(),
                            remaining,
                        },
                    );
                    collected.push(Collected::Rejected(report));
                }
            }
        }
        collected
    }

    /// Collect and run every test in `timeline`
    pub fn run(&self, timeline: Timeline) -> Result<RunSummary> {
        let collected = self.collect(timeline);
        self.run_collected(&collected)
    }

    pub fn run_collected(&self, collected: &[Collected]) -> Result<RunSummary> {
        let run_one = |c: &Collected| match c {
            Collected::Run(test) => self.run_test(test),
            Collected::Rejected(report) => report.clone(),
        };

        let reports: Vec<TestReport> = if self.options.workers > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.options.workers)
                .build()
                .map_err(|e| HarnessError::Config(format!("worker pool: {}", e)))?;
            pool.install(|| collected.par_iter().map(run_one).collect())
        } else {
            collected.iter().map(run_one).collect()
        };
        Ok(RunSummary { reports })
    }

    /// Run one test start to finish. Never panics; every outcome is a report.
    pub fn run_test(&self, test: &Test) -> TestReport {
        let started = Instant::now();
        let mut report = TestReport::new(test, TestResult::Pass { frames: 0 });

        let mut host = ScriptedHost::new(
            test,
            &self.registry,
            &self.options.capture,
            self.options.mode,
        );
        if let Err(e) = host.reset() {
            report.result = TestResult::Error {
                message: format!("reset failed: {}", e),
            };
            return report;
        }

        if host.start().is_stop() {
            info!("{}: no steps, nothing to run", test.name());
            report.elapsed_ms = started.elapsed().as_millis() as u64;
            return report;
        }

        let Some(mut program) = self.catalog.create(&test.path) else {
            report.result = TestResult::Error {
                message: format!("{} does not exist!", test.path),
            };
            return report;
        };
        let mut ctx = ProgramContext::new(
            test.args.clone(),
            self.options.seed,
            test.before_first_kernel.clone(),
        );
        if let Some(hook) = &ctx.before_first_kernel {
            debug!("{}: before_first_kernel hook: {}", test.name(), hook);
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| program.run(&mut host, &mut ctx)));
        program.teardown();

        let scheduler = host.scheduler();
        let remaining = || {
            scheduler
                .remaining()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
        };

        report.result = match outcome {
            Err(payload) => TestResult::Error {
                message: format!("program panicked: {}", panic_message(payload.as_ref())),
            },
            Ok(Err(e)) => TestResult::Fail {
                error: e.to_string(),
                remaining: remaining(),
            },
            Ok(Ok(())) if scheduler.is_done() => TestResult::Pass {
                frames: scheduler.current_frame().unwrap_or(0),
            },
            Ok(Ok(())) => match host.failure() {
                Some(msg) => TestResult::Fail {
                    error: msg.to_string(),
                    remaining: remaining(),
                },
                None => {
                    let left = remaining();
                    TestResult::Fail {
                        error: format!("program exited with {} unconsumed steps", left.len()),
                        remaining: left,
                    }
                }
            },
        };
        report.steps_fired = scheduler.fired();
        report.elapsed_ms = started.elapsed().as_millis() as u64;

        match &report.result {
            TestResult::Pass { .. } => info!("{} passed in {} ms", report.name, report.elapsed_ms),
            TestResult::Fail { error, .. } => warn!("{} failed: {}", report.name, error),
            TestResult::Error { message } => error!("{} errored: {}", report.name, message),
        }
        report
    }

    /// Catalog programs that no collected test exercises
    pub fn untracked<'a>(&'a self, tests: &[Test]) -> Vec<&'a str> {
        self.catalog
            .paths()
            .filter(|p| !tests.iter().any(|t| t.path == *p))
            .collect()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demos::{self, PAINT};
    use crate::host::RenderLoopHost;
    use crate::input::LMB;
    use crate::program::from_fn;
    use crate::scheduler::TickFlow;
    use crate::timeline::{FrameSpec, Step};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Program that ticks until told to stop, recording whether "a" is held
    fn pressed_probe(log: Arc<Mutex<Vec<bool>>>, max_frames: u64) -> ProgramCatalog {
        let mut catalog = ProgramCatalog::new();
        catalog.register("probe", move || {
            let log = log.clone();
            Box::new(from_fn(move |host: &mut dyn RenderLoopHost, _ctx: &mut ProgramContext| {
                for frame in 0..max_frames {
                    if host.on_tick(frame, None)? == TickFlow::Stop {
                        break;
                    }
                    log.lock().unwrap().push(host.is_pressed(&["a"]));
                }
                Ok(())
            }))
        });
        catalog
    }

    fn orchestrator(catalog: ProgramCatalog, options: RunOptions) -> Orchestrator {
        Orchestrator::new(ActionRegistry::with_builtins(), catalog, options)
    }

    fn key_script(path: &str) -> Test {
        Test::new(
            path,
            vec![
                Step::new("key-down", FrameSpec::After(0)).with("key", "a"),
                Step::new("key-up", FrameSpec::After(5)).with("key", "a"),
                Step::new("succeed", FrameSpec::At(30)),
            ],
        )
    }

    #[test]
    fn test_key_script_passes_at_frame_30() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let orch = orchestrator(pressed_probe(log.clone(), 100), RunOptions::default());
        let report = orch.run_test(&key_script("probe"));

        assert!(matches!(report.result, TestResult::Pass { frames: 30 }));
        assert_eq!(report.steps_fired, 3);
        let log = log.lock().unwrap();
        assert_eq!(&log[..6], &[true, true, true, true, true, false]);
        assert_eq!(log.len(), 30);
    }

    #[test]
    fn test_program_exiting_early_reports_unconsumed_steps() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let orch = orchestrator(pressed_probe(log, 10), RunOptions::default());
        let report = orch.run_test(&key_script("probe"));
        match report.result {
            TestResult::Fail { remaining, .. } => {
                assert_eq!(remaining.len(), 1);
                assert!(remaining[0].contains("succeed"));
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_failing_step_fails_test() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let orch = orchestrator(pressed_probe(log, 100), RunOptions::default());
        let test = Test::new(
            "probe",
            vec![
                Step::new("fail", FrameSpec::After(3)).with("reason", "nope"),
                Step::new("succeed", FrameSpec::After(1)),
            ],
        );
        match orch.run_test(&test).result {
            TestResult::Fail { error, remaining } => {
                assert!(error.contains("nope"));
                assert_eq!(remaining.len(), 2);
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_script_passes_without_starting_program() {
        let created = Arc::new(AtomicUsize::new(0));
        let mut catalog = ProgramCatalog::new();
        let counter = created.clone();
        catalog.register("probe", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::new(from_fn(|_: &mut dyn RenderLoopHost, _: &mut ProgramContext| Ok(())))
        });
        let orch = orchestrator(catalog, RunOptions::default());
        let report = orch.run_test(&Test::new("probe", Vec::new()));
        assert!(report.result.is_pass());
        assert_eq!(created.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_program_is_an_error() {
        let mut catalog = ProgramCatalog::new();
        catalog.register("boom", || {
            Box::new(from_fn(|_: &mut dyn RenderLoopHost, _: &mut ProgramContext| {
                panic!("window system went away")
            }))
        });
        let orch = orchestrator(catalog, RunOptions::default());
        let test = Test::new("boom", vec![Step::new("succeed", FrameSpec::After(1))]);
        match orch.run_test(&test).result {
            TestResult::Error { message } => assert!(message.contains("window system")),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_collect_drops_unknown_and_rejects_invalid() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let orch = orchestrator(pressed_probe(log, 100), RunOptions::default());
        let timeline = Timeline::new(vec![
            Test::new("missing", vec![Step::new("succeed", FrameSpec::After(0))]),
            Test::new(
                "probe",
                vec![Step::new("teleport", FrameSpec::After(0))],
            ),
            key_script("probe"),
        ]);

        let collected = orch.collect(timeline);
        assert_eq!(collected.len(), 2);
        assert!(matches!(&collected[0], Collected::Rejected(r) if !r.result.is_pass()));
        assert!(matches!(&collected[1], Collected::Run(_)));
    }

    #[test]
    fn test_pool_preserves_order_and_continues_after_failure() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let options = RunOptions {
            workers: 3,
            ..RunOptions::default()
        };
        let orch = orchestrator(pressed_probe(log, 100), options);
        let mut tests = Vec::new();
        for i in 0..6 {
            let mut test = if i == 2 {
                Test::new("probe", vec![Step::new("fail", FrameSpec::After(1))])
            } else {
                key_script("probe")
            };
            test.args = vec![format!("--case={}", i)];
            tests.push(test);
        }

        let summary = orch.run(Timeline::new(tests)).unwrap();
        assert_eq!(summary.reports.len(), 6);
        assert_eq!(summary.passed(), 5);
        assert_eq!(summary.failed(), 1);
        assert!(!summary.reports[2].result.is_pass());
        assert!(!summary.all_passed());
    }

    #[test]
    fn test_capture_generate_then_compare_with_paint_demo() {
        let dir = tempfile::tempdir().unwrap();
        let capture = CaptureSettings {
            generate: true,
            save_compare_dir: dir.path().join("bad-compare"),
            baseline_root: dir.path().join("truth"),
            temp_dir: dir.path().join("tmp"),
        };
        let mut test = Test::new(
            PAINT,
            vec![
                Step::new("move", FrameSpec::After(0)).with("position", vec![0.5, 0.5]),
                Step::new("mouse-down", FrameSpec::After(1)).with("key", LMB),
                Step::new("mouse-up", FrameSpec::After(3)).with("key", LMB),
                Step::new("capture-and-compare", FrameSpec::After(1))
                    .with("compare", "blur-sum-difference")
                    .with("ground_truth", "paint/dot.png")
                    .with("threshold", "0.5%"),
                Step::new("succeed", FrameSpec::After(1)),
            ],
        );
        test.args = vec!["--size".to_string(), "32".to_string()];

        let generate = orchestrator(
            demos::catalog(),
            RunOptions {
                capture: capture.clone(),
                ..RunOptions::default()
            },
        );
        assert!(generate.run_test(&test).result.is_pass());
        assert!(capture.baseline_root.join("paint/dot.png").exists());

        let compare = orchestrator(
            demos::catalog(),
            RunOptions {
                capture: CaptureSettings {
                    generate: false,
                    ..capture.clone()
                },
                ..RunOptions::default()
            },
        );
        let report = compare.run_test(&test);
        assert!(report.result.is_pass(), "{:?}", report.result);
        assert!(!capture.save_compare_dir.exists());

        // Different ink: a different seed changes the brush color
        let reseeded = orchestrator(
            demos::catalog(),
            RunOptions {
                capture: CaptureSettings {
                    generate: false,
                    ..capture.clone()
                },
                seed: 1,
                ..RunOptions::default()
            },
        );
        let mut strict = test.clone();
        strict.steps[3] = strict.steps[3].clone().with("threshold", 0i64);
        strict.steps[3] = strict.steps[3].clone().with("compare", "pixel-count");
        let report = reseeded.run_test(&strict);
        assert!(!report.result.is_pass());
        assert!(capture.save_compare_dir.join("paint/dot.capture.png").exists());
        assert!(capture.save_compare_dir.join("paint/dot.truth.png").exists());
    }

    #[test]
    fn test_before_first_kernel_reaches_program() {
        let seen = Arc::new(Mutex::new(None));
        let mut catalog = ProgramCatalog::new();
        let sink = seen.clone();
        catalog.register("hooked", move || {
            let sink = sink.clone();
            Box::new(from_fn(move |host: &mut dyn RenderLoopHost, ctx: &mut ProgramContext| {
                *sink.lock().unwrap() = ctx.before_first_kernel.clone();
                host.on_tick(0, None)?;
                Ok(())
            }))
        });
        let orch = orchestrator(catalog, RunOptions::default());
        let mut test = Test::new("hooked", vec![Step::new("succeed", FrameSpec::After(0))]);
        test.before_first_kernel = Some("warmup()".to_string());

        assert!(orch.run_test(&test).result.is_pass());
        assert_eq!(seen.lock().unwrap().as_deref(), Some("warmup()"));
    }

    #[test]
    fn test_untracked_programs() {
        let orch = orchestrator(demos::catalog(), RunOptions::default());
        let tests = vec![Test::new(PAINT, Vec::new())];
        assert_eq!(orch.untracked(&tests), vec![demos::BOUNCE]);
    }

    #[test]
    fn test_summary_serializes() {
        let summary = RunSummary {
            reports: vec![TestReport::new(
                &Test::new("probe", Vec::new()),
                TestResult::Pass { frames: 3 },
            )],
        };
        let json = summary.to_json().unwrap();
        assert!(json.contains("\"status\": \"pass\""));
    }
}
