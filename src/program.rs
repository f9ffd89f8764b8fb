//! Programs under test and the catalog that locates them
//!
//! A test names its program by locator (`path`). The catalog maps locators to
//! factories so every test gets a fresh instance, built on whichever thread
//! runs the test.

use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{HarnessError, Result};
use crate::host::RenderLoopHost;

/// Per-run environment handed to a program
pub struct ProgramContext {
    pub args: Vec<String>,
    /// Seeded fresh for every test
    pub rng: StdRng,
    pub seed: u64,
    /// Hook text from the test. The harness only delivers it; a program that
    /// supports hooks evaluates it before its first frame.
    pub before_first_kernel: Option<String>,
}

impl ProgramContext {
    pub fn new(args: Vec<String>, seed: u64, before_first_kernel: Option<String>) -> Self {
        Self {
            args,
            rng: StdRng::seed_from_u64(seed),
            seed,
            before_first_kernel,
        }
    }

    /// Value following `--name` in the argument list, parsed
    pub fn arg<T: FromStr>(&self, name: &str) -> Result<Option<T>> {
        let flag = format!("--{}", name);
        let Some(pos) = self.args.iter().position(|a| *a == flag) else {
            return Ok(None);
        };
        let raw = self
            .args
            .get(pos + 1)
            .ok_or_else(|| HarnessError::Program(format!("{} needs a value", flag)))?;
        raw.parse()
            .map(Some)
            .map_err(|_| HarnessError::Program(format!("bad value '{}' for {}", raw, flag)))
    }

    pub fn has_flag(&self, name: &str) -> bool {
        let flag = format!("--{}", name);
        self.args.iter().any(|a| *a == flag)
    }
}

/// An interactive program driven by a render loop
pub trait Program {
    /// Run until the host says stop or the program decides it is finished
    fn run(&mut self, host: &mut dyn RenderLoopHost, ctx: &mut ProgramContext) -> Result<()>;

    /// Release windows and other resources. Called after every run.
    fn teardown(&mut self) {}
}

/// Closure-backed program, handy for small probes
pub struct FnProgram<F>(F);

impl<F> Program for FnProgram<F>
where
    F: FnMut(&mut dyn RenderLoopHost, &mut ProgramContext) -> Result<()>,
{
    fn run(&mut self, host: &mut dyn RenderLoopHost, ctx: &mut ProgramContext) -> Result<()> {
        (self.0)(host, ctx)
    }
}

pub fn from_fn<F>(f: F) -> FnProgram<F>
where
    F: FnMut(&mut dyn RenderLoopHost, &mut ProgramContext) -> Result<()>,
{
    FnProgram(f)
}

pub type ProgramFactory = Arc<dyn Fn() -> Box<dyn Program> + Send + Sync>;

/// Locator -> factory
#[derive(Default, Clone)]
pub struct ProgramCatalog {
    programs: BTreeMap<String, ProgramFactory>,
}

impl ProgramCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, path: &str, factory: F)
    where
        F: Fn() -> Box<dyn Program> + Send + Sync + 'static,
    {
        self.programs.insert(path.to_string(), Arc::new(factory));
    }

    pub fn contains(&self, path: &str) -> bool {
        self.programs.contains_key(path)
    }

    /// Fresh instance of the program at `path`
    pub fn create(&self, path: &str) -> Option<Box<dyn Program>> {
        self.programs.get(path).map(|factory| factory())
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.programs.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TickFlow;
    use rand::Rng;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_arg_parsing() {
        let ctx = ProgramContext::new(args(&["--size", "64", "--fast"]), 1, None);
        assert_eq!(ctx.arg::<u32>("size").unwrap(), Some(64));
        assert_eq!(ctx.arg::<u32>("frames").unwrap(), None);
        assert!(ctx.has_flag("fast"));
        assert!(ctx.arg::<u32>("fast").is_err());
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let mut a = ProgramContext::new(Vec::new(), 23333, None);
        let mut b = ProgramContext::new(Vec::new(), 23333, None);
        let xs: Vec<u32> = (0..8).map(|_| a.rng.gen_range(0..1000)).collect();
        let ys: Vec<u32> = (0..8).map(|_| b.rng.gen_range(0..1000)).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn test_catalog_creates_fresh_instances() {
        let mut catalog = ProgramCatalog::new();
        catalog.register("probe", || {
            Box::new(from_fn(|host: &mut dyn RenderLoopHost, _ctx: &mut ProgramContext| {
                for frame in 0.. {
                    if host.on_tick(frame, None)? == TickFlow::Stop {
                        break;
                    }
                }
                Ok(())
            }))
        });
        assert!(catalog.contains("probe"));
        assert!(catalog.create("probe").is_some());
        assert!(catalog.create("missing").is_none());
        assert_eq!(catalog.paths().collect::<Vec<_>>(), vec!["probe"]);
    }
}
