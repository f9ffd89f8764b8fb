//! Action registry - the scripting vocabulary available to test steps
//!
//! Every handler declares the parameters it accepts. Dispatch filters the
//! step's parameter table down to that declaration, so unknown keys never
//! reach a handler, and hands out context (capture surface, owning test)
//! only to handlers that ask for it.
//!
//! With `dry` set a handler validates its parameters and returns without
//! side effects, which lets a whole timeline be checked before anything runs.

pub mod capture;
pub mod control;
pub mod input;

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::capture::Surface;
use crate::error::{HarnessError, Result};
use crate::input::InputState;
use crate::timeline::{Step, Test};

pub use capture::{CaptureAndCompare, CaptureSettings};
pub use control::{Fail, Succeed};
pub use input::{KeyDown, KeyPress, KeyUp, Move, ResetInput};

/// Names with this prefix are reset hooks, not step actions
pub const RESET_PREFIX: &str = "__reset:";

/// Context parameter carrying the capture surface
pub const SURFACE_PARAM: &str = "surface";
/// Context parameter carrying the owning test
pub const TEST_PARAM: &str = "test";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Required,
    Optional,
    /// Supplied by the runner, not by the step
    Context,
}

/// One accepted parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
}

impl ParamSpec {
    pub const fn required(name: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::Required,
        }
    }

    pub const fn optional(name: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::Optional,
        }
    }

    pub const fn context(name: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::Context,
        }
    }
}

/// Result of a successful action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    Continue,
    /// End the test successfully now
    Succeed,
}

/// Everything a handler may touch while running
pub struct ActionContext<'a> {
    pub input: &'a mut InputState,
    pub surface: Option<&'a mut dyn Surface>,
    pub test: Option<&'a Test>,
    pub capture: &'a CaptureSettings,
    pub dry: bool,
}

impl<'a> ActionContext<'a> {
    /// Context for dry validation: nothing captured, nothing kept
    pub fn dry(input: &'a mut InputState, capture: &'a CaptureSettings) -> Self {
        Self {
            input,
            surface: None,
            test: None,
            capture,
            dry: true,
        }
    }
}

/// Step parameters after filtering, with typed accessors
#[derive(Debug, Clone)]
pub struct Params<'p> {
    action: &'p str,
    values: toml::Table,
}

impl<'p> Params<'p> {
    pub fn new(action: &'p str, values: toml::Table) -> Self {
        Self { action, values }
    }

    pub fn action(&self) -> &str {
        self.action
    }

    pub fn get(&self, name: &str) -> Option<&toml::Value> {
        self.values.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&toml::Value> {
        self.get(name).ok_or_else(|| HarnessError::MissingParam {
            action: self.action.to_string(),
            param: name.to_string(),
        })
    }

    pub fn str(&self, name: &str) -> Result<&str> {
        let value = self.require(name)?;
        value
            .as_str()
            .ok_or_else(|| self.invalid(name, format!("expected a string, got {}", value)))
    }

    /// Optional list of strings; absent means empty
    pub fn str_list(&self, name: &str) -> Result<Vec<String>> {
        let Some(value) = self.get(name) else {
            return Ok(Vec::new());
        };
        let items = value
            .as_array()
            .ok_or_else(|| self.invalid(name, format!("expected a list, got {}", value)))?;
        items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| self.invalid(name, format!("expected strings, got {}", item)))
            })
            .collect()
    }

    pub fn opt_str(&self, name: &str) -> Result<Option<&str>> {
        match self.get(name) {
            None => Ok(None),
            Some(_) => self.str(name).map(Some),
        }
    }

    pub fn invalid(&self, name: &str, reason: String) -> HarnessError {
        HarnessError::InvalidParam {
            action: self.action.to_string(),
            param: name.to_string(),
            reason,
        }
    }
}

/// A named scripted operation
pub trait ActionHandler: Send + Sync {
    fn params(&self) -> &[ParamSpec];

    fn invoke(&self, ctx: &mut ActionContext<'_>, params: &Params<'_>) -> Result<ActionOutcome>;

    fn wants(&self, name: &str) -> bool {
        self.params().iter().any(|p| p.name == name)
    }
}

/// Name -> handler table, filled once at startup
#[derive(Default, Clone)]
pub struct ActionRegistry {
    handlers: BTreeMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the full built-in vocabulary
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        let key_down: Arc<dyn ActionHandler> = Arc::new(KeyDown);
        let key_up: Arc<dyn ActionHandler> = Arc::new(KeyUp);
        let key_press: Arc<dyn ActionHandler> = Arc::new(KeyPress);
        registry.register("key-down", key_down.clone());
        registry.register("mouse-down", key_down);
        registry.register("key-up", key_up.clone());
        registry.register("mouse-up", key_up);
        registry.register("key-press", key_press.clone());
        registry.register("mouse-click", key_press);
        registry.register("move", Arc::new(Move));
        registry.register("capture-and-compare", Arc::new(CaptureAndCompare));
        registry.register("succeed", Arc::new(Succeed));
        registry.register("fail", Arc::new(Fail));
        registry.register_reset("input", Arc::new(ResetInput));

        registry
    }

    /// Associate `name` with a handler; several names may share one handler
    pub fn register(&mut self, name: &str, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(name.to_string(), handler);
    }

    /// Register a hook run before every test
    pub fn register_reset(&mut self, name: &str, handler: Arc<dyn ActionHandler>) {
        self.handlers
            .insert(format!("{}{}", RESET_PREFIX, name), handler);
    }

    pub fn contains(&self, name: &str) -> bool {
        !name.starts_with(RESET_PREFIX) && self.handlers.contains_key(name)
    }

    /// User-invokable action names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers
            .keys()
            .map(String::as_str)
            .filter(|n| !n.starts_with(RESET_PREFIX))
    }

    /// Invoke `name` with `raw` filtered down to what the handler declares
    pub fn dispatch(
        &self,
        name: &str,
        raw: &toml::Table,
        ctx: &mut ActionContext<'_>,
    ) -> Result<ActionOutcome> {
        if name.starts_with(RESET_PREFIX) {
            return Err(HarnessError::UnknownAction(name.to_string()));
        }
        let handler = self
            .handlers
            .get(name)
            .ok_or_else(|| HarnessError::UnknownAction(name.to_string()))?;
        invoke(name, handler.as_ref(), raw, ctx)
    }

    pub fn dispatch_step(&self, step: &Step, ctx: &mut ActionContext<'_>) -> Result<ActionOutcome> {
        self.dispatch(&step.action, &step.params, ctx)
    }

    /// Run every reset hook
    pub fn reset_all(&self, ctx: &mut ActionContext<'_>) -> Result<()> {
        let empty = toml::Table::new();
        for (name, handler) in &self.handlers {
            if name.starts_with(RESET_PREFIX) {
                invoke(name, handler.as_ref(), &empty, ctx)?;
            }
        }
        Ok(())
    }

    /// Validate every step of `test` without side effects
    pub fn validate(&self, test: &Test, capture: &CaptureSettings) -> Result<()> {
        let mut scratch = InputState::new();
        for step in &test.steps {
            let mut ctx = ActionContext::dry(&mut scratch, capture);
            self.dispatch_step(step, &mut ctx)?;
        }
        Ok(())
    }
}

fn invoke(
    name: &str,
    handler: &dyn ActionHandler,
    raw: &toml::Table,
    ctx: &mut ActionContext<'_>,
) -> Result<ActionOutcome> {
    let mut values = toml::Table::new();
    for spec in handler.params() {
        match (spec.kind, raw.get(spec.name)) {
            (ParamKind::Context, _) => {}
            (_, Some(value)) => {
                values.insert(spec.name.to_string(), value.clone());
            }
            (ParamKind::Required, None) => {
                return Err(HarnessError::MissingParam {
                    action: name.to_string(),
                    param: spec.name.to_string(),
                });
            }
            (ParamKind::Optional, None) => {}
        }
    }

    let mut scoped = ActionContext {
        input: &mut *ctx.input,
        surface: if handler.wants(SURFACE_PARAM) {
            ctx.surface.as_mut().map(|s| &mut **s as &mut dyn Surface)
        } else {
            None
        },
        test: if handler.wants(TEST_PARAM) { ctx.test } else { None },
        capture: ctx.capture,
        dry: ctx.dry,
    };
    handler.invoke(&mut scoped, &Params::new(name, values))
}
