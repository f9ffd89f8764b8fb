//! Keyboard and mouse actions
//!
//! Mouse buttons are ordinary keys named `LMB`, `MMB` and `RMB`, so the
//! mouse-* names are plain aliases of the key-* handlers.

use std::collections::BTreeSet;

use super::{ActionContext, ActionHandler, ActionOutcome, ParamSpec, Params};
use crate::error::Result;
use crate::input::{Modifier, validate_position};

const KEY_PARAMS: &[ParamSpec] = &[ParamSpec::required("key"), ParamSpec::optional("modifiers")];

fn modifiers(params: &Params<'_>) -> Result<BTreeSet<Modifier>> {
    params
        .str_list("modifiers")?
        .iter()
        .map(|m| m.parse())
        .collect()
}

/// Press a key and leave it down
pub struct KeyDown;

impl ActionHandler for KeyDown {
    fn params(&self) -> &[ParamSpec] {
        KEY_PARAMS
    }

    fn invoke(&self, ctx: &mut ActionContext<'_>, params: &Params<'_>) -> Result<ActionOutcome> {
        let key = params.str("key")?;
        let mods = modifiers(params)?;
        if !ctx.dry {
            ctx.input.press(key, mods);
        }
        Ok(ActionOutcome::Continue)
    }
}

/// Release a key that is currently down
pub struct KeyUp;

impl ActionHandler for KeyUp {
    fn params(&self) -> &[ParamSpec] {
        KEY_PARAMS
    }

    fn invoke(&self, ctx: &mut ActionContext<'_>, params: &Params<'_>) -> Result<ActionOutcome> {
        let key = params.str("key")?;
        let mods = modifiers(params)?;
        if !ctx.dry {
            ctx.input.release(key, mods)?;
        }
        Ok(ActionOutcome::Continue)
    }
}

/// Press then immediately release
pub struct KeyPress;

impl ActionHandler for KeyPress {
    fn params(&self) -> &[ParamSpec] {
        KEY_PARAMS
    }

    fn invoke(&self, ctx: &mut ActionContext<'_>, params: &Params<'_>) -> Result<ActionOutcome> {
        let key = params.str("key")?;
        let mods = modifiers(params)?;
        if !ctx.dry {
            ctx.input.press(key, mods.clone());
            ctx.input.release(key, mods)?;
        }
        Ok(ActionOutcome::Continue)
    }
}

/// Move the cursor to a normalized `[x, y]` position
pub struct Move;

impl Move {
    fn position(params: &Params<'_>) -> Result<(f64, f64)> {
        let value = params.require("position")?;
        let bad = || params.invalid("position", format!("expected [x, y] floats, got {}", value));
        let coords = value.as_array().ok_or_else(bad)?;
        match coords.as_slice() {
            [x, y] => {
                let x = x.as_float().ok_or_else(bad)?;
                let y = y.as_float().ok_or_else(bad)?;
                Ok((x, y))
            }
            _ => Err(bad()),
        }
    }
}

impl ActionHandler for Move {
    fn params(&self) -> &[ParamSpec] {
        const PARAMS: &[ParamSpec] = &[ParamSpec::required("position")];
        PARAMS
    }

    fn invoke(&self, ctx: &mut ActionContext<'_>, params: &Params<'_>) -> Result<ActionOutcome> {
        let position = Self::position(params)?;
        validate_position(position)?;
        if !ctx.dry {
            ctx.input.move_to(position)?;
        }
        Ok(ActionOutcome::Continue)
    }
}

/// Clears queued events, held keys and the cursor before each test
pub struct ResetInput;

impl ActionHandler for ResetInput {
    fn params(&self) -> &[ParamSpec] {
        &[]
    }

    fn invoke(&self, ctx: &mut ActionContext<'_>, _params: &Params<'_>) -> Result<ActionOutcome> {
        if !ctx.dry {
            ctx.input.reset();
        }
        Ok(ActionOutcome::Continue)
    }
}
