//! Script flow: end a test early, either way

use super::{ActionContext, ActionHandler, ActionOutcome, ParamSpec, Params};
use crate::error::{HarnessError, Result};

pub struct Succeed;

impl ActionHandler for Succeed {
    fn params(&self) -> &[ParamSpec] {
        &[]
    }

    fn invoke(&self, _ctx: &mut ActionContext<'_>, _params: &Params<'_>) -> Result<ActionOutcome> {
        Ok(ActionOutcome::Succeed)
    }
}

pub struct Fail;

impl ActionHandler for Fail {
    fn params(&self) -> &[ParamSpec] {
        const PARAMS: &[ParamSpec] = &[ParamSpec::optional("reason")];
        PARAMS
    }

    fn invoke(&self, ctx: &mut ActionContext<'_>, params: &Params<'_>) -> Result<ActionOutcome> {
        let reason = params.opt_str("reason")?.unwrap_or("fail action reached");
        if ctx.dry {
            return Ok(ActionOutcome::Continue);
        }
        Err(HarnessError::Failed(reason.to_string()))
    }
}
