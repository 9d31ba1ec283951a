use std::any::Any;
use std::process::ExitCode;

use crate::cli::{OutputMode, VerifyArgs};
use crate::commands::CommandHandler;
use crate::errors::AppResult;
use crate::output::render_verify;
use crate::verify::{self, VerifyOutcome};

/// Exit status when verification ran cleanly but no sample matched.
pub const NO_MATCH_EXIT_STATUS: u8 = 6;

pub struct VerifyHandler {
    args: VerifyArgs,
    run: Box<dyn Fn(&VerifyArgs) -> AppResult<VerifyOutcome> + Send + Sync>,
    render: Box<dyn Fn(&VerifyOutcome, OutputMode, bool) -> AppResult<()> + Send + Sync>,
}

impl VerifyHandler {
    pub fn new(args: VerifyArgs) -> Self {
        Self::with_dependencies(args, verify::run_verify, render_verify)
    }

    pub fn with_dependencies(
        args: VerifyArgs,
        run: impl Fn(&VerifyArgs) -> AppResult<VerifyOutcome> + Send + Sync + 'static,
        render: impl Fn(&VerifyOutcome, OutputMode, bool) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            args,
            run: Box::new(run),
            render: Box::new(render),
        }
    }
}

impl CommandHandler for VerifyHandler {
    fn execute(&self, mode: OutputMode, verbose: bool) -> AppResult<ExitCode> {
        let outcome = (self.run)(&self.args)?;
        (self.render)(&outcome, mode, verbose)?;
        if outcome.matched {
            Ok(ExitCode::SUCCESS)
        } else {
            Ok(ExitCode::from(NO_MATCH_EXIT_STATUS))
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
