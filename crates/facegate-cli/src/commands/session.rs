use std::any::Any;
use std::process::ExitCode;

use crate::cli::{OutputMode, SessionArgs};
use crate::commands::CommandHandler;
use crate::errors::AppResult;
use crate::interactive::{self, SessionSummary};
use crate::output::render_session_summary;

pub struct SessionHandler {
    args: SessionArgs,
    run: Box<dyn Fn(&SessionArgs, OutputMode) -> AppResult<SessionSummary> + Send + Sync>,
    render: Box<dyn Fn(&SessionSummary, OutputMode) -> AppResult<()> + Send + Sync>,
}

impl SessionHandler {
    pub fn new(args: SessionArgs) -> Self {
        Self::with_dependencies(args, interactive::run_session, render_session_summary)
    }

    pub fn with_dependencies(
        args: SessionArgs,
        run: impl Fn(&SessionArgs, OutputMode) -> AppResult<SessionSummary> + Send + Sync + 'static,
        render: impl Fn(&SessionSummary, OutputMode) -> AppResult<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            args,
            run: Box::new(run),
            render: Box::new(render),
        }
    }
}

impl CommandHandler for SessionHandler {
    fn execute(&self, mode: OutputMode, _verbose: bool) -> AppResult<ExitCode> {
        let summary = (self.run)(&self.args, mode)?;
        (self.render)(&summary, mode)?;
        Ok(ExitCode::SUCCESS)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
