use std::any::Any;
use std::process::ExitCode;

use crate::cli::{Commands, OutputMode};
use crate::errors::AppResult;

pub trait CommandHandler: Send + Sync {
    fn execute(&self, mode: OutputMode, verbose: bool) -> AppResult<ExitCode>;
    fn as_any(&self) -> &dyn Any;
}

mod enroll;
mod faces;
mod session;
mod verify;

pub use enroll::EnrollHandler;
pub use faces::{FacesHandler, FacesHandlerDeps};
pub use session::SessionHandler;
pub use verify::{VerifyHandler, NO_MATCH_EXIT_STATUS};

impl From<Commands> for Box<dyn CommandHandler> {
    fn from(command: Commands) -> Self {
        match command {
            Commands::Enroll(args) => Box::new(EnrollHandler::new(args)),
            Commands::Verify(args) => Box::new(VerifyHandler::new(args)),
            Commands::Session(args) => Box::new(SessionHandler::new(args)),
            Commands::Faces(cmd) => Box::new(FacesHandler::new(cmd)),
        }
    }
}
