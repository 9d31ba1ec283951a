use std::any::Any;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use crate::cli::{FacesCommands, OutputMode};
use crate::commands::CommandHandler;
use crate::config;
use crate::errors::AppResult;
use crate::faces::{self, FacesListOutcome, FacesRemoveOutcome};
use crate::output::{render_faces_list, render_faces_remove};

pub struct FacesHandler {
    command: FacesCommands,
    deps: FacesHandlerDeps,
}

pub struct FacesHandlerDeps {
    pub resolve_store_dir: Box<dyn Fn(Option<PathBuf>) -> AppResult<PathBuf> + Send + Sync>,
    pub list: Box<dyn Fn(&Path) -> AppResult<FacesListOutcome> + Send + Sync>,
    pub remove: Box<dyn Fn(&Path, &str) -> AppResult<FacesRemoveOutcome> + Send + Sync>,
    pub render_list: Box<dyn Fn(&FacesListOutcome, OutputMode) -> AppResult<()> + Send + Sync>,
    pub render_remove: Box<dyn Fn(&FacesRemoveOutcome, OutputMode) -> AppResult<()> + Send + Sync>,
}

impl FacesHandlerDeps {
    pub fn new(
        resolve_store_dir: impl Fn(Option<PathBuf>) -> AppResult<PathBuf> + Send + Sync + 'static,
        list: impl Fn(&Path) -> AppResult<FacesListOutcome> + Send + Sync + 'static,
        remove: impl Fn(&Path, &str) -> AppResult<FacesRemoveOutcome> + Send + Sync + 'static,
        render_list: impl Fn(&FacesListOutcome, OutputMode) -> AppResult<()> + Send + Sync + 'static,
        render_remove: impl Fn(&FacesRemoveOutcome, OutputMode) -> AppResult<()>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        Self {
            resolve_store_dir: Box::new(resolve_store_dir),
            list: Box::new(list),
            remove: Box::new(remove),
            render_list: Box::new(render_list),
            render_remove: Box::new(render_remove),
        }
    }
}

impl Default for FacesHandlerDeps {
    fn default() -> Self {
        Self::new(
            resolve_store_dir,
            faces::run_faces_list,
            faces::run_faces_remove,
            render_faces_list,
            render_faces_remove,
        )
    }
}

fn resolve_store_dir(cli_value: Option<PathBuf>) -> AppResult<PathBuf> {
    let config = config::load_runtime_config()?;
    Ok(config::store_dir(&config, cli_value.as_deref()))
}

impl FacesHandler {
    pub fn new(command: FacesCommands) -> Self {
        Self {
            command,
            deps: FacesHandlerDeps::default(),
        }
    }

    pub fn with_dependencies(command: FacesCommands, deps: FacesHandlerDeps) -> Self {
        Self { command, deps }
    }
}

impl CommandHandler for FacesHandler {
    fn execute(&self, mode: OutputMode, _verbose: bool) -> AppResult<ExitCode> {
        match &self.command {
            FacesCommands::List(args) => {
                let store_dir = (self.deps.resolve_store_dir)(args.store_dir.clone())?;
                let outcome = (self.deps.list)(&store_dir)?;
                (self.deps.render_list)(&outcome, mode)?;
            }
            FacesCommands::Remove(args) => {
                let store_dir = (self.deps.resolve_store_dir)(args.store_dir.clone())?;
                let outcome = (self.deps.remove)(&store_dir, &args.id)?;
                (self.deps.render_remove)(&outcome, mode)?;
            }
        }
        Ok(ExitCode::SUCCESS)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
