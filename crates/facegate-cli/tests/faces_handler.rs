use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use facegate_cli::cli::{FacesCommands, FacesListArgs, FacesRemoveArgs, OutputMode};
use facegate_cli::commands::{CommandHandler, FacesHandler, FacesHandlerDeps};
use facegate_cli::errors::AppError;
use facegate_cli::faces::{FacesListOutcome, FacesRemoveOutcome};
use facegate_core::SessionError;

#[test]
fn faces_list_uses_resolved_store_dir() {
    let listed = Arc::new(Mutex::new(Vec::new()));
    let deps = FacesHandlerDeps::new(
        |dir| Ok(dir.unwrap_or_else(|| PathBuf::from("/var/lib/facegate/faces"))),
        {
            let listed = Arc::clone(&listed);
            move |dir| {
                listed.lock().unwrap().push(dir.to_path_buf());
                Ok(FacesListOutcome {
                    store_dir: dir.to_path_buf(),
                    records: vec![],
                })
            }
        },
        |_dir, _id| panic!("remove should not run"),
        |outcome, mode| {
            assert!(outcome.records.is_empty());
            assert_eq!(mode, OutputMode::Human);
            Ok(())
        },
        |_outcome, _mode| panic!("remove render should not run"),
    );

    let handler = FacesHandler::with_dependencies(
        FacesCommands::List(FacesListArgs { store_dir: None }),
        deps,
    );

    assert_eq!(handler.execute(OutputMode::Human, false).unwrap(), ExitCode::SUCCESS);
    assert_eq!(
        listed.lock().unwrap().as_slice(),
        &[PathBuf::from("/var/lib/facegate/faces")]
    );
}

#[test]
fn faces_remove_passes_id_and_renders_removal() {
    let rendered = Arc::new(Mutex::new(None));
    let deps = FacesHandlerDeps::new(
        |dir| Ok(dir.unwrap()),
        |_dir| panic!("list should not run"),
        |dir, id| {
            Ok(FacesRemoveOutcome {
                id: id.to_string(),
                removed: dir.join(format!("{id}.face")),
            })
        },
        |_outcome, _mode| panic!("list render should not run"),
        {
            let rendered = Arc::clone(&rendered);
            move |outcome, _mode| {
                *rendered.lock().unwrap() = Some(outcome.removed.clone());
                Ok(())
            }
        },
    );

    let handler = FacesHandler::with_dependencies(
        FacesCommands::Remove(FacesRemoveArgs {
            id: "abc".into(),
            store_dir: Some(PathBuf::from("/tmp/faces")),
        }),
        deps,
    );

    handler.execute(OutputMode::Json, false).unwrap();
    assert_eq!(
        rendered.lock().unwrap().clone(),
        Some(PathBuf::from("/tmp/faces/abc.face"))
    );
}

#[test]
fn faces_remove_surfaces_store_errors() {
    let deps = FacesHandlerDeps::new(
        |dir| Ok(dir.unwrap_or_default()),
        |_dir| panic!("list should not run"),
        |_dir, id| Err(SessionError::Validation(format!("no enrollment with id {id}")).into()),
        |_outcome, _mode| Ok(()),
        |_outcome, _mode| panic!("render should not run"),
    );

    let handler = FacesHandler::with_dependencies(
        FacesCommands::Remove(FacesRemoveArgs {
            id: "missing".into(),
            store_dir: None,
        }),
        deps,
    );

    match handler.execute(OutputMode::Human, false).unwrap_err() {
        AppError::Session(SessionError::Validation(message)) => {
            assert!(message.contains("missing"))
        }
        other => panic!("unexpected error: {other}"),
    }
}
