use std::path::PathBuf;

use facegate_cli::cli::{
    CameraArgs, Commands, EnrollArgs, FacesCommands, FacesListArgs, SessionArgs, VerifyArgs,
};
use facegate_cli::commands::{
    CommandHandler, EnrollHandler, FacesHandler, SessionHandler, VerifyHandler,
};

fn sample_enroll_args() -> EnrollArgs {
    EnrollArgs {
        image: None,
        alias: String::new(),
        threshold: None,
        user: Some("alice".into()),
        wait: 10,
        store_dir: None,
        camera: CameraArgs::default(),
    }
}

fn assert_dispatch<T: 'static>(command: Commands)
where
    T: CommandHandler,
{
    let handler: Box<dyn CommandHandler> = command.into();
    assert!(handler.as_any().is::<T>());
}

#[test]
fn enroll_command_dispatches_enroll_handler() {
    assert_dispatch::<EnrollHandler>(Commands::Enroll(sample_enroll_args()));
}

#[test]
fn verify_command_dispatches_verify_handler() {
    assert_dispatch::<VerifyHandler>(Commands::Verify(VerifyArgs {
        reference: PathBuf::from("me.png"),
        threshold: None,
        duration: 10,
        camera: CameraArgs::default(),
    }));
}

#[test]
fn session_command_dispatches_session_handler() {
    assert_dispatch::<SessionHandler>(Commands::Session(SessionArgs {
        store_dir: None,
        camera: CameraArgs::default(),
    }));
}

#[test]
fn faces_command_dispatches_faces_handler() {
    assert_dispatch::<FacesHandler>(Commands::Faces(FacesCommands::List(FacesListArgs {
        store_dir: None,
    })));
}
