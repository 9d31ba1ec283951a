use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "facegate",
    about = "Enroll a face from a camera or image and verify it live",
    version
)]
pub struct Cli {
    /// Emit structured JSON to stdout instead of human-readable text
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase verbosity (may be used multiple times)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Capture or select a face and save it as an enrollment record
    Enroll(EnrollArgs),
    /// Compare live camera frames against a reference image
    Verify(VerifyArgs),
    /// Interactive session driving capture, verification and save step by step
    Session(SessionArgs),
    /// Inspect or delete stored enrollment records
    #[command(subcommand)]
    Faces(FacesCommands),
}

#[derive(Debug, Clone, Default, Args)]
pub struct CameraArgs {
    /// Video device path (e.g. /dev/video2) or index (e.g. 0)
    #[arg(long)]
    pub device: Option<String>,

    /// Requested pixel format FourCC (YUYV, MJPG, GREY, Y16)
    #[arg(long)]
    pub pixel_format: Option<String>,

    /// Frames to discard after opening the camera
    #[arg(long)]
    pub warmup_frames: Option<u32>,
}

#[derive(Debug, Clone, Args)]
pub struct EnrollArgs {
    /// Enroll from an existing image instead of the camera
    #[arg(long)]
    pub image: Option<PathBuf>,

    /// Optional label for the record
    #[arg(long, default_value = "")]
    pub alias: String,

    /// Match threshold stored with the record (20-100)
    #[arg(long)]
    pub threshold: Option<u8>,

    /// Account to link (defaults to the current user)
    #[arg(long)]
    pub user: Option<String>,

    /// Seconds to wait for a face when capturing from the camera
    #[arg(long, default_value_t = 10)]
    pub wait: u64,

    /// Directory holding enrollment records
    #[arg(long)]
    pub store_dir: Option<PathBuf>,

    #[command(flatten)]
    pub camera: CameraArgs,
}

#[derive(Debug, Clone, Args)]
pub struct VerifyArgs {
    /// Reference image containing the enrolled face
    #[arg(long)]
    pub reference: PathBuf,

    /// Confidence that must be exceeded for a match (20-100)
    #[arg(long)]
    pub threshold: Option<u8>,

    /// Seconds to keep verifying
    #[arg(long, default_value_t = 10)]
    pub duration: u64,

    #[command(flatten)]
    pub camera: CameraArgs,
}

#[derive(Debug, Clone, Args)]
pub struct SessionArgs {
    /// Directory holding enrollment records
    #[arg(long)]
    pub store_dir: Option<PathBuf>,

    #[command(flatten)]
    pub camera: CameraArgs,
}

#[derive(Debug, Clone, Subcommand)]
pub enum FacesCommands {
    /// List stored enrollment records
    List(FacesListArgs),
    /// Delete an enrollment record by id
    Remove(FacesRemoveArgs),
}

#[derive(Debug, Clone, Args)]
pub struct FacesListArgs {
    #[arg(long)]
    pub store_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct FacesRemoveArgs {
    /// Record id as printed by `faces list`
    pub id: String,

    #[arg(long)]
    pub store_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

impl From<bool> for OutputMode {
    fn from(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Human
        }
    }
}

impl Cli {
    pub fn output_mode(&self) -> OutputMode {
        OutputMode::from(self.json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enroll_defaults_to_camera_with_empty_alias() {
        let cli = Cli::try_parse_from(["facegate", "enroll", "--user", "alice"]).unwrap();
        match cli.command {
            Commands::Enroll(args) => {
                assert!(args.image.is_none());
                assert_eq!(args.alias, "");
                assert_eq!(args.wait, 10);
                assert_eq!(args.user.as_deref(), Some("alice"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_flags_work_after_subcommand() {
        let cli = Cli::try_parse_from([
            "facegate",
            "verify",
            "--reference",
            "me.png",
            "--device",
            "2",
            "--json",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.output_mode(), OutputMode::Json);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Verify(args) => assert_eq!(args.camera.device.as_deref(), Some("2")),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn faces_remove_requires_id() {
        assert!(Cli::try_parse_from(["facegate", "faces", "remove"]).is_err());
    }
}
