//! Errors of the build tool and the exit codes they map to.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Exit status after Ctrl+C, as a shell would report SIGINT.
pub const EXIT_INTERRUPTED: i32 = 130;
/// Exit status for bad arguments or environment.
pub const EXIT_USAGE: i32 = 2;
/// Exit status for everything else.
pub const EXIT_FAILURE: i32 = 1;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("unknown arch {0:?} (expected 64, 32 or ARM64)")]
    UnknownArch(String),

    #[error("invalid environment override {arg:?}: {reason}")]
    InvalidEnv { arg: String, reason: &'static str },

    #[error("expected output file after -o flag, got nothing")]
    MissingOutput,

    #[error("expand plugin list: file {path:?} is not accessible: {source}")]
    InaccessibleFile {
        path: PathBuf,
        source: io::Error,
        /// The argument before the file was a flag, so the file was probably
        /// meant as that flag's value.
        after_flag: bool,
    },

    #[error("invalid plugin spec {spec:?}: {reason}")]
    InvalidSpec { spec: String, reason: String },

    #[error("parse SOURCE_DATE_EPOCH {value:?}: {reason}")]
    SourceDateEpoch { value: String, reason: String },

    #[error("query toolchain: {0}")]
    Toolchain(String),

    #[error("resolve {spec:?}: {reason}")]
    Resolve { spec: String, reason: String },

    #[error("generate {what}: {reason}")]
    Generate { what: &'static str, reason: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("cargo build exited with status {0}")]
    BuildFailed(i32),

    #[error("interrupted")]
    Interrupted,
}

impl BuildError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::UnknownArch(_)
            | Self::InvalidEnv { .. }
            | Self::MissingOutput
            | Self::InaccessibleFile { .. }
            | Self::InvalidSpec { .. }
            | Self::SourceDateEpoch { .. }
            | Self::Toolchain(_) => EXIT_USAGE,
            Self::BuildFailed(code) => *code,
            Self::Interrupted => EXIT_INTERRUPTED,
            Self::Resolve { .. } | Self::Generate { .. } | Self::Io { .. } => EXIT_FAILURE,
        }
    }

    /// Extra hint printed after the error, if any.
    pub fn note(&self) -> Option<&'static str> {
        match self {
            Self::InaccessibleFile {
                after_flag: true, ..
            } => Some(
                "if you are trying to specify a cargo flag with a value, you must use the syntax '--flag=value' rather than '--flag value'",
            ),
            _ => None,
        }
    }
}
