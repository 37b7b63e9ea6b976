use crate::codec::CodecError;
use crate::safety::SafetyError;
use crate::section::SectionError;
use crate::transaction::TransactionError;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("no codec found for {path}")]
    NoCodec { path: String },

    #[error("{path}: {source}")]
    Codec {
        path: String,
        #[source]
        source: CodecError,
    },

    #[error("more than one section for '{path}'")]
    DuplicatePath { path: String },

    #[error("archive {}: {message}", path.display())]
    Archive { path: PathBuf, message: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsafe path '{path}': {source}")]
    UnsafePath {
        path: String,
        #[source]
        source: SafetyError,
    },

    #[error("invalid diff file: {0}")]
    Section(#[from] SectionError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

impl ReconcileError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        ReconcileError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn codec(path: &str, source: CodecError) -> Self {
        ReconcileError::Codec {
            path: path.to_string(),
            source,
        }
    }
}
