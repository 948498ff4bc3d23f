// Error types for archive decoding, encoding and recompilation
//
// Decode errors are fatal for the whole call. Recompile failures never escape
// the patch pipeline; they ride along in the patch outcome instead.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ArchiveError>;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("malformed container: {0}")]
    MalformedContainer(String),

    #[error("unsupported container version {major}")]
    UnsupportedVersion { major: u16 },

    #[error("legacy platform archives are detected but not decoded")]
    LegacyPlatform,

    #[error("corrupt key table: option '{option}' decoded choice index {index} but has {count} choices")]
    CorruptKeyTable {
        option: String,
        index: u32,
        count: usize,
    },

    #[error("missing resource: {0}")]
    MissingResource(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ArchiveError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        ArchiveError::MalformedContainer(msg.into())
    }

    pub(crate) fn missing(msg: impl Into<String>) -> Self {
        ArchiveError::MissingResource(msg.into())
    }
}

/// Why a recompilation fell back to the original bytecode.
#[derive(Debug, Error)]
pub enum RecompileFailure {
    #[error("failed to launch compiler '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("compiler exited with status {status:?}")]
    ExitStatus {
        status: Option<i32>,
        diagnostics: Vec<String>,
    },

    #[error("compiler timed out after {0:?}")]
    TimedOut(std::time::Duration),

    #[error("compiler produced no output file")]
    MissingOutput,

    #[error("compiler output is {len} bytes, shorter than its {header}-byte header")]
    TruncatedOutput { len: usize, header: usize },

    #[error("scratch file i/o failed: {0}")]
    Scratch(#[source] std::io::Error),

    #[error("control record rejected the bytecode: {0}")]
    Control(#[source] ArchiveError),
}
