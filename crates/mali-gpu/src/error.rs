use thiserror::Error;

use mali_mbs::{CompileError, MbsError};
use mali_mem::ArenaError;
use mali_uapi::notify::NotifyError;
use mali_uapi::VersionError;

/// Program-linking failures. Each is fatal to the link attempt and leaves
/// the program slot unused; other programs are unaffected.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("vertex varying {0:?} has no fragment-shader counterpart")]
    UnmatchedVaryingVertex(String),

    #[error("fragment varying {0:?} is never written by the vertex shader")]
    UnmatchedVaryingFragment(String),

    #[error("varying {name:?}: stages disagree on shape ({vertex} vs {fragment} components)")]
    VaryingShapeMismatch {
        name: String,
        vertex: u32,
        fragment: u32,
    },

    #[error("vertex shader stores to varying index {0} which has no mapping")]
    InvalidVaryingIndex(u32),

    #[error("varyings need component slot {0}, hardware packs 48")]
    TooManyVaryings(u32),
}

/// Failures talking to the kernel driver.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("opening {path}: errno {errno}")]
    Open { path: String, errno: i32 },

    #[error("ioctl {request:#010x}: errno {errno}")]
    Ioctl { request: u64, errno: i32 },

    #[error("mapping {size:#x} bytes of GPU memory: errno {errno}")]
    Mmap { size: u32, errno: i32 },

    #[error(transparent)]
    Version(#[from] VersionError),

    #[error(transparent)]
    Notify(#[from] NotifyError),
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Arena(#[from] ArenaError),

    #[error(transparent)]
    Mbs(#[from] MbsError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    /// A fixed-size slot pool (programs, textures, buffers) is full.
    #[error("all {0} slots are in use")]
    ResourceExhausted(&'static str),

    #[error("frame already holds the maximum number of draws")]
    TooManyDraws,

    #[error("no render surface configured")]
    NoSurface,

    #[error("no frame is being built; call frame_new first")]
    NoFrame,

    #[error("no program in use")]
    NoProgram,

    #[error("draw references {0} which is not bound")]
    MissingBinding(String),
}
