//! Kernel ABI for the Mali-200/400 device channel.
//!
//! The kernel driver consumes fixed-layout binary job-start payloads and
//! produces fixed-layout notification records, with struct revisions that
//! changed across kernel releases (r2p1/r3p0/r3p1/r3p2) and fields that
//! differ between the Mali-200 and Mali-400 fragment processors. This crate
//! is the single place those layouts live: explicit little-endian encoders
//! and decoders over byte buffers, never language-level struct layout.
//!
//! Nothing here performs I/O; the driver crate owns the file descriptor and
//! feeds these payloads through the request numbers in [`ioctl`].

pub mod gp;
pub mod ioctl;
pub mod notify;
pub mod pp;
mod version;

pub use version::{HardwareGeneration, HardwareInfo, KernelApi, VersionError};
