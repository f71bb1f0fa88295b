//! Userspace job-submission and command-stream driver for Mali-200/400.
//!
//! This crate turns GLES-style draw descriptions (linked shader pair,
//! attributes, uniforms, textures, draw calls) into the two binary command
//! streams the geometry processor executes per frame, the render-state and
//! polygon-list structures the fragment processors consume, and the
//! job-start payloads the kernel driver accepts — then runs the
//! GP-then-PP completion dance per frame across a small ring of frame
//! slots.
//!
//! Layering, bottom up:
//! - [`plb`] computes the tile/block geometry and Hilbert dispatch order.
//! - [`program`] links compiled shader pairs (see `mali-mbs` for parsing).
//! - [`cmd`], [`gp`], [`render_state`], [`pp`] encode what the hardware
//!   reads.
//! - [`frame`] and [`Context`] tie it together over a [`channel::GpuBackend`].

pub mod channel;
pub mod clear;
pub mod cmd;
mod context;
mod error;
pub mod frame;
pub mod gp;
pub mod plb;
pub mod pp;
pub mod program;
pub mod render_state;
pub mod state;
pub mod testing;
pub mod texture;

pub use channel::{DeviceChannel, GpuBackend, DEVICE_PATH};
pub use context::{
    Context, IndexBufferHandle, ProgramHandle, TextureHandle, ATTRIBUTE_POOL_SIZE,
    INDEX_POOL_SIZE, PROGRAM_POOL_SIZE, PROGRAM_SLOT_SIZE,
};
pub use error::{DeviceError, DriverError, LinkError};
pub use frame::{Frame, FrameSync, RenderStatus, FRAME_COUNT, FRAME_DRAW_LIMIT, FRAME_MEMORY_SIZE};
pub use plb::{DispatchEntry, Plb, BLOCK_SIZE, TILE_SIZE};
pub use pp::{ClearValues, RenderTarget};
pub use program::{Program, VaryingMap, VaryingSlot, MAX_VARYING_SLOTS};
pub use render_state::{RenderState, RENDER_STATE_SIZE};
pub use state::{
    BlendEquation, BlendFactor, ColorMask, CompareFunc, CullFace, DrawMode, FrontFace, GlState,
};
pub use texture::{MAX_TEXTURE_UNITS, TEXTURE_POOL_SIZE};

pub use mali_uapi::{HardwareGeneration, HardwareInfo, KernelApi};

