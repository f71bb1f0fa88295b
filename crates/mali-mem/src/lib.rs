//! GPU-visible memory arenas for the Mali-200/400 userspace stack.
//!
//! Every buffer the GPU reads (command queues, shader code, uniforms, the
//! polygon list buffer, ...) lives inside one of a handful of large regions
//! that are mapped once and addressed twice: by CPU pointer when the driver
//! writes into them, and by GPU bus address when a command stream or job
//! descriptor points at them. [`Arena`] owns one such region and hands out
//! bump-allocated sub-ranges as opaque [`Span`] handles; the two address
//! spaces are only materialized at the point of use.

mod arena;

pub use arena::{align_up, Arena, ArenaError, Span, ALLOC_ALIGN};
