//! Texture objects and the per-draw descriptor list.
//!
//! A texture owns a 0x40-byte hardware descriptor plus its texel storage,
//! both in the long-lived auxiliary arena. Draws reference textures through
//! a list of descriptor bus addresses; the render state carries the list
//! address and count. Texels are uploaded linearly; the tiled/swizzled
//! layouts the hardware also supports are not produced here.

use mali_mem::{align_up, Arena, Span, ALLOC_ALIGN};
use mali_uapi::pp::PixelFormat;

use crate::error::DriverError;

/// Sampler slots addressable by one draw.
pub const MAX_TEXTURE_UNITS: usize = 8;

/// Context-wide texture slot pool.
pub const TEXTURE_POOL_SIZE: usize = 32;

const DESCRIPTOR_SIZE: u32 = 0x40;

/// Descriptor word 0: linear (non-swizzled) texel layout.
const LAYOUT_LINEAR: u32 = 0x40;

#[derive(Debug)]
pub struct Texture {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub descriptor_span: Span,
    pub descriptor_address: u32,
    pub data_span: Span,
}

/// Upload `pixels` and build the texture's descriptor.
pub fn upload(
    arena: &mut Arena,
    width: u32,
    height: u32,
    format: PixelFormat,
    pixels: &[u8],
) -> Result<Texture, DriverError> {
    let size = width * height * format.bytes_per_pixel();
    debug_assert_eq!(pixels.len() as u32, size);

    let data_span = arena.alloc(align_up(size, ALLOC_ALIGN))?;
    arena.write(data_span, 0, pixels);
    let data_address = arena.bus_address(data_span);

    let descriptor_span = arena.alloc(DESCRIPTOR_SIZE)?;
    let words = [
        format as u32 | LAYOUT_LINEAR,
        (width - 1) | ((height - 1) << 16),
        data_address,
    ];
    for (i, w) in words.iter().enumerate() {
        arena.write(descriptor_span, (i * 4) as u32, &w.to_le_bytes());
    }

    Ok(Texture {
        width,
        height,
        format,
        descriptor_span,
        descriptor_address: arena.bus_address(descriptor_span),
        data_span,
    })
}
