//! The internal depth/stencil clear helper.
//!
//! Clearing the depth buffer mid-frame is an ordinary draw: a fullscreen
//! quad through a fixed shader pair that ships precompiled. The fragment
//! stage writes a constant and consumes nothing, so the pair goes through
//! the simplified half-link that skips varying matching and binary
//! patching.

use mali_mem::Arena;

use crate::error::DriverError;
use crate::program::Program;

/// Precompiled constant-write fragment shader, as emitted by the compiler:
/// an `MBS1` container holding one `CFRA` stage with a 28-byte code blob
/// and no symbols.
pub const CLEAR_FRAGMENT_MBS: [u8; 0x34] = [
    0x4D, 0x42, 0x53, 0x31, 0x2C, 0x00, 0x00, 0x00, // MBS1, 44 bytes
    0x43, 0x46, 0x52, 0x41, 0x24, 0x00, 0x00, 0x00, // CFRA, 36 bytes
    0x44, 0x42, 0x49, 0x4E, 0x1C, 0x00, 0x00, 0x00, // DBIN, 28 bytes
    0x00, 0x00, 0x02, 0x05, 0x1B, 0x00, 0x00, 0x00, // code
    0x00, 0x00, 0x00, 0x00, 0x3C, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xB8,
    0x00, 0x00, 0x00, 0x03,
];

/// Fullscreen quad positions for the clear draw (triangle strip, vec4).
pub const CLEAR_QUAD: [f32; 16] = [
    -1.0, -1.0, 1.0, 1.0, //
    1.0, -1.0, 1.0, 1.0, //
    -1.0, 1.0, 1.0, 1.0, //
    1.0, 1.0, 1.0, 1.0,
];

fn chunk(tag: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + payload.len());
    out.extend_from_slice(tag);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

fn symbol_entry(entry_tag: &[u8; 4], name: &str, component_count: u16) -> Vec<u8> {
    let mut name_payload = name.as_bytes().to_vec();
    name_payload.push(0);
    let mut payload = chunk(b"STRI", &name_payload);
    // Descriptor: float, vec<component_count>, highp, offset 0.
    payload.push(1); // type: float
    payload.push(0);
    payload.extend_from_slice(&component_count.to_le_bytes());
    payload.extend_from_slice(&4u16.to_le_bytes()); // wire component size
    payload.extend_from_slice(&1u16.to_le_bytes()); // entry count
    payload.extend_from_slice(&0u16.to_le_bytes()); // src stride
    payload.push(0); // dst stride
    payload.push(3); // precision
    payload.extend_from_slice(&0u32.to_le_bytes()); // flags
    payload.extend_from_slice(&0u16.to_le_bytes()); // offset
    payload.extend_from_slice(&0u16.to_le_bytes()); // index
    chunk(entry_tag, &payload)
}

fn symbol_table(table_tag: &[u8; 4], space: u32, entries: &[u8]) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend_from_slice(&1u32.to_le_bytes());
    payload.extend_from_slice(&space.to_le_bytes());
    payload.extend_from_slice(entries);
    chunk(table_tag, &payload)
}

/// The matching vertex stage: passes one position attribute straight to
/// `gl_Position`. Assembled once at first use.
pub fn clear_vertex_mbs() -> Vec<u8> {
    let mut stage = Vec::new();

    // attribute_count, varying_count, command_block_size, attribute_prefetch
    let mut params = Vec::new();
    for word in [1u32, 1, 0, 1] {
        params.extend_from_slice(&word.to_le_bytes());
    }
    stage.extend_from_slice(&chunk(b"VSTA", &params));

    stage.extend_from_slice(&symbol_table(
        b"SATT",
        16,
        &symbol_entry(b"VATT", "aPosition", 4),
    ));
    stage.extend_from_slice(&symbol_table(
        b"SVAR",
        16,
        &symbol_entry(b"VVAR", "gl_Position", 4),
    ));

    // Two instructions: load the attribute, store gl_Position.
    let code: [u8; 32] = [
        0x00, 0x00, 0x00, 0xAD, 0x14, 0x00, 0x00, 0x00, //
        0x00, 0x00, 0x00, 0x02, 0x3E, 0x00, 0x00, 0x00, //
        0x00, 0x00, 0x00, 0xAD, 0x94, 0x00, 0x00, 0x00, //
        0x00, 0x00, 0x00, 0x02, 0x3E, 0x00, 0x00, 0x00,
    ];
    stage.extend_from_slice(&chunk(b"DBIN", &code));

    chunk(b"MBS1", &chunk(b"CVER", &stage))
}

/// Parse the embedded pair and half-link them into `arena`.
pub fn build_clear_program(arena: &mut Arena) -> Result<Program, DriverError> {
    let vertex = mali_mbs::parse_mbs(&clear_vertex_mbs())?;
    let fragment = mali_mbs::parse_mbs(&CLEAR_FRAGMENT_MBS)?;
    Program::link_depth_clear(arena, vertex, fragment)
}
