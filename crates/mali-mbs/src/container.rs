//! `MBS1` shader container parsing.
//!
//! The container wraps one compiled stage: a stage block (`CVER` for
//! vertex, `CFRA` for fragment) whose payload is a sequence of tagged,
//! size-prefixed blocks — per-stage parameters, the symbol streams, and the
//! `DBIN` code blob. Blocks this driver has no use for are skipped by size.

use crate::compiler::{
    CompiledShader, FragmentParameters, ShaderStage, StageParameters, VertexParameters,
};
use crate::error::{MbsError, Tag};
use crate::symbols::{
    parse_symbol_stream, SymbolKind, SymbolTable, TAG_ATTRIBUTE_TABLE, TAG_UNIFORM_TABLE,
    TAG_VARYING_TABLE,
};

const TAG_CONTAINER: Tag = Tag(*b"MBS1");
const TAG_STAGE_VERTEX: Tag = Tag(*b"CVER");
const TAG_STAGE_FRAGMENT: Tag = Tag(*b"CFRA");
const TAG_VERTEX_PARAMETERS: Tag = Tag(*b"VSTA");
const TAG_FRAGMENT_PARAMETERS: Tag = Tag(*b"FSTA");
const TAG_BINARY: Tag = Tag(*b"DBIN");

// Present in real compiler output, not consumed here.
const TAG_FRAGMENT_DISCARD: Tag = Tag(*b"FDIS");
const TAG_FRAMEBUFFER_USE: Tag = Tag(*b"FBUU");

fn read_u32_le(bytes: &[u8], at: usize) -> Result<u32, MbsError> {
    let slice = bytes.get(at..at + 4).ok_or(MbsError::Truncated {
        at,
        need: 4,
        have: bytes.len().saturating_sub(at),
    })?;
    Ok(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

fn read_tag(bytes: &[u8], at: usize) -> Result<Tag, MbsError> {
    let slice = bytes.get(at..at + 4).ok_or(MbsError::Truncated {
        at,
        need: 4,
        have: bytes.len().saturating_sub(at),
    })?;
    Ok(Tag([slice[0], slice[1], slice[2], slice[3]]))
}

/// Parse a complete `MBS1` blob into a [`CompiledShader`].
///
/// This is the path used for shaders that ship precompiled (the driver's
/// internal helpers, dumped fixtures); the same streams arrive individually
/// when the online compiler is used.
pub fn parse_mbs(blob: &[u8]) -> Result<CompiledShader, MbsError> {
    let magic = read_tag(blob, 0)?;
    if magic != TAG_CONTAINER {
        return Err(MbsError::BadMagic(magic));
    }
    let total = read_u32_le(blob, 4)? as usize;
    let payload = blob.get(8..8 + total).ok_or(MbsError::Truncated {
        at: 8,
        need: total,
        have: blob.len().saturating_sub(8),
    })?;

    let stage_tag = read_tag(payload, 0)?;
    let stage = match stage_tag {
        TAG_STAGE_VERTEX => ShaderStage::Vertex,
        TAG_STAGE_FRAGMENT => ShaderStage::Fragment,
        found => {
            return Err(MbsError::UnexpectedTag {
                at: 8,
                expected: TAG_STAGE_FRAGMENT,
                found,
            })
        }
    };
    let stage_len = read_u32_le(payload, 4)? as usize;
    let stage_body = payload.get(8..8 + stage_len).ok_or(MbsError::Truncated {
        at: 16,
        need: stage_len,
        have: payload.len().saturating_sub(8),
    })?;

    let mut binary: Option<Vec<u8>> = None;
    let mut uniforms = SymbolTable::default();
    let mut attributes = SymbolTable::default();
    let mut varyings = SymbolTable::default();
    let mut parameters = match stage {
        ShaderStage::Vertex => StageParameters::Vertex(VertexParameters::default()),
        ShaderStage::Fragment => StageParameters::Fragment(FragmentParameters::default()),
    };

    let mut pos = 0usize;
    while pos < stage_body.len() {
        let tag = read_tag(stage_body, pos)?;
        let len = read_u32_le(stage_body, pos + 4)? as usize;
        let body = stage_body
            .get(pos + 8..pos + 8 + len)
            .ok_or(MbsError::Truncated {
                at: pos + 8,
                need: len,
                have: stage_body.len().saturating_sub(pos + 8),
            })?;
        // Symbol streams are parsed with their own chunk header included.
        let whole = &stage_body[pos..pos + 8 + len];

        match tag {
            TAG_BINARY => binary = Some(body.to_vec()),
            TAG_UNIFORM_TABLE => uniforms = parse_symbol_stream(whole, SymbolKind::Uniform)?,
            TAG_ATTRIBUTE_TABLE => attributes = parse_symbol_stream(whole, SymbolKind::Attribute)?,
            TAG_VARYING_TABLE => varyings = parse_symbol_stream(whole, SymbolKind::Varying)?,
            TAG_VERTEX_PARAMETERS => {
                if stage != ShaderStage::Vertex || len != 16 {
                    return Err(MbsError::Corrupt("misplaced VSTA block".into()));
                }
                parameters = StageParameters::Vertex(VertexParameters {
                    attribute_count: read_u32_le(body, 0)?,
                    varying_count: read_u32_le(body, 4)?,
                    command_block_size: read_u32_le(body, 8)?,
                    attribute_prefetch: read_u32_le(body, 12)?,
                });
            }
            TAG_FRAGMENT_PARAMETERS => {
                if stage != ShaderStage::Fragment || len != 44 {
                    return Err(MbsError::Corrupt("misplaced FSTA block".into()));
                }
                let mut unknown = [0u32; 10];
                for (i, slot) in unknown.iter_mut().enumerate() {
                    *slot = read_u32_le(body, 4 + i * 4)?;
                }
                parameters = StageParameters::Fragment(FragmentParameters {
                    first_instruction_size: read_u32_le(body, 0)?,
                    unknown,
                });
            }
            TAG_FRAGMENT_DISCARD | TAG_FRAMEBUFFER_USE => {}
            found => {
                return Err(MbsError::UnexpectedTag {
                    at: pos,
                    expected: TAG_BINARY,
                    found,
                })
            }
        }
        pos += 8 + len;
    }

    let binary = binary.ok_or_else(|| MbsError::Corrupt("container has no DBIN block".into()))?;

    Ok(CompiledShader {
        stage,
        binary,
        uniforms,
        attributes,
        varyings,
        parameters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(tag: &[u8; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(tag);
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn container(stage_tag: &[u8; 4], blocks: &[u8]) -> Vec<u8> {
        block(b"MBS1", &block(stage_tag, blocks))
    }

    #[test]
    fn minimal_fragment_container_parses() {
        let code = [0xAAu8; 28];
        let blob = container(b"CFRA", &block(b"DBIN", &code));
        assert_eq!(blob.len(), 0x34);

        let shader = parse_mbs(&blob).unwrap();
        assert_eq!(shader.stage, ShaderStage::Fragment);
        assert_eq!(shader.shader_size(), 28);
        assert!(shader.uniforms.is_empty());
        assert!(shader.attributes.is_empty());
        assert!(shader.varyings.is_empty());
    }

    #[test]
    fn fragment_parameters_are_extracted() {
        let code = [0u8; 16];
        let mut params = Vec::new();
        params.extend_from_slice(&6u32.to_le_bytes());
        params.extend_from_slice(&[0u8; 40]);
        let mut blocks = block(b"FSTA", &params);
        blocks.extend_from_slice(&block(b"DBIN", &code));
        let blob = container(b"CFRA", &blocks);

        let shader = parse_mbs(&blob).unwrap();
        match shader.parameters {
            StageParameters::Fragment(p) => assert_eq!(p.first_instruction_size, 6),
            other => panic!("expected fragment parameters, got {other:?}"),
        }
    }

    #[test]
    fn missing_binary_is_an_error() {
        let blob = container(b"CVER", &[]);
        assert!(matches!(parse_mbs(&blob), Err(MbsError::Corrupt(_))));
    }

    #[test]
    fn bad_magic_is_an_error() {
        let blob = block(b"MBS2", &[]);
        assert!(matches!(parse_mbs(&blob), Err(MbsError::BadMagic(_))));
    }
}
