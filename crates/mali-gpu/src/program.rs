//! Shader program linking.
//!
//! Linking reconciles a compiled vertex/fragment pair: varyings are matched
//! by name and the vertex table permuted into fragment order, shapes are
//! cross-checked, the packed varying memory layout is computed, and the
//! varying store indices inside the vertex binary are rewritten to match.
//! Both binaries then land in their program-arena slots.

use tracing::debug;

use mali_mbs::{CompiledShader, Symbol, SymbolTable, SymbolValue};
use mali_mem::{align_up, Arena, Span, ALLOC_ALIGN};

use crate::error::{DriverError, LinkError};

/// Hardware limit: 12 packed varying slots of 4 components each.
pub const MAX_VARYING_SLOTS: usize = 12;
const VARYING_COMPONENTS: usize = MAX_VARYING_SLOTS * 4;

/// Varying store operands use 0x1F as "no varying".
const VARYING_INDEX_NONE: u32 = 0x1F;

const GL_POSITION: &str = "gl_Position";
const GL_POINT_SIZE: &str = "gl_PointSize";

/// One packed varying slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VaryingSlot {
    /// Byte offset within one vertex's varying record.
    pub offset: u32,
    /// Components stored: 2 or 4.
    pub entries: u32,
    /// Bytes per component: 2 or 4.
    pub entry_size: u32,
}

/// The linker-computed varying memory layout shared by both stages.
#[derive(Clone, Debug, Default)]
pub struct VaryingMap {
    pub slots: Vec<VaryingSlot>,
    /// Per-vertex record size, 8-byte aligned.
    pub size: u32,
}

impl VaryingMap {
    /// Pack the fragment shader's varying footprints into slots.
    ///
    /// Component footprints scatter into a 12x4 table by declared offset;
    /// each 4-component group then becomes one slot sized by what landed
    /// in it.
    pub fn build(fragment_varyings: &SymbolTable) -> Result<Self, LinkError> {
        let mut components = [0u32; VARYING_COMPONENTS];
        for symbol in &fragment_varyings.symbols {
            let count = u32::from(symbol.component_count) * u32::from(symbol.entry_count);
            for i in 0..count {
                let at = u32::from(symbol.offset) + i;
                if at as usize >= VARYING_COMPONENTS {
                    return Err(LinkError::TooManyVaryings(at));
                }
                components[at as usize] = symbol.component_size();
            }
        }

        let mut slots = Vec::new();
        let mut offset = 0u32;
        for group in components.chunks_exact(4) {
            if group.iter().all(|&c| c == 0) {
                continue;
            }
            let entries = if group[2] != 0 || group[3] != 0 { 4 } else { 2 };
            let entry_size = if group.iter().any(|&c| c == 4) { 4 } else { 2 };
            let size = entries * entry_size;
            if size == 16 {
                offset = align_up(offset, 16);
            }
            slots.push(VaryingSlot {
                offset,
                entries,
                entry_size,
            });
            offset += align_up(size, 8);
        }

        Ok(VaryingMap {
            slots,
            size: align_up(offset, 8),
        })
    }
}

/// A linked program: both binaries placed in GPU memory plus everything the
/// per-draw encoders need.
#[derive(Debug)]
pub struct Program {
    pub vertex: CompiledShader,
    pub fragment: CompiledShader,
    pub varying_map: VaryingMap,
    /// Pulled out of the vertex varying table before matching.
    pub gl_position: Option<Symbol>,
    pub gl_point_size: Option<Symbol>,
    pub vertex_span: Span,
    pub fragment_span: Span,
    pub vertex_address: u32,
    pub fragment_address: u32,
}

impl Program {
    /// Full link of an application program.
    pub fn link(
        arena: &mut Arena,
        mut vertex: CompiledShader,
        fragment: CompiledShader,
    ) -> Result<Program, DriverError> {
        let (gl_position, gl_point_size, user_varyings) =
            split_builtins(std::mem::take(&mut vertex.varyings.symbols));

        // Match by name and permute into fragment order. `positions[i]`
        // is the fragment position of original vertex varying `i`.
        let fragment_varyings = &fragment.varyings;
        let mut reordered: Vec<Option<Symbol>> = vec![None; fragment_varyings.len()];
        let mut positions: Vec<Option<u32>> = Vec::new();
        for (original_index, symbol) in &user_varyings {
            let matched = fragment_varyings
                .symbols
                .iter()
                .position(|f| f.name == symbol.name)
                .ok_or_else(|| LinkError::UnmatchedVaryingVertex(symbol.name.clone()))?;
            check_shapes(symbol, &fragment_varyings.symbols[matched])?;
            if positions.len() <= *original_index {
                positions.resize(*original_index + 1, None);
            }
            positions[*original_index] =
                Some(u32::from(fragment_varyings.symbols[matched].offset) / 4);
            reordered[matched] = Some(symbol.clone());
        }
        if let Some(unmatched) = reordered.iter().position(|slot| slot.is_none()) {
            return Err(
                LinkError::UnmatchedVaryingFragment(
                    fragment_varyings.symbols[unmatched].name.clone(),
                )
                .into(),
            );
        }
        vertex.varyings.symbols = reordered.into_iter().flatten().collect();

        let varying_map = VaryingMap::build(fragment_varyings)?;

        // Builtins store past the packed slots, in dedicated area entries.
        let map_slots = varying_map.slots.len() as u32;
        let mut remap = positions;
        for (builtin, target) in [
            (&gl_position, map_slots),
            (&gl_point_size, map_slots + 1),
        ] {
            if let Some((index, _)) = builtin {
                if remap.len() <= *index {
                    remap.resize(*index + 1, None);
                }
                remap[*index] = Some(target);
            }
        }
        patch_varying_indices(&mut vertex.binary, &remap)?;

        debug!(
            varyings = varying_map.slots.len(),
            varying_stride = varying_map.size,
            "program linked"
        );

        Self::place(
            arena,
            vertex,
            fragment,
            varying_map,
            gl_position.map(|(_, s)| s),
            gl_point_size.map(|(_, s)| s),
        )
    }

    /// Half link for the internal depth-clear helper: its fragment stage
    /// consumes no varyings, so matching and binary patching are skipped.
    pub fn link_depth_clear(
        arena: &mut Arena,
        mut vertex: CompiledShader,
        fragment: CompiledShader,
    ) -> Result<Program, DriverError> {
        let (gl_position, gl_point_size, _user) =
            split_builtins(std::mem::take(&mut vertex.varyings.symbols));
        let varying_map = VaryingMap::build(&fragment.varyings)?;
        Self::place(
            arena,
            vertex,
            fragment,
            varying_map,
            gl_position.map(|(_, s)| s),
            gl_point_size.map(|(_, s)| s),
        )
    }

    fn place(
        arena: &mut Arena,
        vertex: CompiledShader,
        fragment: CompiledShader,
        varying_map: VaryingMap,
        gl_position: Option<Symbol>,
        gl_point_size: Option<Symbol>,
    ) -> Result<Program, DriverError> {
        let vertex_span = arena.alloc(align_up(vertex.binary.len() as u32, ALLOC_ALIGN))?;
        arena.write(vertex_span, 0, &vertex.binary);
        let fragment_span = arena.alloc(align_up(fragment.binary.len() as u32, ALLOC_ALIGN))?;
        arena.write(fragment_span, 0, &fragment.binary);

        Ok(Program {
            varying_map,
            gl_position,
            gl_point_size,
            vertex_span,
            fragment_span,
            vertex_address: arena.bus_address(vertex_span),
            fragment_address: arena.bus_address(fragment_span),
            vertex,
            fragment,
        })
    }

    pub fn attribute_count(&self) -> u32 {
        self.vertex.attributes.len() as u32
    }

    /// Entries in the per-draw varying descriptor area: one per packed
    /// slot, one for `gl_Position`, one more when `gl_PointSize` exists.
    pub fn area_varying_count(&self) -> u32 {
        self.varying_map.slots.len() as u32 + 1 + u32::from(self.gl_point_size.is_some())
    }
}

type IndexedSymbol = (usize, Symbol);

/// Pull `gl_Position`/`gl_PointSize` out of the vertex varying table,
/// remembering every symbol's original index for the binary patch.
fn split_builtins(
    symbols: Vec<Symbol>,
) -> (
    Option<IndexedSymbol>,
    Option<IndexedSymbol>,
    Vec<IndexedSymbol>,
) {
    let mut gl_position = None;
    let mut gl_point_size = None;
    let mut user = Vec::new();
    for (i, s) in symbols.into_iter().enumerate() {
        match s.name.as_str() {
            GL_POSITION => gl_position = Some((i, s)),
            GL_POINT_SIZE => gl_point_size = Some((i, s)),
            _ => user.push((i, s)),
        }
    }
    (gl_position, gl_point_size, user)
}

/// Shapes must agree bit for bit once precision is factored out; the
/// cross-multiplied check is symmetric in the two stages.
fn check_shapes(vertex: &Symbol, fragment: &Symbol) -> Result<(), LinkError> {
    let sizes_match = (u64::from(fragment.component_size()) << vertex.precision)
        == (u64::from(vertex.component_size()) << fragment.precision);
    if vertex.component_count != fragment.component_count
        || vertex.entry_count != fragment.entry_count
        || !sizes_match
    {
        return Err(LinkError::VaryingShapeMismatch {
            name: vertex.name.clone(),
            vertex: u32::from(vertex.component_count),
            fragment: u32::from(fragment.component_count),
        });
    }
    Ok(())
}

/// Rewrite the immediate varying-index operands in a vertex binary.
///
/// Instructions are 16-byte words; operand A's index sits in bits [30:26]
/// of the third 32-bit word, operand B's low bit is bit 31 of the same
/// word with the high bits in bits [4:1] of the fourth.
fn patch_varying_indices(binary: &mut [u8], remap: &[Option<u32>]) -> Result<(), LinkError> {
    let lookup = |index: u32| -> Result<u32, LinkError> {
        remap
            .get(index as usize)
            .copied()
            .flatten()
            .ok_or(LinkError::InvalidVaryingIndex(index))
    };

    for instruction in binary.chunks_exact_mut(16) {
        let mut w2 = u32::from_le_bytes(instruction[8..12].try_into().unwrap());
        let mut w3 = u32::from_le_bytes(instruction[12..16].try_into().unwrap());

        let a = (w2 >> 26) & 0x1F;
        if a != VARYING_INDEX_NONE {
            let n = lookup(a)?;
            w2 = (w2 & !(0x1F << 26)) | (n << 26);
        }

        let b = ((w2 >> 31) & 1) | (((w3 >> 1) & 0xF) << 1);
        if b != VARYING_INDEX_NONE {
            let n = lookup(b)?;
            w2 = (w2 & !(1 << 31)) | ((n & 1) << 31);
            w3 = (w3 & !(0xF << 1)) | (((n >> 1) & 0xF) << 1);
        }

        instruction[8..12].copy_from_slice(&w2.to_le_bytes());
        instruction[12..16].copy_from_slice(&w3.to_le_bytes());
    }
    Ok(())
}

/// Gather a symbol table's staged values into one staging buffer laid out
/// by symbol offset.
pub fn gather_uniforms(table: &SymbolTable) -> Option<Vec<u8>> {
    if table.is_empty() {
        return None;
    }
    let mut buf = vec![0u8; table.space_needed as usize];
    for symbol in &table.symbols {
        if let SymbolValue::Data(data) = &symbol.value {
            let at = symbol.offset as usize * symbol.component_size() as usize;
            if at >= buf.len() {
                continue;
            }
            let n = data.len().min(buf.len() - at);
            buf[at..at + n].copy_from_slice(&data[..n]);
        }
    }
    Some(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mali_mbs::{ShaderStage, StageParameters, SymbolKind, ValueType, VertexParameters};

    pub(crate) fn varying(name: &str, components: u16, offset: u16) -> Symbol {
        Symbol {
            name: name.into(),
            kind: SymbolKind::Varying,
            value_type: ValueType::Float,
            precision: 3,
            component_count: components,
            entry_count: 1,
            src_stride: 0,
            dst_stride: 0,
            flags: 0,
            offset,
            index: 0,
            value: SymbolValue::None,
        }
    }

    fn shader(stage: ShaderStage, binary: Vec<u8>, varyings: Vec<Symbol>) -> CompiledShader {
        CompiledShader {
            stage,
            binary,
            uniforms: SymbolTable::default(),
            attributes: SymbolTable::default(),
            varyings: SymbolTable {
                symbols: varyings,
                space_needed: 0,
            },
            parameters: match stage {
                ShaderStage::Vertex => StageParameters::Vertex(VertexParameters::default()),
                ShaderStage::Fragment => {
                    StageParameters::Fragment(mali_mbs::FragmentParameters::default())
                }
            },
        }
    }

    /// A 16-byte instruction storing to varying `a`, with operand B unused.
    fn store_instruction(a: u32) -> [u8; 16] {
        let mut out = [0u8; 16];
        let w2 = (a << 26) | (1 << 31); // B low bit set...
        let w3: u32 = 0x1F >> 1 << 1; // ...and B high bits all set -> index 0x1F
        out[8..12].copy_from_slice(&w2.to_le_bytes());
        out[12..16].copy_from_slice(&w3.to_le_bytes());
        out
    }

    #[test]
    fn single_vec4_varying_maps_to_one_full_slot() {
        let map = VaryingMap::build(&SymbolTable {
            symbols: vec![varying("vColor", 4, 0)],
            space_needed: 16,
        })
        .unwrap();
        assert_eq!(map.slots.len(), 1);
        assert_eq!(map.slots[0].offset, 0);
        assert_eq!(map.slots[0].entries, 4);
        assert_eq!(map.slots[0].entry_size, 4);
        assert_eq!(map.size, 16);
    }

    #[test]
    fn varying_map_offsets_never_overlap() {
        let mut v0 = varying("a", 2, 0);
        v0.precision = 2; // half floats
        let v1 = varying("b", 4, 4);
        let v2 = varying("c", 2, 8);
        let map = VaryingMap::build(&SymbolTable {
            symbols: vec![v0, v1, v2],
            space_needed: 0,
        })
        .unwrap();

        let mut last_end = 0;
        for slot in &map.slots {
            assert!(slot.offset >= last_end, "slot {slot:?} overlaps");
            last_end = slot.offset + align_up(slot.entries * slot.entry_size, 8);
        }
        assert!(map.size >= last_end);
        assert_eq!(map.size % 8, 0);
    }

    #[test]
    fn link_matches_by_name_and_reorders() {
        let mut arena = Arena::host("program", 0x1000_0000, 0x10000);
        let vertex = shader(
            ShaderStage::Vertex,
            store_instruction(0).to_vec(),
            vec![
                varying("vA", 4, 0),
                varying("vB", 4, 4),
                varying("gl_Position", 4, 0),
            ],
        );
        // Fragment consumes them in the opposite order.
        let fragment = shader(
            ShaderStage::Fragment,
            vec![0u8; 16],
            vec![varying("vB", 4, 0), varying("vA", 4, 4)],
        );

        let program = Program::link(&mut arena, vertex, fragment).unwrap();
        assert_eq!(program.varying_map.slots.len(), 2);
        assert_eq!(
            program
                .vertex
                .varyings
                .symbols
                .iter()
                .map(|s| s.name.as_str())
                .collect::<Vec<_>>(),
            vec!["vB", "vA"]
        );
        assert!(program.gl_position.is_some());
        // vA (vertex index 0) now stores to fragment slot 1.
        let w2 = u32::from_le_bytes(
            arena.span_bytes(program.vertex_span)[8..12]
                .try_into()
                .unwrap(),
        );
        assert_eq!((w2 >> 26) & 0x1F, 1);
    }

    #[test]
    fn unmatched_vertex_varying_fails() {
        let mut arena = Arena::host("program", 0, 0x10000);
        let vertex = shader(
            ShaderStage::Vertex,
            vec![],
            vec![varying("vOnlyInVertex", 4, 0)],
        );
        let fragment = shader(ShaderStage::Fragment, vec![], vec![]);
        match Program::link(&mut arena, vertex, fragment) {
            Err(DriverError::Link(LinkError::UnmatchedVaryingVertex(name))) => {
                assert_eq!(name, "vOnlyInVertex")
            }
            other => panic!("expected unmatched-vertex error, got {other:?}"),
        }
    }

    #[test]
    fn unreferenced_fragment_varying_fails() {
        let mut arena = Arena::host("program", 0, 0x10000);
        let vertex = shader(ShaderStage::Vertex, vec![], vec![]);
        let fragment = shader(
            ShaderStage::Fragment,
            vec![],
            vec![varying("vNeverWritten", 4, 0)],
        );
        assert!(matches!(
            Program::link(&mut arena, vertex, fragment),
            Err(DriverError::Link(LinkError::UnmatchedVaryingFragment(_)))
        ));
    }

    #[test]
    fn shape_check_is_symmetric() {
        // Differing precision alone is accounted for by the cross-multiply
        // and passes from either side.
        let v = varying("v", 4, 0); // highp, 4-byte components
        let mut f = varying("v", 4, 0);
        f.precision = 2; // mediump, 2-byte components
        assert!(check_shapes(&v, &f).is_ok());
        assert!(check_shapes(&f, &v).is_ok());

        // A real shape difference is rejected from either side.
        let vec3 = varying("v", 3, 0);
        assert!(check_shapes(&v, &vec3).is_err());
        assert!(check_shapes(&vec3, &v).is_err());

        let mut array = varying("v", 4, 0);
        array.entry_count = 2;
        assert!(check_shapes(&v, &array).is_err());
        assert!(check_shapes(&array, &v).is_err());
    }

    #[test]
    fn patch_rejects_unmapped_indices() {
        let mut binary = store_instruction(2).to_vec();
        let remap = vec![Some(0), Some(1)]; // no entry for 2
        assert!(matches!(
            patch_varying_indices(&mut binary, &remap),
            Err(LinkError::InvalidVaryingIndex(2))
        ));
    }
}
