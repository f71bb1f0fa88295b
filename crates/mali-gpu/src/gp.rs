//! Geometry-processor command-queue encoding.
//!
//! The VS and PLBU queues are built per frame: the PLBU gets its tiling
//! setup once at frame start, each draw appends one fixed VS sequence and
//! one mostly-fixed PLBU sequence (viewport/scissor/depth state re-emitted
//! only when dirty), and a single END record closes the PLBU stream at
//! flush. Ordering here is not negotiable; the front-ends execute these
//! queues verbatim.

use mali_uapi::HardwareGeneration;

use crate::cmd::{plbu, vs};
use crate::error::DriverError;
use crate::frame::{Draw, Frame};
use crate::plb::Plb;
use crate::program::Program;
use crate::state::GlState;

pub struct GpEncoder {
    pub generation: HardwareGeneration,
}

impl GpEncoder {
    pub fn new(generation: HardwareGeneration) -> Self {
        Self { generation }
    }

    /// Frame-level PLBU setup, emitted once before any draw.
    pub fn frame_setup(&self, frame: &mut Frame, plb: &Plb) -> Result<(), DriverError> {
        let arena = &mut frame.arena;
        let queue = &mut frame.plbu;

        // Mali-400 packs the merged-block step into the high nibble.
        let block_step = match self.generation {
            HardwareGeneration::Mali200 => (plb.shift_h << 16) | plb.shift_w,
            HardwareGeneration::Mali400 => {
                (plb.shift_max << 28) | (plb.shift_h << 16) | plb.shift_w
            }
        };
        queue.push(arena, block_step, plbu::BLOCK_STEP)?;
        queue.push(
            arena,
            ((plb.tiled_w - 1) << 24) | ((plb.tiled_h - 1) << 8),
            plbu::TILED_DIMENSIONS,
        )?;
        queue.push(arena, plb.block_w, plbu::BLOCK_STRIDE)?;

        let array_address = arena.bus_address(frame.plbu_array);
        queue.push(
            arena,
            array_address,
            plbu::ARRAY_ADDRESS | (plb.blocks() - 1),
        )?;

        let heap_start = arena.bus_address(frame.tile_heap);
        let heap_end = heap_start + frame.tile_heap.len();
        queue.push(arena, heap_start, plbu::TILE_HEAP_START)?;
        queue.push(arena, heap_end, plbu::TILE_HEAP_END)?;
        Ok(())
    }

    /// Append one draw to both queues.
    pub fn record_draw(
        &self,
        frame: &mut Frame,
        draw: &Draw,
        program: &Program,
        state: &mut GlState,
    ) -> Result<(), DriverError> {
        self.vs_draw(frame, draw, program)?;
        self.plbu_draw(frame, draw, state)
    }

    fn vs_draw(&self, frame: &mut Frame, draw: &Draw, program: &Program) -> Result<(), DriverError> {
        let arena = &mut frame.arena;
        let queue = &mut frame.vs;
        let indexed = draw.indices.is_some();

        // An indexed draw's semaphore transition is driven from the PLBU
        // side instead.
        if !indexed {
            queue.push(arena, vs::SEMAPHORE_BEGIN_1, vs::SEMAPHORE)?;
            queue.push(arena, vs::SEMAPHORE_BEGIN_2, vs::SEMAPHORE)?;
        }

        let shader_words = (program.vertex.binary.len() as u32).div_ceil(16);
        queue.push(
            arena,
            program.vertex_address,
            vs::SHADER_ADDRESS | shader_words,
        )?;

        let prefetch = program
            .vertex
            .vertex_parameters()
            .map(|p| p.attribute_prefetch)
            .unwrap_or(0);
        queue.push(
            arena,
            (prefetch << 20) | ((shader_words.max(1) - 1) << 10),
            vs::SHADER_INFO,
        )?;

        let attribute_count = program.attribute_count();
        let varying_count = program.area_varying_count();
        queue.push(
            arena,
            ((varying_count.max(1) - 1) << 8) | ((attribute_count.max(1) - 1) << 24),
            vs::VARYING_ATTRIBUTE_COUNT,
        )?;

        if let Some((span, size)) = draw.vs_uniforms {
            let address = arena.bus_address(span);
            queue.push(arena, address, vs::UNIFORMS_ADDRESS | ((size / 4) << 12))?;
        }

        match self.generation {
            HardwareGeneration::Mali200 => {
                // One combined table: attributes then varyings.
                let address = arena.bus_address(draw.attribute_area);
                queue.push(
                    arena,
                    address,
                    vs::COMMON_AREA_ADDRESS
                        | ((attribute_count + varying_count) << vs::AREA_COUNT_SHIFT),
                )?;
            }
            HardwareGeneration::Mali400 => {
                let attributes = arena.bus_address(draw.attribute_area);
                queue.push(
                    arena,
                    attributes,
                    vs::ATTRIBUTES_ADDRESS | (attribute_count << vs::AREA_COUNT_SHIFT),
                )?;
                let varyings = arena.bus_address(draw.varying_area) + draw.varying_area_offset;
                queue.push(
                    arena,
                    varyings,
                    vs::VARYINGS_ADDRESS | (varying_count << vs::AREA_COUNT_SHIFT),
                )?;
            }
        }

        queue.push(arena, 3, vs::MARKER)?;

        let (value, opcode) = vs::draw(draw.vertex_count, indexed);
        queue.push(arena, value, opcode)?;
        queue.push(arena, 0, vs::FLUSH)?;

        let end = if indexed {
            vs::SEMAPHORE_NEXT
        } else {
            vs::SEMAPHORE_END
        };
        queue.push(arena, end, vs::SEMAPHORE)?;
        Ok(())
    }

    fn plbu_draw(
        &self,
        frame: &mut Frame,
        draw: &Draw,
        state: &mut GlState,
    ) -> Result<(), DriverError> {
        let arena = &mut frame.arena;
        let queue = &mut frame.plbu;
        let indexed = draw.indices.is_some();

        if !indexed {
            queue.push(arena, plbu::SEMAPHORE_BEGIN, plbu::SEMAPHORE)?;
        }

        let mut primitive = plbu::PRIMITIVE_BASE | state.cull_bits();
        if let Some(indices) = &draw.indices {
            primitive |= indices.index_size << plbu::INDEX_SIZE_SHIFT;
        }
        queue.push(arena, primitive, plbu::PRIMITIVE_SETUP)?;

        let render_state = arena.bus_address(draw.render_state);
        let gl_position = arena.bus_address(draw.gl_position);
        queue.push(
            arena,
            render_state,
            plbu::RSW_VERTEX_ARRAY | (gl_position >> 4),
        )?;

        let viewport_dirty = state.take_viewport_dirty();
        if viewport_dirty {
            let v = state.viewport;
            queue.push(arena, v.x.to_bits(), plbu::VIEWPORT_LEFT)?;
            queue.push(arena, (v.x + v.w).to_bits(), plbu::VIEWPORT_RIGHT)?;
            queue.push(arena, v.y.to_bits(), plbu::VIEWPORT_BOTTOM)?;
            queue.push(arena, (v.y + v.h).to_bits(), plbu::VIEWPORT_TOP)?;
        }

        let scissor_dirty = state.take_scissor_dirty();
        if scissor_dirty {
            let s = state.scissor;
            let (value, opcode) = plbu::scissor(s.x, s.x + s.w, s.y, s.y + s.h);
            queue.push(arena, value, opcode)?;
        }

        // Re-emitting both viewport and scissor invalidates the depth
        // state in the PLBU; re-emit it as well.
        if viewport_dirty && scissor_dirty {
            state.mark_depth_dirty();
        }

        if state.take_depth_dirty() {
            queue.push(arena, state.depth_near.to_bits(), plbu::DEPTH_RANGE_NEAR)?;
            queue.push(arena, state.depth_far.to_bits(), plbu::DEPTH_RANGE_FAR)?;
            queue.push(arena, 0x0000_0000, plbu::LOW_PRIM_SIZE)?;
        }

        if let Some(indices) = &draw.indices {
            queue.push(arena, gl_position, plbu::INDEXED_DEST)?;
            if let Some(point_size) = draw.point_size {
                let address = arena.bus_address(point_size);
                queue.push(arena, address, plbu::INDEXED_POINT_SIZE)?;
            }
            queue.push(arena, indices.address, plbu::INDICES)?;
        } else {
            let (value, opcode) =
                plbu::draw_arrays(draw.mode.hw(), draw.vertex_start, draw.vertex_count);
            queue.push(arena, value, opcode)?;
        }

        queue.push(arena, plbu::SEMAPHORE_END, plbu::SEMAPHORE)?;

        if let Some(indices) = &draw.indices {
            let (value, opcode) = plbu::draw_elements(draw.mode.hw(), 0, indices.element_count);
            queue.push(arena, value, opcode)?;
        }
        Ok(())
    }

    /// Close the PLBU stream; no draws may follow.
    pub fn finish(&self, frame: &mut Frame) -> Result<(), DriverError> {
        if frame.plbu_finished {
            return Ok(());
        }
        frame.plbu.push(&mut frame.arena, 0, plbu::END)?;
        frame.plbu_finished = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameSync, IndexRange, FRAME_MEMORY_SIZE};
    use pretty_assertions::assert_eq;
    use crate::render_state::RenderState;
    use crate::state::DrawMode;
    use mali_mem::Arena;
    use std::sync::Arc;

    fn test_frame(generation: HardwareGeneration) -> (Frame, Plb) {
        let arena = Arena::host("frame", 0x4000_0000, FRAME_MEMORY_SIZE);
        let plb = Plb::new(128, 128, generation);
        let frame = Frame::new(0, arena, Arc::new(FrameSync::new()), &plb, 1).unwrap();
        (frame, plb)
    }

    fn test_program(arena: &mut Arena) -> Program {
        use mali_mbs::{
            CompiledShader, FragmentParameters, ShaderStage, StageParameters, SymbolTable,
            VertexParameters,
        };
        let vertex = CompiledShader {
            stage: ShaderStage::Vertex,
            binary: vec![0u8; 64],
            uniforms: SymbolTable::default(),
            attributes: SymbolTable::default(),
            varyings: SymbolTable::default(),
            parameters: StageParameters::Vertex(VertexParameters {
                attribute_prefetch: 2,
                ..VertexParameters::default()
            }),
        };
        let fragment = CompiledShader {
            stage: ShaderStage::Fragment,
            binary: vec![0u8; 32],
            uniforms: SymbolTable::default(),
            attributes: SymbolTable::default(),
            varyings: SymbolTable::default(),
            parameters: StageParameters::Fragment(FragmentParameters::default()),
        };
        Program::link_depth_clear(arena, vertex, fragment).unwrap()
    }

    fn test_draw(frame: &mut Frame, indexed: bool) -> Draw {
        let render_state = frame.arena.alloc(0x40).unwrap();
        frame
            .arena
            .write(render_state, 0, &RenderState::default().encode_le());
        let attribute_area = frame.arena.alloc(0x40).unwrap();
        let gl_position = frame.arena.alloc(0x40).unwrap();
        Draw {
            mode: DrawMode::Triangles,
            vertex_start: 0,
            vertex_count: 3,
            indices: indexed.then(|| IndexRange {
                address: 0x4800_0000,
                index_size: 2,
                element_count: 3,
            }),
            render_state,
            vs_uniforms: None,
            attribute_area,
            varying_area: attribute_area,
            varying_area_offset: 0,
            varyings: None,
            gl_position,
            point_size: None,
            textures: None,
        }
    }

    #[test]
    fn vs_sequence_order_is_fixed() {
        let (mut frame, _plb) = test_frame(HardwareGeneration::Mali400);
        let mut program_arena = Arena::host("program", 0x1000_0000, 0x10000);
        let program = test_program(&mut program_arena);
        let mut state = GlState::new(128, 128);
        let encoder = GpEncoder::new(HardwareGeneration::Mali400);

        let draw = test_draw(&mut frame, false);
        encoder.record_draw(&mut frame, &draw, &program, &mut state).unwrap();

        let records = frame.vs.records(&frame.arena);
        let opcodes: Vec<u32> = records.iter().map(|r| r.1).collect();
        assert_eq!(
            opcodes,
            vec![
                vs::SEMAPHORE,
                vs::SEMAPHORE,
                vs::SHADER_ADDRESS | 4, // 64-byte binary = 4 instruction words
                vs::SHADER_INFO,
                vs::VARYING_ATTRIBUTE_COUNT,
                vs::ATTRIBUTES_ADDRESS,
                vs::VARYINGS_ADDRESS | (1 << vs::AREA_COUNT_SHIFT),
                vs::MARKER,
                (3 >> 8) << 24, // draw record opcode
                vs::FLUSH,
                vs::SEMAPHORE,
            ]
        );
        // Unindexed draws close with SEMAPHORE_END.
        assert_eq!(records.last().unwrap().0, vs::SEMAPHORE_END);
        // Shader info packs the prefetch and size.
        assert_eq!(records[3].0, (2 << 20) | (3 << 10));
    }

    #[test]
    fn indexed_draw_skips_vs_semaphore_begin_and_ends_with_next() {
        let (mut frame, _plb) = test_frame(HardwareGeneration::Mali400);
        let mut program_arena = Arena::host("program", 0x1000_0000, 0x10000);
        let program = test_program(&mut program_arena);
        let mut state = GlState::new(128, 128);
        let encoder = GpEncoder::new(HardwareGeneration::Mali400);

        let draw = test_draw(&mut frame, true);
        encoder.record_draw(&mut frame, &draw, &program, &mut state).unwrap();

        let records = frame.vs.records(&frame.arena);
        // No semaphore-begin pair at the head.
        assert_eq!(records[0].1, vs::SHADER_ADDRESS | 4);
        assert_eq!(records.last().unwrap(), &(vs::SEMAPHORE_NEXT, vs::SEMAPHORE));
    }

    #[test]
    fn mali200_uses_one_common_area_command() {
        let (mut frame, _plb) = test_frame(HardwareGeneration::Mali200);
        let mut program_arena = Arena::host("program", 0x1000_0000, 0x10000);
        let program = test_program(&mut program_arena);
        let mut state = GlState::new(128, 128);
        let encoder = GpEncoder::new(HardwareGeneration::Mali200);

        let draw = test_draw(&mut frame, false);
        encoder.record_draw(&mut frame, &draw, &program, &mut state).unwrap();

        let records = frame.vs.records(&frame.arena);
        let area_commands: Vec<&(u32, u32)> = records
            .iter()
            .filter(|r| r.1 & 0xF000_0000 == vs::COMMON_AREA_ADDRESS)
            .collect();
        assert_eq!(area_commands.len(), 1);
    }

    #[test]
    fn plbu_state_is_emitted_lazily() {
        let (mut frame, plb) = test_frame(HardwareGeneration::Mali400);
        let mut program_arena = Arena::host("program", 0x1000_0000, 0x10000);
        let program = test_program(&mut program_arena);
        let mut state = GlState::new(128, 128);
        let encoder = GpEncoder::new(HardwareGeneration::Mali400);
        encoder.frame_setup(&mut frame, &plb).unwrap();
        let setup_len = frame.plbu.len();

        // First draw: fresh state, everything dirty.
        let draw = test_draw(&mut frame, false);
        encoder.record_draw(&mut frame, &draw, &program, &mut state).unwrap();
        let first_len = frame.plbu.len() - setup_len;

        // Second draw: nothing dirty, so no viewport/scissor/depth records.
        let draw2 = test_draw(&mut frame, false);
        encoder.record_draw(&mut frame, &draw2, &program, &mut state).unwrap();
        let second_len = frame.plbu.len() - setup_len - first_len;
        assert_eq!(first_len - second_len, 4 + 1 + 3);

        // Viewport alone re-emits only the viewport.
        state.set_viewport(0.0, 0.0, 64.0, 64.0);
        let draw3 = test_draw(&mut frame, false);
        encoder.record_draw(&mut frame, &draw3, &program, &mut state).unwrap();
        let third_len = frame.plbu.len() - setup_len - first_len - second_len;
        assert_eq!(third_len - second_len, 4);

        // Viewport + scissor together force the depth re-emit as well.
        state.set_viewport(0.0, 0.0, 32.0, 32.0);
        state.set_scissor(0, 0, 32, 32);
        let draw4 = test_draw(&mut frame, false);
        encoder.record_draw(&mut frame, &draw4, &program, &mut state).unwrap();
        let fourth_len = frame.plbu.len() - setup_len - first_len - second_len - third_len;
        assert_eq!(fourth_len - second_len, 4 + 1 + 3);
    }

    #[test]
    fn frame_setup_emits_the_tiling_preamble_once() {
        let (mut frame, plb) = test_frame(HardwareGeneration::Mali400);
        let encoder = GpEncoder::new(HardwareGeneration::Mali400);
        encoder.frame_setup(&mut frame, &plb).unwrap();

        let records = frame.plbu.records(&frame.arena);
        assert_eq!(records[0].1, plbu::BLOCK_STEP);
        assert_eq!(records[1].1, plbu::TILED_DIMENSIONS);
        assert_eq!(records[1].0, (7 << 24) | (7 << 8));
        assert_eq!(records[2].1, plbu::BLOCK_STRIDE);
        assert_eq!(records[3].1 & 0xFF00_0000, plbu::ARRAY_ADDRESS);
        assert_eq!(records[4].1, plbu::TILE_HEAP_START);
        assert_eq!(records[5].1, plbu::TILE_HEAP_END);
    }

    #[test]
    fn finish_closes_the_plbu_stream_once() {
        let (mut frame, _plb) = test_frame(HardwareGeneration::Mali400);
        let encoder = GpEncoder::new(HardwareGeneration::Mali400);
        encoder.finish(&mut frame).unwrap();
        encoder.finish(&mut frame).unwrap();
        let records = frame.plbu.records(&frame.arena);
        assert_eq!(records, vec![(0, plbu::END)]);
        assert!(frame.can_draw().is_err());
    }
}
