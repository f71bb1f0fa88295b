//! Frame bookkeeping.
//!
//! A frame owns one arena slice for everything its jobs read: the PLB
//! regions, both GP command queues, the tile heap and every per-draw
//! sub-allocation. Three frame slots rotate; a slot is only reused once
//! the previous occupant's PP job has completed, tracked by a small
//! mutex-guarded status shared with the job waiter thread.

use std::sync::{Arc, Mutex};

use mali_mem::{align_up, Arena, Span, ALLOC_ALIGN};

use crate::cmd::StreamWriter;
use crate::error::DriverError;
use crate::plb::{Plb, BLOCK_SIZE};
use crate::render_state::RenderState;
use crate::state::DrawMode;

/// Frame slots in flight.
pub const FRAME_COUNT: usize = 3;

/// Arena backing one frame slot.
pub const FRAME_MEMORY_SIZE: u32 = 4 << 20;

/// Draws one frame can hold.
pub const FRAME_DRAW_LIMIT: usize = 512;

// Sized for FRAME_DRAW_LIMIT draws at the worst-case records-per-draw.
const VS_QUEUE_SIZE: u32 = 0x1_0000;
const PLBU_QUEUE_SIZE: u32 = 0x1_0000;
const TILE_HEAP_SIZE: u32 = 0x8_0000;

/// Lifecycle of a frame slot's GPU work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderStatus {
    /// Draws are being encoded; nothing submitted.
    Building = 0,
    /// Flushed; GP (and then PP) jobs are running.
    Running = 1,
    /// All jobs done; the slot may be recycled.
    Complete = 2,
}

/// Status cell shared between the render thread and the waiter thread for
/// one frame slot.
#[derive(Debug)]
pub struct FrameSync {
    status: Mutex<RenderStatus>,
}

impl FrameSync {
    pub fn new() -> Self {
        Self {
            // A fresh slot has nothing in flight.
            status: Mutex::new(RenderStatus::Complete),
        }
    }

    pub fn status(&self) -> RenderStatus {
        *self.status.lock().unwrap()
    }

    pub fn set(&self, status: RenderStatus) {
        *self.status.lock().unwrap() = status;
    }

    /// Block until the slot's previous occupant reports completion. The
    /// wait is bounded by job length, so a spin with yields is enough; the
    /// waiter thread flips the status.
    pub fn wait_complete(&self) {
        loop {
            if self.status() == RenderStatus::Complete {
                return;
            }
            std::thread::yield_now();
        }
    }
}

impl Default for FrameSync {
    fn default() -> Self {
        Self::new()
    }
}

/// An uploaded index range for one indexed draw.
#[derive(Clone, Copy, Debug)]
pub struct IndexRange {
    pub address: u32,
    /// 1 or 2 bytes per index.
    pub index_size: u32,
    pub element_count: u32,
}

/// One draw call's resolved sub-allocations within its frame.
#[derive(Clone, Copy, Debug)]
pub struct Draw {
    pub mode: DrawMode,
    pub vertex_start: u32,
    pub vertex_count: u32,
    pub indices: Option<IndexRange>,

    pub render_state: Span,
    pub vs_uniforms: Option<(Span, u32)>,
    /// Attribute descriptor table; on Mali-200 the varying descriptors
    /// follow in the same table.
    pub attribute_area: Span,
    /// Varying descriptor table (equals `attribute_area` on Mali-200).
    pub varying_area: Span,
    pub varying_area_offset: u32,
    pub varyings: Option<Span>,
    pub gl_position: Span,
    pub point_size: Option<Span>,
    pub textures: Option<(Span, u32)>,
}

pub struct Frame {
    pub index: usize,
    pub arena: Arena,
    pub sync: Arc<FrameSync>,
    pub vs: StreamWriter,
    pub plbu: StreamWriter,
    pub plb_geometry: Span,
    pub plbu_array: Span,
    /// One Hilbert-ordered dispatch stream per PP core.
    pub pp_streams: Vec<Span>,
    pub tile_heap: Span,
    /// Baseline render state the PP frame registers point at.
    pub default_render_state: Span,
    pub draws: Vec<Draw>,
    pub plbu_finished: bool,
}

impl Frame {
    /// Lay out a recycled (or fresh) arena for a new frame: PLB regions
    /// first, then the command queues, tile heap and the default render
    /// state; draw sub-allocations claim the rest as they arrive.
    pub fn new(
        index: usize,
        mut arena: Arena,
        sync: Arc<FrameSync>,
        plb: &Plb,
        core_count: u32,
    ) -> Result<Frame, DriverError> {
        arena.reset();
        sync.set(RenderStatus::Building);

        let plbu_array = arena.alloc(align_up(plb.plbu_array_size(), ALLOC_ALIGN))?;
        let plb_geometry = arena.alloc(align_up(plb.plb_size(), ALLOC_ALIGN))?;
        let plb_address = arena.bus_address(plb_geometry);
        for block in 0..plb.blocks() {
            let address = plb_address + block * BLOCK_SIZE;
            arena.write(plbu_array, block * 4, &address.to_le_bytes());
        }

        let mut pp_streams = Vec::with_capacity(core_count as usize);
        for core in 0..core_count {
            let span = arena.alloc(align_up(plb.pp_stream_size(core, core_count), ALLOC_ALIGN))?;
            let mut stream = vec![0u8; span.len() as usize];
            plb.write_pp_stream(&mut stream, plb_address, core, core_count);
            arena.write(span, 0, &stream);
            pp_streams.push(span);
        }

        let vs_span = arena.alloc(VS_QUEUE_SIZE)?;
        let plbu_span = arena.alloc(PLBU_QUEUE_SIZE)?;
        let tile_heap = arena.alloc(TILE_HEAP_SIZE)?;

        let default_render_state = arena.alloc(ALLOC_ALIGN)?;
        arena.write(default_render_state, 0, &RenderState::default().encode_le());

        Ok(Frame {
            index,
            arena,
            sync,
            vs: StreamWriter::new("vs queue", vs_span),
            plbu: StreamWriter::new("plbu queue", plbu_span),
            plb_geometry,
            plbu_array,
            pp_streams,
            tile_heap,
            default_render_state,
            draws: Vec::new(),
            plbu_finished: false,
        })
    }

    pub fn draw_count(&self) -> usize {
        self.draws.len()
    }

    /// Room for another draw?
    pub fn can_draw(&self) -> Result<(), DriverError> {
        if self.plbu_finished {
            return Err(DriverError::TooManyDraws);
        }
        if self.draws.len() >= FRAME_DRAW_LIMIT {
            return Err(DriverError::TooManyDraws);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mali_uapi::HardwareGeneration;

    #[test]
    fn frame_layout_places_plb_regions_first() {
        let arena = Arena::host("frame", 0x4000_0000, FRAME_MEMORY_SIZE);
        let plb = Plb::new(256, 256, HardwareGeneration::Mali400);
        let frame = Frame::new(0, arena, Arc::new(FrameSync::new()), &plb, 2).unwrap();

        assert_eq!(frame.plbu_array.offset(), 0);
        assert_eq!(frame.pp_streams.len(), 2);
        assert_eq!(frame.sync.status(), RenderStatus::Building);

        // The PLBU block array points into the PLB geometry region.
        let first = u32::from_le_bytes(
            frame.arena.span_bytes(frame.plbu_array)[0..4]
                .try_into()
                .unwrap(),
        );
        assert_eq!(first, frame.arena.bus_address(frame.plb_geometry));
    }

    #[test]
    fn recycling_resets_the_arena() {
        let arena = Arena::host("frame", 0, FRAME_MEMORY_SIZE);
        let plb = Plb::new(64, 64, HardwareGeneration::Mali200);
        let sync = Arc::new(FrameSync::new());
        let frame = Frame::new(0, arena, sync.clone(), &plb, 1).unwrap();
        let used = frame.arena.used();

        // Recycle: same arena, fresh layout.
        let frame = Frame::new(0, frame.arena, sync, &plb, 1).unwrap();
        assert_eq!(frame.arena.used(), used);
        assert!(frame.draws.is_empty());
    }
}
