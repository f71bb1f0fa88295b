//! The driver context: arenas, pools, per-frame orchestration.
//!
//! One context drives one surface on one device channel. Draw encoding is
//! single-threaded; the only concurrency is the per-job waiter thread that
//! blocks on kernel notifications, submits the PP jobs once the GP job
//! finishes, and releases the frame slot when everything is done.

use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{debug, info, warn};

use mali_mbs::{parse_mbs, Compiler, ShaderStage, SymbolTable, ValueType};
use mali_mem::{align_up, Arena, ALLOC_ALIGN};
use mali_uapi::gp::{GpFrameRegisters, GpJob};
use mali_uapi::notify::{Notification, JOB_STATUS_END_SUCCESS};
use mali_uapi::pp::{PixelFormat, PpJob};
use mali_uapi::HardwareInfo;

use crate::channel::GpuBackend;
use crate::clear;
use crate::error::DriverError;
use crate::frame::{Draw, Frame, FrameSync, IndexRange, RenderStatus, FRAME_COUNT, FRAME_MEMORY_SIZE};
use crate::gp::GpEncoder;
use crate::plb::Plb;
use crate::pp::{build_pp_jobs, ClearValues, RenderTarget};
use crate::program::{gather_uniforms, Program};
use crate::render_state::{render_state_for_draw, RenderState, RENDER_STATE_SIZE};
use crate::state::{DrawMode, GlState};
use crate::texture::{self, Texture, MAX_TEXTURE_UNITS, TEXTURE_POOL_SIZE};

pub const PROGRAM_POOL_SIZE: usize = 16;
pub const PROGRAM_SLOT_SIZE: u32 = 64 << 10;
const PROGRAM_ARENA_SIZE: u32 = PROGRAM_SLOT_SIZE * PROGRAM_POOL_SIZE as u32;
const AUX_ARENA_SIZE: u32 = 16 << 20;

pub const ATTRIBUTE_POOL_SIZE: usize = 32;
pub const INDEX_POOL_SIZE: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProgramHandle(usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureHandle(usize);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexBufferHandle(usize);

struct AttributeBinding {
    name: String,
    address: u32,
    component_count: u32,
    component_size: u32,
    stride: u32,
}

struct IndexBuffer {
    address: u32,
    index_size: u32,
    element_count: u32,
    max_index: u32,
}

struct Surface {
    plb: Plb,
    target: RenderTarget,
}

#[derive(Clone, Copy)]
enum ProgramRef {
    App(usize),
    Clear,
}

/// Routes kernel notifications to the waiter thread they belong to.
///
/// The kernel delivers all completions through one per-process wait call.
/// With up to [`FRAME_COUNT`] frames in flight there are that many waiter
/// threads; whoever holds the wait lock when a foreign completion arrives
/// parks it here for its owner. The 25 ms kernel timeout guarantees every
/// waiter re-checks the parked list regularly.
struct NotificationRouter {
    wait_lock: Mutex<()>,
    parked: Mutex<Vec<Notification>>,
}

impl NotificationRouter {
    fn new() -> Self {
        Self {
            wait_lock: Mutex::new(()),
            parked: Mutex::new(Vec::new()),
        }
    }

    /// Block until a notification satisfying `wanted` arrives.
    fn next_for(
        &self,
        backend: &dyn GpuBackend,
        wanted: impl Fn(&Notification) -> bool,
    ) -> Result<Notification, crate::error::DeviceError> {
        loop {
            {
                let mut parked = self.parked.lock().unwrap();
                if let Some(at) = parked.iter().position(&wanted) {
                    return Ok(parked.remove(at));
                }
            }
            let notification = {
                let _serialize = self.wait_lock.lock().unwrap();
                backend.wait_notification()?
            };
            match notification {
                Notification::Timeout => continue,
                n if wanted(&n) => return Ok(n),
                Notification::Unknown { code } => {
                    debug!(code, "dropping unhandled notification");
                }
                n => self.parked.lock().unwrap().push(n),
            }
        }
    }
}

pub struct Context {
    backend: Arc<dyn GpuBackend>,
    info: HardwareInfo,
    router: Arc<NotificationRouter>,

    program_arena: Arena,
    aux_arena: Arena,

    frame_arenas: Vec<Option<Arena>>,
    frames: Vec<Option<Frame>>,
    frame_syncs: Vec<Arc<FrameSync>>,
    current_frame: Option<usize>,
    frame_counter: u32,
    job_counter: u32,

    surface: Option<Surface>,
    state: GlState,
    render_state_template: RenderState,
    clear_values: ClearValues,

    programs: Vec<Program>,
    current_program: Option<usize>,
    clear_program: Option<Program>,
    clear_quad: Option<AttributeBinding>,

    attributes: Vec<AttributeBinding>,
    index_buffers: Vec<IndexBuffer>,
    textures: Vec<Texture>,
    bound_textures: [Option<usize>; MAX_TEXTURE_UNITS],
}

impl Context {
    pub fn new(backend: Arc<dyn GpuBackend>) -> Result<Self, DriverError> {
        let info = backend.hardware();
        info!(
            generation = info.generation.name(),
            kernel = info.kernel_api.name(),
            cores = info.pp_core_count,
            "creating context"
        );

        let program_arena = backend.map_arena("programs", PROGRAM_ARENA_SIZE)?;
        let aux_arena = backend.map_arena("auxiliary", AUX_ARENA_SIZE)?;
        let mut frame_arenas = Vec::with_capacity(FRAME_COUNT);
        for _ in 0..FRAME_COUNT {
            frame_arenas.push(Some(backend.map_arena("frame", FRAME_MEMORY_SIZE)?));
        }

        Ok(Self {
            backend,
            info,
            router: Arc::new(NotificationRouter::new()),
            program_arena,
            aux_arena,
            frame_arenas,
            frames: (0..FRAME_COUNT).map(|_| None).collect(),
            frame_syncs: (0..FRAME_COUNT).map(|_| Arc::new(FrameSync::new())).collect(),
            current_frame: None,
            frame_counter: 0,
            job_counter: 0,
            surface: None,
            state: GlState::new(0, 0),
            render_state_template: RenderState::default(),
            clear_values: ClearValues::default(),
            programs: Vec::new(),
            current_program: None,
            clear_program: None,
            clear_quad: None,
            attributes: Vec::new(),
            index_buffers: Vec::new(),
            textures: Vec::new(),
            bound_textures: [None; MAX_TEXTURE_UNITS],
        })
    }

    pub fn hardware(&self) -> HardwareInfo {
        self.info
    }

    /// Configure the render surface: computes the PLB geometry and
    /// allocates the color target. Must precede any frame.
    pub fn set_surface(&mut self, width: u32, height: u32) -> Result<(), DriverError> {
        let plb = Plb::new(width, height, self.info.generation);
        debug!(
            tiled_w = plb.tiled_w,
            tiled_h = plb.tiled_h,
            shift_w = plb.shift_w,
            shift_h = plb.shift_h,
            blocks = plb.blocks(),
            "plb geometry"
        );

        let pitch = width * 4;
        let size = align_up(pitch * height, ALLOC_ALIGN);
        let color = self.aux_arena.alloc(size)?;
        let target = RenderTarget {
            address: self.aux_arena.bus_address(color),
            width,
            height,
            pitch,
            format: PixelFormat::Rgba8888,
        };

        self.state = GlState::new(width, height);
        self.surface = Some(Surface { plb, target });
        Ok(())
    }

    pub fn gl_state_mut(&mut self) -> &mut GlState {
        &mut self.state
    }

    pub fn render_target(&self) -> Option<&RenderTarget> {
        self.surface.as_ref().map(|s| &s.target)
    }

    pub fn set_clear_color(&mut self, r: f32, g: f32, b: f32, a: f32) {
        self.clear_values.color = [r, g, b, a];
    }

    pub fn set_clear_depth(&mut self, depth: f32) {
        self.clear_values.depth = depth;
    }

    pub fn set_clear_stencil(&mut self, stencil: u8) {
        self.clear_values.stencil = stencil;
    }

    /// Link a program from two precompiled MBS blobs.
    pub fn program_create_mbs(
        &mut self,
        vertex: &[u8],
        fragment: &[u8],
    ) -> Result<ProgramHandle, DriverError> {
        let vertex = parse_mbs(vertex)?;
        let fragment = parse_mbs(fragment)?;
        self.program_adopt(vertex, fragment)
    }

    /// Compile both stages through `compiler` and link.
    pub fn program_create(
        &mut self,
        compiler: &dyn Compiler,
        vertex_source: &str,
        fragment_source: &str,
    ) -> Result<ProgramHandle, DriverError> {
        let vertex = compiler.compile(ShaderStage::Vertex, vertex_source)?;
        let fragment = compiler.compile(ShaderStage::Fragment, fragment_source)?;
        self.program_adopt(vertex, fragment)
    }

    fn program_adopt(
        &mut self,
        vertex: mali_mbs::CompiledShader,
        fragment: mali_mbs::CompiledShader,
    ) -> Result<ProgramHandle, DriverError> {
        if self.programs.len() >= PROGRAM_POOL_SIZE {
            return Err(DriverError::ResourceExhausted("program"));
        }
        let program = Program::link(&mut self.program_arena, vertex, fragment)?;
        self.programs.push(program);
        Ok(ProgramHandle(self.programs.len() - 1))
    }

    pub fn program_get(&self, handle: ProgramHandle) -> Option<&Program> {
        self.programs.get(handle.0)
    }

    pub fn program_use(&mut self, handle: ProgramHandle) -> Result<(), DriverError> {
        if handle.0 >= self.programs.len() {
            return Err(DriverError::MissingBinding(format!("program {}", handle.0)));
        }
        self.current_program = Some(handle.0);
        Ok(())
    }

    /// Stage a uniform value into the current program, converting precision
    /// and matrix strides as the symbol demands.
    pub fn uniform_f32(&mut self, name: &str, values: &[f32]) -> Result<(), DriverError> {
        let index = self.current_program.ok_or(DriverError::NoProgram)?;
        let program = &mut self.programs[index];
        let symbol = program
            .vertex
            .uniforms
            .find_mut(name)
            .or_else(|| program.fragment.uniforms.find_mut(name))
            .ok_or_else(|| DriverError::MissingBinding(format!("uniform {name:?}")))?;
        symbol.store_f32(values)?;
        Ok(())
    }

    /// Upload attribute data and bind it under `name`. Rebinding an
    /// existing name replaces it without consuming another pool slot.
    pub fn attribute_f32(
        &mut self,
        name: &str,
        component_count: u32,
        data: &[f32],
    ) -> Result<(), DriverError> {
        let stride = component_count * 4;
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        let span = self
            .aux_arena
            .alloc(align_up(bytes.len() as u32, ALLOC_ALIGN))?;
        self.aux_arena.write(span, 0, &bytes);

        let binding = AttributeBinding {
            name: name.to_owned(),
            address: self.aux_arena.bus_address(span),
            component_count,
            component_size: 4,
            stride,
        };
        if let Some(existing) = self.attributes.iter_mut().find(|a| a.name == name) {
            *existing = binding;
        } else {
            if self.attributes.len() >= ATTRIBUTE_POOL_SIZE {
                return Err(DriverError::ResourceExhausted("attribute buffer"));
            }
            self.attributes.push(binding);
        }
        Ok(())
    }

    pub fn upload_indices_u16(&mut self, indices: &[u16]) -> Result<IndexBufferHandle, DriverError> {
        let bytes: Vec<u8> = indices.iter().flat_map(|v| v.to_le_bytes()).collect();
        let max_index = indices.iter().copied().max().unwrap_or(0);
        self.adopt_indices(&bytes, 2, indices.len() as u32, u32::from(max_index))
    }

    pub fn upload_indices_u8(&mut self, indices: &[u8]) -> Result<IndexBufferHandle, DriverError> {
        let max_index = indices.iter().copied().max().unwrap_or(0);
        self.adopt_indices(indices, 1, indices.len() as u32, u32::from(max_index))
    }

    fn adopt_indices(
        &mut self,
        bytes: &[u8],
        index_size: u32,
        element_count: u32,
        max_index: u32,
    ) -> Result<IndexBufferHandle, DriverError> {
        if self.index_buffers.len() >= INDEX_POOL_SIZE {
            return Err(DriverError::ResourceExhausted("index buffer"));
        }
        let span = self
            .aux_arena
            .alloc(align_up(bytes.len() as u32, ALLOC_ALIGN))?;
        self.aux_arena.write(span, 0, bytes);
        self.index_buffers.push(IndexBuffer {
            address: self.aux_arena.bus_address(span),
            index_size,
            element_count,
            max_index,
        });
        Ok(IndexBufferHandle(self.index_buffers.len() - 1))
    }

    pub fn texture_rgba(
        &mut self,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<TextureHandle, DriverError> {
        if self.textures.len() >= TEXTURE_POOL_SIZE {
            return Err(DriverError::ResourceExhausted("texture"));
        }
        let tex = texture::upload(
            &mut self.aux_arena,
            width,
            height,
            PixelFormat::Rgba8888,
            pixels,
        )?;
        self.textures.push(tex);
        Ok(TextureHandle(self.textures.len() - 1))
    }

    pub fn texture_bind(&mut self, unit: usize, handle: TextureHandle) -> Result<(), DriverError> {
        if unit >= MAX_TEXTURE_UNITS || handle.0 >= self.textures.len() {
            return Err(DriverError::MissingBinding(format!("texture unit {unit}")));
        }
        self.bound_textures[unit] = Some(handle.0);
        Ok(())
    }

    /// Start building a new frame, recycling the oldest slot. Blocks until
    /// that slot's previous jobs have fully completed.
    pub fn frame_new(&mut self) -> Result<(), DriverError> {
        let surface = self.surface.as_ref().ok_or(DriverError::NoSurface)?;
        let slot = (self.frame_counter as usize) % FRAME_COUNT;
        self.frame_counter += 1;

        let sync = self.frame_syncs[slot].clone();
        sync.wait_complete();

        let arena = match self.frames[slot].take() {
            Some(old) => old.arena,
            None => self.frame_arenas[slot]
                .take()
                .expect("fresh slot has an arena"),
        };
        let mut frame = Frame::new(slot, arena, sync, &surface.plb, self.info.pp_core_count)?;
        GpEncoder::new(self.info.generation).frame_setup(&mut frame, &surface.plb)?;
        self.frames[slot] = Some(frame);
        self.current_frame = Some(slot);
        Ok(())
    }

    pub fn draw_arrays(
        &mut self,
        mode: DrawMode,
        start: u32,
        count: u32,
    ) -> Result<(), DriverError> {
        let program = self.current_program.ok_or(DriverError::NoProgram)?;
        self.record_draw(ProgramRef::App(program), mode, start, count, None)
    }

    pub fn draw_elements(
        &mut self,
        mode: DrawMode,
        handle: IndexBufferHandle,
    ) -> Result<(), DriverError> {
        let program = self.current_program.ok_or(DriverError::NoProgram)?;
        let buffer = self
            .index_buffers
            .get(handle.0)
            .ok_or_else(|| DriverError::MissingBinding(format!("index buffer {}", handle.0)))?;
        let range = IndexRange {
            address: buffer.address,
            index_size: buffer.index_size,
            element_count: buffer.element_count,
        };
        let vertex_count = buffer.max_index + 1;
        self.record_draw(ProgramRef::App(program), mode, 0, vertex_count, Some(range))
    }

    /// Clear the depth buffer by drawing the internal fullscreen quad.
    pub fn clear_depth_buffer(&mut self) -> Result<(), DriverError> {
        if self.clear_program.is_none() {
            let program = clear::build_clear_program(&mut self.program_arena)?;
            let bytes: Vec<u8> = clear::CLEAR_QUAD
                .iter()
                .flat_map(|v| v.to_le_bytes())
                .collect();
            let span = self
                .aux_arena
                .alloc(align_up(bytes.len() as u32, ALLOC_ALIGN))?;
            self.aux_arena.write(span, 0, &bytes);
            self.clear_quad = Some(AttributeBinding {
                name: "aPosition".into(),
                address: self.aux_arena.bus_address(span),
                component_count: 4,
                component_size: 4,
                stride: 16,
            });
            self.clear_program = Some(program);
        }
        self.record_draw(ProgramRef::Clear, DrawMode::TriangleStrip, 0, 4, None)
    }

    fn record_draw(
        &mut self,
        which: ProgramRef,
        mode: DrawMode,
        vertex_start: u32,
        vertex_count: u32,
        indices: Option<IndexRange>,
    ) -> Result<(), DriverError> {
        let slot = self.current_frame.ok_or(DriverError::NoFrame)?;
        let program = match which {
            ProgramRef::App(i) => &self.programs[i],
            ProgramRef::Clear => self
                .clear_program
                .as_ref()
                .expect("clear program built before use"),
        };
        let frame = self.frames[slot].as_mut().ok_or(DriverError::NoFrame)?;
        frame.can_draw()?;

        // Resolve everything that lives outside the frame before touching
        // its arena: bindings, staged uniforms, texture descriptors.
        let vs_uniform_bytes = gather_uniforms(&program.vertex.uniforms);
        let fs_uniform_bytes = gather_uniforms(&program.fragment.uniforms);

        let mut attribute_entries = Vec::with_capacity(program.vertex.attributes.len());
        for symbol in &program.vertex.attributes.symbols {
            let binding = match which {
                ProgramRef::Clear => self.clear_quad.as_ref(),
                ProgramRef::App(_) => self.attributes.iter().find(|a| a.name == symbol.name),
            }
            .ok_or_else(|| DriverError::MissingBinding(format!("attribute {:?}", symbol.name)))?;
            attribute_entries.push((
                binding.address + vertex_start * binding.stride,
                area_descriptor(binding.stride, binding.component_size, binding.component_count),
            ));
        }

        let sampler_count = count_samplers(&program.fragment.uniforms);
        if sampler_count > MAX_TEXTURE_UNITS {
            return Err(DriverError::ResourceExhausted("texture unit"));
        }
        let mut texture_addresses = Vec::with_capacity(sampler_count);
        for unit in 0..sampler_count {
            let tex = self.bound_textures[unit]
                .ok_or_else(|| DriverError::MissingBinding(format!("texture unit {unit}")))?;
            texture_addresses.push(self.textures[tex].descriptor_address);
        }

        // Per-draw frame allocations.
        let arena = &mut frame.arena;
        let gl_position = arena.alloc(align_up(vertex_count * 16, ALLOC_ALIGN))?;
        let map = &program.varying_map;
        let varyings = if map.size > 0 {
            Some(arena.alloc(align_up(vertex_count * map.size, ALLOC_ALIGN))?)
        } else {
            None
        };
        let point_size = if program.gl_point_size.is_some() {
            Some(arena.alloc(align_up(vertex_count * 4, ALLOC_ALIGN))?)
        } else {
            None
        };

        let attribute_count = attribute_entries.len() as u32;
        let varying_count = program.area_varying_count();
        let (attribute_area, varying_area, varying_area_offset) = match self.info.generation {
            // Mali-200 wants one combined descriptor table.
            mali_uapi::HardwareGeneration::Mali200 => {
                let span =
                    arena.alloc(align_up((attribute_count + varying_count) * 8, ALLOC_ALIGN))?;
                (span, span, attribute_count * 8)
            }
            mali_uapi::HardwareGeneration::Mali400 => {
                let attributes = arena.alloc(align_up(attribute_count.max(1) * 8, ALLOC_ALIGN))?;
                let varyings = arena.alloc(align_up(varying_count * 8, ALLOC_ALIGN))?;
                (attributes, varyings, 0)
            }
        };

        for (i, (address, word)) in attribute_entries.iter().enumerate() {
            arena.write(attribute_area, i as u32 * 8, &address.to_le_bytes());
            arena.write(attribute_area, i as u32 * 8 + 4, &word.to_le_bytes());
        }

        let varyings_bus = varyings.map(|s| arena.bus_address(s)).unwrap_or(0);
        let gl_position_bus = arena.bus_address(gl_position);
        let mut varying_entries: Vec<(u32, u32)> = map
            .slots
            .iter()
            .map(|slot| {
                (
                    varyings_bus + slot.offset,
                    area_descriptor(map.size, slot.entry_size, slot.entries),
                )
            })
            .collect();
        varying_entries.push((gl_position_bus, area_descriptor(16, 4, 4)));
        if let Some(span) = point_size {
            let address = arena.bus_address(span);
            varying_entries.push((address, area_descriptor(4, 4, 1)));
        }
        for (i, (address, word)) in varying_entries.iter().enumerate() {
            let at = varying_area_offset + i as u32 * 8;
            arena.write(varying_area, at, &address.to_le_bytes());
            arena.write(varying_area, at + 4, &word.to_le_bytes());
        }

        let vs_uniforms = match vs_uniform_bytes {
            Some(bytes) => {
                let span = arena.alloc(align_up(bytes.len() as u32, ALLOC_ALIGN))?;
                arena.write(span, 0, &bytes);
                Some((span, align_up(bytes.len() as u32, 4)))
            }
            None => None,
        };
        let fs_uniforms = match fs_uniform_bytes {
            Some(bytes) => {
                let span = arena.alloc(align_up(bytes.len() as u32, ALLOC_ALIGN))?;
                arena.write(span, 0, &bytes);
                Some((arena.bus_address(span), align_up(bytes.len() as u32, 4)))
            }
            None => None,
        };

        let textures = if texture_addresses.is_empty() {
            None
        } else {
            let span = arena.alloc(align_up(texture_addresses.len() as u32 * 4, ALLOC_ALIGN))?;
            for (i, address) in texture_addresses.iter().enumerate() {
                arena.write(span, i as u32 * 4, &address.to_le_bytes());
            }
            Some((span, texture_addresses.len() as u32))
        };

        // Render state: the persistent template patched with current GL
        // state, then specialized for this program.
        let mut template = self.render_state_template;
        template.apply_gl_state(&self.state);
        let textures_for_rsw =
            textures.map(|(span, count)| (arena.bus_address(span), count));
        let rsw = render_state_for_draw(
            &template,
            program,
            varyings_bus,
            fs_uniforms,
            textures_for_rsw,
        );
        let render_state = arena.alloc(RENDER_STATE_SIZE)?;
        arena.write(render_state, 0, &rsw.encode_le());

        let draw = Draw {
            mode,
            vertex_start,
            vertex_count,
            indices,
            render_state,
            vs_uniforms,
            attribute_area,
            varying_area,
            varying_area_offset,
            varyings,
            gl_position,
            point_size,
            textures,
        };
        frame.draws.push(draw);

        let encoder = GpEncoder::new(self.info.generation);
        encoder.record_draw(frame, &draw, program, &mut self.state)?;
        debug!(
            draw = frame.draws.len(),
            vertices = vertex_count,
            indexed = draw.indices.is_some(),
            "draw recorded"
        );
        Ok(())
    }

    /// Finalize the frame and hand it to the GP; PP submission follows GP
    /// completion on the waiter thread.
    pub fn frame_flush(&mut self) -> Result<(), DriverError> {
        let slot = self.current_frame.take().ok_or(DriverError::NoFrame)?;
        let surface = self.surface.as_ref().ok_or(DriverError::NoSurface)?;
        let frame = self.frames[slot].as_mut().ok_or(DriverError::NoFrame)?;

        GpEncoder::new(self.info.generation).finish(frame)?;

        let tag_base = self.job_counter << 8;
        self.job_counter += 1;
        let gp_tag = tag_base + 1;
        let pp_tag_base = tag_base + 0x10;

        let gp_job = GpJob {
            user_job_ptr: gp_tag,
            priority: 1,
            watchdog_msecs: 500,
            frame: GpFrameRegisters {
                vs_commands_start: frame.vs.start_address(&frame.arena),
                vs_commands_end: frame.vs.end_address(&frame.arena),
                plbu_commands_start: frame.plbu.start_address(&frame.arena),
                plbu_commands_end: frame.plbu.end_address(&frame.arena),
                tile_heap_start: frame.arena.bus_address(frame.tile_heap),
                tile_heap_end: frame.arena.bus_address(frame.tile_heap) + frame.tile_heap.len(),
            },
            abort_id: 0,
        };
        let pp_jobs = build_pp_jobs(
            &self.info,
            frame,
            &surface.plb,
            &surface.target,
            &self.clear_values,
            pp_tag_base,
        );

        frame.sync.set(RenderStatus::Running);
        if let Err(e) = self.backend.start_gp_job(&gp_job) {
            // The slot must not deadlock future frames.
            frame.sync.set(RenderStatus::Complete);
            return Err(e.into());
        }
        debug!(slot, tag = gp_tag, draws = frame.draws.len(), "frame flushed");

        let backend = self.backend.clone();
        let router = self.router.clone();
        let sync = frame.sync.clone();
        thread::spawn(move || wait_for_frame(backend, router, sync, gp_tag, pp_jobs));
        Ok(())
    }

    /// Block until every submitted frame has completed.
    pub fn finish(&self) {
        for sync in &self.frame_syncs {
            sync.wait_complete();
        }
    }
}

/// One waiter thread per flushed frame: waits out its GP job, submits the
/// PP jobs, waits those out, then releases the frame slot. Every exit path
/// releases the slot so a failed frame never deadlocks `frame_new`.
fn wait_for_frame(
    backend: Arc<dyn GpuBackend>,
    router: Arc<NotificationRouter>,
    sync: Arc<FrameSync>,
    gp_tag: u32,
    pp_jobs: Vec<PpJob>,
) {
    let outcome = run_frame_jobs(&*backend, &router, gp_tag, &pp_jobs);
    if let Err(e) = outcome {
        warn!(tag = gp_tag, error = %e, "frame abandoned");
    }
    sync.set(RenderStatus::Complete);
}

fn run_frame_jobs(
    backend: &dyn GpuBackend,
    router: &NotificationRouter,
    gp_tag: u32,
    pp_jobs: &[PpJob],
) -> Result<(), DriverError> {
    let gp_done = router.next_for(backend, |n| {
        matches!(
            n,
            Notification::GpFinished { user_job_ptr, .. }
            | Notification::GpStalled { user_job_ptr } if *user_job_ptr == gp_tag
        )
    })?;
    match gp_done {
        Notification::GpFinished { status, .. } if status == JOB_STATUS_END_SUCCESS => {}
        Notification::GpFinished { status, .. } => {
            warn!(tag = gp_tag, status, "gp job failed");
            return Ok(());
        }
        Notification::GpStalled { .. } => {
            // Out of tile-heap memory mid-build; the frame is lost.
            warn!(tag = gp_tag, "gp job ran out of tile-heap memory");
            return Ok(());
        }
        _ => unreachable!("matcher only passes gp notifications"),
    }
    debug!(tag = gp_tag, "gp job finished");

    for job in pp_jobs {
        backend.start_pp_job(job)?;
    }
    let mut remaining: Vec<u32> = pp_jobs.iter().map(|j| j.user_job_ptr).collect();
    while !remaining.is_empty() {
        let n = router.next_for(backend, |n| {
            matches!(
                n,
                Notification::PpFinished { user_job_ptr, .. } if remaining.contains(user_job_ptr)
            )
        })?;
        if let Notification::PpFinished {
            user_job_ptr,
            status,
        } = n
        {
            if status != JOB_STATUS_END_SUCCESS {
                warn!(tag = user_job_ptr, status, "pp job failed");
                return Ok(());
            }
            remaining.retain(|&t| t != user_job_ptr);
        }
    }
    debug!(tag = gp_tag, "frame complete");
    Ok(())
}

/// Attribute/varying area descriptor word: component count, component
/// format and stride packed the way the VS fetch unit reads them.
fn area_descriptor(stride: u32, component_size: u32, component_count: u32) -> u32 {
    let format = if component_size == 2 { 1 } else { 2 };
    (stride << 11) | (format << 3) | (component_count.max(1) - 1)
}

fn count_samplers(uniforms: &SymbolTable) -> usize {
    uniforms
        .symbols
        .iter()
        .filter(|s| matches!(s.value_type, ValueType::Sampler | ValueType::SamplerCube))
        .count()
}
