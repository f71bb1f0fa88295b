//! Pixel-processor job-start payloads.
//!
//! A PP job carries a generation-specific frame-register block plus up to
//! three write-back descriptors, all inside the same revisioned envelope
//! as a GP job. Mali-400 appended `blocking`/`scale`/`foureight` to the
//! frame block; Mali-200 has no such words.

use crate::{HardwareGeneration, KernelApi};

pub const WB_TYPE_DISABLED: u32 = 0;
pub const WB_TYPE_DEPTH_STENCIL: u32 = 1;
pub const WB_TYPE_COLOR: u32 = 2;

/// Write-back pixel formats understood by the PP output unit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb565 = 0x01,
    Rgba8888 = 0x03,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Rgb565 => 2,
            PixelFormat::Rgba8888 => 4,
        }
    }
}

/// Frame registers consumed by one PP core.
///
/// `one`, `dubya` and `foureight` hold the constants the hardware expects
/// in those slots; no other values have ever been observed to work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PpFrameRegisters {
    pub plbu_array_address: u32,
    pub render_address: u32,
    pub flags: u32,
    pub clear_value_depth: u32,
    pub clear_value_stencil: u32,
    pub clear_value_color: [u32; 4],
    /// Zeroed (together with `height`) when both dimensions are 16-aligned;
    /// the hardware then applies its defaults.
    pub width: u32,
    pub height: u32,
    pub fragment_stack_address: u32,
    pub fragment_stack_size: u32,
    pub one: u32,
    pub supersampled_height: u32,
    pub dubya: u32,
    pub onscreen: u32,
    /// Mali-400 only: `(shift_max << 28) | (shift_h << 16) | shift_w`.
    pub blocking: u32,
    /// Mali-400 only.
    pub scale: u32,
    /// Mali-400 only.
    pub foureight: u32,
}

impl Default for PpFrameRegisters {
    fn default() -> Self {
        Self {
            plbu_array_address: 0,
            render_address: 0,
            flags: 0,
            clear_value_depth: 0x00FF_FFFF,
            clear_value_stencil: 0,
            clear_value_color: [0; 4],
            width: 0,
            height: 0,
            fragment_stack_address: 0,
            fragment_stack_size: 0,
            one: 1,
            supersampled_height: 0,
            dubya: 0x77,
            onscreen: 1,
            blocking: 0,
            scale: 0x0C,
            foureight: 0x8888,
        }
    }
}

impl PpFrameRegisters {
    pub fn size_bytes(generation: HardwareGeneration) -> usize {
        match generation {
            HardwareGeneration::Mali200 => 80,
            HardwareGeneration::Mali400 => 92,
        }
    }

    fn encode_le(&self, generation: HardwareGeneration, out: &mut Vec<u8>) {
        let common = [
            self.plbu_array_address,
            self.render_address,
            0, // unused
            self.flags,
            self.clear_value_depth,
            self.clear_value_stencil,
            self.clear_value_color[0],
            self.clear_value_color[1],
            self.clear_value_color[2],
            self.clear_value_color[3],
            self.width,
            self.height,
            self.fragment_stack_address,
            self.fragment_stack_size,
            0, // unused
            0, // unused
            self.one,
            self.supersampled_height,
            self.dubya,
            self.onscreen,
        ];
        for word in common {
            out.extend_from_slice(&word.to_le_bytes());
        }
        if generation == HardwareGeneration::Mali400 {
            for word in [self.blocking, self.scale, self.foureight] {
                out.extend_from_slice(&word.to_le_bytes());
            }
        }
    }
}

/// One write-back (output target) descriptor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WbRegisters {
    pub wb_type: u32,
    pub address: u32,
    pub pixel_format: u32,
    pub downsample_factor: u32,
    pub pixel_layout: u32,
    /// Row pitch in 8-byte units.
    pub pitch: u32,
    pub mrt_bits: u32,
    pub mrt_pitch: u32,
}

impl WbRegisters {
    pub const SIZE_BYTES: usize = 48;

    pub const DISABLED: WbRegisters = WbRegisters {
        wb_type: WB_TYPE_DISABLED,
        address: 0,
        pixel_format: 0,
        downsample_factor: 0,
        pixel_layout: 0,
        pitch: 0,
        mrt_bits: 0,
        mrt_pitch: 0,
    };

    fn encode_le(&self, out: &mut Vec<u8>) {
        for word in [
            self.wb_type,
            self.address,
            self.pixel_format,
            self.downsample_factor,
            self.pixel_layout,
            self.pitch,
            self.mrt_bits,
            self.mrt_pitch,
            0, // zero
            0, // reserved
            0, // reserved
            0, // reserved
        ] {
            out.extend_from_slice(&word.to_le_bytes());
        }
    }
}

/// One PP job submission (one core's worth of tiles).
#[derive(Clone, Copy, Debug)]
pub struct PpJob {
    pub user_job_ptr: u32,
    pub priority: u32,
    /// r2p1 only.
    pub watchdog_msecs: u32,
    pub frame: PpFrameRegisters,
    pub wb: [WbRegisters; 3],
    pub abort_id: u32,
}

pub fn encoded_size(generation: HardwareGeneration, api: KernelApi) -> usize {
    let envelope = match api {
        KernelApi::R2P1 => 16,     // header (3 words incl. watchdog) + abort_id
        KernelApi::R3P0 => 24,     // header + perf words + abort_id
        KernelApi::R3P1 => 32,     // + frame_builder_id, flush_id
        KernelApi::R3P2 => 36,     // + reserved
    };
    envelope + PpFrameRegisters::size_bytes(generation) + 3 * WbRegisters::SIZE_BYTES
}

/// Encode `job` for the given hardware generation and kernel revision.
pub fn encode(generation: HardwareGeneration, api: KernelApi, job: &PpJob) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_size(generation, api));
    out.extend_from_slice(&job.user_job_ptr.to_le_bytes());
    out.extend_from_slice(&job.priority.to_le_bytes());
    if api == KernelApi::R2P1 {
        out.extend_from_slice(&job.watchdog_msecs.to_le_bytes());
    }
    job.frame.encode_le(generation, &mut out);
    for wb in &job.wb {
        wb.encode_le(&mut out);
    }
    if api >= KernelApi::R3P0 {
        // perf_counter_flag, perf_counter_src0, perf_counter_src1
        out.extend_from_slice(&[0u8; 12]);
    }
    if api >= KernelApi::R3P1 {
        out.extend_from_slice(&[0u8; 8]); // frame_builder_id, flush_id
    }
    out.extend_from_slice(&job.abort_id.to_le_bytes());
    if api == KernelApi::R3P2 {
        out.extend_from_slice(&[0u8; 4]); // reserved
    }
    debug_assert_eq!(out.len(), encoded_size(generation, api));
    out
}
