//! Pixel-processor job assembly.
//!
//! One PP job is submitted per active core; each core walks its own
//! Hilbert-ordered dispatch stream over the frame's PLB and writes back to
//! the shared color target.

use mali_uapi::pp::{
    PixelFormat, PpFrameRegisters, PpJob, WbRegisters, WB_TYPE_COLOR,
};
use mali_uapi::{HardwareGeneration, HardwareInfo};

use crate::frame::Frame;
use crate::plb::Plb;

/// The color buffer the PP writes back to.
#[derive(Clone, Copy, Debug)]
pub struct RenderTarget {
    pub address: u32,
    pub width: u32,
    pub height: u32,
    /// Row pitch in bytes.
    pub pitch: u32,
    pub format: PixelFormat,
}

#[derive(Clone, Copy, Debug)]
pub struct ClearValues {
    pub depth: f32,
    pub stencil: u8,
    pub color: [f32; 4],
}

impl Default for ClearValues {
    fn default() -> Self {
        Self {
            depth: 1.0,
            stencil: 0,
            color: [0.0; 4],
        }
    }
}

impl ClearValues {
    /// 24-bit depth clear value.
    pub fn depth_bits(&self) -> u32 {
        (self.depth.clamp(0.0, 1.0) * 0x00FF_FFFF as f32) as u32
    }

    /// Packed ABGR8888 clear color, replicated per subsample.
    pub fn color_word(&self) -> u32 {
        let channel = |v: f32| (v.clamp(0.0, 1.0) * 255.0) as u32;
        (channel(self.color[3]) << 24)
            | (channel(self.color[2]) << 16)
            | (channel(self.color[1]) << 8)
            | channel(self.color[0])
    }
}

/// Build the per-core PP jobs for a flushed frame. Job tags are
/// `tag_base + core`.
pub fn build_pp_jobs(
    info: &HardwareInfo,
    frame: &Frame,
    plb: &Plb,
    target: &RenderTarget,
    clear: &ClearValues,
    tag_base: u32,
) -> Vec<PpJob> {
    // Both dimensions 16-aligned means the hardware defaults apply and the
    // registers stay zero.
    let (width, height) = if target.width % 16 == 0 && target.height % 16 == 0 {
        (0, 0)
    } else {
        (target.width, target.height)
    };

    let wb_color = WbRegisters {
        wb_type: WB_TYPE_COLOR,
        address: target.address,
        pixel_format: target.format as u32,
        downsample_factor: 0,
        pixel_layout: 0,
        pitch: target.pitch / 8,
        mrt_bits: 0,
        mrt_pitch: 0,
    };

    (0..info.pp_core_count)
        .map(|core| {
            let frame_registers = PpFrameRegisters {
                plbu_array_address: frame.arena.bus_address(frame.pp_streams[core as usize]),
                render_address: frame.arena.bus_address(frame.default_render_state),
                clear_value_depth: clear.depth_bits(),
                clear_value_stencil: u32::from(clear.stencil),
                clear_value_color: [clear.color_word(); 4],
                width,
                height,
                supersampled_height: target.height.max(1) - 1,
                blocking: match info.generation {
                    HardwareGeneration::Mali200 => 0,
                    HardwareGeneration::Mali400 => {
                        (plb.shift_max << 28) | (plb.shift_h << 16) | plb.shift_w
                    }
                },
                ..PpFrameRegisters::default()
            };
            PpJob {
                user_job_ptr: tag_base + core,
                priority: 0,
                watchdog_msecs: 500,
                frame: frame_registers,
                wb: [wb_color, WbRegisters::DISABLED, WbRegisters::DISABLED],
                abort_id: 0,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameSync, FRAME_MEMORY_SIZE};
    use mali_mem::Arena;
    use mali_uapi::KernelApi;
    use std::sync::Arc;

    fn info(cores: u32) -> HardwareInfo {
        HardwareInfo {
            generation: HardwareGeneration::Mali400,
            kernel_api: KernelApi::R3P1,
            pp_core_count: cores,
        }
    }

    fn target(width: u32, height: u32) -> RenderTarget {
        RenderTarget {
            address: 0x4400_0000,
            width,
            height,
            pitch: width * 4,
            format: PixelFormat::Rgba8888,
        }
    }

    #[test]
    fn one_job_per_core_with_distinct_streams() {
        let arena = Arena::host("frame", 0x4000_0000, FRAME_MEMORY_SIZE);
        let plb = Plb::new(800, 480, HardwareGeneration::Mali400);
        let frame = Frame::new(0, arena, Arc::new(FrameSync::new()), &plb, 2).unwrap();

        let jobs = build_pp_jobs(
            &info(2),
            &frame,
            &plb,
            &target(800, 480),
            &ClearValues::default(),
            0x100,
        );
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[0].user_job_ptr, 0x100);
        assert_eq!(jobs[1].user_job_ptr, 0x101);
        assert_ne!(
            jobs[0].frame.plbu_array_address,
            jobs[1].frame.plbu_array_address
        );
        // 800x480 is 16-aligned in both dimensions: defaults apply.
        assert_eq!((jobs[0].frame.width, jobs[0].frame.height), (0, 0));
        assert_eq!(jobs[0].wb[0].wb_type, WB_TYPE_COLOR);
        assert_eq!(jobs[0].wb[0].pitch, 800 * 4 / 8);
    }

    #[test]
    fn unaligned_surface_keeps_explicit_dimensions() {
        let arena = Arena::host("frame", 0x4000_0000, FRAME_MEMORY_SIZE);
        let plb = Plb::new(801, 480, HardwareGeneration::Mali400);
        let frame = Frame::new(0, arena, Arc::new(FrameSync::new()), &plb, 1).unwrap();

        let jobs = build_pp_jobs(
            &info(1),
            &frame,
            &plb,
            &target(801, 480),
            &ClearValues::default(),
            0,
        );
        assert_eq!((jobs[0].frame.width, jobs[0].frame.height), (801, 480));
    }

    #[test]
    fn clear_values_are_packed() {
        let clear = ClearValues {
            depth: 1.0,
            stencil: 0,
            color: [1.0, 0.0, 0.0, 1.0],
        };
        assert_eq!(clear.depth_bits(), 0x00FF_FFFF);
        assert_eq!(clear.color_word(), 0xFF00_00FF);
    }
}
