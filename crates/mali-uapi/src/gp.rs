//! Geometry-processor job-start payloads.
//!
//! A GP job is six frame registers (the VS and PLBU command-queue bounds
//! and the tile heap bounds) inside a small envelope whose layout grew
//! across kernel revisions:
//!
//! - r2p1: `user_job_ptr, priority, watchdog_msecs, frame[6], abort_id`
//! - r3p0: drops the watchdog, appends three perf-counter words
//! - r3p1: appends `frame_builder_id` and `flush_id`
//! - r3p2: appends one reserved word

use crate::KernelApi;

/// The six GP frame registers, in hardware order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GpFrameRegisters {
    pub vs_commands_start: u32,
    pub vs_commands_end: u32,
    pub plbu_commands_start: u32,
    pub plbu_commands_end: u32,
    pub tile_heap_start: u32,
    pub tile_heap_end: u32,
}

impl GpFrameRegisters {
    pub const SIZE_BYTES: usize = 24;

    fn encode_le(&self, out: &mut Vec<u8>) {
        for word in [
            self.vs_commands_start,
            self.vs_commands_end,
            self.plbu_commands_start,
            self.plbu_commands_end,
            self.tile_heap_start,
            self.tile_heap_end,
        ] {
            out.extend_from_slice(&word.to_le_bytes());
        }
    }
}

/// One GP job submission.
#[derive(Clone, Copy, Debug, Default)]
pub struct GpJob {
    /// Driver-side tag echoed back in the completion notification.
    pub user_job_ptr: u32,
    pub priority: u32,
    /// Only encoded for r2p1; later kernels dropped the per-job watchdog.
    pub watchdog_msecs: u32,
    pub frame: GpFrameRegisters,
    /// Present in the wire format but never used; always zero here.
    pub abort_id: u32,
}

/// Size of the encoded payload for the given kernel revision.
pub fn encoded_size(api: KernelApi) -> usize {
    match api {
        KernelApi::R2P1 => 40,
        KernelApi::R3P0 => 48,
        KernelApi::R3P1 => 56,
        KernelApi::R3P2 => 60,
    }
}

/// Encode `job` for the given kernel revision.
pub fn encode(api: KernelApi, job: &GpJob) -> Vec<u8> {
    let mut out = Vec::with_capacity(encoded_size(api));
    out.extend_from_slice(&job.user_job_ptr.to_le_bytes());
    out.extend_from_slice(&job.priority.to_le_bytes());
    if api == KernelApi::R2P1 {
        out.extend_from_slice(&job.watchdog_msecs.to_le_bytes());
    }
    job.frame.encode_le(&mut out);
    if api >= KernelApi::R3P0 {
        // perf_counter_flag, perf_counter_src0, perf_counter_src1
        out.extend_from_slice(&[0u8; 12]);
    }
    if api >= KernelApi::R3P1 {
        // frame_builder_id, flush_id
        out.extend_from_slice(&[0u8; 8]);
    }
    out.extend_from_slice(&job.abort_id.to_le_bytes());
    if api == KernelApi::R3P2 {
        out.extend_from_slice(&[0u8; 4]); // reserved
    }
    debug_assert_eq!(out.len(), encoded_size(api));
    out
}
