//! In-process fake device channel.
//!
//! Backs the whole stack with heap memory and a scripted notification
//! queue, so encoding and orchestration run (and are tested) without a
//! Mali device node. Completions either fire automatically on submission
//! or are raised manually by the test to exercise the blocking paths.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use mali_mem::Arena;
use mali_uapi::gp::GpJob;
use mali_uapi::notify::{Notification, JOB_STATUS_END_SUCCESS};
use mali_uapi::pp::PpJob;
use mali_uapi::{HardwareGeneration, HardwareInfo, KernelApi};

use crate::channel::GpuBackend;
use crate::error::DeviceError;

const FAKE_BUS_BASE: u32 = 0x4000_0000;

#[derive(Default)]
struct FakeState {
    queue: VecDeque<Notification>,
    next_bus_offset: u32,
    gp_jobs: Vec<GpJob>,
    pp_jobs: Vec<PpJob>,
}

pub struct FakeChannel {
    info: HardwareInfo,
    auto_complete: bool,
    state: Mutex<FakeState>,
}

impl FakeChannel {
    /// A channel that completes every job as soon as it is submitted.
    pub fn new(generation: HardwareGeneration, pp_core_count: u32) -> Self {
        Self {
            info: HardwareInfo {
                generation,
                kernel_api: KernelApi::R3P1,
                pp_core_count,
            },
            auto_complete: true,
            state: Mutex::new(FakeState::default()),
        }
    }

    /// A channel whose jobs only complete when the test says so.
    pub fn manual(generation: HardwareGeneration, pp_core_count: u32) -> Self {
        Self {
            auto_complete: false,
            ..Self::new(generation, pp_core_count)
        }
    }

    pub fn finish_gp(&self, user_job_ptr: u32) {
        self.state
            .lock()
            .unwrap()
            .queue
            .push_back(Notification::GpFinished {
                user_job_ptr,
                status: JOB_STATUS_END_SUCCESS,
                heap_current_address: 0,
            });
    }

    pub fn finish_pp(&self, user_job_ptr: u32) {
        self.state
            .lock()
            .unwrap()
            .queue
            .push_back(Notification::PpFinished {
                user_job_ptr,
                status: JOB_STATUS_END_SUCCESS,
            });
    }

    pub fn gp_jobs(&self) -> Vec<GpJob> {
        self.state.lock().unwrap().gp_jobs.clone()
    }

    pub fn pp_jobs(&self) -> Vec<PpJob> {
        self.state.lock().unwrap().pp_jobs.clone()
    }
}

impl GpuBackend for FakeChannel {
    fn hardware(&self) -> HardwareInfo {
        self.info
    }

    fn map_arena(&self, name: &'static str, size: u32) -> Result<Arena, DeviceError> {
        let mut state = self.state.lock().unwrap();
        let bus = FAKE_BUS_BASE + state.next_bus_offset;
        state.next_bus_offset += size;
        Ok(Arena::host(name, bus, size))
    }

    fn start_gp_job(&self, job: &GpJob) -> Result<(), DeviceError> {
        let mut state = self.state.lock().unwrap();
        state.gp_jobs.push(*job);
        if self.auto_complete {
            state.queue.push_back(Notification::GpFinished {
                user_job_ptr: job.user_job_ptr,
                status: JOB_STATUS_END_SUCCESS,
                heap_current_address: 0,
            });
        }
        Ok(())
    }

    fn start_pp_job(&self, job: &PpJob) -> Result<(), DeviceError> {
        let mut state = self.state.lock().unwrap();
        state.pp_jobs.push(*job);
        if self.auto_complete {
            state.queue.push_back(Notification::PpFinished {
                user_job_ptr: job.user_job_ptr,
                status: JOB_STATUS_END_SUCCESS,
            });
        }
        Ok(())
    }

    fn wait_notification(&self) -> Result<Notification, DeviceError> {
        if let Some(n) = self.state.lock().unwrap().queue.pop_front() {
            return Ok(n);
        }
        // Nothing pending: behave like the kernel's 25 ms timeout, scaled
        // down to keep tests fast.
        std::thread::sleep(Duration::from_millis(1));
        Ok(Notification::Timeout)
    }
}
