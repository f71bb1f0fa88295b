//! The kernel device channel.
//!
//! [`GpuBackend`] is the seam between the encoding layers and the kernel:
//! job submission, blocking notification waits and GPU-memory mapping.
//! [`DeviceChannel`] is the real implementation over `/dev/mali`; tests and
//! hardware-less development use [`crate::testing::FakeChannel`].

use std::ffi::CString;
use std::ptr::NonNull;
use std::sync::Mutex;

use tracing::{debug, info};

use mali_mem::Arena;
use mali_uapi::gp::GpJob;
use mali_uapi::notify::{decode_notification, Notification, NOTIFICATION_BUFFER_SIZE};
use mali_uapi::pp::PpJob;
use mali_uapi::{ioctl, HardwareGeneration, HardwareInfo, KernelApi};

use crate::error::DeviceError;

pub const DEVICE_PATH: &str = "/dev/mali";

/// Everything the driver needs from the kernel side.
pub trait GpuBackend: Send + Sync {
    fn hardware(&self) -> HardwareInfo;

    /// Map `size` bytes of GPU-visible memory as a fresh arena.
    fn map_arena(&self, name: &'static str, size: u32) -> Result<Arena, DeviceError>;

    fn start_gp_job(&self, job: &GpJob) -> Result<(), DeviceError>;

    fn start_pp_job(&self, job: &PpJob) -> Result<(), DeviceError>;

    /// One blocking kernel wait; returns [`Notification::Timeout`] every
    /// 25 ms with no event, and the caller re-issues it.
    fn wait_notification(&self) -> Result<Notification, DeviceError>;
}

/// The real `/dev/mali` channel.
pub struct DeviceChannel {
    fd: i32,
    info: HardwareInfo,
    bus_base: u32,
    mem_size: u32,
    /// Next unmapped offset within the kernel-provided GPU address range.
    next_offset: Mutex<u32>,
}

fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(-1)
}

fn ioctl_buf(fd: i32, request: u64, buf: *mut libc::c_void) -> Result<(), DeviceError> {
    let r = unsafe { libc::ioctl(fd, request as libc::c_ulong, buf) };
    if r < 0 {
        return Err(DeviceError::Ioctl {
            request,
            errno: last_errno(),
        });
    }
    Ok(())
}

fn ioctl_u32(fd: i32, request: u64) -> Result<u32, DeviceError> {
    let mut word: u32 = 0;
    ioctl_buf(fd, request, &mut word as *mut u32 as *mut libc::c_void)?;
    Ok(word)
}

impl DeviceChannel {
    /// Open the device and detect hardware generation, kernel revision and
    /// core count. Failure here is fatal to the session.
    pub fn open(path: &str) -> Result<Self, DeviceError> {
        let c_path = CString::new(path).expect("device path contains NUL");
        let fd = unsafe { libc::open(c_path.as_ptr(), libc::O_RDWR) };
        if fd < 0 {
            return Err(DeviceError::Open {
                path: path.into(),
                errno: last_errno(),
            });
        }

        let api_word = ioctl_u32(fd, ioctl::GET_API_VERSION)?;
        let kernel_api = KernelApi::from_api_version(api_word)?;

        let pp_version = ioctl_u32(fd, ioctl::PP_GET_CORE_VERSION)?;
        let generation = HardwareGeneration::from_pp_core_version(pp_version)?;

        let pp_core_count = match generation {
            HardwareGeneration::Mali200 => 1,
            HardwareGeneration::Mali400 => ioctl_u32(fd, ioctl::PP_GET_NUMBER_OF_CORES)?.max(1),
        };

        let mut mem: [u32; 2] = [0; 2];
        ioctl_buf(fd, ioctl::MEM_INIT, mem.as_mut_ptr() as *mut libc::c_void)?;
        let [bus_base, mem_size] = mem;

        let info = HardwareInfo {
            generation,
            kernel_api,
            pp_core_count,
        };
        info!(
            generation = generation.name(),
            kernel = kernel_api.name(),
            cores = pp_core_count,
            memory = mem_size,
            "opened mali device"
        );

        Ok(Self {
            fd,
            info,
            bus_base,
            mem_size,
            next_offset: Mutex::new(0),
        })
    }
}

impl GpuBackend for DeviceChannel {
    fn hardware(&self) -> HardwareInfo {
        self.info
    }

    fn map_arena(&self, name: &'static str, size: u32) -> Result<Arena, DeviceError> {
        let mut next = self.next_offset.lock().unwrap();
        if *next + size > self.mem_size {
            return Err(DeviceError::Mmap {
                size,
                errno: libc::ENOMEM,
            });
        }
        let offset = *next;

        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size as usize,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                self.fd,
                offset as libc::off_t,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(DeviceError::Mmap {
                size,
                errno: last_errno(),
            });
        }
        *next += size;

        let bus = self.bus_base + offset;
        debug!(name, size, bus, "mapped gpu arena");
        // The mapping stays alive for the process lifetime; arenas are
        // never unmapped individually.
        Ok(unsafe {
            Arena::from_mapped(name, NonNull::new_unchecked(ptr as *mut u8), bus, size)
        })
    }

    fn start_gp_job(&self, job: &GpJob) -> Result<(), DeviceError> {
        let api = self.info.kernel_api;
        let mut payload = mali_uapi::gp::encode(api, job);
        debug!(tag = job.user_job_ptr, "gp job start");
        ioctl_buf(
            self.fd,
            ioctl::gp_start_job(api),
            payload.as_mut_ptr() as *mut libc::c_void,
        )
    }

    fn start_pp_job(&self, job: &PpJob) -> Result<(), DeviceError> {
        let api = self.info.kernel_api;
        let mut payload = mali_uapi::pp::encode(self.info.generation, api, job);
        debug!(tag = job.user_job_ptr, "pp job start");
        ioctl_buf(
            self.fd,
            ioctl::pp_start_job(self.info.generation, api),
            payload.as_mut_ptr() as *mut libc::c_void,
        )
    }

    fn wait_notification(&self) -> Result<Notification, DeviceError> {
        let mut buf = [0u8; NOTIFICATION_BUFFER_SIZE];
        ioctl_buf(
            self.fd,
            ioctl::WAIT_FOR_NOTIFICATION,
            buf.as_mut_ptr() as *mut libc::c_void,
        )?;
        Ok(decode_notification(&buf)?)
    }
}

impl Drop for DeviceChannel {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}
