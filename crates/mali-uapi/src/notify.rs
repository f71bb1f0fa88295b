//! Completion-notification decoding.
//!
//! `WAIT_FOR_NOTIFICATION` blocks in the kernel and fills a fixed buffer:
//! a type word keyed by `subsystem << 16 | id`, then a payload whose shape
//! depends on the type. The kernel interface times out every 25 ms and the
//! caller re-issues the wait until a real event arrives.

use thiserror::Error;

/// How long one kernel-side wait lasts before returning [`Notification::Timeout`].
pub const WAIT_TIMEOUT_MS: u64 = 25;

/// Fixed size of the notification exchange buffer.
pub const NOTIFICATION_BUFFER_SIZE: usize = 64;

pub const NOTIFICATION_CORE_TIMEOUT: u32 = 0x0000_0001;
pub const NOTIFICATION_PP_FINISHED: u32 = 0x0002_0002;
pub const NOTIFICATION_GP_STALLED: u32 = 0x0003_0001;
pub const NOTIFICATION_GP_FINISHED: u32 = 0x0003_0002;

/// Job status word reported by finished notifications.
pub const JOB_STATUS_END_SUCCESS: u32 = 1 << 16;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification buffer too short: {0} bytes")]
    Truncated(usize),
}

/// A decoded kernel notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Notification {
    /// The 25 ms kernel wait elapsed without an event; wait again.
    Timeout,
    GpFinished {
        user_job_ptr: u32,
        status: u32,
        heap_current_address: u32,
    },
    /// The PLBU ran out of tile-heap memory mid-job.
    GpStalled { user_job_ptr: u32 },
    PpFinished { user_job_ptr: u32, status: u32 },
    /// Notification types this driver has no handler for.
    Unknown { code: u32 },
}

fn word(buf: &[u8], index: usize) -> Result<u32, NotifyError> {
    let at = index * 4;
    let bytes = buf
        .get(at..at + 4)
        .ok_or(NotifyError::Truncated(buf.len()))?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Decode a filled notification buffer.
pub fn decode_notification(buf: &[u8]) -> Result<Notification, NotifyError> {
    let code = word(buf, 0)?;
    Ok(match code {
        NOTIFICATION_CORE_TIMEOUT => Notification::Timeout,
        NOTIFICATION_GP_FINISHED => Notification::GpFinished {
            user_job_ptr: word(buf, 1)?,
            status: word(buf, 2)?,
            // irq_status, status_reg, vscl_stop, plbu_stop occupy words 3-6
            heap_current_address: word(buf, 7)?,
        },
        NOTIFICATION_GP_STALLED => Notification::GpStalled {
            user_job_ptr: word(buf, 1)?,
        },
        NOTIFICATION_PP_FINISHED => Notification::PpFinished {
            user_job_ptr: word(buf, 1)?,
            status: word(buf, 2)?,
        },
        code => Notification::Unknown { code },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(words: &[u32]) -> Vec<u8> {
        let mut out = vec![0u8; NOTIFICATION_BUFFER_SIZE];
        for (i, w) in words.iter().enumerate() {
            out[i * 4..i * 4 + 4].copy_from_slice(&w.to_le_bytes());
        }
        out
    }

    #[test]
    fn gp_finished_pulls_the_heap_watermark() {
        let buf = buffer(&[
            NOTIFICATION_GP_FINISHED,
            0x42,
            JOB_STATUS_END_SUCCESS,
            0,
            0,
            0,
            0,
            0x4080_0000,
        ]);
        assert_eq!(
            decode_notification(&buf).unwrap(),
            Notification::GpFinished {
                user_job_ptr: 0x42,
                status: JOB_STATUS_END_SUCCESS,
                heap_current_address: 0x4080_0000,
            }
        );
    }

    #[test]
    fn timeouts_and_unknown_codes_decode() {
        assert_eq!(
            decode_notification(&buffer(&[NOTIFICATION_CORE_TIMEOUT])).unwrap(),
            Notification::Timeout
        );
        assert_eq!(
            decode_notification(&buffer(&[0x0009_0001])).unwrap(),
            Notification::Unknown { code: 0x0009_0001 }
        );
    }

    #[test]
    fn short_buffers_are_rejected() {
        assert!(matches!(
            decode_notification(&[0u8; 2]),
            Err(NotifyError::Truncated(2))
        ));
    }
}
