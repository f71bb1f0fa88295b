use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mali_gpu::testing::FakeChannel;
use mali_gpu::{Context, DriverError, HardwareGeneration, FRAME_COUNT};

fn drain_one_frame(channel: &FakeChannel, job: usize) {
    let gp_tag = channel.gp_jobs()[job].user_job_ptr;
    channel.finish_gp(gp_tag);
    // The waiter submits the PP job once it sees the GP completion.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while channel.pp_jobs().len() <= job {
        assert!(std::time::Instant::now() < deadline, "pp job never submitted");
        thread::yield_now();
    }
    let pp_tag = channel.pp_jobs()[job].user_job_ptr;
    channel.finish_pp(pp_tag);
}

#[test]
fn frame_slot_is_not_recycled_before_completion() {
    let channel = Arc::new(FakeChannel::manual(HardwareGeneration::Mali400, 1));
    let mut ctx = Context::new(channel.clone()).unwrap();
    ctx.set_surface(256, 256).unwrap();

    // Occupy every slot with an in-flight frame.
    for _ in 0..FRAME_COUNT {
        ctx.frame_new().unwrap();
        ctx.clear_depth_buffer().unwrap();
        ctx.frame_flush().unwrap();
    }
    assert_eq!(channel.gp_jobs().len(), FRAME_COUNT);

    // The next frame_new needs slot 0 back and must block until that
    // frame's jobs are confirmed done.
    let (tx, rx) = mpsc::channel();
    let worker = thread::spawn(move || {
        ctx.frame_new().unwrap();
        tx.send(()).unwrap();
        ctx
    });
    assert!(
        rx.recv_timeout(Duration::from_millis(200)).is_err(),
        "frame_new returned before the slot's jobs completed"
    );

    // Complete the first frame's GP and PP jobs; only then may frame_new
    // return.
    drain_one_frame(&channel, 0);
    rx.recv_timeout(Duration::from_secs(5))
        .expect("frame_new still blocked after completion");
    let ctx = worker.join().unwrap();

    // Let the remaining frames finish so teardown doesn't leave waiters.
    drain_one_frame(&channel, 1);
    drain_one_frame(&channel, 2);
    ctx.finish();
}

#[test]
fn back_to_back_frames_reuse_slots_in_order() {
    let channel = Arc::new(FakeChannel::new(HardwareGeneration::Mali400, 1));
    let mut ctx = Context::new(channel.clone()).unwrap();
    ctx.set_surface(640, 480).unwrap();

    for _ in 0..(FRAME_COUNT * 2) {
        ctx.frame_new().unwrap();
        ctx.clear_depth_buffer().unwrap();
        ctx.frame_flush().unwrap();
    }
    ctx.finish();

    let gp_jobs = channel.gp_jobs();
    assert_eq!(gp_jobs.len(), FRAME_COUNT * 2);
    // Strict submission order: tags are monotonically increasing.
    for pair in gp_jobs.windows(2) {
        assert!(pair[0].user_job_ptr < pair[1].user_job_ptr);
    }
    assert_eq!(channel.pp_jobs().len(), FRAME_COUNT * 2);
}

#[test]
fn flush_without_a_frame_is_an_error() {
    let channel = Arc::new(FakeChannel::new(HardwareGeneration::Mali400, 1));
    let mut ctx = Context::new(channel).unwrap();
    ctx.set_surface(64, 64).unwrap();
    assert!(matches!(ctx.frame_flush(), Err(DriverError::NoFrame)));
}

#[test]
fn draws_require_a_surface_and_a_frame() {
    let channel = Arc::new(FakeChannel::new(HardwareGeneration::Mali400, 1));
    let mut ctx = Context::new(channel).unwrap();
    assert!(matches!(ctx.frame_new(), Err(DriverError::NoSurface)));

    ctx.set_surface(64, 64).unwrap();
    assert!(matches!(
        ctx.clear_depth_buffer(),
        Err(DriverError::NoFrame)
    ));
}

#[test]
fn mali200_frames_flow_end_to_end() {
    let channel = Arc::new(FakeChannel::new(HardwareGeneration::Mali200, 1));
    let mut ctx = Context::new(channel.clone()).unwrap();
    ctx.set_surface(640, 480).unwrap();

    ctx.frame_new().unwrap();
    ctx.clear_depth_buffer().unwrap();
    ctx.frame_flush().unwrap();
    ctx.finish();

    assert_eq!(channel.gp_jobs().len(), 1);
    assert_eq!(channel.pp_jobs().len(), 1);
    // Mali-200 has no blocking word; the builder leaves it zero.
    assert_eq!(channel.pp_jobs()[0].frame.blocking, 0);
}
