//! Frame pipeline behaviour against the headless device.

mod common;

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use ferry_renderer::{
    FrameConstants, FrameStatus, PassDesc, RenderError, Renderer, Uploader,
};
use ferry_rhi::headless::{Command, FenceMode, Fault, TargetId};
use ferry_rhi::shader::ShaderStage;

#[test]
fn test_third_draw_waits_for_first() {
    let device = common::device();
    let ctx = common::context(device.clone(), 2);
    let mut uploader = Uploader::new(device.clone());
    let mut renderer = Renderer::init(&ctx, &mut uploader).unwrap();
    let constants = FrameConstants::new(ctx.config(), 0.0, 0.016);

    device.set_fence_mode(FenceMode::Manual);
    let (tx, rx) = mpsc::channel();
    let worker = thread::spawn(move || {
        for draw in 1..=5 {
            let status = renderer.draw(&constants).unwrap();
            assert_eq!(status, FrameStatus::Presented);
            assert!(renderer.frames_in_flight() <= 2);
            tx.send(draw).unwrap();
        }
        renderer
    });

    let timeout = Duration::from_secs(5);
    assert_eq!(rx.recv_timeout(timeout), Ok(1));
    assert_eq!(rx.recv_timeout(timeout), Ok(2));
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

    // Fence 0 belonged to the index buffer upload; draw 1 signals fence 1.
    assert_eq!(device.signal_oldest(), Some(1));
    assert_eq!(rx.recv_timeout(timeout), Ok(3));
    assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

    assert_eq!(device.signal_oldest(), Some(2));
    assert_eq!(rx.recv_timeout(timeout), Ok(4));
    assert_eq!(device.signal_oldest(), Some(3));
    assert_eq!(rx.recv_timeout(timeout), Ok(5));

    let mut renderer = worker.join().unwrap();
    assert_eq!(renderer.frames_in_flight(), 2);
    assert_eq!(device.stats().pending_fences, 2);

    device.set_fence_mode(FenceMode::Auto);
    renderer.deinit();
    assert_eq!(device.stats().fences, 0);
}

#[test]
fn test_pending_frames_never_exceed_slots() {
    let device = common::device();
    let ctx = common::context(device.clone(), 3);
    let mut uploader = Uploader::new(device.clone());
    let mut renderer = Renderer::init(&ctx, &mut uploader).unwrap();
    let constants = FrameConstants::new(ctx.config(), 0.0, 0.0);

    assert_eq!(renderer.frame_slots(), 3);
    for _ in 0..10 {
        renderer.draw(&constants).unwrap();
        assert!(renderer.frames_in_flight() <= 3);
        assert!(device.stats().fences <= 3);
    }
}

#[test]
fn test_frame_records_chain_in_order() {
    let device = common::device();
    let ctx = common::context(device.clone(), 2);
    let mut uploader = Uploader::new(device.clone());
    let mut renderer = Renderer::init(&ctx, &mut uploader).unwrap();
    let constants = FrameConstants::new(ctx.config(), 1.5, 0.25);

    renderer.draw(&constants).unwrap();

    let submissions = device.submissions();
    let frame = submissions.last().unwrap();
    assert_eq!(frame.presented, Some(0));

    let pushed: Vec<_> = frame
        .commands
        .iter()
        .filter_map(|command| match command {
            Command::PushConstants { stage, data } => Some((*stage, data.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(pushed.len(), 2);
    assert!(pushed.iter().all(|(_, data)| data == constants.as_bytes()));

    let pipelines: Vec<_> = frame
        .commands
        .iter()
        .filter_map(|command| match command {
            Command::BindPipeline { name, constants } => Some((name.clone(), constants.clone())),
            _ => None,
        })
        .collect();
    let names: Vec<_> = pipelines.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["screen", "post", "post2"]);
    for (_, stages) in &pipelines {
        assert_eq!(stages, &vec![ShaderStage::Vertex, ShaderStage::Fragment]);
    }

    let targets: Vec<_> = frame
        .commands
        .iter()
        .filter_map(|command| match command {
            Command::BeginPass { target } => Some(*target),
            _ => None,
        })
        .collect();
    let sampled: Vec<_> = frame
        .commands
        .iter()
        .filter_map(|command| match command {
            Command::BindResources { textures, .. } => Some(textures.clone()),
            _ => None,
        })
        .collect();

    let (TargetId::Image(screen), TargetId::Image(post)) = (targets[0], targets[1]) else {
        panic!("offscreen passes should draw into images: {:?}", targets);
    };
    assert_eq!(targets[2], TargetId::Surface(0));
    assert_eq!(sampled, vec![vec![], vec![screen], vec![post]]);

    let draws = frame
        .commands
        .iter()
        .filter(|command| {
            matches!(
                command,
                Command::DrawIndexed {
                    index_count: 3,
                    instance_count: 1
                }
            )
        })
        .count();
    assert_eq!(draws, 3);
    assert_eq!(frame.commands.last(), Some(&Command::EndPass));
}

#[test]
fn test_unavailable_surface_skips_frame() {
    let device = common::device();
    let ctx = common::context(device.clone(), 2);
    let mut uploader = Uploader::new(device.clone());
    let mut renderer = Renderer::init(&ctx, &mut uploader).unwrap();
    let constants = FrameConstants::new(ctx.config(), 0.0, 0.0);
    let submitted = device.stats().submissions;

    device.set_surface_available(false);
    assert_eq!(renderer.draw(&constants).unwrap(), FrameStatus::Skipped);
    let stats = device.stats();
    assert_eq!(stats.submissions, submitted);
    assert_eq!(stats.open_command_lists, 0);
    assert_eq!(renderer.frames_in_flight(), 0);

    device.set_surface_available(true);
    assert_eq!(renderer.draw(&constants).unwrap(), FrameStatus::Presented);
}

#[test]
fn test_failed_frame_is_abandoned() {
    let device = common::device();
    let ctx = common::context(device.clone(), 2);
    let mut uploader = Uploader::new(device.clone());
    let mut renderer = Renderer::init(&ctx, &mut uploader).unwrap();
    let constants = FrameConstants::new(ctx.config(), 0.0, 0.0);

    for fault in [Fault::BeginCommands, Fault::AcquireSurface, Fault::Submit] {
        device.inject(fault);
        assert!(
            matches!(renderer.draw(&constants), Err(RenderError::Device(_))),
            "{:?}",
            fault
        );
        assert_eq!(device.stats().open_command_lists, 0);
        assert_eq!(renderer.draw(&constants).unwrap(), FrameStatus::Presented);
    }
}

#[test]
fn test_custom_single_pass_chain() {
    let device = common::device();
    let ctx = common::context(device.clone(), 2);
    let mut uploader = Uploader::new(device.clone());
    let mut renderer =
        Renderer::with_chain(&ctx, &mut uploader, &[PassDesc::surface("present", 0)]).unwrap();
    assert_eq!(renderer.chain().names().collect::<Vec<_>>(), vec!["present"]);

    let constants = FrameConstants::new(ctx.config(), 0.0, 0.0);
    renderer.draw(&constants).unwrap();
    assert_eq!(device.stats().images, 0);
}

#[test]
fn test_invalid_chain_is_rejected() {
    let device = common::device();
    let ctx = common::context(device.clone(), 2);
    let mut uploader = Uploader::new(device.clone());
    let result = Renderer::with_chain(
        &ctx,
        &mut uploader,
        &[PassDesc::surface("a", 0), PassDesc::surface("b", 1)],
    );
    assert!(matches!(result, Err(RenderError::InvalidChain(_))));
    assert_eq!(device.stats().pipelines, 0);
}

#[test]
fn test_teardown_releases_everything() {
    let device = common::device();
    let ctx = common::context(device.clone(), 2);
    let mut uploader = Uploader::new(device.clone());
    let mut renderer = Renderer::init(&ctx, &mut uploader).unwrap();
    let constants = FrameConstants::new(ctx.config(), 0.0, 0.0);
    renderer.draw(&constants).unwrap();
    renderer.draw(&constants).unwrap();

    renderer.deinit();
    renderer.deinit();
    uploader.deinit();

    let stats = device.stats();
    assert_eq!(
        (
            stats.buffers,
            stats.images,
            stats.samplers,
            stats.pipelines,
            stats.staging,
            stats.fences
        ),
        (0, 0, 0, 0, 0, 0)
    );
}
