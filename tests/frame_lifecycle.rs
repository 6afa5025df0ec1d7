// End-to-end frame lifecycle scenarios on the headless device.
//
// The headless device keeps every submission in flight until the CPU waits on
// its fence, and records a violation for any CPU touch of in-flight objects,
// so an empty violation list means the ordering contract held.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use ash::vk;
use weave::backend::headless::GpuEvent;
use weave::backend::{HeadlessDevice, RenderDevice};
use weave::draw::{FrameContext, FrameOutcome, FrameRecorder};
use weave::frame::FrameDescriptorSettings;
use weave::render_loop::{FrameLoop, LoopEvent, LoopState, Step};
use weave::renderer::{Renderer, RendererSettings};
use weave::scene::SceneData;
use weave::RenderResult;

struct CountingRecorder {
    layout: vk::DescriptorSetLayout,
    sets_per_frame: usize,
    /// (slot index, swapchain image index) per recorded frame
    recorded: Vec<(usize, u32)>,
    overlays: usize,
    released: Rc<Cell<usize>>,
}

impl FrameRecorder<HeadlessDevice> for CountingRecorder {
    type Scene = SceneData;

    fn record_scene(&mut self, ctx: &mut FrameContext<'_, HeadlessDevice>, _scene: &SceneData) -> RenderResult<()> {
        for _ in 0..self.sets_per_frame {
            ctx.descriptors.allocate(ctx.device.as_ref(), self.layout)?;
        }
        let released = Rc::clone(&self.released);
        ctx.deletion.defer(move || released.set(released.get() + 1));

        assert!(ctx.targets.sized_image("draw").is_some());
        assert!(ctx.targets.sized_image("depth").is_some());
        self.recorded.push((ctx.slot_index, ctx.targets.image_index));
        Ok(())
    }

    fn record_overlay(&mut self, _ctx: &mut FrameContext<'_, HeadlessDevice>) -> RenderResult<()> {
        self.overlays += 1;
        Ok(())
    }
}

fn extent(width: u32, height: u32) -> vk::Extent2D {
    vk::Extent2D { width, height }
}

fn setup(image_count: u32) -> (Arc<HeadlessDevice>, Renderer<HeadlessDevice>, CountingRecorder) {
    let _ = env_logger::builder().is_test(true).try_init();

    let device = Arc::new(HeadlessDevice::new(extent(800, 600), image_count));
    let settings = RendererSettings {
        extent: extent(800, 600),
        descriptors: FrameDescriptorSettings {
            initial_sets: 16,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut renderer = Renderer::new(Arc::clone(&device), &settings).unwrap();

    let layout = device.create_descriptor_set_layout(&[]).unwrap();
    renderer.defer(move |device: &HeadlessDevice| device.destroy_descriptor_set_layout(layout));

    let recorder = CountingRecorder {
        layout,
        sets_per_frame: 1,
        recorded: Vec::new(),
        overlays: 0,
        released: Rc::new(Cell::new(0)),
    };
    (device, renderer, recorder)
}

fn assert_clean(device: &HeadlessDevice) {
    let violations = device.violations();
    assert!(violations.is_empty(), "contract violations: {violations:#?}");
}

#[test]
fn third_frame_waits_for_first_frames_fence() {
    let (device, mut renderer, mut recorder) = setup(3);
    let scene = SceneData::default();
    let fence0 = renderer.frames().slot(0).sync.render_fence;
    let fence1 = renderer.frames().slot(1).sync.render_fence;

    assert_eq!(renderer.draw(&mut recorder, &scene).unwrap(), FrameOutcome::Presented);
    assert_eq!(renderer.draw(&mut recorder, &scene).unwrap(), FrameOutcome::Presented);
    assert!(device.is_fence_pending(fence0));
    assert!(device.is_fence_pending(fence1));
    assert_eq!(recorder.released.get(), 0);

    device.clear_events();
    renderer.draw(&mut recorder, &scene).unwrap();

    assert_eq!(
        device.events().first(),
        Some(&GpuEvent::FenceWaited { fence: fence0, blocked: true })
    );
    assert!(!device
        .events()
        .contains(&GpuEvent::FenceWaited { fence: fence1, blocked: true }));
    assert!(device.is_fence_pending(fence1));
    // Frame 0's transients went once its fence signaled, frame 1's are still held
    assert_eq!(recorder.released.get(), 1);

    let slots: Vec<usize> = recorder.recorded.iter().map(|&(slot, _)| slot).collect();
    assert_eq!(slots, vec![0, 1, 0]);
    assert_eq!(recorder.overlays, 3);
    assert_clean(&device);
}

#[test]
fn long_run_with_resizes_keeps_contract_and_releases_everything() {
    let (device, mut renderer, mut recorder) = setup(3);
    let scene = SceneData::default();
    let mut frame_loop = FrameLoop::new(Duration::ZERO);

    for iteration in 0..60 {
        if iteration == 10 {
            device.set_surface_extent(extent(640, 480));
            frame_loop.handle_event(LoopEvent::Resized { width: 640, height: 480 });
        }
        if iteration == 30 {
            // Resize the window system never told us about
            device.set_surface_extent(extent(300, 200));
        }
        frame_loop.step(&mut renderer, &mut recorder, &scene).unwrap();
    }

    assert_eq!(renderer.swapchain().extent(), extent(300, 200));
    assert_eq!(frame_loop.stats().recreations, 2);
    assert_eq!(frame_loop.stats().frames_skipped, 1);
    assert_eq!(frame_loop.stats().frames_drawn as usize, recorder.recorded.len());
    assert_clean(&device);

    renderer.shutdown();
    assert_eq!(device.live_object_count(), 0);
    assert_eq!(recorder.released.get(), recorder.recorded.len());
    assert_clean(&device);
}

#[test]
fn recreate_tracks_new_extent_and_image_count() {
    let (device, mut renderer, mut recorder) = setup(2);
    let scene = SceneData::default();
    renderer.draw(&mut recorder, &scene).unwrap();

    let old_views = renderer.swapchain().image_views().to_vec();
    let old_swapchain = renderer.swapchain().swapchain();
    let old_draw = renderer.swapchain().sized_image("draw").unwrap().image;

    device.set_surface_extent(extent(1920, 1080));
    device.set_image_count(3);
    renderer.resize(extent(1920, 1080)).unwrap();

    let swapchain = renderer.swapchain();
    assert_eq!(swapchain.image_count(), 3);
    assert_eq!(swapchain.image_views().len(), 3);
    for sized in swapchain.sized_images() {
        assert_eq!(
            device.image_extent(sized.image.image),
            Some(vk::Extent3D { width: 1920, height: 1080, depth: 1 })
        );
    }
    assert!(!device.is_live(old_swapchain));
    assert!(!device.is_live(old_draw));
    assert!(old_views.iter().all(|&view| !device.is_live(view)));

    // Every image of the new generation gets used
    for _ in 0..6 {
        renderer.draw(&mut recorder, &scene).unwrap();
    }
    let mut images: Vec<u32> = recorder.recorded[1..].iter().map(|&(_, image)| image).collect();
    images.sort_unstable();
    images.dedup();
    assert_eq!(images, vec![0, 1, 2]);
    assert_clean(&device);
}

#[test]
fn minimized_window_never_touches_the_ring() {
    let (device, mut renderer, mut recorder) = setup(3);
    let scene = SceneData::default();
    let mut frame_loop = FrameLoop::new(Duration::from_millis(100));

    assert_eq!(frame_loop.step(&mut renderer, &mut recorder, &scene).unwrap(), Step::Drew);
    frame_loop.handle_event(LoopEvent::Minimized);

    let index = renderer.frames().current_index();
    let recorded = recorder.recorded.len();
    device.clear_events();

    for _ in 0..5 {
        assert_eq!(
            frame_loop.step(&mut renderer, &mut recorder, &scene).unwrap(),
            Step::Idle(Duration::from_millis(100))
        );
    }
    assert_eq!(renderer.frames().current_index(), index);
    assert_eq!(recorder.recorded.len(), recorded);
    assert!(device.events().is_empty());
    assert_eq!(frame_loop.stats().idle_steps, 5);

    frame_loop.handle_event(LoopEvent::Restored);
    assert_eq!(frame_loop.state(), LoopState::ResizePending);
    assert_eq!(frame_loop.step(&mut renderer, &mut recorder, &scene).unwrap(), Step::Recreated);
    assert_eq!(frame_loop.step(&mut renderer, &mut recorder, &scene).unwrap(), Step::Drew);
    assert_clean(&device);
}

#[test]
fn out_of_date_acquire_is_recovered_transparently() {
    let (device, mut renderer, mut recorder) = setup(3);
    let scene = SceneData::default();
    let mut frame_loop = FrameLoop::new(Duration::ZERO);

    device.force_out_of_date(1);
    let index = renderer.frames().current_index();

    assert_eq!(frame_loop.step(&mut renderer, &mut recorder, &scene).unwrap(), Step::Skipped);
    assert_eq!(renderer.frames().current_index(), index);
    assert_eq!(frame_loop.state(), LoopState::ResizePending);
    assert!(recorder.recorded.is_empty());

    assert_eq!(frame_loop.step(&mut renderer, &mut recorder, &scene).unwrap(), Step::Recreated);
    assert_eq!(renderer.swapchain().generation(), 1);
    assert_eq!(frame_loop.step(&mut renderer, &mut recorder, &scene).unwrap(), Step::Drew);
    assert_eq!(frame_loop.state(), LoopState::Running);
    assert_clean(&device);
}

#[test]
fn suboptimal_acquire_draws_then_recreates() {
    let (device, mut renderer, mut recorder) = setup(3);
    let scene = SceneData::default();
    let mut frame_loop = FrameLoop::new(Duration::ZERO);

    device.force_suboptimal(1, 0);
    device.clear_events();

    assert_eq!(frame_loop.step(&mut renderer, &mut recorder, &scene).unwrap(), Step::Drew);
    assert_eq!(recorder.recorded.len(), 1);
    assert!(device
        .events()
        .iter()
        .any(|event| matches!(event, GpuEvent::Presented { .. })));
    assert_clean(&device);

    assert_eq!(frame_loop.state(), LoopState::ResizePending);
    assert_eq!(frame_loop.step(&mut renderer, &mut recorder, &scene).unwrap(), Step::Recreated);
    assert_eq!(renderer.swapchain().generation(), 1);
    assert_eq!(frame_loop.step(&mut renderer, &mut recorder, &scene).unwrap(), Step::Drew);
    assert_eq!(frame_loop.state(), LoopState::Running);
    assert_clean(&device);
}

#[test]
fn suboptimal_present_requests_a_rebuild() {
    let (device, mut renderer, mut recorder) = setup(3);
    let scene = SceneData::default();
    let mut frame_loop = FrameLoop::new(Duration::ZERO);

    device.force_suboptimal(0, 1);

    assert_eq!(frame_loop.step(&mut renderer, &mut recorder, &scene).unwrap(), Step::Drew);
    assert_eq!(renderer.frames().current_index(), 1);
    assert_eq!(frame_loop.state(), LoopState::ResizePending);
    assert_eq!(frame_loop.step(&mut renderer, &mut recorder, &scene).unwrap(), Step::Recreated);
    assert_eq!(renderer.swapchain().generation(), 1);
    assert_eq!(frame_loop.stats().frames_skipped, 0);
    assert_clean(&device);
}

#[test]
fn device_loss_ends_the_loop_with_orderly_teardown() {
    let (device, mut renderer, mut recorder) = setup(3);
    let scene = SceneData::default();
    let mut frame_loop = FrameLoop::new(Duration::ZERO);

    let lost = Arc::clone(&device);
    let result = frame_loop.run(&mut renderer, &mut recorder, &scene, |stats| {
        if stats.frames_drawn == 4 {
            lost.lose_device();
        }
        Vec::new()
    });

    assert!(result.unwrap_err().is_device_lost());
    assert_eq!(frame_loop.stats().frames_drawn, 4);
    assert!(renderer.is_shut_down());
    assert_eq!(device.live_object_count(), 0);
    assert_clean(&device);
}

#[test]
fn fatal_error_stops_drawing_on_later_steps() {
    let (device, mut renderer, mut recorder) = setup(3);
    let scene = SceneData::default();
    let mut frame_loop = FrameLoop::new(Duration::ZERO);

    assert_eq!(frame_loop.step(&mut renderer, &mut recorder, &scene).unwrap(), Step::Drew);
    device.lose_device();
    assert!(frame_loop
        .step(&mut renderer, &mut recorder, &scene)
        .unwrap_err()
        .is_device_lost());
    assert_eq!(frame_loop.state(), LoopState::ShuttingDown);

    renderer.shutdown();
    device.clear_events();
    for _ in 0..3 {
        assert_eq!(frame_loop.step(&mut renderer, &mut recorder, &scene).unwrap(), Step::Exit);
    }
    assert!(device.events().is_empty());
    assert_eq!(recorder.recorded.len(), 1);
    assert_eq!(device.live_object_count(), 0);
    assert_clean(&device);
}

#[test]
fn quit_exits_cleanly_after_shutdown() {
    let (device, mut renderer, mut recorder) = setup(3);
    let scene = SceneData::default();
    let mut frame_loop = FrameLoop::new(Duration::ZERO);

    let result = frame_loop.run(&mut renderer, &mut recorder, &scene, |stats| {
        if stats.frames_drawn == 3 {
            vec![LoopEvent::Quit]
        } else {
            Vec::new()
        }
    });

    assert!(result.is_ok());
    assert_eq!(frame_loop.state(), LoopState::ShuttingDown);
    assert_eq!(frame_loop.stats().frames_drawn, 3);
    assert!(renderer.is_shut_down());
    assert_eq!(device.live_object_count(), 0);
    assert_clean(&device);
}

#[test]
fn immediate_submissions_complete_before_returning() {
    let (device, mut renderer, mut recorder) = setup(3);
    let scene = SceneData::default();
    renderer.draw(&mut recorder, &scene).unwrap();

    device.clear_events();
    let mut recorded = Vec::new();
    renderer
        .immediate_submit(|cmd| {
            recorded.push(cmd);
            Ok(())
        })
        .unwrap();
    renderer
        .immediate_submit(|cmd| {
            recorded.push(cmd);
            Ok(())
        })
        .unwrap();

    let timeline: Vec<&str> = device
        .events()
        .iter()
        .filter_map(|event| match event {
            GpuEvent::Submitted { .. } => Some("submit"),
            GpuEvent::FenceWaited { blocked: true, .. } => Some("complete"),
            _ => None,
        })
        .collect();
    assert_eq!(timeline, vec!["submit", "complete", "submit", "complete"]);
    assert_eq!(recorded.len(), 2);
    assert_eq!(recorded[0], recorded[1]);

    renderer.draw(&mut recorder, &scene).unwrap();
    assert_clean(&device);
}

#[test]
fn steady_state_frames_create_no_descriptor_pools() {
    let (device, mut renderer, mut recorder) = setup(3);
    let scene = SceneData::default();
    // More sets per frame than the first pool holds, so each slot grows once
    recorder.sets_per_frame = 40;

    for _ in 0..4 {
        renderer.draw(&mut recorder, &scene).unwrap();
    }
    device.clear_events();
    for _ in 0..20 {
        renderer.draw(&mut recorder, &scene).unwrap();
    }

    assert!(!device
        .events()
        .iter()
        .any(|event| matches!(event, GpuEvent::DescriptorPoolCreated { .. })));
    assert_clean(&device);

    renderer.shutdown();
    assert_eq!(device.live_object_count(), 0);
}
