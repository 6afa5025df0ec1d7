// Render loop state machine
//
//   Running ──Minimized / zero-size resize──> Minimized
//   Minimized ──Restored / non-zero resize──> ResizePending
//   Running ──resize event / out-of-date / suboptimal──> ResizePending
//   ResizePending ──recreate──> Running
//   any ──Quit──> ShuttingDown
//
// `step` performs exactly the work legal in the current state. While minimized
// nothing touches the frame ring and the driver is told to sleep.

use std::thread;
use std::time::Duration;

use ash::vk;

use crate::backend::RenderDevice;
use crate::draw::{FrameOutcome, FrameRecorder};
use crate::error::RenderResult;
use crate::renderer::Renderer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Minimized,
    ResizePending,
    ShuttingDown,
}

/// Window-system input the loop reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopEvent {
    Quit,
    Minimized,
    Restored,
    Resized { width: u32, height: u32 },
}

/// What one `step` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Drew,
    Skipped,
    Recreated,
    /// Nothing to draw; the driver should sleep this long
    Idle(Duration),
    Exit,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub frames_drawn: u64,
    pub frames_skipped: u64,
    pub recreations: u64,
    pub idle_steps: u64,
}

pub struct FrameLoop {
    state: LoopState,
    /// Latest non-zero size reported by the window
    pending_extent: Option<vk::Extent2D>,
    minimized_sleep: Duration,
    stats: LoopStats,
}

impl FrameLoop {
    pub fn new(minimized_sleep: Duration) -> Self {
        Self {
            state: LoopState::Running,
            pending_extent: None,
            minimized_sleep,
            stats: LoopStats::default(),
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    pub fn handle_event(&mut self, event: LoopEvent) {
        let next = match (self.state, event) {
            (LoopState::ShuttingDown, _) => LoopState::ShuttingDown,
            (_, LoopEvent::Quit) => LoopState::ShuttingDown,
            (_, LoopEvent::Minimized) => LoopState::Minimized,
            (_, LoopEvent::Resized { width, height }) if width == 0 || height == 0 => LoopState::Minimized,
            (_, LoopEvent::Resized { width, height }) => {
                self.pending_extent = Some(vk::Extent2D { width, height });
                LoopState::ResizePending
            }
            (LoopState::Minimized, LoopEvent::Restored) => LoopState::ResizePending,
            (state, LoopEvent::Restored) => state,
        };

        if next != self.state {
            log::debug!("Loop {:?} -> {:?} on {:?}", self.state, next, event);
            self.state = next;
        }
    }

    /// Ask for a swapchain rebuild before the next frame (e.g. fullscreen toggle).
    pub fn request_resize(&mut self) {
        if self.state == LoopState::Running {
            self.state = LoopState::ResizePending;
        }
    }

    /// Advance the loop by one iteration.
    ///
    /// An error is fatal: the loop moves to ShuttingDown and every later step
    /// returns `Step::Exit` without touching the renderer.
    pub fn step<D, R>(&mut self, renderer: &mut Renderer<D>, recorder: &mut R, scene: &R::Scene) -> RenderResult<Step>
    where
        D: RenderDevice + 'static,
        R: FrameRecorder<D>,
    {
        let result = self.advance(renderer, recorder, scene);
        if result.is_err() && self.state != LoopState::ShuttingDown {
            log::debug!("Loop {:?} -> ShuttingDown on fatal error", self.state);
            self.state = LoopState::ShuttingDown;
        }
        result
    }

    fn advance<D, R>(&mut self, renderer: &mut Renderer<D>, recorder: &mut R, scene: &R::Scene) -> RenderResult<Step>
    where
        D: RenderDevice + 'static,
        R: FrameRecorder<D>,
    {
        match self.state {
            LoopState::ShuttingDown => Ok(Step::Exit),
            LoopState::Minimized => {
                self.stats.idle_steps += 1;
                Ok(Step::Idle(self.minimized_sleep))
            }
            LoopState::ResizePending => {
                let extent = self
                    .pending_extent
                    .take()
                    .unwrap_or_else(|| renderer.swapchain().extent());
                renderer.resize(extent)?;
                self.stats.recreations += 1;
                self.state = LoopState::Running;
                Ok(Step::Recreated)
            }
            LoopState::Running => {
                let step = match renderer.draw(recorder, scene)? {
                    FrameOutcome::Presented => {
                        self.stats.frames_drawn += 1;
                        Step::Drew
                    }
                    FrameOutcome::Skipped => {
                        self.stats.frames_skipped += 1;
                        Step::Skipped
                    }
                };
                if renderer.resize_requested() {
                    self.state = LoopState::ResizePending;
                }
                Ok(step)
            }
        }
    }

    /// Drive the loop until quit or a fatal error, then shut the renderer down.
    ///
    /// `poll` is called once per iteration and returns the events that arrived
    /// since the previous call.
    pub fn run<D, R, P>(
        &mut self,
        renderer: &mut Renderer<D>,
        recorder: &mut R,
        scene: &R::Scene,
        mut poll: P,
    ) -> RenderResult<()>
    where
        D: RenderDevice + 'static,
        R: FrameRecorder<D>,
        P: FnMut(&LoopStats) -> Vec<LoopEvent>,
    {
        let result = loop {
            for event in poll(&self.stats) {
                self.handle_event(event);
            }

            match self.step(renderer, recorder, scene) {
                Ok(Step::Exit) => break Ok(()),
                Ok(Step::Idle(duration)) => thread::sleep(duration),
                Ok(_) => {}
                Err(err) => {
                    log::error!("Fatal render error: {}", err);
                    break Err(err);
                }
            }
        };

        renderer.shutdown();
        log::info!(
            "Loop finished: {} frames drawn, {} skipped, {} recreations",
            self.stats.frames_drawn,
            self.stats.frames_skipped,
            self.stats.recreations
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transitions(events: &[LoopEvent]) -> LoopState {
        let mut frame_loop = FrameLoop::new(Duration::from_millis(100));
        for &event in events {
            frame_loop.handle_event(event);
        }
        frame_loop.state()
    }

    #[test]
    fn minimize_and_restore_goes_through_resize() {
        assert_eq!(transitions(&[LoopEvent::Minimized]), LoopState::Minimized);
        assert_eq!(
            transitions(&[LoopEvent::Minimized, LoopEvent::Restored]),
            LoopState::ResizePending
        );
        assert_eq!(transitions(&[LoopEvent::Restored]), LoopState::Running);
    }

    #[test]
    fn zero_sized_resize_counts_as_minimized() {
        assert_eq!(
            transitions(&[LoopEvent::Resized { width: 0, height: 480 }]),
            LoopState::Minimized
        );
        assert_eq!(
            transitions(&[
                LoopEvent::Resized { width: 0, height: 0 },
                LoopEvent::Resized { width: 640, height: 480 },
            ]),
            LoopState::ResizePending
        );
    }

    #[test]
    fn quit_wins_over_everything() {
        assert_eq!(
            transitions(&[LoopEvent::Quit, LoopEvent::Restored, LoopEvent::Resized { width: 1, height: 1 }]),
            LoopState::ShuttingDown
        );
        assert_eq!(transitions(&[LoopEvent::Minimized, LoopEvent::Quit]), LoopState::ShuttingDown);
    }

    #[test]
    fn request_resize_only_from_running() {
        let mut frame_loop = FrameLoop::new(Duration::ZERO);
        frame_loop.handle_event(LoopEvent::Minimized);
        frame_loop.request_resize();
        assert_eq!(frame_loop.state(), LoopState::Minimized);

        let mut frame_loop = FrameLoop::new(Duration::ZERO);
        frame_loop.request_resize();
        assert_eq!(frame_loop.state(), LoopState::ResizePending);
    }
}
