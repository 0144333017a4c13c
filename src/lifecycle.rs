// Swapchain lifecycle and the per-frame acquire/submit/present cycle
//
// The frame resource group is either fully built (`Valid`), known to be stale
// (`Invalidated`), or being torn down and rebuilt (`Recreating`). Frames are
// only ever submitted against a `Valid` group.
//
// FRAME TIMELINE (one frame in flight, host and device serialized):
// ┌──────────────────────────────────────────────────────────────────────┐
// │  acquire ─> update uniforms ─> submit ─> present ─> wait present idle │
// │     │                                        │                        │
// │  out of date:                           out of date / suboptimal:     │
// │  recreate, skip frame                   recreate after presenting     │
// └──────────────────────────────────────────────────────────────────────┘

use anyhow::Result;

use crate::scene::FrameUniforms;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainState {
    Valid,
    Invalidated,
    Recreating,
}

/// Why the frame resource group went stale
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invalidation {
    Resized,
    OutOfDate,
    Suboptimal,
}

/// Result of asking the swapchain for the next image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    Image(u32),
    /// The surface changed under us; nothing was acquired
    Stale,
}

/// Result of handing an image back to the presentation engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Present {
    Current,
    /// The image was presented but the swapchain no longer matches the surface
    Stale(Invalidation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    Skipped,
}

/// The GPU-facing half of a frame. Implemented by the Vulkan render context
/// and by test doubles.
pub trait FrameTarget {
    /// False while the window is minimized; no group can be built then
    fn has_drawable_area(&self) -> bool;
    /// Blocks until an image is free (infinite timeout)
    fn acquire(&mut self) -> Result<Acquire>;
    fn update_uniforms(&mut self, uniforms: &FrameUniforms) -> Result<()>;
    fn submit(&mut self, image_index: u32) -> Result<()>;
    fn present(&mut self, image_index: u32) -> Result<Present>;
    fn wait_present_idle(&mut self) -> Result<()>;
    fn wait_device_idle(&mut self) -> Result<()>;
    /// Tear down the whole frame resource group
    fn destroy_frame_resources(&mut self);
    /// Build the whole frame resource group and re-record command buffers
    fn create_frame_resources(&mut self) -> Result<()>;
}

/// Drives frames and owns the recreation state machine.
#[derive(Debug)]
pub struct FrameLoop {
    state: SwapchainState,
    /// Bumped every time the group is rebuilt
    generation: u64,
    image_in_flight: Option<u32>,
}

impl Default for FrameLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameLoop {
    /// The frame resource group is built during initialization, so the loop
    /// starts out `Valid`.
    pub fn new() -> Self {
        Self {
            state: SwapchainState::Valid,
            generation: 0,
            image_in_flight: None,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> SwapchainState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Mark the frame resource group as stale. Rebuilding happens at the
    /// start of the next frame.
    pub fn invalidate(&mut self, reason: Invalidation) {
        if self.state == SwapchainState::Valid {
            log::debug!("Swapchain invalidated: {:?}", reason);
            self.state = SwapchainState::Invalidated;
        }
    }

    /// Run one full frame against `target`.
    pub fn draw_frame<T: FrameTarget>(
        &mut self,
        target: &mut T,
        uniforms: &FrameUniforms,
    ) -> Result<FrameOutcome> {
        // A minimized window keeps the group invalidated until it has area
        if !target.has_drawable_area() {
            self.invalidate(Invalidation::Resized);
            return Ok(FrameOutcome::Skipped);
        }
        if self.state != SwapchainState::Valid && !self.recreate(target)? {
            return Ok(FrameOutcome::Skipped);
        }

        // STEP 1: acquire
        if let Some(index) = self.image_in_flight {
            anyhow::bail!("Image {} is still in flight, refusing to acquire another", index);
        }
        let image_index = match target.acquire()? {
            Acquire::Image(index) => index,
            Acquire::Stale => {
                self.invalidate(Invalidation::OutOfDate);
                self.recreate(target)?;
                return Ok(FrameOutcome::Skipped);
            }
        };
        self.image_in_flight = Some(image_index);

        // STEP 2: uniforms. Safe to overwrite in place because the previous
        // frame's present queue was drained before we got here.
        target.update_uniforms(uniforms)?;

        // STEP 3: submit
        target.submit(image_index)?;

        // STEP 4: present, then rebuild if the surface moved on
        let presented = target.present(image_index)?;
        self.image_in_flight = None;
        if let Present::Stale(reason) = presented {
            self.invalidate(reason);
            self.recreate(target)?;
        }

        // STEP 5: serialize host and device
        target.wait_present_idle()?;

        Ok(FrameOutcome::Presented)
    }

    /// Rebuild the group. Returns false, leaving the state `Invalidated`,
    /// when the window lost its area since the frame started.
    fn recreate<T: FrameTarget>(&mut self, target: &mut T) -> Result<bool> {
        debug_assert_eq!(self.state, SwapchainState::Invalidated);
        if !target.has_drawable_area() {
            log::debug!("Window has no area, swapchain rebuild deferred");
            return Ok(false);
        }
        self.state = SwapchainState::Recreating;

        // In-flight work is waited out, never cancelled
        target.wait_device_idle()?;
        target.destroy_frame_resources();
        target.create_frame_resources()?;

        self.generation += 1;
        self.state = SwapchainState::Valid;
        log::info!("Swapchain recreated (generation {})", self.generation);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Mat4;
    use std::collections::VecDeque;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Acquire,
        Uniforms,
        Submit { image: u32, generation: u32 },
        Present(u32),
        WaitPresentIdle,
        WaitDeviceIdle,
        Destroy,
        Create,
    }

    /// Records every call and hands out scripted acquire/present results
    #[derive(Default)]
    struct RecordingTarget {
        calls: Vec<Call>,
        acquires: VecDeque<Acquire>,
        presents: VecDeque<Present>,
        /// Generation of the currently built group, `None` while torn down
        group: Option<u32>,
        built: u32,
        next_image: u32,
        image_count: u32,
        /// Window has a non-zero size
        area: bool,
        /// Minimize the window at the moment a stale result is reported
        lose_area_on_stale: bool,
        /// Handles of the long-lived resources (buffers, textures, sets)
        statics: [u64; 4],
        /// Static handles each rebuilt group was recorded against
        built_against: Vec<[u64; 4]>,
    }

    impl RecordingTarget {
        fn new() -> Self {
            Self {
                group: Some(0),
                image_count: 3,
                area: true,
                statics: [11, 12, 13, 14],
                ..Default::default()
            }
        }

        fn stale_reported(&mut self) {
            if self.lose_area_on_stale {
                self.area = false;
            }
        }
    }

    impl FrameTarget for RecordingTarget {
        fn has_drawable_area(&self) -> bool {
            self.area
        }

        fn acquire(&mut self) -> Result<Acquire> {
            self.calls.push(Call::Acquire);
            assert!(self.group.is_some(), "acquire against a torn-down group");
            let acquired = self.acquires.pop_front().unwrap_or_else(|| {
                let image = self.next_image;
                self.next_image = (self.next_image + 1) % self.image_count;
                Acquire::Image(image)
            });
            if acquired == Acquire::Stale {
                self.stale_reported();
            }
            Ok(acquired)
        }

        fn update_uniforms(&mut self, _uniforms: &FrameUniforms) -> Result<()> {
            self.calls.push(Call::Uniforms);
            Ok(())
        }

        fn submit(&mut self, image_index: u32) -> Result<()> {
            let generation = self.group.expect("submit against a torn-down group");
            self.calls.push(Call::Submit {
                image: image_index,
                generation,
            });
            Ok(())
        }

        fn present(&mut self, image_index: u32) -> Result<Present> {
            self.calls.push(Call::Present(image_index));
            let presented = self.presents.pop_front().unwrap_or(Present::Current);
            if presented != Present::Current {
                self.stale_reported();
            }
            Ok(presented)
        }

        fn wait_present_idle(&mut self) -> Result<()> {
            self.calls.push(Call::WaitPresentIdle);
            Ok(())
        }

        fn wait_device_idle(&mut self) -> Result<()> {
            self.calls.push(Call::WaitDeviceIdle);
            Ok(())
        }

        fn destroy_frame_resources(&mut self) {
            self.calls.push(Call::Destroy);
            assert!(self.group.take().is_some(), "destroyed twice");
        }

        fn create_frame_resources(&mut self) -> Result<()> {
            self.calls.push(Call::Create);
            assert!(self.group.is_none(), "created over a live group");
            assert!(self.area, "built a group for a zero-area window");
            self.built_against.push(self.statics);
            self.built += 1;
            self.group = Some(self.built);
            Ok(())
        }
    }

    fn uniforms() -> FrameUniforms {
        FrameUniforms {
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
        }
    }

    #[test]
    fn steady_state_frames_strictly_alternate() {
        let mut frames = FrameLoop::new();
        let mut target = RecordingTarget::new();

        for _ in 0..3 {
            assert_eq!(
                frames.draw_frame(&mut target, &uniforms()).unwrap(),
                FrameOutcome::Presented
            );
        }

        let expected: Vec<Call> = (0..3)
            .flat_map(|image| {
                [
                    Call::Acquire,
                    Call::Uniforms,
                    Call::Submit {
                        image,
                        generation: 0,
                    },
                    Call::Present(image),
                    Call::WaitPresentIdle,
                ]
            })
            .collect();
        assert_eq!(target.calls, expected);
        assert_eq!(frames.generation(), 0);
    }

    #[test]
    fn resize_rebuilds_whole_group_before_next_submit() {
        let mut frames = FrameLoop::new();
        let mut target = RecordingTarget::new();

        frames.draw_frame(&mut target, &uniforms()).unwrap();
        frames.invalidate(Invalidation::Resized);
        assert_eq!(frames.state(), SwapchainState::Invalidated);
        target.calls.clear();

        frames.draw_frame(&mut target, &uniforms()).unwrap();

        assert_eq!(
            &target.calls[..4],
            &[
                Call::WaitDeviceIdle,
                Call::Destroy,
                Call::Create,
                Call::Acquire
            ]
        );
        // No stale group is referenced after the rebuild
        assert!(target
            .calls
            .iter()
            .all(|call| !matches!(call, Call::Submit { generation: 0, .. })));
        assert_eq!(frames.state(), SwapchainState::Valid);
        assert_eq!(frames.generation(), 1);
    }

    #[test]
    fn repeated_resize_notifications_rebuild_once() {
        let mut frames = FrameLoop::new();
        let mut target = RecordingTarget::new();

        frames.invalidate(Invalidation::Resized);
        frames.invalidate(Invalidation::Resized);
        frames.invalidate(Invalidation::Resized);
        frames.draw_frame(&mut target, &uniforms()).unwrap();

        let creates = target.calls.iter().filter(|c| **c == Call::Create).count();
        assert_eq!(creates, 1);
    }

    #[test]
    fn out_of_date_acquire_skips_the_frame() {
        let mut frames = FrameLoop::new();
        let mut target = RecordingTarget::new();
        target.acquires.push_back(Acquire::Stale);

        let outcome = frames.draw_frame(&mut target, &uniforms()).unwrap();

        assert_eq!(outcome, FrameOutcome::Skipped);
        assert_eq!(
            target.calls,
            vec![
                Call::Acquire,
                Call::WaitDeviceIdle,
                Call::Destroy,
                Call::Create
            ]
        );
        assert_eq!(frames.state(), SwapchainState::Valid);
    }

    #[test]
    fn stale_present_still_presents_then_rebuilds() {
        let mut frames = FrameLoop::new();
        let mut target = RecordingTarget::new();
        target
            .presents
            .push_back(Present::Stale(Invalidation::Suboptimal));

        let outcome = frames.draw_frame(&mut target, &uniforms()).unwrap();

        assert_eq!(outcome, FrameOutcome::Presented);
        assert_eq!(
            target.calls,
            vec![
                Call::Acquire,
                Call::Uniforms,
                Call::Submit {
                    image: 0,
                    generation: 0
                },
                Call::Present(0),
                Call::WaitDeviceIdle,
                Call::Destroy,
                Call::Create,
                Call::WaitPresentIdle,
            ]
        );

        // Next frame goes straight to the rebuilt group
        target.calls.clear();
        frames.draw_frame(&mut target, &uniforms()).unwrap();
        assert_eq!(target.calls[0], Call::Acquire);
        assert!(matches!(
            target.calls[2],
            Call::Submit { generation: 1, .. }
        ));
    }

    #[test]
    fn invalidate_is_ignored_while_invalidated() {
        let mut frames = FrameLoop::new();
        frames.invalidate(Invalidation::OutOfDate);
        frames.invalidate(Invalidation::Suboptimal);
        assert_eq!(frames.state(), SwapchainState::Invalidated);
    }

    #[test]
    fn failed_rebuild_is_fatal() {
        struct BrokenRebuild(RecordingTarget);

        impl FrameTarget for BrokenRebuild {
            fn has_drawable_area(&self) -> bool {
                self.0.has_drawable_area()
            }
            fn acquire(&mut self) -> Result<Acquire> {
                self.0.acquire()
            }
            fn update_uniforms(&mut self, u: &FrameUniforms) -> Result<()> {
                self.0.update_uniforms(u)
            }
            fn submit(&mut self, i: u32) -> Result<()> {
                self.0.submit(i)
            }
            fn present(&mut self, i: u32) -> Result<Present> {
                self.0.present(i)
            }
            fn wait_present_idle(&mut self) -> Result<()> {
                self.0.wait_present_idle()
            }
            fn wait_device_idle(&mut self) -> Result<()> {
                self.0.wait_device_idle()
            }
            fn destroy_frame_resources(&mut self) {
                self.0.destroy_frame_resources()
            }
            fn create_frame_resources(&mut self) -> Result<()> {
                anyhow::bail!("Failed to create swapchain")
            }
        }

        let mut frames = FrameLoop::new();
        let mut target = BrokenRebuild(RecordingTarget::new());
        frames.invalidate(Invalidation::Resized);

        let err = frames.draw_frame(&mut target, &uniforms()).unwrap_err();
        assert!(err.to_string().contains("swapchain"));
        // Nothing was acquired or submitted against the partial group
        assert!(!target.0.calls.contains(&Call::Acquire));
        assert_eq!(frames.state(), SwapchainState::Recreating);
    }

    #[test]
    fn minimized_window_skips_without_rebuilding() {
        let mut frames = FrameLoop::new();
        let mut target = RecordingTarget::new();
        target.area = false;

        let outcome = frames.draw_frame(&mut target, &uniforms()).unwrap();

        assert_eq!(outcome, FrameOutcome::Skipped);
        assert!(target.calls.is_empty());
        assert_eq!(frames.state(), SwapchainState::Invalidated);

        target.area = true;
        assert_eq!(
            frames.draw_frame(&mut target, &uniforms()).unwrap(),
            FrameOutcome::Presented
        );
        assert_eq!(frames.generation(), 1);
    }

    #[test]
    fn minimize_during_stale_acquire_defers_the_rebuild() {
        let mut frames = FrameLoop::new();
        let mut target = RecordingTarget::new();
        target.lose_area_on_stale = true;
        target.acquires.push_back(Acquire::Stale);

        let outcome = frames.draw_frame(&mut target, &uniforms()).unwrap();

        assert_eq!(outcome, FrameOutcome::Skipped);
        assert_eq!(target.calls, vec![Call::Acquire]);
        assert_eq!(frames.state(), SwapchainState::Invalidated);
        assert_eq!(frames.generation(), 0);

        // Still minimized: nothing happens at all
        target.calls.clear();
        frames.draw_frame(&mut target, &uniforms()).unwrap();
        assert!(target.calls.is_empty());

        // Restored: rebuilt once, then drawn
        target.area = true;
        assert_eq!(
            frames.draw_frame(&mut target, &uniforms()).unwrap(),
            FrameOutcome::Presented
        );
        assert_eq!(
            &target.calls[..3],
            &[Call::WaitDeviceIdle, Call::Destroy, Call::Create]
        );
        assert_eq!(frames.generation(), 1);
    }

    #[test]
    fn minimize_during_stale_present_still_waits_for_present() {
        let mut frames = FrameLoop::new();
        let mut target = RecordingTarget::new();
        target.lose_area_on_stale = true;
        target
            .presents
            .push_back(Present::Stale(Invalidation::OutOfDate));

        let outcome = frames.draw_frame(&mut target, &uniforms()).unwrap();

        assert_eq!(outcome, FrameOutcome::Presented);
        assert!(!target.calls.contains(&Call::Create));
        assert_eq!(target.calls.last(), Some(&Call::WaitPresentIdle));
        assert_eq!(frames.state(), SwapchainState::Invalidated);
    }

    #[test]
    fn rebuilds_never_replace_static_resources() {
        let mut frames = FrameLoop::new();
        let mut target = RecordingTarget::new();
        let statics = target.statics;

        frames.invalidate(Invalidation::Resized);
        frames.draw_frame(&mut target, &uniforms()).unwrap();
        target.acquires.push_back(Acquire::Stale);
        frames.draw_frame(&mut target, &uniforms()).unwrap();
        target
            .presents
            .push_back(Present::Stale(Invalidation::Suboptimal));
        frames.draw_frame(&mut target, &uniforms()).unwrap();

        assert_eq!(frames.generation(), 3);
        assert_eq!(target.statics, statics);
        assert_eq!(target.built_against, vec![statics; 3]);
        let rebuild_windows = target
            .calls
            .windows(3)
            .filter(|w| w[..] == [Call::WaitDeviceIdle, Call::Destroy, Call::Create])
            .count();
        assert_eq!(rebuild_windows, 3);
    }
}
