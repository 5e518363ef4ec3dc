use std::sync::Arc;

use ash::vk;

use crate::renderer::error::{RenderError, RenderResult};
use crate::renderer::pipeline::PipelineBundle;
use crate::renderer::swapchain::Swapchain;

/// Upper bound on frames recorded but not yet retired by the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;

/// What the caller should do with this tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameAcquire {
    /// Render into the presentation image at this index.
    Image(u32),
    /// No image this tick; skip drawing and try again next tick.
    Skip,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum AcquireOutcome {
    Ready { image_index: u32 },
    /// The surface changed under us; the display must be rebuilt.
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

/// The device-facing half of the frame protocol. The scheduler drives
/// this trait so its ordering rules can be exercised without a GPU.
pub(crate) trait FrameDriver {
    /// Blocks until the work last submitted on `slot` has retired.
    fn wait_slot(&mut self, slot: usize) -> RenderResult<()>;
    fn acquire_image(&mut self, slot: usize) -> RenderResult<AcquireOutcome>;
    fn submit(&mut self, slot: usize, image_index: u32) -> RenderResult<()>;
    fn present(&mut self, slot: usize, image_index: u32) -> RenderResult<PresentOutcome>;
}

/// Frame pacing state: which ring slot is current, which slot last
/// rendered to each presentation image, and whether an image is currently
/// held between acquire and present.
pub(crate) struct FrameScheduler {
    slot: usize,
    image_owner: Vec<Option<usize>>,
    acquired: Option<u32>,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self {
            slot: 0,
            image_owner: Vec::new(),
            acquired: None,
        }
    }

    /// Forgets per-image ownership. Must run after every display rebuild
    /// since image indices belong to the new swapchain generation.
    pub fn reset_images(&mut self, image_count: usize) {
        self.image_owner = vec![None; image_count];
        self.acquired = None;
    }

    /// Waits for the current slot's previous frame, acquires an image,
    /// and waits for whichever slot rendered to that image last. Staleness
    /// reported by the driver aborts the tick without side effects.
    pub fn acquire(&mut self, driver: &mut dyn FrameDriver) -> RenderResult<AcquireOutcome> {
        driver.wait_slot(self.slot)?;

        let AcquireOutcome::Ready { image_index } = driver.acquire_image(self.slot)? else {
            return Ok(AcquireOutcome::OutOfDate);
        };

        // The same image can come back while another slot still renders
        // to it; that slot's fence gates reuse.
        if let Some(owner) = self.image_owner[image_index as usize] {
            if owner != self.slot {
                driver.wait_slot(owner)?;
            }
        }
        self.image_owner[image_index as usize] = Some(self.slot);
        self.acquired = Some(image_index);
        Ok(AcquireOutcome::Ready { image_index })
    }

    /// Submits the frame for the acquired image, presents it, and
    /// advances the ring slot. Staleness from presentation is reported in
    /// the outcome, not as an error.
    pub fn submit_and_present(
        &mut self,
        driver: &mut dyn FrameDriver,
    ) -> RenderResult<PresentOutcome> {
        let image_index = self.acquired.take().ok_or(RenderError::FrameNotAcquired)?;
        driver.submit(self.slot, image_index)?;
        let outcome = driver.present(self.slot, image_index)?;
        self.slot = (self.slot + 1) % MAX_FRAMES_IN_FLIGHT;
        Ok(outcome)
    }
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-slot synchronization primitives. Fences start signaled so the
/// first wait on a fresh slot passes immediately.
pub(crate) struct FrameSlot {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight: vk::Fence,
}

pub(crate) struct FrameRing {
    slots: Vec<FrameSlot>,
    device: Arc<ash::Device>,
}

impl FrameRing {
    pub fn new(device: Arc<ash::Device>) -> RenderResult<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

        let mut slots = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            slots.push(FrameSlot {
                image_available: unsafe { device.create_semaphore(&semaphore_info, None)? },
                render_finished: unsafe { device.create_semaphore(&semaphore_info, None)? },
                in_flight: unsafe { device.create_fence(&fence_info, None)? },
            });
        }
        Ok(Self { slots, device })
    }

    pub fn slot(&self, index: usize) -> &FrameSlot {
        &self.slots[index]
    }
}

impl Drop for FrameRing {
    fn drop(&mut self) {
        unsafe {
            for slot in self.slots.drain(..) {
                self.device.destroy_semaphore(slot.image_available, None);
                self.device.destroy_semaphore(slot.render_finished, None);
                self.device.destroy_fence(slot.in_flight, None);
            }
        }
    }
}

/// The real driver: fences, the swapchain, and the graphics and present
/// queues of the current display generation.
pub(crate) struct VulkanFrameDriver<'a> {
    pub device: &'a ash::Device,
    pub ring: &'a FrameRing,
    pub swapchain: &'a Swapchain,
    pub bundle: &'a PipelineBundle,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
}

impl FrameDriver for VulkanFrameDriver<'_> {
    fn wait_slot(&mut self, slot: usize) -> RenderResult<()> {
        let fence = self.ring.slot(slot).in_flight;
        unsafe {
            self.device.wait_for_fences(&[fence], true, u64::MAX)?;
        }
        Ok(())
    }

    fn acquire_image(&mut self, slot: usize) -> RenderResult<AcquireOutcome> {
        let semaphore = self.ring.slot(slot).image_available;
        // A suboptimal acquire still yields a usable image; only present
        // reacts to suboptimality.
        match unsafe {
            self.swapchain.loader.acquire_next_image(
                self.swapchain.handle,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        } {
            Ok((image_index, _suboptimal)) => Ok(AcquireOutcome::Ready { image_index }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(err) => Err(err.into()),
        }
    }

    fn submit(&mut self, slot: usize, image_index: u32) -> RenderResult<()> {
        let frame = self.ring.slot(slot);
        let cmd = self.bundle.command_buffer(image_index).ok_or(
            RenderError::ImageIndexOutOfRange {
                index: image_index,
                count: self.swapchain.image_count(),
            },
        )?;

        unsafe {
            self.device.reset_fences(&[frame.in_flight])?;
        }

        let wait_semaphores = [frame.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [cmd];
        let signal_semaphores = [frame.render_finished];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device
                .queue_submit(self.graphics_queue, &[submit], frame.in_flight)
                .map_err(RenderError::SubmissionFailed)?;
        }
        Ok(())
    }

    fn present(&mut self, slot: usize, image_index: u32) -> RenderResult<PresentOutcome> {
        let frame = self.ring.slot(slot);
        let wait_semaphores = [frame.render_finished];
        let swapchains = [self.swapchain.handle];
        let image_indices = [image_index];
        let info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.swapchain.loader.queue_present(self.present_queue, &info) } {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(err) => Err(RenderError::PresentationFailed(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::mpsc;
    use std::sync::{Arc, Condvar, Mutex};
    use std::thread;
    use std::time::Duration;

    struct GpuState {
        fences: Vec<bool>,
        outstanding: usize,
        max_outstanding: usize,
    }

    /// Simulated device timeline: the test signals fences instead of a GPU.
    #[derive(Clone)]
    struct TestGpu(Arc<(Mutex<GpuState>, Condvar)>);

    impl TestGpu {
        fn new() -> Self {
            Self(Arc::new((
                Mutex::new(GpuState {
                    fences: vec![true; MAX_FRAMES_IN_FLIGHT],
                    outstanding: 0,
                    max_outstanding: 0,
                }),
                Condvar::new(),
            )))
        }

        /// Retires the work submitted on `slot`.
        fn complete(&self, slot: usize) {
            let (state, signal) = &*self.0;
            let mut state = state.lock().unwrap();
            if !state.fences[slot] {
                state.fences[slot] = true;
                state.outstanding -= 1;
            }
            signal.notify_all();
        }

        fn max_outstanding(&self) -> usize {
            self.0 .0.lock().unwrap().max_outstanding
        }
    }

    struct TestDriver {
        gpu: TestGpu,
        acquires: VecDeque<AcquireOutcome>,
        present_results: VecDeque<PresentOutcome>,
        waits: Vec<usize>,
        submits: Vec<(usize, u32)>,
        presents: Vec<(usize, u32)>,
    }

    impl TestDriver {
        fn new(gpu: &TestGpu, acquires: impl IntoIterator<Item = AcquireOutcome>) -> Self {
            Self {
                gpu: gpu.clone(),
                acquires: acquires.into_iter().collect(),
                present_results: VecDeque::new(),
                waits: Vec::new(),
                submits: Vec::new(),
                presents: Vec::new(),
            }
        }
    }

    impl FrameDriver for TestDriver {
        fn wait_slot(&mut self, slot: usize) -> RenderResult<()> {
            let (state, signal) = &*self.gpu.0;
            let mut state = state.lock().unwrap();
            while !state.fences[slot] {
                state = signal.wait(state).unwrap();
            }
            drop(state);
            self.waits.push(slot);
            Ok(())
        }

        fn acquire_image(&mut self, _slot: usize) -> RenderResult<AcquireOutcome> {
            Ok(self.acquires.pop_front().expect("acquire script exhausted"))
        }

        fn submit(&mut self, slot: usize, image_index: u32) -> RenderResult<()> {
            let (state, _) = &*self.gpu.0;
            let mut state = state.lock().unwrap();
            state.fences[slot] = false;
            state.outstanding += 1;
            state.max_outstanding = state.max_outstanding.max(state.outstanding);
            drop(state);
            self.submits.push((slot, image_index));
            Ok(())
        }

        fn present(&mut self, slot: usize, image_index: u32) -> RenderResult<PresentOutcome> {
            self.presents.push((slot, image_index));
            Ok(self
                .present_results
                .pop_front()
                .unwrap_or(PresentOutcome::Presented))
        }
    }

    fn ready(image_index: u32) -> AcquireOutcome {
        AcquireOutcome::Ready { image_index }
    }

    #[test]
    fn frames_alternate_between_two_slots() {
        let gpu = TestGpu::new();
        let mut driver = TestDriver::new(&gpu, [ready(0), ready(1), ready(2)]);
        let mut scheduler = FrameScheduler::new();
        scheduler.reset_images(3);

        for tick in 0..3u32 {
            let outcome = scheduler.acquire(&mut driver).unwrap();
            assert_eq!(outcome, ready(tick));
            let presented = scheduler.submit_and_present(&mut driver).unwrap();
            assert_eq!(presented, PresentOutcome::Presented);
            gpu.complete(tick as usize % MAX_FRAMES_IN_FLIGHT);
        }

        assert_eq!(driver.submits, vec![(0, 0), (1, 1), (0, 2)]);
        assert_eq!(driver.presents, vec![(0, 0), (1, 1), (0, 2)]);
    }

    #[test]
    fn third_frame_blocks_until_first_retires() {
        let gpu = TestGpu::new();
        let driver = TestDriver::new(&gpu, [ready(0), ready(1), ready(2)]);
        let mut scheduler = FrameScheduler::new();
        scheduler.reset_images(3);

        let (frame_done, frames) = mpsc::channel();
        let worker = thread::spawn(move || {
            let mut driver = driver;
            for _ in 0..3 {
                let outcome = scheduler.acquire(&mut driver).unwrap();
                assert!(matches!(outcome, AcquireOutcome::Ready { .. }));
                scheduler.submit_and_present(&mut driver).unwrap();
                frame_done.send(()).unwrap();
            }
            driver
        });

        // Two frames fit in the ring without any GPU progress.
        frames.recv_timeout(Duration::from_secs(5)).unwrap();
        frames.recv_timeout(Duration::from_secs(5)).unwrap();
        // The third must block on slot 0's fence.
        assert!(frames.recv_timeout(Duration::from_millis(200)).is_err());

        gpu.complete(0);
        frames.recv_timeout(Duration::from_secs(5)).unwrap();

        let driver = worker.join().unwrap();
        assert_eq!(driver.submits.len(), 3);
        assert_eq!(gpu.max_outstanding(), MAX_FRAMES_IN_FLIGHT);
    }

    #[test]
    fn stale_acquire_aborts_the_tick() {
        let gpu = TestGpu::new();
        let mut driver = TestDriver::new(&gpu, [AcquireOutcome::OutOfDate]);
        let mut scheduler = FrameScheduler::new();
        scheduler.reset_images(2);

        let outcome = scheduler.acquire(&mut driver).unwrap();
        assert_eq!(outcome, AcquireOutcome::OutOfDate);
        assert!(driver.submits.is_empty());
        assert!(driver.presents.is_empty());

        // Nothing was acquired, so presenting now is a caller bug.
        assert!(matches!(
            scheduler.submit_and_present(&mut driver),
            Err(RenderError::FrameNotAcquired)
        ));
    }

    #[test]
    fn reacquired_image_waits_for_its_previous_owner() {
        let gpu = TestGpu::new();
        let mut driver = TestDriver::new(&gpu, [ready(0), ready(0)]);
        let mut scheduler = FrameScheduler::new();
        scheduler.reset_images(3);

        scheduler.acquire(&mut driver).unwrap();
        scheduler.submit_and_present(&mut driver).unwrap();
        gpu.complete(0);

        // Slot 1 gets the same image; it must wait on slot 0's fence too.
        scheduler.acquire(&mut driver).unwrap();
        assert_eq!(driver.waits, vec![0, 1, 0]);
    }

    #[test]
    fn suboptimal_present_is_surfaced_after_presenting() {
        let gpu = TestGpu::new();
        let mut driver = TestDriver::new(&gpu, [ready(0)]);
        driver.present_results.push_back(PresentOutcome::Suboptimal);
        let mut scheduler = FrameScheduler::new();
        scheduler.reset_images(2);

        scheduler.acquire(&mut driver).unwrap();
        let outcome = scheduler.submit_and_present(&mut driver).unwrap();
        assert_eq!(outcome, PresentOutcome::Suboptimal);
        // The frame still went out before staleness was reported.
        assert_eq!(driver.presents, vec![(0, 0)]);
    }

    #[test]
    fn rebuild_resets_image_ownership() {
        let gpu = TestGpu::new();
        let mut driver = TestDriver::new(&gpu, [ready(0), ready(0)]);
        let mut scheduler = FrameScheduler::new();
        scheduler.reset_images(2);

        scheduler.acquire(&mut driver).unwrap();
        scheduler.submit_and_present(&mut driver).unwrap();
        gpu.complete(0);

        // New swapchain generation: image 0 is a different image now, so
        // the second acquire must not wait on slot 0.
        scheduler.reset_images(2);
        scheduler.acquire(&mut driver).unwrap();
        assert_eq!(driver.waits, vec![0, 1]);
    }
}
