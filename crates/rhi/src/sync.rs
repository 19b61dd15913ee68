//! Per-frame synchronization objects.
//!
//! Each in-flight slot owns one [`FrameSync`]: the image-available and
//! render-finished semaphores chain acquire, submit and present on the GPU,
//! and the in-flight fence is what the host blocks on before reusing the slot.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Binary semaphore, created unsignaled.
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let semaphore = unsafe {
            device
                .handle()
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)?
        };
        Ok(Self { device, semaphore })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Host-visible completion signal of one queue submission.
pub struct Fence {
    device: Arc<Device>,
    fence: vk::Fence,
}

impl Fence {
    /// `signaled` fences let the first wait return at once.
    pub fn new(device: Arc<Device>, signaled: bool) -> RhiResult<Self> {
        let mut flags = vk::FenceCreateFlags::empty();
        if signaled {
            flags |= vk::FenceCreateFlags::SIGNALED;
        }
        let fence = unsafe {
            device
                .handle()
                .create_fence(&vk::FenceCreateInfo::default().flags(flags), None)?
        };
        Ok(Self { device, fence })
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks for at most `timeout` nanoseconds. Device loss is an error.
    pub fn wait(&self, timeout: u64) -> RhiResult<()> {
        let fences = [self.fence];
        unsafe { self.device.handle().wait_for_fences(&fences, true, timeout)? };
        Ok(())
    }

    /// Only valid once nothing pending will signal the fence.
    pub fn reset(&self) -> RhiResult<()> {
        let fences = [self.fence];
        unsafe { self.device.handle().reset_fences(&fences)? };
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_fence(self.fence, None);
        }
    }
}

/// Objects owned by one in-flight slot.
///
/// The fence starts signaled, matching a slot that has never submitted.
pub struct FrameSync {
    image_available: Semaphore,
    render_finished: Semaphore,
    in_flight: Fence,
}

impl FrameSync {
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let sync = Self {
            image_available: Semaphore::new(device.clone())?,
            render_finished: Semaphore::new(device.clone())?,
            in_flight: Fence::new(device, true)?,
        };
        debug!("Frame slot sync objects created");
        Ok(sync)
    }

    /// Acquire signals it; the submission waits on it at color output.
    #[inline]
    pub fn image_available(&self) -> &Semaphore {
        &self.image_available
    }

    /// The submission signals it; presentation waits on it.
    #[inline]
    pub fn render_finished(&self) -> &Semaphore {
        &self.render_finished
    }

    #[inline]
    pub fn in_flight(&self) -> &Fence {
        &self.in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_sync_can_move_between_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Semaphore>();
        assert_send_sync::<Fence>();
        assert_send_sync::<FrameSync>();
    }
}
