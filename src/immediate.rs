// Immediate commands - blocking one-shot submissions outside the frame ring

use ash::vk;

use crate::backend::{QueueSubmit, RenderDevice};
use crate::error::RenderResult;

pub struct ImmediateCommander {
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    fence: vk::Fence,
    submissions: u64,
}

impl ImmediateCommander {
    pub fn new<D: RenderDevice>(device: &D) -> RenderResult<Self> {
        let command_pool = device.create_command_pool()?;
        let command_buffer = device.allocate_command_buffer(command_pool)?;
        let fence = device.create_fence(false)?;

        Ok(Self {
            command_pool,
            command_buffer,
            fence,
            submissions: 0,
        })
    }

    /// Record with `record`, submit, and block until the GPU has finished.
    ///
    /// `&mut self` keeps a second submission from starting while one is
    /// outstanding. If `record` fails nothing is submitted and the pool is reset.
    pub fn submit<D, F>(&mut self, device: &D, record: F) -> RenderResult<()>
    where
        D: RenderDevice,
        F: FnOnce(vk::CommandBuffer) -> RenderResult<()>,
    {
        device.begin_command_buffer(self.command_buffer)?;

        if let Err(err) = record(self.command_buffer) {
            device.reset_command_pool(self.command_pool)?;
            return Err(err);
        }

        device.end_command_buffer(self.command_buffer)?;
        device.queue_submit(&QueueSubmit {
            command_buffer: self.command_buffer,
            wait: None,
            signal: None,
            fence: self.fence,
        })?;
        device.wait_for_fence(self.fence, u64::MAX)?;

        device.reset_fence(self.fence)?;
        device.reset_command_pool(self.command_pool)?;

        self.submissions += 1;
        log::trace!("Immediate submission #{} complete", self.submissions);
        Ok(())
    }

    pub fn submissions(&self) -> u64 {
        self.submissions
    }

    pub fn destroy<D: RenderDevice>(&self, device: &D) {
        device.destroy_command_pool(self.command_pool);
        device.destroy_fence(self.fence);
    }
}
