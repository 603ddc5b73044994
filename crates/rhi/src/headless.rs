//! In-memory device for tests and offscreen runs.
//!
//! [`HeadlessDevice`] implements [`GpuDevice`] without any GPU:
//! - copies recorded on a command list are applied to host-side contents
//!   when the list is submitted
//! - fences are signaled at submit ([`FenceMode::Auto`]) or only when the
//!   owner calls [`HeadlessDevice::signal_oldest`] ([`FenceMode::Manual`])
//! - every submitted command is kept for inspection
//! - a one-shot [`Fault`] makes the next matching operation fail
//!
//! # Example
//!
//! ```
//! use ferry_rhi::device::GpuDevice;
//! use ferry_rhi::headless::HeadlessDevice;
//! use ferry_rhi::types::{BufferDesc, BufferUsage, Extent2d};
//!
//! # fn example() -> Result<(), ferry_rhi::RhiError> {
//! let device = HeadlessDevice::new(Extent2d::new(64, 64));
//! let buffer = device.create_buffer(&BufferDesc {
//!     name: "indices",
//!     usage: BufferUsage::Index,
//!     size: 6,
//! })?;
//! assert_eq!(device.stats().buffers, 1);
//! device.destroy_buffer(buffer);
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};

use crate::device::{Bindings, GpuDevice, RenderTarget};
use crate::error::{RhiError, RhiResult};
use crate::lock;
use crate::pipeline::PipelineDesc;
use crate::shader::{ShaderFormat, ShaderStage};
use crate::types::{
    BufferDesc, BufferUsage, Extent2d, ImageDesc, ImageFormat, ImageUsage, SamplerDesc,
};

/// Number of images the simulated surface cycles through.
const SURFACE_IMAGE_COUNT: u32 = 3;

type Contents = Arc<Mutex<Vec<u8>>>;

/// When submitted work is considered complete.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FenceMode {
    /// Fences are signaled as soon as the work is submitted
    #[default]
    Auto,
    /// Fences stay pending until signaled by the owner of the device
    Manual,
}

/// Failure injected into the next matching device operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fault {
    /// Buffer or image creation fails after `after` further successful creations
    CreateResource {
        /// Creations allowed to succeed first
        after: usize,
    },
    /// Staging allocation fails
    CreateStaging,
    /// Mapping a staging allocation fails
    MapStaging,
    /// Pipeline creation fails
    CreatePipeline,
    /// Opening a command list fails
    BeginCommands,
    /// Surface acquisition fails
    AcquireSurface,
    /// Submission fails
    Submit,
    /// Waiting on a fence fails; the fence stays pending
    WaitFence,
}

/// Live object and activity counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceStats {
    /// Live buffers
    pub buffers: usize,
    /// Live images
    pub images: usize,
    /// Live samplers
    pub samplers: usize,
    /// Live pipelines
    pub pipelines: usize,
    /// Live staging allocations
    pub staging: usize,
    /// Fences returned by `submit` and not yet released
    pub fences: usize,
    /// Fences not yet signaled
    pub pending_fences: usize,
    /// Command lists opened and not yet submitted or cancelled
    pub open_command_lists: usize,
    /// Successful submissions
    pub submissions: usize,
    /// Cancelled command lists, including failed submissions
    pub cancelled: usize,
    /// Copy commands ever recorded
    pub copies_recorded: usize,
    /// Indexed draws ever recorded
    pub draws_recorded: usize,
}

/// Identifies the color target of a recorded render pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetId {
    /// Caller-owned image
    Image(u64),
    /// Surface image index
    Surface(u32),
}

/// A command as recorded on a headless command list.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Staging to buffer copy
    CopyBuffer {
        /// Destination buffer id
        dst: u64,
        /// Offset into the staging allocation
        src_offset: u64,
        /// Bytes copied
        size: u64,
    },
    /// Staging to image copy
    CopyImage {
        /// Destination image id
        dst: u64,
        /// Offset into the staging allocation
        src_offset: u64,
        /// Copied extent
        extent: Extent2d,
    },
    /// Constant data pushed for a stage
    PushConstants {
        /// Receiving stage
        stage: ShaderStage,
        /// Pushed bytes
        data: Vec<u8>,
    },
    /// Render pass opened
    BeginPass {
        /// Color target
        target: TargetId,
    },
    /// Pipeline bound
    BindPipeline {
        /// Pipeline debug name
        name: String,
        /// Stages that received pushed constants at bind time
        constants: Vec<ShaderStage>,
    },
    /// Resources attached
    BindResources {
        /// Sampled image ids
        textures: Vec<u64>,
        /// Sampler id
        sampler: Option<u64>,
        /// Storage buffer ids
        storage_buffers: Vec<u64>,
        /// Vertex buffer ids
        vertex_buffers: Vec<u64>,
        /// Index buffer id
        index_buffer: u64,
    },
    /// Indexed draw
    DrawIndexed {
        /// Indices per instance
        index_count: u32,
        /// Instances
        instance_count: u32,
    },
    /// Render pass closed
    EndPass,
}

/// A submitted command list.
#[derive(Clone, Debug, PartialEq)]
pub struct Submission {
    /// Id of the fence returned for this submission
    pub fence: u64,
    /// Recorded commands, in order
    pub commands: Vec<Command>,
    /// Surface image presented by this submission
    pub presented: Option<u32>,
}

#[derive(Debug, Default)]
struct Signal {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    fn set(&self) {
        *lock(&self.signaled) = true;
        self.cond.notify_all();
    }

    fn is_set(&self) -> bool {
        *lock(&self.signaled)
    }

    fn wait(&self) {
        let mut signaled = lock(&self.signaled);
        while !*signaled {
            signaled = self
                .cond
                .wait(signaled)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Headless device buffer.
#[derive(Debug)]
pub struct HeadlessBuffer {
    id: u64,
    usage: BufferUsage,
    contents: Contents,
}

impl HeadlessBuffer {
    /// Unique id of this buffer.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Usage the buffer was created with.
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// Allocated size in bytes.
    pub fn size(&self) -> u64 {
        lock(&self.contents).len() as u64
    }

    /// Snapshot of the buffer contents.
    pub fn contents(&self) -> Vec<u8> {
        lock(&self.contents).clone()
    }
}

/// Headless device image.
#[derive(Debug)]
pub struct HeadlessImage {
    id: u64,
    extent: Extent2d,
    format: ImageFormat,
    usage: ImageUsage,
    name: String,
    texels: Contents,
}

impl HeadlessImage {
    /// Unique id of this image.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Image dimensions.
    pub fn extent(&self) -> Extent2d {
        self.extent
    }

    /// Texel format.
    pub fn format(&self) -> ImageFormat {
        self.format
    }

    /// Usage the image was created with.
    pub fn usage(&self) -> ImageUsage {
        self.usage
    }

    /// Debug name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Snapshot of the texel data, tightly packed rows.
    pub fn texels(&self) -> Vec<u8> {
        lock(&self.texels).clone()
    }
}

/// Headless staging allocation.
#[derive(Debug)]
pub struct HeadlessStaging {
    data: Vec<u8>,
}

/// Headless completion signal.
#[derive(Debug)]
pub struct HeadlessFence {
    id: u64,
    signal: Arc<Signal>,
}

impl HeadlessFence {
    /// Submission-ordered id of this fence.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns true once the submission is complete.
    pub fn is_signaled(&self) -> bool {
        self.signal.is_set()
    }
}

/// Headless graphics pipeline.
#[derive(Debug)]
pub struct HeadlessPipeline {
    name: String,
    uniform_stages: Vec<ShaderStage>,
    color_format: ImageFormat,
}

impl HeadlessPipeline {
    /// Debug name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Format of the color target this pipeline renders into.
    pub fn color_format(&self) -> ImageFormat {
        self.color_format
    }
}

/// Headless sampler.
#[derive(Debug)]
pub struct HeadlessSampler {
    id: u64,
    desc: SamplerDesc,
}

impl HeadlessSampler {
    /// Creation parameters.
    pub fn desc(&self) -> SamplerDesc {
        self.desc
    }
}

/// Index of an acquired headless surface image.
#[derive(Debug)]
pub struct HeadlessSurfaceImage {
    index: u32,
}

impl HeadlessSurfaceImage {
    /// Surface image index.
    pub fn index(&self) -> u32 {
        self.index
    }
}

/// Headless command list.
#[derive(Debug, Default)]
pub struct HeadlessCommandList {
    commands: Vec<Command>,
    writes: Vec<(Contents, Vec<u8>)>,
    pushed: Vec<ShaderStage>,
    surface: Option<u32>,
    in_pass: bool,
}

impl HeadlessCommandList {
    /// Commands recorded so far.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }
}

#[derive(Debug)]
struct State {
    next_id: u64,
    next_fence: u64,
    next_surface: u32,
    mode: FenceMode,
    surface_available: bool,
    fault: Option<Fault>,
    pending: VecDeque<(u64, Arc<Signal>)>,
    submissions: Vec<Submission>,
    stats: DeviceStats,
}

/// In-memory [`GpuDevice`].
#[derive(Debug)]
pub struct HeadlessDevice {
    extent: Extent2d,
    state: Mutex<State>,
}

impl HeadlessDevice {
    /// Creates a device whose surface has `extent`.
    pub fn new(extent: Extent2d) -> Self {
        Self {
            extent,
            state: Mutex::new(State {
                next_id: 1,
                next_fence: 0,
                next_surface: 0,
                mode: FenceMode::Auto,
                surface_available: true,
                fault: None,
                pending: VecDeque::new(),
                submissions: Vec::new(),
                stats: DeviceStats::default(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        lock(&self.state)
    }

    /// Switches fence completion mode.
    ///
    /// Switching to [`FenceMode::Auto`] signals every pending fence.
    pub fn set_fence_mode(&self, mode: FenceMode) {
        let mut state = self.state();
        state.mode = mode;
        if mode == FenceMode::Auto {
            for (_, signal) in state.pending.drain(..) {
                signal.set();
            }
        }
    }

    /// Signals the oldest pending fence and returns its id.
    pub fn signal_oldest(&self) -> Option<u64> {
        let (id, signal) = self.state().pending.pop_front()?;
        debug!("Signaling fence {}", id);
        signal.set();
        Some(id)
    }

    /// Signals every pending fence.
    pub fn signal_all(&self) {
        let pending: Vec<_> = self.state().pending.drain(..).collect();
        for (_, signal) in pending {
            signal.set();
        }
    }

    /// Makes the surface report no available image until re-enabled.
    pub fn set_surface_available(&self, available: bool) {
        self.state().surface_available = available;
    }

    /// Arms a one-shot fault.
    pub fn inject(&self, fault: Fault) {
        self.state().fault = Some(fault);
    }

    /// Current counters.
    pub fn stats(&self) -> DeviceStats {
        let state = self.state();
        DeviceStats {
            pending_fences: state.pending.len(),
            ..state.stats
        }
    }

    /// Every successful submission so far.
    pub fn submissions(&self) -> Vec<Submission> {
        self.state().submissions.clone()
    }

    fn allocate_id(state: &mut State) -> u64 {
        let id = state.next_id;
        state.next_id += 1;
        id
    }

    fn take_fault(state: &mut State, expected: Fault) -> bool {
        if state.fault == Some(expected) {
            state.fault = None;
            true
        } else {
            false
        }
    }

    fn take_resource_fault(state: &mut State) -> bool {
        match state.fault {
            Some(Fault::CreateResource { after: 0 }) => {
                state.fault = None;
                true
            }
            Some(Fault::CreateResource { after }) => {
                state.fault = Some(Fault::CreateResource { after: after - 1 });
                false
            }
            _ => false,
        }
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new(Extent2d::new(1280, 720))
    }
}

impl GpuDevice for HeadlessDevice {
    type Buffer = HeadlessBuffer;
    type Image = HeadlessImage;
    type Staging = HeadlessStaging;
    type Fence = HeadlessFence;
    type Pipeline = HeadlessPipeline;
    type Sampler = HeadlessSampler;
    type CommandList = HeadlessCommandList;
    type SurfaceImage = HeadlessSurfaceImage;

    fn name(&self) -> &str {
        "headless"
    }

    fn shader_format(&self) -> ShaderFormat {
        ShaderFormat::Spirv
    }

    fn surface_format(&self) -> ImageFormat {
        ImageFormat::Bgra8Unorm
    }

    fn surface_extent(&self) -> Extent2d {
        self.extent
    }

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> RhiResult<HeadlessBuffer> {
        if desc.size == 0 {
            return Err(RhiError::ResourceCreation(format!(
                "buffer '{}' must have a non-zero size",
                desc.name
            )));
        }
        let mut state = self.state();
        if Self::take_resource_fault(&mut state) {
            return Err(RhiError::ResourceCreation(format!(
                "injected failure creating buffer '{}'",
                desc.name
            )));
        }
        let id = Self::allocate_id(&mut state);
        state.stats.buffers += 1;
        trace!("Created {} buffer {} ({} bytes)", desc.usage.name(), id, desc.size);
        Ok(HeadlessBuffer {
            id,
            usage: desc.usage,
            contents: Arc::new(Mutex::new(vec![0; desc.size as usize])),
        })
    }

    fn destroy_buffer(&self, _buffer: HeadlessBuffer) {
        self.state().stats.buffers -= 1;
    }

    fn create_image(&self, desc: &ImageDesc<'_>) -> RhiResult<HeadlessImage> {
        if desc.extent.is_empty() {
            return Err(RhiError::ResourceCreation(format!(
                "image '{}' must have a non-zero extent",
                desc.name
            )));
        }
        let mut state = self.state();
        if Self::take_resource_fault(&mut state) {
            return Err(RhiError::ResourceCreation(format!(
                "injected failure creating image '{}'",
                desc.name
            )));
        }
        let id = Self::allocate_id(&mut state);
        state.stats.images += 1;
        let len = desc.extent.width as usize
            * desc.extent.height as usize
            * desc.format.bytes_per_texel() as usize;
        trace!(
            "Created {} image '{}' {} ({}x{})",
            desc.usage.name(),
            desc.name,
            id,
            desc.extent.width,
            desc.extent.height
        );
        Ok(HeadlessImage {
            id,
            extent: desc.extent,
            format: desc.format,
            usage: desc.usage,
            name: desc.name.to_string(),
            texels: Arc::new(Mutex::new(vec![0; len])),
        })
    }

    fn destroy_image(&self, _image: HeadlessImage) {
        self.state().stats.images -= 1;
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> RhiResult<HeadlessSampler> {
        let mut state = self.state();
        let id = Self::allocate_id(&mut state);
        state.stats.samplers += 1;
        Ok(HeadlessSampler { id, desc: *desc })
    }

    fn destroy_sampler(&self, _sampler: HeadlessSampler) {
        self.state().stats.samplers -= 1;
    }

    fn create_staging(&self, size: u64) -> RhiResult<HeadlessStaging> {
        let mut state = self.state();
        if size == 0 || Self::take_fault(&mut state, Fault::CreateStaging) {
            return Err(RhiError::ResourceCreation(format!(
                "staging allocation of {} bytes failed",
                size
            )));
        }
        state.stats.staging += 1;
        Ok(HeadlessStaging {
            data: vec![0; size as usize],
        })
    }

    fn map_staging<'a>(&self, staging: &'a mut HeadlessStaging) -> RhiResult<&'a mut [u8]> {
        if Self::take_fault(&mut self.state(), Fault::MapStaging) {
            return Err(RhiError::MappingFailed(
                "injected staging map failure".to_string(),
            ));
        }
        Ok(&mut staging.data)
    }

    fn destroy_staging(&self, _staging: HeadlessStaging) {
        self.state().stats.staging -= 1;
    }

    fn create_pipeline(&self, desc: &PipelineDesc<'_>) -> RhiResult<HeadlessPipeline> {
        let mut state = self.state();
        if Self::take_fault(&mut state, Fault::CreatePipeline) {
            return Err(RhiError::PipelineError(format!(
                "injected failure creating pipeline '{}'",
                desc.name
            )));
        }
        if desc.vertex.code.is_empty() || desc.fragment.code.is_empty() {
            return Err(RhiError::PipelineError(format!(
                "pipeline '{}' has empty shader bytecode",
                desc.name
            )));
        }
        state.stats.pipelines += 1;
        Ok(HeadlessPipeline {
            name: desc.name.to_string(),
            uniform_stages: desc.uniform_stages().collect(),
            color_format: desc.color_format,
        })
    }

    fn destroy_pipeline(&self, _pipeline: HeadlessPipeline) {
        self.state().stats.pipelines -= 1;
    }

    fn begin_commands(&self) -> RhiResult<HeadlessCommandList> {
        let mut state = self.state();
        if Self::take_fault(&mut state, Fault::BeginCommands) {
            return Err(RhiError::ResourceCreation(
                "injected command list failure".to_string(),
            ));
        }
        state.stats.open_command_lists += 1;
        Ok(HeadlessCommandList::default())
    }

    fn cmd_copy_buffer(
        &self,
        cmd: &mut HeadlessCommandList,
        src: &HeadlessStaging,
        src_offset: u64,
        dst: &HeadlessBuffer,
        size: u64,
    ) {
        let start = src_offset as usize;
        let bytes = src.data[start..start + size as usize].to_vec();
        cmd.writes.push((dst.contents.clone(), bytes));
        cmd.commands.push(Command::CopyBuffer {
            dst: dst.id,
            src_offset,
            size,
        });
        self.state().stats.copies_recorded += 1;
    }

    fn cmd_copy_image(
        &self,
        cmd: &mut HeadlessCommandList,
        src: &HeadlessStaging,
        src_offset: u64,
        dst: &HeadlessImage,
        extent: Extent2d,
    ) {
        let len = extent.width as usize
            * extent.height as usize
            * dst.format.bytes_per_texel() as usize;
        let start = src_offset as usize;
        let bytes = src.data[start..start + len].to_vec();
        cmd.writes.push((dst.texels.clone(), bytes));
        cmd.commands.push(Command::CopyImage {
            dst: dst.id,
            src_offset,
            extent,
        });
        self.state().stats.copies_recorded += 1;
    }

    fn acquire_surface(
        &self,
        cmd: &mut HeadlessCommandList,
    ) -> RhiResult<Option<HeadlessSurfaceImage>> {
        let mut state = self.state();
        if Self::take_fault(&mut state, Fault::AcquireSurface) {
            return Err(RhiError::SurfaceError(
                "injected surface acquisition failure".to_string(),
            ));
        }
        if !state.surface_available {
            return Ok(None);
        }
        let index = state.next_surface;
        state.next_surface = (index + 1) % SURFACE_IMAGE_COUNT;
        cmd.surface = Some(index);
        Ok(Some(HeadlessSurfaceImage { index }))
    }

    fn cmd_push_constants(&self, cmd: &mut HeadlessCommandList, stage: ShaderStage, data: &[u8]) {
        if !cmd.pushed.contains(&stage) {
            cmd.pushed.push(stage);
        }
        cmd.commands.push(Command::PushConstants {
            stage,
            data: data.to_vec(),
        });
    }

    fn cmd_begin_render_pass(
        &self,
        cmd: &mut HeadlessCommandList,
        target: RenderTarget<'_, Self>,
    ) -> RhiResult<()> {
        if cmd.in_pass {
            return Err(RhiError::InvalidHandle(
                "render pass already open on this command list".to_string(),
            ));
        }
        let target = match target {
            RenderTarget::Image(image) => {
                if image.usage != ImageUsage::Target {
                    return Err(RhiError::InvalidHandle(format!(
                        "image '{}' is not a render target",
                        image.name
                    )));
                }
                TargetId::Image(image.id)
            }
            RenderTarget::Surface(surface) => {
                if cmd.surface != Some(surface.index) {
                    return Err(RhiError::SurfaceError(format!(
                        "surface image {} was not acquired on this command list",
                        surface.index
                    )));
                }
                TargetId::Surface(surface.index)
            }
        };
        cmd.in_pass = true;
        cmd.commands.push(Command::BeginPass { target });
        Ok(())
    }

    fn cmd_bind_pipeline(&self, cmd: &mut HeadlessCommandList, pipeline: &HeadlessPipeline) {
        let constants = pipeline
            .uniform_stages
            .iter()
            .copied()
            .filter(|stage| cmd.pushed.contains(stage))
            .collect();
        cmd.commands.push(Command::BindPipeline {
            name: pipeline.name.clone(),
            constants,
        });
    }

    fn cmd_bind_resources(&self, cmd: &mut HeadlessCommandList, bindings: &Bindings<'_, Self>) {
        cmd.commands.push(Command::BindResources {
            textures: bindings.textures.iter().map(|image| image.id).collect(),
            sampler: bindings.sampler.map(|sampler| sampler.id),
            storage_buffers: bindings.storage_buffers.iter().map(|b| b.id).collect(),
            vertex_buffers: bindings.vertex_buffers.iter().map(|b| b.id).collect(),
            index_buffer: bindings.index_buffer.id,
        });
    }

    fn cmd_draw_indexed(
        &self,
        cmd: &mut HeadlessCommandList,
        index_count: u32,
        instance_count: u32,
    ) {
        cmd.commands.push(Command::DrawIndexed {
            index_count,
            instance_count,
        });
        self.state().stats.draws_recorded += 1;
    }

    fn cmd_end_render_pass(&self, cmd: &mut HeadlessCommandList) {
        cmd.in_pass = false;
        cmd.commands.push(Command::EndPass);
    }

    fn submit(&self, cmd: HeadlessCommandList) -> RhiResult<HeadlessFence> {
        let mut state = self.state();
        state.stats.open_command_lists -= 1;
        if Self::take_fault(&mut state, Fault::Submit) {
            state.stats.cancelled += 1;
            return Err(RhiError::SubmitFailed(
                "injected submission failure".to_string(),
            ));
        }
        if cmd.in_pass {
            state.stats.cancelled += 1;
            return Err(RhiError::SubmitFailed(
                "command list submitted with an open render pass".to_string(),
            ));
        }

        for (contents, bytes) in &cmd.writes {
            let mut contents = lock(contents);
            contents[..bytes.len()].copy_from_slice(bytes);
        }

        let id = state.next_fence;
        state.next_fence += 1;
        let signal = Arc::new(Signal::default());
        match state.mode {
            FenceMode::Auto => signal.set(),
            FenceMode::Manual => state.pending.push_back((id, signal.clone())),
        }

        state.stats.submissions += 1;
        state.stats.fences += 1;
        state.submissions.push(Submission {
            fence: id,
            commands: cmd.commands,
            presented: cmd.surface,
        });
        debug!("Submitted command list, fence {}", id);

        Ok(HeadlessFence { id, signal })
    }

    fn cancel(&self, _cmd: HeadlessCommandList) {
        let mut state = self.state();
        state.stats.open_command_lists -= 1;
        state.stats.cancelled += 1;
    }

    fn wait_fence(&self, fence: &HeadlessFence) -> RhiResult<()> {
        if Self::take_fault(&mut self.state(), Fault::WaitFence) {
            return Err(RhiError::WaitFailed("injected wait failure".to_string()));
        }
        fence.signal.wait();
        Ok(())
    }

    fn release_fence(&self, _fence: HeadlessFence) {
        self.state().stats.fences -= 1;
    }

    fn wait_idle(&self) -> RhiResult<()> {
        let pending: Vec<_> = self
            .state()
            .pending
            .iter()
            .map(|(_, signal)| signal.clone())
            .collect();
        for signal in pending {
            signal.wait();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(device: &HeadlessDevice, size: u64) -> RhiResult<HeadlessBuffer> {
        device.create_buffer(&BufferDesc {
            name: "test",
            usage: BufferUsage::Storage,
            size,
        })
    }

    #[test]
    fn test_headless_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HeadlessDevice>();
    }

    #[test]
    fn test_copy_applies_on_submit() {
        let device = HeadlessDevice::default();
        let dst = buffer(&device, 4).unwrap();
        let mut staging = device.create_staging(8).unwrap();
        device
            .map_staging(&mut staging)
            .unwrap()
            .copy_from_slice(&[0, 0, 0, 0, 1, 2, 3, 4]);

        let mut cmd = device.begin_commands().unwrap();
        device.cmd_copy_buffer(&mut cmd, &staging, 4, &dst, 4);
        assert_eq!(dst.contents(), vec![0; 4]);

        let fence = device.submit(cmd).unwrap();
        assert!(fence.is_signaled());
        assert_eq!(dst.contents(), vec![1, 2, 3, 4]);

        device.release_fence(fence);
        device.destroy_staging(staging);
        device.destroy_buffer(dst);
        assert_eq!(device.stats(), DeviceStats {
            submissions: 1,
            copies_recorded: 1,
            ..Default::default()
        });
    }

    #[test]
    fn test_manual_fences_signal_in_order() {
        let device = HeadlessDevice::default();
        device.set_fence_mode(FenceMode::Manual);

        let first = device.submit(device.begin_commands().unwrap()).unwrap();
        let second = device.submit(device.begin_commands().unwrap()).unwrap();
        assert!(!first.is_signaled());
        assert_eq!(device.stats().pending_fences, 2);

        assert_eq!(device.signal_oldest(), Some(first.id()));
        assert!(first.is_signaled());
        assert!(!second.is_signaled());

        device.set_fence_mode(FenceMode::Auto);
        assert!(second.is_signaled());
        assert_eq!(device.signal_oldest(), None);
    }

    #[test]
    fn test_resource_fault_counts_down() {
        let device = HeadlessDevice::default();
        device.inject(Fault::CreateResource { after: 1 });
        let first = buffer(&device, 4).unwrap();
        assert!(matches!(
            buffer(&device, 4),
            Err(RhiError::ResourceCreation(_))
        ));
        let third = buffer(&device, 4).unwrap();
        device.destroy_buffer(first);
        device.destroy_buffer(third);
        assert_eq!(device.stats().buffers, 0);
    }

    #[test]
    fn test_unavailable_surface() {
        let device = HeadlessDevice::default();
        device.set_surface_available(false);
        let mut cmd = device.begin_commands().unwrap();
        assert!(device.acquire_surface(&mut cmd).unwrap().is_none());
        device.cancel(cmd);
        assert_eq!(device.stats().cancelled, 1);
    }

    #[test]
    fn test_submit_with_open_pass_fails() {
        let device = HeadlessDevice::default();
        let mut cmd = device.begin_commands().unwrap();
        let surface = device.acquire_surface(&mut cmd).unwrap().unwrap();
        device
            .cmd_begin_render_pass(&mut cmd, RenderTarget::Surface(&surface))
            .unwrap();
        assert!(matches!(
            device.submit(cmd),
            Err(RhiError::SubmitFailed(_))
        ));
        assert_eq!(device.stats().open_command_lists, 0);
    }
}
