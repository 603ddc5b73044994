//! Linear post-processing chain.
//!
//! Each pass draws a full-screen triangle and may sample the target of the
//! pass before it:
//!
//! ```text
//! screen (offscreen) -> post (offscreen) -> post2 (surface)
//! ```

use tracing::{debug, info};

use ferry_rhi::device::{Bindings, GpuDevice};
use ferry_rhi::shader::ShaderResources;
use ferry_rhi::types::{Extent2d, ImageFormat, IndexFormat};

use crate::context::GpuContext;
use crate::error::{RenderError, RenderResult};
use crate::render_pass::{PassConfig, PassTarget, RenderPass};

/// Format of intermediate pass targets.
pub const CHAIN_TARGET_FORMAT: ImageFormat = ImageFormat::Rgba8Unorm;

/// Indices drawn by every pass: one generated full-screen triangle.
const FULLSCREEN_INDEX_COUNT: u32 = 3;

/// Where a chained pass writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassOutput {
    /// An owned image at the configured window extent
    Offscreen,
    /// The frame's surface image
    Surface,
}

/// One link of a [`PassChain`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PassDesc {
    /// Pass and shader name
    pub name: String,
    /// Output target
    pub target: PassOutput,
    /// Number of previous targets sampled; 0 or 1
    pub sampled_inputs: u32,
}

impl PassDesc {
    /// A pass drawing into its own image.
    pub fn offscreen(name: impl Into<String>, sampled_inputs: u32) -> Self {
        Self {
            name: name.into(),
            target: PassOutput::Offscreen,
            sampled_inputs,
        }
    }

    /// A pass drawing into the surface.
    pub fn surface(name: impl Into<String>, sampled_inputs: u32) -> Self {
        Self {
            name: name.into(),
            target: PassOutput::Surface,
            sampled_inputs,
        }
    }
}

/// The `screen`, `post`, `post2` chain.
pub fn default_chain() -> Vec<PassDesc> {
    vec![
        PassDesc::offscreen("screen", 0),
        PassDesc::offscreen("post", 1),
        PassDesc::surface("post2", 1),
    ]
}

/// Checks that `descs` can be recorded as a chain.
///
/// # Errors
///
/// Returns [`RenderError::InvalidChain`] if the chain is empty, a pass other
/// than the last targets the surface, the first pass samples an input, or a
/// pass samples more than its predecessor.
pub fn validate(descs: &[PassDesc]) -> RenderResult<()> {
    let Some(first) = descs.first() else {
        return Err(RenderError::InvalidChain("chain has no passes".to_string()));
    };
    if first.sampled_inputs > 0 {
        return Err(RenderError::InvalidChain(format!(
            "first pass '{}' has no previous target to sample",
            first.name
        )));
    }
    for (index, desc) in descs.iter().enumerate() {
        if desc.target == PassOutput::Surface && index + 1 != descs.len() {
            return Err(RenderError::InvalidChain(format!(
                "pass '{}' targets the surface but is not last",
                desc.name
            )));
        }
        if desc.sampled_inputs > 1 {
            return Err(RenderError::InvalidChain(format!(
                "pass '{}' samples {} inputs, at most 1 is available",
                desc.name, desc.sampled_inputs
            )));
        }
    }
    Ok(())
}

/// Render passes recorded in order, each feeding the next.
pub struct PassChain<D: GpuDevice> {
    passes: Vec<(PassDesc, RenderPass<D>)>,
}

impl<D: GpuDevice> PassChain<D> {
    /// Validates `descs` and initialises one pass per entry.
    ///
    /// Every pass receives frame constants in both stages. Offscreen targets
    /// use the configured window extent.
    ///
    /// # Errors
    ///
    /// Returns an error if the chain is invalid or a pass fails to
    /// initialise. Passes built before the failure are released.
    pub fn init(ctx: &GpuContext<D>, descs: &[PassDesc]) -> RenderResult<Self> {
        validate(descs)?;

        let config = ctx.config();
        let extent = Extent2d::new(config.window_width, config.window_height);
        let mut passes = Vec::with_capacity(descs.len());

        for desc in descs {
            let target = match desc.target {
                PassOutput::Offscreen => PassTarget::Offscreen {
                    extent,
                    format: CHAIN_TARGET_FORMAT,
                },
                PassOutput::Surface => PassTarget::Surface,
            };
            let pass_config = PassConfig::new(desc.name.clone(), target).with_resources(
                ShaderResources {
                    uniform_buffers: 1,
                    ..Default::default()
                },
                ShaderResources {
                    samplers: desc.sampled_inputs,
                    uniform_buffers: 1,
                    ..Default::default()
                },
            );

            let mut pass = RenderPass::new(ctx.device().clone());
            pass.init(ctx, &pass_config)?;
            passes.push((desc.clone(), pass));
        }

        info!("Pass chain initialized with {} passes", passes.len());
        Ok(Self { passes })
    }

    /// Records every pass in order.
    ///
    /// # Errors
    ///
    /// Returns the first pass failure. A pass that was opened is closed
    /// before the error is returned; later passes are not recorded.
    pub fn record(
        &mut self,
        cmd: &mut D::CommandList,
        surface: Option<&D::SurfaceImage>,
        index_buffer: &D::Buffer,
        sampler: Option<&D::Sampler>,
    ) -> RenderResult<()> {
        for index in 0..self.passes.len() {
            let (before, rest) = self.passes.split_at_mut(index);
            let (desc, pass) = &mut rest[0];

            pass.begin(cmd, surface)?;

            let input = before.last().and_then(|(_, previous)| previous.target());
            let textures: Vec<&D::Image> = match (desc.sampled_inputs, input) {
                (0, _) => Vec::new(),
                (_, Some(image)) => vec![image],
                (_, None) => {
                    pass.end(cmd);
                    return Err(RenderError::InvalidChain(format!(
                        "pass '{}' has no previous target to sample",
                        desc.name
                    )));
                }
            };

            pass.bind(
                cmd,
                &Bindings {
                    textures: &textures,
                    sampler: sampler.filter(|_| !textures.is_empty()),
                    storage_buffers: &[],
                    vertex_buffers: &[],
                    index_buffer,
                    index_format: IndexFormat::U16,
                },
            );
            pass.exec(cmd, FULLSCREEN_INDEX_COUNT, 1);
            pass.end(cmd);
        }
        Ok(())
    }

    /// Releases every pass. Safe to call more than once.
    pub fn deinit(&mut self) {
        for (_, pass) in &mut self.passes {
            pass.deinit();
        }
        if !self.passes.is_empty() {
            debug!("Released pass chain");
        }
        self.passes.clear();
    }

    /// Pass at `index`.
    pub fn pass(&self, index: usize) -> Option<&RenderPass<D>> {
        self.passes.get(index).map(|(_, pass)| pass)
    }

    /// Names of the passes, in recording order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.passes.iter().map(|(desc, _)| desc.name.as_str())
    }

    /// Number of passes.
    pub fn len(&self) -> usize {
        self.passes.len()
    }

    /// Returns true once deinitialised.
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::context;
    use ferry_rhi::headless::{Fault, HeadlessDevice};

    #[test]
    fn test_default_chain_is_valid() {
        let chain = default_chain();
        assert!(validate(&chain).is_ok());
        let names: Vec<_> = chain.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["screen", "post", "post2"]);
    }

    #[test]
    fn test_validate_rejects_bad_chains() {
        assert!(validate(&[]).is_err());
        assert!(validate(&[PassDesc::surface("a", 0), PassDesc::offscreen("b", 1)]).is_err());
        assert!(validate(&[PassDesc::offscreen("a", 1)]).is_err());
        assert!(validate(&[PassDesc::offscreen("a", 0), PassDesc::surface("b", 2)]).is_err());
        assert!(validate(&[PassDesc::surface("only", 0)]).is_ok());
    }

    #[test]
    fn test_init_builds_targets_at_window_size() {
        let ctx = context(HeadlessDevice::default());
        let chain = PassChain::init(&ctx, &default_chain()).unwrap();
        assert_eq!(chain.len(), 3);
        assert_eq!(chain.pass(0).unwrap().target_extent(), Extent2d::new(16, 16));
        assert!(chain.pass(2).unwrap().targets_surface());

        let stats = ctx.device().stats();
        assert_eq!((stats.pipelines, stats.images), (3, 2));
    }

    #[test]
    fn test_failed_init_releases_earlier_passes() {
        let ctx = context(HeadlessDevice::default());
        ctx.device().inject(Fault::CreateResource { after: 1 });
        assert!(PassChain::init(&ctx, &default_chain()).is_err());

        let stats = ctx.device().stats();
        assert_eq!((stats.pipelines, stats.images), (0, 0));
    }
}
