//! Shader service for headless runs.

use std::path::Path;

use ferry_rhi::shader::{SPIRV_MAGIC, ShaderCompiler, ShaderFormat, ShaderStage};
use ferry_rhi::{RhiError, RhiResult};

/// Produces placeholder bytecode for any shader source.
///
/// The headless device never executes shaders, it only checks that bytecode
/// is present, so a valid SPIR-V header is enough to build every pipeline.
pub struct PlaceholderShaders;

impl ShaderCompiler for PlaceholderShaders {
    fn compile(&self, source: &Path, stage: ShaderStage, format: ShaderFormat) -> RhiResult<Vec<u8>> {
        if format != ShaderFormat::Spirv {
            return Err(RhiError::ShaderError(format!(
                "no {:?} bytecode for {:?}",
                format, source
            )));
        }
        tracing::debug!("Placeholder {} bytecode for {:?}", stage, source);
        // Header: magic, version 1.0, generator, bound, schema.
        let words = [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0];
        Ok(words.iter().flat_map(|word| word.to_le_bytes()).collect())
    }
}
