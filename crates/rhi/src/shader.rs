//! Shader stages, bytecode formats and the shader-compile service seam.
//!
//! Compiling HLSL into device bytecode is an external service. The render
//! passes only see the [`ShaderCompiler`] trait: hand it a source path, a
//! stage and the device's bytecode format, get bytes back.
//!
//! [`SpirvDirectory`] is the implementation used when bytecode is compiled
//! ahead of time and shipped next to the binary.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use ferry_rhi::shader::{ShaderCompiler, ShaderFormat, ShaderStage, SpirvDirectory, source_path};
//!
//! # fn example() -> Result<(), ferry_rhi::RhiError> {
//! let compiler = SpirvDirectory::new("shaders/bin");
//! let source = source_path(Path::new("shaders"), "screen", ShaderStage::Vertex);
//! let bytecode = compiler.compile(&source, ShaderStage::Vertex, ShaderFormat::Spirv)?;
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{RhiError, RhiResult};

/// SPIR-V magic number, first word of every module.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Shader stage type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    /// Vertex shader stage - processes each vertex
    Vertex,
    /// Fragment (pixel) shader stage - processes each fragment
    Fragment,
}

impl ShaderStage {
    /// All graphics stages, in pipeline order.
    pub const ALL: [ShaderStage; 2] = [ShaderStage::Vertex, ShaderStage::Fragment];

    /// Returns a human-readable name for the shader stage.
    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
        }
    }

    /// File-name infix used for sources of this stage (`<name>.<infix>.hlsl`).
    pub fn file_infix(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vert",
            ShaderStage::Fragment => "frag",
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Device bytecode format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderFormat {
    /// Khronos SPIR-V
    Spirv,
    /// DirectX intermediate language
    Dxil,
    /// Metal shading language
    Msl,
}

impl ShaderFormat {
    /// Formats in order of preference.
    pub const PREFERENCE: [ShaderFormat; 3] =
        [ShaderFormat::Dxil, ShaderFormat::Spirv, ShaderFormat::Msl];

    /// Picks the most preferred format among those a device supports.
    pub fn select(supported: &[ShaderFormat]) -> Option<ShaderFormat> {
        Self::PREFERENCE
            .into_iter()
            .find(|format| supported.contains(format))
    }

    /// File extension for compiled bytecode of this format.
    pub fn extension(self) -> &'static str {
        match self {
            ShaderFormat::Spirv => "spv",
            ShaderFormat::Dxil => "dxil",
            ShaderFormat::Msl => "msl",
        }
    }
}

/// Resource slots a shader stage declares.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShaderResources {
    /// Combined texture/sampler slots
    pub samplers: u32,
    /// Read-only storage buffer slots
    pub storage_buffers: u32,
    /// Uniform slots fed by pushed frame constants
    pub uniform_buffers: u32,
}

/// Path of the HLSL source for a shader name and stage.
pub fn source_path(input_dir: &Path, name: &str, stage: ShaderStage) -> PathBuf {
    input_dir.join(format!("{name}.{}.hlsl", stage.file_infix()))
}

/// External shader-compile service.
///
/// Implementations may cache compiled output; callers only rely on getting
/// valid bytecode for `format` or an error.
pub trait ShaderCompiler: Send + Sync {
    /// Produces bytecode for `source` compiled as `stage` into `format`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::ShaderError`] if no bytecode can be produced.
    fn compile(
        &self,
        source: &Path,
        stage: ShaderStage,
        format: ShaderFormat,
    ) -> RhiResult<Vec<u8>>;
}

/// Loads precompiled SPIR-V from an output directory.
///
/// `shaders/screen.vert.hlsl` resolves to `<output_dir>/screen.vert.spv`.
#[derive(Clone, Debug)]
pub struct SpirvDirectory {
    output_dir: PathBuf,
}

impl SpirvDirectory {
    /// Creates a loader rooted at `output_dir`.
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Returns the bytecode path for a source path.
    pub fn bytecode_path(&self, source: &Path) -> RhiResult<PathBuf> {
        let stem = source
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.strip_suffix(".hlsl").unwrap_or(name))
            .ok_or_else(|| {
                RhiError::ShaderError(format!("Invalid shader source path {:?}", source))
            })?;
        Ok(self
            .output_dir
            .join(format!("{stem}.{}", ShaderFormat::Spirv.extension())))
    }
}

impl ShaderCompiler for SpirvDirectory {
    fn compile(
        &self,
        source: &Path,
        stage: ShaderStage,
        format: ShaderFormat,
    ) -> RhiResult<Vec<u8>> {
        if format != ShaderFormat::Spirv {
            return Err(RhiError::ShaderError(format!(
                "SpirvDirectory cannot provide {:?} bytecode",
                format
            )));
        }

        let path = self.bytecode_path(source)?;
        debug!("Loading {} shader bytecode from {:?}", stage, path);

        let bytes = std::fs::read(&path).map_err(|e| {
            RhiError::ShaderError(format!("Failed to read shader file {:?}: {}", path, e))
        })?;

        validate_spirv(&bytes)?;
        Ok(bytes)
    }
}

/// Checks SPIR-V alignment and magic number.
pub fn validate_spirv(bytes: &[u8]) -> RhiResult<()> {
    if bytes.is_empty() || !bytes.len().is_multiple_of(4) {
        return Err(RhiError::ShaderError(format!(
            "SPIR-V code must be a non-empty multiple of 4 bytes, got {} bytes",
            bytes.len()
        )));
    }
    let magic = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    if magic != SPIRV_MAGIC {
        return Err(RhiError::ShaderError(format!(
            "Bad SPIR-V magic number {magic:#010x}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_preference() {
        assert_eq!(
            ShaderFormat::select(&[ShaderFormat::Msl, ShaderFormat::Spirv]),
            Some(ShaderFormat::Spirv)
        );
        assert_eq!(
            ShaderFormat::select(&[ShaderFormat::Spirv, ShaderFormat::Dxil]),
            Some(ShaderFormat::Dxil)
        );
        assert_eq!(ShaderFormat::select(&[]), None);
    }

    #[test]
    fn test_source_path() {
        let path = source_path(Path::new("shaders"), "post", ShaderStage::Fragment);
        assert_eq!(path, PathBuf::from("shaders/post.frag.hlsl"));
    }

    #[test]
    fn test_bytecode_path_strips_hlsl() {
        let dir = SpirvDirectory::new("bin");
        let path = dir
            .bytecode_path(Path::new("shaders/screen.vert.hlsl"))
            .unwrap();
        assert_eq!(path, PathBuf::from("bin/screen.vert.spv"));
    }

    #[test]
    fn test_validate_spirv() {
        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[0; 4]);
        assert!(validate_spirv(&bytes).is_ok());
        assert!(validate_spirv(&bytes[..6]).is_err());
        assert!(validate_spirv(&[0; 8]).is_err());
        assert!(validate_spirv(&[]).is_err());
    }

    #[test]
    fn test_spirv_directory_rejects_other_formats() {
        let dir = SpirvDirectory::new("bin");
        let result = dir.compile(
            Path::new("screen.vert.hlsl"),
            ShaderStage::Vertex,
            ShaderFormat::Dxil,
        );
        assert!(matches!(result, Err(RhiError::ShaderError(_))));
    }

    #[test]
    fn test_spirv_directory_reads_file() {
        let dir = std::env::temp_dir().join(format!("ferry-spirv-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mut bytes = SPIRV_MAGIC.to_le_bytes().to_vec();
        bytes.extend_from_slice(&[1, 2, 3, 4]);
        std::fs::write(dir.join("screen.frag.spv"), &bytes).unwrap();

        let loader = SpirvDirectory::new(&dir);
        let loaded = loader
            .compile(
                Path::new("shaders/screen.frag.hlsl"),
                ShaderStage::Fragment,
                ShaderFormat::Spirv,
            )
            .unwrap();
        assert_eq!(loaded, bytes);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
