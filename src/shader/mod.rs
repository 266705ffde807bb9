//! WGSL kernels for GPU hosts
//!
//! The kernel sources carry `{{TILE_SIZE}}`, `{{XY_CAPACITY}}` and
//! `{{Z_CAPACITY}}` placeholders, since workgroup sizes and workgroup array
//! lengths must be known when the module is built. [`specialize`] fills them
//! from a [`TiledConfig`]; naga then validates the result and can emit SPIR-V.
//!
//! # Example
//!
//! ```ignore
//! use tiled_lighting::shader::{build_kernel, KernelShader};
//!
//! let spirv = build_kernel(KernelShader::TiledShading, &TiledConfig::default())?;
//! ```

use crate::error::{TiledError, TiledResult};
use crate::pipeline::{LIGHT_CULLING_SHADER, TILED_SHADING_SHADER, TILE_DEPTH_SHADER};
use crate::TiledConfig;

/// Entry point shared by every kernel.
pub const ENTRY_POINT: &str = "main";

/// The shipped compute kernels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelShader {
    TileDepth,
    LightCulling,
    TiledShading,
}

impl KernelShader {
    pub const ALL: [KernelShader; 3] = [
        KernelShader::TileDepth,
        KernelShader::LightCulling,
        KernelShader::TiledShading,
    ];

    /// Unspecialized WGSL source.
    pub fn source(&self) -> &'static str {
        match self {
            KernelShader::TileDepth => TILE_DEPTH_SHADER,
            KernelShader::LightCulling => LIGHT_CULLING_SHADER,
            KernelShader::TiledShading => TILED_SHADING_SHADER,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            KernelShader::TileDepth => "tile depth",
            KernelShader::LightCulling => "light culling",
            KernelShader::TiledShading => "tiled shading",
        }
    }
}

/// Substitute the configuration into a kernel source.
pub fn specialize(source: &str, config: &TiledConfig) -> String {
    source
        .replace("{{TILE_SIZE}}", &config.tile_size.to_string())
        .replace("{{XY_CAPACITY}}", &config.xy_capacity.to_string())
        .replace("{{Z_CAPACITY}}", &config.z_capacity.to_string())
}

/// Parse and validate WGSL.
pub fn parse_wgsl(source: &str) -> TiledResult<(naga::Module, naga::valid::ModuleInfo)> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| {
        TiledError::ShaderCompilation(format!("WGSL parse error: {}", e.emit_to_string(source)))
    })?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    let info = validator.validate(&module).map_err(|e| {
        TiledError::ShaderCompilation(format!("Validation error: {}", e.emit_to_string(source)))
    })?;

    Ok((module, info))
}

pub fn validate_wgsl(source: &str) -> TiledResult<()> {
    parse_wgsl(source).map(|_| ())
}

/// Compile a compute entry point to SPIR-V words.
pub fn compile_to_spirv(source: &str, entry_point: &str) -> TiledResult<Vec<u32>> {
    let (module, info) = parse_wgsl(source)?;

    if !module
        .entry_points
        .iter()
        .any(|ep| ep.name == entry_point && ep.stage == naga::ShaderStage::Compute)
    {
        return Err(TiledError::ShaderCompilation(format!(
            "Compute entry point '{}' not found",
            entry_point
        )));
    }

    let options = naga::back::spv::Options {
        lang_version: (1, 3),
        flags: naga::back::spv::WriterFlags::empty(),
        capabilities: None,
        bounds_check_policies: naga::proc::BoundsCheckPolicies::default(),
        binding_map: Default::default(),
        debug_info: None,
        zero_initialize_workgroup_memory: naga::back::spv::ZeroInitializeWorkgroupMemoryMode::None,
    };
    let pipeline_options = naga::back::spv::PipelineOptions {
        shader_stage: naga::ShaderStage::Compute,
        entry_point: entry_point.to_string(),
    };

    naga::back::spv::write_vec(&module, &info, &options, Some(&pipeline_options))
        .map_err(|e| TiledError::ShaderCompilation(format!("SPIR-V generation error: {e}")))
}

/// Specialize and compile one kernel.
pub fn build_kernel(kernel: KernelShader, config: &TiledConfig) -> TiledResult<Vec<u32>> {
    config.validate()?;
    let source = specialize(kernel.source(), config);
    let spirv = compile_to_spirv(&source, ENTRY_POINT)?;
    log::debug!(
        "Compiled {} kernel ({} SPIR-V words)",
        kernel.label(),
        spirv.len()
    );
    Ok(spirv)
}
