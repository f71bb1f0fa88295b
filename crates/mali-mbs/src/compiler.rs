//! The compiler service boundary.
//!
//! The ESSL-to-native compiler is an external binary component; the driver
//! only sees its outputs. [`CompiledShader`] is that output in parsed form,
//! and [`Compiler`] is the seam an FFI binding (or a fixture table in
//! tests) implements.

use thiserror::Error;

use crate::error::MbsError;
use crate::symbols::SymbolTable;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

/// Vertex-stage numbers reported alongside the binary.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VertexParameters {
    pub attribute_count: u32,
    pub varying_count: u32,
    /// Size of the fixed command block the shader expects, in bytes.
    pub command_block_size: u32,
    /// Attribute prefetch count packed into the shader-info GP command.
    pub attribute_prefetch: u32,
}

/// Fragment-stage numbers reported alongside the binary.
///
/// Only the first-instruction length is understood; the remaining words are
/// hardware setup values carried through to the render state untouched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FragmentParameters {
    pub first_instruction_size: u32,
    pub unknown: [u32; 10],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageParameters {
    Vertex(VertexParameters),
    Fragment(FragmentParameters),
}

/// A compiled shader: native code plus the parsed symbol tables.
#[derive(Clone, Debug)]
pub struct CompiledShader {
    pub stage: ShaderStage,
    pub binary: Vec<u8>,
    pub uniforms: SymbolTable,
    /// Empty for fragment shaders.
    pub attributes: SymbolTable,
    /// Empty for fragment shaders.
    pub varyings: SymbolTable,
    pub parameters: StageParameters,
}

impl CompiledShader {
    pub fn shader_size(&self) -> u32 {
        self.binary.len() as u32
    }

    pub fn vertex_parameters(&self) -> Option<&VertexParameters> {
        match &self.parameters {
            StageParameters::Vertex(p) => Some(p),
            StageParameters::Fragment(_) => None,
        }
    }

    pub fn fragment_parameters(&self) -> Option<&FragmentParameters> {
        match &self.parameters {
            StageParameters::Fragment(p) => Some(p),
            StageParameters::Vertex(_) => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum CompileError {
    /// The compiler ran and rejected the source. The log is the compiler's
    /// own error text, heap-owned by us from the moment it crosses the
    /// boundary.
    #[error("shader rejected by compiler:\n{log}")]
    Rejected { log: String },

    /// The compiler could not even allocate its error log.
    #[error("compiler out of memory")]
    OutOfMemory,

    /// The compiler claimed success but its output streams don't parse.
    #[error(transparent)]
    Output(#[from] MbsError),
}

/// Something that turns ESSL source into a [`CompiledShader`].
pub trait Compiler {
    fn compile(&self, stage: ShaderStage, source: &str) -> Result<CompiledShader, CompileError>;
}
