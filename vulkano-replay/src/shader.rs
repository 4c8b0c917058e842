//! The shaders that transforms build pipelines from.
//!
//! Shader compilation is not part of this crate. A transform that needs a shader asks a
//! [`ShaderCompiler`] for the SPIR-V of one of the [`BuiltinShader`]s. [`ShaderLibrary`] is a
//! compiler that serves precompiled code.

use foldhash::fast::RandomState;
use std::{
    collections::HashMap,
    error::Error,
    fmt::{Display, Error as FmtError, Formatter},
    sync::Arc,
};

/// The magic number that every SPIR-V module starts with.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// A shader that transforms need.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BuiltinShader {
    /// A vertex shader without inputs that covers the whole framebuffer with one triangle.
    FullscreenVertex,

    /// A fragment shader that reads the depth input attachment and writes it to
    /// `gl_FragDepth`.
    CopyDepthFragment,

    /// A fragment shader that writes the same color to every color attachment.
    SolidColorFragment,
}

impl BuiltinShader {
    /// Returns the name of the shader.
    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            Self::FullscreenVertex => "fullscreen.vert",
            Self::CopyDepthFragment => "copy_depth.frag",
            Self::SolidColorFragment => "solid_color.frag",
        }
    }
}

/// Provides the SPIR-V code of builtin shaders.
pub trait ShaderCompiler {
    fn compile(&self, shader: BuiltinShader) -> Result<Arc<[u32]>, ShaderError>;
}

/// A [`ShaderCompiler`] that serves code it has been given ahead of time.
#[derive(Clone, Debug, Default)]
pub struct ShaderLibrary {
    shaders: HashMap<BuiltinShader, Arc<[u32]>, RandomState>,
}

impl ShaderLibrary {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the code of a shader, replacing any code added before.
    pub fn insert(&mut self, shader: BuiltinShader, code: impl Into<Arc<[u32]>>) -> &mut Self {
        self.shaders.insert(shader, code.into());
        self
    }
}

impl ShaderCompiler for ShaderLibrary {
    fn compile(&self, shader: BuiltinShader) -> Result<Arc<[u32]>, ShaderError> {
        let code = self
            .shaders
            .get(&shader)
            .ok_or(ShaderError::Unavailable(shader))?;

        if code.first() != Some(&SPIRV_MAGIC) {
            return Err(ShaderError::InvalidSpirv(shader));
        }

        Ok(code.clone())
    }
}

/// Error that can happen when requesting a builtin shader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShaderError {
    /// The compiler has no code for the shader.
    Unavailable(BuiltinShader),

    /// The code of the shader is not a SPIR-V module.
    InvalidSpirv(BuiltinShader),
}

impl Error for ShaderError {}

impl Display for ShaderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            Self::Unavailable(shader) => write!(f, "shader `{}` is not available", shader.name()),
            Self::InvalidSpirv(shader) => {
                write!(f, "shader `{}` is not a SPIR-V module", shader.name())
            }
        }
    }
}
