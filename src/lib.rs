// Shader archive toolkit
//
// Decodes version-gated shader archives into a model tree, resolves option
// requests to compiled program variants, re-encodes the tree, and swaps a
// program's stage bytecode for a freshly compiled one.

pub mod archive;
pub mod bytecode;
pub mod error;
pub mod io;
pub mod patch;

pub use archive::{Container, OptionKind, ShaderModel, ShaderOption, ShaderProgram};
pub use bytecode::{BytecodeContainer, ControlRecord, NvnControl, ShaderCode, ShaderStage};
pub use error::{ArchiveError, RecompileFailure, Result};
pub use patch::{
    patch_program, recompile, recompile_with, CompilerOutput, ExternalCompiler, PatchOutput,
    ShaderCompiler,
};
