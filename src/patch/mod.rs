// Recompilation and patch pipeline
//
// `recompile` never fails. Any problem between reading the control record and
// rewriting it sends both original blobs back untouched, with the reason kept
// in `PatchOutput::fallback`.

pub mod compiler;
pub mod header;
pub mod macros;

use std::collections::HashMap;

use bytes::Bytes;

use crate::archive::ShaderModel;
use crate::bytecode::{ControlRecord, NvnControl, ShaderStage};
use crate::error::{ArchiveError, RecompileFailure, Result};

pub use compiler::{CompilerOutput, ExternalCompiler, ShaderCompiler};
pub use header::fix_header;
pub use macros::apply_macro_overrides;

#[derive(Debug)]
pub struct PatchOutput {
    pub bytecode: Bytes,
    pub control: Bytes,
    /// Set when the originals were returned instead of new code.
    pub fallback: Option<RecompileFailure>,
    /// Compiler output lines, successful or not.
    pub messages: Vec<String>,
}

impl PatchOutput {
    pub fn is_fallback(&self) -> bool {
        self.fallback.is_some()
    }
}

/// Recompiles one stage using the NVN control record layout.
pub fn recompile(
    compiler: &dyn ShaderCompiler,
    original_bytecode: &Bytes,
    original_control: &Bytes,
    source: &str,
    stage: ShaderStage,
    macro_overrides: Option<&HashMap<String, String>>,
) -> PatchOutput {
    recompile_with::<NvnControl>(
        compiler,
        original_bytecode,
        original_control,
        source,
        stage,
        macro_overrides,
    )
}

pub fn recompile_with<C: ControlRecord>(
    compiler: &dyn ShaderCompiler,
    original_bytecode: &Bytes,
    original_control: &Bytes,
    source: &str,
    stage: ShaderStage,
    macro_overrides: Option<&HashMap<String, String>>,
) -> PatchOutput {
    let mut messages = Vec::new();
    match try_recompile::<C>(
        compiler,
        original_bytecode,
        original_control,
        source,
        stage,
        macro_overrides,
        &mut messages,
    ) {
        Ok((bytecode, control)) => {
            log::info!(
                "Recompiled {:?} stage: {} -> {} bytes of bytecode",
                stage,
                original_bytecode.len(),
                bytecode.len()
            );
            PatchOutput {
                bytecode: Bytes::from(bytecode),
                control: Bytes::from(control),
                fallback: None,
                messages,
            }
        }
        Err(failure) => {
            log::warn!("Recompiling {:?} stage failed, keeping original code: {}", stage, failure);
            if let RecompileFailure::ExitStatus { diagnostics, .. } = &failure {
                messages.extend(diagnostics.iter().cloned());
            }
            PatchOutput {
                bytecode: original_bytecode.clone(),
                control: original_control.clone(),
                fallback: Some(failure),
                messages,
            }
        }
    }
}

fn try_recompile<C: ControlRecord>(
    compiler: &dyn ShaderCompiler,
    original_bytecode: &Bytes,
    original_control: &Bytes,
    source: &str,
    stage: ShaderStage,
    macro_overrides: Option<&HashMap<String, String>>,
    messages: &mut Vec<String>,
) -> std::result::Result<(Vec<u8>, Vec<u8>), RecompileFailure> {
    let mut control = C::parse(original_control.clone()).map_err(RecompileFailure::Control)?;
    let constants = control
        .extract_constants(original_bytecode)
        .map_err(RecompileFailure::Control)?;

    let source = match macro_overrides {
        Some(overrides) => apply_macro_overrides(source, overrides),
        None => source.to_owned(),
    };

    let output = compiler.compile(&source, stage)?;
    messages.extend(output.messages);
    let bytecode = fix_header(&output.raw)?;
    let bytecode = control
        .inject_constants(bytecode, &constants)
        .map_err(RecompileFailure::Control)?;
    Ok((bytecode, control.to_bytes()))
}

/// Resolves `requested` to a program, recompiles its `stage` and stores the
/// result back into the model. Returns the patched program index.
///
/// A compiler failure is not an error: the model keeps its code and the
/// returned output carries the fallback reason.
pub fn patch_program(
    model: &mut ShaderModel,
    compiler: &dyn ShaderCompiler,
    requested: &HashMap<String, String>,
    stage: ShaderStage,
    source: &str,
    macro_overrides: Option<&HashMap<String, String>>,
) -> Result<(usize, PatchOutput)> {
    let program = model.resolve(requested)?.ok_or_else(|| {
        ArchiveError::missing(format!(
            "model '{}' has no program matching {:?}",
            model.name, requested
        ))
    })?;
    let original = model.program_code(program, stage)?.clone();

    let output = recompile(
        compiler,
        &original.bytecode,
        &original.control,
        source,
        stage,
        macro_overrides,
    );
    if !output.is_fallback() {
        model.replace_program_code(
            program,
            stage,
            output.bytecode.clone(),
            output.control.clone(),
        )?;
    }
    Ok((program, output))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::control::sample_control;
    use parking_lot::Mutex;

    struct RecordingCompiler {
        raw: Option<Vec<u8>>,
        seen: Mutex<Vec<String>>,
    }

    impl ShaderCompiler for RecordingCompiler {
        fn compile(&self, source: &str, _stage: ShaderStage) -> std::result::Result<CompilerOutput, RecompileFailure> {
            self.seen.lock().push(source.to_owned());
            match &self.raw {
                Some(raw) => Ok(CompilerOutput {
                    raw: raw.clone(),
                    messages: vec!["ok".into()],
                }),
                None => Err(RecompileFailure::ExitStatus {
                    status: Some(1),
                    diagnostics: vec!["syntax error".into()],
                }),
            }
        }
    }

    fn originals() -> (Bytes, Bytes) {
        let mut bytecode = vec![0xABu8; 0x100];
        bytecode.extend_from_slice(&[1, 2, 3, 4]);
        (Bytes::from(bytecode), Bytes::from(sample_control(0x100, 0x100, 4)))
    }

    #[test]
    fn success_moves_constants_and_rewrites_control() {
        let (bytecode, control) = originals();
        let mut raw = vec![0u8; header::RAW_HEADER_LEN];
        raw.extend_from_slice(&[9; 20]);
        let compiler = RecordingCompiler {
            raw: Some(raw),
            seen: Mutex::new(Vec::new()),
        };
        let overrides: HashMap<String, String> = [("LEVEL".to_string(), "3".to_string())].into();

        let out = recompile(
            &compiler,
            &bytecode,
            &control,
            "#define LEVEL 1\nmain",
            ShaderStage::Fragment,
            Some(&overrides),
        );
        assert!(!out.is_fallback());
        assert_eq!(compiler.seen.lock()[0], "#define LEVEL 3\nmain");
        assert_eq!(out.messages, vec!["ok".to_string()]);

        assert_eq!(out.bytecode.len(), 0x104);
        assert_eq!(&out.bytecode[..4], &header::BYTECODE_MAGIC.to_le_bytes());
        assert_eq!(&out.bytecode[0x100..], &[1, 2, 3, 4]);

        let new_control = NvnControl::parse(out.control.clone()).unwrap();
        assert_eq!(new_control.program_size(), 68);
        assert_eq!(new_control.constant_range(), (0x100, 4));
    }

    #[test]
    fn failure_returns_originals() {
        let (bytecode, control) = originals();
        let compiler = RecordingCompiler {
            raw: None,
            seen: Mutex::new(Vec::new()),
        };
        let out = recompile(&compiler, &bytecode, &control, "main", ShaderStage::Vertex, None);
        assert_eq!(out.bytecode, bytecode);
        assert_eq!(out.control, control);
        assert!(matches!(out.fallback, Some(RecompileFailure::ExitStatus { .. })));
        assert_eq!(out.messages, vec!["syntax error".to_string()]);
    }

    #[test]
    fn bad_control_record_falls_back_without_compiling() {
        let (bytecode, _) = originals();
        let control = Bytes::from_static(&[0; 4]);
        let compiler = RecordingCompiler {
            raw: Some(vec![0; 400]),
            seen: Mutex::new(Vec::new()),
        };
        let out = recompile(&compiler, &bytecode, &control, "main", ShaderStage::Vertex, None);
        assert!(matches!(out.fallback, Some(RecompileFailure::Control(_))));
        assert_eq!(out.control, control);
        assert!(compiler.seen.lock().is_empty());
    }

    #[test]
    fn truncated_output_falls_back() {
        let (bytecode, control) = originals();
        let compiler = RecordingCompiler {
            raw: Some(vec![0; 10]),
            seen: Mutex::new(Vec::new()),
        };
        let out = recompile(&compiler, &bytecode, &control, "main", ShaderStage::Vertex, None);
        assert!(matches!(
            out.fallback,
            Some(RecompileFailure::TruncatedOutput { len: 10, .. })
        ));
        assert_eq!(out.bytecode, bytecode);
    }
}
