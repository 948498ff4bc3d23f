// Shader compiler collaborator
//
// The patch pipeline only needs `source text + stage -> raw output`. The
// external implementation shells out to a native compiler the same way a
// build script drives glslc: `<program> <input> -o <output> -s <stage>`.

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::bytecode::ShaderStage;
use crate::error::RecompileFailure;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Raw compiler output plus whatever the compiler printed.
#[derive(Debug, Clone, Default)]
pub struct CompilerOutput {
    pub raw: Vec<u8>,
    pub messages: Vec<String>,
}

pub trait ShaderCompiler {
    fn compile(&self, source: &str, stage: ShaderStage) -> Result<CompilerOutput, RecompileFailure>;
}

#[derive(Debug, Clone)]
pub struct ExternalCompiler {
    pub program: PathBuf,
    /// Kill the compiler after this long. `None` waits forever.
    pub timeout: Option<Duration>,
    /// Parent of the per-run scratch directory. Defaults to the system temp dir.
    pub scratch_root: Option<PathBuf>,
}

impl ExternalCompiler {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: None,
            scratch_root: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    fn scratch_dir(&self) -> std::io::Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("shader-compile-");
        match &self.scratch_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
    }

    fn spawn(&self, input: &Path, output: &Path, stage: ShaderStage) -> Result<Child, RecompileFailure> {
        log::debug!(
            "running {:?} {:?} -o {:?} -s {}",
            self.program,
            input,
            output,
            stage.compiler_token()
        );
        Command::new(&self.program)
            .arg(input)
            .arg("-o")
            .arg(output)
            .arg("-s")
            .arg(stage.compiler_token())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| RecompileFailure::Spawn {
                program: self.program.display().to_string(),
                source,
            })
    }

    fn wait(&self, child: &mut Child) -> Result<ExitStatus, RecompileFailure> {
        let Some(timeout) = self.timeout else {
            return child.wait().map_err(RecompileFailure::Scratch);
        };
        let start = Instant::now();
        loop {
            if let Some(status) = child.try_wait().map_err(RecompileFailure::Scratch)? {
                return Ok(status);
            }
            if start.elapsed() >= timeout {
                let _ = child.kill();
                let _ = child.wait();
                return Err(RecompileFailure::TimedOut(timeout));
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }
}

/// Collects lines from a child pipe until it closes. Bytes that are not
/// UTF-8 are replaced rather than ending the drain.
fn drain<R: Read + Send + 'static>(
    pipe: Option<R>,
    sink: Arc<Mutex<Vec<String>>>,
    is_stderr: bool,
) -> Option<JoinHandle<()>> {
    let pipe = pipe?;
    Some(std::thread::spawn(move || {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            while matches!(buf.last(), Some(b'\n' | b'\r')) {
                buf.pop();
            }
            let line = String::from_utf8_lossy(&buf).into_owned();
            if is_stderr {
                log::warn!("compiler: {}", line);
            } else {
                log::debug!("compiler: {}", line);
            }
            sink.lock().push(line);
        }
    }))
}

impl ShaderCompiler for ExternalCompiler {
    fn compile(&self, source: &str, stage: ShaderStage) -> Result<CompilerOutput, RecompileFailure> {
        let scratch = self.scratch_dir().map_err(RecompileFailure::Scratch)?;
        let input = scratch.path().join(format!("input.{}", stage.compiler_token()));
        let output = scratch.path().join("output.raw");
        std::fs::write(&input, source).map_err(RecompileFailure::Scratch)?;

        let mut child = self.spawn(&input, &output, stage)?;
        let messages = Arc::new(Mutex::new(Vec::new()));
        let readers = [
            drain(child.stdout.take(), Arc::clone(&messages), false),
            drain(child.stderr.take(), Arc::clone(&messages), true),
        ];
        let status = self.wait(&mut child);
        for reader in readers.into_iter().flatten() {
            let _ = reader.join();
        }
        let messages = std::mem::take(&mut *messages.lock());

        let status = status?;
        if !status.success() {
            return Err(RecompileFailure::ExitStatus {
                status: status.code(),
                diagnostics: messages,
            });
        }
        let raw = match std::fs::read(&output) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RecompileFailure::MissingOutput)
            }
            Err(e) => return Err(RecompileFailure::Scratch(e)),
        };
        Ok(CompilerOutput { raw, messages })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_program_fails_to_spawn() {
        let scratch = tempfile::tempdir().unwrap();
        let compiler = ExternalCompiler::new(scratch.path().join("no-such-compiler"))
            .with_scratch_root(scratch.path());
        let err = compiler.compile("void main() {}", ShaderStage::Fragment).unwrap_err();
        assert!(matches!(err, RecompileFailure::Spawn { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn script_compiler_writes_output() {
        use std::os::unix::fs::PermissionsExt;

        let scratch = tempfile::tempdir().unwrap();
        let script = scratch.path().join("fake-compiler.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\necho \"stage $5\" >&2\nhead -c 310 /dev/zero > \"$3\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let compiler = ExternalCompiler::new(&script)
            .with_timeout(Duration::from_secs(30))
            .with_scratch_root(scratch.path());
        let out = compiler.compile("void main() {}", ShaderStage::Vertex).unwrap();
        assert_eq!(out.raw.len(), 310);
        assert_eq!(out.messages, vec!["stage vert".to_string()]);
    }

    #[cfg(unix)]
    #[test]
    fn non_zero_exit_keeps_diagnostics() {
        use std::os::unix::fs::PermissionsExt;

        let scratch = tempfile::tempdir().unwrap();
        let script = scratch.path().join("failing-compiler.sh");
        std::fs::write(&script, "#!/bin/sh\necho 'error: bad token' >&2\nexit 3\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let compiler = ExternalCompiler::new(&script).with_scratch_root(scratch.path());
        match compiler.compile("x", ShaderStage::Compute) {
            Err(RecompileFailure::ExitStatus { status, diagnostics }) => {
                assert_eq!(status, Some(3));
                assert_eq!(diagnostics, vec!["error: bad token".to_string()]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn invalid_utf8_diagnostics_do_not_stop_the_drain() {
        use std::os::unix::fs::PermissionsExt;

        let scratch = tempfile::tempdir().unwrap();
        let script = scratch.path().join("noisy-compiler.sh");
        std::fs::write(
            &script,
            "#!/bin/sh\nprintf '\\377\\n' >&2\ni=0\nwhile [ $i -lt 20000 ]; do echo \"line $i\" >&2; i=$((i+1)); done\nhead -c 310 /dev/zero > \"$3\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let compiler = ExternalCompiler::new(&script)
            .with_timeout(Duration::from_secs(60))
            .with_scratch_root(scratch.path());
        let out = compiler.compile("void main() {}", ShaderStage::Fragment).unwrap();
        assert_eq!(out.raw.len(), 310);
        assert_eq!(out.messages.len(), 20001);
        assert_eq!(out.messages[0], "\u{FFFD}");
        assert_eq!(out.messages[20000], "line 19999");
    }
}
