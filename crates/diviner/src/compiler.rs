//! Subprocess invocation of the compiler under test and toolchain steps

use std::ffi::OsStr;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use crate::error::ProduceError;

/// Output and exit status of a finished process.
#[derive(Debug)]
pub struct Captured {
    /// stdout and stderr as written, through one shared pipe
    pub output: String,
    pub status: ExitStatus,
}

impl Captured {
    /// Signal that terminated the process, if any.
    pub fn signal(&self) -> Option<i32> {
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            self.status.signal()
        }
        #[cfg(not(unix))]
        {
            None
        }
    }
}

/// The executable being validated.
#[derive(Debug, Clone)]
pub struct Compiler {
    path: PathBuf,
    workdir: PathBuf,
}

impl Compiler {
    /// The compiler runs from its own directory.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let workdir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        Self { path, workdir }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Run with merged stdout/stderr.
    ///
    /// A normal non-zero exit is returned as output; signals and spawn
    /// failures are errors.
    pub fn run<I, S>(&self, args: I) -> Result<String, ProduceError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let captured = capture(self.command(args), &self.display_name(), None)?;
        self.check_signal(&captured)?;
        Ok(captured.output)
    }

    /// Run with stdout captured and stderr written to `stderr_path`.
    pub fn run_stderr_to<I, S>(&self, args: I, stderr_path: &Path) -> Result<String, ProduceError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let program = self.display_name();
        let stderr = File::create(stderr_path).map_err(|e| ProduceError::Capture {
            program: program.clone(),
            message: format!("{}: {}", stderr_path.display(), e),
        })?;
        let captured = capture(self.command(args), &program, Some(stderr))?;
        self.check_signal(&captured)?;
        Ok(captured.output)
    }

    fn command<I, S>(&self, args: I) -> Command
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut command = Command::new(&self.path);
        command.args(args).current_dir(&self.workdir);
        command
    }

    fn check_signal(&self, captured: &Captured) -> Result<(), ProduceError> {
        match captured.signal() {
            Some(signal) => Err(ProduceError::Signal {
                program: self.display_name(),
                signal,
            }),
            None => Ok(()),
        }
    }

    fn display_name(&self) -> String {
        self.path.display().to_string()
    }
}

/// Spawn `command`, wait for it, and collect its output.
///
/// Without `stderr`, both streams share a single pipe so their interleaving
/// is preserved.
pub fn capture(
    mut command: Command,
    program: &str,
    stderr: Option<File>,
) -> Result<Captured, ProduceError> {
    let capture_err = |e: std::io::Error| ProduceError::Capture {
        program: program.to_string(),
        message: e.to_string(),
    };

    let (mut reader, writer) = std::io::pipe().map_err(capture_err)?;
    let stderr = match stderr {
        Some(file) => Stdio::from(file),
        None => Stdio::from(writer.try_clone().map_err(capture_err)?),
    };
    command.stdin(Stdio::null()).stdout(writer).stderr(stderr);

    let mut child = spawn(&mut command).map_err(|e| ProduceError::Spawn {
        program: program.to_string(),
        message: e.to_string(),
    })?;
    // The command still holds the parent's write ends; EOF needs them closed.
    drop(command);

    let mut bytes = Vec::new();
    if let Err(e) = reader.read_to_end(&mut bytes) {
        let _ = child.kill();
        let _ = child.wait();
        return Err(capture_err(e));
    }
    let status = child.wait().map_err(capture_err)?;

    Ok(Captured {
        output: String::from_utf8_lossy(&bytes).into_owned(),
        status,
    })
}

/// A freshly written executable can briefly be held open by a concurrent
/// fork; ETXTBSY clears once that child execs.
fn spawn(command: &mut Command) -> std::io::Result<std::process::Child> {
    let mut busy_retries = 0;
    loop {
        match command.spawn() {
            Err(e) if e.kind() == std::io::ErrorKind::ExecutableFileBusy && busy_retries < 5 => {
                busy_retries += 1;
                std::thread::sleep(std::time::Duration::from_millis(20));
            }
            result => return result,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("cc.sh");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_merges_streams_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let cc = Compiler::new(script(dir.path(), "echo out1\necho err1 >&2\necho out2"));
        assert_eq!(cc.run(["x"]).unwrap(), "out1\nerr1\nout2\n");
    }

    #[test]
    fn test_passes_args_and_runs_in_compiler_dir() {
        let dir = tempfile::tempdir().unwrap();
        let cc = Compiler::new(script(dir.path(), "echo \"$1 $2\"\npwd"));
        let output = cc.run(["a.foo", "-c"]).unwrap();
        let mut lines = output.lines();
        assert_eq!(lines.next(), Some("a.foo -c"));
        let cwd = PathBuf::from(lines.next().unwrap());
        assert_eq!(
            cwd.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn test_nonzero_exit_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let cc = Compiler::new(script(dir.path(), "echo 'Error: bad'\nexit 3"));
        assert_eq!(cc.run::<_, &str>([]).unwrap(), "Error: bad\n");
    }

    #[test]
    fn test_signal_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let cc = Compiler::new(script(dir.path(), "kill -9 $$"));
        assert!(matches!(
            cc.run::<_, &str>([]),
            Err(ProduceError::Signal { signal: 9, .. })
        ));
    }

    #[test]
    fn test_missing_executable_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let cc = Compiler::new(dir.path().join("missing"));
        assert!(matches!(
            cc.run::<_, &str>([]),
            Err(ProduceError::Spawn { .. })
        ));
    }

    #[test]
    fn test_stderr_redirect() {
        let dir = tempfile::tempdir().unwrap();
        let cc = Compiler::new(script(dir.path(), "echo tok\necho oops >&2"));
        let err_path = dir.path().join("errors.txt");
        assert_eq!(cc.run_stderr_to::<_, &str>([], &err_path).unwrap(), "tok\n");
        assert_eq!(fs::read_to_string(err_path).unwrap(), "oops\n");
    }
}
