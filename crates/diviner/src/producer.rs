//! Producing the "actual" output of the compiler under test.
//!
//! One function per variant. Each returns [`ActualRecord::Absent`] when the
//! compiler ran but did not produce usable output, and a [`ProduceError`]
//! only when the environment itself is broken.

use std::ffi::OsStr;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Command;

use crate::case::TestCase;
use crate::compiler::{Compiler, capture};
use crate::config::CodegenConfig;
use crate::error::ProduceError;
use crate::variant::Artifacts;

/// Signature every variant producer implements.
pub type ProduceFn = fn(&ProduceContext<'_>, &TestCase) -> Result<ActualRecord, ProduceError>;

/// Everything a producer needs besides the test case.
pub struct ProduceContext<'a> {
    pub compiler: &'a Compiler,
    pub failure_marker: &'a str,
    pub codegen: &'a CodegenConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActualRecord {
    Produced(String),
    Absent(AbsentReason),
}

/// Why no actual output could be extracted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbsentReason {
    MissingFile(PathBuf),
    FailureMarker(String),
    Toolchain { step: String, output: String },
    Crashed(String),
}

impl fmt::Display for AbsentReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbsentReason::MissingFile(path) => write!(f, "{} was not written", path.display()),
            AbsentReason::FailureMarker(marker) => {
                write!(f, "compiler output contains \"{}\"", marker)
            }
            AbsentReason::Toolchain { step, output } => {
                write!(f, "{} failed: {}", step, output.trim())
            }
            AbsentReason::Crashed(detail) => write!(f, "program crashed: {}", detail),
        }
    }
}

/// Type checker: the compiler's merged output is the result.
pub fn check(ctx: &ProduceContext<'_>, case: &TestCase) -> Result<ActualRecord, ProduceError> {
    let output = ctx
        .compiler
        .run([case.path.as_os_str(), OsStr::new("-c")])?;
    Ok(ActualRecord::Produced(output))
}

/// Lexer: tokens file followed by the errors stream.
pub fn tokens(ctx: &ProduceContext<'_>, case: &TestCase) -> Result<ActualRecord, ProduceError> {
    let Artifacts::Tokens { tokens, errors } = &case.artifacts else {
        return Err(layout_error(case));
    };
    clear(&[tokens, errors]);

    let output = ctx.compiler.run_stderr_to(
        [case.path.as_os_str(), OsStr::new("-t"), tokens.as_os_str()],
        errors,
    )?;
    Ok(collect(&[tokens, errors], &output, ctx.failure_marker))
}

/// Parser: the unparsed reconstruction of the input.
pub fn unparse(ctx: &ProduceContext<'_>, case: &TestCase) -> Result<ActualRecord, ProduceError> {
    let Artifacts::Unparsed { unparsed } = &case.artifacts else {
        return Err(layout_error(case));
    };
    clear(&[unparsed]);

    let output = ctx
        .compiler
        .run([case.path.as_os_str(), OsStr::new("-u"), unparsed.as_os_str()])?;
    Ok(collect(&[unparsed], &output, ctx.failure_marker))
}

/// Three-address code written by `-a`.
pub fn three_address(
    ctx: &ProduceContext<'_>,
    case: &TestCase,
) -> Result<ActualRecord, ProduceError> {
    let Artifacts::ThreeAddress { out } = &case.artifacts else {
        return Err(layout_error(case));
    };
    clear(&[out]);

    let output = ctx
        .compiler
        .run([case.path.as_os_str(), OsStr::new("-a"), out.as_os_str()])?;
    Ok(collect(&[out], &output, ctx.failure_marker))
}

/// Code generation: compile to assembly, assemble, link, run the program and
/// take what it prints.
pub fn codegen(ctx: &ProduceContext<'_>, case: &TestCase) -> Result<ActualRecord, ProduceError> {
    let Artifacts::Codegen {
        asm,
        object,
        exe,
        out,
    } = &case.artifacts
    else {
        return Err(layout_error(case));
    };
    clear(&[asm, object, exe, out]);

    let output = ctx
        .compiler
        .run([case.path.as_os_str(), OsStr::new("-o"), asm.as_os_str()])?;
    if let Some(reason) = missing(&[asm]).or_else(|| marker(&output, ctx.failure_marker)) {
        return Ok(ActualRecord::Absent(reason));
    }

    let workdir = ctx.compiler.workdir();
    let codegen = ctx.codegen;

    let mut assemble = Command::new(&codegen.assembler);
    assemble.arg(asm).arg("-o").arg(object).current_dir(workdir);
    if let Some(reason) = toolchain_step(assemble, &codegen.assembler)? {
        return Ok(ActualRecord::Absent(reason));
    }

    let runtime = if codegen.runtime_object.is_absolute() {
        codegen.runtime_object.clone()
    } else {
        workdir.join(&codegen.runtime_object)
    };
    let mut link = Command::new(&codegen.linker);
    link.args(codegen.link_args_for(object, &runtime, exe))
        .current_dir(workdir);
    if let Some(reason) = toolchain_step(link, &codegen.linker)? {
        return Ok(ActualRecord::Absent(reason));
    }

    let mut program = Command::new(exe);
    if let Some(dir) = case.path.parent() {
        program.current_dir(dir);
    }
    let run = capture(program, &exe.display().to_string(), None)?;

    if let Err(e) = fs::write(out, &run.output) {
        tracing::warn!("failed to write {}: {}", out.display(), e);
    }

    if let Some(signal) = run.signal() {
        return Ok(ActualRecord::Absent(AbsentReason::Crashed(format!(
            "signal {signal}"
        ))));
    }
    if !codegen.crash_marker.is_empty() && run.output.contains(&codegen.crash_marker) {
        return Ok(ActualRecord::Absent(AbsentReason::Crashed(
            codegen.crash_marker.clone(),
        )));
    }
    Ok(ActualRecord::Produced(run.output))
}

/// Run an assembler/linker step. A failing step makes the output absent; a
/// step that cannot be spawned at all is fatal.
fn toolchain_step(command: Command, program: &str) -> Result<Option<AbsentReason>, ProduceError> {
    let captured = capture(command, program, None)?;
    if captured.status.success() {
        Ok(None)
    } else {
        Ok(Some(AbsentReason::Toolchain {
            step: program.to_string(),
            output: captured.output,
        }))
    }
}

/// Concatenated contents of `files`, unless one is missing or the compiler
/// reported a failure.
fn collect(files: &[&PathBuf], output: &str, failure_marker: &str) -> ActualRecord {
    if let Some(reason) = missing(files).or_else(|| marker(output, failure_marker)) {
        return ActualRecord::Absent(reason);
    }

    let mut text = String::new();
    for file in files {
        match fs::read(file) {
            Ok(bytes) => text.push_str(&String::from_utf8_lossy(&bytes)),
            Err(_) => return ActualRecord::Absent(AbsentReason::MissingFile(file.to_path_buf())),
        }
    }
    ActualRecord::Produced(text)
}

fn missing(files: &[&PathBuf]) -> Option<AbsentReason> {
    files
        .iter()
        .find(|f| !f.is_file())
        .map(|f| AbsentReason::MissingFile(f.to_path_buf()))
}

fn marker(output: &str, marker: &str) -> Option<AbsentReason> {
    (!marker.is_empty() && output.contains(marker))
        .then(|| AbsentReason::FailureMarker(marker.to_string()))
}

/// Remove outputs of an earlier run so a file the compiler did not write is
/// noticed.
fn clear(files: &[&PathBuf]) {
    for file in files {
        if let Err(e) = fs::remove_file(file) {
            if e.kind() != ErrorKind::NotFound {
                tracing::warn!("failed to remove stale {}: {}", file.display(), e);
            }
        }
    }
}

fn layout_error(case: &TestCase) -> ProduceError {
    ProduceError::Layout {
        test: case.name.clone(),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::variant::Variant;
    use std::os::unix::fs::PermissionsExt;

    struct Fixture {
        dir: tempfile::TempDir,
        compiler: Compiler,
        codegen: CodegenConfig,
    }

    impl Fixture {
        fn new(script: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("cshantyc");
            fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            Self {
                compiler: Compiler::new(path),
                dir,
                codegen: CodegenConfig::default(),
            }
        }

        fn ctx(&self) -> ProduceContext<'_> {
            ProduceContext {
                compiler: &self.compiler,
                failure_marker: "Error",
                codegen: &self.codegen,
            }
        }

        fn case(&self, variant: Variant) -> TestCase {
            let path = self.dir.path().join("t1.cshanty");
            fs::write(&path, "int main() {}").unwrap();
            TestCase {
                index: 0,
                name: "t1.cshanty".into(),
                truth_path: self.dir.path().join("t1.truth"),
                actual_path: self.dir.path().join("t1.actual"),
                artifacts: (variant.spec().artifacts)(self.dir.path(), "t1"),
                path,
            }
        }
    }

    #[test]
    fn test_check_returns_merged_output() {
        let fx = Fixture::new("echo 'FATAL [1,1]-[1,2]: Undeclared identifier' >&2");
        let record = check(&fx.ctx(), &fx.case(Variant::D5)).unwrap();
        assert_eq!(
            record,
            ActualRecord::Produced("FATAL [1,1]-[1,2]: Undeclared identifier\n".into())
        );
    }

    #[test]
    fn test_tokens_concatenates_files() {
        let fx = Fixture::new("echo 'ID:x' > \"$3\"\necho '1:1 bad char' >&2");
        let record = tokens(&fx.ctx(), &fx.case(Variant::D1)).unwrap();
        assert_eq!(record, ActualRecord::Produced("ID:x\n1:1 bad char\n".into()));
    }

    #[test]
    fn test_missing_side_file_is_absent() {
        let fx = Fixture::new("exit 0");
        let case = fx.case(Variant::D3);
        let record = unparse(&fx.ctx(), &case).unwrap();
        let Artifacts::Unparsed { unparsed } = &case.artifacts else {
            unreachable!()
        };
        assert_eq!(
            record,
            ActualRecord::Absent(AbsentReason::MissingFile(unparsed.clone()))
        );
    }

    #[test]
    fn test_stale_side_file_is_cleared() {
        let fx = Fixture::new("exit 0");
        let case = fx.case(Variant::D6);
        let Artifacts::ThreeAddress { out } = &case.artifacts else {
            unreachable!()
        };
        fs::write(out, "stale").unwrap();
        let record = three_address(&fx.ctx(), &case).unwrap();
        assert!(matches!(
            record,
            ActualRecord::Absent(AbsentReason::MissingFile(_))
        ));
    }

    #[test]
    fn test_failure_marker_is_absent() {
        let fx = Fixture::new("echo 'x' > \"$3\"\necho 'Error: internal compiler error'");
        let record = three_address(&fx.ctx(), &fx.case(Variant::D6)).unwrap();
        assert_eq!(
            record,
            ActualRecord::Absent(AbsentReason::FailureMarker("Error".into()))
        );
    }

    #[test]
    fn test_wrong_layout_is_error() {
        let fx = Fixture::new("exit 0");
        assert!(matches!(
            tokens(&fx.ctx(), &fx.case(Variant::D5)),
            Err(ProduceError::Layout { .. })
        ));
    }

    #[test]
    fn test_codegen_failed_assembly_is_absent() {
        let mut fx = Fixture::new("echo 'garbage' > \"$3\"");
        fx.codegen.assembler = "false".into();
        let record = codegen(&fx.ctx(), &fx.case(Variant::D7)).unwrap();
        assert!(matches!(
            record,
            ActualRecord::Absent(AbsentReason::Toolchain { .. })
        ));
    }

    #[test]
    fn test_codegen_missing_assembler_is_fatal() {
        let mut fx = Fixture::new("echo 'garbage' > \"$3\"");
        fx.codegen.assembler = "/nonexistent/as".into();
        assert!(matches!(
            codegen(&fx.ctx(), &fx.case(Variant::D7)),
            Err(ProduceError::Spawn { .. })
        ));
    }
}
