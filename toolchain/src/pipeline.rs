// pipeline.rs — Wrap and rewrite drivers
//
// Orchestrates the library components for the two CLI subcommands.
// `run_wrap`: registry → bind → [inline] → synthesize → write → optional
//             compile/run.
// `run_rewrite`: discover → per-file rewrite → write according to mode.
//
// Preconditions: none beyond the option structs.
// Postconditions: a harness file is either fully written or not written;
//                 every rewritten file is written atomically.
// Failure modes: see `PipelineError`. Per-file rewrite failures do not stop
//                the batch; they are collected into `RewriteReport`.
// Side effects: filesystem reads and writes; spawns the C compiler and the
//               compiled harness when asked to.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use crate::bind::{self, BindError};
use crate::decl::Declaration;
use crate::diag::{codes, DiagCode, Diagnostic};
use crate::files::{self, FileError};
use crate::harness;
use crate::inline::{self, InlineError};
use crate::loader::LoadError;
use crate::registry::{self, Registry, RegistryError, RegistryOptions};
use crate::rewrite::Rewriter;

// ── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum PipelineError {
    Registry(RegistryError),
    Bind(BindError),
    File(FileError),
    Inline(InlineError),
    /// `-o` given with a directory input.
    OutputNeedsSingleFile { path: PathBuf },
    /// The C compiler or the compiled harness failed.
    Toolchain { command: String, detail: String },
}

impl PipelineError {
    pub fn code(&self) -> DiagCode {
        match self {
            PipelineError::Registry(e) => e.code(),
            PipelineError::Bind(e) => e.code(),
            PipelineError::Inline(e) => e.code(),
            PipelineError::File(_) | PipelineError::OutputNeedsSingleFile { .. } => codes::E0002,
            PipelineError::Toolchain { .. } => codes::E0401,
        }
    }

    /// 2 for I/O and configuration failures, 1 for everything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Registry(_)
            | PipelineError::File(_)
            | PipelineError::OutputNeedsSingleFile { .. }
            | PipelineError::Bind(BindError::Load {
                source: LoadError::File(_),
                ..
            }) => 2,
            _ => 1,
        }
    }

    pub fn to_diagnostic(&self) -> Diagnostic {
        let diag = Diagnostic::error(self.code(), self.to_string());
        let hint = match self {
            PipelineError::Bind(e) => e.hint(),
            PipelineError::Registry(RegistryError::NoDeclarations { .. }) => {
                Some("point --lib-dir at the directory holding the generated headers".to_string())
            }
            PipelineError::Inline(_) => Some("drop --inline to call the routine instead".to_string()),
            _ => None,
        };
        match hint {
            Some(h) => diag.with_hint(h),
            None => diag,
        }
    }
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Registry(e) => write!(f, "{}", e),
            PipelineError::Bind(e) => write!(f, "{}", e),
            PipelineError::File(e) => write!(f, "{}", e),
            PipelineError::Inline(e) => write!(f, "{}", e),
            PipelineError::OutputNeedsSingleFile { path } => write!(
                f,
                "-o needs a single input file, but {} is a directory",
                path.display()
            ),
            PipelineError::Toolchain { command, detail } => {
                write!(f, "`{}` failed: {}", command, detail)
            }
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::Registry(e) => Some(e),
            PipelineError::Bind(e) => Some(e),
            PipelineError::File(e) => Some(e),
            PipelineError::Inline(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RegistryError> for PipelineError {
    fn from(e: RegistryError) -> Self {
        PipelineError::Registry(e)
    }
}

impl From<BindError> for PipelineError {
    fn from(e: BindError) -> Self {
        PipelineError::Bind(e)
    }
}

impl From<FileError> for PipelineError {
    fn from(e: FileError) -> Self {
        PipelineError::File(e)
    }
}

impl From<InlineError> for PipelineError {
    fn from(e: InlineError) -> Self {
        PipelineError::Inline(e)
    }
}

// ── Wrap ────────────────────────────────────────────────────────────────────

/// What to do with the harness after writing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildStep {
    #[default]
    None,
    Compile,
    /// Compile, then execute and capture stdout.
    Run,
}

#[derive(Debug, Clone)]
pub struct WrapOptions {
    pub function: String,
    pub args: Vec<String>,
    pub output_size: Option<i64>,
    pub lib_dir: PathBuf,
    /// Harness path; defaults to `wrapper_<function>.c`.
    pub output: Option<PathBuf>,
    pub registry: RegistryOptions,
    pub build: BuildStep,
    pub cc: String,
    /// Static library holding the routine's definition.
    pub archive: Option<PathBuf>,
    /// Paste the routine's specialized body into `main` instead of calling
    /// it. The definition is read from `<fn>.c` next to its header.
    pub inline: bool,
}

impl WrapOptions {
    pub fn new(function: impl Into<String>) -> Self {
        WrapOptions {
            function: function.into(),
            args: Vec::new(),
            output_size: None,
            lib_dir: PathBuf::from("."),
            output: None,
            registry: RegistryOptions::default(),
            build: BuildStep::None,
            cc: "cc".to_string(),
            archive: None,
            inline: false,
        }
    }

    pub fn harness_path(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| harness::default_file_name(&self.function))
    }
}

#[derive(Debug)]
pub struct WrapReport {
    pub harness_path: PathBuf,
    pub registry_fingerprint: String,
    pub declarations: usize,
    pub executable: Option<PathBuf>,
    /// Harness stdout, when run.
    pub run_output: Option<String>,
}

/// Build the registry for `lib_dir`, refusing an empty one.
pub fn load_registry(lib_dir: &Path, options: &RegistryOptions) -> Result<Registry, PipelineError> {
    let t = Instant::now();
    let registry = registry::produce_registry(lib_dir, options)?;
    if registry.is_empty() {
        return Err(RegistryError::NoDeclarations {
            dir: lib_dir.to_path_buf(),
            files_scanned: registry.files_scanned(),
        }
        .into());
    }
    log::debug!(
        "registry: {} declaration(s) from {} file(s), {:.1}ms, sha256 {}",
        registry.len(),
        registry.files_scanned(),
        t.elapsed().as_secs_f64() * 1000.0,
        registry.fingerprint()
    );
    Ok(registry)
}

pub fn run_wrap(options: &WrapOptions) -> Result<WrapReport, PipelineError> {
    let registry = load_registry(&options.lib_dir, &options.registry)?;
    let binding = bind::lookup_and_bind(
        &registry,
        &options.function,
        options.args.as_slice(),
        options.output_size,
    )?;

    let text = if options.inline {
        let definition = definition_path(&binding.declaration, &options.lib_dir);
        let source = files::read_to_string(&definition)?;
        let body = inline::extract_body(&source, &binding.declaration.name)?;
        let scalars: Vec<(&str, i32)> = binding
            .inputs()
            .filter_map(|(p, v)| match v {
                bind::BoundValue::Scalar(n) => Some((p.name.as_str(), *n)),
                bind::BoundValue::Buffer(_) => None,
            })
            .collect();
        let body = inline::specialize(body, &binding.declaration.name, &scalars)?;
        log::debug!("inlining {} from {}", binding.declaration.name, definition.display());
        harness::synthesize_inlined(&binding, &body)
    } else {
        harness::synthesize(&binding)
    };
    let harness_path = options.harness_path();
    files::write_atomic(&harness_path, &text)?;
    log::debug!(
        "wrote {} ({} scalar(s), {} array(s), output '{}'[{}])",
        harness_path.display(),
        binding.scalar_count(),
        binding.buffer_count(),
        binding.output_param().name,
        binding.output_size
    );

    let mut report = WrapReport {
        harness_path,
        registry_fingerprint: registry.fingerprint(),
        declarations: registry.len(),
        executable: None,
        run_output: None,
    };
    if options.build == BuildStep::None {
        return Ok(report);
    }

    let exe = compile_harness(&report.harness_path, options)?;
    if options.build == BuildStep::Run {
        report.run_output = Some(run_executable(&exe)?);
    }
    report.executable = Some(exe);
    Ok(report)
}

/// `<fn>.c` in the directory of the routine's header.
pub fn definition_path(decl: &Declaration, lib_dir: &Path) -> PathBuf {
    let dir = decl
        .source
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(lib_dir);
    dir.join(format!("{}.c", decl.name))
}

/// `<cc> -I<lib-dir> <harness> [<archive>] -o <stem> -lm`
pub fn compile_command(harness_path: &Path, options: &WrapOptions) -> (Command, PathBuf) {
    let exe = harness_path.with_extension("");
    let mut cmd = Command::new(&options.cc);
    cmd.arg(format!("-I{}", options.lib_dir.display()))
        .arg(harness_path);
    if let Some(archive) = &options.archive {
        cmd.arg(archive);
    }
    cmd.arg("-o").arg(&exe).arg("-lm");
    (cmd, exe)
}

fn compile_harness(harness_path: &Path, options: &WrapOptions) -> Result<PathBuf, PipelineError> {
    let (mut cmd, exe) = compile_command(harness_path, options);
    let t = Instant::now();
    run_checked(&mut cmd)?;
    log::debug!(
        "compiled {} in {:.1}ms",
        exe.display(),
        t.elapsed().as_secs_f64() * 1000.0
    );
    Ok(exe)
}

fn run_executable(exe: &Path) -> Result<String, PipelineError> {
    // A bare file name would be looked up on PATH.
    let exe = if exe.components().count() == 1 {
        Path::new(".").join(exe)
    } else {
        exe.to_path_buf()
    };
    run_checked(&mut Command::new(&exe))
}

/// Run `cmd` to completion; non-zero exit is an error carrying stderr.
fn run_checked(cmd: &mut Command) -> Result<String, PipelineError> {
    let rendered = render_command(cmd);
    log::debug!("running `{}`", rendered);
    let output = cmd.output().map_err(|e| PipelineError::Toolchain {
        command: rendered.clone(),
        detail: e.to_string(),
    })?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = match stderr.trim() {
            "" => output.status.to_string(),
            s => s.to_string(),
        };
        return Err(PipelineError::Toolchain {
            command: rendered,
            detail,
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

fn render_command(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(cmd.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

// ── Rewrite ─────────────────────────────────────────────────────────────────

/// Suffix of rewriter outputs; such files are skipped in directory mode.
pub const VLA_SUFFIX: &str = ".vla.c";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RewriteMode {
    /// Write `<stem>.vla.c` next to each input.
    #[default]
    Sibling,
    InPlace,
    /// Write to this path (single input file only).
    Output(PathBuf),
    /// Report only.
    Preview,
}

#[derive(Debug, Clone, Default)]
pub struct RewriteOptions {
    pub mode: RewriteMode,
    pub recursive: bool,
    pub simplify: bool,
    /// Keep rewritten text in the report for printing.
    pub keep_text: bool,
}

#[derive(Debug)]
pub struct FileReport {
    pub path: PathBuf,
    pub written: Option<PathBuf>,
    pub rewrite_count: usize,
    pub unpaired: usize,
    pub text: Option<String>,
}

#[derive(Debug, Default)]
pub struct RewriteReport {
    pub files: Vec<FileReport>,
    /// Warnings and per-file errors, in file order.
    pub diagnostics: Vec<Diagnostic>,
    pub failed: usize,
}

impl RewriteReport {
    pub fn total_rewrites(&self) -> usize {
        self.files.iter().map(|f| f.rewrite_count).sum()
    }
}

/// Sibling output path: `dir/kernel.c` → `dir/kernel.vla.c`.
pub fn sibling_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}{}", stem, VLA_SUFFIX))
}

fn is_vla_output(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(VLA_SUFFIX))
}

pub fn run_rewrite(input: &Path, options: &RewriteOptions) -> Result<RewriteReport, PipelineError> {
    let is_dir = input.is_dir();
    if is_dir && matches!(options.mode, RewriteMode::Output(_)) {
        return Err(PipelineError::OutputNeedsSingleFile {
            path: input.to_path_buf(),
        });
    }

    let mut sources = files::discover(input, &["c"], options.recursive)?;
    if is_dir {
        sources.retain(|p| !is_vla_output(p));
    }
    log::debug!("rewriting {} file(s) under {}", sources.len(), input.display());

    let rewriter = Rewriter::new().simplify(options.simplify);
    let mut report = RewriteReport::default();
    for path in sources {
        match rewrite_file(&path, &rewriter, options) {
            Ok((file, warnings)) => {
                report.diagnostics.extend(warnings);
                report.files.push(file);
            }
            Err(diag) => {
                report.failed += 1;
                report.diagnostics.push(diag);
            }
        }
    }
    Ok(report)
}

fn rewrite_file(
    path: &Path,
    rewriter: &Rewriter,
    options: &RewriteOptions,
) -> Result<(FileReport, Vec<Diagnostic>), Diagnostic> {
    let file_diag = |e: FileError| Diagnostic::error(codes::E0002, e.to_string());

    let source = files::read_to_string(path).map_err(file_diag)?;
    let outcome = rewriter.rewrite(&source).map_err(|e| {
        Diagnostic::error(e.code(), e.message.clone()).with_location(path, Some(e.line))
    })?;
    let mut warnings: Vec<Diagnostic> = outcome
        .unpaired
        .iter()
        .map(|u| u.to_diagnostic(path))
        .collect();
    warnings.extend(
        outcome
            .sites
            .iter()
            .filter_map(|s| s.complex_size_diagnostic(path)),
    );

    let target = match &options.mode {
        RewriteMode::Preview => None,
        RewriteMode::InPlace if outcome.is_unchanged() => None,
        RewriteMode::InPlace => Some(path.to_path_buf()),
        RewriteMode::Sibling => Some(sibling_path(path)),
        RewriteMode::Output(out) => Some(out.clone()),
    };
    if let Some(target) = &target {
        files::write_atomic(target, &outcome.text).map_err(file_diag)?;
    }
    log::debug!(
        "{}: {} rewrite(s), {} unpaired",
        path.display(),
        outcome.rewrite_count,
        outcome.unpaired.len()
    );

    let file = FileReport {
        path: path.to_path_buf(),
        written: target,
        rewrite_count: outcome.rewrite_count,
        unpaired: outcome.unpaired.len(),
        text: options.keep_text.then_some(outcome.text),
    };
    Ok((file, warnings))
}

// ── Tests ───────────────────────────────────────────────────────────────────
