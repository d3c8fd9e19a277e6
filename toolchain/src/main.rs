use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use atlkit::decl::OutputRule;
use atlkit::pipeline::{self, BuildStep, PipelineError, RewriteMode, RewriteOptions, WrapOptions};
use atlkit::registry::RegistryOptions;

#[derive(Parser, Debug)]
#[command(
    name = "atlkit",
    version,
    about = "Companion tools for generated array routines: test harnesses and calloc-to-VLA rewriting"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Print progress and debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a C harness that calls one routine with the given data
    Wrap(WrapArgs),
    /// Replace calloc/free pairs with stack arrays
    Vla(VlaArgs),
}

#[derive(Args, Debug)]
struct WrapArgs {
    /// Routine to call
    #[arg(required_unless_present = "list")]
    function: Option<String>,

    /// Routine arguments: int numerals and @file.json arrays
    #[arg(allow_negative_numbers = true)]
    args: Vec<String>,

    /// Number of output elements
    #[arg(long, allow_negative_numbers = true)]
    output_size: Option<i64>,

    /// Directory holding the routine headers
    #[arg(long, default_value = ".")]
    lib_dir: PathBuf,

    /// Harness file path [default: wrapper_<function>.c]
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Compile the harness after writing it
    #[arg(long, conflicts_with = "run")]
    compile: bool,

    /// Compile and run the harness, printing its output
    #[arg(long)]
    run: bool,

    /// C compiler command
    #[arg(long, default_value = "cc")]
    cc: String,

    /// Static library to link the harness against
    #[arg(long)]
    archive: Option<PathBuf>,

    /// Paste the routine's body, specialized to the int arguments, into the
    /// harness instead of calling it (reads <fn>.c next to its header)
    #[arg(long)]
    inline: bool,

    /// How to pick the output parameter when name and position disagree
    #[arg(long, value_enum, default_value_t = OutputRule::Strict)]
    output_rule: OutputRule,

    /// Scan --lib-dir recursively
    #[arg(long)]
    recursive: bool,

    /// List the declarations found in --lib-dir and exit
    #[arg(long)]
    list: bool,
}

#[derive(Args, Debug)]
struct VlaArgs {
    /// C file, or directory of C files
    path: PathBuf,

    /// Rewrite files in place
    #[arg(long, conflicts_with_all = ["output", "dry_run"])]
    in_place: bool,

    /// Output file (single input file only) [default: <stem>.vla.c]
    #[arg(short, long, conflicts_with = "dry_run")]
    output: Option<PathBuf>,

    /// Report what would change without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Descend into subdirectories
    #[arg(long)]
    recursive: bool,

    /// Simplify rewritten size expressions
    #[arg(long)]
    simplify: bool,

    /// Print rewritten text to stdout
    #[arg(long)]
    print: bool,
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_target(false)
        .format_timestamp(None)
        .init();

    let code = match cli.command {
        Commands::Wrap(args) => wrap(args, cli.verbose),
        Commands::Vla(args) => vla(args, cli.verbose),
    };
    std::process::exit(code);
}

fn fail(err: &PipelineError) -> i32 {
    eprintln!("atlkit: {}", err.to_diagnostic());
    err.exit_code()
}

// ── wrap ──

fn wrap(args: WrapArgs, verbose: bool) -> i32 {
    let registry = RegistryOptions {
        recursive: args.recursive,
        output_rule: args.output_rule,
        ..RegistryOptions::default()
    };

    if args.list {
        let reg = match pipeline::load_registry(&args.lib_dir, &registry) {
            Ok(r) => r,
            Err(e) => return fail(&e),
        };
        for decl in reg.declarations() {
            println!("{}", decl);
        }
        if verbose {
            eprintln!("atlkit: registry sha256 {}", reg.fingerprint());
        }
        return 0;
    }

    let Some(function) = args.function else {
        eprintln!("atlkit: error: no function named");
        return 2;
    };

    let mut options = WrapOptions::new(function);
    options.args = args.args;
    options.output_size = args.output_size;
    options.lib_dir = args.lib_dir;
    options.output = args.output;
    options.registry = registry;
    options.cc = args.cc;
    options.archive = args.archive;
    options.inline = args.inline;
    options.build = if args.run {
        BuildStep::Run
    } else if args.compile {
        BuildStep::Compile
    } else {
        BuildStep::None
    };

    if verbose {
        eprintln!("atlkit: function = {}", options.function);
        eprintln!("atlkit: lib-dir  = {}", options.lib_dir.display());
        eprintln!("atlkit: output   = {}", options.harness_path().display());
    }

    let report = match pipeline::run_wrap(&options) {
        Ok(r) => r,
        Err(e) => return fail(&e),
    };

    if verbose {
        eprintln!(
            "atlkit: {} declaration(s), registry sha256 {}",
            report.declarations, report.registry_fingerprint
        );
    }
    eprintln!("atlkit: wrote {}", report.harness_path.display());
    if let Some(exe) = &report.executable {
        eprintln!("atlkit: built {}", exe.display());
    }
    if let Some(out) = &report.run_output {
        print!("{}", out);
    }
    0
}

// ── vla ──

fn vla(args: VlaArgs, verbose: bool) -> i32 {
    let mode = if args.in_place {
        RewriteMode::InPlace
    } else if args.dry_run {
        RewriteMode::Preview
    } else if let Some(out) = args.output {
        RewriteMode::Output(out)
    } else {
        RewriteMode::Sibling
    };
    let options = RewriteOptions {
        mode,
        recursive: args.recursive,
        simplify: args.simplify,
        keep_text: args.print,
    };

    let report = match pipeline::run_rewrite(&args.path, &options) {
        Ok(r) => r,
        Err(e) => return fail(&e),
    };

    for diag in &report.diagnostics {
        eprintln!("atlkit: {}", diag);
    }
    for file in &report.files {
        if let Some(text) = &file.text {
            print!("{}", text);
        }
        if verbose || file.rewrite_count > 0 {
            match &file.written {
                Some(target) if *target != file.path => eprintln!(
                    "atlkit: {}: {} rewrite(s) -> {}",
                    file.path.display(),
                    file.rewrite_count,
                    target.display()
                ),
                _ => eprintln!(
                    "atlkit: {}: {} rewrite(s)",
                    file.path.display(),
                    file.rewrite_count
                ),
            }
        }
    }
    eprintln!(
        "atlkit: {} rewrite(s) in {} file(s)",
        report.total_rewrites(),
        report.files.len()
    );

    if report.failed > 0 {
        1
    } else {
        0
    }
}
