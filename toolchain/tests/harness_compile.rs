// Integration tests: synthesized harnesses compile, link and run.
//
// The routine definitions come from the fixture sources, including a
// rewritten (calloc-free) one, so these also check that rewriter output
// is still valid C.
// Skipped automatically if no C compiler is found.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};

static COUNTER: AtomicUsize = AtomicUsize::new(0);

fn atlkit_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_atlkit"))
}

fn fixtures() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn find_c_compiler() -> Option<String> {
    for compiler in &["cc", "gcc", "clang"] {
        if Command::new(compiler)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
        {
            return Some(compiler.to_string());
        }
    }
    None
}

fn scratch_dir(tag: &str) -> PathBuf {
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!(
        "atlkit_compile_{}_{}_{}",
        tag,
        std::process::id(),
        n
    ));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// `atlkit wrap blurtwo 4 5 @v20.json --run` against `definition`.
fn run_blurtwo(cc: &str, dir: &Path, definition: &Path) -> String {
    let harness = dir.join("wrapper_blurtwo.c");
    let data = format!("@{}", fixtures().join("data/v20.json").display());
    let lib = fixtures().join("lib");
    let out = Command::new(atlkit_binary())
        .args([
            "wrap",
            "blurtwo",
            "4",
            "5",
            &data,
            "--output-size",
            "20",
            "--lib-dir",
            lib.to_str().unwrap(),
            "-o",
            harness.to_str().unwrap(),
            "--run",
            "--cc",
            cc,
            "--archive",
            definition.to_str().unwrap(),
        ])
        .output()
        .expect("failed to run atlkit");
    assert!(
        out.status.success(),
        "atlkit wrap --run failed\nstderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8(out.stdout).expect("non-UTF8 output")
}

#[test]
fn harness_runs_against_reference_definition() {
    let Some(cc) = find_c_compiler() else {
        eprintln!("SKIP: no C compiler found");
        return;
    };
    let dir = scratch_dir("reference");
    let stdout = run_blurtwo(&cc, &dir, &fixtures().join("lib/blurtwo_impl.c"));

    let lines: Vec<&str> = stdout.lines().filter(|l| !l.trim().is_empty()).collect();
    assert_eq!(lines.len(), 2, "stdout:\n{}", stdout);
    assert!(
        lines[0].starts_with("0.000000 0.500000 1.500000 2.500000 "),
        "stdout:\n{}",
        stdout
    );
    assert_eq!(lines[0].split_whitespace().count(), 10);
    assert!(dir.join("wrapper_blurtwo").exists());
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn rewritten_definition_behaves_like_original() {
    let Some(cc) = find_c_compiler() else {
        eprintln!("SKIP: no C compiler found");
        return;
    };
    let dir = scratch_dir("rewritten");
    let original = dir.join("blurtwo.c");
    std::fs::copy(fixtures().join("gen/blurtwo.c"), &original).unwrap();

    let rewrite = Command::new(atlkit_binary())
        .args(["vla", original.to_str().unwrap(), "--simplify"])
        .output()
        .unwrap();
    assert!(
        rewrite.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&rewrite.stderr)
    );
    let rewritten = dir.join("blurtwo.vla.c");
    assert!(!std::fs::read_to_string(&rewritten).unwrap().contains("calloc"));

    let before = run_blurtwo(&cc, &dir, &original);
    let after = run_blurtwo(&cc, &dir, &rewritten);
    assert_eq!(before, after);
    assert!(after.starts_with("0.000000 0.500000 1.000000 1.500000 "));
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn compiler_failure_is_reported() {
    let Some(cc) = find_c_compiler() else {
        eprintln!("SKIP: no C compiler found");
        return;
    };
    let dir = scratch_dir("broken");
    // Declares the routine but never defines it: the link step fails.
    let data = format!("@{}", fixtures().join("data/v20.json").display());
    let out = Command::new(atlkit_binary())
        .args([
            "wrap",
            "blurtwo",
            "4",
            "5",
            &data,
            "--output-size",
            "20",
            "--lib-dir",
            fixtures().join("lib").to_str().unwrap(),
            "-o",
            dir.join("h.c").to_str().unwrap(),
            "--compile",
            "--cc",
            &cc,
        ])
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("error[E0401]"));
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn nested_header_harness_compiles() {
    let Some(cc) = find_c_compiler() else {
        eprintln!("SKIP: no C compiler found");
        return;
    };
    let dir = scratch_dir("nested");
    let nested = fixtures().join("nested");
    let data = format!("@{}", fixtures().join("data/four.json").display());
    let out = Command::new(atlkit_binary())
        .args([
            "wrap",
            "negate",
            &data,
            "4",
            "--output-size",
            "4",
            "--lib-dir",
            nested.to_str().unwrap(),
            "--recursive",
            "-o",
            dir.join("wrapper_negate.c").to_str().unwrap(),
            "--run",
            "--cc",
            &cc,
            "--archive",
            nested.join("ops/negate.c").to_str().unwrap(),
        ])
        .output()
        .unwrap();
    assert!(
        out.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    let stdout = String::from_utf8(out.stdout).unwrap();
    assert_eq!(stdout.trim_end(), "-1.000000 2.500000 -3.000000 -0.000000");
    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn inlined_harness_matches_called_harness() {
    let Some(cc) = find_c_compiler() else {
        eprintln!("SKIP: no C compiler found");
        return;
    };
    let dir = scratch_dir("inline");
    let lib = dir.join("lib");
    std::fs::create_dir_all(&lib).unwrap();
    std::fs::copy(fixtures().join("lib/blurtwo.h"), lib.join("blurtwo.h")).unwrap();
    std::fs::copy(fixtures().join("gen/blurtwo.c"), lib.join("blurtwo.c")).unwrap();
    let data = format!("@{}", fixtures().join("data/v20.json").display());

    let run = |harness: &str, extra: &[&str]| {
        let harness = dir.join(harness);
        let mut args = vec![
            "wrap",
            "blurtwo",
            "4",
            "5",
            &data,
            "--output-size",
            "20",
            "--lib-dir",
            lib.to_str().unwrap(),
            "-o",
            harness.to_str().unwrap(),
            "--run",
            "--cc",
            &cc,
        ];
        args.extend_from_slice(extra);
        let out = Command::new(atlkit_binary()).args(&args).output().unwrap();
        assert!(
            out.status.success(),
            "stderr: {}",
            String::from_utf8_lossy(&out.stderr)
        );
        String::from_utf8(out.stdout).unwrap()
    };

    let archive = lib.join("blurtwo.c");
    let called = run("called.c", &["--archive", archive.to_str().unwrap()]);
    let inlined = run("inlined.c", &["--inline"]);
    assert_eq!(called, inlined);
    assert!(inlined.starts_with("0.000000 0.500000 1.000000 1.500000 "));

    let text = std::fs::read_to_string(dir.join("inlined.c")).unwrap();
    assert!(text.contains("calloc((4 * 5) - (0), sizeof(float))"), "{}", text);
    assert!(!text.contains("blurtwo(v, 4, 5, output);"));
    std::fs::remove_dir_all(&dir).ok();
}
