// harness.rs — C test-harness generation
//
// Turns a validated binding into a self-contained C program: input arrays
// and the output array live on the stack of `main`, the routine is called
// once with arguments in declaration order (or its specialized body is
// pasted in place of the call), and every output element is printed.
//
// Preconditions: the binding came from `bind::bind` (counts validated,
//                output parameter resolved, every buffer non-empty).
// Postconditions: output is a pure function of the binding (and inlined
//                 body); the harness itself allocates nothing on the heap.
// Failure modes: none.
// Side effects: none.

use std::fmt::Write as _;
use std::path::PathBuf;

use crate::bind::{Binding, BoundValue};

/// Initializer values per line.
const VALUES_PER_LINE: usize = 10;
/// Output elements printed per line.
const PRINT_PER_LINE: usize = 10;

/// Default file name for the harness of `function`.
pub fn default_file_name(function: &str) -> PathBuf {
    PathBuf::from(format!("wrapper_{}.c", function))
}

/// Generate harness program text for `binding`.
pub fn synthesize(binding: &Binding) -> String {
    let mut ctx = HarnessCtx {
        binding,
        inlined: None,
        out: String::new(),
    };
    ctx.emit_all();
    ctx.out
}

/// Like `synthesize`, but `body` (see `inline::specialize`) replaces the
/// call. The routine's header is not included.
pub fn synthesize_inlined(binding: &Binding, body: &str) -> String {
    let mut ctx = HarnessCtx {
        binding,
        inlined: Some(body),
        out: String::new(),
    };
    ctx.emit_all();
    ctx.out
}

/// Format one initializer value.
pub fn format_value(v: f64) -> String {
    format!("{:.6}", v)
}

// ── Internal context ────────────────────────────────────────────────────────

struct HarnessCtx<'a> {
    binding: &'a Binding,
    inlined: Option<&'a str>,
    out: String,
}

impl HarnessCtx<'_> {
    fn emit_all(&mut self) {
        self.emit_preamble();
        self.out.push_str("int main(void) {\n");
        self.emit_inputs();
        self.emit_output();
        match self.inlined {
            Some(body) => self.emit_inlined_body(body),
            None => self.emit_call(),
        }
        self.emit_print();
        self.out.push_str("    return 0;\n");
        self.out.push_str("}\n");
    }

    // ── Preamble ────────────────────────────────────────────────────────

    fn emit_preamble(&mut self) {
        let decl = &self.binding.declaration;
        let _ = writeln!(self.out, "// Generated by atlkit: harness for {}", decl.name);
        let _ = writeln!(self.out, "// {}", decl);
        let _ = writeln!(self.out, "// declaration sha256: {}", decl.fingerprint());
        if self.inlined.is_some() {
            // The body may still allocate.
            self.out.push_str("#include <stdlib.h>\n");
        } else {
            let header = decl
                .header_name()
                .replace('\\', "\\\\")
                .replace('"', "\\\"");
            let _ = writeln!(self.out, "#include \"{}\"", header);
        }
        self.out.push_str("#include <stdio.h>\n");
        self.out.push('\n');
    }

    // ── Storage ─────────────────────────────────────────────────────────

    fn emit_inputs(&mut self) {
        for (param, value) in self.binding.inputs() {
            let BoundValue::Buffer(buffer) = value else {
                continue;
            };
            let _ = writeln!(self.out, "    float {}[{}] = {{", param.name, buffer.len());
            let chunks: Vec<&[f64]> = buffer.values().chunks(VALUES_PER_LINE).collect();
            for (i, chunk) in chunks.iter().enumerate() {
                let line: Vec<String> = chunk.iter().map(|&v| format_value(v)).collect();
                let sep = if i + 1 < chunks.len() { "," } else { "" };
                let _ = writeln!(self.out, "        {}{}", line.join(", "), sep);
            }
            self.out.push_str("    };\n");
        }
    }

    fn emit_output(&mut self) {
        let _ = writeln!(
            self.out,
            "    float {}[{}] = {{0}};",
            self.binding.output_param().name,
            self.binding.output_size
        );
        self.out.push('\n');
    }

    // ── Call ────────────────────────────────────────────────────────────

    fn emit_call(&mut self) {
        let mut values = self.binding.values.iter();
        let args: Vec<String> = self
            .binding
            .declaration
            .params
            .iter()
            .map(|p| {
                if p.is_output {
                    return p.name.clone();
                }
                match values.next() {
                    Some(BoundValue::Scalar(n)) => n.to_string(),
                    _ => p.name.clone(),
                }
            })
            .collect();
        let _ = writeln!(
            self.out,
            "    {}({});",
            self.binding.declaration.name,
            args.join(", ")
        );
        self.out.push('\n');
    }

    /// The specialized body in its own block, re-indented under `main`.
    fn emit_inlined_body(&mut self, body: &str) {
        let bound: Vec<String> = self
            .binding
            .inputs()
            .filter_map(|(p, v)| match v {
                BoundValue::Scalar(n) => Some(format!("{} = {}", p.name, n)),
                BoundValue::Buffer(_) => None,
            })
            .collect();
        if bound.is_empty() {
            let _ = writeln!(self.out, "    // {}, inlined", self.binding.declaration.name);
        } else {
            let _ = writeln!(
                self.out,
                "    // {}, inlined for {}",
                self.binding.declaration.name,
                bound.join(", ")
            );
        }

        let lines: Vec<&str> = body.lines().map(str::trim_end).collect();
        let first = lines.iter().position(|l| !l.is_empty()).unwrap_or(lines.len());
        let last = lines.iter().rposition(|l| !l.is_empty()).map_or(first, |i| i + 1);
        let lines = &lines[first..last];
        let indent = lines
            .iter()
            .filter(|l| !l.is_empty())
            .map(|l| l.len() - l.trim_start().len())
            .min()
            .unwrap_or(0);

        self.out.push_str("    {\n");
        for line in lines {
            if line.is_empty() {
                self.out.push('\n');
            } else {
                let _ = writeln!(self.out, "        {}", &line[indent..]);
            }
        }
        self.out.push_str("    }\n");
        self.out.push('\n');
    }

    // ── Output ──────────────────────────────────────────────────────────

    fn emit_print(&mut self) {
        let output = &self.binding.output_param().name;
        let i = self.loop_var();
        let _ = writeln!(
            self.out,
            "    for (int {i} = 0; {i} < {}; {i}++) {{",
            self.binding.output_size
        );
        let _ = writeln!(self.out, "        printf(\"%f \", {}[{i}]);", output);
        let _ = writeln!(
            self.out,
            "        if (({i} + 1) % {} == 0) printf(\"\\n\");",
            PRINT_PER_LINE
        );
        self.out.push_str("    }\n");
        self.out.push_str("    printf(\"\\n\");\n");
        self.out.push('\n');
    }

    /// `i`, with underscores appended until no parameter shares the name.
    fn loop_var(&self) -> String {
        let params = &self.binding.declaration.params;
        let mut name = String::from("i");
        while params.iter().any(|p| p.name == name) {
            name.push('_');
        }
        name
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bind::bind_with;
    use crate::decl::OutputRule;
    use crate::loader::NumericBuffer;
    use crate::registry::Registry;
    use std::path::Path;

    fn binding(proto: &str, args: &[&str], size: i64, data: Vec<f64>) -> Binding {
        let mut reg = Registry::new();
        reg.load_source(proto, Path::new("lib/kernel.h"), OutputRule::Strict);
        let decl = reg.declarations().next().expect("no declaration").clone();
        bind_with(&decl, args, Some(size), |_: &Path| {
            Ok(NumericBuffer::from_values(data.clone()))
        })
        .expect("bind failed")
    }

    #[test]
    fn call_uses_declaration_order() {
        let b = binding(
            "void blurtwo(float* v, int M, int N, float* output);",
            &["4", "5", "@v.json"],
            20,
            (0..20).map(f64::from).collect(),
        );
        let c = synthesize(&b);
        assert!(c.contains("    blurtwo(v, 4, 5, output);\n"), "got:\n{}", c);
        assert!(c.contains("    float v[20] = {\n"));
        assert!(c.contains("    float output[20] = {0};\n"));
        assert!(c.contains("#include \"kernel.h\"\n"));
        assert!(!c.contains("calloc") && !c.contains("malloc"));
    }

    #[test]
    fn initializer_wraps_at_ten_values() {
        let b = binding(
            "void k(float* x, float* out);",
            &["@x.json"],
            1,
            (0..12).map(|i| i as f64 * 0.5).collect(),
        );
        let c = synthesize(&b);
        assert!(c.contains(
            "        0.000000, 0.500000, 1.000000, 1.500000, 2.000000, 2.500000, 3.000000, 3.500000, 4.000000, 4.500000,\n        5.000000, 5.500000\n    };\n"
        ), "got:\n{}", c);
    }

    #[test]
    fn output_array_takes_parameter_name() {
        let b = binding("void k(int n, float* out);", &["3"], 5, vec![]);
        let c = synthesize(&b);
        assert!(c.contains("    float out[5] = {0};\n"));
        assert!(c.contains("    k(3, out);\n"));
        assert!(c.contains("printf(\"%f \", out[i]);"));
    }

    #[test]
    fn loop_variable_avoids_parameter_names() {
        let b = binding("void k(int i, float* i_);", &["3"], 4, vec![]);
        let c = synthesize(&b);
        assert!(c.contains("    float i_[4] = {0};\n"), "got:\n{}", c);
        assert!(c.contains("    for (int i__ = 0; i__ < 4; i__++) {\n"), "got:\n{}", c);
        assert!(c.contains("printf(\"%f \", i_[i__]);"));
    }

    #[test]
    fn full_program_text() {
        let b = binding(
            "void scale(float* x, int n, float* output);",
            &["2", "@x.json"],
            2,
            vec![1.0, -2.25],
        );
        let c = synthesize(&b);
        let body = &c[c.find("int main").unwrap()..];
        insta::assert_snapshot!(body, @r#"
        int main(void) {
            float x[2] = {
                1.000000, -2.250000
            };
            float output[2] = {0};

            scale(x, 2, output);

            for (int i = 0; i < 2; i++) {
                printf("%f ", output[i]);
                if ((i + 1) % 10 == 0) printf("\n");
            }
            printf("\n");

            return 0;
        }
        "#);
    }

    #[test]
    fn inlined_body_replaces_call() {
        let b = binding(
            "void scale(float* x, int n, float* output);",
            &["@x.json", "2"],
            2,
            vec![1.0, -2.25],
        );
        let body = "\n    for (int i = 0; i < 2; i++) {\n        output[i] = x[i] * 2;\n    }\n";
        let c = synthesize_inlined(&b, body);
        assert!(!c.contains("scale(x, 2, output);"));
        assert!(!c.contains("#include \"kernel.h\""));
        assert!(c.contains("#include <stdlib.h>\n#include <stdio.h>\n"));
        let main = &c[c.find("int main").unwrap()..];
        insta::assert_snapshot!(main, @r#"
        int main(void) {
            float x[2] = {
                1.000000, -2.250000
            };
            float output[2] = {0};

            // scale, inlined for n = 2
            {
                for (int i = 0; i < 2; i++) {
                    output[i] = x[i] * 2;
                }
            }

            for (int i = 0; i < 2; i++) {
                printf("%f ", output[i]);
                if ((i + 1) % 10 == 0) printf("\n");
            }
            printf("\n");

            return 0;
        }
        "#);
    }

    #[test]
    fn deterministic() {
        let make = || {
            binding(
                "void k(float* a, int n, float* b, float* output);",
                &["@a.json", "7", "@b.json"],
                9,
                vec![0.1, 0.2, 0.3],
            )
        };
        assert_eq!(synthesize(&make()), synthesize(&make()));
    }

    #[test]
    fn default_file_name_from_function() {
        assert_eq!(default_file_name("blurtwo"), PathBuf::from("wrapper_blurtwo.c"));
    }
}
