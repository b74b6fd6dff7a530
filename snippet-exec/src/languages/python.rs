use regex::Regex;
use std::ffi::OsString;
use std::path::Path;
use std::sync::OnceLock;

use crate::{
    executor::GuestLanguage,
    languages::{dedent, ToolCheck},
    types::HarnessMode,
};

/// Name of the function the test body is wrapped into.
const TEST_ENTRY: &str = "_snippet_test_entry";

/// Module-level test runner appended in `run-as-module` mode. Collects
/// top-level `test*` functions in definition order; exits 5 when there
/// are none, the same status pytest uses.
const DISCOVERY_DRIVER: &str = r#"
def _snippet_run_tests():
    import sys
    import traceback

    tests = [
        (name, obj)
        for name, obj in list(globals().items())
        if name.startswith("test") and callable(obj) and not isinstance(obj, type)
    ]
    if not tests:
        print("no tests collected", file=sys.stderr)
        return 5

    failed = 0
    for name, test in tests:
        try:
            test()
        except Exception:
            failed += 1
            print(f"FAILED {name}", file=sys.stderr)
            traceback.print_exc()
        else:
            print(f"PASSED {name}")

    summary = f"{len(tests) - failed} passed, {failed} failed"
    print(summary, file=sys.stderr if failed else sys.stdout)
    return 1 if failed else 0


raise SystemExit(_snippet_run_tests())
"#;

pub struct PythonRuntime {
    interpreter: String,
}

impl PythonRuntime {
    pub fn new(interpreter: Option<String>) -> Self {
        Self {
            interpreter: interpreter.unwrap_or_else(|| "python3".to_string()),
        }
    }

    fn render_wrapped(&self, source_code: &str, test_code: &str) -> String {
        let body = dedent(test_code);
        let indent = if body.lines().any(|line| line.starts_with('\t')) {
            "\t"
        } else {
            "    "
        };

        let mut program = String::with_capacity(source_code.len() + body.len() + 128);
        push_block(&mut program, source_code);
        program.push_str(&format!("def {}():\n", TEST_ENTRY));
        if body.trim().is_empty() {
            program.push_str(indent);
            program.push_str("pass\n");
        } else {
            for line in body.lines() {
                if !line.trim().is_empty() {
                    program.push_str(indent);
                    program.push_str(line);
                }
                program.push('\n');
            }
        }
        program.push_str(&format!("\n\n{}()\n", TEST_ENTRY));
        program
    }

    fn render_module(&self, source_code: &str, test_code: &str) -> String {
        let mut program = String::with_capacity(source_code.len() + test_code.len() + 1024);
        push_block(&mut program, source_code);
        push_block(&mut program, &dedent(test_code));
        program.push_str(DISCOVERY_DRIVER);
        program
    }
}

impl Default for PythonRuntime {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Appends `code` followed by a blank line, normalizing the trailing newline.
fn push_block(program: &mut String, code: &str) {
    program.push_str(code.trim_end_matches(['\n', '\r']));
    program.push_str("\n\n");
}

impl ToolCheck for PythonRuntime {
    fn required_tools(&self) -> Vec<&str> {
        vec![self.interpreter.as_str()]
    }
}

impl GuestLanguage for PythonRuntime {
    fn file_extension(&self) -> &str {
        "py"
    }

    fn run_command(&self) -> &str {
        &self.interpreter
    }

    fn run_args(&self, guest_file: &Path) -> Vec<OsString> {
        // -B: no bytecode files in the sandbox, -u: unbuffered so a killed
        // guest still leaves its output behind.
        vec!["-B".into(), "-u".into(), guest_file.as_os_str().to_owned()]
    }

    fn environment(&self) -> Vec<(String, String)> {
        vec![
            ("PYTHONIOENCODING".to_string(), "utf-8".to_string()),
            ("PYTHONHASHSEED".to_string(), "0".to_string()),
            ("PYTHONNOUSERSITE".to_string(), "1".to_string()),
        ]
    }

    fn render(&self, source_code: &str, test_code: &str, mode: HarnessMode) -> String {
        match mode {
            HarnessMode::WrapAsFunction => self.render_wrapped(source_code, test_code),
            HarnessMode::RunAsModule => self.render_module(source_code, test_code),
        }
    }

    fn final_error_line<'a>(&self, stderr: &'a str) -> Option<&'a str> {
        static EXCEPTION_LINE: OnceLock<Regex> = OnceLock::new();
        let pattern = EXCEPTION_LINE.get_or_init(|| {
            Regex::new(r"(?m)^[A-Za-z_][\w.]*(?:Error|Exception|Exit|Interrupt)\b.*$")
                .expect("valid exception regex")
        });
        pattern.find_iter(stderr).last().map(|m| m.as_str().trim_end())
    }

    fn is_out_of_memory(&self, stderr: &str) -> bool {
        stderr
            .lines()
            .any(|line| line == "MemoryError" || line.starts_with("MemoryError:"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_test_body_into_entry_function() {
        let program = PythonRuntime::default().render(
            "def add(a, b):\n    return a + b\n",
            "assert add(1, 2) == 3\nassert add(0, 0) == 0",
            HarnessMode::WrapAsFunction,
        );
        assert_eq!(
            program,
            "def add(a, b):\n    return a + b\n\n\
             def _snippet_test_entry():\n    assert add(1, 2) == 3\n    assert add(0, 0) == 0\n\
             \n\n_snippet_test_entry()\n"
        );
    }

    #[test]
    fn empty_test_body_becomes_pass() {
        let program =
            PythonRuntime::default().render("x = 1", "  \n", HarnessMode::WrapAsFunction);
        assert!(program.contains("def _snippet_test_entry():\n    pass\n"));
    }

    #[test]
    fn tab_indented_tests_are_wrapped_with_tabs() {
        let program = PythonRuntime::default().render(
            "x = 1",
            "if x:\n\tassert x == 1",
            HarnessMode::WrapAsFunction,
        );
        assert!(program.contains("\tif x:\n\t\tassert x == 1\n"));
    }

    #[test]
    fn module_mode_keeps_tests_at_top_level() {
        let program = PythonRuntime::default().render(
            "def add(a, b): return a + b",
            "def test_add():\n    assert add(1, 2) == 3",
            HarnessMode::RunAsModule,
        );
        assert!(program.starts_with("def add(a, b): return a + b\n\ndef test_add():\n"));
        assert!(program.contains("raise SystemExit(_snippet_run_tests())"));
        assert!(!program.contains(TEST_ENTRY));
    }

    #[test]
    fn finds_final_exception_line() {
        let stderr = "Traceback (most recent call last):\n  File \"guest.py\", line 4, in <module>\n\
                      ValueError: first\nDuring handling...\nMemoryError\n";
        let python = PythonRuntime::default();
        assert_eq!(python.final_error_line(stderr), Some("MemoryError"));
        assert!(python.is_out_of_memory(stderr));
        assert!(!python.is_out_of_memory("AssertionError\n"));
        assert_eq!(python.final_error_line("no traceback here"), None);
    }
}
