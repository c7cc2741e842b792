use indoc::indoc;
use kelpc::{CompileOptions, compile, error::CompileError, frontend::SourceFile};

fn compile_error(source: &str) -> CompileError {
    match compile(&SourceFile::from_memory(source), &CompileOptions::default()) {
        Ok(_) => panic!("expected `{source}` to fail"),
        Err(error) => error,
    }
}

#[test]
fn program_without_main() {
    let error = compile_error("func helper() { return; }");

    assert!(matches!(error, CompileError::MissingMain { .. }));
}

#[test]
fn main_with_parameters() {
    let error = compile_error("func main(argc int) { }");

    assert!(matches!(error, CompileError::InvalidMain { .. }));
}

#[test]
fn call_with_too_many_arguments() {
    let error = compile_error(indoc! {"
        func double(a int) int {
            return a * 2;
        }

        func main() {
            double(1, 2);
        }
    "});

    match error {
        CompileError::ArityMismatch {
            name,
            expected,
            found,
            ..
        } => {
            assert_eq!(name, "double");
            assert_eq!((expected, found), (1, 2));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn break_outside_of_a_loop() {
    let error = compile_error("func main() { break; }");

    assert!(matches!(
        error,
        CompileError::MisplacedJump {
            keyword: "break",
            ..
        }
    ));
}

#[test]
fn return_inside_a_deferred_statement() {
    let error = compile_error("func main() { defer return; }");

    assert!(matches!(error, CompileError::MisplacedJump { .. }));
}

#[test]
fn falling_off_a_function_with_a_result() {
    let error = compile_error(indoc! {"
        func answer() int {
            var x int = 42;
        }

        func main() {
            answer();
        }
    "});

    match error {
        CompileError::MissingReturn { name, ty, .. } => {
            assert_eq!(name, "answer");
            assert_eq!(ty, "int");
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn local_declared_twice() {
    let error = compile_error("func main() { var x int = 1; var x int = 2; }");

    assert!(matches!(error, CompileError::Redeclaration { ref name, .. } if name == "x"));
}

#[test]
fn function_declared_twice() {
    let error = compile_error("func f() { } func f() { } func main() { }");

    assert!(matches!(error, CompileError::Redeclaration { .. }));
}

#[test]
fn assignment_to_an_unknown_name() {
    let error = compile_error("func main() { missing = 1; }");

    assert!(matches!(error, CompileError::Unresolved { ref name, .. } if name == "missing"));
}

#[test]
fn unknown_type_in_a_declaration() {
    let error = compile_error("func main() { var x widget; }");

    assert!(matches!(error, CompileError::UnknownType { ref name, .. } if name == "widget"));
}

#[test]
fn arrays_too_large_to_build() {
    let error = compile_error(indoc! {"
        func main() {
            var p *[70000][70000] u8;
            var x u8 = (*p)[69999][0];
        }
    "});

    match error {
        CompileError::TypeTooLarge { ty, .. } => assert_eq!(ty, "[70000]u8"),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn structs_too_large_to_build() {
    let error = compile_error(indoc! {"
        type Half struct {
            bytes [40000]u8;
        }

        type Whole struct {
            low Half;
            high Half;
        }

        func main() { }
    "});

    match error {
        CompileError::TypeTooLarge { ty, .. } => assert_eq!(ty, "Whole"),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn rendered_errors_point_at_the_source() {
    colored::control::set_override(false);

    let source = SourceFile::from_memory("func main() {\n    break;\n}\n");
    let error = compile(&source, &CompileOptions::default()).unwrap_err();
    let rendered = error.render(&source);

    assert!(rendered.starts_with("<memory>:2:5: `break` is not allowed here"));
    assert!(rendered.contains("    break;"));
}

#[test]
fn missing_files_report_the_path() {
    let error = SourceFile::load(std::path::Path::new("/definitely/not/here.kelp")).unwrap_err();

    assert!(matches!(error, CompileError::Io { .. }));
    assert!(error.to_string().contains("/definitely/not/here.kelp"));
}
