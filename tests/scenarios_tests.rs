// End-to-end scenarios driven entirely through the public `tigelang::run`
// surface, not the individual pipeline stages (those have their own
// `#[cfg(test)]` blocks next to the code they exercise).

use tigelang::{run, Error, Value};

#[test]
fn arithmetic_with_precedence() {
    assert_eq!(run("let a = 2 + 3 * 4; return a;").unwrap(), Value::Int(14));
}

#[test]
fn if_else_picks_the_taken_branch() {
    assert_eq!(
        run("let a = 1; if (a == 1) { a = 42; } else { a = 7; } return a;").unwrap(),
        Value::Int(42)
    );
    assert_eq!(
        run("let a = 2; if (a == 1) { a = 42; } else { a = 7; } return a;").unwrap(),
        Value::Int(7)
    );
}

#[test]
fn counted_loop_runs_exactly_five_times() {
    assert_eq!(
        run("let s = 0; for i in 0..5 { s = s + i; } return s;").unwrap(),
        Value::Int(10)
    );
}

#[test]
fn ternary_picks_the_matching_arm() {
    assert_eq!(run("return (3 < 5) ? 100 : 200;").unwrap(), Value::Int(100));
    assert_eq!(run("return (5 < 3) ? 100 : 200;").unwrap(), Value::Int(200));
}

#[test]
fn function_call_passes_both_arguments() {
    assert_eq!(
        run("fn add(x, y) { return x + y; } return add(2, 40);").unwrap(),
        Value::Int(42)
    );
}

#[test]
fn calling_with_the_wrong_arity_is_a_compile_error() {
    let err = run("fn add(x, y) { return x + y; } return add(2);").unwrap_err();
    assert!(matches!(err, Error::Compile(_)), "expected a compile error, got {err:?}");
}

#[test]
fn division_by_zero_fails_without_producing_a_value() {
    let err = run("return 10 / 0;").unwrap_err();
    assert!(matches!(err, Error::Runtime(_)), "expected a runtime error, got {err:?}");
}

#[test]
fn nested_calls_keep_each_frame_s_arguments_straight() {
    // `outer` calls `inner` twice with different arguments; if argument
    // registers leaked between frames this would come back wrong.
    let src = "
        fn inner(a, b) { return a - b; }
        fn outer(x) { return inner(x, 1) + inner(x, 2); }
        return outer(10);
    ";
    // inner(10, 1) = 9, inner(10, 2) = 8, sum = 17
    assert_eq!(run(src).unwrap(), Value::Int(17));
}

#[test]
fn recursive_function_computes_factorial() {
    let src = "
        fn fact(n) {
            if (n == 0) {
                return 1;
            }
            return n * fact(n - 1);
        }
        return fact(5);
    ";
    assert_eq!(run(src).unwrap(), Value::Int(120));
}

#[test]
fn break_stops_the_loop_early() {
    let src = "
        let s = 0;
        for i in 0..10 {
            if (i == 3) {
                break;
            }
            s = s + i;
        }
        return s;
    ";
    assert_eq!(run(src).unwrap(), Value::Int(3));
}

#[test]
fn break_outside_a_loop_is_a_compile_error() {
    let err = run("break;").unwrap_err();
    assert!(matches!(err, Error::Compile(_)));
}

#[test]
fn unknown_identifier_is_a_compile_error_not_a_panic() {
    let err = run("return unknown_name;").unwrap_err();
    assert!(matches!(err, Error::Compile(_)));
}

#[test]
fn a_lex_error_is_reported_rather_than_silently_dropped() {
    let err = run("let a = 1 @ 2; return a;").unwrap_err();
    assert!(matches!(err, Error::Lex(_)));
}

#[test]
fn a_syntax_error_is_reported_as_parse_not_lex() {
    let err = run("let a = ;").unwrap_err();
    assert!(matches!(err, Error::Parse(_)), "expected a parse error, got {err:?}");
}

#[test]
fn declaring_past_the_register_file_s_capacity_is_rejected_not_a_panic() {
    // One more `let` than the default 512-register file has room for. The
    // compiler assigns register indices without knowing the VM's capacity
    // (they're independent per SPEC_FULL.md's layering), so this surfaces
    // as a runtime `RegisterOutOfRange` rather than a compile error -- but
    // it must surface as an `Err`, never a panic or silent truncation.
    let mut src = String::new();
    for i in 0..520 {
        src.push_str(&format!("let v{i} = {i};\n"));
    }
    src.push_str("return v0;\n");
    let err = run(&src).unwrap_err();
    assert!(matches!(err, Error::Runtime(_)), "expected a runtime error, got {err:?}");
}
