//! Tests end-to-end : source Lox → sortie imprimée.
//!
//! Chaque scénario passe par le pipeline complet (scanner → compilateur
//! Pratt → bytecode → VM) avec un host qui collecte la sortie de `print`.

use std::cell::RefCell;
use std::fmt::Write as _;
use std::rc::Rc;

use lox_vm::{Host, InterpretError, Vm, VmOptions};

#[derive(Default)]
struct Sink(Rc<RefCell<Vec<String>>>);

impl Host for Sink {
    fn print_line(&mut self, line: &str) {
        self.0.borrow_mut().push(line.to_string());
    }
}

fn run(source: &str) -> (Result<(), InterpretError>, Vec<String>) {
    let lines = Rc::new(RefCell::new(Vec::new()));
    let mut vm = Vm::new().with_host(Box::new(Sink(lines.clone())));
    let result = vm.interpret(source);
    let printed = lines.borrow().clone();
    (result, printed)
}

fn expect_output(source: &str, expected: &[&str]) {
    let (result, printed) = run(source);
    assert!(result.is_ok(), "échec inattendu sur: {source}");
    assert_eq!(printed, expected, "sortie inattendue pour: {source}");
}

fn expect_runtime_error(source: &str) {
    let (result, _) = run(source);
    assert!(
        matches!(result, Err(InterpretError::Runtime)),
        "erreur d'exécution attendue pour: {source}"
    );
}

#[test]
fn arithmetic_precedence() {
    expect_output("print 1 + 2 * 3;", &["7"]);
    expect_output("print (1 + 2) * 3;", &["9"]);
    expect_output("print -2 * 3;", &["-6"]);
    expect_output("print 10 / 4;", &["2.5"]);
}

#[test]
fn numbers_print_in_general_format() {
    // Grande magnitude : bascule en notation scientifique.
    expect_output("print 100000000;", &["1e+08"]);
    expect_output("print 1234567;", &["1.23457e+06"]);
    expect_output("print 123456;", &["123456"]);
    // Fraction binaire longue : arrondie à 6 chiffres significatifs.
    expect_output("print 0.1 + 0.2;", &["0.3"]);
    expect_output("print 0.00001;", &["1e-05"]);
}

#[test]
fn string_concatenation() {
    expect_output("var a = \"foo\"; var b = \"bar\"; print a + b;", &["foobar"]);
    expect_output("print \"\" + \"x\";", &["x"]);
}

#[test]
fn for_loop_accumulates() {
    expect_output(
        "var n = 0; for (var i = 0; i < 5; i = i + 1) { n = n + i; } print n;",
        &["10"],
    );
}

#[test]
fn shadowing_in_nested_blocks() {
    expect_output(
        "{ var x = 1; { var x = 2; print x; } print x; }",
        &["2", "1"],
    );
}

#[test]
fn recursive_function() {
    expect_output(
        "fun fact(n) { if (n <= 1) return 1; return n * fact(n - 1); } print fact(5);",
        &["120"],
    );
}

#[test]
fn equality_and_interning() {
    expect_output("print \"a\" == \"a\"; print nil == false;", &["true", "false"]);
    expect_output("print \"ab\" == \"a\" + \"b\";", &["true"]);
    expect_output("print 1 == 1; print 1 == 2; print true == true;", &["true", "false", "true"]);
}

#[test]
fn while_loop_and_comparisons() {
    expect_output(
        "var i = 0; while (i < 3) { print i; i = i + 1; }",
        &["0", "1", "2"],
    );
    expect_output("print 2 >= 2; print 2 > 2; print 1 <= 0;", &["true", "false", "false"]);
}

#[test]
fn if_else_branches() {
    expect_output("if (true) print \"then\"; else print \"else\";", &["then"]);
    expect_output("if (nil) print \"then\"; else print \"else\";", &["else"]);
    // 0 est truthy.
    expect_output("if (0) print \"then\"; else print \"else\";", &["then"]);
}

#[test]
fn and_or_short_circuit_keeps_operand_values() {
    // Le court-circuit laisse la valeur gauche comme résultat.
    expect_output("print nil and 2;", &["nil"]);
    expect_output("print 1 and 2;", &["2"]);
    expect_output("print 1 or 2;", &["1"]);
    expect_output("print false or \"droite\";", &["droite"]);
    // La droite n'est pas évaluée quand la gauche décide.
    expect_output(
        "var touched = 0; fun touch() { touched = 1; return true; } \
         var v = false and touch(); print touched;",
        &["0"],
    );
}

#[test]
fn switch_selects_a_single_case() {
    let source = "switch (2) {\
        case 1: print \"un\";\
        case 2: print \"deux\";\
        case 3: print \"trois\";\
    }";
    expect_output(source, &["deux"]);
}

#[test]
fn switch_falls_back_to_default() {
    let source = "switch (9) {\
        case 1: print \"un\";\
        default: print \"autre\";\
    }";
    expect_output(source, &["autre"]);
    // Et la pile est propre après : le discriminant est bien dépilé.
    let source = "var x = 0;\
        switch (x) { case 0: x = 10; default: x = 20; }\
        print x;";
    expect_output(source, &["10"]);
}

#[test]
fn functions_are_first_class() {
    expect_output(
        "fun greet() { return \"salut\"; } var f = greet; print f();",
        &["salut"],
    );
    expect_output("fun f() {} print f;", &["<fn f>"]);
    // Retour implicite : nil.
    expect_output("fun f() {} print f();", &["nil"]);
}

#[test]
fn long_constant_operands_roundtrip() {
    // Plus de 256 constantes numériques distinctes : les dernières passent
    // par la forme longue 24 bits, et reviennent intactes.
    let mut source = String::new();
    for i in 0..300 {
        let _ = writeln!(source, "print {i}.5;");
    }
    let expected: Vec<String> = (0..300).map(|i| format!("{i}.5")).collect();
    let (result, printed) = run(&source);
    assert!(result.is_ok());
    assert_eq!(printed, expected);
}

#[test]
fn nested_calls_restore_their_stack_windows() {
    expect_output(
        "fun add(a, b) { return a + b; }\
         fun twice(x) { return add(x, x); }\
         print add(twice(2), 3);",
        &["7"],
    );
}

#[test]
fn runtime_error_mixed_addition() {
    expect_runtime_error("print 1 + \"x\";");
    expect_runtime_error("print \"x\" + 1;");
}

#[test]
fn runtime_error_undefined_variable() {
    expect_runtime_error("undefined_var;");
    expect_runtime_error("print missing;");
    expect_runtime_error("missing = 1;");
}

#[test]
fn runtime_error_calls() {
    expect_runtime_error("var notfun = 1; notfun();");
    expect_runtime_error("fun f(a) {} f();");
    expect_runtime_error("fun f() {} f(1, 2);");
}

#[test]
fn compile_error_self_initializer() {
    let (result, _) = run("{ var x = x; }");
    assert!(matches!(result, Err(InterpretError::Compile(_))));
}

#[test]
fn trace_mode_does_not_change_results() {
    let lines = Rc::new(RefCell::new(Vec::new()));
    let mut vm = Vm::with_options(VmOptions::default().with_trace(true))
        .with_host(Box::new(Sink(lines.clone())));
    vm.interpret("print 1 + 2;").expect("ok");
    assert_eq!(lines.borrow().as_slice(), ["3"]);
}
