use crate::ast::*;
use crate::error::{BindingsError, CompileError, EvalError, ParseError};
use crate::from_json::bindings_from_json;
use crate::interpreter::deep_merge;
use crate::lexer::tokenize;
use crate::parser::parse_tokens;
use crate::token::TokenKind;
use crate::tree::*;
use crate::types::{Cardinality, Type, TypeSet};
use crate::{compile, compile_documents, compile_source, validate_resources};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::collections::BTreeMap;

// ── Shared fixture runner ───────────────────────────────────────────

/// Embed fixture files at compile time.
const COMPILE_FIXTURES: &str = include_str!("../test-data/fixtures/compile.json");

fn eval(source: &str) -> Value {
    compile_source(source, &Bindings::new())
        .unwrap_or_else(|e| panic!("compile failed for {:?}: {}", source, e))
        .value
}

fn eval_err(source: &str) -> CompileError {
    match compile_source(source, &Bindings::new()) {
        Ok(result) => panic!("expected an error for {:?}, got {:?}", source, result.value),
        Err(e) => e,
    }
}

#[test]
fn test_fixture_compile() {
    let fixtures: Vec<serde_json::Value> = serde_json::from_str(COMPILE_FIXTURES).unwrap();

    for fixture in &fixtures {
        let name = fixture["name"].as_str().unwrap();
        let input = fixture["input"].as_str().unwrap();
        let bindings = match fixture.get("bindings") {
            Some(b) => bindings_from_json(&b.to_string()).unwrap(),
            None => Bindings::new(),
        };

        let result = compile_source(input, &bindings);

        if let Some(stage) = fixture.get("expectError").and_then(|v| v.as_str()) {
            match result {
                Ok(r) => panic!(
                    "Fixture '{}': expected a {} error but got {:?}",
                    name, stage, r.value
                ),
                Err(e) => assert_eq!(e.stage(), stage, "Fixture '{}': {}", name, e),
            }
            continue;
        }

        let value = match result {
            Ok(r) => r.value,
            Err(e) => panic!("Fixture '{}': unexpected error: {}", name, e),
        };
        let actual = serde_json::to_value(&value).unwrap();
        assert_eq!(actual, fixture["expected"], "Fixture '{}'", name);
    }
}

// ── End to end ──────────────────────────────────────────────────────

#[test]
fn test_literal_assignment_pipeline() {
    let lexed = tokenize("key: value").unwrap();
    let kinds: Vec<TokenKind> = lexed.tokens.iter().map(|t| t.kind.clone()).collect();
    assert_eq!(
        kinds,
        vec![
            TokenKind::Symbol("key".to_string()),
            TokenKind::Assignment { literal: true },
            TokenKind::StringLit("value".to_string()),
            TokenKind::Eof,
        ]
    );

    let document = parse_tokens(&lexed.tokens).unwrap();
    let block = match &document.root {
        Expression::Scope { operand, .. } => match operand.as_ref() {
            Expression::Block(block) => block,
            other => panic!("expected a block, got {:?}", other),
        },
        other => panic!("expected a scope, got {:?}", other),
    };
    assert_eq!(block.sections.len(), 1);
    assert_eq!(
        block.sections[0].expressions,
        vec![Expression::Assignment {
            key: "key".to_string(),
            operand: Box::new(Expression::Scalar(Value::from("value"))),
        }]
    );

    let mut expected = BTreeMap::new();
    expected.insert("key".to_string(), Value::from("value"));
    assert_eq!(eval("key: value"), Value::Struct(expected));
}

#[test]
fn test_kubernetes_deployment() {
    let source = "\
_app := \"web\"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
  labels:
    app: web
spec:
  replicas: 3
  template:
    spec:
      containers:
        - name: web
          image: \"nginx:1.25\"
          ports:
            - containerPort: 80
";
    let value = eval(source);
    assert!(value.get("_app").is_none());
    assert_eq!(value.get("kind"), Some(&Value::from("Deployment")));
    let containers = value
        .get("spec")
        .and_then(|s| s.get("template"))
        .and_then(|t| t.get("spec"))
        .and_then(|s| s.get("containers"))
        .and_then(Value::as_array)
        .unwrap();
    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].get("image"), Some(&Value::from("nginx:1.25")));
    assert_eq!(
        containers[0].get("ports").unwrap().to_json(),
        r#"[{"containerPort":80}]"#
    );
    assert!(validate_resources(&value).is_empty());
}

#[test]
fn test_empty_section_is_a_parse_error() {
    let err = eval_err("a: 1\n---\n---\nb: 2\n");
    assert!(matches!(
        err,
        CompileError::Parse(ParseError::EmptySection { .. })
    ));
    assert!(err.span().is_some());
}

#[test]
fn test_section_marker_alone_is_an_error() {
    assert!(matches!(
        eval_err("---\n---\n"),
        CompileError::Parse(ParseError::EmptySection { .. })
    ));
}

#[test]
fn test_cycle_names_the_binding() {
    match eval_err("a := b\nb := a\n") {
        CompileError::Eval(EvalError::Cycle(name)) => assert!(name == "a" || name == "b"),
        other => panic!("expected a cycle error, got {:?}", other),
    }
}

#[test]
fn test_unresolved_identifier() {
    assert_eq!(
        eval_err("a := nope\n"),
        CompileError::Eval(EvalError::UnresolvedIdentifier("nope".to_string()))
    );
}

#[test]
fn test_missing_and_extra_arguments() {
    assert_eq!(
        eval_err("f := a b -> a\nx := f 1\n"),
        CompileError::Eval(EvalError::MissingArgument("f".to_string()))
    );
    assert!(matches!(
        eval_err("v := 1\nw := 2\nx := v w\n"),
        CompileError::Eval(EvalError::NotAFunction(_))
    ));
}

#[test]
fn test_literal_arguments_fill_parameters_in_order() {
    let value = eval("pair := a b -> ^a + b\ny := pair 1 2\nz := pair \"x\" y\n");
    assert_eq!(
        serde_json::to_value(&value).unwrap(),
        serde_json::json!({ "y": [1, 2], "z": ["x", 1, 2] })
    );
}

#[test]
fn test_application_operands_are_flat() {
    let document = parse_tokens(&tokenize("f := a b -> a\nx := f 1 \"two\"\n").unwrap().tokens)
        .unwrap();
    let Expression::Scope { operand, .. } = &document.root else {
        panic!("root is not a scope");
    };
    let Expression::Block(block) = operand.as_ref() else {
        panic!("root scope does not wrap a block");
    };
    match &block.sections[0].expressions[1] {
        Expression::Assignment { operand, .. } => match operand.as_ref() {
            Expression::Application {
                identifier,
                operands,
                function,
            } => {
                assert_eq!(identifier, "f");
                assert_eq!(
                    operands,
                    &vec![
                        Expression::Scalar(Value::Number(1.0)),
                        Expression::Scalar(Value::from("two")),
                    ]
                );
                assert!(function.is_some());
            }
            other => panic!("expected an application, got {:?}", other),
        },
        other => panic!("expected an assignment, got {:?}", other),
    }
}

#[test]
fn test_parse_requires_terminated_tokens() {
    assert_eq!(parse_tokens(&[]).unwrap_err(), ParseError::MissingEof);

    let mut tokens = tokenize("a: 1").unwrap().tokens;
    tokens.pop();
    assert_eq!(parse_tokens(&tokens).unwrap_err(), ParseError::MissingEof);
}

#[test]
fn test_merge_mismatch_reports_path() {
    let source = "\
a :=
  spec:
    replicas: 1
b :=
  spec:
    - 1
x := a + b
";
    match eval_err(source) {
        CompileError::Eval(EvalError::MergeMismatch { lhs, rhs, path }) => {
            assert_eq!((lhs, rhs, path.as_str()), ("mapping", "sequence", "spec"));
        }
        other => panic!("expected a merge mismatch, got {:?}", other),
    }
}

#[test]
fn test_vector_merge_requires_sequence_on_the_left() {
    assert!(matches!(
        eval_err("x := 1\ny := x + ^ 2\n"),
        CompileError::Eval(EvalError::MergeMismatch { .. })
    ));
    let value = eval("xs := ^ 1\nys := xs + 2\n");
    assert_eq!(value.get("ys").unwrap().to_json(), "[1,2]");
}

#[test]
fn test_function_parameter_must_be_identifier() {
    assert!(matches!(
        eval_err("f := 1 -> 2\n"),
        CompileError::Parse(ParseError::InvalidParameter { .. })
    ));
}

#[test]
fn test_two_terms_without_operator() {
    assert!(matches!(
        eval_err("x := \"a\" \"b\"\n"),
        CompileError::Parse(ParseError::StackShape { count: 2, .. })
    ));
}

#[test]
fn test_unknown_input_is_also_a_diagnostic() {
    let lexed = tokenize("a: 1\nb := @@\n").unwrap();
    assert_eq!(lexed.diagnostics.len(), 1);
    assert_eq!(lexed.diagnostics[0].code, "unrecognized-input");
    assert_eq!(lexed.diagnostics[0].begin.line, 1);
    assert!(matches!(
        eval_err("a: 1\nb := @@\n"),
        CompileError::Parse(ParseError::UnrecognizedInput { .. })
    ));
}

#[test]
fn test_diagnostics_are_returned_with_the_program() {
    let compiled = compile("a: 1\n").unwrap();
    assert!(compiled.diagnostics.is_empty());
    assert_eq!(compiled.program.cardinality(), Cardinality::Scalar);
}

// ── Serialization ───────────────────────────────────────────────────

#[test]
fn test_diagnostics_to_json() {
    let lexed = tokenize("a := @\n").unwrap();
    let json: serde_json::Value =
        serde_json::from_str(&crate::json::diagnostics_to_json(&lexed.diagnostics)).unwrap();
    assert_eq!(json[0]["code"], "unrecognized-input");
    assert_eq!(json[0]["begin"]["column"], 5);
    assert_eq!(json[0]["end"]["column"], 6);
    assert_eq!(
        lexed.diagnostics[0].to_string(),
        "0:5-0:6: Unrecognized input \"@\" (unrecognized-input)"
    );
}

#[test]
fn test_validation_errors_to_json() {
    let errors = validate_resources(&eval("kind: Pod\n"));
    let json: serde_json::Value =
        serde_json::from_str(&crate::json::validation_errors_to_json(&errors)).unwrap();
    assert_eq!(json[0]["code"], "missing-required");
    assert_eq!(json[0]["path"][0], "apiVersion");
}

#[test]
fn test_numbers_serialize_as_integers_when_integral() {
    let value = eval("a: 3\nb: 2.5\nc: -1\n");
    assert_eq!(value.to_json(), r#"{"a":3,"b":2.5,"c":-1}"#);
    assert_eq!(
        Value::from(serde_json::json!({"n": null, "xs": [1, true]})).to_json(),
        r#"{"n":null,"xs":[1,true]}"#
    );
}

#[test]
fn test_bindings_must_be_an_object() {
    assert!(matches!(
        bindings_from_json("[1, 2]"),
        Err(BindingsError::NotAnObject { found: "sequence" })
    ));
    assert!(matches!(
        bindings_from_json("{not json"),
        Err(BindingsError::Json(_))
    ));
    assert_eq!(bindings_from_json(r#"{"a": "b"}"#).unwrap().len(), 1);
}

// ── Static typing ───────────────────────────────────────────────────

#[test]
fn test_program_data_type() {
    let compiled = compile("name: web\nreplicas := count\n").unwrap();
    let mut bindings = Bindings::new();
    bindings.insert("count".to_string(), Value::from(2.0));

    let expected = Type::Struct(
        [
            ("name".to_string(), TypeSet::single(Type::string())),
            ("replicas".to_string(), TypeSet::single(Type::number())),
        ]
        .into_iter()
        .collect(),
    );
    assert_eq!(compiled.program.data_type(&bindings), expected);
    assert!(compiled
        .program
        .data_type(&Bindings::new())
        .to_string()
        .contains("replicas: unresolved"));
}

#[test]
fn test_resource_type_of_document() {
    let compiled = compile("apiVersion: v1\nkind: ConfigMap\n").unwrap();
    let ty = compiled.program.data_type(&Bindings::new());
    assert!(ty.assignable_to(&Type::KubernetesResource));
}

#[test]
fn test_multi_section_type_sees_front_matter() {
    let compiled = compile("_n := 1\n---\nx := _n\n").unwrap();
    let ty = compiled.program.data_type(&Bindings::new());
    assert_eq!(ty.to_string(), "[{}|{x: number}]");
    assert_eq!(compiled.program.cardinality(), Cardinality::Vector);
}

// ── Cardinality law ─────────────────────────────────────────────────

#[test]
fn test_cardinality_matches_value_shape() {
    let cases = [
        ("", Cardinality::Unit),
        ("a: 1\nb: 2\n", Cardinality::Scalar),
        ("a: 1\n---\nb: 2\n", Cardinality::Vector),
        ("yield 1\n", Cardinality::Vector),
    ];
    for (source, expected) in cases {
        let compiled = compile(source).unwrap();
        assert_eq!(compiled.program.cardinality(), expected, "{:?}", source);
        let value = compiled.program.evaluate(&Bindings::new()).unwrap();
        let shape = match value {
            Value::Unit => Cardinality::Unit,
            Value::Array(_) => Cardinality::Vector,
            _ => Cardinality::Scalar,
        };
        assert_eq!(shape, expected, "{:?}", source);
    }
}

// ── Multiple documents ──────────────────────────────────────────────

#[test]
fn test_compile_documents_concatenates() {
    let documents = vec![
        ("a.kyml".to_string(), "kind: A\n".to_string()),
        ("b.kyml".to_string(), "kind: B\n---\nkind: C\n".to_string()),
        ("empty.kyml".to_string(), "# nothing\n".to_string()),
    ];
    let value = compile_documents(&documents, &Bindings::new()).unwrap();
    assert_eq!(
        value.to_json(),
        r#"[{"kind":"A"},{"kind":"B"},{"kind":"C"}]"#
    );
}

#[test]
fn test_compile_documents_names_failing_document() {
    let documents = vec![
        ("ok.kyml".to_string(), "kind: A\n".to_string()),
        ("bad.kyml".to_string(), "x := missing\n".to_string()),
    ];
    let err = compile_documents(&documents, &Bindings::new()).unwrap_err();
    assert_eq!(err.name, "bad.kyml");
    assert_eq!(err.source.stage(), "eval");
    assert_eq!(
        err.to_string(),
        "bad.kyml: evaluation error: unresolved identifier \"missing\""
    );
}

// ── Merge ───────────────────────────────────────────────────────────

fn mapping(entries: &[(&str, Value)]) -> Value {
    Value::Struct(
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect(),
    )
}

#[test]
fn test_deep_merge_modes() {
    let left = mapping(&[("a", Value::from(1.0)), ("b", Value::from("x"))]);
    let right = mapping(&[("b", Value::from("y")), ("c", Value::from(true))]);

    let hard = deep_merge(left.clone(), right.clone(), MergeMode::Hard, &mut Vec::new()).unwrap();
    assert_eq!(
        hard,
        mapping(&[
            ("a", Value::from(1.0)),
            ("b", Value::from("y")),
            ("c", Value::from(true)),
        ])
    );

    let soft = deep_merge(left, right, MergeMode::Soft, &mut Vec::new()).unwrap();
    assert_eq!(soft.get("b"), Some(&Value::from("x")));
    assert_eq!(soft.get("c"), Some(&Value::from(true)));
}

fn small_mapping() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        (0i32..100).prop_map(|n| Value::Number(n as f64)),
        "[a-z]{0,6}".prop_map(Value::String),
        any::<bool>().prop_map(Value::Boolean),
    ];
    let nested = prop::collection::btree_map("[a-z]{1,4}", leaf.clone(), 0..4).prop_map(Value::Struct);
    prop::collection::btree_map("[a-z]{1,4}", prop_oneof![leaf, nested], 0..6)
        .prop_map(Value::Struct)
}

fn number_list() -> impl Strategy<Value = Value> {
    prop::collection::vec((0i32..1000).prop_map(|n| Value::Number(n as f64)), 0..6)
        .prop_map(Value::Array)
}

proptest! {
    #[test]
    fn prop_merge_with_empty_mapping_is_identity(m in small_mapping()) {
        let merged = deep_merge(m.clone(), Value::empty_struct(), MergeMode::Hard, &mut Vec::new()).unwrap();
        prop_assert_eq!(&merged, &m);

        let mut bindings = Bindings::new();
        bindings.insert("m".to_string(), m.clone());
        let value = compile_source("m + {}\n", &bindings).unwrap().value;
        prop_assert_eq!(value, m);
    }

    #[test]
    fn prop_vector_merge_is_associative(a in number_list(), b in number_list(), c in number_list()) {
        let mut bindings = Bindings::new();
        bindings.insert("a".to_string(), a);
        bindings.insert("b".to_string(), b);
        bindings.insert("c".to_string(), c);
        let left = compile_source("(a + b) + c\n", &bindings).unwrap().value;
        let right = compile_source("a + (b + c)\n", &bindings).unwrap().value;
        prop_assert_eq!(left, right);
    }

    #[test]
    fn prop_indents_and_outdents_balance(steps in prop::collection::vec(any::<bool>(), 0..24)) {
        // Each step either nests one level deeper or returns to the left margin.
        let mut depth = 0usize;
        let mut source = String::new();
        for (i, deeper) in steps.iter().enumerate() {
            source.push_str(&"  ".repeat(depth));
            source.push_str(&format!("k{}:\n", i));
            depth = if *deeper { depth + 1 } else { 0 };
        }
        source.push_str("end: 1\n");

        let tokens = tokenize(&source).unwrap().tokens;
        let mut open = 0i64;
        for token in &tokens {
            match token.kind {
                TokenKind::Indent => open += 1,
                TokenKind::Outdent => {
                    open -= 1;
                    prop_assert!(open >= 0, "outdent below base level in {:?}", source);
                }
                _ => {}
            }
        }
        prop_assert_eq!(open, 0);
    }

    #[test]
    fn prop_assignment_sections_are_mappings(
        sections in prop::collection::vec(
            prop::collection::btree_map("[a-z][a-z0-9]{0,5}", 0u32..1000, 1..5),
            1..4,
        )
    ) {
        let reserved = ["true", "false", "yield"];
        prop_assume!(sections.iter().all(|s| s.keys().all(|k| !reserved.contains(&k.as_str()))));

        let source = sections
            .iter()
            .map(|s| s.iter().map(|(k, v)| format!("{}: {}\n", k, v)).collect::<String>())
            .collect::<Vec<_>>()
            .join("---\n");
        let compiled = compile(&source).unwrap();
        let value = compiled.program.evaluate(&Bindings::new()).unwrap();

        if sections.len() == 1 {
            prop_assert_eq!(compiled.program.cardinality(), Cardinality::Scalar);
            prop_assert_eq!(value.as_struct().map(|m| m.len()), Some(sections[0].len()));
        } else {
            prop_assert_eq!(compiled.program.cardinality(), Cardinality::Vector);
            prop_assert_eq!(value.as_array().map(|a| a.len()), Some(sections.len()));
        }
    }
}
