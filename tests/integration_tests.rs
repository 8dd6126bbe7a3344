// tests/integration_tests.rs

use linqtree::cli::{
    CheckOptions, CliError, CompileOptions, CompileResult, execute_check, execute_compile,
};
use linqtree::literal::{LiteralDataset, LiteralExecutor};
use linqtree::{BuildError, Captures, EvalError, RootSource, Session, Shape, Value};
use serde_json::json;

fn run(items: Vec<Value>, stages: &[(&str, &str)]) -> Result<Vec<Value>, EvalError> {
    let session = Session::builder().build();
    let mut stream = LiteralDataset::new(items).root(&session);
    for (operator, source) in stages {
        stream = match *operator {
            "map" => stream.map(*source),
            "flat_map" => stream.flat_map(*source),
            "filter" => stream.filter(*source),
            other => panic!("unknown operator {}", other),
        }
        .unwrap_or_else(|e| panic!("failed to build {} {:?}: {}", operator, source, e));
    }
    stream.execute(&LiteralExecutor::new()).unwrap()
}

fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().copied().map(Value::Integer).collect()
}

fn compile(stages: &[&str], input: Option<&str>) -> Result<CompileResult, CliError> {
    execute_compile(&CompileOptions {
        stages: stages.iter().map(|s| s.to_string()).collect(),
        input: input.map(String::from),
        ..Default::default()
    })
}

// ============================================================================
// Literal executor
// ============================================================================

#[test]
fn test_sum_over_filtered_generator() {
    assert_eq!(
        run(ints(&[0]), &[("map", "lambda e: sum(j for j in [1, 2, 3] if j > 1)")]),
        Ok(ints(&[5]))
    );
}

#[test]
fn test_filter_then_map() {
    assert_eq!(
        run(
            ints(&[1, 2, 3, 4, 5]),
            &[("filter", "lambda n: n % 2 == 1"), ("map", "lambda n: n * n")]
        ),
        Ok(ints(&[1, 9, 25]))
    );
}

#[test]
fn test_flat_map_flattens_one_level() {
    let nested = vec![Value::from(vec![1, 2]), Value::from(vec![3])];
    assert_eq!(
        run(nested, &[("flat_map", "lambda xs: xs"), ("map", "lambda x: x + 10")]),
        Ok(ints(&[11, 12, 13]))
    );
}

#[test]
fn test_records_and_comprehensions() {
    let jets = vec![
        Value::Record(vec![("pt".into(), Value::Float(10.0)), ("eta".into(), Value::Float(0.5))]),
        Value::Record(vec![("pt".into(), Value::Float(45.0)), ("eta".into(), Value::Float(2.1))]),
        Value::Record(vec![("pt".into(), Value::Float(60.0)), ("eta".into(), Value::Float(3.0))]),
    ];
    assert_eq!(
        run(
            jets,
            &[
                ("filter", "lambda j: j.pt > 20 and abs(j.eta) < 2.5"),
                ("map", "lambda j: [j.pt * f for f in [1, 2]]"),
            ]
        ),
        Ok(vec![Value::from(vec![45.0, 90.0])])
    );
}

#[test]
fn test_nested_sequence_operators() {
    let events = vec![Value::from(vec![5, 50, 500]), Value::from(vec![1])];
    assert_eq!(
        run(events, &[("map", "lambda e: len([x for x in e if x > 10])")]),
        Ok(ints(&[2, 0]))
    );
}

#[test]
fn test_captured_values_take_part() {
    let session = Session::builder().build();
    let captures = Captures::new().literal("allowed", vec![2, 3]);
    let result = LiteralDataset::new(vec![1, 2, 3, 4])
        .root(&session)
        .filter_with("lambda n: n in allowed", &captures)
        .unwrap()
        .execute(&LiteralExecutor::new())
        .unwrap();
    assert_eq!(result, Ok(ints(&[2, 3])));
}

#[test]
fn test_evaluation_errors_are_reported() {
    assert_eq!(
        run(ints(&[1, 0]), &[("map", "lambda n: 10 // n")]),
        Err(EvalError::DivisionByZero)
    );
}

#[test]
fn test_other_roots_are_not_executed() {
    let session = Session::builder().build();
    let stream = session.root(RootSource::new("Files", json!(["a.root"])), Shape::Any);
    assert!(matches!(
        stream.execute(&LiteralExecutor::new()),
        Ok(Err(EvalError::Unsupported(_)))
    ));
}

// ============================================================================
// Command line
// ============================================================================

#[test]
fn test_compile_emits_the_tree() {
    let result = compile(
        &[
            "filter: lambda x: x.pt() > 30",
            r#"annotate: {"name": "calibrate"}"#,
            "map: lambda x: x.pt()",
        ],
        None,
    )
    .unwrap();

    let CompileResult::Tree(tree) = result else {
        panic!("expected a tree");
    };
    assert_eq!(tree["root"]["kind"], "Dataset");
    assert_eq!(tree["stages"].as_array().map(Vec::len), Some(3));
    assert_eq!(tree["stages"][1], json!({"stage": "annotate", "arg": {"name": "calibrate"}}));
}

#[test]
fn test_compile_runs_over_input() {
    let result = compile(&["map: lambda n: [n, n * 2]", "flat_map: lambda p: p"], Some("[1, 5]")).unwrap();
    match result {
        CompileResult::Results(items) => assert_eq!(items, json!([1, 2, 5, 10])),
        other => panic!("expected results, got {:?}", other),
    }
}

#[test]
fn test_compile_needs_stages() {
    assert!(matches!(compile(&[], None), Err(CliError::NoStages)));
    assert!(matches!(
        compile(&["reduce: lambda x: x"], None),
        Err(CliError::InvalidStage(_))
    ));
}

#[test]
fn test_compile_reports_build_errors() {
    assert!(matches!(
        compile(&["map: lambda x: mystery(x)"], None),
        Err(CliError::Build(BuildError::UnresolvedCall { .. }))
    ));
}

#[test]
fn test_compile_with_capability_file() {
    let shapes = r#"{
        "shapes": {
            "Event": {"members": {"jets": {"returns": "Sequence[Jet]"}}},
            "Jet": {"members": {"pt": {"returns": "float"}}}
        }
    }"#;
    let result = execute_compile(&CompileOptions {
        stages: vec!["flat_map: lambda e: e.jets()".into(), "map: lambda j: j.pt()".into()],
        capabilities: Some(shapes.into()),
        root_shape: Some("Event".into()),
        ..Default::default()
    })
    .unwrap();

    let CompileResult::Tree(tree) = result else {
        panic!("expected a tree");
    };
    assert_eq!(tree["item_shape"], "float");

    let broken = execute_compile(&CompileOptions {
        stages: vec!["flat_map: lambda e: e.muons()".into()],
        capabilities: Some(shapes.into()),
        root_shape: Some("Event".into()),
        ..Default::default()
    });
    assert!(matches!(broken, Err(CliError::Build(BuildError::UnresolvedCall { .. }))));
}

#[test]
fn test_check_shows_both_forms() {
    let result = execute_check(&CheckOptions {
        lambda: "lambda e: sum(j for j in [1, 2, 3] if j > cut)".into(),
        captures: vec!["cut=1".into()],
        ..Default::default()
    })
    .unwrap();

    assert_eq!(
        result.quoted.to_string(),
        "lambda e: sum(j for j in [1, 2, 3] if j > 1)"
    );
    assert_eq!(
        result.desugared.to_string(),
        "lambda e: Sum([1, 2, 3].Filter(lambda j: j > 1))"
    );
}

#[test]
fn test_check_rejects_bad_captures() {
    let result = execute_check(&CheckOptions {
        lambda: "lambda x: x".into(),
        captures: vec!["not a capture".into()],
        ..Default::default()
    });
    assert!(matches!(result, Err(CliError::InvalidCapture(_))));
}
