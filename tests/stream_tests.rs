// tests/stream_tests.rs

use std::sync::Arc;

use linqtree::capability::{CapabilityModel, FunctionSpec, Param, ShapeDescriptor};
use linqtree::metadata::metadata;
use linqtree::{
    BuildError, CallbackKey, CallbackRegistry, Captures, Expr, KnownMetadata, QueryTree, QuoteError,
    Rewrite, RootSource, Session, Shape, Stage, StageKind, Stream, Value, to_json,
};

fn model() -> CapabilityModel {
    CapabilityModel::new()
        .with_shape(
            "Event",
            ShapeDescriptor::new().method(
                "jets",
                vec![Param::optional("collection", "AntiKt4")],
                Shape::sequence(Shape::named("Jet")),
            ),
        )
        .with_shape(
            "Jet",
            ShapeDescriptor::new()
                .method("pt", vec![], Shape::Float)
                .method("eta", vec![], Shape::Float)
                .method("getAttribute", vec![Param::required("name")], Shape::Any),
        )
        .with_function(
            "deltaR",
            FunctionSpec::new(vec![Param::required("a"), Param::required("b")], Shape::Float),
        )
}

fn session_with(registry: Arc<CallbackRegistry>) -> Arc<Session> {
    Session::builder().capabilities(model()).registry(registry).build()
}

fn events_in(session: &Arc<Session>) -> Stream {
    session.root(RootSource::new("Files", serde_json::json!(["a.root"])), Shape::named("Event"))
}

fn jets_in(session: &Arc<Session>) -> Stream {
    events_in(session).flat_map("lambda e: e.jets()").unwrap()
}

fn jets() -> Stream {
    jets_in(&session_with(Arc::new(CallbackRegistry::new())))
}

/// Callback that stacks one annotation named `name` and leaves the call alone
fn annotating(name: &'static str) -> impl Fn(Stream, Expr, &[Value]) -> Rewrite + Send + Sync + 'static {
    move |stream, call, _| Rewrite::unchanged(stream.annotate(metadata([("name", name)])), call)
}

fn annotation_names(tree: &QueryTree) -> Vec<String> {
    tree.annotations()
        .filter_map(|m| m.get("name").and_then(|v| v.as_str()).map(String::from))
        .collect()
}

fn operators(tree: &QueryTree) -> Vec<&'static str> {
    tree.stages
        .iter()
        .map(|s| match s {
            Stage::Map(_) => "map",
            Stage::FlatMap(_) => "flat_map",
            Stage::Filter(_) => "filter",
            Stage::Annotate(_) => "annotate",
        })
        .collect()
}

// ============================================================================
// Building
// ============================================================================

#[test]
fn test_one_stage_per_operator_call() {
    let stream = jets()
        .filter("lambda j: j.pt() > 30")
        .unwrap()
        .map("lambda j: j.eta()")
        .unwrap();

    assert_eq!(stream.len(), 4);
    let tree = stream.finalize().unwrap();
    assert_eq!(operators(&tree), vec!["flat_map", "filter", "map"]);
    assert_eq!(tree.root, RootSource::new("Files", serde_json::json!(["a.root"])));
    assert_eq!(tree.item_shape, Shape::Float);
}

#[test]
fn test_stage_lambdas_take_one_parameter() {
    assert!(matches!(
        jets().map("lambda a, b: a"),
        Err(BuildError::Quote(QuoteError::StageArity(2)))
    ));
    assert!(matches!(
        jets().map("lambda: 1"),
        Err(BuildError::Quote(QuoteError::StageArity(0)))
    ));
}

#[test]
fn test_deeply_nested_lambda_is_rejected() {
    let source = format!("lambda j: {}j.pt(){}", "(".repeat(20000), ")".repeat(20000));
    assert!(matches!(
        jets().map(source),
        Err(BuildError::Quote(QuoteError::TooDeep(_)))
    ));
}

#[test]
fn test_captures_are_snapshotted() {
    let mut captures = Captures::new().literal("cut", 30.0);
    let stream = jets().filter_with("lambda j: j.pt() > cut", &captures).unwrap();
    captures = captures.literal("cut", 40.0);

    let tree = stream.finalize().unwrap();
    assert_eq!(captures.len(), 1);
    assert_eq!(
        tree.stages.last(),
        Some(&Stage::Filter(
            linqtree::Lambda::new(
                ["j"],
                Expr::param("j")
                    .method("pt", vec![])
                    .compare(linqtree::CmpOp::GreaterThan, Expr::literal(30.0))
            )
        ))
    );
}

#[test]
fn test_comprehensions_never_reach_the_tree() {
    let stream = jets_in(&session_with(Arc::new(CallbackRegistry::new())))
        .map("lambda j: [n * 2 for n in [1, 2, 3] if n > 1]")
        .unwrap();
    let tree = stream.finalize().unwrap();
    assert_eq!(tree.stages.last().map(stage_source), Some("lambda j: [2 * 2, 3 * 2]".to_string()));
    assert_eq!(tree.item_shape, Shape::sequence(Shape::Int));
}

fn stage_source(stage: &Stage) -> String {
    match stage {
        Stage::Map(l) | Stage::FlatMap(l) | Stage::Filter(l) => l.to_string(),
        Stage::Annotate(m) => serde_json::Value::Object(m.clone()).to_string(),
    }
}

// ============================================================================
// Immutability
// ============================================================================

#[test]
fn test_branches_share_their_parent() {
    let base = jets();
    let forward = base.filter("lambda j: j.eta() > 2.5").unwrap();
    let pts = base.map("lambda j: j.pt()").unwrap();

    assert!(forward.parent().is_some_and(|p| p.ptr_eq(&base)));
    assert!(pts.parent().is_some_and(|p| p.ptr_eq(&base)));
    assert_eq!(base.len(), 2);
    assert_eq!(base.finalize().unwrap().stages.len(), 1);
    assert_eq!(forward.shape(), &Shape::named("Jet"));
    assert_eq!(pts.shape(), &Shape::Float);
}

#[test]
fn test_failed_call_leaves_stream_usable() {
    let base = jets();
    let before = base.finalize().unwrap();

    assert!(base.map("lambda j: j.phi()").is_err());

    assert_eq!(base.finalize().unwrap(), before);
    assert!(base.map("lambda j: j.pt()").is_ok());
}

#[test]
fn test_root_stream() {
    let session = session_with(Arc::new(CallbackRegistry::new()));
    let events = events_in(&session);
    assert!(events.is_root());
    assert!(matches!(events.kind(), StageKind::Root(source) if source.kind == "Files"));
    assert!(events.finalize().unwrap().stages.is_empty());
}

// ============================================================================
// Metadata
// ============================================================================

#[test]
fn test_annotations_are_emitted_in_place() {
    let stream = jets()
        .annotate(metadata([("name", "first")]))
        .filter("lambda j: j.pt() > 30")
        .unwrap()
        .annotate(KnownMetadata::InjectCode {
            name: "calibration".into(),
            header_includes: vec!["calib.h".into()],
            private_members: vec![],
            instance_initialization: vec![],
            link_libraries: vec![],
        });

    assert_eq!(stream.shape(), &Shape::named("Jet"));
    let tree = stream.finalize().unwrap();
    assert_eq!(operators(&tree), vec!["flat_map", "annotate", "filter", "annotate"]);
    assert_eq!(annotation_names(&tree), vec!["first", "calibration"]);
    let last = tree.annotations().last().unwrap();
    assert_eq!(last["metadata_type"], "inject-code");
}

#[test]
fn test_query_metadata_is_not_emitted() {
    let stream = jets()
        .query_metadata(metadata([("result_format", "parquet")]))
        .annotate(metadata([("name", "kept")]))
        .query_metadata(metadata([("result_format", "root")]));

    let tree = stream.finalize().unwrap();
    assert_eq!(operators(&tree), vec!["flat_map", "annotate"]);
    assert_eq!(tree.query_metadata["result_format"], "root");

    let json = to_json(&tree).unwrap();
    assert!(!json.contains("result_format"));
    assert!(json.contains("kept"));
}

// ============================================================================
// Callbacks
// ============================================================================

#[test]
fn test_function_callback_annotates_before_the_stage() {
    let registry = Arc::new(CallbackRegistry::new());
    registry.register(CallbackKey::function("deltaR"), annotating("deltaR"));
    let session = session_with(registry);

    let stream = jets_in(&session).filter("lambda j: deltaR(j, j) < 0.4").unwrap();
    let tree = stream.finalize().unwrap();

    assert_eq!(operators(&tree), vec!["flat_map", "annotate", "filter"]);
    assert_eq!(annotation_names(&tree), vec!["deltaR"]);
}

#[test]
fn test_nested_callbacks_run_innermost_first() {
    let registry = Arc::new(CallbackRegistry::new());
    registry.register(CallbackKey::function("outer"), annotating("outer"));
    registry.register(CallbackKey::function("inner"), annotating("inner"));
    let session = session_with(registry);

    let stream = jets_in(&session).map("lambda j: outer(inner(j))").unwrap();
    let tree = stream.finalize().unwrap();

    assert_eq!(annotation_names(&tree), vec!["inner", "outer"]);
    assert_eq!(stream.shape(), &Shape::Any);
}

#[test]
fn test_shape_callback_runs_before_member_callback() {
    let registry = Arc::new(CallbackRegistry::new());
    registry.register(CallbackKey::member("Jet", "pt"), annotating("member"));
    registry.register(CallbackKey::shape("Jet"), annotating("shape"));
    let session = session_with(registry);

    let tree = jets_in(&session).map("lambda j: j.pt()").unwrap().finalize().unwrap();
    assert_eq!(annotation_names(&tree), vec!["shape", "member"]);
}

#[test]
fn test_callback_replaces_the_call() {
    let registry = Arc::new(CallbackRegistry::new());
    registry.register(CallbackKey::member("Jet", "pt"), |stream, call, _| {
        let replacement = match call {
            Expr::Call { func, .. } => match *func {
                Expr::Attribute { base, .. } => base.method("ptCalibrated", vec![]),
                other => other,
            },
            other => other,
        };
        Rewrite::unchanged(stream, replacement)
    });
    let session = session_with(registry);

    let stream = jets_in(&session).map("lambda j: j.pt() * 2").unwrap();
    let tree = stream.finalize().unwrap();
    assert_eq!(
        tree.stages.last().map(stage_source),
        Some("lambda j: j.ptCalibrated() * 2".to_string())
    );
    assert_eq!(stream.shape(), &Shape::Float);
}

#[test]
fn test_parameterized_callback_types_the_call() {
    let registry = Arc::new(CallbackRegistry::new());
    registry.register(CallbackKey::parameterized("Jet", "getAttribute"), |stream, call, type_args| {
        let shape = match type_args {
            [Value::String(name)] => name.parse().unwrap_or(Shape::Any),
            _ => Shape::Any,
        };
        let stream = stream.annotate(metadata([("name", "getAttribute")]));
        Rewrite::unchanged(stream, call).with_shape(shape)
    });
    let session = session_with(registry);

    let widths = jets_in(&session)
        .map("lambda j: j.getAttribute[float]('width')")
        .unwrap();
    assert_eq!(widths.shape(), &Shape::Float);
    assert_eq!(annotation_names(&widths.finalize().unwrap()), vec!["getAttribute"]);
}

#[test]
fn test_captured_type_argument_reaches_the_callback() {
    let registry = Arc::new(CallbackRegistry::new());
    registry.register(CallbackKey::parameterized("Jet", "getAttribute"), |stream, call, type_args| {
        let shape = match type_args {
            [Value::String(name)] => name.parse().unwrap_or(Shape::Any),
            _ => Shape::Any,
        };
        Rewrite::unchanged(stream, call).with_shape(shape)
    });
    let session = session_with(registry);

    let widths = jets_in(&session)
        .map_with(
            "lambda j: j.getAttribute[kind]('x')",
            &Captures::new().literal("kind", "float"),
        )
        .unwrap();
    assert_eq!(widths.shape(), &Shape::Float);
    match widths.finalize().unwrap().stages.last() {
        Some(Stage::Map(l)) => assert_eq!(l.to_string(), "lambda j: j.getAttribute[float]('x')"),
        other => panic!("expected a map stage, got {:?}", other),
    }
}

#[test]
fn test_callback_returning_a_foreign_stream() {
    let registry = Arc::new(CallbackRegistry::new());
    registry.register(CallbackKey::function("deltaR"), |_, call, _| {
        let elsewhere = Session::builder()
            .build()
            .root(RootSource::new("Other", serde_json::Value::Null), Shape::Any);
        Rewrite::unchanged(elsewhere, call)
    });
    let session = session_with(registry);

    assert!(matches!(
        jets_in(&session).map("lambda j: deltaR(j, j)"),
        Err(BuildError::CallbackContractViolation { key, .. }) if key == "function deltaR"
    ));
}

#[test]
fn test_callback_adding_an_operator_stage() {
    let registry = Arc::new(CallbackRegistry::new());
    registry.register(CallbackKey::function("deltaR"), |stream, call, _| {
        match stream.filter("lambda j: True") {
            Ok(filtered) => Rewrite::unchanged(filtered, call),
            Err(_) => Rewrite::unchanged(stream, call),
        }
    });
    let session = session_with(registry);

    assert!(matches!(
        jets_in(&session).map("lambda j: deltaR(j, j)"),
        Err(BuildError::CallbackContractViolation { reason, .. }) if reason.contains("Filter")
    ));
}

#[test]
fn test_registration_inside_a_callback_applies_to_later_calls() {
    let registry = Arc::new(CallbackRegistry::new());
    let inner = Arc::clone(&registry);
    registry.register(CallbackKey::function("deltaR"), move |stream, call, _| {
        inner.register(CallbackKey::member("Jet", "eta"), annotating("eta"));
        Rewrite::unchanged(stream, call)
    });
    let session = session_with(registry);

    let stream = jets_in(&session)
        .map("lambda j: deltaR(j, j) + j.eta()")
        .unwrap();
    assert!(annotation_names(&stream.finalize().unwrap()).is_empty());

    let later = stream.session().registry().snapshot();
    assert!(later.contains(&CallbackKey::member("Jet", "eta")));
}

// ============================================================================
// Finished trees
// ============================================================================

#[test]
fn test_tree_renders_as_nested_calls() {
    let tree = jets()
        .filter("lambda j: j.pt() > 30")
        .unwrap()
        .annotate(metadata([("k", 1)]))
        .finalize()
        .unwrap();

    assert_eq!(
        tree.to_string(),
        "MetaData(Filter(FlatMap(Files(['a.root']), lambda e: e.jets('AntiKt4')), lambda j: j.pt() > 30), {'k': 1})"
    );
}

#[test]
fn test_fingerprint_follows_the_tree() {
    let build = |cut: f64| {
        jets()
            .filter_with("lambda j: j.pt() > cut", &Captures::new().literal("cut", cut))
            .unwrap()
            .finalize()
            .unwrap()
    };

    let a = build(30.0);
    let b = build(30.0);
    let c = build(40.0);
    assert_eq!(a.fingerprint().unwrap(), b.fingerprint().unwrap());
    assert_ne!(a.fingerprint().unwrap(), c.fingerprint().unwrap());
    assert_eq!(a.fingerprint().unwrap().len(), 64);
}

#[test]
fn test_fingerprint_ignores_query_metadata() {
    let plain = jets().finalize().unwrap();
    let tagged = jets()
        .query_metadata(metadata([("title", "jets")]))
        .finalize()
        .unwrap();
    assert_eq!(plain.fingerprint().unwrap(), tagged.fingerprint().unwrap());
}

#[test]
fn test_serialized_stage_layout() {
    let tree = jets().filter("lambda j: j.pt() > 30").unwrap().finalize().unwrap();
    let json: serde_json::Value = serde_json::from_str(&to_json(&tree).unwrap()).unwrap();

    assert_eq!(json["root"]["kind"], "Files");
    assert_eq!(json["stages"][1]["stage"], "filter");
    assert_eq!(json["stages"][1]["arg"]["params"], serde_json::json!(["j"]));
    assert_eq!(json["item_shape"], "Jet");
}

#[test]
fn test_execute_hands_the_tree_to_a_closure() {
    let stream = jets().map("lambda j: j.pt()").unwrap();
    let stages = stream.execute(&|tree: &QueryTree| tree.stages.len()).unwrap();
    assert_eq!(stages, 2);
}
