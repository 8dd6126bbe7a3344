// tests/resolve_tests.rs

use std::sync::Arc;

use linqtree::capability::{CapabilityFile, CapabilityModel, FunctionSpec, Param, ShapeDescriptor};
use linqtree::metadata::metadata;
use linqtree::{BuildError, CallbackKey, CallbackRegistry, Rewrite, RootSource, Session, Shape, Stage, Stream};

fn model() -> CapabilityModel {
    CapabilityModel::new()
        .with_shape(
            "Event",
            ShapeDescriptor::new()
                .method(
                    "jets",
                    vec![Param::optional("collection", "AntiKt4")],
                    Shape::sequence(Shape::named("Jet")),
                )
                .method("truth", vec![], Shape::named("Truth"))
                .method("pairs", vec![], Shape::sequence(Shape::named("Pair")))
                .attribute("run_number", Shape::Int),
        )
        .with_shape(
            "Jet",
            ShapeDescriptor::new()
                .method("pt", vec![], Shape::Float)
                .method("eta", vec![], Shape::Float)
                .method("good", vec![], Shape::Bool)
                .method("getAttribute", vec![Param::required("name")], Shape::Any)
                .method("p4", vec![], Shape::named("TLorentzVector")),
        )
        .with_shape("Truth", ShapeDescriptor::new().dynamic())
        .with_shape("Pair", ShapeDescriptor::new())
        .with_shape("TLorentzVector", ShapeDescriptor::new().method("m", vec![], Shape::Float))
        .with_collection(
            "Jet",
            ShapeDescriptor::new()
                .method("sumPt", vec![Param::optional("scale", 1.0)], Shape::Float)
                .attribute("label", Shape::Str),
        )
        .with_function(
            "deltaR",
            FunctionSpec::new(vec![Param::required("a"), Param::required("b")], Shape::Float),
        )
}

fn events_with(registry: Arc<CallbackRegistry>) -> Stream {
    let session = Session::builder().capabilities(model()).registry(registry).build();
    session.root(RootSource::new("Files", serde_json::json!(["events.root"])), Shape::named("Event"))
}

fn events() -> Stream {
    events_with(Arc::new(CallbackRegistry::new()))
}

fn jets() -> Stream {
    events().flat_map("lambda e: e.jets()").unwrap()
}

fn last_lambda(stream: &Stream) -> String {
    match stream.finalize().unwrap().stages.last() {
        Some(Stage::Map(l) | Stage::FlatMap(l) | Stage::Filter(l)) => l.to_string(),
        other => panic!("expected an operator stage, got {:?}", other),
    }
}

// ============================================================================
// Argument binding
// ============================================================================

#[test]
fn test_declared_defaults_are_filled_in() {
    assert_eq!(last_lambda(&jets()), "lambda e: e.jets('AntiKt4')");
}

#[test]
fn test_keyword_arguments_are_bound_by_position() {
    let stream = events()
        .flat_map("lambda e: e.jets(collection='AntiKt10')")
        .unwrap();
    assert_eq!(last_lambda(&stream), "lambda e: e.jets('AntiKt10')");
}

#[test]
fn test_too_many_arguments() {
    assert!(matches!(
        events().flat_map("lambda e: e.jets('a', 'b')"),
        Err(BuildError::UnresolvedCall { .. })
    ));
}

#[test]
fn test_global_function_arguments() {
    let stream = jets().map("lambda j: deltaR(j, j)").unwrap();
    assert_eq!(stream.shape(), &Shape::Float);

    assert!(matches!(
        jets().map("lambda j: deltaR(j)"),
        Err(BuildError::UnresolvedCall { reason, .. }) if reason.contains("'b'")
    ));
}

// ============================================================================
// Shape inference
// ============================================================================

#[test]
fn test_shapes_flow_through_stages() {
    let events = events();
    assert_eq!(events.shape(), &Shape::named("Event"));

    let jets = events.flat_map("lambda e: e.jets()").unwrap();
    assert_eq!(jets.shape(), &Shape::named("Jet"));

    let good = jets.filter("lambda j: j.good()").unwrap();
    assert_eq!(good.shape(), &Shape::named("Jet"));

    let pts = good.map("lambda j: j.pt() / 1000.0").unwrap();
    assert_eq!(pts.shape(), &Shape::Float);
}

#[test]
fn test_record_fields() {
    let records = jets().map("lambda j: {'pt': j.pt(), 'eta': j.eta()}").unwrap();
    assert_eq!(
        records.shape(),
        &Shape::Record(vec![("pt".into(), Shape::Float), ("eta".into(), Shape::Float)])
    );
    assert_eq!(records.map("lambda r: r.pt").unwrap().shape(), &Shape::Float);
    assert_eq!(records.map("lambda r: r['eta']").unwrap().shape(), &Shape::Float);
    assert!(records.map("lambda r: r.phi").is_err());
}

#[test]
fn test_sequence_methods() {
    let counts = events()
        .map("lambda e: e.jets().Filter(lambda j: j.pt() > 30).Count()")
        .unwrap();
    assert_eq!(counts.shape(), &Shape::Int);

    let leading = events().map("lambda e: e.jets().First()").unwrap();
    assert_eq!(leading.shape(), &Shape::named("Jet"));
    assert_eq!(leading.map("lambda j: j.eta()").unwrap().shape(), &Shape::Float);
}

#[test]
fn test_aggregates_take_the_element_shape() {
    let totals = events().map("lambda e: sum(j.pt() for j in e.jets())").unwrap();
    assert_eq!(totals.shape(), &Shape::Float);
    assert_eq!(last_lambda(&totals), "lambda e: Sum(e.jets('AntiKt4').Map(lambda j: j.pt()))");

    let count = events().map("lambda e: len(e.jets())").unwrap();
    assert_eq!(count.shape(), &Shape::Int);
}

#[test]
fn test_attributes() {
    assert_eq!(events().map("lambda e: e.run_number").unwrap().shape(), &Shape::Int);
    assert!(matches!(
        events().map("lambda e: e.run_number()"),
        Err(BuildError::UnresolvedCall { reason, .. }) if reason.contains("attribute")
    ));
}

#[test]
fn test_conditional_branches_join() {
    let stream = jets().map("lambda j: j.pt() if j.good() else 0").unwrap();
    assert_eq!(stream.shape(), &Shape::Float);

    assert!(matches!(
        jets().map("lambda j: j.pt() if j.good() else 'none'"),
        Err(BuildError::ShapeMismatch { .. })
    ));
}

#[test]
fn test_indexing_a_declared_shape_is_untyped() {
    let sums = events().map("lambda e: [a + b for a, b in e.pairs()]").unwrap();
    assert_eq!(sums.shape(), &Shape::sequence(Shape::Any));
    assert_eq!(last_lambda(&sums), "lambda e: e.pairs().Map(lambda t_0: t_0[0] + t_0[1])");
}

#[test]
fn test_arithmetic_on_declared_shapes_is_untyped() {
    let masses = jets().map("lambda j: (j.p4() + j.p4()).m()").unwrap();
    assert_eq!(masses.shape(), &Shape::Any);
    assert_eq!(last_lambda(&masses), "lambda j: (j.p4() + j.p4()).m()");

    assert_eq!(jets().map("lambda j: j.p4() * 2").unwrap().shape(), &Shape::Any);
    assert_eq!(jets().map("lambda j: -j.p4()").unwrap().shape(), &Shape::Any);
}

// ============================================================================
// Collection members
// ============================================================================

#[test]
fn test_collection_methods_bind_defaults() {
    let totals = events().map("lambda e: e.jets().sumPt()").unwrap();
    assert_eq!(totals.shape(), &Shape::Float);
    assert_eq!(last_lambda(&totals), "lambda e: e.jets('AntiKt4').sumPt(1.0)");

    let scaled = events().map("lambda e: e.jets().sumPt(scale=0.5)").unwrap();
    assert_eq!(last_lambda(&scaled), "lambda e: e.jets('AntiKt4').sumPt(0.5)");
}

#[test]
fn test_collection_attributes() {
    let labels = events().map("lambda e: e.jets().label").unwrap();
    assert_eq!(labels.shape(), &Shape::Str);
}

#[test]
fn test_collection_members_reach_member_callbacks() {
    let registry = Arc::new(CallbackRegistry::new());
    registry.register(CallbackKey::member("Sequence[Jet]", "sumPt"), |stream, call, _| {
        Rewrite::unchanged(stream.annotate(metadata([("name", "sumPt")])), call).with_shape(Shape::Int)
    });

    let totals = events_with(registry).map("lambda e: e.jets().sumPt()").unwrap();
    assert_eq!(totals.shape(), &Shape::Int);
    let names: Vec<String> = totals
        .finalize()
        .unwrap()
        .annotations()
        .filter_map(|m| m.get("name").and_then(|v| v.as_str()).map(String::from))
        .collect();
    assert_eq!(names, vec!["sumPt"]);
}

#[test]
fn test_builtin_sequence_methods_win_over_collection_members() {
    let counts = events().map("lambda e: e.jets().Count()").unwrap();
    assert_eq!(counts.shape(), &Shape::Int);
}

#[test]
fn test_undeclared_collection_method() {
    assert!(matches!(
        events().map("lambda e: e.jets().avgPt()"),
        Err(BuildError::UnresolvedCall { reason, .. }) if reason.contains("'avgPt'")
    ));
    assert!(matches!(
        events().map("lambda e: e.pairs().sumPt()"),
        Err(BuildError::UnresolvedCall { reason, .. }) if reason.contains("has no method")
    ));
}

// ============================================================================
// Unresolved calls
// ============================================================================

#[test]
fn test_undeclared_member() {
    assert!(matches!(
        jets().map("lambda j: j.phi()"),
        Err(BuildError::UnresolvedCall { call, reason })
            if call == "j.phi()" && reason.contains("'Jet' has no member 'phi'")
    ));
}

#[test]
fn test_undeclared_member_inside_nested_lambda() {
    assert!(matches!(
        events().map("lambda e: e.jets().Map(lambda j: j.phi())"),
        Err(BuildError::UnresolvedCall { .. })
    ));
}

#[test]
fn test_undeclared_shape() {
    let session = Session::builder()
        .capabilities(model())
        .registry(Arc::new(CallbackRegistry::new()))
        .build();
    let ghosts = session.root(RootSource::new("Files", serde_json::Value::Null), Shape::named("Ghost"));
    assert!(matches!(
        ghosts.map("lambda g: g.x()"),
        Err(BuildError::UnresolvedCall { reason, .. }) if reason.contains("not declared")
    ));
}

#[test]
fn test_undeclared_function() {
    assert!(matches!(
        jets().map("lambda j: mystery(j)"),
        Err(BuildError::UnresolvedCall { reason, .. }) if reason.contains("mystery")
    ));
}

#[test]
fn test_dynamic_shapes_accept_any_member() {
    let stream = events().map("lambda e: e.truth().whatever(1, 2)").unwrap();
    assert_eq!(stream.shape(), &Shape::Any);
}

#[test]
fn test_untyped_values_pass_through() {
    let session = Session::builder()
        .capabilities(model())
        .registry(Arc::new(CallbackRegistry::new()))
        .build();
    let items = session.root(RootSource::new("Files", serde_json::Value::Null), Shape::Any);
    let stream = items.map("lambda x: x.anything().at_all").unwrap();
    assert_eq!(stream.shape(), &Shape::Any);
}

#[test]
fn test_parameterized_call_without_callback_is_untyped() {
    let stream = jets().map("lambda j: j.getAttribute[float]('width')").unwrap();
    assert_eq!(stream.shape(), &Shape::Any);
    assert_eq!(last_lambda(&stream), "lambda j: j.getAttribute[float]('width')");
}

// ============================================================================
// Shape mismatches
// ============================================================================

#[test]
fn test_flat_map_needs_a_sequence() {
    assert!(matches!(
        jets().flat_map("lambda j: j.pt()"),
        Err(BuildError::ShapeMismatch { reason, .. }) if reason.contains("sequence")
    ));
}

#[test]
fn test_filter_needs_a_bool() {
    assert!(matches!(
        jets().filter("lambda j: j.pt()"),
        Err(BuildError::ShapeMismatch { reason, .. }) if reason.contains("bool")
    ));
    assert!(jets().filter("lambda j: j.getAttribute('good')").is_ok());
}

#[test]
fn test_arithmetic_on_strings() {
    assert!(matches!(
        jets().map("lambda j: j.pt() + 'GeV'"),
        Err(BuildError::ShapeMismatch { .. })
    ));
}

// ============================================================================
// Capability files
// ============================================================================

#[test]
fn test_capability_file_drives_resolution() {
    let file = CapabilityFile::from_json(
        r#"{
            "shapes": {
                "Event": {"members": {"electrons": {"returns": "Sequence[Electron]"}}},
                "Electron": {"members": {"charge": {"returns": "int"}, "pt": {}}}
            }
        }"#,
    )
    .unwrap();
    let session = Session::builder()
        .capabilities(file.model)
        .config(file.config)
        .registry(Arc::new(CallbackRegistry::new()))
        .build();
    let electrons = session
        .root(RootSource::new("Files", serde_json::Value::Null), Shape::named("Event"))
        .flat_map("lambda e: e.electrons()")
        .unwrap();

    assert_eq!(electrons.map("lambda el: el.charge()").unwrap().shape(), &Shape::Int);
    // Declared without a return shape
    assert_eq!(electrons.map("lambda el: el.pt()").unwrap().shape(), &Shape::Any);
}

#[test]
fn test_capability_file_declares_collections() {
    let file = CapabilityFile::from_json(
        r#"{
            "shapes": {
                "Event": {"members": {"electrons": {"returns": "Sequence[Electron]"}}},
                "Electron": {"members": {"charge": {"returns": "int"}}}
            },
            "collections": {
                "Electron": {"members": {"totalCharge": {"returns": "int"}}}
            }
        }"#,
    )
    .unwrap();
    let session = Session::builder()
        .capabilities(file.model)
        .registry(Arc::new(CallbackRegistry::new()))
        .build();
    let charges = session
        .root(RootSource::new("Files", serde_json::Value::Null), Shape::named("Event"))
        .map("lambda e: e.electrons().totalCharge()")
        .unwrap();
    assert_eq!(charges.shape(), &Shape::Int);
}
