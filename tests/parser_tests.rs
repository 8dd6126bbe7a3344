// tests/parser_tests.rs

use linqtree::ast::{BinOp, BoolOp, CmpOp, ComprehensionKind, DictEntry, Expr, Target};
use linqtree::lexer::Lexer;
use linqtree::output::unparse;
use linqtree::parser::{ParseError, Parser, parse_expression};
use linqtree::value::Value;

fn parse(source: &str) -> Expr {
    parse_expression(source).unwrap_or_else(|e| panic!("failed to parse {:?}: {}", source, e))
}

fn lambda_body(source: &str) -> Expr {
    match parse(source) {
        Expr::Lambda(lambda) => *lambda.body,
        other => panic!("expected a lambda, got {:?}", other),
    }
}

// ============================================================================
// Precedence
// ============================================================================

#[test]
fn test_arithmetic() {
    // Should be: Add(1, Multiply(2, 3))
    assert_eq!(
        parse("1 + 2 * 3"),
        Expr::literal(1).binop(BinOp::Add, Expr::literal(2).binop(BinOp::Multiply, Expr::literal(3)))
    );
}

#[test]
fn test_parentheses() {
    assert_eq!(
        parse("(1 + 2) * 3"),
        Expr::literal(1).binop(BinOp::Add, Expr::literal(2)).binop(BinOp::Multiply, Expr::literal(3))
    );
}

#[test]
fn test_power_is_right_associative_and_binds_tighter_than_minus() {
    assert_eq!(
        parse("2 ** 3 ** 2"),
        Expr::literal(2).binop(BinOp::Power, Expr::literal(3).binop(BinOp::Power, Expr::literal(2)))
    );
    assert!(matches!(parse("-x ** 2"), Expr::UnaryOp { .. }));
}

#[test]
fn test_negative_literals_fold() {
    assert_eq!(parse("-1"), Expr::Literal(Value::Integer(-1)));
    assert_eq!(parse("-2.5"), Expr::Literal(Value::Float(-2.5)));
}

#[test]
fn test_boolean_operators() {
    assert_eq!(
        parse("a and b or c"),
        Expr::boolop(
            BoolOp::Or,
            vec![Expr::boolop(BoolOp::And, vec![Expr::name("a"), Expr::name("b")]), Expr::name("c")]
        )
    );
}

#[test]
fn test_chained_comparison_splits_into_and() {
    assert_eq!(
        parse("0 < x <= 10"),
        Expr::boolop(
            BoolOp::And,
            vec![
                Expr::literal(0).compare(CmpOp::LessThan, Expr::name("x")),
                Expr::name("x").compare(CmpOp::LessEqual, Expr::literal(10)),
            ]
        )
    );
}

#[test]
fn test_not_in_and_is_not() {
    assert!(matches!(parse("x not in s"), Expr::Compare { op: CmpOp::NotIn, .. }));
    assert!(matches!(parse("x is not None"), Expr::Compare { op: CmpOp::IsNot, .. }));
}

#[test]
fn test_conditional_expression() {
    assert!(matches!(
        lambda_body("lambda j: j.pt() if j.good() else 0"),
        Expr::IfExp { .. }
    ));
}

// ============================================================================
// Calls and access
// ============================================================================

#[test]
fn test_method_call_chain() {
    assert_eq!(
        lambda_body("lambda e: e.jets('AntiKt4').Count()"),
        Expr::name("e")
            .method("jets", vec![Expr::literal("AntiKt4")])
            .method("Count", vec![])
    );
}

#[test]
fn test_keyword_arguments() {
    match parse("f(1, scale=2.0)") {
        Expr::Call { args, keywords, .. } => {
            assert_eq!(args, vec![Expr::literal(1)]);
            assert_eq!(keywords, vec![("scale".to_string(), Expr::literal(2.0))]);
        }
        other => panic!("expected a call, got {:?}", other),
    }
}

#[test]
fn test_parameterized_call_keeps_its_brackets() {
    // The brackets become type arguments only once names are classified
    match lambda_body("lambda j: j.getAttribute[float]('width')") {
        Expr::Call {
            func, type_args, args, ..
        } => {
            assert_eq!(
                *func,
                Expr::name("j").attr("getAttribute").index(Expr::name("float"))
            );
            assert!(type_args.is_empty());
            assert_eq!(args, vec![Expr::literal("width")]);
        }
        other => panic!("expected a call, got {:?}", other),
    }
}

#[test]
fn test_plain_subscript_call_is_not_parameterized() {
    match parse("fs[0](x)") {
        Expr::Call { func, type_args, .. } => {
            assert!(type_args.is_empty());
            assert!(matches!(*func, Expr::Subscript { .. }));
        }
        other => panic!("expected a call, got {:?}", other),
    }
}

#[test]
fn test_dict_and_tuple_literals() {
    assert_eq!(
        parse("{'pt': 1, 'eta': (2, 3)}"),
        Expr::Dict(vec![
            ("pt".into(), Expr::literal(1)),
            ("eta".into(), Expr::Tuple(vec![Expr::literal(2), Expr::literal(3)])),
        ])
    );
    assert_eq!(parse("(1,)"), Expr::Tuple(vec![Expr::literal(1)]));
}

#[test]
fn test_dict_expansion() {
    assert_eq!(
        parse("{**base, 'pt': 1}"),
        Expr::DictMerge(vec![
            DictEntry::Spread(Expr::name("base")),
            DictEntry::Pair("pt".into(), Expr::literal(1)),
        ])
    );
    assert_eq!(
        parse("{**(a if c else b)}"),
        Expr::DictMerge(vec![DictEntry::Spread(Expr::IfExp {
            test: Box::new(Expr::name("c")),
            body: Box::new(Expr::name("a")),
            orelse: Box::new(Expr::name("b")),
        })])
    );
}

#[test]
fn test_adjacent_strings_concatenate() {
    assert_eq!(parse("'Anti' 'Kt4'"), Expr::literal("AntiKt4"));
}

// ============================================================================
// Comprehensions
// ============================================================================

#[test]
fn test_list_comprehension_with_filter() {
    match parse("[j.pt() for j in e.jets() if j.eta() < 2.4]") {
        Expr::Comprehension {
            kind: ComprehensionKind::List,
            generators,
            ..
        } => {
            assert_eq!(generators.len(), 1);
            assert_eq!(generators[0].target, Target::Name("j".into()));
            assert_eq!(generators[0].ifs.len(), 1);
        }
        other => panic!("expected a comprehension, got {:?}", other),
    }
}

#[test]
fn test_generator_as_sole_argument() {
    match parse("sum(j for j in s)") {
        Expr::Call { args, .. } => assert!(matches!(
            args.as_slice(),
            [Expr::Comprehension {
                kind: ComprehensionKind::Generator,
                ..
            }]
        )),
        other => panic!("expected a call, got {:?}", other),
    }
}

#[test]
fn test_tuple_targets_and_multiple_clauses() {
    match parse("[a + b + c for a, b in pairs for c in cs]") {
        Expr::Comprehension { generators, .. } => {
            assert_eq!(
                generators[0].target,
                Target::Tuple(vec![Target::Name("a".into()), Target::Name("b".into())])
            );
            assert_eq!(generators[1].target, Target::Name("c".into()));
        }
        other => panic!("expected a comprehension, got {:?}", other),
    }
}

// ============================================================================
// Rejections
// ============================================================================

#[test]
fn test_statements_are_unsupported() {
    assert!(matches!(
        parse_expression("lambda x: return x"),
        Err(ParseError::Unsupported { .. })
    ));
}

#[test]
fn test_walrus_is_unsupported() {
    assert!(matches!(
        parse_expression("(y := 3)"),
        Err(ParseError::Unsupported { .. })
    ));
}

#[test]
fn test_slices_are_unsupported() {
    assert!(matches!(parse_expression("s[1:2]"), Err(ParseError::Unsupported { .. })));
}

#[test]
fn test_lambda_defaults_are_unsupported() {
    assert!(matches!(
        parse_expression("lambda x=1: x"),
        Err(ParseError::Unsupported { .. })
    ));
}

#[test]
fn test_nesting_within_the_limit_parses() {
    let source = format!("{}1{}", "(".repeat(60), ")".repeat(60));
    assert_eq!(parse(&source), Expr::literal(1));
}

#[test]
fn test_deep_nesting_is_rejected() {
    let parens = format!("{}1{}", "(".repeat(20000), ")".repeat(20000));
    assert!(matches!(
        parse_expression(&parens),
        Err(ParseError::TooDeep { limit: 64, .. })
    ));

    let negations = format!("{}x", "not ".repeat(20000));
    assert!(matches!(
        parse_expression(&negations),
        Err(ParseError::TooDeep { .. })
    ));

    let lambdas = format!("{}x", "lambda x: ".repeat(20000));
    assert!(matches!(
        parse_expression(&lambdas),
        Err(ParseError::TooDeep { .. })
    ));
}

#[test]
fn test_nesting_limit_is_configurable() {
    let source = "[[[[1]]]]";
    let mut shallow = Parser::new(Lexer::new(source)).unwrap().with_max_nesting(3);
    assert!(matches!(shallow.parse(), Err(ParseError::TooDeep { limit: 3, .. })));

    let mut roomy = Parser::new(Lexer::new(source)).unwrap().with_max_nesting(5);
    assert!(roomy.parse().is_ok());
}

#[test]
fn test_trailing_garbage() {
    assert!(matches!(
        parse_expression("x y"),
        Err(ParseError::UnexpectedToken { .. })
    ));
}

// ============================================================================
// Unparsing
// ============================================================================

#[test]
fn test_unparse_round_trips_source() {
    for source in [
        "lambda e: e.jets().Filter(lambda j: j.pt() > 30.0).Count()",
        "lambda j: (j.pt() + 1) * 2",
        "lambda j: j.getAttribute[float]('width')",
        "lambda p: p[0] - p[1] if p[0] > p[1] else -1",
        "lambda e: sum(j.pt() for j in e.jets() if not j.bad())",
        "lambda x: {'a': x, 'b': (x,)}",
        "lambda x: {**x, 'c': 1, **(x if x.ok() else {})}",
        "lambda x: 2 ** -x",
        "lambda x: (-2) ** x",
        "lambda x: not (x or x and x)",
    ] {
        assert_eq!(unparse(&parse(source)), source);
    }
}
