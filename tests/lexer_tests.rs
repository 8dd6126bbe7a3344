// tests/lexer_tests.rs

use linqtree::ast::Token;
use linqtree::lexer::{LexError, Lexer, Position};

fn tokens(source: &str) -> Vec<Token> {
    let mut lexer = Lexer::new(source);
    let mut out = vec![];
    loop {
        let token = lexer.next_token().unwrap();
        if token == Token::Eof {
            return out;
        }
        out.push(token);
    }
}

fn lex_error(source: &str) -> LexError {
    let mut lexer = Lexer::new(source);
    loop {
        match lexer.next_token() {
            Ok(Token::Eof) => panic!("expected a lex error for {:?}", source),
            Ok(_) => continue,
            Err(e) => return e,
        }
    }
}

// ============================================================================
// Literals
// ============================================================================

#[test]
fn test_numbers() {
    assert_eq!(
        tokens("42 3.5 .5 1e3 2.5e-1"),
        vec![
            Token::Integer(42),
            Token::Float(3.5),
            Token::Float(0.5),
            Token::Float(1000.0),
            Token::Float(0.25),
        ]
    );
}

#[test]
fn test_strings_in_either_quote() {
    assert_eq!(
        tokens(r#"'AntiKt4' "pt" 'it\'s'"#),
        vec![
            Token::String("AntiKt4".into()),
            Token::String("pt".into()),
            Token::String("it's".into()),
        ]
    );
}

#[test]
fn test_constants() {
    assert_eq!(
        tokens("True False None"),
        vec![Token::Boolean(true), Token::Boolean(false), Token::None]
    );
}

// ============================================================================
// Operators and keywords
// ============================================================================

#[test]
fn test_two_character_operators() {
    assert_eq!(
        tokens("** // == != <= >= :="),
        vec![
            Token::DoubleStar,
            Token::DoubleSlash,
            Token::EqEq,
            Token::NotEq,
            Token::LtEq,
            Token::GtEq,
            Token::ColonEqual,
        ]
    );
}

#[test]
fn test_comprehension_keywords() {
    assert_eq!(
        tokens("[x for x in s if not x]"),
        vec![
            Token::LBracket,
            Token::Identifier("x".into()),
            Token::For,
            Token::Identifier("x".into()),
            Token::In,
            Token::Identifier("s".into()),
            Token::If,
            Token::Not,
            Token::Identifier("x".into()),
            Token::RBracket,
        ]
    );
}

#[test]
fn test_statement_keywords_are_reserved() {
    assert_eq!(tokens("return"), vec![Token::Reserved("return".into())]);
    assert_eq!(tokens("import"), vec![Token::Reserved("import".into())]);
}

#[test]
fn test_method_call_after_dot() {
    assert_eq!(
        tokens("j.pt()"),
        vec![
            Token::Identifier("j".into()),
            Token::Dot,
            Token::Identifier("pt".into()),
            Token::LParen,
            Token::RParen,
        ]
    );
}

// ============================================================================
// Errors
// ============================================================================

#[test]
fn test_unterminated_string() {
    assert!(matches!(
        lex_error("lambda x: 'abc"),
        LexError::UnterminatedString {
            at: Position { line: 1, column: 11 }
        }
    ));
}

#[test]
fn test_unexpected_character() {
    assert!(matches!(lex_error("x $ y"), LexError::UnexpectedChar { ch: '$', .. }));
}

#[test]
fn test_spans_point_at_token_start() {
    let mut lexer = Lexer::new("lambda e:\n  e.jets()");
    let mut last = None;
    loop {
        let (token, at) = lexer.next_spanned().unwrap();
        if token == Token::Identifier("jets".into()) {
            last = Some(at);
        }
        if token == Token::Eof {
            break;
        }
    }
    assert_eq!(last, Some(Position { line: 2, column: 5 }));
}
