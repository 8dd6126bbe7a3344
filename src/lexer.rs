use thiserror::Error;

use crate::ast::Token;

/// Line and column (both 1-based) of a character in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LexError {
    #[error("unexpected character '{ch}' at {at}")]
    UnexpectedChar { ch: char, at: Position },

    #[error("unterminated string starting at {at}")]
    UnterminatedString { at: Position },

    #[error("invalid escape sequence \\{ch} at {at}")]
    InvalidEscape { ch: char, at: Position },

    #[error("invalid number literal '{text}' at {at}")]
    InvalidNumber { text: String, at: Position },
}

const RESERVED: &[&str] = &[
    "def", "return", "while", "import", "from", "class", "yield", "with", "try", "except",
    "finally", "raise", "del", "pass", "global", "nonlocal", "assert", "async", "await",
    "break", "continue", "elif",
];

pub struct Lexer {
    input: Vec<char>,
    position: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Lexer {
            input: input.chars().collect(),
            position: 0,
        }
    }

    fn current_char(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek_char(&self, offset: usize) -> Option<char> {
        self.input.get(self.position + offset).copied()
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    /// Position of the next unread character
    pub fn position(&self) -> Position {
        let consumed = &self.input[..self.position.min(self.input.len())];
        let line = consumed.iter().filter(|c| **c == '\n').count() + 1;
        let column = consumed.iter().rev().take_while(|c| **c != '\n').count() + 1;
        Position { line, column }
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current_char() {
            if ch.is_whitespace() || (ch == '\\' && self.peek_char(1) == Some('\n')) {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_identifier(&mut self) -> String {
        let mut result = String::new();
        while let Some(ch) = self.current_char() {
            if ch.is_alphanumeric() || ch == '_' {
                result.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        result
    }

    fn read_string(&mut self, quote: char) -> Result<String, LexError> {
        let start = self.position();
        let mut result = String::new();
        self.advance(); // Consume opening quote

        while let Some(ch) = self.current_char() {
            match ch {
                c if c == quote => {
                    self.advance();
                    return Ok(result);
                }
                '\\' => {
                    self.advance(); // Consume backslash
                    match self.current_char() {
                        Some('n') => result.push('\n'),
                        Some('t') => result.push('\t'),
                        Some('r') => result.push('\r'),
                        Some('0') => result.push('\0'),
                        Some(c @ ('"' | '\'' | '\\')) => result.push(c),
                        Some(ch) => {
                            return Err(LexError::InvalidEscape {
                                ch,
                                at: self.position(),
                            });
                        }
                        None => return Err(LexError::UnterminatedString { at: start }),
                    }
                    self.advance();
                }
                _ => {
                    result.push(ch);
                    self.advance();
                }
            }
        }

        Err(LexError::UnterminatedString { at: start })
    }

    fn read_number(&mut self) -> Result<Token, LexError> {
        let start = self.position();
        let mut number = String::new();
        let mut is_float = false;

        while let Some(ch) = self.current_char() {
            if ch.is_ascii_digit() || ch == '_' {
                if ch != '_' {
                    number.push(ch);
                }
                self.advance();
            } else if ch == '.' && !is_float && self.peek_char(1).is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                number.push(ch);
                self.advance();
            } else if (ch == 'e' || ch == 'E')
                && (self.peek_char(1).is_some_and(|c| c.is_ascii_digit())
                    || (matches!(self.peek_char(1), Some('+' | '-'))
                        && self.peek_char(2).is_some_and(|c| c.is_ascii_digit())))
            {
                is_float = true;
                number.push(ch);
                self.advance();
                if let Some(sign @ ('+' | '-')) = self.current_char() {
                    number.push(sign);
                    self.advance();
                }
            } else {
                break;
            }
        }

        let invalid = || LexError::InvalidNumber {
            text: number.clone(),
            at: start,
        };
        if is_float {
            number.parse::<f64>().map(Token::Float).map_err(|_| invalid())
        } else {
            number.parse::<i64>().map(Token::Integer).map_err(|_| invalid())
        }
    }

    /// Consume `second` if it is next, producing `double`, otherwise `single`
    fn one_or_two(&mut self, second: char, double: Token, single: Token) -> Token {
        self.advance();
        if self.current_char() == Some(second) {
            self.advance();
            double
        } else {
            single
        }
    }

    /// Next token together with the position where it starts
    pub fn next_spanned(&mut self) -> Result<(Token, Position), LexError> {
        self.skip_whitespace();
        let at = self.position();
        Ok((self.next_token()?, at))
    }

    pub fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_whitespace();

        let token = match self.current_char() {
            None => Token::Eof,
            Some('.') if self.peek_char(1).is_some_and(|c| c.is_ascii_digit()) => {
                self.read_number()?
            }
            Some('.') => {
                self.advance();
                Token::Dot
            }
            Some(',') => {
                self.advance();
                Token::Comma
            }
            Some('+') => {
                self.advance();
                Token::Plus
            }
            Some('-') => {
                self.advance();
                Token::Minus
            }
            Some('*') => self.one_or_two('*', Token::DoubleStar, Token::Star),
            Some('/') => self.one_or_two('/', Token::DoubleSlash, Token::Slash),
            Some('%') => {
                self.advance();
                Token::Percent
            }
            Some('=') => self.one_or_two('=', Token::EqEq, Token::Assign),
            Some(':') => self.one_or_two('=', Token::ColonEqual, Token::Colon),
            Some('>') => self.one_or_two('=', Token::GtEq, Token::Gt),
            Some('<') => self.one_or_two('=', Token::LtEq, Token::Lt),
            Some('!') if self.peek_char(1) == Some('=') => {
                self.advance();
                self.advance();
                Token::NotEq
            }
            Some('{') => {
                self.advance();
                Token::LBrace
            }
            Some('}') => {
                self.advance();
                Token::RBrace
            }
            Some('"') => Token::String(self.read_string('"')?),
            Some('\'') => Token::String(self.read_string('\'')?),
            Some('(') => {
                self.advance();
                Token::LParen
            }
            Some(')') => {
                self.advance();
                Token::RParen
            }
            Some('[') => {
                self.advance();
                Token::LBracket
            }
            Some(']') => {
                self.advance();
                Token::RBracket
            }
            Some(ch) if ch.is_alphabetic() || ch == '_' => {
                let ident = self.read_identifier();

                match ident.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "is" => Token::Is,
                    "in" => Token::In,
                    "for" => Token::For,
                    "if" => Token::If,
                    "else" => Token::Else,
                    "lambda" => Token::Lambda,
                    "True" => Token::Boolean(true),
                    "False" => Token::Boolean(false),
                    "None" => Token::None,
                    word if RESERVED.contains(&word) => Token::Reserved(ident),
                    _ => Token::Identifier(ident),
                }
            }
            Some(ch) if ch.is_ascii_digit() => self.read_number()?,
            Some(ch) => {
                return Err(LexError::UnexpectedChar {
                    ch,
                    at: self.position(),
                });
            }
        };
        Ok(token)
    }
}

#[test]
fn test_keywords() {
    let mut lexer = Lexer::new("and or not in True False None lambda");
    assert_eq!(lexer.next_token().unwrap(), Token::And);
    assert_eq!(lexer.next_token().unwrap(), Token::Or);
    assert_eq!(lexer.next_token().unwrap(), Token::Not);
    assert_eq!(lexer.next_token().unwrap(), Token::In);
    assert_eq!(lexer.next_token().unwrap(), Token::Boolean(true));
    assert_eq!(lexer.next_token().unwrap(), Token::Boolean(false));
    assert_eq!(lexer.next_token().unwrap(), Token::None);
    assert_eq!(lexer.next_token().unwrap(), Token::Lambda);
    assert_eq!(lexer.next_token().unwrap(), Token::Eof);
}

#[test]
fn test_lambda_header() {
    let mut lexer = Lexer::new("lambda e: e.jets()");
    assert_eq!(lexer.next_token().unwrap(), Token::Lambda);
    assert_eq!(lexer.next_token().unwrap(), Token::Identifier("e".to_string()));
    assert_eq!(lexer.next_token().unwrap(), Token::Colon);
    assert_eq!(lexer.next_token().unwrap(), Token::Identifier("e".to_string()));
    assert_eq!(lexer.next_token().unwrap(), Token::Dot);
    assert_eq!(lexer.next_token().unwrap(), Token::Identifier("jets".to_string()));
    assert_eq!(lexer.next_token().unwrap(), Token::LParen);
    assert_eq!(lexer.next_token().unwrap(), Token::RParen);
}

#[test]
fn test_position_tracks_lines() {
    let mut lexer = Lexer::new("a\n  $");
    assert_eq!(lexer.next_token().unwrap(), Token::Identifier("a".to_string()));
    match lexer.next_token() {
        Err(LexError::UnexpectedChar { ch: '$', at }) => {
            assert_eq!(at, Position { line: 2, column: 3 })
        }
        other => panic!("expected unexpected-char error, got {:?}", other),
    }
}
