use std::mem;

use thiserror::Error;

use crate::{
    ast::{
        BinOp, BoolOp, CmpOp, ComprehensionKind, DictEntry, Expr, Generator, Lambda, Target, Token,
        UnaryOp,
    },
    lexer::{LexError, Lexer, Position},
    value::Value,
};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error(transparent)]
    Lex(#[from] LexError),

    #[error("expected {expected}, found {found} at {at}")]
    UnexpectedToken {
        expected: String,
        found: String,
        at: Position,
    },

    #[error("{construct} is not supported in a quoted expression (at {at})")]
    Unsupported { construct: String, at: Position },

    #[error("expression nests deeper than {limit} levels (at {at})")]
    TooDeep { limit: usize, at: Position },
}

/// Nesting levels a [`Parser`] accepts unless told otherwise.
pub const MAX_NESTING: usize = 64;

/// Parse a complete expression from source text.
///
/// Every identifier comes back as [`Expr::Name`]; telling parameters,
/// captures and global symbols apart is the quoting layer's job.
///
/// # Example
/// ```
/// use linqtree::parser::parse_expression;
///
/// let expr = parse_expression("lambda j: j.pt() > 30").unwrap();
/// assert!(matches!(expr, linqtree::Expr::Lambda(_)));
/// ```
pub fn parse_expression(source: &str) -> Result<Expr, ParseError> {
    Parser::new(Lexer::new(source))?.parse()
}

pub struct Parser {
    lexer: Lexer,
    current_token: Token,
    current_at: Position,
    depth: usize,
    max_nesting: usize,
}

impl Parser {
    pub fn new(mut lexer: Lexer) -> Result<Self, ParseError> {
        let (current_token, current_at) = lexer.next_spanned()?;
        Ok(Parser {
            lexer,
            current_token,
            current_at,
            depth: 0,
            max_nesting: MAX_NESTING,
        })
    }

    /// Reject input whose brackets, lambdas or prefix operators nest more
    /// than `limit` levels deep
    pub fn with_max_nesting(mut self, limit: usize) -> Self {
        self.max_nesting = limit;
        self
    }

    fn nested<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, ParseError>,
    ) -> Result<T, ParseError> {
        if self.depth >= self.max_nesting {
            return Err(ParseError::TooDeep {
                limit: self.max_nesting,
                at: self.current_at,
            });
        }
        self.depth += 1;
        let result = parse(self);
        self.depth -= 1;
        result
    }

    fn advance(&mut self) -> Result<(), ParseError> {
        let (token, at) = self.lexer.next_spanned()?;
        self.current_token = token;
        self.current_at = at;
        Ok(())
    }

    fn check(&self, token: &Token) -> bool {
        mem::discriminant(&self.current_token) == mem::discriminant(token)
    }

    fn expect(&mut self, expected: Token) -> Result<(), ParseError> {
        if !self.check(&expected) {
            return Err(self.unexpected(&format!("{:?}", expected)));
        }
        self.advance()
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        ParseError::UnexpectedToken {
            expected: expected.to_string(),
            found: format!("{:?}", self.current_token),
            at: self.current_at,
        }
    }

    fn unsupported(&self, construct: &str) -> ParseError {
        ParseError::Unsupported {
            construct: construct.to_string(),
            at: self.current_at,
        }
    }

    fn expect_identifier(&mut self) -> Result<String, ParseError> {
        match mem::replace(&mut self.current_token, Token::Eof) {
            Token::Identifier(name) => {
                self.advance()?;
                Ok(name)
            }
            other => {
                self.current_token = other;
                Err(self.unexpected("identifier"))
            }
        }
    }

    pub fn parse(&mut self) -> Result<Expr, ParseError> {
        let expr = self.parse_expression()?;
        if self.check(&Token::ColonEqual) {
            return Err(self.unsupported("assignment expression (:=)"));
        }
        self.expect(Token::Eof)?;
        Ok(expr)
    }

    /// expression := lambda | conditional
    pub fn parse_expression(&mut self) -> Result<Expr, ParseError> {
        self.nested(Self::expression)
    }

    fn expression(&mut self) -> Result<Expr, ParseError> {
        if let Token::Reserved(word) = &self.current_token {
            return Err(self.unsupported(&format!("statement '{}'", word)));
        }
        if self.check(&Token::Lambda) {
            return self.parse_lambda();
        }

        let body = self.parse_or()?;
        if !self.check(&Token::If) {
            return Ok(body);
        }
        self.advance()?; // consume 'if'
        let test = self.parse_or()?;
        self.expect(Token::Else)?;
        let orelse = self.parse_expression()?;
        Ok(Expr::IfExp {
            test: Box::new(test),
            body: Box::new(body),
            orelse: Box::new(orelse),
        })
    }

    fn parse_lambda(&mut self) -> Result<Expr, ParseError> {
        self.advance()?; // consume 'lambda'

        let mut params = vec![];
        while !self.check(&Token::Colon) {
            params.push(self.expect_identifier()?);
            if self.check(&Token::Assign) {
                return Err(self.unsupported("lambda parameter default"));
            }
            if !self.check(&Token::Colon) {
                self.expect(Token::Comma)?;
            }
        }
        self.expect(Token::Colon)?;

        let body = self.parse_expression()?;
        Ok(Expr::Lambda(Lambda::new(params, body)))
    }

    fn parse_or(&mut self) -> Result<Expr, ParseError> {
        let first = self.parse_and()?;
        if !self.check(&Token::Or) {
            return Ok(first);
        }

        let mut values = vec![first];
        while self.check(&Token::Or) {
            self.advance()?;
            values.push(self.parse_and()?);
        }
        Ok(Expr::boolop(BoolOp::Or, values))
    }

    fn parse_and(&mut self) -> Result<Expr, ParseError> {
        let first = self.parse_not()?;
        if !self.check(&Token::And) {
            return Ok(first);
        }

        let mut values = vec![first];
        while self.check(&Token::And) {
            self.advance()?;
            values.push(self.parse_not()?);
        }
        Ok(Expr::boolop(BoolOp::And, values))
    }

    fn parse_not(&mut self) -> Result<Expr, ParseError> {
        if self.check(&Token::Not) {
            self.advance()?;
            let operand = self.nested(Self::parse_not)?;
            return Ok(Expr::UnaryOp {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.parse_comparison()
    }

    fn comparison_operator(&mut self) -> Result<Option<CmpOp>, ParseError> {
        let op = match &self.current_token {
            Token::EqEq => CmpOp::Equal,
            Token::NotEq => CmpOp::NotEqual,
            Token::Lt => CmpOp::LessThan,
            Token::Gt => CmpOp::GreaterThan,
            Token::LtEq => CmpOp::LessEqual,
            Token::GtEq => CmpOp::GreaterEqual,
            Token::In => CmpOp::In,
            Token::Not => {
                self.advance()?;
                if !self.check(&Token::In) {
                    return Err(self.unexpected("'in' after 'not'"));
                }
                CmpOp::NotIn
            }
            Token::Is => {
                self.advance()?;
                if self.check(&Token::Not) {
                    self.advance()?;
                    return Ok(Some(CmpOp::IsNot));
                }
                return Ok(Some(CmpOp::Is));
            }
            _ => return Ok(None),
        };
        self.advance()?;
        Ok(Some(op))
    }

    /// Chained comparisons `a < b < c` become `a < b and b < c`
    fn parse_comparison(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_arith()?;
        let mut links = vec![];

        while let Some(op) = self.comparison_operator()? {
            let right = self.parse_arith()?;
            links.push(left.clone().compare(op, right.clone()));
            left = right;
        }

        Ok(match links.len() {
            0 => left,
            1 => links.remove(0),
            _ => Expr::boolop(BoolOp::And, links),
        })
    }

    fn parse_arith(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_term()?;

        loop {
            let op = match &self.current_token {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Subtract,
                _ => break,
            };
            self.advance()?;
            let right = self.parse_term()?;
            left = left.binop(op, right);
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;

        loop {
            let op = match &self.current_token {
                Token::Star => BinOp::Multiply,
                Token::Slash => BinOp::Divide,
                Token::DoubleSlash => BinOp::FloorDivide,
                Token::Percent => BinOp::Modulo,
                _ => break,
            };
            self.advance()?;
            let right = self.parse_unary()?;
            left = left.binop(op, right);
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        let op = match &self.current_token {
            Token::Minus => UnaryOp::Negate,
            Token::Plus => UnaryOp::Plus,
            _ => return self.parse_power(),
        };
        self.advance()?;
        let operand = self.nested(Self::parse_unary)?;

        // Fold signs on numeric literals so `-1` stays a plain literal
        Ok(match (op, operand) {
            (UnaryOp::Negate, Expr::Literal(Value::Integer(n))) => Expr::Literal(Value::Integer(-n)),
            (UnaryOp::Negate, Expr::Literal(Value::Float(n))) => Expr::Literal(Value::Float(-n)),
            (op, operand) => Expr::UnaryOp {
                op,
                operand: Box::new(operand),
            },
        })
    }

    /// `**` binds tighter than unary minus on its left and is right-associative
    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let base = self.parse_postfix()?;
        if self.check(&Token::DoubleStar) {
            self.advance()?;
            let exponent = self.nested(Self::parse_unary)?;
            return Ok(base.binop(BinOp::Power, exponent));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.parse_primary()?;

        loop {
            match &self.current_token {
                Token::Dot => {
                    self.advance()?;
                    let name = self.expect_identifier()?;
                    expr = expr.attr(&name);
                }
                Token::LBracket => {
                    self.advance()?;
                    let index = self.parse_subscript()?;
                    self.expect(Token::RBracket)?;
                    expr = expr.index(index);
                }
                Token::LParen => {
                    self.advance()?;
                    let (args, keywords) = self.parse_arguments()?;
                    self.expect(Token::RParen)?;
                    expr = Expr::Call {
                        func: Box::new(expr),
                        args,
                        keywords,
                        type_args: vec![],
                    };
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_subscript(&mut self) -> Result<Expr, ParseError> {
        if self.check(&Token::Colon) {
            return Err(self.unsupported("slice"));
        }
        let first = self.parse_expression()?;
        if self.check(&Token::Colon) {
            return Err(self.unsupported("slice"));
        }
        if !self.check(&Token::Comma) {
            return Ok(first);
        }

        let mut items = vec![first];
        while self.check(&Token::Comma) {
            self.advance()?;
            if self.check(&Token::RBracket) {
                break;
            }
            items.push(self.parse_expression()?);
        }
        Ok(Expr::Tuple(items))
    }

    /// Positional and keyword arguments up to (not including) `)`.
    ///
    /// A lone generator expression may be passed without its own parentheses.
    fn parse_arguments(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), ParseError> {
        let mut args = vec![];
        let mut keywords: Vec<(String, Expr)> = vec![];

        while !self.check(&Token::RParen) {
            if self.check(&Token::Star) || self.check(&Token::DoubleStar) {
                return Err(self.unsupported("argument unpacking"));
            }
            let arg = self.parse_expression()?;

            if self.check(&Token::For) {
                if !args.is_empty() || !keywords.is_empty() {
                    return Err(self.unsupported("unparenthesized generator among other arguments"));
                }
                let generators = self.parse_generators()?;
                args.push(Expr::Comprehension {
                    kind: ComprehensionKind::Generator,
                    element: Box::new(arg),
                    generators,
                });
                if !self.check(&Token::RParen) {
                    return Err(self.unexpected("')' after generator argument"));
                }
                break;
            }

            if self.check(&Token::Assign) {
                let Expr::Name(name) = arg else {
                    return Err(self.unexpected("keyword name before '='"));
                };
                self.advance()?;
                let value = self.parse_expression()?;
                keywords.push((name, value));
            } else if !keywords.is_empty() {
                return Err(self.unexpected("keyword argument after keyword arguments"));
            } else {
                args.push(arg);
            }

            if !self.check(&Token::RParen) {
                self.expect(Token::Comma)?;
            }
        }
        Ok((args, keywords))
    }

    /// One or more `for target in iter [if cond]...` clauses
    fn parse_generators(&mut self) -> Result<Vec<Generator>, ParseError> {
        let mut generators = vec![];

        while self.check(&Token::For) {
            self.advance()?;
            let target = self.parse_target_list()?;
            self.expect(Token::In)?;
            let iter = self.parse_or()?;

            let mut ifs = vec![];
            while self.check(&Token::If) {
                self.advance()?;
                ifs.push(self.parse_or()?);
            }
            generators.push(Generator { target, iter, ifs });
        }
        Ok(generators)
    }

    fn parse_target_list(&mut self) -> Result<Target, ParseError> {
        let first = self.parse_target()?;
        if !self.check(&Token::Comma) {
            return Ok(first);
        }

        let mut items = vec![first];
        while self.check(&Token::Comma) {
            self.advance()?;
            if self.check(&Token::In) {
                break;
            }
            items.push(self.parse_target()?);
        }
        Ok(Target::Tuple(items))
    }

    fn parse_target(&mut self) -> Result<Target, ParseError> {
        if self.check(&Token::LParen) || self.check(&Token::LBracket) {
            let close = if self.check(&Token::LParen) {
                Token::RParen
            } else {
                Token::RBracket
            };
            self.advance()?;
            let inner = self.nested(Self::parse_target_list)?;
            self.expect(close)?;
            return Ok(inner);
        }
        Ok(Target::Name(self.expect_identifier()?))
    }

    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        let literal = match mem::replace(&mut self.current_token, Token::Eof) {
            Token::Integer(n) => Value::Integer(n),
            Token::Float(n) => Value::Float(n),
            Token::String(s) => {
                let mut s = s;
                // Adjacent string literals concatenate
                self.advance()?;
                while let Token::String(next) = &self.current_token {
                    s.push_str(next);
                    self.advance()?;
                }
                return Ok(Expr::Literal(Value::String(s)));
            }
            Token::Boolean(b) => Value::Boolean(b),
            Token::None => Value::None,
            Token::Identifier(name) => {
                self.advance()?;
                return Ok(Expr::Name(name));
            }
            Token::LParen => {
                self.advance()?;
                return self.parse_parenthesized();
            }
            Token::LBracket => {
                self.advance()?;
                return self.parse_list();
            }
            Token::LBrace => {
                self.advance()?;
                return self.parse_dict();
            }
            token => {
                self.current_token = token;
                return Err(match &self.current_token {
                    Token::Reserved(word) => self.unsupported(&format!("statement '{}'", word)),
                    Token::ColonEqual => self.unsupported("assignment expression (:=)"),
                    _ => self.unexpected("expression"),
                });
            }
        };
        self.advance()?;
        Ok(Expr::Literal(literal))
    }

    /// `()`, `(x)`, `(x,)`, `(x, y)` or `(x for x in s)`, after the `(`
    fn parse_parenthesized(&mut self) -> Result<Expr, ParseError> {
        if self.check(&Token::RParen) {
            self.advance()?;
            return Ok(Expr::Tuple(vec![]));
        }

        let first = self.parse_expression()?;
        if self.check(&Token::For) {
            let generators = self.parse_generators()?;
            self.expect(Token::RParen)?;
            return Ok(Expr::Comprehension {
                kind: ComprehensionKind::Generator,
                element: Box::new(first),
                generators,
            });
        }
        if self.check(&Token::ColonEqual) {
            return Err(self.unsupported("assignment expression (:=)"));
        }
        if !self.check(&Token::Comma) {
            self.expect(Token::RParen)?;
            return Ok(first);
        }

        let mut items = vec![first];
        while self.check(&Token::Comma) {
            self.advance()?;
            if self.check(&Token::RParen) {
                break;
            }
            items.push(self.parse_expression()?);
        }
        self.expect(Token::RParen)?;
        Ok(Expr::Tuple(items))
    }

    /// `[a, b]` or `[x for x in s]`, after the `[`
    fn parse_list(&mut self) -> Result<Expr, ParseError> {
        if self.check(&Token::RBracket) {
            self.advance()?;
            return Ok(Expr::List(vec![]));
        }

        let first = self.parse_expression()?;
        if self.check(&Token::For) {
            let generators = self.parse_generators()?;
            self.expect(Token::RBracket)?;
            return Ok(Expr::Comprehension {
                kind: ComprehensionKind::List,
                element: Box::new(first),
                generators,
            });
        }

        let mut elements = vec![first];
        while self.check(&Token::Comma) {
            self.advance()?;
            if self.check(&Token::RBracket) {
                break;
            }
            elements.push(self.parse_expression()?);
        }
        self.expect(Token::RBracket)?;
        Ok(Expr::List(elements))
    }

    /// `{'key': value, **other, ...}` with string keys, after the `{`
    fn parse_dict(&mut self) -> Result<Expr, ParseError> {
        let mut entries = vec![];

        while !self.check(&Token::RBrace) {
            if self.check(&Token::DoubleStar) {
                self.advance()?;
                entries.push(DictEntry::Spread(self.nested(Self::parse_or)?));
            } else {
                let key = match mem::replace(&mut self.current_token, Token::Eof) {
                    Token::String(s) => s,
                    other => {
                        self.current_token = other;
                        return Err(self.unsupported("dict key that is not a string literal"));
                    }
                };
                self.advance()?;
                self.expect(Token::Colon)?;

                let value = self.parse_expression()?;
                if self.check(&Token::For) {
                    return Err(self.unsupported("dict comprehension"));
                }
                entries.push(DictEntry::Pair(key, value));
            }

            if !self.check(&Token::RBrace) {
                self.expect(Token::Comma)?;
            }
        }

        self.expect(Token::RBrace)?;
        if entries.iter().any(|e| matches!(e, DictEntry::Spread(_))) {
            return Ok(Expr::DictMerge(entries));
        }
        Ok(Expr::Dict(
            entries
                .into_iter()
                .filter_map(|entry| match entry {
                    DictEntry::Pair(k, v) => Some((k, v)),
                    DictEntry::Spread(_) => None,
                })
                .collect(),
        ))
    }
}
