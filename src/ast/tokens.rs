/// Lexical tokens of the lambda source language.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    /// Floating point number
    ///
    /// # Examples
    /// ```text
    /// 3.14
    /// 40.0
    /// ```
    Float(f64),

    /// Integer
    ///
    /// # Examples
    /// ```text
    /// 42
    /// 0
    /// ```
    Integer(i64),

    /// String literal enclosed in single or double quotes
    ///
    /// # Examples
    /// ```text
    /// 'AntiKt4EMTopoJets'
    /// "pt"
    /// ```
    String(String),

    /// `True` / `False`
    Boolean(bool),

    /// `None`
    None,

    // Identifiers
    /// Parameter, captured variable, function or member name
    ///
    /// Must start with letter or underscore, followed by letters, digits, or underscores.
    Identifier(String),

    // Keywords
    /// `lambda`
    Lambda,

    /// `for`, opens a comprehension clause
    For,

    /// `in`, inside a comprehension clause or as membership test
    In,

    /// `if`, comprehension filter or conditional expression
    If,

    /// `else`
    Else,

    /// `not`
    Not,

    /// `is`
    Is,

    /// Logical AND (word, not symbol)
    ///
    /// # Examples
    /// ```text
    /// j.pt() > 30 and abs(j.eta()) < 2.4
    /// ```
    And,

    /// Logical OR (word, not symbol)
    Or,

    /// A statement keyword that can never appear inside a lambda body
    ///
    /// `def`, `return`, `while`, `import`, ...
    Reserved(String),

    // Comparison
    /// Equality operator
    EqEq,

    /// Inequality operator
    NotEq,

    /// Less than
    Lt,

    /// Greater than
    Gt,

    /// Less than or equal
    LtEq,

    /// Greater than or equal
    GtEq,

    // Arithmetic
    /// Addition or string concatenation
    Plus,

    /// Subtraction or negation
    Minus,

    /// Multiplication
    Star,

    /// Exponentiation (`**`)
    DoubleStar,

    /// Division
    Slash,

    /// Floor division (`//`)
    DoubleSlash,

    /// Modulo
    Percent,

    /// Keyword argument binding (`=`)
    Assign,

    /// Walrus (`:=`), always rejected
    ColonEqual,

    // Delimiters
    /// Left bracket for subscripts and list literals
    LBracket,

    /// Right bracket
    RBracket,

    /// Left parenthesis for grouping, tuples or calls
    LParen,

    /// Right parenthesis
    RParen,

    /// Left brace for dict literals
    LBrace,

    /// Right brace
    RBrace,

    /// Dot for method calls or attribute access
    Dot,

    /// Comma for separating arguments or sequence elements
    Comma,

    /// Colon after lambda parameters and between dict key and value
    Colon,

    /// End of input
    Eof,
}
