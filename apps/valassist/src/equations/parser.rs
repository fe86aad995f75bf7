//! Tokenizer and recursive-descent parser for normalized equation text.
//!
//! Each `parse_*` step takes the token slice and a position and returns the
//! parsed node with the position just past it.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("unexpected character '{ch}' at {pos}")]
    UnexpectedChar { ch: char, pos: usize },
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("invalid number '{0}'")]
    InvalidNumber(String),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected token {0}")]
    UnexpectedToken(String),
    #[error("if() expects 3 arguments, got {0}")]
    IfArity(usize),
    #[error("lookup table key must be a string or identifier, got {0}")]
    InvalidLookupKey(String),
    #[error("empty expression")]
    Empty,
    #[error("expression nests deeper than {0} levels")]
    TooDeep(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    LParen,
    RParen,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Question,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Lt,
    Le,
    Gt,
    Ge,
    EqEq,
    NotEq,
    And,
    Or,
    Not,
    Amp,
    Pipe,
    Caret,
    Shl,
    Shr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    Text(String),
    Bool(bool),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    BitAnd,
    BitXor,
    BitOr,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    /// A `lineItem.NAME.Value` reference left in the text.
    AttributeRef(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Ternary {
        condition: Box<Expr>,
        if_true: Box<Expr>,
        if_false: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
    TableLookup {
        entries: Vec<(String, Expr)>,
        selector: Box<Expr>,
    },
}

pub fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if c.is_whitespace() {
            i += 1;
            continue;
        }
        if let Some(tok) = single_char_token(c) {
            tokens.push(tok);
            i += 1;
            continue;
        }

        match c {
            '<' | '>' | '=' | '!' | '&' | '|' => {
                let (tok, len) = match (c, next) {
                    ('<', Some('=')) => (Token::Le, 2),
                    ('<', Some('<')) => (Token::Shl, 2),
                    ('<', _) => (Token::Lt, 1),
                    ('>', Some('=')) => (Token::Ge, 2),
                    ('>', Some('>')) => (Token::Shr, 2),
                    ('>', _) => (Token::Gt, 1),
                    ('=', Some('=')) => (Token::EqEq, 2),
                    ('!', Some('=')) => (Token::NotEq, 2),
                    ('!', _) => (Token::Not, 1),
                    ('&', Some('&')) => (Token::And, 2),
                    ('&', _) => (Token::Amp, 1),
                    ('|', Some('|')) => (Token::Or, 2),
                    ('|', _) => (Token::Pipe, 1),
                    _ => return Err(ParseError::UnexpectedChar { ch: c, pos: i }),
                };
                tokens.push(tok);
                i += len;
            }
            '"' => {
                let mut text = String::new();
                let mut j = i + 1;
                let mut closed = false;
                while j < chars.len() {
                    match chars[j] {
                        '\\' if j + 1 < chars.len() => {
                            text.push(chars[j + 1]);
                            j += 2;
                        }
                        '"' => {
                            closed = true;
                            j += 1;
                            break;
                        }
                        ch => {
                            text.push(ch);
                            j += 1;
                        }
                    }
                }
                if !closed {
                    return Err(ParseError::UnterminatedString);
                }
                tokens.push(Token::Str(text));
                i = j;
            }
            c if c.is_ascii_digit() || (c == '.' && next.is_some_and(|n| n.is_ascii_digit())) => {
                let (value, len) = lex_number(&chars[i..])?;
                tokens.push(Token::Number(value));
                i += len;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(match word.as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Ident(word),
                });
            }
            other => return Err(ParseError::UnexpectedChar { ch: other, pos: i }),
        }
    }

    Ok(tokens)
}

fn single_char_token(c: char) -> Option<Token> {
    Some(match c {
        '(' => Token::LParen,
        ')' => Token::RParen,
        '{' => Token::LBrace,
        '}' => Token::RBrace,
        ',' => Token::Comma,
        ':' => Token::Colon,
        '?' => Token::Question,
        '+' => Token::Plus,
        '-' => Token::Minus,
        '*' => Token::Star,
        '/' => Token::Slash,
        '%' => Token::Percent,
        '^' => Token::Caret,
        _ => return None,
    })
}

/// Lexes a decimal or `0x` number, skipping a trailing C#-style type suffix.
fn lex_number(chars: &[char]) -> Result<(f64, usize), ParseError> {
    if chars.len() > 2 && chars[0] == '0' && matches!(chars[1], 'x' | 'X') {
        let mut end = 2;
        while end < chars.len() && chars[end].is_ascii_hexdigit() {
            end += 1;
        }
        let digits: String = chars[2..end].iter().collect();
        return u128::from_str_radix(&digits, 16)
            .map(|v| (v as f64, end))
            .map_err(|_| ParseError::InvalidNumber(format!("0x{digits}")));
    }

    let mut end = 0;
    while end < chars.len() && (chars[end].is_ascii_digit() || chars[end] == '.') {
        end += 1;
    }
    if end < chars.len() && matches!(chars[end], 'e' | 'E') {
        let mut exp = end + 1;
        if exp < chars.len() && matches!(chars[exp], '+' | '-') {
            exp += 1;
        }
        if exp < chars.len() && chars[exp].is_ascii_digit() {
            while exp < chars.len() && chars[exp].is_ascii_digit() {
                exp += 1;
            }
            end = exp;
        }
    }
    let text: String = chars[..end].iter().collect();
    let value = text
        .parse::<f64>()
        .map_err(|_| ParseError::InvalidNumber(text.clone()))?;

    let mut len = end;
    if len < chars.len()
        && matches!(chars[len].to_ascii_lowercase(), 'd' | 'f' | 'm' | 'l' | 'u')
        && !chars.get(len + 1).is_some_and(|c| c.is_alphanumeric() || *c == '_')
    {
        len += 1;
    }
    Ok((value, len))
}

/// Parenthesis, call, branch and prefix-operator nesting accepted by the parser.
pub const MAX_NESTING: usize = 128;
/// Tallest expression tree the parser will build. Long operator chains count
/// one level per operator.
pub const MAX_HEIGHT: usize = 512;

/// A parsed subtree, its height, and the position just past it.
struct Parsed {
    expr: Expr,
    height: usize,
    next: usize,
}

impl Parsed {
    fn leaf(expr: Expr, next: usize) -> Self {
        Self {
            expr,
            height: 1,
            next,
        }
    }
}

fn nested(depth: usize) -> Result<usize, ParseError> {
    if depth >= MAX_NESTING {
        return Err(ParseError::TooDeep(MAX_NESTING));
    }
    Ok(depth + 1)
}

fn grown(child_height: usize) -> Result<usize, ParseError> {
    if child_height >= MAX_HEIGHT {
        return Err(ParseError::TooDeep(MAX_HEIGHT));
    }
    Ok(child_height + 1)
}

/// Parses a complete expression; trailing tokens are an error.
pub fn parse(input: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ParseError::Empty);
    }
    let parsed = parse_ternary(&tokens, 0, 0)?;
    match tokens.get(parsed.next) {
        None => Ok(parsed.expr),
        Some(tok) => Err(ParseError::UnexpectedToken(format!("{tok:?}"))),
    }
}

/// Parses `{"K":"V", ...},{"K","V"}` groups into key/expression pairs.
/// Keys are upper-cased.
pub fn parse_lookup_table(input: &str) -> Result<Vec<(String, Expr)>, ParseError> {
    let tokens = tokenize(input)?;
    let mut entries = Vec::new();
    let mut pos = 0;

    while pos < tokens.len() {
        expect(&tokens, pos, &Token::LBrace)?;
        pos += 1;
        loop {
            let key = match tokens.get(pos) {
                Some(Token::Str(s)) | Some(Token::Ident(s)) => s.trim().to_uppercase(),
                Some(Token::Number(n)) => format_key(*n),
                Some(tok) => return Err(ParseError::InvalidLookupKey(format!("{tok:?}"))),
                None => return Err(ParseError::UnexpectedEnd),
            };
            pos += 1;
            match tokens.get(pos) {
                Some(Token::Colon) | Some(Token::Comma) => pos += 1,
                Some(tok) => return Err(ParseError::UnexpectedToken(format!("{tok:?}"))),
                None => return Err(ParseError::UnexpectedEnd),
            }
            // The lookup node sits above every entry.
            let value = parse_ternary(&tokens, pos, 1)?;
            grown(value.height)?;
            entries.push((key, value.expr));
            pos = value.next;
            match tokens.get(pos) {
                Some(Token::Comma) => pos += 1,
                Some(Token::RBrace) => {
                    pos += 1;
                    break;
                }
                Some(tok) => return Err(ParseError::UnexpectedToken(format!("{tok:?}"))),
                None => return Err(ParseError::UnexpectedEnd),
            }
        }
        if let Some(Token::Comma) = tokens.get(pos) {
            pos += 1;
        }
    }

    if entries.is_empty() {
        return Err(ParseError::Empty);
    }
    Ok(entries)
}

fn format_key(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

fn expect(tokens: &[Token], pos: usize, want: &Token) -> Result<(), ParseError> {
    match tokens.get(pos) {
        Some(tok) if tok == want => Ok(()),
        Some(tok) => Err(ParseError::UnexpectedToken(format!("{tok:?}"))),
        None => Err(ParseError::UnexpectedEnd),
    }
}

fn parse_ternary(tokens: &[Token], pos: usize, depth: usize) -> Result<Parsed, ParseError> {
    let condition = parse_binary(tokens, pos, depth, 0)?;
    if tokens.get(condition.next) != Some(&Token::Question) {
        return Ok(condition);
    }
    let inner = nested(depth)?;
    let if_true = parse_ternary(tokens, condition.next + 1, inner)?;
    expect(tokens, if_true.next, &Token::Colon)?;
    let if_false = parse_ternary(tokens, if_true.next + 1, inner)?;
    Ok(Parsed {
        height: grown(condition.height.max(if_true.height).max(if_false.height))?,
        next: if_false.next,
        expr: Expr::Ternary {
            condition: Box::new(condition.expr),
            if_true: Box::new(if_true.expr),
            if_false: Box::new(if_false.expr),
        },
    })
}

/// Binary operator precedence levels, loosest first.
const LEVEL_COUNT: usize = 10;

fn binary_op_at(level: usize, tok: &Token) -> Option<BinaryOp> {
    let op = match (level, tok) {
        (0, Token::Or) => BinaryOp::Or,
        (1, Token::And) => BinaryOp::And,
        (2, Token::Pipe) => BinaryOp::BitOr,
        (3, Token::Caret) => BinaryOp::BitXor,
        (4, Token::Amp) => BinaryOp::BitAnd,
        (5, Token::EqEq) => BinaryOp::Eq,
        (5, Token::NotEq) => BinaryOp::Ne,
        (6, Token::Lt) => BinaryOp::Lt,
        (6, Token::Le) => BinaryOp::Le,
        (6, Token::Gt) => BinaryOp::Gt,
        (6, Token::Ge) => BinaryOp::Ge,
        (7, Token::Shl) => BinaryOp::Shl,
        (7, Token::Shr) => BinaryOp::Shr,
        (8, Token::Plus) => BinaryOp::Add,
        (8, Token::Minus) => BinaryOp::Sub,
        (9, Token::Star) => BinaryOp::Mul,
        (9, Token::Slash) => BinaryOp::Div,
        (9, Token::Percent) => BinaryOp::Rem,
        _ => return None,
    };
    Some(op)
}

fn parse_binary(
    tokens: &[Token],
    pos: usize,
    depth: usize,
    level: usize,
) -> Result<Parsed, ParseError> {
    if level >= LEVEL_COUNT {
        return parse_unary(tokens, pos, depth);
    }
    let mut left = parse_binary(tokens, pos, depth, level + 1)?;
    while let Some(op) = tokens
        .get(left.next)
        .and_then(|tok| binary_op_at(level, tok))
    {
        let right = parse_binary(tokens, left.next + 1, depth, level + 1)?;
        left = Parsed {
            height: grown(left.height.max(right.height))?,
            next: right.next,
            expr: Expr::Binary {
                op,
                left: Box::new(left.expr),
                right: Box::new(right.expr),
            },
        };
    }
    Ok(left)
}

fn parse_unary(tokens: &[Token], pos: usize, depth: usize) -> Result<Parsed, ParseError> {
    let op = match tokens.get(pos) {
        Some(Token::Minus) => UnaryOp::Neg,
        Some(Token::Not) => UnaryOp::Not,
        Some(Token::Plus) => return parse_unary(tokens, pos + 1, nested(depth)?),
        _ => return parse_primary(tokens, pos, depth),
    };
    let operand = parse_unary(tokens, pos + 1, nested(depth)?)?;
    Ok(Parsed {
        height: grown(operand.height)?,
        next: operand.next,
        expr: Expr::Unary {
            op,
            operand: Box::new(operand.expr),
        },
    })
}

fn parse_primary(tokens: &[Token], pos: usize, depth: usize) -> Result<Parsed, ParseError> {
    match tokens.get(pos) {
        Some(Token::Number(n)) => Ok(Parsed::leaf(Expr::Literal(Literal::Number(*n)), pos + 1)),
        Some(Token::Str(s)) => Ok(Parsed::leaf(Expr::Literal(Literal::Text(s.clone())), pos + 1)),
        Some(Token::LParen) => {
            let inner = parse_ternary(tokens, pos + 1, nested(depth)?)?;
            expect(tokens, inner.next, &Token::RParen)?;
            Ok(Parsed {
                next: inner.next + 1,
                ..inner
            })
        }
        Some(Token::Ident(name)) => {
            if tokens.get(pos + 1) == Some(&Token::LParen) {
                let (args, args_height, next) = parse_args(tokens, pos + 2, nested(depth)?)?;
                let height = grown(args_height)?;
                let lower = name.to_ascii_lowercase();
                if lower == "if" {
                    let count = args.len();
                    let mut it = args.into_iter();
                    return match (it.next(), it.next(), it.next(), it.next()) {
                        (Some(c), Some(a), Some(b), None) => Ok(Parsed {
                            expr: Expr::Ternary {
                                condition: Box::new(c),
                                if_true: Box::new(a),
                                if_false: Box::new(b),
                            },
                            height,
                            next,
                        }),
                        _ => Err(ParseError::IfArity(count)),
                    };
                }
                return Ok(Parsed {
                    expr: Expr::Call { name: lower, args },
                    height,
                    next,
                });
            }

            if let Some(attr) = attribute_name(name) {
                return Ok(Parsed::leaf(Expr::AttributeRef(attr.to_string()), pos + 1));
            }
            let expr = match name.to_ascii_lowercase().as_str() {
                "true" => Expr::Literal(Literal::Bool(true)),
                "false" => Expr::Literal(Literal::Bool(false)),
                _ => Expr::Literal(Literal::Text(name.clone())),
            };
            Ok(Parsed::leaf(expr, pos + 1))
        }
        Some(tok) => Err(ParseError::UnexpectedToken(format!("{tok:?}"))),
        None => Err(ParseError::UnexpectedEnd),
    }
}

/// Arguments up to the closing parenthesis, with the tallest argument's height.
fn parse_args(
    tokens: &[Token],
    mut pos: usize,
    depth: usize,
) -> Result<(Vec<Expr>, usize, usize), ParseError> {
    let mut args = Vec::new();
    let mut height = 0;
    if tokens.get(pos) == Some(&Token::RParen) {
        return Ok((args, height, pos + 1));
    }
    loop {
        let arg = parse_ternary(tokens, pos, depth)?;
        height = height.max(arg.height);
        args.push(arg.expr);
        match tokens.get(arg.next) {
            Some(Token::Comma) => pos = arg.next + 1,
            Some(Token::RParen) => return Ok((args, height, arg.next + 1)),
            Some(tok) => return Err(ParseError::UnexpectedToken(format!("{tok:?}"))),
            None => return Err(ParseError::UnexpectedEnd),
        }
    }
}

/// `lineItem.NAME.Value` (namespace and suffix case-insensitive) to `NAME`.
fn attribute_name(ident: &str) -> Option<&str> {
    let mut parts = ident.split('.');
    let (ns, name, suffix) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() || name.is_empty() {
        return None;
    }
    (ns.eq_ignore_ascii_case("lineitem") && suffix.eq_ignore_ascii_case("value")).then_some(name)
}
