//! Restricted arithmetic over quoted column references
//!
//! Grammar (whitespace between tokens is ignored):
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/') unary)*
//! unary   := ('+' | '-') unary | primary
//! primary := NUMBER | COLUMN | '(' expr ')'
//! NUMBER  := digits ['.' digits] | '.' digits
//! COLUMN  := '`' any character except '`', at least one '`'
//! ```
//!
//! Nesting is capped at [`MAX_DEPTH`] levels so that evaluation can recurse
//! over the tree without exhausting the stack.
//!
//! Anything else, including bare words, is rejected at parse time. Column
//! values are supplied by the caller at evaluation time, so the only thing an
//! expression can do is arithmetic on numbers it is handed.

use std::fmt;
use thiserror::Error;

/// Deepest expression tree accepted. Each operand in a `+`/`-` or `*`/`/`
/// chain counts as one level, as does each unary sign and parenthesis.
pub const MAX_DEPTH: usize = 256;

#[derive(Debug, Error, PartialEq)]
pub enum ExprError {
    #[error("formula is empty")]
    Empty,

    #[error("unexpected character '{ch}' at position {pos}")]
    UnexpectedChar { ch: char, pos: usize },

    #[error("unterminated column reference starting at position {0}")]
    UnterminatedColumn(usize),

    #[error("unexpected {found} at position {pos}")]
    UnexpectedToken { found: String, pos: usize },

    #[error("unexpected end of formula")]
    UnexpectedEnd,

    #[error("column '{0}' has no numeric value")]
    UnknownColumn(String),

    #[error("formula nests deeper than {0} levels")]
    TooDeep(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    fn apply(self, lhs: f64, rhs: f64) -> f64 {
        match self {
            BinaryOp::Add => lhs + rhs,
            BinaryOp::Sub => lhs - rhs,
            BinaryOp::Mul => lhs * rhs,
            BinaryOp::Div => lhs / rhs,
        }
    }
}

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Column(String),
    Neg(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    pub fn parse(source: &str) -> Result<Expr, ExprError> {
        let tokens = tokenize(source)?;
        if tokens.is_empty() {
            return Err(ExprError::Empty);
        }

        let mut parser = Parser {
            tokens,
            next: 0,
            depth: 0,
        };
        let expr = parser.expr()?;
        match parser.peek() {
            None => Ok(expr),
            Some(spanned) => Err(spanned.unexpected()),
        }
    }

    /// Column names referenced, in first-use order, without duplicates
    pub fn columns(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_columns(&mut names);
        names
    }

    fn collect_columns<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Expr::Number(_) => {},
            Expr::Column(name) => {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            },
            Expr::Neg(inner) => inner.collect_columns(names),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.collect_columns(names);
                rhs.collect_columns(names);
            },
        }
    }

    /// Evaluate with `lookup` supplying each column's value.
    ///
    /// Division follows IEEE rules, so dividing by zero yields an infinity
    /// rather than an error; callers decide what a non-finite result means.
    pub fn eval<F>(&self, lookup: &F) -> Result<f64, ExprError>
    where
        F: Fn(&str) -> Option<f64>,
    {
        match self {
            Expr::Number(value) => Ok(*value),
            Expr::Column(name) => lookup(name).ok_or_else(|| ExprError::UnknownColumn(name.clone())),
            Expr::Neg(inner) => Ok(-inner.eval(lookup)?),
            Expr::Binary { op, lhs, rhs } => Ok(op.apply(lhs.eval(lookup)?, rhs.eval(lookup)?)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Column(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(value) => write!(f, "number {}", value),
            Token::Column(name) => write!(f, "column `{}`", name),
            Token::Plus => f.write_str("'+'"),
            Token::Minus => f.write_str("'-'"),
            Token::Star => f.write_str("'*'"),
            Token::Slash => f.write_str("'/'"),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
        }
    }
}

#[derive(Debug, Clone)]
struct Spanned {
    token: Token,
    pos: usize,
}

impl Spanned {
    fn unexpected(&self) -> ExprError {
        ExprError::UnexpectedToken {
            found: self.token.to_string(),
            pos: self.pos,
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<Spanned>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some((pos, ch)) = chars.next() {
        let token = match ch {
            c if c.is_whitespace() => continue,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '(' => Token::LParen,
            ')' => Token::RParen,
            '`' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some((_, '`')) => break,
                        Some((_, c)) => name.push(c),
                        None => return Err(ExprError::UnterminatedColumn(pos)),
                    }
                }
                if name.is_empty() {
                    return Err(ExprError::UnexpectedChar { ch: '`', pos });
                }
                Token::Column(name)
            },
            c if c.is_ascii_digit() || c == '.' => {
                let mut literal = String::from(c);
                while let Some(&(_, next)) = chars.peek() {
                    if next.is_ascii_digit() || next == '.' {
                        literal.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| ExprError::UnexpectedChar { ch: c, pos })?;
                Token::Number(value)
            },
            other => return Err(ExprError::UnexpectedChar { ch: other, pos }),
        };
        tokens.push(Spanned { token, pos });
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Spanned>,
    next: usize,
    depth: usize,
}

impl Parser {
    fn descend(&mut self) -> Result<(), ExprError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExprError::TooDeep(MAX_DEPTH));
        }
        Ok(())
    }

    fn ascend(&mut self, levels: usize) {
        self.depth -= levels;
    }

    fn peek(&self) -> Option<&Spanned> {
        self.tokens.get(self.next)
    }

    fn advance(&mut self) -> Option<Spanned> {
        let spanned = self.tokens.get(self.next).cloned();
        if spanned.is_some() {
            self.next += 1;
        }
        spanned
    }

    fn eat(&mut self, wanted: &Token) -> bool {
        if self.peek().is_some_and(|s| &s.token == wanted) {
            self.next += 1;
            true
        } else {
            false
        }
    }

    fn expr(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.term()?;
        let mut chain = 0;
        loop {
            let op = if self.eat(&Token::Plus) {
                BinaryOp::Add
            } else if self.eat(&Token::Minus) {
                BinaryOp::Sub
            } else {
                self.ascend(chain);
                return Ok(lhs);
            };
            self.descend()?;
            chain += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn term(&mut self) -> Result<Expr, ExprError> {
        let mut lhs = self.unary()?;
        let mut chain = 0;
        loop {
            let op = if self.eat(&Token::Star) {
                BinaryOp::Mul
            } else if self.eat(&Token::Slash) {
                BinaryOp::Div
            } else {
                self.ascend(chain);
                return Ok(lhs);
            };
            self.descend()?;
            chain += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn unary(&mut self) -> Result<Expr, ExprError> {
        if self.eat(&Token::Minus) {
            self.descend()?;
            let operand = self.unary()?;
            self.ascend(1);
            return Ok(Expr::Neg(Box::new(operand)));
        }
        if self.eat(&Token::Plus) {
            self.descend()?;
            let operand = self.unary()?;
            self.ascend(1);
            return Ok(operand);
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        let spanned = self.advance().ok_or(ExprError::UnexpectedEnd)?;
        match spanned.token {
            Token::Number(value) => Ok(Expr::Number(value)),
            Token::Column(name) => Ok(Expr::Column(name)),
            Token::LParen => {
                self.descend()?;
                let inner = self.expr()?;
                self.ascend(1);
                match self.advance() {
                    Some(Spanned {
                        token: Token::RParen,
                        ..
                    }) => Ok(inner),
                    Some(other) => Err(other.unexpected()),
                    None => Err(ExprError::UnexpectedEnd),
                }
            },
            _ => Err(spanned.unexpected()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn eval_with(source: &str, values: &[(&str, f64)]) -> Result<f64, ExprError> {
        let values: HashMap<&str, f64> = values.iter().copied().collect();
        Expr::parse(source)?.eval(&|name| values.get(name).copied())
    }

    #[test]
    fn test_nesting_is_capped() {
        let deep = format!("{}`In`{}", "(".repeat(200_000), ")".repeat(200_000));
        assert_eq!(Expr::parse(&deep), Err(ExprError::TooDeep(MAX_DEPTH)));

        let signs = format!("{}1", "-".repeat(100_000));
        assert_eq!(Expr::parse(&signs), Err(ExprError::TooDeep(MAX_DEPTH)));

        let chain = vec!["1"; 100_000].join(" + ");
        assert_eq!(Expr::parse(&chain), Err(ExprError::TooDeep(MAX_DEPTH)));

        let products = vec!["2"; 100_000].join(" * ");
        assert_eq!(Expr::parse(&products), Err(ExprError::TooDeep(MAX_DEPTH)));
    }

    #[test]
    fn test_moderate_nesting_still_evaluates() {
        let nested = format!("{}`In`{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(eval_with(&nested, &[("In", 4.0)]).unwrap(), 4.0);

        let chain = vec!["1"; 100].join(" + ");
        assert_eq!(eval_with(&chain, &[]).unwrap(), 100.0);
    }

    #[test]
    fn test_precedence_and_associativity() {
        assert_eq!(eval_with("1 + 2 * 3", &[]).unwrap(), 7.0);
        assert_eq!(eval_with("(1 + 2) * 3", &[]).unwrap(), 9.0);
        assert_eq!(eval_with("10 - 4 - 3", &[]).unwrap(), 3.0);
        assert_eq!(eval_with("120 / 2 / 3", &[]).unwrap(), 20.0);
        assert_eq!(eval_with("-(2 + 3) * -2", &[]).unwrap(), 10.0);
        assert_eq!(eval_with("+.5 * 4", &[]).unwrap(), 2.0);
    }

    #[test]
    fn test_columns_with_spaces() {
        let result = eval_with(
            "`Clock Out_sec` - `Clock In_sec` - `Break_sec`",
            &[("Clock Out_sec", 30_600.0), ("Clock In_sec", 3_600.0), ("Break_sec", 1_800.0)],
        );
        assert_eq!(result.unwrap(), 25_200.0);
    }

    #[test]
    fn test_columns_listed_once_in_order() {
        let expr = Expr::parse("`B` + `A` * (`B` - 1)").unwrap();
        assert_eq!(expr.columns(), vec!["B", "A"]);
    }

    #[test]
    fn test_division_by_zero_is_not_an_error() {
        assert!(eval_with("1 / 0", &[]).unwrap().is_infinite());
    }

    #[test]
    fn test_unknown_column() {
        assert_eq!(
            eval_with("`Ghost` + 1", &[]),
            Err(ExprError::UnknownColumn("Ghost".to_string()))
        );
    }

    #[test]
    fn test_rejects_everything_outside_the_grammar() {
        assert_eq!(Expr::parse(""), Err(ExprError::Empty));
        assert_eq!(Expr::parse("   "), Err(ExprError::Empty));
        assert_eq!(Expr::parse("`A` +"), Err(ExprError::UnexpectedEnd));
        assert_eq!(Expr::parse("(`A`"), Err(ExprError::UnexpectedEnd));
        assert_eq!(Expr::parse("`A"), Err(ExprError::UnterminatedColumn(0)));
        assert_eq!(Expr::parse("``"), Err(ExprError::UnexpectedChar { ch: '`', pos: 0 }));
        assert_eq!(
            Expr::parse("ClockIn"),
            Err(ExprError::UnexpectedChar { ch: 'C', pos: 0 })
        );
        assert_eq!(
            Expr::parse("2 ** 3"),
            Err(ExprError::UnexpectedToken {
                found: "'*'".to_string(),
                pos: 3
            })
        );
        assert!(matches!(Expr::parse("`A` `B`"), Err(ExprError::UnexpectedToken { .. })));
        assert!(matches!(Expr::parse("1.2.3"), Err(ExprError::UnexpectedChar { .. })));
        assert!(matches!(Expr::parse("__import__('os')"), Err(ExprError::UnexpectedChar { .. })));
        assert!(matches!(Expr::parse("`A` % 60"), Err(ExprError::UnexpectedChar { ch: '%', .. })));
    }
}
