use itertools::Itertools;
use std::{fmt::Display, iter::Peekable, str::Chars, str::FromStr};

use crate::{
    components::Product,
    errors::{RasterOpsError, Result},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        }
    }

    fn apply(&self, lhs: f64, rhs: f64) -> f64 {
        let truth = |value: bool| if value { 1. } else { 0. };
        match self {
            BinaryOp::Or => truth(lhs != 0. || rhs != 0.),
            BinaryOp::And => truth(lhs != 0. && rhs != 0.),
            BinaryOp::Eq => truth(lhs == rhs),
            BinaryOp::Ne => truth(lhs != rhs),
            BinaryOp::Lt => truth(lhs < rhs),
            BinaryOp::Le => truth(lhs <= rhs),
            BinaryOp::Gt => truth(lhs > rhs),
            BinaryOp::Ge => truth(lhs >= rhs),
            BinaryOp::Add => lhs + rhs,
            BinaryOp::Sub => lhs - rhs,
            BinaryOp::Mul => lhs * rhs,
            BinaryOp::Div => lhs / rhs,
        }
    }
}

/// Band-maths expression over the bands of one product.
///
/// Booleans evaluate to `1.0` and `0.0`.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Constant(f64),
    Band(String),
    /// `band.FLAG`, true when all bits of the flag are raised.
    Flag {
        band: String,
        flag: String,
    },
    Unary(UnaryOp, Box<Expression>),
    Binary(BinaryOp, Box<Expression>, Box<Expression>),
}

impl Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expression::Constant(value) => write!(f, "{value}"),
            Expression::Band(band) => write!(f, "{band}"),
            Expression::Flag { band, flag } => write!(f, "{band}.{flag}"),
            Expression::Unary(UnaryOp::Not, operand) => write!(f, "!{operand}"),
            Expression::Unary(UnaryOp::Neg, operand) => write!(f, "-{operand}"),
            Expression::Binary(op, lhs, rhs) => write!(f, "({lhs} {} {rhs})", op.symbol()),
        }
    }
}

impl FromStr for Expression {
    type Err = RasterOpsError;

    fn from_str(s: &str) -> Result<Self> {
        let tokens = tokenize(s)?;
        let mut parser = Parser {
            source: s,
            tokens,
            position: 0,
        };
        let expression = parser.or()?;
        match parser.peek() {
            None => Ok(expression),
            Some(token) => Err(parser.error(format!("unexpected token {token:?}"))),
        }
    }
}

impl Expression {
    pub fn band(name: impl Into<String>) -> Self {
        Expression::Band(name.into())
    }

    pub fn binary(op: BinaryOp, lhs: Expression, rhs: Expression) -> Self {
        Expression::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    /// Names of the bands read by this expression, in order of appearance.
    pub fn references(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_references(&mut names);
        names.into_iter().unique().collect()
    }

    fn collect_references<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Expression::Constant(_) => (),
            Expression::Band(band) | Expression::Flag { band, .. } => names.push(band),
            Expression::Unary(_, operand) => operand.collect_references(names),
            Expression::Binary(_, lhs, rhs) => {
                lhs.collect_references(names);
                rhs.collect_references(names);
            }
        }
    }

    /// Resolves band and flag names against `product`.
    pub fn compile(&self, product: &Product) -> Result<CompiledExpression> {
        let bands: Vec<String> = self.references().into_iter().map(String::from).collect();
        let root = self.compile_node(product, &bands)?;
        Ok(CompiledExpression { bands, root })
    }

    fn compile_node(&self, product: &Product, bands: &[String]) -> Result<Node> {
        let index_of = |band: &str| -> Result<usize> {
            product
                .band(band)
                .map_err(|_| product.invalid_source(band))?;
            bands
                .iter()
                .position(|name| name == band)
                .ok_or_else(|| product.invalid_source(band))
        };
        Ok(match self {
            Expression::Constant(value) => Node::Constant(*value),
            Expression::Band(band) => Node::Sample(index_of(band)?),
            Expression::Flag { band, flag } => {
                let index = index_of(band)?;
                let mask = product
                    .band(band)
                    .ok()
                    .and_then(|band| band.flag_coding().map(String::from))
                    .and_then(|coding| product.flag_coding(&coding))
                    .and_then(|coding| coding.flag(flag).map(|flag| flag.mask))
                    .ok_or_else(|| product.invalid_source(&format!("{band}.{flag}")))?;
                Node::Flag(index, mask)
            }
            Expression::Unary(op, operand) => {
                Node::Unary(*op, Box::new(operand.compile_node(product, bands)?))
            }
            Expression::Binary(op, lhs, rhs) => Node::Binary(
                *op,
                Box::new(lhs.compile_node(product, bands)?),
                Box::new(rhs.compile_node(product, bands)?),
            ),
        })
    }
}

#[derive(Debug, Clone)]
enum Node {
    Constant(f64),
    Sample(usize),
    Flag(usize, u64),
    Unary(UnaryOp, Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
}

impl Node {
    fn eval(&self, samples: &[f64]) -> f64 {
        match self {
            Node::Constant(value) => *value,
            Node::Sample(index) => samples[*index],
            Node::Flag(index, mask) => {
                let value = samples[*index];
                if value.is_finite() && (value as i64 as u64) & mask == *mask {
                    1.
                } else {
                    0.
                }
            }
            Node::Unary(UnaryOp::Not, operand) => {
                if operand.eval(samples) == 0. {
                    1.
                } else {
                    0.
                }
            }
            Node::Unary(UnaryOp::Neg, operand) => -operand.eval(samples),
            Node::Binary(op, lhs, rhs) => op.apply(lhs.eval(samples), rhs.eval(samples)),
        }
    }
}

/// [Expression] bound to the bands of a product.
#[derive(Debug, Clone)]
pub struct CompiledExpression {
    bands: Vec<String>,
    root: Node,
}

impl CompiledExpression {
    /// Bands whose samples [CompiledExpression::eval] expects, in order.
    pub fn bands(&self) -> &[String] {
        &self.bands
    }

    pub fn eval(&self, samples: &[f64]) -> f64 {
        self.root.eval(samples)
    }

    pub fn eval_bool(&self, samples: &[f64]) -> bool {
        self.eval(samples) != 0.
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(&'static str),
    Open,
    Close,
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let error = |reason: String| RasterOpsError::Expression {
        expression: source.to_string(),
        reason,
    };
    let mut chars: Peekable<Chars> = source.chars().peekable();
    let mut tokens = Vec::new();
    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '0'..='9' | '.' => {
                let mut literal = String::new();
                while let Some(&c) = chars.peek() {
                    let exponent_sign = matches!(c, '+' | '-') && literal.ends_with(['e', 'E']);
                    if !(c.is_ascii_alphanumeric() || c == '.' || exponent_sign) {
                        break;
                    }
                    literal.push(c);
                    chars.next();
                }
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| error(format!("invalid number '{literal}'")))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let ident: String = chars
                    .peeking_take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '.')
                    .collect();
                tokens.push(Token::Ident(ident));
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            _ => {
                chars.next();
                let next = chars.peek().copied();
                let op = match (c, next) {
                    ('&', Some('&')) => "&&",
                    ('|', Some('|')) => "||",
                    ('=', Some('=')) => "==",
                    ('!', Some('=')) => "!=",
                    ('<', Some('=')) => "<=",
                    ('>', Some('=')) => ">=",
                    ('!', _) => "!",
                    ('<', _) => "<",
                    ('>', _) => ">",
                    ('+', _) => "+",
                    ('-', _) => "-",
                    ('*', _) => "*",
                    ('/', _) => "/",
                    _ => return Err(error(format!("unexpected character '{c}'"))),
                };
                if op.len() == 2 {
                    chars.next();
                }
                tokens.push(Token::Op(op));
            }
        }
    }
    Ok(tokens)
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    position: usize,
}

impl Parser<'_> {
    fn error(&self, reason: String) -> RasterOpsError {
        RasterOpsError::Expression {
            expression: self.source.to_string(),
            reason,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    fn eat_op(&mut self, ops: &[(&str, BinaryOp)]) -> Option<BinaryOp> {
        match self.peek() {
            Some(Token::Op(symbol)) => {
                let op = ops
                    .iter()
                    .find(|(candidate, _)| candidate == symbol)
                    .map(|(_, op)| *op);
                if op.is_some() {
                    self.position += 1;
                }
                op
            }
            _ => None,
        }
    }

    fn binary_level(
        &mut self,
        ops: &[(&str, BinaryOp)],
        operand: fn(&mut Self) -> Result<Expression>,
    ) -> Result<Expression> {
        let mut lhs = operand(self)?;
        while let Some(op) = self.eat_op(ops) {
            let rhs = operand(self)?;
            lhs = Expression::binary(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn or(&mut self) -> Result<Expression> {
        self.binary_level(&[("||", BinaryOp::Or)], Self::and)
    }

    fn and(&mut self) -> Result<Expression> {
        self.binary_level(&[("&&", BinaryOp::And)], Self::comparison)
    }

    fn comparison(&mut self) -> Result<Expression> {
        self.binary_level(
            &[
                ("==", BinaryOp::Eq),
                ("!=", BinaryOp::Ne),
                ("<", BinaryOp::Lt),
                ("<=", BinaryOp::Le),
                (">", BinaryOp::Gt),
                (">=", BinaryOp::Ge),
            ],
            Self::additive,
        )
    }

    fn additive(&mut self) -> Result<Expression> {
        self.binary_level(
            &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)],
            Self::multiplicative,
        )
    }

    fn multiplicative(&mut self) -> Result<Expression> {
        self.binary_level(&[("*", BinaryOp::Mul), ("/", BinaryOp::Div)], Self::unary)
    }

    fn unary(&mut self) -> Result<Expression> {
        match self.peek() {
            Some(Token::Op("!")) => {
                self.position += 1;
                Ok(Expression::Unary(UnaryOp::Not, Box::new(self.unary()?)))
            }
            Some(Token::Op("-")) => {
                self.position += 1;
                Ok(Expression::Unary(UnaryOp::Neg, Box::new(self.unary()?)))
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<Expression> {
        match self.next() {
            Some(Token::Number(value)) => Ok(Expression::Constant(value)),
            Some(Token::Ident(ident)) => Ok(match ident.as_str() {
                "true" => Expression::Constant(1.),
                "false" => Expression::Constant(0.),
                _ => match ident.split_once('.') {
                    Some((band, flag)) if !band.is_empty() && !flag.is_empty() => {
                        Expression::Flag {
                            band: band.to_string(),
                            flag: flag.to_string(),
                        }
                    }
                    Some(_) => return Err(self.error(format!("invalid name '{ident}'"))),
                    None => Expression::Band(ident),
                },
            }),
            Some(Token::Open) => {
                let expression = self.or()?;
                match self.next() {
                    Some(Token::Close) => Ok(expression),
                    _ => Err(self.error(String::from("missing ')'"))),
                }
            }
            Some(token) => Err(self.error(format!("unexpected token {token:?}"))),
            None => Err(self.error(String::from("unexpected end of expression"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1 + 2 * 3", 7.)]
    #[case("(1 + 2) * 3", 9.)]
    #[case("-4 / 2", -2.)]
    #[case("1 < 2 && 3 >= 3", 1.)]
    #[case("!true || false", 0.)]
    #[case("2 == 2.0", 1.)]
    #[case("1e1 - 1", 9.)]
    #[case("5e-1 * 4", 2.)]
    #[case("2.5E+2-50", 200.)]
    fn constant_expressions(#[case] source: &str, #[case] expected: f64) {
        let expression: Expression = source.parse().unwrap();
        let product = Product::new("p", "test", (1, 1));
        let compiled = expression.compile(&product).unwrap();
        assert_eq!(compiled.eval(&[]), expected);
    }

    #[rstest]
    #[case("1 +")]
    #[case("(1 + 2")]
    #[case("a.")]
    #[case("1 # 2")]
    #[case("1 2")]
    fn invalid_expressions(#[case] source: &str) {
        assert!(matches!(
            source.parse::<Expression>(),
            Err(RasterOpsError::Expression { .. })
        ));
    }

    #[test]
    fn references_are_unique_and_ordered() {
        let expression: Expression = "!l1_flags.INVALID && (b2 - b1) / (b2 + b1) > 0.3"
            .parse()
            .unwrap();
        assert_eq!(expression.references(), vec!["l1_flags", "b2", "b1"]);
    }

    #[test]
    fn display_reparses_to_same_tree() {
        let expression: Expression = "!l1_flags.INVALID && -b1 * 2 > 3".parse().unwrap();
        let reparsed: Expression = expression.to_string().parse().unwrap();
        assert_eq!(expression, reparsed);
    }
}
