//! Label expressions.
//!
//! A label expression selects checks by their labels:
//!
//! ```text
//! expr    := or
//! or      := and (("||" | ",") and)*
//! and     := unary ("&&" unary)*
//! unary   := "!" unary | primary
//! primary := WORD | "(" expr ")"
//! ```
//!
//! A word is true when it is one of the check's labels (exact string match).
//! Words may contain letters, digits, `_`, `-` and `.`. Nesting of `!` and
//! parentheses is limited to [`MAX_NESTING_DEPTH`].

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Errors produced while parsing a label expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LabelsExprError {
    #[error("label expression is empty")]
    Empty,
    #[error("unexpected character '{ch}' at position {pos}")]
    InvalidChar { pos: usize, ch: char },
    #[error("unexpected token '{found}' at position {pos}")]
    UnexpectedToken { pos: usize, found: String },
    #[error("unexpected end of label expression")]
    UnexpectedEnd,
    #[error("unbalanced parenthesis at position {pos}")]
    UnbalancedParen { pos: usize },
    #[error("label expression exceeds max nesting depth {max} at position {pos}")]
    TooDeep { pos: usize, max: usize },
}

/// Maximum number of nested `!` and `(` in one expression.
pub const MAX_NESTING_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    And,
    Or,
    Not,
    LParen,
    RParen,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Word(w) => write!(f, "{}", w),
            Token::And => write!(f, "&&"),
            Token::Or => write!(f, "||"),
            Token::Not => write!(f, "!"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '.'
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, LabelsExprError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some((pos, c)) = chars.next() {
        match c {
            c if c.is_whitespace() => {}
            '(' => tokens.push((pos, Token::LParen)),
            ')' => tokens.push((pos, Token::RParen)),
            '!' => tokens.push((pos, Token::Not)),
            ',' => tokens.push((pos, Token::Or)),
            '&' | '|' => match chars.peek() {
                Some(&(_, next)) if next == c => {
                    chars.next();
                    let token = if c == '&' { Token::And } else { Token::Or };
                    tokens.push((pos, token));
                }
                _ => return Err(LabelsExprError::InvalidChar { pos, ch: c }),
            },
            c if is_word_char(c) => {
                let mut word = String::from(c);
                while let Some(&(_, next)) = chars.peek() {
                    if !is_word_char(next) {
                        break;
                    }
                    word.push(next);
                    chars.next();
                }
                tokens.push((pos, Token::Word(word)));
            }
            _ => return Err(LabelsExprError::InvalidChar { pos, ch: c }),
        }
    }

    Ok(tokens)
}

/// Parsed form of a label expression.
///
/// `&&` and `||` chains are kept flat so the tree depth only grows with `!`
/// and parentheses, which the parser bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Label(String),
    Not(Box<Node>),
    And(Vec<Node>),
    Or(Vec<Node>),
}

impl Node {
    fn eval(&self, labels: &[String]) -> bool {
        match self {
            Node::Label(word) => labels.iter().any(|l| l == word),
            Node::Not(inner) => !inner.eval(labels),
            Node::And(terms) => terms.iter().all(|t| t.eval(labels)),
            Node::Or(terms) => terms.iter().any(|t| t.eval(labels)),
        }
    }
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn next(&mut self) -> Option<(usize, Token)> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn descend(&mut self, pos: usize) -> Result<(), LabelsExprError> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(LabelsExprError::TooDeep {
                pos,
                max: MAX_NESTING_DEPTH,
            });
        }
        Ok(())
    }

    fn parse_or(&mut self) -> Result<Node, LabelsExprError> {
        let mut terms = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            terms.push(self.parse_and()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Node::Or(terms)
        })
    }

    fn parse_and(&mut self) -> Result<Node, LabelsExprError> {
        let mut terms = vec![self.parse_unary()?];
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            terms.push(self.parse_unary()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Node::And(terms)
        })
    }

    fn parse_unary(&mut self) -> Result<Node, LabelsExprError> {
        if let Some((pos, Token::Not)) = self.tokens.get(self.pos) {
            let pos = *pos;
            self.pos += 1;
            self.descend(pos)?;
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Node::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Node, LabelsExprError> {
        match self.next() {
            Some((_, Token::Word(word))) => Ok(Node::Label(word)),
            Some((open, Token::LParen)) => {
                self.descend(open)?;
                let inner = self.parse_or()?;
                self.depth -= 1;
                match self.next() {
                    Some((_, Token::RParen)) => Ok(inner),
                    Some((pos, found)) => Err(LabelsExprError::UnexpectedToken {
                        pos,
                        found: found.to_string(),
                    }),
                    None => Err(LabelsExprError::UnbalancedParen { pos: open }),
                }
            }
            Some((pos, found)) => Err(LabelsExprError::UnexpectedToken {
                pos,
                found: found.to_string(),
            }),
            None => Err(LabelsExprError::UnexpectedEnd),
        }
    }
}

/// A compiled label expression.
///
/// Parsing happens once per run; [`LabelsExpr::eval`] is a pure function and
/// the value can be shared between threads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelsExpr {
    source: String,
    root: Node,
}

impl LabelsExpr {
    pub fn parse(expr: &str) -> Result<Self, LabelsExprError> {
        let tokens = tokenize(expr)?;
        if tokens.is_empty() {
            return Err(LabelsExprError::Empty);
        }

        let mut parser = Parser {
            tokens,
            pos: 0,
            depth: 0,
        };
        let root = parser.parse_or()?;
        if let Some((pos, token)) = parser.next() {
            return Err(match token {
                Token::RParen => LabelsExprError::UnbalancedParen { pos },
                other => LabelsExprError::UnexpectedToken {
                    pos,
                    found: other.to_string(),
                },
            });
        }

        Ok(LabelsExpr {
            source: expr.to_string(),
            root,
        })
    }

    /// Whether a check carrying `labels` is selected by this expression.
    pub fn eval(&self, labels: &[String]) -> bool {
        self.root.eval(labels)
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl FromStr for LabelsExpr {
    type Err = LabelsExprError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LabelsExpr::parse(s)
    }
}

impl fmt::Display for LabelsExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

/// Replace the `all` keyword by the comma-joined `tags`.
pub fn expand_all_keyword(filter: &str, tags: &[String]) -> String {
    if filter.trim() == "all" {
        tags.join(",")
    } else {
        filter.to_string()
    }
}
