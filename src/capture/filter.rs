//! Capture filter expressions, a subset of pcap-filter(7).
//!
//! ```text
//! expr      := and_expr (("or" | "||") and_expr)*
//! and_expr  := unary (("and" | "&&") unary)*
//! unary     := ("not" | "!") unary | "(" expr ")" | primitive
//! primitive := "ip" | "ip6"
//!            | ["udp" | "tcp"] [dir] ("port" N | "portrange" A-B)
//!            | "udp" | "tcp"
//!            | [dir] "host" ADDR
//! dir       := "src" | "dst"
//! ```

use std::net::IpAddr;
use std::ops::RangeInclusive;

use thiserror::Error;

use super::dissect::{dissect, Dissected, LinkType, Transport};
use super::Frame;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("syntax error in filter expression: unexpected end of expression")]
    UnexpectedEnd,
    #[error("syntax error in filter expression: unexpected '{0}'")]
    Unexpected(String),
    #[error("invalid host address '{0}'")]
    InvalidHost(String),
    #[error("invalid port '{0}'")]
    InvalidPort(String),
    #[error("invalid port range '{0}'")]
    InvalidPortRange(String),
    #[error("link type {0} is not supported by the filter")]
    UnsupportedLinkType(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    LParen,
    RParen,
    Not,
    And,
    Or,
    Word(String),
}

impl Token {
    fn text(&self) -> String {
        match self {
            Token::LParen => "(".into(),
            Token::RParen => ")".into(),
            Token::Not => "!".into(),
            Token::And => "&&".into(),
            Token::Or => "||".into(),
            Token::Word(w) => w.clone(),
        }
    }
}

fn tokenize(text: &str) -> Result<Vec<Token>, FilterError> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '!' => {
                chars.next();
                tokens.push(Token::Not);
            }
            '&' | '|' => {
                chars.next();
                if chars.next() != Some(c) {
                    return Err(FilterError::Unexpected(c.to_string()));
                }
                tokens.push(if c == '&' { Token::And } else { Token::Or });
            }
            _ => {
                let mut word = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || "()!&|".contains(c) {
                        break;
                    }
                    word.push(c);
                    chars.next();
                }
                tokens.push(match word.to_ascii_lowercase().as_str() {
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    _ => Token::Word(word),
                });
            }
        }
    }
    Ok(tokens)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dir {
    Src,
    Dst,
    Either,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Primitive {
    Ip4,
    Ip6,
    Proto(Transport),
    Host(Dir, IpAddr),
    Port {
        transport: Option<Transport>,
        dir: Dir,
        ports: RangeInclusive<u16>,
    },
}

impl Primitive {
    fn matches(&self, d: &Dissected) -> bool {
        match self {
            Primitive::Ip4 => d.is_ipv4(),
            Primitive::Ip6 => d.is_ipv6(),
            Primitive::Proto(t) => d.transport == Some(*t),
            Primitive::Host(dir, addr) => {
                let src = d.src == Some(*addr);
                let dst = d.dst == Some(*addr);
                match dir {
                    Dir::Src => src,
                    Dir::Dst => dst,
                    Dir::Either => src || dst,
                }
            }
            Primitive::Port {
                transport,
                dir,
                ports,
            } => {
                if d.transport.is_none() || (transport.is_some() && d.transport != *transport) {
                    return false;
                }
                let src = d.src_port.is_some_and(|p| ports.contains(&p));
                let dst = d.dst_port.is_some_and(|p| ports.contains(&p));
                match dir {
                    Dir::Src => src,
                    Dir::Dst => dst,
                    Dir::Either => src || dst,
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Primitive(Primitive),
}

impl Expr {
    fn matches(&self, d: &Dissected) -> bool {
        match self {
            Expr::And(a, b) => a.matches(d) && b.matches(d),
            Expr::Or(a, b) => a.matches(d) || b.matches(d),
            Expr::Not(e) => !e.matches(d),
            Expr::Primitive(p) => p.matches(d),
        }
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Result<Token, FilterError> {
        let token = self
            .tokens
            .get(self.pos)
            .cloned()
            .ok_or(FilterError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(token)
    }

    fn peek_word(&self) -> Option<String> {
        match self.peek() {
            Some(Token::Word(w)) => Some(w.to_ascii_lowercase()),
            _ => None,
        }
    }

    fn word(&mut self) -> Result<String, FilterError> {
        match self.next()? {
            Token::Word(w) => Ok(w),
            other => Err(FilterError::Unexpected(other.text())),
        }
    }

    fn expr(&mut self) -> Result<Expr, FilterError> {
        let mut left = self.and_expr()?;
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            let right = self.and_expr()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, FilterError> {
        let mut left = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let right = self.unary()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn unary(&mut self) -> Result<Expr, FilterError> {
        match self.next()? {
            Token::Not => Ok(Expr::Not(Box::new(self.unary()?))),
            Token::LParen => {
                let inner = self.expr()?;
                match self.next()? {
                    Token::RParen => Ok(inner),
                    other => Err(FilterError::Unexpected(other.text())),
                }
            }
            Token::Word(w) => self.primitive(&w).map(Expr::Primitive),
            other => Err(FilterError::Unexpected(other.text())),
        }
    }

    fn primitive(&mut self, first: &str) -> Result<Primitive, FilterError> {
        match first.to_ascii_lowercase().as_str() {
            "ip" => Ok(Primitive::Ip4),
            "ip6" => Ok(Primitive::Ip6),
            proto @ ("udp" | "tcp") => {
                let transport = if proto == "udp" {
                    Transport::Udp
                } else {
                    Transport::Tcp
                };
                match self.peek_word().as_deref() {
                    Some("src" | "dst" | "port" | "portrange") => {
                        let keyword = self.word()?;
                        self.qualified(Some(transport), &keyword)
                    }
                    _ => Ok(Primitive::Proto(transport)),
                }
            }
            _ => self.qualified(None, first),
        }
    }

    /// `[dir] host|port|portrange VALUE`, starting at `keyword`.
    fn qualified(&mut self, transport: Option<Transport>, keyword: &str) -> Result<Primitive, FilterError> {
        let mut keyword = keyword.to_ascii_lowercase();
        let dir = match keyword.as_str() {
            "src" => Dir::Src,
            "dst" => Dir::Dst,
            _ => Dir::Either,
        };
        if dir != Dir::Either {
            keyword = self.word()?.to_ascii_lowercase();
        }

        match keyword.as_str() {
            "host" if transport.is_none() => {
                let value = self.word()?;
                let addr = value
                    .parse::<IpAddr>()
                    .map_err(|_| FilterError::InvalidHost(value.clone()))?;
                Ok(Primitive::Host(dir, addr))
            }
            "port" => {
                let value = self.word()?;
                let port = parse_port(&value).ok_or(FilterError::InvalidPort(value))?;
                Ok(Primitive::Port {
                    transport,
                    dir,
                    ports: port..=port,
                })
            }
            "portrange" => {
                let value = self.word()?;
                let ports = value
                    .split_once('-')
                    .and_then(|(a, b)| Some(parse_port(a)?..=parse_port(b)?))
                    .filter(|r| r.start() <= r.end())
                    .ok_or(FilterError::InvalidPortRange(value))?;
                Ok(Primitive::Port {
                    transport,
                    dir,
                    ports,
                })
            }
            _ => Err(FilterError::Unexpected(keyword)),
        }
    }
}

fn parse_port(text: &str) -> Option<u16> {
    text.parse().ok()
}

/// A compiled filter. The empty filter matches every frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    expr: Option<Expr>,
}

impl Filter {
    pub fn compile(text: &str) -> Result<Self, FilterError> {
        let tokens = tokenize(text)?;
        if tokens.is_empty() {
            return Ok(Filter { expr: None });
        }
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.expr()?;
        if let Some(extra) = parser.peek() {
            return Err(FilterError::Unexpected(extra.text()));
        }
        Ok(Filter { expr: Some(expr) })
    }

    pub fn is_empty(&self) -> bool {
        self.expr.is_none()
    }

    /// Whether `frame` passes. A non-empty filter fails on link types the
    /// dissector cannot parse.
    pub fn matches(&self, frame: &Frame) -> Result<bool, FilterError> {
        let Some(expr) = &self.expr else {
            return Ok(true);
        };
        self.check_link_type(frame.link_type)?;
        Ok(expr.matches(&dissect(frame.link_type, &frame.data)))
    }

    /// Fail if this filter cannot be applied to frames of `link_type`.
    pub fn check_link_type(&self, link_type: LinkType) -> Result<(), FilterError> {
        match (&self.expr, link_type) {
            (Some(_), LinkType::Other(raw)) => Err(FilterError::UnsupportedLinkType(raw)),
            _ => Ok(()),
        }
    }
}
