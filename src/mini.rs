//! The mini-notation parser.
//!
//! Compiles textual rhythm expressions like `"bd [sn cp]*2"` into
//! [`Pattern<Value>`]. The notation:
//!
//! ```text
//! bd sn cp        sequence, equal slots
//! ~               rest
//! [bd sn] cp      sub-pattern in one slot
//! [bd sn, cp]     polyrhythm: groups play in parallel, each filling a cycle
//! {bd sn, cp cp cp}  same, brace form
//! <bd sn cp>      alternation: one per cycle
//! bd*2  bd/2      fast / slow
//! bd@3 sn         weighted slots
//! bd?  bd?0.3     random drop
//! bd!3            replication
//! bd:4            sample index suffix
//! bd(3,8)         Euclidean rhythm, optional rotation bd(3,8,1)
//! 0..3            ranges
//! 1%4  2.5  -1    rationals, decimals, signs
//! ```
//!
//! Every atom records its source position, which rides along on events for
//! editor highlighting. Failures return a [`ParseError`] with line/column.

use crate::error::ParseError;
use crate::event::Location;
use crate::pattern::{fastcat, pure, silence, slowcat, stack, timecat, Pattern};
use crate::span::Span;
use crate::state::State;
use crate::time::Time;
use crate::value::{ControlMap, Value};
use std::fmt;

/// Parse mini-notation into a pattern of values.
pub fn parse(input: &str) -> Result<Pattern<Value>, ParseError> {
    Ok(compile(&parse_node(input)?))
}

/// Parse mini-notation and interpret the values as a `sound` control
/// pattern (name plus optional `:n` sample index).
pub fn parse_sound(input: &str) -> Result<Pattern<ControlMap>, ParseError> {
    Ok(crate::control::sound(parse(input)?))
}

/// Parse to the syntax tree. Mostly useful for tests and notation display.
pub fn parse_node(input: &str) -> Result<Node, ParseError> {
    let tokens = lex(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let node = parser.sequence(&[])?;
    if let Some(tok) = parser.peek() {
        return Err(ParseError::new(
            format!("unexpected '{}'", tok.kind),
            tok.by,
            tok.bx,
        ));
    }
    Ok(node)
}

// ----------------------------------------------------------------------
// Lexer
// ----------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Name(String),
    Num(Value),
    Tilde,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    LAngle,
    RAngle,
    LParen,
    RParen,
    Comma,
    Star,
    Slash,
    At,
    Question,
    Bang,
    Colon,
    DotDot,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Name(s) => write!(f, "{}", s),
            TokenKind::Num(v) => write!(f, "{}", v),
            TokenKind::Tilde => write!(f, "~"),
            TokenKind::LBracket => write!(f, "["),
            TokenKind::RBracket => write!(f, "]"),
            TokenKind::LBrace => write!(f, "{{"),
            TokenKind::RBrace => write!(f, "}}"),
            TokenKind::LAngle => write!(f, "<"),
            TokenKind::RAngle => write!(f, ">"),
            TokenKind::LParen => write!(f, "("),
            TokenKind::RParen => write!(f, ")"),
            TokenKind::Comma => write!(f, ","),
            TokenKind::Star => write!(f, "*"),
            TokenKind::Slash => write!(f, "/"),
            TokenKind::At => write!(f, "@"),
            TokenKind::Question => write!(f, "?"),
            TokenKind::Bang => write!(f, "!"),
            TokenKind::Colon => write!(f, ":"),
            TokenKind::DotDot => write!(f, ".."),
        }
    }
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    /// Begin column/line, 1-based.
    bx: u32,
    by: u32,
    /// End column/line (one past the last character).
    ex: u32,
    ey: u32,
}

impl Token {
    fn location(&self) -> Location {
        Location {
            bx: self.bx,
            by: self.by,
            ex: self.ex,
            ey: self.ey,
        }
    }
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: u32,
    col: u32,
}

impl<'a> Lexer<'a> {
    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.col = 1;
        } else {
            self.col += 1;
        }
        Some(c)
    }

    fn peek2(&self) -> Option<char> {
        let mut it = self.chars.clone();
        it.next();
        it.next()
    }
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '\'' || c == '#'
}

fn lex(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut lx = Lexer {
        chars: input.chars().peekable(),
        line: 1,
        col: 1,
    };
    let mut tokens = Vec::new();

    while let Some(c) = lx.peek() {
        if c.is_whitespace() {
            lx.bump();
            continue;
        }
        let (bx, by) = (lx.col, lx.line);
        let kind = match c {
            '~' => {
                lx.bump();
                TokenKind::Tilde
            }
            '[' => {
                lx.bump();
                TokenKind::LBracket
            }
            ']' => {
                lx.bump();
                TokenKind::RBracket
            }
            '{' => {
                lx.bump();
                TokenKind::LBrace
            }
            '}' => {
                lx.bump();
                TokenKind::RBrace
            }
            '<' => {
                lx.bump();
                TokenKind::LAngle
            }
            '>' => {
                lx.bump();
                TokenKind::RAngle
            }
            '(' => {
                lx.bump();
                TokenKind::LParen
            }
            ')' => {
                lx.bump();
                TokenKind::RParen
            }
            ',' => {
                lx.bump();
                TokenKind::Comma
            }
            '*' => {
                lx.bump();
                TokenKind::Star
            }
            '/' => {
                lx.bump();
                TokenKind::Slash
            }
            '@' => {
                lx.bump();
                TokenKind::At
            }
            '?' => {
                lx.bump();
                TokenKind::Question
            }
            '!' => {
                lx.bump();
                TokenKind::Bang
            }
            ':' => {
                lx.bump();
                TokenKind::Colon
            }
            '.' => {
                if lx.peek2() == Some('.') {
                    lx.bump();
                    lx.bump();
                    TokenKind::DotDot
                } else {
                    return Err(ParseError::new("unexpected '.'", by, bx));
                }
            }
            '-' | '0'..='9' => lex_number(&mut lx, by, bx)?,
            c if is_name_start(c) => {
                let mut name = String::new();
                while let Some(c) = lx.peek() {
                    if is_name_char(c) {
                        name.push(c);
                        lx.bump();
                    } else {
                        break;
                    }
                }
                TokenKind::Name(name)
            }
            c => {
                return Err(ParseError::new(format!("unexpected '{}'", c), by, bx));
            }
        };
        tokens.push(Token {
            kind,
            bx,
            by,
            ex: lx.col,
            ey: lx.line,
        });
    }
    Ok(tokens)
}

fn lex_number(lx: &mut Lexer, line: u32, col: u32) -> Result<TokenKind, ParseError> {
    let mut digits = String::new();
    if lx.peek() == Some('-') {
        digits.push('-');
        lx.bump();
        if !matches!(lx.peek(), Some('0'..='9')) {
            return Err(ParseError::new("expected digits after '-'", line, col));
        }
    }
    while matches!(lx.peek(), Some('0'..='9')) {
        digits.push(lx.bump().unwrap());
    }
    match lx.peek() {
        // A decimal, unless the dot starts a '..' range.
        Some('.') if matches!(lx.peek2(), Some('0'..='9')) => {
            digits.push(lx.bump().unwrap());
            while matches!(lx.peek(), Some('0'..='9')) {
                digits.push(lx.bump().unwrap());
            }
            let f: f64 = digits
                .parse()
                .map_err(|_| ParseError::new(format!("bad number '{}'", digits), line, col))?;
            Ok(TokenKind::Num(Value::Double(f)))
        }
        // A rational p%q.
        Some('%') => {
            lx.bump();
            let mut denom = String::new();
            while matches!(lx.peek(), Some('0'..='9')) {
                denom.push(lx.bump().unwrap());
            }
            let p: i64 = digits
                .parse()
                .map_err(|_| ParseError::new(format!("bad number '{}'", digits), line, col))?;
            let q: i64 = denom
                .parse()
                .map_err(|_| ParseError::new("expected digits after '%'", line, col))?;
            if q == 0 {
                return Err(ParseError::new("zero denominator", line, col));
            }
            Ok(TokenKind::Num(Value::Rational(Time::new(p, q))))
        }
        _ => {
            let i: i64 = digits
                .parse()
                .map_err(|_| ParseError::new(format!("bad number '{}'", digits), line, col))?;
            if let Ok(i) = i32::try_from(i) {
                Ok(TokenKind::Num(Value::Int(i)))
            } else {
                Ok(TokenKind::Num(Value::Double(i as f64)))
            }
        }
    }
}

// ----------------------------------------------------------------------
// Syntax tree
// ----------------------------------------------------------------------

/// A parsed mini-notation term.
#[derive(Debug, Clone)]
pub enum Node {
    Atom { value: Value, loc: Option<Location> },
    Rest,
    /// Weighted sequence; weight 1 everywhere means plain equal slots.
    Seq(Vec<(Node, Time)>),
    /// Parallel groups, each filling the cycle (from `[a, b]` / `{a, b}`).
    Poly(Vec<Node>),
    /// Round-robin, one per cycle (from `<a b>`).
    Alt(Vec<Node>),
    Fast(Box<Node>, Box<Node>),
    Slow(Box<Node>, Box<Node>),
    Degrade(Box<Node>, f64),
    Euclid {
        elem: Box<Node>,
        pulses: Box<Node>,
        steps: Box<Node>,
        rotation: Option<Box<Node>>,
    },
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<&Token> {
        let tok = self.tokens.get(self.pos);
        self.pos += 1;
        tok
    }

    fn eof_error(&self, expected: &str) -> ParseError {
        let (line, col) = self
            .tokens
            .last()
            .map(|t| (t.ey, t.ex))
            .unwrap_or((1, 1));
        ParseError::new(format!("expected {}, found end of input", expected), line, col)
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> Result<(), ParseError> {
        match self.peek() {
            Some(tok) if tok.kind == kind => {
                self.bump();
                Ok(())
            }
            Some(tok) => Err(ParseError::new(
                format!("expected {}, found '{}'", what, tok.kind),
                tok.by,
                tok.bx,
            )),
            None => Err(self.eof_error(what)),
        }
    }

    /// Parse a sequence of weighted steps until one of `stops` (or the end).
    fn sequence(&mut self, stops: &[TokenKind]) -> Result<Node, ParseError> {
        let mut steps: Vec<(Node, Time)> = Vec::new();
        while let Some(tok) = self.peek() {
            if stops.contains(&tok.kind) {
                break;
            }
            self.step(&mut steps)?;
        }
        Ok(match steps.len() {
            0 => Node::Rest,
            1 if steps[0].1 == Time::one() => steps.into_iter().next().unwrap().0,
            _ => Node::Seq(steps),
        })
    }

    /// Parse one sequence step, which may expand to several (ranges and
    /// replication).
    fn step(&mut self, steps: &mut Vec<(Node, Time)>) -> Result<(), ParseError> {
        // A standalone `!` repeats the previous step.
        if let Some(tok) = self.peek() {
            if tok.kind == TokenKind::Bang {
                let (by, bx) = (tok.by, tok.bx);
                let bang_end = (tok.ey, tok.ex);
                self.bump();
                let count = match self.attached_number(bang_end) {
                    Some(v) => v.as_i().unwrap_or(2).max(2) as usize,
                    None => 2,
                };
                let prev = steps
                    .last()
                    .cloned()
                    .ok_or_else(|| ParseError::new("'!' with nothing to repeat", by, bx))?;
                for _ in 1..count {
                    steps.push(prev.clone());
                }
                return Ok(());
            }
        }

        let node = self.element()?;

        // Ranges expand in place: `0..3` is four steps.
        if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::DotDot)) {
            let from = match &node {
                Node::Atom { value, .. } => value.as_i(),
                _ => None,
            };
            let dot = self.bump().unwrap();
            let (dy, dx) = (dot.by, dot.bx);
            let to = match self.peek() {
                Some(Token { kind: TokenKind::Num(v), .. }) => {
                    let to = v.as_i();
                    self.bump();
                    to
                }
                _ => None,
            };
            let (from, to) = match (from, to) {
                (Some(a), Some(b)) => (a, b),
                _ => return Err(ParseError::new("'..' needs integer bounds", dy, dx)),
            };
            let range: Vec<i32> = if from <= to {
                (from..=to).collect()
            } else {
                (to..=from).rev().collect()
            };
            for i in range {
                steps.push((
                    Node::Atom {
                        value: Value::Int(i),
                        loc: None,
                    },
                    Time::one(),
                ));
            }
            return Ok(());
        }

        let (node, weight, replicate) = self.modifiers(node)?;
        for _ in 0..replicate {
            steps.push((node.clone(), weight));
        }
        Ok(())
    }

    /// Parse one atom or group.
    fn element(&mut self) -> Result<Node, ParseError> {
        let tok = match self.bump() {
            Some(t) => t.clone(),
            None => return Err(self.eof_error("a pattern element")),
        };
        let loc = tok.location();
        match tok.kind {
            TokenKind::Tilde => Ok(Node::Rest),
            TokenKind::Name(name) => {
                // `name:index` selects a sample within the bank.
                if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Colon)) {
                    self.bump();
                    match self.peek().cloned() {
                        Some(Token { kind: TokenKind::Num(v), ex, ey, .. }) => {
                            self.bump();
                            let index = v.as_i().ok_or_else(|| {
                                ParseError::new("expected integer after ':'", tok.by, tok.bx)
                            })?;
                            Ok(Node::Atom {
                                value: Value::Str(format!("{}:{}", name, index)),
                                loc: Some(Location {
                                    bx: tok.bx,
                                    by: tok.by,
                                    ex,
                                    ey,
                                }),
                            })
                        }
                        _ => Err(ParseError::new(
                            "expected number after ':'",
                            tok.by,
                            tok.bx,
                        )),
                    }
                } else {
                    Ok(Node::Atom {
                        value: Value::Str(name),
                        loc: Some(loc),
                    })
                }
            }
            TokenKind::Num(v) => Ok(Node::Atom {
                value: v,
                loc: Some(loc),
            }),
            TokenKind::LBracket => {
                let node = self.groups(TokenKind::RBracket)?;
                self.expect(TokenKind::RBracket, "']'")?;
                Ok(node)
            }
            TokenKind::LBrace => {
                let node = self.groups(TokenKind::RBrace)?;
                self.expect(TokenKind::RBrace, "'}'")?;
                Ok(node)
            }
            TokenKind::LAngle => {
                let mut alts = Vec::new();
                while let Some(t) = self.peek() {
                    if t.kind == TokenKind::RAngle {
                        break;
                    }
                    let mut slot = Vec::new();
                    self.step(&mut slot)?;
                    for (node, _) in slot {
                        alts.push(node);
                    }
                }
                self.expect(TokenKind::RAngle, "'>'")?;
                Ok(match alts.len() {
                    0 => Node::Rest,
                    1 => alts.into_iter().next().unwrap(),
                    _ => Node::Alt(alts),
                })
            }
            kind => Err(ParseError::new(
                format!("unexpected '{}'", kind),
                tok.by,
                tok.bx,
            )),
        }
    }

    /// Comma-separated groups inside brackets or braces.
    fn groups(&mut self, close: TokenKind) -> Result<Node, ParseError> {
        let stops = [TokenKind::Comma, close];
        let mut groups = vec![self.sequence(&stops)?];
        while matches!(self.peek().map(|t| &t.kind), Some(TokenKind::Comma)) {
            self.bump();
            groups.push(self.sequence(&stops)?);
        }
        Ok(if groups.len() == 1 {
            groups.into_iter().next().unwrap()
        } else {
            Node::Poly(groups)
        })
    }

    /// Postfix modifiers. Returns the decorated node, its `@` weight, and
    /// its `!` replication count.
    fn modifiers(&mut self, mut node: Node) -> Result<(Node, Time, usize), ParseError> {
        let mut weight = Time::one();
        let mut replicate = 1usize;
        loop {
            let tok = match self.peek() {
                Some(t) => t.clone(),
                None => break,
            };
            match tok.kind {
                TokenKind::Star => {
                    self.bump();
                    let amount = self.argument("after '*'")?;
                    node = Node::Fast(Box::new(node), Box::new(amount));
                }
                TokenKind::Slash => {
                    self.bump();
                    let amount = self.argument("after '/'")?;
                    node = Node::Slow(Box::new(node), Box::new(amount));
                }
                TokenKind::At => {
                    self.bump();
                    let amount = self.argument("after '@'")?;
                    weight = match &amount {
                        Node::Atom { value, .. } => value
                            .as_f()
                            .map(Time::from)
                            .filter(|w| *w > Time::zero())
                            .ok_or_else(|| {
                                ParseError::new("'@' needs a positive number", tok.by, tok.bx)
                            })?,
                        _ => {
                            return Err(ParseError::new(
                                "'@' needs a positive number",
                                tok.by,
                                tok.bx,
                            ))
                        }
                    };
                }
                TokenKind::Question => {
                    self.bump();
                    let amount = self
                        .attached_number((tok.ey, tok.ex))
                        .and_then(|v| v.as_f())
                        .unwrap_or(0.5);
                    node = Node::Degrade(Box::new(node), amount.clamp(0.0, 1.0));
                }
                TokenKind::Bang => {
                    self.bump();
                    replicate = self
                        .attached_number((tok.ey, tok.ex))
                        .and_then(|v| v.as_i())
                        .map(|n| n.max(1) as usize)
                        .unwrap_or(2);
                }
                TokenKind::LParen => {
                    self.bump();
                    let pulses = self.argument("for pulses")?;
                    self.expect(TokenKind::Comma, "','")?;
                    let steps = self.argument("for steps")?;
                    let rotation = if matches!(
                        self.peek().map(|t| &t.kind),
                        Some(TokenKind::Comma)
                    ) {
                        self.bump();
                        Some(Box::new(self.argument("for rotation")?))
                    } else {
                        None
                    };
                    self.expect(TokenKind::RParen, "')'")?;
                    node = Node::Euclid {
                        elem: Box::new(node),
                        pulses: Box::new(pulses),
                        steps: Box::new(steps),
                        rotation,
                    };
                }
                _ => break,
            }
        }
        Ok((node, weight, replicate))
    }

    /// A modifier argument: a number or an alternation of numbers.
    fn argument(&mut self, what: &str) -> Result<Node, ParseError> {
        match self.peek().cloned() {
            Some(Token { kind: TokenKind::Num(v), .. }) => {
                self.bump();
                Ok(Node::Atom {
                    value: v,
                    loc: None,
                })
            }
            Some(Token { kind: TokenKind::LAngle, .. }) => self.element(),
            Some(tok) => Err(ParseError::new(
                format!("expected a number {}, found '{}'", what, tok.kind),
                tok.by,
                tok.bx,
            )),
            None => Err(self.eof_error(&format!("a number {}", what))),
        }
    }

    /// A number token directly attached to the previous token (no
    /// whitespace), as in `bd?0.3` or `bd!3`.
    fn attached_number(&mut self, prev_end: (u32, u32)) -> Option<Value> {
        match self.peek() {
            Some(Token {
                kind: TokenKind::Num(v),
                bx,
                by,
                ..
            }) if (*by, *bx) == prev_end => {
                let v = v.clone();
                self.bump();
                Some(v)
            }
            _ => None,
        }
    }
}

// ----------------------------------------------------------------------
// Compilation
// ----------------------------------------------------------------------

fn value_time(v: &Value) -> Option<Time> {
    match v {
        Value::Int(i) => Some(Time::int(*i as i64)),
        Value::Rational(t) => Some(*t),
        Value::Double(f) => Some(Time::from(*f)),
        _ => None,
    }
}

/// Sample a pattern at the start of the cycle containing `state`'s span.
fn at_cycle(pat: &Pattern<Value>, state: &State) -> Option<Value> {
    let probe = state.set_span(Span::instant(state.span.begin.sam()));
    pat.query(&probe).into_iter().next().map(|e| e.value)
}

/// Compile a syntax tree into a pattern.
pub fn compile(node: &Node) -> Pattern<Value> {
    match node {
        Node::Atom { value, loc } => {
            let p = pure(value.clone());
            match loc {
                Some(loc) => p.with_location(*loc),
                None => p,
            }
        }
        Node::Rest => silence(),
        Node::Seq(steps) => {
            if steps.iter().all(|(_, w)| *w == Time::one()) {
                fastcat(steps.iter().map(|(n, _)| compile(n)).collect())
            } else {
                timecat(steps.iter().map(|(n, w)| (*w, compile(n))).collect())
            }
        }
        Node::Poly(groups) => stack(groups.iter().map(compile).collect()),
        Node::Alt(alts) => slowcat(alts.iter().map(compile).collect()),
        Node::Fast(elem, amount) => scaled(elem, amount, false),
        Node::Slow(elem, amount) => scaled(elem, amount, true),
        Node::Degrade(elem, amount) => compile(elem).degrade_by(*amount),
        Node::Euclid {
            elem,
            pulses,
            steps,
            rotation,
        } => {
            let elem = compile(elem);
            let statics = (
                static_time(pulses),
                static_time(steps),
                rotation.as_deref().map(static_time),
            );
            match statics {
                (Some(n), Some(k), None) => {
                    elem.euclid_off(n.numer(), k.numer(), 0)
                }
                (Some(n), Some(k), Some(Some(r))) => {
                    elem.euclid_off(n.numer(), k.numer(), r.numer())
                }
                _ => {
                    // Patterned arguments: re-derive the rhythm each cycle.
                    let pulses = compile(pulses);
                    let steps = compile(steps);
                    let rotation = rotation.as_deref().map(compile);
                    Pattern::new(move |state| {
                        let n = at_cycle(&pulses, state)
                            .and_then(|v| v.as_i())
                            .unwrap_or(0) as i64;
                        let k = at_cycle(&steps, state)
                            .and_then(|v| v.as_i())
                            .unwrap_or(0) as i64;
                        let r = rotation
                            .as_ref()
                            .and_then(|p| at_cycle(p, state))
                            .and_then(|v| v.as_i())
                            .unwrap_or(0) as i64;
                        elem.clone().euclid_off(n, k, r).query(state)
                    })
                    .split_queries()
                }
            }
        }
    }
}

/// A statically-known integral or rational argument.
fn static_time(node: &Node) -> Option<Time> {
    match node {
        Node::Atom { value, .. } => value_time(value),
        _ => None,
    }
}

fn scaled(elem: &Node, amount: &Node, slow: bool) -> Pattern<Value> {
    let elem = compile(elem);
    if let Some(t) = static_time(amount) {
        return if slow { elem.slow(t) } else { elem.fast(t) };
    }
    let amount = compile(amount);
    Pattern::new(move |state| {
        match at_cycle(&amount, state).as_ref().and_then(value_time) {
            Some(t) => {
                let p = if slow {
                    elem.clone().slow(t)
                } else {
                    elem.clone().fast(t)
                };
                p.query(state)
            }
            None => Vec::new(),
        }
    })
    .split_queries()
}

// ----------------------------------------------------------------------
// Display (round-trippable for the notation subset without positions)
// ----------------------------------------------------------------------

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Atom { value, .. } => match value {
                Value::Str(s) => write!(f, "{}", s),
                // `1/4` would re-lex as a slow modifier.
                Value::Rational(t) => write!(f, "{}%{}", t.numer(), t.denom()),
                v => write!(f, "{}", v),
            },
            Node::Rest => write!(f, "~"),
            Node::Seq(steps) => {
                for (i, (node, weight)) in steps.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write_grouped(f, node)?;
                    if *weight != Time::one() {
                        if weight.denom() == 1 {
                            write!(f, "@{}", weight.numer())?;
                        } else {
                            write!(f, "@{}%{}", weight.numer(), weight.denom())?;
                        }
                    }
                }
                Ok(())
            }
            Node::Poly(groups) => {
                write!(f, "[")?;
                for (i, group) in groups.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", group)?;
                }
                write!(f, "]")
            }
            Node::Alt(alts) => {
                write!(f, "<")?;
                for (i, alt) in alts.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write_grouped(f, alt)?;
                }
                write!(f, ">")
            }
            Node::Fast(elem, amount) => {
                write_grouped(f, elem)?;
                write!(f, "*")?;
                write_grouped(f, amount)
            }
            Node::Slow(elem, amount) => {
                write_grouped(f, elem)?;
                write!(f, "/")?;
                write_grouped(f, amount)
            }
            Node::Degrade(elem, amount) => {
                write_grouped(f, elem)?;
                if (*amount - 0.5).abs() < f64::EPSILON {
                    write!(f, "?")
                } else {
                    write!(f, "?{}", amount)
                }
            }
            Node::Euclid {
                elem,
                pulses,
                steps,
                rotation,
            } => {
                write_grouped(f, elem)?;
                write!(f, "({},{}", pulses, steps)?;
                if let Some(rotation) = rotation {
                    write!(f, ",{}", rotation)?;
                }
                write!(f, ")")
            }
        }
    }
}

fn write_grouped(f: &mut fmt::Formatter<'_>, node: &Node) -> fmt::Result {
    match node {
        Node::Seq(_) => write!(f, "[{}]", node),
        _ => write!(f, "{}", node),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::sort_events;

    fn t(n: i64, d: i64) -> Time {
        Time::new(n, d)
    }

    fn values(p: &Pattern<Value>) -> Vec<String> {
        p.first_cycle()
            .into_iter()
            .map(|e| e.value.as_s().unwrap_or_default())
            .collect()
    }

    #[test]
    fn two_step_sequence() {
        let p = parse("bd sn").unwrap();
        let events = p.first_cycle();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].value, Value::Str("bd".into()));
        assert_eq!(events[0].whole, Some(Span::new(t(0, 1), t(1, 2))));
        assert_eq!(events[0].active, Span::new(t(0, 1), t(1, 2)));
        assert_eq!(events[1].value, Value::Str("sn".into()));
        assert_eq!(events[1].whole, Some(Span::new(t(1, 2), t(1, 1))));
        assert_eq!(events[1].active, Span::new(t(1, 2), t(1, 1)));
    }

    #[test]
    fn rest_leaves_a_gap() {
        let p = parse("bd ~ sn").unwrap();
        let events = p.first_cycle();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].active.begin, t(2, 3));
    }

    #[test]
    fn reversed_three_steps() {
        let p = parse("bd sn cp").unwrap().rev();
        let events = p.first_cycle();
        assert_eq!(
            events.iter().map(|e| e.value.as_s().unwrap()).collect::<Vec<_>>(),
            vec!["cp", "sn", "bd"]
        );
        assert_eq!(events[0].active, Span::new(t(0, 1), t(1, 3)));
        assert_eq!(events[1].active, Span::new(t(1, 3), t(2, 3)));
        assert_eq!(events[2].active, Span::new(t(2, 3), t(1, 1)));
    }

    #[test]
    fn nested_brackets_compress() {
        let p = parse("bd [sn cp]").unwrap();
        let events = p.first_cycle();
        assert_eq!(events.len(), 3);
        assert_eq!(events[1].whole, Some(Span::new(t(1, 2), t(3, 4))));
        assert_eq!(events[2].whole, Some(Span::new(t(3, 4), t(1, 1))));
    }

    #[test]
    fn comma_groups_are_parallel() {
        for src in ["[bd sn, cp cp cp]", "{bd sn, cp cp cp}"] {
            let p = parse(src).unwrap();
            let events = p.first_cycle();
            assert_eq!(events.len(), 5, "in {}", src);
            // Three-against-two: the second group subdivides by three.
            let cps: Vec<_> = events
                .iter()
                .filter(|e| e.value == Value::Str("cp".into()))
                .collect();
            assert_eq!(cps.len(), 3);
            assert_eq!(cps[0].whole, Some(Span::new(t(0, 1), t(1, 3))));
        }
    }

    #[test]
    fn alternation_rotates_per_cycle() {
        let p = parse("<bd sn cp>").unwrap();
        for (cycle, expected) in ["bd", "sn", "cp", "bd"].iter().enumerate() {
            let events = p.query_span(t(cycle as i64, 1), t(cycle as i64 + 1, 1));
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].value, Value::Str(expected.to_string()));
        }
    }

    #[test]
    fn star_speeds_up_a_slot() {
        let p = parse("bd [sn cp]*2").unwrap();
        let events = p.first_cycle();
        assert_eq!(events.len(), 5);
        let sns = events
            .iter()
            .filter(|e| e.value == Value::Str("sn".into()))
            .count();
        assert_eq!(sns, 2);
    }

    #[test]
    fn slash_stretches() {
        let p = parse("bd/2").unwrap();
        // The event starts in cycle 0 and only its tail shows in cycle 1.
        assert_eq!(p.query_span(t(0, 1), t(1, 1)).len(), 1);
        let second = p.query_span(t(1, 1), t(2, 1));
        assert_eq!(second.len(), 1);
        assert!(!second[0].has_onset());
    }

    #[test]
    fn at_weights_slots() {
        let p = parse("bd@3 sn").unwrap();
        let events = p.first_cycle();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].whole, Some(Span::new(t(0, 1), t(3, 4))));
        assert_eq!(events[1].whole, Some(Span::new(t(3, 4), t(1, 1))));
    }

    #[test]
    fn bang_replicates() {
        let p = parse("bd!3 sn").unwrap();
        assert_eq!(values(&p), vec!["bd", "bd", "bd", "sn"]);
        let q = parse("bd ! sn").unwrap();
        assert_eq!(values(&q), vec!["bd", "bd", "sn"]);
    }

    #[test]
    fn colon_attaches_sample_index() {
        let p = parse("bd:3 sn").unwrap();
        assert_eq!(values(&p), vec!["bd:3", "sn"]);
    }

    #[test]
    fn euclid_matches_combinator() {
        let a = parse("bd(3,8)").unwrap();
        let b = pure(Value::Str("bd".into())).euclid(3, 8);
        let mut ea = a.first_cycle();
        let mut eb = b.first_cycle();
        sort_events(&mut ea);
        sort_events(&mut eb);
        assert_eq!(ea.len(), 3);
        assert_eq!(ea.len(), eb.len());
        for (x, y) in ea.iter().zip(eb.iter()) {
            assert_eq!(x.value, y.value);
            assert_eq!(x.active, y.active);
            assert_eq!(x.whole, y.whole);
        }
        assert_eq!(ea[0].active.begin, t(0, 1));
        assert_eq!(ea[1].active.begin, t(3, 8));
        assert_eq!(ea[2].active.begin, t(6, 8));
    }

    #[test]
    fn euclid_with_rotation() {
        let p = parse("bd(3,8,3)").unwrap();
        let events = p.first_cycle();
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn euclid_with_alternating_pulses() {
        let p = parse("bd(<3 4>,8)").unwrap();
        assert_eq!(p.query_span(t(0, 1), t(1, 1)).len(), 3);
        assert_eq!(p.query_span(t(1, 1), t(2, 1)).len(), 4);
        assert_eq!(p.query_span(t(2, 1), t(3, 1)).len(), 3);
    }

    #[test]
    fn star_with_alternating_amount() {
        let p = parse("bd*<1 2>").unwrap();
        assert_eq!(p.query_span(t(0, 1), t(1, 1)).len(), 1);
        assert_eq!(p.query_span(t(1, 1), t(2, 1)).len(), 2);
    }

    #[test]
    fn degrade_is_deterministic() {
        let p = parse("bd*16?").unwrap();
        let a = p.first_cycle().len();
        assert_eq!(a, p.first_cycle().len());
        assert!(a <= 16);

        let q = parse("[bd sn cp oh]*4?").unwrap();
        let kept = q.first_cycle().len();
        assert!(kept <= 16);
        assert_eq!(kept, q.first_cycle().len());
    }

    #[test]
    fn degrade_with_probability() {
        let none = parse("bd*8?0").unwrap();
        assert_eq!(none.first_cycle().len(), 8);
        let all = parse("bd*8?1").unwrap();
        assert_eq!(all.first_cycle().len(), 0);
    }

    #[test]
    fn question_with_space_does_not_eat_numbers() {
        // "bd? 3" is a degraded bd followed by the number three.
        let p = parse("bd? 3").unwrap();
        let has_three = p
            .first_cycle()
            .iter()
            .any(|e| e.value == Value::Int(3));
        assert!(has_three);
    }

    #[test]
    fn ranges_expand() {
        let p = parse("0..3").unwrap();
        let vals: Vec<Value> = p.first_cycle_values();
        assert_eq!(
            vals,
            vec![Value::Int(0), Value::Int(1), Value::Int(2), Value::Int(3)]
        );
        let q = parse("3..0").unwrap();
        assert_eq!(
            q.first_cycle_values(),
            vec![Value::Int(3), Value::Int(2), Value::Int(1), Value::Int(0)]
        );
    }

    #[test]
    fn numbers_parse_exactly() {
        let p = parse("1 2.5 1%4 -1").unwrap();
        let vals = p.first_cycle_values();
        assert_eq!(vals[0], Value::Int(1));
        assert_eq!(vals[1], Value::Double(2.5));
        assert_eq!(vals[2], Value::Rational(t(1, 4)));
        assert_eq!(vals[3], Value::Int(-1));
    }

    #[test]
    fn atoms_carry_source_positions() {
        let p = parse("bd sn").unwrap();
        let events = p.first_cycle();
        let loc = events[0].context.locations[0];
        assert_eq!((loc.by, loc.bx), (1, 1));
        assert_eq!((loc.ey, loc.ex), (1, 3));
        let loc = events[1].context.locations[0];
        assert_eq!((loc.by, loc.bx), (1, 4));
        assert_eq!((loc.ey, loc.ex), (1, 6));
    }

    #[test]
    fn parse_errors_carry_positions() {
        let err = parse("bd [sn").unwrap_err();
        assert!(err.message.contains("']'"), "{}", err.message);

        let err = parse("bd )").unwrap_err();
        assert_eq!(err.line, 1);
        assert_eq!(err.column, 4);

        let err = parse("bd\ncp )").unwrap_err();
        assert_eq!(err.line, 2);

        assert!(parse("bd(3)").is_err());
        assert!(parse("1%0").is_err());
    }

    #[test]
    fn show_round_trips() {
        for src in [
            "bd sn",
            "bd [sn cp]",
            "bd*2 sn",
            "bd/2",
            "bd?",
            "bd(3,8)",
            "bd(3,8,1)",
            "<bd sn> cp",
            "[bd, sn cp]",
            "bd@3 sn",
        ] {
            let node = parse_node(src).unwrap();
            let shown = node.to_string();
            let a = parse(src).unwrap();
            let b = parse(&shown).unwrap();
            let mut ea = a.query_span(t(0, 1), t(4, 1));
            let mut eb = b.query_span(t(0, 1), t(4, 1));
            sort_events(&mut ea);
            sort_events(&mut eb);
            assert_eq!(ea.len(), eb.len(), "{} vs {}", src, shown);
            for (x, y) in ea.iter().zip(eb.iter()) {
                assert_eq!(x.value, y.value, "{} vs {}", src, shown);
                assert_eq!(x.active, y.active, "{} vs {}", src, shown);
                assert_eq!(x.whole, y.whole, "{} vs {}", src, shown);
            }
        }
    }

    #[test]
    fn empty_input_is_silence() {
        assert!(parse("").unwrap().first_cycle().is_empty());
        assert!(parse("~").unwrap().first_cycle().is_empty());
    }
}
