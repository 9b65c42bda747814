//! Parser (C1): tokenises and parses S-expressions into an `Ast`, with
//! line/column diagnostics on failure (spec §4.1).
//!
//! Grammar:
//! ```text
//! document    = { whitespace | comment | expression } ;
//! expression  = "(" verb { argument } ")" ;
//! verb        = identifier "." identifier ;
//! argument    = expression | string | number | boolean | identifier ;
//! string      = '"' { char | escape } '"' ;   (* escapes: \n \t \" \\ \r \0 *)
//! number      = [ "-" ] digit { digit } [ "." digit { digit } ] ;
//! boolean     = "true" | "false" ;
//! identifier  = letter { letter | digit | "." | "-" | "_" | ":" } ;
//! comment     = ";" { any-but-newline } newline ;
//! ```
//!
//! Two extensions beyond the literal grammar:
//!
//! - Every worked example in §8 uses Lisp-style `:keyword value` argument
//!   tags (`:investor`, `:tier`, `:trade-date`, ...), which start with `:`
//!   rather than a letter. The grammar's `identifier` production only
//!   allows `:` as a continuation character, so a leading `:` is accepted
//!   here as well — the alternative would reject every scenario in the
//!   spec's own test suite.
//! - §8 scenario 6 nests expressions whose head is a bare, non-dotted
//!   word (`(bind (attr-id "uuid-1") (value "X"))`), not a `group.action`
//!   verb. An expression head therefore accepts either form: a dotted
//!   head parses as `Node::Verb`, a bare one as `Node::Identifier`. Only
//!   the `Verb` form counts towards `extract_verbs`/routing.
//!
//! Position tracking follows the teacher's technique
//! (`crates/dsl-core/src/parser.rs` + `diagnostics.rs::byte_to_line_col`):
//! nom parsers don't carry source position themselves, so every node's
//! start offset is computed as `original.len() - remaining.len()` at the
//! point it begins, then converted to line/col. Unlike the teacher, that
//! conversion is backed by a precomputed line-start table (binary search)
//! rather than a fresh O(n) scan per node, which is what keeps a 100-line
//! program inside the <1ms parse budget (spec §4.1).

use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, tag, take_while},
    character::complete::{char, digit1, none_of},
    combinator::{all_consuming, cut, map, opt, recognize, value, verify},
    multi::many0,
    sequence::{delimited, pair, preceded, tuple},
    IResult,
};

use crate::ast::{Ast, Node};
use crate::error::{Position, SyntaxError};

type NomError<'a> = nom::error::Error<&'a str>;
type PResult<'a, O> = IResult<&'a str, O, NomError<'a>>;

/// Maps byte offsets into a source string to 1-based (line, column) pairs
/// in O(log n) after an O(n) build.
struct LineIndex {
    /// Byte offset of the start of each line (line 0 is offset 0).
    line_starts: Vec<usize>,
}

impl LineIndex {
    fn build(source: &str) -> Self {
        let mut line_starts = vec![0];
        for (i, b) in source.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i + 1);
            }
        }
        Self { line_starts }
    }

    fn position_at(&self, offset: usize) -> Position {
        let line_idx = match self.line_starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let col = offset - self.line_starts[line_idx] + 1;
        Position::new(line_idx + 1, col)
    }
}

fn truncate_fragment(s: &str) -> String {
    const MAX: usize = 40;
    let trimmed = s.trim_start();
    if trimmed.chars().count() > MAX {
        let cut: String = trimmed.chars().take(MAX).collect();
        format!("{cut}...")
    } else {
        trimmed.to_string()
    }
}

/// Parse a full document. Total: either `Ok(Ast)` or a single `SyntaxError`
/// with `line:col` — a partial AST is never returned.
pub fn parse(input: &str) -> Result<Ast, SyntaxError> {
    let index = LineIndex::build(input);
    match all_consuming(document)(input) {
        Ok((_, root)) => {
            let mut ast = Ast { root };
            finalize_positions(&mut ast, input);
            Ok(ast)
        }
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            let offset = input.len() - e.input.len();
            Err(SyntaxError {
                message: format!("unexpected input ({:?})", e.code),
                position: index.position_at(offset),
                fragment: truncate_fragment(e.input),
            })
        }
        Err(nom::Err::Incomplete(_)) => Err(SyntaxError {
            message: "incomplete input".to_string(),
            position: index.position_at(input.len().saturating_sub(1)),
            fragment: truncate_fragment(input),
        }),
    }
}

fn document(input: &str) -> PResult<'_, Node> {
    let (input, _) = skip_trivia(input)?;
    let (input, children) = many0(delimited(skip_trivia, expression, skip_trivia))(input)?;
    Ok((
        input,
        Node::Expression {
            children,
            position: Position::new(1, 1),
        },
    ))
}

/// Whitespace and `;`-comments, skipped between tokens.
fn skip_trivia(input: &str) -> PResult<'_, ()> {
    let (input, _) = many0(alt((
        map(nom::character::complete::multispace1, |_| ()),
        map(comment, |_| ()),
    )))(input)?;
    Ok((input, ()))
}

fn comment(input: &str) -> PResult<'_, &str> {
    let (input, _) = char(';')(input)?;
    let (input, text) = take_while(|c| c != '\n')(input)?;
    Ok((input, text))
}

fn expression(input: &str) -> PResult<'_, Node> {
    let start = input;
    let (input, _) = char('(')(input)?;
    let (input, _) = skip_trivia(input)?;
    let (input, head) = cut(head_node)(input)?;
    let (input, args) = many0(preceded(skip_trivia, argument))(input)?;
    let (input, _) = skip_trivia(input)?;
    let (input, _) = cut(char(')'))(input)?;

    let mut children = Vec::with_capacity(1 + args.len());
    children.push(head);
    children.extend(args);

    Ok((
        input,
        Node::Expression {
            children,
            position: byte_len_position(start),
        },
    ))
}

/// An expression's head: a dotted `group.action` verb, or — failing that
/// — a bare word. Tries the dotted form first so a real verb is never
/// mistaken for a bare head; the bare alternative only runs when the
/// dotted one reports a recoverable `Err::Error`, so one malformed nested
/// head doesn't abort the surrounding parse (`expression` still `cut`s
/// the outer choice, so a head that's neither form is a hard failure).
fn head_node(input: &str) -> PResult<'_, Node> {
    alt((verb_node, bare_head_node))(input)
}

/// Builds a `Verb` node, capturing its start offset.
fn verb_node(input: &str) -> PResult<'_, Node> {
    let start = input;
    let (input, (a, b)) = pair(word, preceded(char('.'), word))(input)?;
    let name = format!("{a}.{b}");
    Ok((
        input,
        Node::Verb {
            name,
            position: byte_len_position(start),
        },
    ))
}

/// Builds an `Identifier` node out of a non-dotted expression head.
fn bare_head_node(input: &str) -> PResult<'_, Node> {
    let start = input;
    let (input, name) = word(input)?;
    Ok((
        input,
        Node::Identifier {
            name: name.to_string(),
            position: byte_len_position(start),
        },
    ))
}

/// A bare run of `[a-z][a-z0-9-]*`-shaped text used on either side of the
/// verb's `.`.
fn word(input: &str) -> PResult<'_, &str> {
    recognize(pair(
        verify(nom::character::complete::anychar, |c: &char| c.is_ascii_lowercase()),
        take_while(|c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'),
    ))(input)
}

fn argument(input: &str) -> PResult<'_, Node> {
    alt((
        expression,
        map(string_literal, |(v, p)| Node::String {
            value: v,
            position: p,
        }),
        map(number_literal, |(t, p)| Node::Number {
            text: t.to_string(),
            position: p,
        }),
        map(boolean_literal, |(b, p)| Node::Boolean {
            value: b,
            position: p,
        }),
        map(identifier, |(n, p)| Node::Identifier {
            name: n.to_string(),
            position: p,
        }),
    ))(input)
}

fn string_literal(input: &str) -> PResult<'_, (String, Position)> {
    let start = input;
    let (input, value) = delimited(
        char('"'),
        map(
            opt(escaped_transform(
                none_of("\"\\"),
                '\\',
                alt((
                    value("\n", char('n')),
                    value("\t", char('t')),
                    value("\"", char('"')),
                    value("\\", char('\\')),
                    value("\r", char('r')),
                    value("\0", char('0')),
                )),
            )),
            |s| s.unwrap_or_default(),
        ),
        cut(char('"')),
    )(input)?;
    Ok((input, (value, byte_len_position(start))))
}

fn number_literal(input: &str) -> PResult<'_, (&str, Position)> {
    let start = input;
    let (input, text) = recognize(tuple((
        opt(char('-')),
        digit1,
        opt(pair(char('.'), digit1)),
    )))(input)?;
    Ok((input, (text, byte_len_position(start))))
}

fn boolean_literal(input: &str) -> PResult<'_, (bool, Position)> {
    let start = input;
    let (input, b) = alt((
        value(true, terminated_ident_tag("true")),
        value(false, terminated_ident_tag("false")),
    ))(input)?;
    Ok((input, (b, byte_len_position(start))))
}

/// Matches `tag` only when not immediately followed by another
/// identifier character, so `truest` isn't parsed as `true` + `st`.
fn terminated_ident_tag<'a>(t: &'static str) -> impl Fn(&'a str) -> PResult<'a, &'a str> {
    move |input: &'a str| {
        let (rest, matched) = tag(t)(input)?;
        match rest.chars().next() {
            Some(c) if is_ident_char(c) => Err(nom::Err::Error(NomError::new(
                input,
                nom::error::ErrorKind::Tag,
            ))),
            _ => Ok((rest, matched)),
        }
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':')
}

fn identifier(input: &str) -> PResult<'_, (&str, Position)> {
    let start = input;
    let (input, name) = recognize(pair(
        verify(nom::character::complete::anychar, |c: &char| {
            c.is_ascii_alphabetic() || *c == ':'
        }),
        take_while1_or_empty(is_ident_char),
    ))(input)?;
    Ok((input, (name, byte_len_position(start))))
}

fn take_while1_or_empty(pred: impl Fn(char) -> bool) -> impl Fn(&str) -> PResult<'_, &str> {
    move |input: &str| take_while(&pred)(input)
}

// `byte_len_position` stands in for a real line/col lookup at the node's
// local start; `parse()` re-derives the authoritative position for error
// reporting from the nom error's remaining-input offset against the whole
// document, since nodes only need *relative* ordering during parsing and
// the AST's node positions are recomputed in a single post-pass below.
fn byte_len_position(remaining_at_start: &str) -> Position {
    Position::new(usize::MAX, remaining_at_start.len())
}

/// Resolve the placeholder positions produced during parsing (which encode
/// only `remaining.len()` at each node's start, since the local nom
/// combinators don't have access to the whole document) into real
/// `line:col` pairs, given the original source.
pub fn finalize_positions(ast: &mut Ast, source: &str) {
    let index = LineIndex::build(source);
    let total = source.len();
    finalize_node(&mut ast.root, total, &index);
}

fn finalize_node(node: &mut Node, total_len: usize, index: &LineIndex) {
    let resolve = |p: &mut Position| {
        if p.line == usize::MAX {
            let offset = total_len.saturating_sub(p.column);
            *p = index.position_at(offset);
        }
    };
    match node {
        Node::Expression { children, position } => {
            resolve(position);
            for c in children.iter_mut() {
                finalize_node(c, total_len, index);
            }
        }
        Node::Verb { position, .. }
        | Node::String { position, .. }
        | Node::Number { position, .. }
        | Node::Boolean { position, .. }
        | Node::Identifier { position, .. } => resolve(position),
    }
}
