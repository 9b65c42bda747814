//! Domain-agnostic S-expression AST.
//!
//! Every node carries the source position of its first token. Numbers keep
//! their original textual form — no implicit float coercion happens until a
//! consumer asks for one.

use std::collections::HashSet;

use crate::error::Position;

/// A parsed document: a synthetic `Expression` whose children are the
/// top-level expressions.
#[derive(Debug, Clone, PartialEq)]
pub struct Ast {
    pub root: Node,
}

/// AST node kinds: `{Expression, Verb, String, Number, Boolean, Identifier}`.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// `(verb arg...)`. `children[0]` is a `Verb` node for a dotted head
    /// (`group.action`), or an `Identifier` node for a bare nested head
    /// used purely as argument structure (e.g. `bind`, `attr-id`).
    Expression {
        children: Vec<Node>,
        position: Position,
    },
    /// The `name1.name2` identifier heading an expression.
    Verb { name: String, position: Position },
    String { value: String, position: Position },
    /// Textual form preserved verbatim; parse on demand.
    Number { text: String, position: Position },
    Boolean { value: bool, position: Position },
    /// A bare identifier in argument position (e.g. `cbu.id`, `attr-id`).
    Identifier { name: String, position: Position },
}

impl Node {
    pub fn position(&self) -> Position {
        match self {
            Node::Expression { position, .. }
            | Node::Verb { position, .. }
            | Node::String { position, .. }
            | Node::Number { position, .. }
            | Node::Boolean { position, .. }
            | Node::Identifier { position, .. } => *position,
        }
    }

    /// The verb name if this node is an `Expression` headed by a dotted
    /// `Verb` node. Deliberately excludes bare `Identifier` heads, since
    /// `extract_verbs`/routing must never mistake a nested argument head
    /// (`bind`, `attr-id`, ...) for an instruction.
    pub fn verb_name(&self) -> Option<&str> {
        match self {
            Node::Expression { children, .. } => children.first().and_then(|c| match c {
                Node::Verb { name, .. } => Some(name.as_str()),
                _ => None,
            }),
            _ => None,
        }
    }

    /// The head name of an `Expression`, regardless of whether it's a
    /// dotted `Verb` or a bare `Identifier`. Used where the structural
    /// shape `(name ...)` matters but `name` isn't necessarily a verb —
    /// e.g. matching the `attr-id` head in `extract_attribute_ids`.
    pub fn head_name(&self) -> Option<&str> {
        match self {
            Node::Expression { children, .. } => children.first().and_then(|c| match c {
                Node::Verb { name, .. } => Some(name.as_str()),
                Node::Identifier { name, .. } => Some(name.as_str()),
                _ => None,
            }),
            _ => None,
        }
    }

    pub fn children(&self) -> &[Node] {
        match self {
            Node::Expression { children, .. } => children,
            _ => &[],
        }
    }

    /// Arguments of an expression, i.e. every child after the verb.
    pub fn arguments(&self) -> &[Node] {
        match self {
            Node::Expression { children, .. } if !children.is_empty() => &children[1..],
            _ => &[],
        }
    }

    /// String value if this node is a `String`.
    pub fn as_string(&self) -> Option<&str> {
        match self {
            Node::String { value, .. } => Some(value.as_str()),
            _ => None,
        }
    }
}

impl Ast {
    /// Top-level expressions in the document, in source order.
    pub fn top_level(&self) -> &[Node] {
        self.root.children()
    }

    /// `ExtractVerbs`: the ordered list of unique verb names heading each
    /// *top-level* expression, in traversal (document) order.
    ///
    /// Only top-level statements count. A verb-shaped identifier heading a
    /// nested expression that is itself passed as an argument (e.g. the
    /// `bind`/`attr-id`/`value` heads in
    /// `(values.bind (bind (attr-id "u") (value "X")))`) is data, not a
    /// verb of the document — excluding it is what keeps validation from
    /// mistaking an argument head for an instruction.
    pub fn extract_verbs(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for expr in self.top_level() {
            if let Some(name) = expr.verb_name() {
                if seen.insert(name.to_string()) {
                    out.push(name.to_string());
                }
            }
        }
        out
    }

    /// `ExtractAttributeIDs`: the set of string values that appear as the
    /// single string argument of an `attr-id` expression, at any depth.
    pub fn extract_attribute_ids(&self) -> HashSet<String> {
        let mut out = HashSet::new();
        collect_attribute_ids(&self.root, &mut out);
        out
    }
}

fn collect_attribute_ids(node: &Node, out: &mut HashSet<String>) {
    if let Node::Expression { children, .. } = node {
        if node.head_name() == Some("attr-id") {
            let args = node.arguments();
            if let [Node::String { value, .. }] = args {
                out.insert(value.clone());
            }
        }
        for child in children {
            collect_attribute_ids(child, out);
        }
    }
}

/// `ValidatePlaceholders`: error (with position, if locatable) if any
/// `<snake_case>` token remains unresolved in emitted DSL text.
///
/// Per §6, the bit-level placeholder shape is the literal ASCII sequence
/// `<name>` with `name` matching `[a-z0-9_]+`.
pub fn find_unresolved_placeholders(text: &str) -> Vec<String> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'<' {
            if let Some(end) = text[i + 1..].find('>') {
                let candidate = &text[i + 1..i + 1 + end];
                if !candidate.is_empty()
                    && candidate
                        .bytes()
                        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_')
                {
                    out.push(candidate.to_string());
                    i = i + 1 + end + 1;
                    continue;
                }
            }
        }
        i += 1;
    }
    out
}
