//! Node and text utilities shared by the rewriters.

use std::collections::HashSet;
use std::ops::Range;

use tree_sitter::Node;

// ============ Node Kinds ============

/// Function forms usable as a value (call arguments, test bodies, handlers)
pub const FUNCTION_VALUE_KINDS: &[&str] = &["function_expression", "function", "arrow_function"];

/// Every node kind that opens a new function scope
pub const FUNCTION_SCOPE_KINDS: &[&str] = &[
    "function_expression",
    "function",
    "arrow_function",
    "function_declaration",
    "generator_function",
    "generator_function_declaration",
    "method_definition",
];

pub fn is_function_value(node: Node) -> bool {
    FUNCTION_VALUE_KINDS.contains(&node.kind())
}

pub fn is_function_scope(node: Node) -> bool {
    FUNCTION_SCOPE_KINDS.contains(&node.kind())
}

pub fn is_comment(node: Node) -> bool {
    node.kind() == "comment"
}

// ============ Text Utilities ============

/// Get the exact source text of a node
pub fn node_text<'a>(node: Node, source: &'a [u8]) -> &'a str {
    let slice = source.get(node.start_byte()..node.end_byte()).unwrap_or(&[]);
    std::str::from_utf8(slice).unwrap_or("")
}

/// Byte offset of the start of the line containing `pos`
pub fn line_start(source: &[u8], pos: usize) -> usize {
    source[..pos]
        .iter()
        .rposition(|&b| b == b'\n')
        .map_or(0, |idx| idx + 1)
}

/// Byte offset of the `\n` ending the line containing `pos` (or the end of input)
pub fn line_end(source: &[u8], pos: usize) -> usize {
    source[pos..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(source.len(), |idx| pos + idx)
}

/// Leading whitespace of the line a node starts on
pub fn indent_of(node: Node, source: &[u8]) -> String {
    let start = line_start(source, node.start_byte());
    source[start..]
        .iter()
        .take_while(|&&b| b == b' ' || b == b'\t')
        .map(|&b| b as char)
        .collect()
}

/// One level of indentation as used by the file (defaults to two spaces)
pub fn indent_unit(source: &[u8]) -> String {
    let text = std::str::from_utf8(source).unwrap_or("");
    let mut min_spaces: Option<usize> = None;
    for line in text.lines() {
        if line.trim().is_empty() {
            continue;
        }
        if line.starts_with('\t') {
            return "\t".to_string();
        }
        let spaces = line.len() - line.trim_start_matches(' ').len();
        if spaces > 0 {
            min_spaces = Some(min_spaces.map_or(spaces, |m: usize| m.min(spaces)));
        }
    }
    " ".repeat(min_spaces.unwrap_or(2))
}

/// Range covering a statement for deletion.
///
/// A statement alone on its line takes the whole line with it; otherwise only
/// the statement and the blanks after it are removed.
pub fn removal_range(node: Node, source: &[u8]) -> Range<usize> {
    let start = node.start_byte();
    let end = node.end_byte();
    let ls = line_start(source, start);
    let le = line_end(source, end);

    let blank = |bytes: &[u8]| bytes.iter().all(|b| b.is_ascii_whitespace());
    if blank(&source[ls..start]) && blank(&source[end..le]) {
        let stop = if le < source.len() { le + 1 } else { le };
        return ls..stop;
    }

    let mut stop = end;
    while stop < source.len() && matches!(source[stop], b' ' | b'\t') {
        stop += 1;
    }
    start..stop
}

/// Re-indent a multi-line snippet that starts at a statement.
///
/// Lines after the first lose the `from` prefix and gain `to`. Line indices
/// in `protected` (multi-line template literal content) are left untouched.
pub fn reindent(text: &str, from: &str, to: &str, protected: &HashSet<usize>) -> String {
    let mut out = String::with_capacity(text.len());
    for (idx, line) in text.split('\n').enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        if idx == 0 || protected.contains(&idx) {
            out.push_str(line);
        } else if line.trim().is_empty() {
            out.push_str(line.trim_start_matches([' ', '\t']));
        } else if let Some(rest) = line.strip_prefix(from) {
            out.push_str(to);
            out.push_str(rest);
        } else {
            out.push_str(line);
        }
    }
    out
}

/// Line indices (relative to `node`'s first line) that sit inside multi-line template strings
pub fn template_lines(node: Node) -> HashSet<usize> {
    let base = node.start_position().row;
    let mut lines = HashSet::new();
    for child in descendants(node) {
        if child.kind() != "template_string" {
            continue;
        }
        let (start, end) = (child.start_position().row, child.end_position().row);
        for row in (start + 1)..=end {
            lines.insert(row - base);
        }
    }
    lines
}

// ============ Tree Walking ============

/// Named children, comments included
pub fn named_children(node: Node) -> Vec<Node> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

/// Statements of a block, comments excluded
pub fn statements(block: Node) -> Vec<Node> {
    named_children(block)
        .into_iter()
        .filter(|child| !is_comment(*child))
        .collect()
}

/// All descendants of `node` (itself included) in document order.
///
/// Walks with an explicit stack so deeply nested fixtures cannot overflow.
pub fn descendants(node: Node) -> Vec<Node> {
    let mut out = Vec::new();
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        out.push(current);
        let mut cursor = current.walk();
        let children: Vec<Node> = current.named_children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }
    out
}

/// Nearest ancestor (excluding `node`) that opens a function scope
pub fn enclosing_function(node: Node) -> Option<Node> {
    let mut current = node.parent();
    while let Some(parent) = current {
        if is_function_scope(parent) {
            return Some(parent);
        }
        current = parent.parent();
    }
    None
}

pub fn contains(outer: Node, inner: Node) -> bool {
    outer.start_byte() <= inner.start_byte() && inner.end_byte() <= outer.end_byte()
}

// ============ Identifiers ============

/// Name bound by a simple parameter: a bare identifier, or a TypeScript
/// parameter whose pattern is an identifier and which has no default value
pub fn simple_param_name<'a>(param: Node, source: &'a [u8]) -> Option<&'a str> {
    match param.kind() {
        "identifier" => Some(node_text(param, source)),
        "required_parameter" => {
            if param.child_by_field_name("value").is_some() {
                return None;
            }
            let pattern = param.child_by_field_name("pattern")?;
            (pattern.kind() == "identifier").then(|| node_text(pattern, source))
        }
        _ => None,
    }
}

/// Whether a function's parameter list binds `name`
pub fn binds_param(func: Node, name: &str, source: &[u8]) -> bool {
    func.child_by_field_name("parameters")
        .or_else(|| func.child_by_field_name("parameter"))
        .is_some_and(|params| {
            descendants(params)
                .into_iter()
                .any(|n| {
                    matches!(n.kind(), "identifier" | "shorthand_property_identifier_pattern")
                        && node_text(n, source) == name
                })
        })
}

/// Whether `node` references `name`, ignoring nested functions that rebind it
pub fn references(node: Node, name: &str, source: &[u8]) -> bool {
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        if current.id() != node.id() && is_function_scope(current) && binds_param(current, name, source) {
            continue;
        }
        if matches!(current.kind(), "identifier" | "shorthand_property_identifier")
            && node_text(current, source) == name
        {
            return true;
        }
        stack.extend(named_children(current));
    }
    false
}

/// Names declared directly by a statement (not inside nested blocks)
pub fn declared_names(stmt: Node, source: &[u8]) -> Vec<String> {
    let mut names = Vec::new();
    match stmt.kind() {
        "lexical_declaration" | "variable_declaration" => {
            for declarator in named_children(stmt) {
                if declarator.kind() != "variable_declarator" {
                    continue;
                }
                if let Some(pattern) = declarator.child_by_field_name("name") {
                    collect_pattern_names(pattern, source, &mut names);
                }
            }
        }
        "function_declaration"
        | "generator_function_declaration"
        | "class_declaration"
        | "abstract_class_declaration"
        | "enum_declaration" => {
            if let Some(name) = stmt.child_by_field_name("name") {
                names.push(node_text(name, source).to_string());
            }
        }
        _ => {}
    }
    names
}

fn collect_pattern_names(pattern: Node, source: &[u8], names: &mut Vec<String>) {
    let mut stack = vec![pattern];
    while let Some(node) = stack.pop() {
        match node.kind() {
            "identifier" | "shorthand_property_identifier_pattern" => {
                names.push(node_text(node, source).to_string());
            }
            // `{ a = b }` and `[a = b]` bind only the left side
            "object_assignment_pattern" | "assignment_pattern" => {
                stack.extend(node.child_by_field_name("left"));
            }
            "pair_pattern" => {
                stack.extend(node.child_by_field_name("value"));
            }
            _ => {
                let children = named_children(node);
                stack.extend(children.into_iter().rev());
            }
        }
    }
}
