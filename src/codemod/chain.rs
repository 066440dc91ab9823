//! Flattens `chain().end((err, res) => { ... })` into an awaited declaration.
//!
//! ```text
//! agent().get('/x').end((err, res) => {      const res = await agent().get('/x');
//!   if (err) return;                    =>   expect(res.status).to.equal(200);
//!   expect(res.status).to.equal(200);
//! });
//! ```
//!
//! Each flattening can expose a chain that used to be nested inside the
//! handler, so candidates are re-queried after every single rewrite.

use std::collections::HashSet;

use tracing::{debug, trace};
use tree_sitter::Node;

use crate::codemod::async_test::{remap_all, MatchedTest};
use crate::codemod::common::{
    contains, declared_names, descendants, enclosing_function, indent_of, indent_unit, named_children,
    node_text, references, reindent, statements, template_lines,
};
use crate::codemod::document::{Document, EditSet};
use crate::codemod::error::Result;
use crate::codemod::matcher::{call_arguments, BodyForm, FunctionShape};

/// Member name of the terminal handler call
pub const CHAIN_HANDLER_NAME: &str = "end";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChainReport {
    pub flattened: usize,
    /// Handler calls left in place because they did not fit the pattern
    pub skipped: usize,
}

/// Why a handler call was left untouched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mismatch {
    ArgumentCount,
    NotAFunction,
    AlreadyAsync,
    Parameters,
    NotAStatement,
    NestedFunction,
    ErrorStillUsed,
    NameCollision,
}

/// A `<call>.end(...)` call and the receiver chain it terminates
#[derive(Debug, Clone, Copy)]
struct HandlerCall<'a> {
    call: Node<'a>,
    base: Node<'a>,
}

// ============ Entry Point ============

/// Flatten every qualifying handler chain inside the matched test bodies
pub fn flatten_chains(doc: &mut Document, tests: &mut [MatchedTest]) -> Result<ChainReport> {
    let mut report = ChainReport::default();

    loop {
        let (planned, skipped) = {
            let source = doc.bytes();
            let unit = indent_unit(source);
            let mut skipped = 0;
            let mut planned = None;

            'tests: for test in tests.iter() {
                let Some(body) = doc
                    .call_at(test.anchor)
                    .and_then(|call| call_arguments(call).get(1).copied())
                    .and_then(FunctionShape::of_value)
                else {
                    continue;
                };
                for handler in handler_calls(body, source) {
                    match plan_flatten(handler, body, source, &unit) {
                        Ok(edits) => {
                            planned = Some(edits);
                            break 'tests;
                        }
                        Err(reason) => {
                            trace!(
                                line = handler.call.start_position().row + 1,
                                reason = ?reason,
                                "skipping handler chain"
                            );
                            skipped += 1;
                        }
                    }
                }
            }
            (planned, skipped)
        };

        let Some(edits) = planned else {
            report.skipped = skipped;
            break;
        };
        let map = doc.apply(edits)?;
        remap_all(tests, &map);
        report.flattened += 1;
    }

    debug!(
        flattened = report.flattened,
        skipped = report.skipped,
        "handler chains flattened"
    );
    Ok(report)
}

// ============ Matching ============

/// Calls shaped `<call>.end(...)` anywhere inside a test body, in document order
fn handler_calls<'a>(body: FunctionShape<'a>, source: &[u8]) -> Vec<HandlerCall<'a>> {
    descendants(body.body)
        .into_iter()
        .filter_map(|call| {
            base_chain(call, source).map(|base| HandlerCall { call, base })
        })
        .collect()
}

/// Receiver chain of a `<call>.end(...)` call
fn base_chain<'a>(call: Node<'a>, source: &[u8]) -> Option<Node<'a>> {
    if call.kind() != "call_expression" {
        return None;
    }
    let callee = call.child_by_field_name("function")?;
    if callee.kind() != "member_expression" {
        return None;
    }
    let property = callee.child_by_field_name("property")?;
    let object = callee.child_by_field_name("object")?;
    (node_text(property, source) == CHAIN_HANDLER_NAME && object.kind() == "call_expression")
        .then_some(object)
}

/// `if (err) return;`, `if (err) throw err;`, `if (err) { return cb(err); }`.
///
/// An empty consequence (`if (err) {}`, `if (err);`) also counts: it is what
/// remains of `if (err) done(err);` once the completion call is removed.
/// Only guards at the top level of the handler body are recognized; a nested
/// guard keeps the error name referenced and the handler is skipped.
fn is_error_guard(stmt: Node, err_name: &str, source: &[u8]) -> bool {
    if stmt.kind() != "if_statement" || stmt.child_by_field_name("alternative").is_some() {
        return false;
    }

    let tests_error = stmt
        .child_by_field_name("condition")
        .map(statements)
        .is_some_and(|inner| {
            inner.len() == 1 && inner[0].kind() == "identifier" && node_text(inner[0], source) == err_name
        });
    if !tests_error {
        return false;
    }

    let mut exit = stmt.child_by_field_name("consequence");
    while let Some(node) = exit {
        match node.kind() {
            "return_statement" | "throw_statement" | "empty_statement" => return true,
            "statement_block" => match statements(node).as_slice() {
                [] => return true,
                [only] => exit = Some(*only),
                _ => return false,
            },
            _ => return false,
        }
    }
    false
}

// ============ Planning ============

/// Where the handler call sits inside the test body
#[derive(Debug, Clone, Copy)]
enum Placement<'a> {
    /// `<chain>.end(...);` as a statement of `dest`
    Statement { stmt: Node<'a>, dest: Node<'a> },
    /// `done => <chain>.end(...)`: the expression body of the test arrow
    ArrowBody,
}

fn locate<'a>(
    handler: HandlerCall<'a>,
    test_body: FunctionShape,
) -> std::result::Result<Placement<'a>, Mismatch> {
    if test_body.form == BodyForm::Expression && test_body.body.id() == handler.call.id() {
        return Ok(Placement::ArrowBody);
    }

    let stmt = handler
        .call
        .parent()
        .filter(|p| p.kind() == "expression_statement")
        .ok_or(Mismatch::NotAStatement)?;
    let dest = stmt
        .parent()
        .filter(|p| p.kind() == "statement_block")
        .ok_or(Mismatch::NotAStatement)?;
    if enclosing_function(stmt).map(|f| f.id()) != Some(test_body.node.id()) {
        return Err(Mismatch::NestedFunction);
    }
    Ok(Placement::Statement { stmt, dest })
}

fn plan_flatten(
    handler: HandlerCall,
    test_body: FunctionShape,
    source: &[u8],
    unit: &str,
) -> std::result::Result<EditSet, Mismatch> {
    let args = call_arguments(handler.call);
    if args.len() != 1 {
        return Err(Mismatch::ArgumentCount);
    }
    let callback = FunctionShape::of_value(args[0]).ok_or(Mismatch::NotAFunction)?;
    if callback.is_async {
        return Err(Mismatch::AlreadyAsync);
    }
    let (err_name, res_name) = match callback.simple_param_names(source).as_deref() {
        Some([err, res]) if err != res => (*err, *res),
        _ => return Err(Mismatch::Parameters),
    };
    let placement = locate(handler, test_body)?;

    let kept: Vec<Node> = callback
        .body_statements()
        .into_iter()
        .filter(|s| !is_error_guard(*s, err_name, source))
        .collect();
    if kept.iter().any(|s| references(*s, err_name, source)) {
        return Err(Mismatch::ErrorStillUsed);
    }
    if let Placement::Statement { stmt, dest } = placement {
        if collides(stmt, dest, &kept, res_name, source) {
            return Err(Mismatch::NameCollision);
        }
    }

    let expression_body = callback.form == BodyForm::Expression;
    let moved = |indent: &str| -> String {
        kept.iter()
            .map(|s| {
                let text = reindent(
                    node_text(*s, source),
                    &indent_of(*s, source),
                    indent,
                    &template_lines(*s),
                );
                let semicolon = if expression_body { ";" } else { "" };
                format!("\n{indent}{text}{semicolon}")
            })
            .collect()
    };

    let declaration = format!(
        "const {res_name} = await {};",
        node_text(handler.base, source)
    );

    let mut edits = EditSet::new();
    match placement {
        Placement::ArrowBody => {
            let outer = indent_of(test_body.node, source);
            let inner = format!("{outer}{unit}");
            let tail = moved(&inner);
            let block = format!("{{\n{inner}{declaration}{tail}\n{outer}}}");
            match arrow_token_end(test_body, source) {
                Some(start) => edits.replace(start..handler.call.end_byte(), format!(" {block}")),
                None => edits.replace(handler.call.byte_range(), block),
            };
        }
        Placement::Statement { stmt, dest } => {
            let tail = moved(&indent_of(stmt, source));
            match named_children(dest).last().copied() {
                Some(last) if last.id() != stmt.id() => {
                    edits.replace(stmt.byte_range(), declaration);
                    if !tail.is_empty() {
                        edits.insert(last.end_byte(), tail);
                    }
                }
                _ => {
                    edits.replace(stmt.byte_range(), format!("{declaration}{tail}"));
                }
            }
        }
    }
    Ok(edits)
}

/// End of the `=>` token of an expression-bodied arrow, when only whitespace
/// separates it from the body
fn arrow_token_end(arrow: FunctionShape, source: &[u8]) -> Option<usize> {
    let mut cursor = arrow.node.walk();
    let token = arrow.node.children(&mut cursor).find(|c| c.kind() == "=>")?;
    let gap = source.get(token.end_byte()..arrow.body.start_byte())?;
    gap.iter().all(u8::is_ascii_whitespace).then_some(token.end_byte())
}

/// Whether moving `kept` (plus the `res_name` binding) into `dest` would clash
/// with a name already declared or referenced there
fn collides(stmt: Node, dest: Node, kept: &[Node], res_name: &str, source: &[u8]) -> bool {
    let mut introduced: HashSet<String> = kept
        .iter()
        .flat_map(|s| declared_names(*s, source))
        .collect();
    introduced.insert(res_name.to_string());

    let declared_here = statements(dest)
        .into_iter()
        .flat_map(|s| declared_names(s, source))
        .any(|name| introduced.contains(&name));
    if declared_here {
        return true;
    }

    descendants(dest).into_iter().any(|n| {
        !contains(stmt, n)
            && matches!(n.kind(), "identifier" | "shorthand_property_identifier")
            && introduced.contains(node_text(n, source))
    })
}
