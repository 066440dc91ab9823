//! Removes or flags calls of a test's completion parameter.
//!
//! Completion calls hide inside promise callbacks and chained handlers, so the
//! scope is walked with an explicit worklist: each function body found inside
//! the current scope is queued as a scope of its own, unless its parameters
//! rebind the completion name.

use tracing::{debug, trace};
use tree_sitter::Node;

use crate::codemod::async_test::{remap_all, MatchedTest};
use crate::codemod::common::{indent_of, indent_unit, is_function_scope, node_text, removal_range};
use crate::codemod::config::{CompletionMode, QuoteStyle};
use crate::codemod::document::{Document, EditSet};
use crate::codemod::error::Result;
use crate::codemod::matcher::{call_arguments, has_comments, is_sole_statement, FunctionShape};

/// Message carried by the marker inserted in throw mode
pub const MIGRATION_MARKER_MESSAGE: &str = "Please migrate this callback";

#[derive(Debug, Clone, Copy)]
pub struct CompletionRewrite {
    pub mode: CompletionMode,
    pub quote: QuoteStyle,
}

impl CompletionRewrite {
    fn marker(&self) -> String {
        format!("throw new Error({});", self.quote.quote(MIGRATION_MARKER_MESSAGE))
    }
}

// ============ Site Classification ============

/// Where a completion call sits, which decides how it can be rewritten
#[derive(Debug, Clone, Copy)]
enum Site<'a> {
    /// `done();` as a whole expression statement
    Statement(Node<'a>),
    /// `() => done()`
    ArrowBody(Node<'a>),
    /// `return done(err);`
    Return(Node<'a>),
    /// Any other expression position
    Expression(Node<'a>),
}

fn classify(call: Node) -> Site {
    let Some(parent) = call.parent() else {
        return Site::Expression(call);
    };
    match parent.kind() {
        "expression_statement" => Site::Statement(parent),
        "arrow_function" if is_sole_statement(call) => Site::ArrowBody(call),
        "return_statement" => Site::Return(parent),
        _ => Site::Expression(call),
    }
}

// ============ Entry Point ============

/// Rewrite every completion call in the matched test bodies.
///
/// Returns the number of call sites rewritten; anchors in `tests` are kept
/// valid for the rewritten document.
pub fn rewrite_completion_calls(
    doc: &mut Document,
    tests: &mut [MatchedTest],
    rewrite: CompletionRewrite,
) -> Result<usize> {
    let (edits, count) = {
        let source = doc.bytes();
        let unit = indent_unit(source);
        let mut edits = EditSet::new();
        let mut count = 0;

        for test in tests.iter() {
            let Some(body) = doc
                .call_at(test.anchor)
                .and_then(|call| call_arguments(call).get(1).copied())
                .and_then(FunctionShape::of_value)
            else {
                continue;
            };
            for call in completion_calls(body, &test.completion_name, source) {
                if rewrite_site(classify(call), rewrite, source, &unit, &mut edits) {
                    trace!(
                        line = call.start_position().row + 1,
                        mode = ?rewrite.mode,
                        "rewrote completion call"
                    );
                    count += 1;
                }
            }
        }
        (edits, count)
    };

    let map = doc.apply(edits)?;
    remap_all(tests, &map);
    debug!(sites = count, mode = ?rewrite.mode, "completion calls rewritten");
    Ok(count)
}

/// Completion calls reachable from `body`, following nested function bodies
/// that do not rebind `name`
pub fn completion_calls<'a>(body: FunctionShape<'a>, name: &str, source: &[u8]) -> Vec<Node<'a>> {
    let mut found = Vec::new();
    let mut scopes = vec![body.body];

    while let Some(scope) = scopes.pop() {
        let mut stack = vec![scope];
        while let Some(node) = stack.pop() {
            if node.id() != scope.id() && is_function_scope(node) {
                if let Some(nested) = FunctionShape::of(node) {
                    if !nested.binds(name, source) {
                        scopes.push(nested.body);
                    }
                }
                continue;
            }
            if is_completion_call(node, name, source) {
                found.push(node);
                continue;
            }
            let mut cursor = node.walk();
            let children: Vec<Node> = node.named_children(&mut cursor).collect();
            stack.extend(children.into_iter().rev());
        }
    }

    found.sort_by_key(|n| n.start_byte());
    found
}

fn is_completion_call(node: Node, name: &str, source: &[u8]) -> bool {
    node.kind() == "call_expression"
        && node
            .child_by_field_name("function")
            .is_some_and(|callee| callee.kind() == "identifier" && node_text(callee, source) == name)
}

// ============ Rewriting ============

fn rewrite_site(
    site: Site,
    rewrite: CompletionRewrite,
    source: &[u8],
    unit: &str,
    edits: &mut EditSet,
) -> bool {
    match (site, rewrite.mode) {
        (Site::Statement(stmt), CompletionMode::Remove) => remove_statement(stmt, source, edits),
        (Site::Statement(stmt), CompletionMode::Throw) => {
            edits.replace(stmt.byte_range(), rewrite.marker())
        }

        (Site::ArrowBody(call), CompletionMode::Remove) => edits.replace(call.byte_range(), "{}"),
        (Site::ArrowBody(call), CompletionMode::Throw) => {
            let indent = indent_of(call, source);
            let block = format!("{{\n{indent}{unit}{}\n{indent}}}", rewrite.marker());
            edits.replace(call.byte_range(), block)
        }

        (Site::Return(ret), CompletionMode::Remove) => {
            let text = if node_text(ret, source).ends_with(';') {
                "return;"
            } else {
                "return"
            };
            edits.replace(ret.byte_range(), text)
        }
        (Site::Return(ret), CompletionMode::Throw) => edits.replace(ret.byte_range(), rewrite.marker()),

        (Site::Expression(call), CompletionMode::Remove) => edits.replace(call.byte_range(), "undefined"),
        (Site::Expression(call), CompletionMode::Throw) => {
            let marker = rewrite.marker();
            edits.replace(call.byte_range(), format!("(() => {{ {marker} }})()"))
        }
    }
}

fn remove_statement(stmt: Node, source: &[u8], edits: &mut EditSet) -> bool {
    let Some(container) = stmt.parent() else {
        return false;
    };
    match container.kind() {
        "statement_block" if is_sole_statement(stmt) && !has_comments(container) => {
            edits.replace(container.byte_range(), "{}")
        }
        "statement_block" | "program" | "switch_case" | "switch_default" => {
            edits.remove(removal_range(stmt, source))
        }
        // Direct body of `if`, `else`, loops: keep the construct well-formed
        _ => edits.replace(stmt.byte_range(), "{}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codemod::async_test::make_tests_async;
    use crate::codemod::config::MigrationOptions;
    use crate::codemod::Dialect;

    fn run(code: &str, mode: CompletionMode) -> (String, usize) {
        let mut doc = Document::parse(code, Dialect::TypeScript).unwrap();
        let mut tests = make_tests_async(&mut doc, &MigrationOptions::default()).unwrap();
        let count = rewrite_completion_calls(
            &mut doc,
            &mut tests,
            CompletionRewrite {
                mode,
                quote: QuoteStyle::Single,
            },
        )
        .unwrap();
        (doc.into_source(), count)
    }

    fn wrap(body: &str) -> String {
        format!("describe('s', function () {{\n  it('t', function (done) {{\n{body}  }});\n}});\n")
    }

    fn wrap_async(body: &str) -> String {
        format!("describe('s', function () {{\n  it('t', async function () {{\n{body}  }});\n}});\n")
    }

    #[test]
    fn test_remove_statement_lines() {
        let (out, count) = run(&wrap("    a();\n    done();\n    b();\n"), CompletionMode::Remove);
        assert_eq!(out, wrap_async("    a();\n    b();\n"));
        assert_eq!(count, 1);
    }

    #[test]
    fn test_remove_sole_statement_collapses_block() {
        let code = "describe('s', function () {\n  it('t', function (done) {\n    done();\n  });\n});\n";
        let (out, _) = run(code, CompletionMode::Remove);
        assert_eq!(out, "describe('s', function () {\n  it('t', async function () {});\n});\n");
    }

    #[test]
    fn test_remove_in_nested_callbacks() {
        let (out, count) = run(
            &wrap("    sleep(1).then(() => done());\n    sleep(2).then(function () {\n      check();\n      done()\n    });\n"),
            CompletionMode::Remove,
        );
        assert_eq!(
            out,
            wrap_async("    sleep(1).then(() => {});\n    sleep(2).then(function () {\n      check();\n    });\n")
        );
        assert_eq!(count, 2);
    }

    #[test]
    fn test_remove_return_and_if_body() {
        let (out, count) = run(
            &wrap("    if (err) return done(err);\n    if (ok) done();\n    x();\n"),
            CompletionMode::Remove,
        );
        assert_eq!(out, wrap_async("    if (err) return;\n    if (ok) {}\n    x();\n"));
        assert_eq!(count, 2);
    }

    #[test]
    fn test_shadowed_name_is_left_alone() {
        let body = "    run(function (done) {\n      done();\n    });\n    x();\n";
        let (out, count) = run(&wrap(body), CompletionMode::Remove);
        assert_eq!(out, wrap_async(body));
        assert_eq!(count, 0);
    }

    #[test]
    fn test_throw_mode_markers() {
        let (out, count) = run(
            &wrap("    sleep(1).then(() => done());\n    sleep(2).then(() => {\n      check();\n      done();\n    });\n"),
            CompletionMode::Throw,
        );
        assert_eq!(
            out,
            wrap_async(concat!(
                "    sleep(1).then(() => {\n",
                "      throw new Error('Please migrate this callback');\n",
                "    });\n",
                "    sleep(2).then(() => {\n",
                "      check();\n",
                "      throw new Error('Please migrate this callback');\n",
                "    });\n",
            ))
        );
        assert_eq!(count, 2);
        assert_eq!(out.matches(MIGRATION_MARKER_MESSAGE).count(), 2);
    }

    #[test]
    fn test_throw_mode_expression_site() {
        let (out, _) = run(&wrap("    const x = ok || done();\n"), CompletionMode::Throw);
        assert_eq!(
            out,
            wrap_async("    const x = ok || (() => { throw new Error('Please migrate this callback'); })();\n")
        );
    }

    #[test]
    fn test_completion_calls_across_depths() {
        let code = wrap("    a(() => b(() => c(function () { done(); })));\n    done();\n");
        let doc = Document::parse(&code, Dialect::TypeScript).unwrap();
        let options = MigrationOptions::default();
        let tests = crate::codemod::matcher::find_test_calls(doc.root(), &options, doc.bytes());
        let calls = completion_calls(tests[0].body, "done", doc.bytes());
        assert_eq!(calls.len(), 2);
    }
}
