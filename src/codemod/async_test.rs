//! Turns completion-callback test bodies into parameterless async bodies.
//!
//! Only the signature changes: `function (done) {` becomes
//! `async function () {`, `done => ...` becomes `async () => ...`. Calls of
//! the completion parameter inside the body are left for the completion
//! rewriter.

use tracing::trace;

use crate::codemod::common::node_text;
use crate::codemod::config::MigrationOptions;
use crate::codemod::document::{Anchor, Document, EditSet, OffsetMap};
use crate::codemod::error::Result;
use crate::codemod::matcher::{find_test_calls, FunctionShape, RegistrationCall};

/// A test call rewritten by this pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedTest {
    /// Start of the test call expression, valid for the current document
    pub anchor: Anchor,
    /// Name whose calls signal completion inside this test
    pub completion_name: String,
    pub skipped: bool,
}

impl MatchedTest {
    pub fn remap(&mut self, map: &OffsetMap) {
        self.anchor = self.anchor.remap(map);
    }
}

pub fn remap_all(tests: &mut [MatchedTest], map: &OffsetMap) {
    for test in tests {
        test.remap(map);
    }
}

/// Make every matching test body async and parameterless.
///
/// Test bodies that are already async never match, which keeps the pass
/// idempotent. Returns the matched tests with anchors valid after the rewrite.
pub fn make_tests_async(doc: &mut Document, options: &MigrationOptions) -> Result<Vec<MatchedTest>> {
    let (edits, mut matched) = {
        let source = doc.bytes();
        let mut edits = EditSet::new();
        let mut matched = Vec::new();

        for test in find_test_calls(doc.root(), options, source) {
            if test.body.is_async {
                continue;
            }
            signature_edits(&test.body, source, &mut edits);
            let completion_name = completion_name(&test, options, source);
            trace!(
                label = node_text(test.label, source),
                completion = completion_name.as_str(),
                skipped = test.skipped,
                "rewriting test signature"
            );
            matched.push(MatchedTest {
                anchor: Anchor::of(test.call),
                completion_name,
                skipped: test.skipped,
            });
        }
        (edits, matched)
    };

    let map = doc.apply(edits)?;
    remap_all(&mut matched, &map);
    Ok(matched)
}

/// The test's own completion parameter name, or the configured fallback
fn completion_name(test: &RegistrationCall, options: &MigrationOptions, source: &[u8]) -> String {
    match test.body.simple_param_names(source).as_deref() {
        Some([name]) => name.to_string(),
        _ => options.completion_param_name.clone(),
    }
}

fn signature_edits(body: &FunctionShape, source: &[u8], edits: &mut EditSet) {
    edits.insert(body.node.start_byte(), "async ");

    match body.params {
        Some(params) if node_text(params, source) == "()" => {}
        Some(params) => {
            edits.replace(params.byte_range(), "()");
        }
        // `function name {` cannot occur; arrows always carry a parameter node
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codemod::Dialect;

    fn rewrite(code: &str) -> (String, Vec<MatchedTest>) {
        let mut doc = Document::parse(code, Dialect::TypeScript).unwrap();
        let tests = make_tests_async(&mut doc, &MigrationOptions::default()).unwrap();
        (doc.into_source(), tests)
    }

    #[test]
    fn test_function_body() {
        let (out, tests) = rewrite("describe('s', function () {\n  it('t', function (done) {\n    done();\n  });\n});\n");
        assert_eq!(
            out,
            "describe('s', function () {\n  it('t', async function () {\n    done();\n  });\n});\n"
        );
        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0].completion_name, "done");
    }

    #[test]
    fn test_arrow_bodies() {
        let (out, tests) = rewrite(
            "describe('s', () => {\n  it('a', done => done());\n  it.skip('b', (cb) => { cb(); });\n});\n",
        );
        assert_eq!(
            out,
            "describe('s', () => {\n  it('a', async () => done());\n  it.skip('b', async () => { cb(); });\n});\n"
        );
        assert_eq!(tests[1].completion_name, "cb");
        assert!(tests[1].skipped);
    }

    #[test]
    fn test_anchors_follow_edits() {
        let code = "describe('s', function () {\n  it('a', function (done) {});\n  it('b', function (done) {});\n});\n";
        let mut doc = Document::parse(code, Dialect::TypeScript).unwrap();
        let tests = make_tests_async(&mut doc, &MigrationOptions::default()).unwrap();
        let labels: Vec<String> = tests
            .iter()
            .map(|t| {
                let call = doc.call_at(t.anchor).unwrap();
                node_text(call, doc.bytes()).to_string()
            })
            .collect();
        assert_eq!(
            labels,
            vec!["it('a', async function () {})", "it('b', async function () {})"]
        );
    }

    #[test]
    fn test_already_async_is_untouched() {
        let code = "describe('s', function () {\n  it('t', async function () {\n    await x();\n  });\n});\n";
        let (out, tests) = rewrite(code);
        assert_eq!(out, code);
        assert!(tests.is_empty());
    }

    #[test]
    fn test_sync_zero_param_body_becomes_async() {
        let (out, tests) = rewrite("describe('s', function () {\n  it('t', function () {});\n});\n");
        assert_eq!(out, "describe('s', function () {\n  it('t', async function () {});\n});\n");
        assert_eq!(tests[0].completion_name, "done");
    }
}
