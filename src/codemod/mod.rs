//! Async test migration: AST-based rewriting of callback-style test suites
//!
//! This module turns `it('x', function (done) { ... done(); })` tests into
//! `it('x', async function () { ... })`, and optionally flattens
//! `request().end((err, res) => { ... })` chains into awaited declarations.
//!
//! ## Architecture
//!
//! ```text
//! codemod/
//! ├── mod.rs         - Entry points, dialect dispatch, pipelines
//! ├── common.rs      - Shared node and text utilities
//! ├── config.rs      - Per-invocation options
//! ├── document.rs    - Parsed source, edit batches, anchors
//! ├── matcher.rs     - Shape and position predicates
//! ├── async_test.rs  - Test signature rewriting
//! ├── completion.rs  - Completion call removal / flagging
//! └── chain.rs       - Handler chain flattening
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use codemod::{migrate, Dialect, MigrationOptions, Pipeline};
//!
//! let outcome = migrate(source, Dialect::TypeScript, Pipeline::Chains, &MigrationOptions::default())?;
//! if let Some(report) = outcome.report() {
//!     println!("{}", report.source);
//! }
//! ```

pub mod async_test;
pub mod chain;
pub mod common;
pub mod completion;
pub mod config;
pub mod document;
pub mod error;
pub mod matcher;

use similar::TextDiff;
use tracing::debug;
use tree_sitter::Language;

pub use chain::ChainReport;
pub use completion::MIGRATION_MARKER_MESSAGE;
pub use config::{CompletionMode, LineTerminator, MigrationOptions, QuoteStyle};
pub use document::Document;
pub use error::{MigrateError, Result};

use async_test::make_tests_async;
use chain::flatten_chains;
use completion::{rewrite_completion_calls, CompletionRewrite};

// ============ Dialects ============

/// Source dialects the parser front-end understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    #[default]
    TypeScript,
    Tsx,
    JavaScript,
    Jsx,
}

impl Dialect {
    /// Detect dialect from file extension
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "ts" | "mts" | "cts" => Some(Self::TypeScript),
            "tsx" => Some(Self::Tsx),
            "js" | "mjs" | "cjs" => Some(Self::JavaScript),
            "jsx" => Some(Self::Jsx),
            _ => None,
        }
    }

    /// Get the tree-sitter language for this dialect
    pub(crate) fn tree_sitter_language(&self) -> Language {
        match self {
            Self::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Self::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Self::JavaScript | Self::Jsx => tree_sitter_javascript::LANGUAGE.into(),
        }
    }
}

// ============ Pipelines ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pipeline {
    /// Async test bodies, plus completion call rewriting when enabled
    Callbacks,
    /// Callback migration with completion removal, then handler chain flattening
    Chains,
}

// ============ Result Types ============

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub source: String,
    pub tests_migrated: usize,
    pub skipped_tests_migrated: usize,
    /// Completion calls removed or replaced by a marker
    pub completion_sites: usize,
    pub markers_inserted: usize,
    pub chains_flattened: usize,
    pub chains_skipped: usize,
}

impl MigrationReport {
    /// Unified diff from `original` to the migrated source
    pub fn diff(&self, original: &str, path: &str) -> String {
        TextDiff::from_lines(original, &self.source)
            .unified_diff()
            .context_radius(3)
            .header(&format!("a/{path}"), &format!("b/{path}"))
            .to_string()
    }
}

/// Outcome of a migration run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// No test call matched; callers should leave the file alone
    Unchanged,
    Rewritten(MigrationReport),
}

impl MigrationOutcome {
    pub fn report(&self) -> Option<&MigrationReport> {
        match self {
            Self::Unchanged => None,
            Self::Rewritten(report) => Some(report),
        }
    }

    pub fn into_source(self) -> Option<String> {
        match self {
            Self::Unchanged => None,
            Self::Rewritten(report) => Some(report.source),
        }
    }
}

// ============ Main Entry Points ============

/// Migrate callback-style tests to async bodies
pub fn migrate_callbacks(
    content: &str,
    dialect: Dialect,
    options: &MigrationOptions,
) -> Result<MigrationOutcome> {
    migrate(content, dialect, Pipeline::Callbacks, options)
}

/// Migrate callback-style tests and flatten handler chains
pub fn migrate_chains(
    content: &str,
    dialect: Dialect,
    options: &MigrationOptions,
) -> Result<MigrationOutcome> {
    migrate(content, dialect, Pipeline::Chains, options)
}

/// Run `pipeline` over `content`.
///
/// Either the whole input is migrated or an error is returned; partial
/// results are never produced.
pub fn migrate(
    content: &str,
    dialect: Dialect,
    pipeline: Pipeline,
    options: &MigrationOptions,
) -> Result<MigrationOutcome> {
    options.validate()?;
    let options = match pipeline {
        Pipeline::Callbacks => options.clone(),
        Pipeline::Chains => options.clone().with_completion(CompletionMode::Remove),
    };

    let mut doc = Document::parse(content, dialect)?;
    let mut tests = make_tests_async(&mut doc, &options)?;
    if tests.is_empty() {
        debug!(?pipeline, "no callback tests matched");
        return Ok(MigrationOutcome::Unchanged);
    }

    let mut completion_sites = 0;
    if options.remove_completion_func {
        let rewrite = CompletionRewrite {
            mode: options.completion_mode,
            quote: options.quote,
        };
        completion_sites = rewrite_completion_calls(&mut doc, &mut tests, rewrite)?;
    }

    let chains = match pipeline {
        Pipeline::Chains => flatten_chains(&mut doc, &mut tests)?,
        Pipeline::Callbacks => ChainReport::default(),
    };

    let markers_inserted = match options.completion_mode {
        CompletionMode::Throw if options.remove_completion_func => completion_sites,
        _ => 0,
    };

    debug!(
        ?pipeline,
        tests = tests.len(),
        completion_sites,
        chains = chains.flattened,
        "migration finished"
    );

    Ok(MigrationOutcome::Rewritten(MigrationReport {
        source: options.line_terminator.normalize(&doc.into_source()),
        tests_migrated: tests.len(),
        skipped_tests_migrated: tests.iter().filter(|t| t.skipped).count(),
        completion_sites,
        markers_inserted,
        chains_flattened: chains.flattened,
        chains_skipped: chains.skipped,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SUPERTEST: &str = r#"describe('api', function () {
  it('checks', function (done) {
    base().end((err, res) => { if (err) return; check(res); done(); });
  });
});
"#;

    #[test]
    fn test_dialect_detection() {
        assert_eq!(Dialect::from_extension("ts"), Some(Dialect::TypeScript));
        assert_eq!(Dialect::from_extension("TSX"), Some(Dialect::Tsx));
        assert_eq!(Dialect::from_extension("cjs"), Some(Dialect::JavaScript));
        assert_eq!(Dialect::from_extension("py"), None);
    }

    #[test]
    fn test_chain_pipeline_concrete_case() {
        let outcome = migrate_chains(SUPERTEST, Dialect::TypeScript, &MigrationOptions::default()).unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(
            report.source,
            "describe('api', function () {\n  it('checks', async function () {\n    const res = await base();\n    check(res);\n  });\n});\n"
        );
        assert_eq!(report.chains_flattened, 1);
        assert_eq!(report.completion_sites, 1);
        assert!(!report.source.contains("done"));
    }

    #[test]
    fn test_chain_pipeline_expression_bodied_test() {
        let code = "describe('s', () => {\n  it('t', done => agent().get('/').end((err, res) => { if (err) return done(err); check(res); done(); }));\n});\n";
        let outcome = migrate_chains(code, Dialect::TypeScript, &MigrationOptions::default()).unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(
            report.source,
            "describe('s', () => {\n  it('t', async () => {\n    const res = await agent().get('/');\n    check(res);\n  });\n});\n"
        );
        assert_eq!(report.chains_flattened, 1);
        assert_eq!(report.chains_skipped, 0);
    }

    #[test]
    fn test_chain_pipeline_completion_in_error_guard() {
        let code = "describe('s', function () {\n  it('t', function (done) {\n    base().end(function (err, res) { if (err) done(err); check(res); done(); });\n  });\n});\n";
        let outcome = migrate_chains(code, Dialect::TypeScript, &MigrationOptions::default()).unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(
            report.source,
            "describe('s', function () {\n  it('t', async function () {\n    const res = await base();\n    check(res);\n  });\n});\n"
        );
        assert_eq!(report.chains_flattened, 1);
    }

    #[test]
    fn test_unchanged_when_nothing_matches() {
        let code = "describe('s', function () {\n  it('t', async () => {});\n});\n";
        let outcome = migrate_callbacks(code, Dialect::TypeScript, &MigrationOptions::default()).unwrap();
        assert_eq!(outcome, MigrationOutcome::Unchanged);

        let outcome = migrate_chains("const x = 1;\n", Dialect::JavaScript, &MigrationOptions::default()).unwrap();
        assert_eq!(outcome.into_source(), None);
    }

    #[test]
    fn test_idempotent() {
        let options = MigrationOptions::default().with_completion(CompletionMode::Remove);
        let first = migrate_callbacks(SUPERTEST, Dialect::TypeScript, &options)
            .unwrap()
            .into_source()
            .unwrap();
        let second = migrate_callbacks(&first, Dialect::TypeScript, &options).unwrap();
        assert_eq!(second, MigrationOutcome::Unchanged);
    }

    #[test]
    fn test_skip_accessor_preserved() {
        let code = "describe('s', function () {\n  it.skip('x', function (done) {\n    a();\n    done();\n  });\n});\n";
        let options = MigrationOptions::default().with_completion(CompletionMode::Remove);
        let report = migrate_callbacks(code, Dialect::TypeScript, &options)
            .unwrap()
            .report()
            .cloned()
            .unwrap();
        assert_eq!(
            report.source,
            "describe('s', function () {\n  it.skip('x', async function () {\n    a();\n  });\n});\n"
        );
        assert_eq!(report.skipped_tests_migrated, 1);
    }

    #[test]
    fn test_parse_failure_aborts() {
        let err = migrate_callbacks("describe('s', function () {", Dialect::TypeScript, &MigrationOptions::default())
            .unwrap_err();
        assert!(matches!(err, MigrateError::Parse { .. }));
    }

    #[test]
    fn test_throw_marker_count_matches_calls() {
        let code = "describe('s', function () {\n  it('t', function (done) {\n    a(() => done());\n    b(function () { done(); });\n    done();\n  });\n});\n";
        let options = MigrationOptions::default().with_completion(CompletionMode::Throw);
        let outcome = migrate_callbacks(code, Dialect::TypeScript, &options).unwrap();
        let report = outcome.report().unwrap();
        assert_eq!(report.markers_inserted, 3);
        assert_eq!(report.source.matches(MIGRATION_MARKER_MESSAGE).count(), 3);
    }

    #[test]
    fn test_crlf_output() {
        let code = "describe('s', function () {\n  it('t', function (done) {\n    done();\n  });\n});\n";
        let options = MigrationOptions {
            line_terminator: LineTerminator::CrLf,
            ..MigrationOptions::default()
        };
        let source = migrate_callbacks(code, Dialect::TypeScript, &options)
            .unwrap()
            .into_source()
            .unwrap();
        assert!(source.contains("async function () {\r\n"));
        assert!(!source.replace("\r\n", "").contains('\n'));
    }

    #[test]
    fn test_diff_preview() {
        let outcome = migrate_chains(SUPERTEST, Dialect::TypeScript, &MigrationOptions::default()).unwrap();
        let diff = outcome.report().unwrap().diff(SUPERTEST, "api.test.ts");
        assert!(diff.starts_with("--- a/api.test.ts\n+++ b/api.test.ts\n"));
        assert!(diff.contains("+    const res = await base();"));
    }
}
