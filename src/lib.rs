use serde::{Deserialize, Serialize};

pub mod codemod;


pub use codemod::{
    migrate, migrate_callbacks, migrate_chains, ChainReport, CompletionMode, Dialect,
    LineTerminator, MigrateError, MigrationOptions, MigrationOutcome, MigrationReport, Pipeline,
    QuoteStyle, Result, MIGRATION_MARKER_MESSAGE,
};

/// Migrate `content`, picking the dialect from a file extension (`"ts"`, `"jsx"`, ...)
pub fn migrate_source(
    content: &str,
    extension: &str,
    pipeline: Pipeline,
    options: &MigrationOptions,
) -> Result<MigrationOutcome> {
    let dialect = Dialect::from_extension(extension)
        .ok_or_else(|| MigrateError::UnsupportedExtension(extension.to_string()))?;
    migrate(content, dialect, pipeline, options)
}

/// Counts-only view of a migration, for callers reporting results as JSON
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationSummary {
    pub changed: bool,
    pub tests_migrated: usize,
    pub skipped_tests_migrated: usize,
    pub completion_sites: usize,
    pub markers_inserted: usize,
    pub chains_flattened: usize,
    pub chains_skipped: usize,
    pub original_lines: usize,
    pub migrated_lines: usize,
}

impl MigrationSummary {
    pub fn new(original: &str, outcome: &MigrationOutcome) -> Self {
        let original_lines = original.lines().count();
        match outcome.report() {
            None => Self {
                original_lines,
                migrated_lines: original_lines,
                ..Self::default()
            },
            Some(report) => Self {
                changed: report.source != original,
                tests_migrated: report.tests_migrated,
                skipped_tests_migrated: report.skipped_tests_migrated,
                completion_sites: report.completion_sites,
                markers_inserted: report.markers_inserted,
                chains_flattened: report.chains_flattened,
                chains_skipped: report.chains_skipped,
                original_lines,
                migrated_lines: report.source.lines().count(),
            },
        }
    }
}
