//! Standard builder: local extraction on the rayon pool, sequential fold

use super::backend::RuleBasedBackend;
use crate::config::ExtractionSettings;
use crate::extract::{extract_schema, ExtractionError, SchemaDescription, SourceText, UnitExtraction};
use crate::graph::{GraphError, GraphHandle, KnowledgeGraph};
use crate::llm::LlmError;
use crate::merge::{MergeEngine, MergeStats};
use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum BuildError {
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// Every supplied unit was rejected and nothing else was ingested
    #[error("All {0} input units failed extraction")]
    AllUnitsFailed(usize),

    #[error("Model error: {0}")]
    Model(#[from] LlmError),

    /// Extractor construction failed
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
}

pub type BuildResult<T> = Result<T, BuildError>;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildReport {
    pub units_total: usize,
    pub units_skipped: usize,
    #[serde(skip)]
    pub skipped: Vec<ExtractionError>,
    #[serde(skip)]
    pub stats: MergeStats,
    /// Graph version after the operation
    pub version: u64,
}

impl BuildReport {
    pub(crate) fn record(&mut self, outcome: Result<UnitExtraction, ExtractionError>, graph: &mut KnowledgeGraph, merge: &MergeEngine) {
        self.units_total += 1;
        match outcome {
            Ok(unit) => self.stats += merge.fold(graph, &unit),
            Err(e) => {
                warn!("Skipping unit: {}", e);
                self.units_skipped += 1;
                self.skipped.push(e);
            }
        }
    }

    pub(crate) fn record_schema(&mut self, schema: &SchemaDescription, graph: &mut KnowledgeGraph, merge: &MergeEngine) {
        let extraction = extract_schema(schema, &schema.source_id());
        self.units_total += 1;
        self.stats += merge.fold(graph, &extraction.unit);
        self.skipped.extend(extraction.skipped);
    }

    /// Every successful update produces a new version, even when no unit
    /// changed a record
    pub(crate) fn finish_update(&mut self, before: &KnowledgeGraph, updated: &mut KnowledgeGraph) {
        if updated.version() == before.version() {
            updated.touch();
        }
        self.version = updated.version();
    }

    /// Fails when text units were supplied and none of them survived
    pub(crate) fn ensure_progress(&self, had_schema: bool) -> BuildResult<()> {
        let text_units = self.units_total - usize::from(had_schema);
        if !had_schema && text_units > 0 && self.units_skipped == text_units {
            return Err(BuildError::AllUnitsFailed(text_units));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct BuiltGraph {
    pub graph: KnowledgeGraph,
    pub report: BuildReport,
}

pub struct StandardGraphBuilder {
    backend: RuleBasedBackend,
    merge: MergeEngine,
}

impl StandardGraphBuilder {
    pub fn new(settings: &ExtractionSettings) -> BuildResult<Self> {
        Ok(Self {
            backend: RuleBasedBackend::new(settings)?,
            merge: MergeEngine::new(settings.allow_self_loops),
        })
    }

    pub fn build(&self, texts: &[SourceText], schema: Option<&SchemaDescription>, name: &str) -> BuildResult<BuiltGraph> {
        let mut graph = KnowledgeGraph::new(name);
        let report = self.ingest(&mut graph, texts, schema)?;
        info!(
            "Built graph {} ({}): {} entities, {} relations from {} units ({} skipped)",
            graph.name(),
            graph.id(),
            graph.entity_count(),
            graph.relation_count(),
            report.units_total,
            report.units_skipped
        );
        Ok(BuiltGraph { graph, report })
    }

    /// Extract only from `texts` and merge into `graph` in place. On error
    /// the graph is left unchanged.
    pub fn update(&self, graph: &mut KnowledgeGraph, texts: &[SourceText]) -> BuildResult<BuildReport> {
        let mut scratch = graph.clone();
        let mut report = self.ingest(&mut scratch, texts, None)?;
        report.finish_update(graph, &mut scratch);
        *graph = scratch;
        info!(
            "Updated graph {} to version {}: {} units ({} skipped)",
            graph.id(),
            graph.version(),
            report.units_total,
            report.units_skipped
        );
        Ok(report)
    }

    /// Update the graph behind a shared handle; readers keep the previous
    /// snapshot until the merged graph is published
    pub fn update_shared(&self, handle: &GraphHandle, texts: &[SourceText]) -> BuildResult<BuildReport> {
        handle.update_with(|graph| self.update(graph, texts))
    }

    fn ingest(&self, graph: &mut KnowledgeGraph, texts: &[SourceText], schema: Option<&SchemaDescription>) -> BuildResult<BuildReport> {
        let extractions: Vec<Result<UnitExtraction, ExtractionError>> =
            texts.par_iter().map(|unit| self.backend.extract_unit(unit)).collect();

        let mut report = BuildReport::default();
        if let Some(schema) = schema {
            report.record_schema(schema, graph, &self.merge);
        }
        for outcome in extractions {
            report.record(outcome, graph, &self.merge);
        }
        report.ensure_progress(schema.is_some())?;
        report.version = graph.version();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Direction;

    fn builder() -> StandardGraphBuilder {
        StandardGraphBuilder::new(&ExtractionSettings::default()).unwrap()
    }

    #[test]
    fn test_build_from_text() {
        let texts = vec![SourceText::new("Tsinghua University is located in Beijing.")];
        let built = builder().build(&texts, None, "campus").unwrap();
        assert_eq!(built.graph.name(), "campus");
        assert_eq!(built.report.units_total, 1);
        assert_eq!(built.report.units_skipped, 0);
        let uni = &built.graph.find_by_name("Tsinghua University")[0];
        assert_eq!(built.graph.relations_of(&uni.id, Direction::Outgoing).len(), 1);
    }

    #[test]
    fn test_bad_units_are_skipped() {
        let texts = vec![
            SourceText::with_id("empty", "   "),
            SourceText::with_id("ok", "Peking University is in Beijing."),
        ];
        let built = builder().build(&texts, None, "g").unwrap();
        assert_eq!(built.report.units_skipped, 1);
        assert_eq!(built.report.skipped[0].source_id(), Some("empty"));
        assert!(built.graph.entity_count() > 0);
    }

    #[test]
    fn test_all_units_failed() {
        let texts = vec![SourceText::with_id("a", ""), SourceText::with_id("b", "\u{FFFD}\u{FFFD}")];
        assert!(matches!(
            builder().build(&texts, None, "g"),
            Err(BuildError::AllUnitsFailed(2))
        ));
    }

    #[test]
    fn test_failed_update_leaves_graph_untouched() {
        let b = builder();
        let mut graph = b
            .build(&[SourceText::new("Tsinghua University is located in Beijing.")], None, "g")
            .unwrap()
            .graph;
        let before = graph.snapshot();
        assert!(b.update(&mut graph, &[SourceText::with_id("x", "")]).is_err());
        assert_eq!(graph.snapshot(), before);
    }

    #[test]
    fn test_update_without_new_records_still_bumps_version() {
        let b = builder();
        let mut graph = b
            .build(&[SourceText::new("Tsinghua University is located in Beijing.")], None, "g")
            .unwrap()
            .graph;
        let entities = graph.entity_ids();

        let v0 = graph.version();
        let report = b
            .update(&mut graph, &[SourceText::with_id("plain", "nothing worth extracting here.")])
            .unwrap();
        assert_eq!(report.units_skipped, 0);
        assert_eq!(graph.entity_ids(), entities);
        assert!(graph.version() > v0);
        assert_eq!(report.version, graph.version());

        let v1 = graph.version();
        b.update(&mut graph, &[]).unwrap();
        assert!(graph.version() > v1);
    }

    #[test]
    fn test_update_shared_publishes_new_snapshot() {
        let b = builder();
        let handle = GraphHandle::new(KnowledgeGraph::new("shared"));
        let before = handle.snapshot();
        b.update_shared(&handle, &[SourceText::new("Tsinghua University is located in Beijing.")])
            .unwrap();
        assert!(before.is_empty());
        assert!(!handle.snapshot().is_empty());
    }
}
