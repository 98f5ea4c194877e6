use std::sync::Arc;

use bus_ledger::Ledger;
use tracing::instrument;

use crate::anchors::AnchorsLayer;
use crate::crystals::CrystalsLayer;
use crate::error::Result;
use crate::graph::GraphLayer;
use crate::layer::MemoryLayer;
use crate::raw::RawLayer;
use crate::types::{
    AmbientRecallBundle, ClockBlock, LayerResult, MemoryHealth, SummaryView, UnsummarizedTurn,
};

const STARTUP_SUMMARY_LIMIT: usize = 5;
const STARTUP_SUMMARY_CHAR_LIMIT: usize = 500;
const STARTUP_TURN_LIMIT: usize = 50;
const STARTUP_TURN_CHAR_LIMIT: usize = 1000;

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

/// Fans recall requests out across the four memory layers and assembles
/// the structured bundle workers use to reconstruct context.
pub struct MemoryRouter {
    ledger: Arc<Ledger>,
    raw: RawLayer,
    anchors: AnchorsLayer,
    graph: GraphLayer,
    crystals: CrystalsLayer,
}

impl MemoryRouter {
    pub fn new(
        ledger: Arc<Ledger>,
        anchors: AnchorsLayer,
        graph: GraphLayer,
        crystals: CrystalsLayer,
    ) -> Self {
        let raw = RawLayer::new(ledger.clone());
        Self { ledger, raw, anchors, graph, crystals }
    }

    /// Ambient recall aggregation (§4.2): fan out `search` to all four
    /// layers in parallel, union and stable-sort by descending
    /// relevance, then attach the clock and memory-health blocks. The
    /// literal string `"startup"` is a preset, not a query — it is never
    /// passed to any layer's semantic search.
    #[instrument(skip(self))]
    pub async fn ambient_recall(&self, context: &str, limit_per_layer: usize) -> Result<AmbientRecallBundle> {
        let is_startup = context.eq_ignore_ascii_case("startup");

        let results = if is_startup {
            Vec::new()
        } else {
            let (raw, anchors, graph, crystals) = tokio::join!(
                self.raw.search(context, limit_per_layer),
                self.anchors.search(context, limit_per_layer),
                self.graph.search(context, limit_per_layer),
                self.crystals.search(context, limit_per_layer),
            );
            let mut combined: Vec<LayerResult> = Vec::new();
            for layer_results in [raw, anchors, graph, crystals] {
                combined.extend(layer_results?);
            }
            combined.sort_by(|a, b| b.relevance.partial_cmp(&a.relevance).unwrap_or(std::cmp::Ordering::Equal));
            combined
        };

        let unsummarized_count = self.ledger.count_unsummarized()?;
        let memory_health = MemoryHealth::from_unsummarized_count(unsummarized_count);

        let (summaries, unsummarized_turns) = if is_startup {
            let summaries = self
                .ledger
                .recent_summaries(STARTUP_SUMMARY_LIMIT)?
                .into_iter()
                .map(|s| SummaryView {
                    id: s.id,
                    text: truncate(&s.text, STARTUP_SUMMARY_CHAR_LIMIT),
                    time_span_start: s.time_span_start.unwrap_or_default(),
                    time_span_end: s.time_span_end.unwrap_or_default(),
                })
                .collect();

            let turns = self
                .ledger
                .get_unsummarized(STARTUP_TURN_LIMIT)?
                .into_iter()
                .map(|m| UnsummarizedTurn {
                    id: m.id,
                    author: m.author_name,
                    content: truncate(&m.content, STARTUP_TURN_CHAR_LIMIT),
                    created_at: m.created_at,
                })
                .collect();

            (summaries, turns)
        } else {
            (Vec::new(), Vec::new())
        };

        Ok(AmbientRecallBundle {
            clock: ClockBlock::now(),
            unsummarized_count,
            memory_health,
            results,
            summaries,
            unsummarized_turns,
        })
    }

    pub fn raw(&self) -> &RawLayer {
        &self.raw
    }

    pub fn anchors(&self) -> &AnchorsLayer {
        &self.anchors
    }

    pub fn graph(&self) -> &GraphLayer {
        &self.graph
    }

    pub fn crystals(&self) -> &CrystalsLayer {
        &self.crystals
    }
}
