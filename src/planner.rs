//! Work planner: turns a reconciled scan into an ordered dispatch plan.

use crate::scanner::ScanResult;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Completion class of a persona relative to the target run count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Complete,
    Incomplete,
    New,
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Classification::Complete => write!(f, "complete"),
            Classification::Incomplete => write!(f, "incomplete"),
            Classification::New => write!(f, "new"),
        }
    }
}

/// Classify a persona by its valid run count.
///
/// `complete` wins over `new` when the target is zero.
pub fn classify(valid_run_count: u32, target_count: u32) -> Classification {
    if valid_run_count >= target_count {
        Classification::Complete
    } else if valid_run_count == 0 {
        Classification::New
    } else {
        Classification::Incomplete
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersonaCompletionState {
    pub persona_id: String,
    pub valid_run_count: u32,
    pub target_count: u32,
    pub classification: Classification,
}

impl PersonaCompletionState {
    pub fn new(persona_id: &str, valid_run_count: u32, target_count: u32) -> Self {
        Self {
            persona_id: persona_id.to_string(),
            valid_run_count,
            target_count,
            classification: classify(valid_run_count, target_count),
        }
    }

    pub fn remaining(&self) -> u32 {
        self.target_count.saturating_sub(self.valid_run_count)
    }
}

/// One persona needing work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchItem {
    pub persona_id: String,
    pub classification: Classification,
    pub valid_run_count: u32,
    /// Runs to request from the worker in this invocation.
    pub increment: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub complete: usize,
    pub incomplete: usize,
    pub new: usize,
}

impl PlanSummary {
    pub fn total(&self) -> usize {
        self.complete + self.incomplete + self.new
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchPlan {
    pub target_count: u32,
    /// New personas first, then incomplete ones, each in registry order.
    pub items: Vec<DispatchItem>,
    pub states: Vec<PersonaCompletionState>,
    pub summary: PlanSummary,
    /// Allow-listed ids that the registry does not know.
    pub unknown_allowed: Vec<String>,
}

impl DispatchPlan {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn persona_ids(&self) -> Vec<String> {
        self.items.iter().map(|i| i.persona_id.clone()).collect()
    }

    /// Largest requested increment in the plan.
    pub fn max_increment(&self) -> u32 {
        self.items.iter().map(|i| i.increment).max().unwrap_or(0)
    }

    pub fn item(&self, persona_id: &str) -> Option<&DispatchItem> {
        self.items.iter().find(|i| i.persona_id == persona_id)
    }
}

#[derive(Debug, Clone)]
pub struct WorkPlanner {
    target_count: u32,
    per_invocation_cap: Option<u32>,
}

impl WorkPlanner {
    pub fn new(target_count: u32) -> Self {
        Self {
            target_count,
            per_invocation_cap: None,
        }
    }

    /// Cap the runs requested from a single invocation.
    pub fn with_cap(mut self, cap: Option<u32>) -> Self {
        self.per_invocation_cap = cap;
        self
    }

    pub fn target_count(&self) -> u32 {
        self.target_count
    }

    /// Build the dispatch plan for `scan`, optionally restricted to `allow_list`.
    pub fn plan(&self, scan: &ScanResult, allow_list: Option<&[String]>) -> DispatchPlan {
        let allowed: Option<HashSet<&str>> =
            allow_list.map(|list| list.iter().map(String::as_str).collect());

        let mut new_items = Vec::new();
        let mut incomplete_items = Vec::new();
        let mut states = Vec::with_capacity(scan.personas.len());
        let mut summary = PlanSummary::default();

        for persona in &scan.personas {
            let state = PersonaCompletionState::new(
                &persona.persona_id,
                persona.valid_run_count(),
                self.target_count,
            );

            match state.classification {
                Classification::Complete => summary.complete += 1,
                Classification::Incomplete => summary.incomplete += 1,
                Classification::New => summary.new += 1,
            }

            let in_scope = allowed
                .as_ref()
                .is_none_or(|set| set.contains(persona.persona_id.as_str()));

            if in_scope && state.classification != Classification::Complete {
                let item = DispatchItem {
                    persona_id: state.persona_id.clone(),
                    classification: state.classification,
                    valid_run_count: state.valid_run_count,
                    increment: self.increment_for(&state),
                };
                match state.classification {
                    Classification::New => new_items.push(item),
                    _ => incomplete_items.push(item),
                }
            }

            states.push(state);
        }

        let unknown_allowed = match allow_list {
            Some(list) => list
                .iter()
                .filter(|id| scan.persona(id).is_none())
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        for id in &unknown_allowed {
            tracing::warn!(persona = %id, "allow-listed persona is not in the registry, ignoring");
        }

        new_items.extend(incomplete_items);

        DispatchPlan {
            target_count: self.target_count,
            items: new_items,
            states,
            summary,
            unknown_allowed,
        }
    }

    fn increment_for(&self, state: &PersonaCompletionState) -> u32 {
        let remaining = state.remaining();
        match self.per_invocation_cap {
            Some(cap) if cap > 0 => remaining.min(cap),
            _ => remaining,
        }
    }
}
