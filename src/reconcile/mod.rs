//! Reconciliation pass: quarantine poisoned runs, then re-densify the rest.
//!
//! `Reconciler::reconcile` is idempotent. A second call with no dispatch in
//! between finds nothing to delete and nothing to rename.

pub mod quarantine;
pub mod renumber;

pub use quarantine::{ErrorQuarantine, QuarantineEntry, QuarantineReport};
pub use renumber::{RenameEntry, RenumberReport, SequenceRenumberer};

use crate::scanner::{ArtifactScanner, ScanResult, StateSource};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub quarantine: QuarantineReport,
    pub renumber: RenumberReport,
    /// Scan warnings from every scan taken during the pass.
    pub warnings: Vec<String>,
}

impl ReconcileReport {
    pub fn changed_anything(&self) -> bool {
        !self.quarantine.removed.is_empty()
            || !self.quarantine.removed_persona_dirs.is_empty()
            || !self.renumber.renamed.is_empty()
    }

    pub fn failure_count(&self) -> usize {
        self.quarantine.failures.len() + self.renumber.failures.len()
    }
}

/// Result of a reconciliation pass: what changed, and the tree as it stands afterwards.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub report: ReconcileReport,
    pub scan: ScanResult,
}

pub struct Reconciler {
    scanner: ArtifactScanner,
    quarantine: ErrorQuarantine,
    renumberer: SequenceRenumberer,
}

impl Reconciler {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            scanner: ArtifactScanner::new(output_root),
            quarantine: ErrorQuarantine::new(),
            renumberer: SequenceRenumberer::new(),
        }
    }

    /// Scan, quarantine, renumber, and re-scan.
    pub fn reconcile(&self, persona_ids: &[String]) -> Reconciliation {
        let initial = self.scanner.scan(persona_ids);
        let quarantine = self.quarantine.purge(&initial);

        let survivors = if quarantine.is_empty() {
            initial.clone()
        } else {
            self.scanner.scan(persona_ids)
        };
        let renumber = self.renumberer.renumber(&survivors);

        let scan = if renumber.renamed.is_empty() {
            survivors
        } else {
            self.scanner.scan(persona_ids)
        };

        let mut warnings = initial.warnings;
        for w in &scan.warnings {
            if !warnings.contains(w) {
                warnings.push(w.clone());
            }
        }

        Reconciliation {
            report: ReconcileReport {
                quarantine,
                renumber,
                warnings,
            },
            scan,
        }
    }
}
