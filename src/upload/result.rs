//! Upload outcomes reported per plan node.

use indexmap::IndexMap;
use serde::Serialize;

use crate::{
    parsing::{CellIssue, PicklistAddition},
    store::RecordId,
};

/// Identifies the node a result belongs to in user terms.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportInfo {
    pub table_name: String,
    pub columns: Vec<String>,
}

/// What happened to one plan node for one row.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Outcome {
    /// all inputs were blank and nothing was required
    NullRecord { info: ReportInfo },
    Matched { id: RecordId, info: ReportInfo },
    /// ambiguous match; recorded for a human reviewer, never auto-resolved
    MatchedMultiple { ids: Vec<RecordId>, info: ReportInfo },
    /// a must-match node found nothing
    NoMatch { info: ReportInfo },
    Uploaded { id: RecordId, info: ReportInfo, picklist_additions: Vec<PicklistAddition> },
    ParseFailed { issues: Vec<CellIssue>, info: ReportInfo },
}

/// The result tree mirroring the plan shape.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub outcome: Outcome,
    pub to_one: IndexMap<String, UploadResult>,
    pub to_many: IndexMap<String, Vec<UploadResult>>,
}

impl UploadResult {
    pub fn one(outcome: Outcome) -> Self {
        Self { outcome, to_one: IndexMap::new(), to_many: IndexMap::new() }
    }

    /// The id this node contributes as a foreign key, if any.
    pub fn record_id(&self) -> Option<RecordId> {
        match &self.outcome {
            Outcome::Matched { id, .. } | Outcome::Uploaded { id, .. } => Some(*id),
            _ => None,
        }
    }

    pub fn is_null_record(&self) -> bool {
        matches!(self.outcome, Outcome::NullRecord { .. })
    }

    pub fn is_parse_failure(&self) -> bool {
        matches!(self.outcome, Outcome::ParseFailed { .. })
    }

    /// A child outcome the parent cannot key against: ambiguity or a missed
    /// must-match. Creation above it is skipped.
    pub fn blocks_parent(&self) -> bool {
        matches!(
            self.outcome,
            Outcome::NoMatch { .. } | Outcome::MatchedMultiple { .. } | Outcome::ParseFailed { .. }
        )
    }

    /// Whether any node in this subtree reports a failure or ambiguity.
    pub fn contains_failure(&self) -> bool {
        self.blocks_parent()
            || self.to_one.values().any(Self::contains_failure)
            || self
                .to_many
                .values()
                .any(|results| results.iter().any(Self::contains_failure))
    }
}
