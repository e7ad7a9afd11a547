//! Criteria: the assessable dimensions audits are scored against.
//!
//! Nodes form a tree (sections → criteria → sub-criteria). Each node carries
//! three maturity-level descriptions; the tree itself is assembled by
//! [`crate::taxonomy::Taxonomy`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

// ─── Levels ──────────────────────────────────────────────────────────────────

/// One of the three sophistication levels a practice can be judged at.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
  AsRefStr,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MaturityLevel {
  Novice,
  Intermediate,
  Advanced,
}

impl MaturityLevel {
  /// All levels, least to most advanced.
  pub const ALL: [Self; 3] = [Self::Novice, Self::Intermediate, Self::Advanced];

  pub fn index(self) -> usize {
    match self {
      Self::Novice => 0,
      Self::Intermediate => 1,
      Self::Advanced => 2,
    }
  }
}

/// The outcome of an assessment: a maturity level, or no verdict yet.
///
/// Ordered so that `Unassessed < Novice < Intermediate < Advanced`.
#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Serialize,
  Deserialize,
  AsRefStr,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Level {
  #[default]
  Unassessed,
  Novice,
  Intermediate,
  Advanced,
}

impl Level {
  pub fn is_assessed(self) -> bool { self != Self::Unassessed }

  pub fn maturity(self) -> Option<MaturityLevel> {
    match self {
      Self::Unassessed => None,
      Self::Novice => Some(MaturityLevel::Novice),
      Self::Intermediate => Some(MaturityLevel::Intermediate),
      Self::Advanced => Some(MaturityLevel::Advanced),
    }
  }
}

impl From<MaturityLevel> for Level {
  fn from(m: MaturityLevel) -> Self {
    match m {
      MaturityLevel::Novice => Self::Novice,
      MaturityLevel::Intermediate => Self::Intermediate,
      MaturityLevel::Advanced => Self::Advanced,
    }
  }
}

// ─── Definitions ─────────────────────────────────────────────────────────────

/// The text describing what each maturity level looks like for a criterion.
///
/// Missing fields deserialise as empty strings so that an incomplete
/// taxonomy can be loaded and then rejected by validation with a precise
/// problem list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaturityDefinitions {
  #[serde(default)]
  pub novice:       String,
  #[serde(default)]
  pub intermediate: String,
  #[serde(default)]
  pub advanced:     String,
}

impl MaturityDefinitions {
  pub fn get(&self, level: MaturityLevel) -> &str {
    match level {
      MaturityLevel::Novice => &self.novice,
      MaturityLevel::Intermediate => &self.intermediate,
      MaturityLevel::Advanced => &self.advanced,
    }
  }

  /// Levels whose description is empty or whitespace.
  pub fn missing(&self) -> Vec<MaturityLevel> {
    MaturityLevel::ALL
      .into_iter()
      .filter(|l| self.get(*l).trim().is_empty())
      .collect()
  }

  pub fn is_complete(&self) -> bool { self.missing().is_empty() }
}

// ─── Node ────────────────────────────────────────────────────────────────────

/// One node of the criteria tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionNode {
  pub criterion_id: Uuid,
  /// `None` for roots.
  pub parent_id:    Option<Uuid>,
  /// Display order of children. Normalised by the taxonomy on load.
  #[serde(default)]
  pub children:     Vec<Uuid>,
  pub title:        String,
  pub description:  String,
  /// Top-level grouping label, e.g. "Platform".
  pub section:      Option<String>,
  pub maturity:     MaturityDefinitions,
  /// Set for custom criteria that belong to a single audit; `None` for the
  /// shared base taxonomy.
  pub audit_id:     Option<Uuid>,
  pub created_at:   DateTime<Utc>,
}

impl CriterionNode {
  pub fn is_custom(&self) -> bool { self.audit_id.is_some() }

  /// The text the linker matches evidence against: title, description and
  /// all maturity descriptions.
  pub fn reference_text(&self) -> String {
    let mut text = format!("{}\n{}", self.title, self.description);
    for level in MaturityLevel::ALL {
      text.push('\n');
      text.push_str(level.as_ref());
      text.push_str(": ");
      text.push_str(self.maturity.get(level));
    }
    text
  }
}

/// Input for a custom per-audit criterion. Ids and timestamps are assigned by
/// the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCriterion {
  pub parent_id:   Option<Uuid>,
  pub title:       String,
  pub description: String,
  pub section:     Option<String>,
  pub maturity:    MaturityDefinitions,
}

#[cfg(test)]
mod tests {
  use std::str::FromStr;

  use super::*;

  #[test]
  fn levels_order_from_unassessed_to_advanced() {
    assert!(Level::Unassessed < Level::Novice);
    assert!(Level::Novice < Level::Intermediate);
    assert!(Level::Intermediate < Level::Advanced);
    assert_eq!(Level::from(MaturityLevel::Advanced), Level::Advanced);
    assert_eq!(Level::Unassessed.maturity(), None);
  }

  #[test]
  fn level_strings_are_snake_case() {
    assert_eq!(Level::Unassessed.as_ref(), "unassessed");
    assert_eq!(Level::from_str("intermediate").unwrap(), Level::Intermediate);
    assert_eq!(MaturityLevel::Novice.to_string(), "novice");
  }

  #[test]
  fn missing_reports_blank_definitions() {
    let defs = MaturityDefinitions {
      novice:       "Manual deploys".into(),
      intermediate: "  ".into(),
      advanced:     String::new(),
    };
    assert_eq!(defs.missing(), vec![
      MaturityLevel::Intermediate,
      MaturityLevel::Advanced
    ]);
    assert!(!defs.is_complete());
  }
}
