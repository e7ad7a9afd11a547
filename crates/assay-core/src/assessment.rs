//! Maturity assessments and the pure scoring rules behind them.
//!
//! The aggregator proposes, a human decides: every assessment carries the
//! computed level, an optional human override, and the effective level that
//! results. The functions here never call out; the engine gathers semantic
//! scores first and hands them in as [`LinkAlignment`]s.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
  Actor,
  criterion::{Level, MaturityLevel},
};

/// Support sums are compared with this much slack so that, say, 0.3 + 0.3
/// meets a 0.6 threshold despite float rounding.
const SUPPORT_EPSILON: f32 = 1e-5;

// ─── Scoring inputs and outputs ──────────────────────────────────────────────

/// One confirmed link with the semantic alignment of its evidence against each
/// maturity description (indexed by [`MaturityLevel::index`]).
#[derive(Debug, Clone, PartialEq)]
pub struct LinkAlignment {
  pub link_id: Uuid,
  pub weight:  f32,
  pub hint:    Option<MaturityLevel>,
  pub scores:  [f32; 3],
}

impl LinkAlignment {
  /// The level this link counts towards: its hint when one was given,
  /// otherwise the best-aligned level. Ties go to the lower level.
  pub fn supported_level(&self) -> MaturityLevel {
    if let Some(hint) = self.hint {
      return hint;
    }
    let mut best = MaturityLevel::Novice;
    for level in MaturityLevel::ALL {
      if self.scores[level.index()] > self.scores[best.index()] {
        best = level;
      }
    }
    best
  }
}

/// How the evidence stacks up for one level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelBreakdown {
  pub level:     MaturityLevel,
  /// Sum of the weights of links supporting this level.
  pub support:   f32,
  /// Weight-averaged semantic score of all evidence against this level.
  pub alignment: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DirectScore {
  pub level:     Level,
  pub breakdown: Vec<LevelBreakdown>,
}

/// Score a criterion from its own confirmed evidence.
///
/// Levels whose support meets `coverage_threshold` are eligible; the eligible
/// level with the best alignment wins, ties going to the more advanced level.
/// No links, or no eligible level, means [`Level::Unassessed`].
pub fn score_direct(links: &[LinkAlignment], coverage_threshold: f32) -> DirectScore {
  if links.is_empty() {
    return DirectScore {
      level:     Level::Unassessed,
      breakdown: Vec::new(),
    };
  }

  let total: f32 = links.iter().map(|l| l.weight).sum();
  let breakdown: Vec<LevelBreakdown> = MaturityLevel::ALL
    .into_iter()
    .map(|level| {
      let support = links
        .iter()
        .filter(|l| l.supported_level() == level)
        .map(|l| l.weight)
        .sum();
      let alignment = if total > 0.0 {
        links
          .iter()
          .map(|l| l.weight * l.scores[level.index()])
          .sum::<f32>()
          / total
      } else {
        0.0
      };
      LevelBreakdown {
        level,
        support,
        alignment,
      }
    })
    .collect();

  let mut chosen: Option<LevelBreakdown> = None;
  for entry in &breakdown {
    if entry.support + SUPPORT_EPSILON < coverage_threshold {
      continue;
    }
    if chosen.is_none_or(|c| entry.alignment >= c.alignment) {
      chosen = Some(*entry);
    }
  }

  DirectScore {
    level: chosen.map_or(Level::Unassessed, |c| c.level.into()),
    breakdown,
  }
}

/// Combine a node's direct level with its in-scope children's effective
/// levels.
///
/// The rolled-up level is the weakest assessed child; unassessed children do
/// not count. With direct evidence the node takes the better of the two.
/// Returns `(level, rolled_up)`.
pub fn roll_up(direct: Level, children: &[Level]) -> (Level, Option<Level>) {
  let rolled = children.iter().copied().filter(|l| l.is_assessed()).min();
  let level = match rolled {
    Some(r) if direct.is_assessed() => direct.max(r),
    Some(r) => r,
    None => direct,
  };
  (level, rolled)
}

// ─── Assessment record ───────────────────────────────────────────────────────

/// A human decision that takes precedence over the computed level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanOverride {
  pub level:     MaturityLevel,
  pub rationale: String,
  pub actor:     Actor,
  pub at:        DateTime<Utc>,
}

/// Everything the aggregator derived for one criterion.
#[derive(Debug, Clone, PartialEq)]
pub struct Computation {
  pub direct:             Level,
  pub rolled_up:          Option<Level>,
  pub computed:           Level,
  pub breakdown:          Vec<LevelBreakdown>,
  pub contributing_links: Vec<Uuid>,
}

impl Computation {
  pub fn new(
    direct: DirectScore,
    child_levels: &[Level],
    contributing_links: Vec<Uuid>,
  ) -> Self {
    let (computed, rolled_up) = roll_up(direct.level, child_levels);
    Self {
      direct: direct.level,
      rolled_up,
      computed,
      breakdown: direct.breakdown,
      contributing_links,
    }
  }

  /// Human-readable account of how `computed` was reached.
  pub fn explain(&self, coverage_threshold: f32) -> String {
    let mut out = String::new();
    if self.contributing_links.is_empty() {
      out.push_str("no confirmed evidence");
    } else {
      let _ = write!(out, "{} confirmed link(s)", self.contributing_links.len());
      for b in &self.breakdown {
        let _ = write!(
          out,
          "; {}: support {:.2}, alignment {:.2}",
          b.level, b.support, b.alignment
        );
      }
      let _ = write!(
        out,
        "; direct level {} at coverage {coverage_threshold:.2}",
        self.direct
      );
    }
    if let Some(rolled) = self.rolled_up {
      let _ = write!(out, "; weakest assessed child {rolled}");
    }
    let _ = write!(out, "; computed {}", self.computed);
    out
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaturityAssessment {
  pub audit_id:           Uuid,
  pub criterion_id:       Uuid,
  /// The aggregator's proposal.
  pub computed:           Level,
  /// Level from this criterion's own evidence.
  pub direct:             Level,
  /// Weakest assessed in-scope child, when there is one.
  pub rolled_up:          Option<Level>,
  pub human_override:     Option<HumanOverride>,
  /// `human_override.level` when present, otherwise `computed`.
  pub effective:          Level,
  /// Set when the evidence behind an overridden criterion changed after the
  /// override was made.
  pub needs_review:       bool,
  pub rationale:          String,
  pub breakdown:          Vec<LevelBreakdown>,
  pub contributing_links: Vec<Uuid>,
  /// Set while the audit is finalized.
  pub locked:             bool,
  pub modified_by:        Actor,
  pub modified_at:        DateTime<Utc>,
}

impl MaturityAssessment {
  pub fn unassessed(
    audit_id: Uuid,
    criterion_id: Uuid,
    actor: Actor,
    now: DateTime<Utc>,
  ) -> Self {
    Self {
      audit_id,
      criterion_id,
      computed: Level::Unassessed,
      direct: Level::Unassessed,
      rolled_up: None,
      human_override: None,
      effective: Level::Unassessed,
      needs_review: false,
      rationale: String::new(),
      breakdown: Vec::new(),
      contributing_links: Vec::new(),
      locked: false,
      modified_by: actor,
      modified_at: now,
    }
  }

  fn refresh_effective(&mut self) {
    self.effective = match &self.human_override {
      Some(o) => o.level.into(),
      None => self.computed,
    };
  }

  /// Record a fresh computation, keeping any human override in force.
  /// Returns `false`, leaving the record untouched, when nothing changed.
  pub fn apply(
    &mut self,
    computation: Computation,
    rationale: String,
    actor: Actor,
    now: DateTime<Utc>,
  ) -> bool {
    let unchanged = self.computed == computation.computed
      && self.direct == computation.direct
      && self.rolled_up == computation.rolled_up
      && self.breakdown == computation.breakdown
      && self.contributing_links == computation.contributing_links
      && self.rationale == rationale;
    if unchanged {
      return false;
    }
    self.computed = computation.computed;
    self.direct = computation.direct;
    self.rolled_up = computation.rolled_up;
    self.breakdown = computation.breakdown;
    self.contributing_links = computation.contributing_links;
    self.rationale = rationale;
    self.modified_by = actor;
    self.modified_at = now;
    self.refresh_effective();
    true
  }

  pub fn set_override(&mut self, decision: HumanOverride) {
    self.modified_by = decision.actor.clone();
    self.modified_at = decision.at;
    self.human_override = Some(decision);
    self.needs_review = false;
    self.refresh_effective();
  }

  /// Drop the override so the computed level is effective again. Returns
  /// `false` when there was none.
  pub fn clear_override(&mut self, actor: Actor, now: DateTime<Utc>) -> bool {
    if self.human_override.take().is_none() {
      return false;
    }
    self.needs_review = false;
    self.modified_by = actor;
    self.modified_at = now;
    self.refresh_effective();
    true
  }

  /// Flag an overridden assessment for another look. Returns whether the
  /// flag was newly raised; assessments without an override never need it.
  pub fn flag_for_review(&mut self) -> bool {
    if self.human_override.is_none() || self.needs_review {
      return false;
    }
    self.needs_review = true;
    true
  }
}
