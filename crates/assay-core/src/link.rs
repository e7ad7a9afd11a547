//! Evidence-to-criterion links and the ranking rules for suggestions.

use std::{cmp::Ordering, collections::HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use uuid::Uuid;

use crate::{Actor, Error, Result, criterion::MaturityLevel};

#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  AsRefStr,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LinkStatus {
  /// Proposed by the analysis service; has no effect on scoring.
  Suggested,
  /// Authoritative; feeds scoring.
  Confirmed,
}

/// Where a link came from.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  AsRefStr,
  Display,
  EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LinkOrigin {
  Suggested,
  Manual,
  AutoAccepted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceLink {
  pub link_id:      Uuid,
  pub audit_id:     Uuid,
  pub evidence_id:  Uuid,
  pub criterion_id: Uuid,
  /// Relevance in `[0, 1]`.
  pub weight:       f32,
  /// The level this evidence is believed to support, when known.
  pub level_hint:   Option<MaturityLevel>,
  pub origin:       LinkOrigin,
  pub status:       LinkStatus,
  pub created_by:   Actor,
  pub created_at:   DateTime<Utc>,
  pub confirmed_by: Option<Actor>,
  pub confirmed_at: Option<DateTime<Utc>>,
}

impl EvidenceLink {
  pub fn is_confirmed(&self) -> bool { self.status == LinkStatus::Confirmed }
}

/// Input to [`crate::store::AuditStore::add_link`].
#[derive(Debug, Clone)]
pub struct NewLink {
  pub audit_id:     Uuid,
  pub evidence_id:  Uuid,
  pub criterion_id: Uuid,
  pub weight:       f32,
  pub level_hint:   Option<MaturityLevel>,
  pub origin:       LinkOrigin,
  pub status:       LinkStatus,
  pub created_by:   Actor,
}

/// A proposed association, before it is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinkSuggestion {
  pub criterion_id: Uuid,
  pub weight:       f32,
}

pub fn check_weight(weight: f32) -> Result<()> {
  if (0.0..=1.0).contains(&weight) {
    Ok(())
  } else {
    Err(Error::invalid(format!("link weight {weight} is outside [0, 1]")))
  }
}

/// Keep the scores at or above `threshold`, best first. Equal weights keep
/// taxonomy order (`order` maps criterion id to preorder position); criteria
/// missing from `order` sort last.
pub fn rank_suggestions(
  scores: impl IntoIterator<Item = (Uuid, f32)>,
  order: &HashMap<Uuid, usize>,
  threshold: f32,
) -> Vec<LinkSuggestion> {
  let mut kept: Vec<LinkSuggestion> = scores
    .into_iter()
    .filter(|(_, w)| *w >= threshold)
    .map(|(criterion_id, weight)| LinkSuggestion {
      criterion_id,
      weight: weight.clamp(0.0, 1.0),
    })
    .collect();

  kept.sort_by(|a, b| {
    b.weight
      .partial_cmp(&a.weight)
      .unwrap_or(Ordering::Equal)
      .then_with(|| {
        let pa = order.get(&a.criterion_id).copied().unwrap_or(usize::MAX);
        let pb = order.get(&b.criterion_id).copied().unwrap_or(usize::MAX);
        pa.cmp(&pb)
      })
  });
  kept
}
