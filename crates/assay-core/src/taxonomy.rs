//! The criteria tree as an arena keyed by id.
//!
//! Nodes reference their parent and children by id only; the arena owns every
//! node. Child order is normalised on construction: a node's declared
//! `children` order is kept for ids that really point back at it, and any
//! other node naming it as parent is appended in insertion order. That is how
//! custom per-audit criteria slot under shared base nodes without the base
//! node being edited.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
  Error, Result,
  criterion::{CriterionNode, MaturityDefinitions},
  error::{Problem, Problems},
};

// ─── Arena ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct Taxonomy {
  nodes: HashMap<Uuid, CriterionNode>,
  /// Insertion order; doubles as the tie-break among roots.
  order: Vec<Uuid>,
  roots: Vec<Uuid>,
}

impl Taxonomy {
  pub fn new(nodes: impl IntoIterator<Item = CriterionNode>) -> Self {
    let mut map: HashMap<Uuid, CriterionNode> = HashMap::new();
    let mut order = Vec::new();
    for node in nodes {
      if !map.contains_key(&node.criterion_id) {
        order.push(node.criterion_id);
      }
      map.insert(node.criterion_id, node);
    }

    let mut actual: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for id in &order {
      if let Some(parent) = map.get(id).and_then(|n| n.parent_id) {
        actual.entry(parent).or_default().push(*id);
      }
    }

    for id in &order {
      let real = actual.remove(id).unwrap_or_default();
      if let Some(node) = map.get_mut(id) {
        let mut ordered: Vec<Uuid> = Vec::with_capacity(real.len());
        for child in node.children.iter().chain(real.iter()) {
          if real.contains(child) && !ordered.contains(child) {
            ordered.push(*child);
          }
        }
        node.children = ordered;
      }
    }

    let roots = order
      .iter()
      .filter(|id| map.get(id).is_some_and(|n| n.parent_id.is_none()))
      .copied()
      .collect();

    Self {
      nodes: map,
      order,
      roots,
    }
  }

  pub fn len(&self) -> usize { self.nodes.len() }

  pub fn is_empty(&self) -> bool { self.nodes.is_empty() }

  pub fn contains(&self, id: Uuid) -> bool { self.nodes.contains_key(&id) }

  pub fn roots(&self) -> impl Iterator<Item = &CriterionNode> {
    self.roots.iter().filter_map(|id| self.nodes.get(id))
  }

  /// All nodes in insertion order.
  pub fn nodes(&self) -> impl Iterator<Item = &CriterionNode> {
    self.order.iter().filter_map(|id| self.nodes.get(id))
  }

  pub fn get_node(&self, id: Uuid) -> Result<&CriterionNode> {
    self
      .nodes
      .get(&id)
      .ok_or_else(|| Error::not_found("criterion", id))
  }

  /// Children of `id` in display order.
  pub fn children(&self, id: Uuid) -> Result<Vec<&CriterionNode>> {
    let node = self.get_node(id)?;
    Ok(
      node
        .children
        .iter()
        .filter_map(|c| self.nodes.get(c))
        .collect(),
    )
  }

  /// The path from the root down to `id`, inclusive of both ends.
  pub fn ancestors(&self, id: Uuid) -> Result<Vec<&CriterionNode>> {
    let mut path = vec![self.get_node(id)?];
    let mut seen = HashSet::from([id]);
    let mut current = path[0].parent_id;
    while let Some(parent_id) = current {
      if !seen.insert(parent_id) {
        return Err(Error::Validation(Problems(vec![Problem::Cycle {
          nodes: seen.into_iter().collect(),
        }])));
      }
      let parent = self.get_node(parent_id)?;
      path.push(parent);
      current = parent.parent_id;
    }
    path.reverse();
    Ok(path)
  }

  /// Taxonomy order: roots in insertion order, each followed depth-first by
  /// its children in display order. Nodes caught in a cycle are unreachable
  /// and therefore omitted.
  pub fn preorder(&self) -> Vec<Uuid> {
    let mut out = Vec::with_capacity(self.nodes.len());
    for root in &self.roots {
      self.walk(*root, &mut out);
    }
    out
  }

  /// `id` and everything below it, parents before children.
  pub fn subtree(&self, id: Uuid) -> Result<Vec<Uuid>> {
    self.get_node(id)?;
    let mut out = Vec::new();
    self.walk(id, &mut out);
    Ok(out)
  }

  fn walk(&self, start: Uuid, out: &mut Vec<Uuid>) {
    let mut seen: HashSet<Uuid> = out.iter().copied().collect();
    let mut stack = vec![start];
    while let Some(id) = stack.pop() {
      if !seen.insert(id) {
        continue;
      }
      let Some(node) = self.nodes.get(&id) else {
        continue;
      };
      out.push(id);
      stack.extend(node.children.iter().rev().copied());
    }
  }

  /// Position of every reachable node in taxonomy order.
  pub fn order_index(&self) -> HashMap<Uuid, usize> {
    self
      .preorder()
      .into_iter()
      .enumerate()
      .map(|(i, id)| (id, i))
      .collect()
  }

  /// Check structural soundness. Fails with [`Error::Validation`] listing
  /// every cycle, every missing maturity text and every dangling parent.
  pub fn validate(&self) -> Result<()> {
    let mut problems = Vec::new();

    for node in self.nodes() {
      if let Some(parent) = node.parent_id
        && !self.nodes.contains_key(&parent)
      {
        problems.push(Problem::DanglingParent {
          criterion_id: node.criterion_id,
          parent_id:    parent,
        });
      }
      for level in node.maturity.missing() {
        problems.push(Problem::MissingMaturityText {
          criterion_id: node.criterion_id,
          level,
        });
      }
    }

    problems.extend(self.cycles().into_iter().map(|nodes| Problem::Cycle { nodes }));

    if problems.is_empty() {
      Ok(())
    } else {
      Err(Error::Validation(Problems(problems)))
    }
  }

  /// Each parent-pointer cycle, reported once.
  fn cycles(&self) -> Vec<Vec<Uuid>> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
      Active,
      Done,
    }

    let mut marks: HashMap<Uuid, Mark> = HashMap::new();
    let mut found = Vec::new();

    for start in &self.order {
      let mut path: Vec<Uuid> = Vec::new();
      let mut current = Some(*start);
      while let Some(id) = current {
        match marks.get(&id) {
          Some(Mark::Done) => break,
          Some(Mark::Active) => {
            if let Some(pos) = path.iter().position(|p| *p == id) {
              found.push(path[pos..].to_vec());
            }
            break;
          }
          None => {}
        }
        marks.insert(id, Mark::Active);
        path.push(id);
        current = self
          .nodes
          .get(&id)
          .and_then(|n| n.parent_id)
          .filter(|p| self.nodes.contains_key(p));
      }
      for id in path {
        marks.insert(id, Mark::Done);
      }
    }

    found
  }

  /// Copy the subtree rooted at `root` into custom criteria owned by
  /// `audit_id`, with fresh ids. The copy hangs under the same parent as the
  /// original; the shared taxonomy is not touched.
  pub fn clone_subtree(
    &self,
    root: Uuid,
    audit_id: Uuid,
    now: DateTime<Utc>,
  ) -> Result<Vec<CriterionNode>> {
    let ids = self.subtree(root)?;
    let remap: HashMap<Uuid, Uuid> =
      ids.iter().map(|id| (*id, Uuid::new_v4())).collect();

    let mut out = Vec::with_capacity(ids.len());
    for id in &ids {
      let original = self.get_node(*id)?;
      let parent_id = if *id == root {
        original.parent_id
      } else {
        original.parent_id.and_then(|p| remap.get(&p).copied())
      };
      out.push(CriterionNode {
        criterion_id: remap[id],
        parent_id,
        children: original
          .children
          .iter()
          .filter_map(|c| remap.get(c).copied())
          .collect(),
        title: original.title.clone(),
        description: original.description.clone(),
        section: original.section.clone(),
        maturity: original.maturity.clone(),
        audit_id: Some(audit_id),
        created_at: now,
      });
    }
    Ok(out)
  }
}

// ─── Import format ───────────────────────────────────────────────────────────

/// Source-document identifier: the criteria JSON uses either numbers or
/// strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(untagged)]
pub enum SourceId {
  Number(i64),
  Text(String),
}

/// One criterion as it appears in a criteria document. Children may be
/// declared through `parent` (flat layout) or nested under `children`.
#[derive(Debug, Clone, Deserialize)]
pub struct CriterionDocument {
  pub id:                   SourceId,
  #[serde(default)]
  pub parent:               Option<SourceId>,
  pub title:                String,
  #[serde(default)]
  pub description:          String,
  #[serde(default)]
  pub maturity_definitions: MaturityDefinitions,
  #[serde(default)]
  pub children:             Vec<CriterionDocument>,
}

/// A top-level section of a criteria document.
#[derive(Debug, Clone, Deserialize)]
pub struct SectionDocument {
  pub section:  String,
  pub criteria: Vec<CriterionDocument>,
}

/// Turn criteria documents into base-taxonomy nodes with fresh ids.
///
/// Source ids only have to be unique within their section; parents are
/// resolved in the same section. Unknown parents are reported as input
/// problems rather than silently promoted to roots.
pub fn nodes_from_sections(
  sections: Vec<SectionDocument>,
  now: DateTime<Utc>,
) -> Result<Vec<CriterionNode>> {
  let mut out = Vec::new();
  let mut problems = Vec::new();

  for section in sections {
    let mut flat: Vec<(CriterionDocument, Option<SourceId>)> = Vec::new();
    flatten(section.criteria, None, &mut flat);

    let mut ids: HashMap<SourceId, Uuid> = HashMap::new();
    for (doc, _) in &flat {
      if ids.insert(doc.id.clone(), Uuid::new_v4()).is_some() {
        problems.push(Problem::Input {
          message: format!(
            "duplicate criterion id {:?} in section {:?}",
            doc.id, section.section
          ),
        });
      }
    }
    if ids.len() != flat.len() {
      continue;
    }

    for (doc, nested_parent) in flat {
      let parent_ref = doc.parent.clone().or(nested_parent);
      let parent_id = match parent_ref {
        None => None,
        Some(p) => match ids.get(&p) {
          Some(id) => Some(*id),
          None => {
            problems.push(Problem::Input {
              message: format!(
                "criterion {:?} in section {:?} names unknown parent {p:?}",
                doc.title, section.section
              ),
            });
            None
          }
        },
      };
      out.push(CriterionNode {
        criterion_id: ids[&doc.id],
        parent_id,
        children: Vec::new(),
        title: doc.title,
        description: doc.description,
        section: Some(section.section.clone()),
        maturity: doc.maturity_definitions,
        audit_id: None,
        created_at: now,
      });
    }
  }

  if problems.is_empty() {
    Ok(out)
  } else {
    Err(Error::Validation(Problems(problems)))
  }
}

fn flatten(
  docs: Vec<CriterionDocument>,
  parent: Option<SourceId>,
  out: &mut Vec<(CriterionDocument, Option<SourceId>)>,
) {
  for mut doc in docs {
    let nested = std::mem::take(&mut doc.children);
    let id = doc.id.clone();
    out.push((doc, parent.clone()));
    flatten(nested, Some(id), out);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn defs() -> MaturityDefinitions {
    MaturityDefinitions {
      novice:       "ad hoc".into(),
      intermediate: "repeatable".into(),
      advanced:     "optimised".into(),
    }
  }

  fn node(id: Uuid, parent: Option<Uuid>, title: &str) -> CriterionNode {
    CriterionNode {
      criterion_id: id,
      parent_id: parent,
      children: Vec::new(),
      title: title.into(),
      description: String::new(),
      section: None,
      maturity: defs(),
      audit_id: None,
      created_at: Utc::now(),
    }
  }

  /// Platform → {Scalability, Observability → Tracing}
  fn sample() -> (Taxonomy, [Uuid; 4]) {
    let ids = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
    let tax = Taxonomy::new([
      node(ids[0], None, "Platform"),
      node(ids[1], Some(ids[0]), "Infrastructure Scalability"),
      node(ids[2], Some(ids[0]), "Observability"),
      node(ids[3], Some(ids[2]), "Tracing"),
    ]);
    (tax, ids)
  }

  #[test]
  fn children_follow_insertion_order_without_explicit_list() {
    let (tax, ids) = sample();
    let titles: Vec<&str> = tax
      .children(ids[0])
      .unwrap()
      .iter()
      .map(|n| n.title.as_str())
      .collect();
    assert_eq!(titles, ["Infrastructure Scalability", "Observability"]);
  }

  #[test]
  fn declared_child_order_is_respected_and_stale_entries_dropped() {
    let (p, a, b) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let mut parent = node(p, None, "P");
    parent.children = vec![b, Uuid::new_v4(), a];
    let tax = Taxonomy::new([parent, node(a, Some(p), "A"), node(b, Some(p), "B")]);
    assert_eq!(tax.get_node(p).unwrap().children, vec![b, a]);
  }

  #[test]
  fn ancestors_run_from_root_to_node() {
    let (tax, ids) = sample();
    let path: Vec<Uuid> = tax
      .ancestors(ids[3])
      .unwrap()
      .iter()
      .map(|n| n.criterion_id)
      .collect();
    assert_eq!(path, vec![ids[0], ids[2], ids[3]]);
  }

  #[test]
  fn preorder_is_parent_first_then_declaration_order() {
    let (tax, ids) = sample();
    assert_eq!(tax.preorder(), vec![ids[0], ids[1], ids[2], ids[3]]);
  }

  #[test]
  fn get_node_unknown_is_not_found() {
    let (tax, _) = sample();
    assert!(matches!(
      tax.get_node(Uuid::new_v4()),
      Err(Error::NotFound { kind: "criterion", .. })
    ));
  }

  #[test]
  fn valid_tree_passes() {
    let (tax, _) = sample();
    tax.validate().unwrap();
  }

  #[test]
  fn validate_reports_cycle() {
    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let tax = Taxonomy::new([
      node(a, Some(b), "A"),
      node(b, Some(a), "B"),
      node(c, None, "C"),
    ]);
    let Err(Error::Validation(Problems(problems))) = tax.validate() else {
      panic!("expected validation error");
    };
    assert_eq!(problems.len(), 1);
    let Problem::Cycle { nodes } = &problems[0] else {
      panic!("expected cycle, got {:?}", problems[0]);
    };
    assert_eq!(nodes.len(), 2);
    assert!(nodes.contains(&a) && nodes.contains(&b));
  }

  #[test]
  fn validate_reports_self_parent_as_cycle() {
    let a = Uuid::new_v4();
    let tax = Taxonomy::new([node(a, Some(a), "Loop")]);
    let Err(Error::Validation(Problems(problems))) = tax.validate() else {
      panic!("expected validation error");
    };
    assert_eq!(problems, vec![Problem::Cycle { nodes: vec![a] }]);
  }

  #[test]
  fn validate_reports_every_missing_text() {
    let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
    let mut first = node(a, None, "A");
    first.maturity.advanced.clear();
    let mut second = node(b, Some(a), "B");
    second.maturity.novice = " ".into();
    let tax = Taxonomy::new([first, second]);

    let Err(Error::Validation(Problems(problems))) = tax.validate() else {
      panic!("expected validation error");
    };
    assert_eq!(problems.len(), 2);
    assert!(problems.iter().all(|p| matches!(p, Problem::MissingMaturityText { .. })));
  }

  #[test]
  fn clone_subtree_leaves_base_untouched() {
    let (tax, ids) = sample();
    let audit = Uuid::new_v4();
    let copy = tax.clone_subtree(ids[2], audit, Utc::now()).unwrap();

    assert_eq!(copy.len(), 2);
    assert!(copy.iter().all(|n| n.audit_id == Some(audit)));
    assert!(copy.iter().all(|n| !tax.contains(n.criterion_id)));
    // The copied root hangs under the original parent; the copied child
    // hangs under the copied root.
    assert_eq!(copy[0].parent_id, Some(ids[0]));
    assert_eq!(copy[1].parent_id, Some(copy[0].criterion_id));
    assert_eq!(copy[0].children, vec![copy[1].criterion_id]);

    let combined = Taxonomy::new(tax.nodes().cloned().chain(copy.clone()));
    combined.validate().unwrap();
    assert_eq!(combined.children(ids[0]).unwrap().len(), 3);
    assert_eq!(tax.children(ids[0]).unwrap().len(), 2);
  }

  #[test]
  fn sections_resolve_parents_within_section() {
    let json = serde_json::json!([
      {
        "section": "Technology",
        "criteria": [
          { "id": 1, "title": "Platform", "maturity_definitions": {
              "novice": "n", "intermediate": "i", "advanced": "a" } },
          { "id": 2, "parent": 1, "title": "Scalability", "maturity_definitions": {
              "novice": "n", "intermediate": "i", "advanced": "a" } }
        ]
      },
      {
        "section": "Product",
        "criteria": [
          { "id": 1, "title": "Discovery", "maturity_definitions": {
              "novice": "n", "intermediate": "i", "advanced": "a" },
            "children": [
              { "id": "1a", "title": "Research", "maturity_definitions": {
                  "novice": "n", "intermediate": "i", "advanced": "a" } }
            ] }
        ]
      }
    ]);
    let sections: Vec<SectionDocument> = serde_json::from_value(json).unwrap();
    let nodes = nodes_from_sections(sections, Utc::now()).unwrap();
    assert_eq!(nodes.len(), 4);

    let tax = Taxonomy::new(nodes);
    tax.validate().unwrap();
    let roots: Vec<&str> = tax.roots().map(|n| n.title.as_str()).collect();
    assert_eq!(roots, ["Platform", "Discovery"]);
    let discovery = tax.roots().nth(1).unwrap();
    assert_eq!(tax.children(discovery.criterion_id).unwrap()[0].title, "Research");
    assert_eq!(discovery.section.as_deref(), Some("Product"));
  }

  #[test]
  fn sections_reject_unknown_parent() {
    let json = serde_json::json!([
      { "section": "S", "criteria": [ { "id": 1, "parent": 9, "title": "Orphan" } ] }
    ]);
    let sections: Vec<SectionDocument> = serde_json::from_value(json).unwrap();
    assert!(matches!(
      nodes_from_sections(sections, Utc::now()),
      Err(Error::Validation(_))
    ));
  }
}
