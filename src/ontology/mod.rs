//! The ontology graph: an arena of terms linked by `is_a` edges.
//!
//! Terms are stored in a `Vec` and referenced by [`TermIdx`]; parents are kept as index lists
//! so that multiple inheritance needs no shared ownership. Alternate and obsolete identifiers
//! are mapped onto canonical terms when the graph is built and never change afterwards.

pub mod obo;

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use once_cell::sync::OnceCell;

use crate::Error;

/// Index of a canonical term in an [`OntologyGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TermIdx(u32);

impl TermIdx {
    /// Return the index as `usize` for slice access.
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Raw term record as produced by an ontology loader.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TermRecord {
    /// The term identifier, e.g., `HP:0000118`.
    pub id: String,
    /// Identifiers of the direct `is_a` parents.
    pub parent_ids: Vec<String>,
    /// Alternate identifiers that resolve to this term.
    pub alt_ids: Vec<String>,
    /// Whether the term is obsolete.
    pub is_obsolete: bool,
    /// Replacement of an obsolete term, if any.
    pub replaced_by: Option<String>,
}

impl TermRecord {
    /// Construct a canonical term record with the given parents.
    pub fn new(id: &str, parent_ids: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            parent_ids: parent_ids.iter().map(|p| (*p).to_string()).collect(),
            ..Default::default()
        }
    }
}

/// Canonical term in the arena.
#[derive(Debug)]
struct Term {
    /// Canonical identifier.
    id: String,
    /// Direct parents.
    parents: Vec<TermIdx>,
    /// Memoized, sorted, reflexive ancestor closure.
    ancestors: OnceCell<Box<[TermIdx]>>,
}

/// Directed acyclic graph of ontology terms.
#[derive(Debug, Default)]
pub struct OntologyGraph {
    /// Arena of canonical terms.
    terms: Vec<Term>,
    /// Canonical identifier to index.
    by_id: HashMap<String, TermIdx>,
    /// Alternate (and replaced obsolete) identifier to index.
    alt_ids: HashMap<String, TermIdx>,
    /// Obsolete identifiers without a usable replacement.
    obsolete: HashSet<String>,
}

impl OntologyGraph {
    /// Build the graph from raw term records.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GraphIntegrity`] if a parent reference does not resolve, a canonical or
    /// alternate identifier is defined twice, or the parent relation contains a cycle.
    pub fn from_records(records: &[TermRecord]) -> Result<Self, Error> {
        let mut graph = Self::default();

        // Register canonical terms first so that references can be resolved in any order.
        for record in records.iter().filter(|r| !r.is_obsolete) {
            let idx = TermIdx(u32::try_from(graph.terms.len()).map_err(|_| {
                Error::GraphIntegrity(String::from("too many terms for 32 bit index"))
            })?);
            if graph.by_id.insert(record.id.clone(), idx).is_some() {
                return Err(Error::GraphIntegrity(format!(
                    "duplicate term id {}",
                    record.id
                )));
            }
            graph.terms.push(Term {
                id: record.id.clone(),
                parents: Vec::new(),
                ancestors: OnceCell::new(),
            });
        }

        for record in records.iter().filter(|r| !r.is_obsolete) {
            let idx = graph.by_id[&record.id];
            for alt_id in &record.alt_ids {
                graph.register_alt_id(alt_id, idx)?;
            }
        }

        // Obsolete terms are mapped onto their replacement if that one is known.
        for record in records.iter().filter(|r| r.is_obsolete) {
            if graph.by_id.contains_key(&record.id) {
                tracing::warn!(
                    "obsolete term {} shadows canonical term, ignoring",
                    record.id
                );
                continue;
            }
            let target = record
                .replaced_by
                .as_ref()
                .and_then(|replacement| graph.lookup(replacement));
            for id in std::iter::once(&record.id).chain(record.alt_ids.iter()) {
                if let Some(target) = target {
                    graph.register_alt_id(id, target)?;
                } else {
                    if let Some(replacement) = record.replaced_by.as_ref() {
                        tracing::warn!(
                            "obsolete term {} replaced by unknown term {}",
                            id,
                            replacement
                        );
                    }
                    graph.obsolete.insert(id.clone());
                }
            }
        }

        for record in records.iter().filter(|r| !r.is_obsolete) {
            let idx = graph.by_id[&record.id];
            let mut parents = record
                .parent_ids
                .iter()
                .map(|parent_id| {
                    graph.lookup(parent_id).ok_or_else(|| {
                        Error::GraphIntegrity(format!(
                            "term {} references unknown parent {}",
                            record.id, parent_id
                        ))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            parents.sort_unstable();
            parents.dedup();
            graph.terms[idx.as_usize()].parents = parents;
        }

        graph.check_acyclic()?;

        tracing::debug!(
            "built ontology graph with {} terms, {} alternate ids, {} obsolete ids",
            graph.terms.len(),
            graph.alt_ids.len(),
            graph.obsolete.len()
        );

        Ok(graph)
    }

    /// Map `alt_id` to `idx`, rejecting conflicting definitions.
    fn register_alt_id(&mut self, alt_id: &str, idx: TermIdx) -> Result<(), Error> {
        if self.by_id.contains_key(alt_id) {
            return Err(Error::GraphIntegrity(format!(
                "alternate id {alt_id} is also a canonical term id"
            )));
        }
        match self.alt_ids.insert(alt_id.to_string(), idx) {
            Some(previous) if previous != idx => Err(Error::GraphIntegrity(format!(
                "alternate id {} claimed by both {} and {}",
                alt_id,
                self.id(previous),
                self.id(idx)
            ))),
            _ => Ok(()),
        }
    }

    /// Kahn's algorithm over child → parent edges.
    fn check_acyclic(&self) -> Result<(), Error> {
        let mut pending_children = vec![0_usize; self.terms.len()];
        for term in &self.terms {
            for parent in &term.parents {
                pending_children[parent.as_usize()] += 1;
            }
        }
        let mut queue = pending_children
            .iter()
            .enumerate()
            .filter(|(_, count)| **count == 0)
            .map(|(i, _)| i)
            .collect::<VecDeque<_>>();
        let mut visited = 0;
        while let Some(i) = queue.pop_front() {
            visited += 1;
            for parent in &self.terms[i].parents {
                let count = &mut pending_children[parent.as_usize()];
                *count -= 1;
                if *count == 0 {
                    queue.push_back(parent.as_usize());
                }
            }
        }

        if visited == self.terms.len() {
            Ok(())
        } else {
            let on_cycle = pending_children
                .iter()
                .position(|count| *count > 0)
                .map(|i| self.terms[i].id.clone())
                .unwrap_or_default();
            Err(Error::GraphIntegrity(format!(
                "parent relation contains a cycle involving {on_cycle}"
            )))
        }
    }

    /// Look up canonical or alternate identifier.
    fn lookup(&self, id: &str) -> Option<TermIdx> {
        self.by_id.get(id).or_else(|| self.alt_ids.get(id)).copied()
    }

    /// Resolve an identifier to its canonical term.
    ///
    /// # Errors
    ///
    /// [`Error::ObsoleteTerm`] for obsolete identifiers without replacement and
    /// [`Error::UnknownTerm`] for identifiers not known at all.
    pub fn resolve(&self, id: &str) -> Result<TermIdx, Error> {
        match self.lookup(id) {
            Some(idx) => Ok(idx),
            None if self.obsolete.contains(id) => Err(Error::ObsoleteTerm(id.to_string())),
            None => Err(Error::UnknownTerm(id.to_string())),
        }
    }

    /// Canonical identifier of the term.
    pub fn id(&self, idx: TermIdx) -> &str {
        &self.terms[idx.as_usize()].id
    }

    /// Direct parents of the term.
    pub fn parents(&self, idx: TermIdx) -> &[TermIdx] {
        &self.terms[idx.as_usize()].parents
    }

    /// Number of canonical terms.
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// Whether the graph has no terms.
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Iterate over all term indices.
    #[allow(clippy::cast_possible_truncation)]
    pub fn term_indices(&self) -> impl Iterator<Item = TermIdx> {
        (0..self.terms.len()).map(|i| TermIdx(i as u32))
    }

    /// Terms without parents.
    pub fn roots(&self) -> Vec<TermIdx> {
        self.term_indices()
            .filter(|idx| self.parents(*idx).is_empty())
            .collect()
    }

    /// Sorted ancestor closure of the term, including the term itself.
    ///
    /// Computed on first access and memoized since the graph does not change after
    /// construction.
    pub fn ancestors(&self, idx: TermIdx) -> &[TermIdx] {
        let term = &self.terms[idx.as_usize()];
        term.ancestors.get_or_init(|| {
            let mut result = vec![idx];
            for parent in &term.parents {
                result.extend_from_slice(self.ancestors(*parent));
            }
            result.sort_unstable();
            result.dedup();
            result.into_boxed_slice()
        })
    }

    /// Canonical identifiers of all ancestors of `id`, including its own canonical term.
    ///
    /// # Errors
    ///
    /// If `id` cannot be resolved.
    pub fn ancestor_ids(&self, id: &str) -> Result<BTreeSet<&str>, Error> {
        let idx = self.resolve(id)?;
        Ok(self
            .ancestors(idx)
            .iter()
            .map(|ancestor| self.id(*ancestor))
            .collect())
    }

    /// Terms that are ancestors of every term in `terms`; empty if `terms` is empty.
    pub fn common_ancestors(&self, terms: &[TermIdx]) -> Vec<TermIdx> {
        let Some((first, rest)) = terms.split_first() else {
            return Vec::new();
        };
        let mut result = self.ancestors(*first).to_vec();
        for term in rest {
            let ancestors = self.ancestors(*term);
            result.retain(|candidate| ancestors.binary_search(candidate).is_ok());
        }
        result
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::{OntologyGraph, TermRecord};
    use crate::Error;

    /// Toy ontology used throughout the tests.
    ///
    /// ```text
    /// R ─┬─ A ─┬─ B
    ///    │     └─ D
    ///    └─ C ──── D
    /// ```
    ///
    /// `X:alt` is an alternate id of `B`, obsolete `X:old` is replaced by `C`, and obsolete
    /// `X:gone` has no replacement.
    pub fn toy_records() -> Vec<TermRecord> {
        vec![
            TermRecord::new("X:R", &[]),
            TermRecord::new("X:A", &["X:R"]),
            TermRecord {
                alt_ids: vec![String::from("X:alt")],
                ..TermRecord::new("X:B", &["X:A"])
            },
            TermRecord::new("X:C", &["X:R"]),
            TermRecord::new("X:D", &["X:A", "X:C"]),
            TermRecord {
                id: String::from("X:old"),
                is_obsolete: true,
                replaced_by: Some(String::from("X:C")),
                ..Default::default()
            },
            TermRecord {
                id: String::from("X:gone"),
                is_obsolete: true,
                ..Default::default()
            },
        ]
    }

    #[rstest::fixture]
    pub fn toy_graph() -> OntologyGraph {
        OntologyGraph::from_records(&toy_records()).expect("toy ontology is valid")
    }

    fn ids(graph: &OntologyGraph, terms: &[super::TermIdx]) -> Vec<String> {
        terms.iter().map(|t| graph.id(*t).to_string()).collect()
    }

    #[rstest::rstest]
    fn resolve_kinds(toy_graph: OntologyGraph) -> Result<(), anyhow::Error> {
        let b = toy_graph.resolve("X:B")?;
        assert_eq!(toy_graph.resolve("X:alt")?, b);
        assert_eq!(toy_graph.resolve("X:old")?, toy_graph.resolve("X:C")?);
        assert_eq!(
            toy_graph.resolve("X:gone"),
            Err(Error::ObsoleteTerm(String::from("X:gone")))
        );
        assert_eq!(
            toy_graph.resolve("X:nope"),
            Err(Error::UnknownTerm(String::from("X:nope")))
        );
        assert_eq!(toy_graph.len(), 5);
        assert_eq!(ids(&toy_graph, &toy_graph.roots()), vec!["X:R"]);

        Ok(())
    }

    #[rstest::rstest]
    fn ancestors_reflexive_and_monotonic(toy_graph: OntologyGraph) {
        for term in toy_graph.term_indices() {
            let ancestors = toy_graph.ancestors(term);
            assert!(ancestors.contains(&term));
            for parent in toy_graph.parents(term) {
                let parent_ancestors = toy_graph.ancestors(*parent);
                assert!(parent_ancestors.iter().all(|a| ancestors.contains(a)));
            }
        }
    }

    #[rstest::rstest]
    fn ancestors_multiple_parents(toy_graph: OntologyGraph) -> Result<(), anyhow::Error> {
        let d = toy_graph.resolve("X:D")?;
        let ancestors = ids(&toy_graph, toy_graph.ancestors(d)).join(",");
        insta::assert_snapshot!(ancestors, @"X:R,X:A,X:C,X:D");

        Ok(())
    }

    #[rstest::rstest]
    fn alternate_id_has_same_ancestors(toy_graph: OntologyGraph) -> Result<(), anyhow::Error> {
        assert_eq!(
            toy_graph.ancestor_ids("X:alt")?,
            toy_graph.ancestor_ids("X:B")?
        );
        assert_eq!(
            toy_graph
                .ancestor_ids("X:B")?
                .into_iter()
                .collect::<Vec<_>>(),
            vec!["X:A", "X:B", "X:R"]
        );

        Ok(())
    }

    #[rstest::rstest]
    fn common_ancestors(toy_graph: OntologyGraph) -> Result<(), anyhow::Error> {
        let b = toy_graph.resolve("X:B")?;
        let c = toy_graph.resolve("X:C")?;
        let d = toy_graph.resolve("X:D")?;

        assert!(toy_graph.common_ancestors(&[]).is_empty());
        assert_eq!(
            ids(&toy_graph, &toy_graph.common_ancestors(&[b, d])),
            vec!["X:R", "X:A"]
        );
        assert_eq!(
            ids(&toy_graph, &toy_graph.common_ancestors(&[c, d])),
            vec!["X:R", "X:C"]
        );
        assert_eq!(
            ids(&toy_graph, &toy_graph.common_ancestors(&[b, c, d])),
            vec!["X:R"]
        );

        Ok(())
    }

    #[test]
    fn unknown_parent_is_integrity_error() {
        let records = vec![
            TermRecord::new("X:R", &[]),
            TermRecord::new("X:A", &["X:missing"]),
        ];
        assert!(matches!(
            OntologyGraph::from_records(&records),
            Err(Error::GraphIntegrity(_))
        ));
    }

    #[test]
    fn cycle_is_integrity_error() {
        let records = vec![
            TermRecord::new("X:R", &[]),
            TermRecord::new("X:A", &["X:R", "X:B"]),
            TermRecord::new("X:B", &["X:A"]),
        ];
        assert!(matches!(
            OntologyGraph::from_records(&records),
            Err(Error::GraphIntegrity(msg)) if msg.contains("cycle")
        ));
    }

    #[test]
    fn conflicting_alt_id_is_integrity_error() {
        let records = vec![
            TermRecord::new("X:R", &[]),
            TermRecord {
                alt_ids: vec![String::from("X:R")],
                ..TermRecord::new("X:A", &["X:R"])
            },
        ];
        assert!(matches!(
            OntologyGraph::from_records(&records),
            Err(Error::GraphIntegrity(_))
        ));
    }

    #[test]
    fn parent_via_alternate_id() -> Result<(), anyhow::Error> {
        let records = vec![
            TermRecord {
                alt_ids: vec![String::from("X:root-alt")],
                ..TermRecord::new("X:R", &[])
            },
            TermRecord::new("X:A", &["X:root-alt"]),
        ];
        let graph = OntologyGraph::from_records(&records)?;
        let a = graph.resolve("X:A")?;
        assert_eq!(ids(&graph, graph.parents(a)), vec!["X:R"]);

        Ok(())
    }
}
