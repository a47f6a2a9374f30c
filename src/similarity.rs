//! Cohort-based information content and Resnik-style similarity of terms, term sets, and
//! proband groups.

use crate::cohort::Cohort;
use crate::common::SetCombiner;
use crate::ontology::{OntologyGraph, TermIdx};

/// Information content of every term, derived from term usage in a cohort.
///
/// A proband uses a term if the term is an ancestor of (or equal to) one of its annotated
/// terms. The information content of a term is `-ln(usage / probands)` where usage is
/// floored at one.
#[derive(Debug, Clone, Default)]
pub struct InformationContent {
    /// Number of probands using each term, indexed by `TermIdx`.
    usage: Vec<usize>,
    /// Information content of each term, indexed by `TermIdx`.
    values: Vec<f64>,
    /// Number of probands in the cohort.
    num_probands: usize,
}

/// Information content for `usage` out of `total` probands.
#[allow(clippy::cast_precision_loss)]
fn ic_from_usage(usage: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let usage = usage.clamp(1, total) as f64;
    (-(usage / total as f64).ln()).max(0.0)
}

impl InformationContent {
    /// Count term usage over `cohort` and derive the information content of all terms.
    pub fn from_cohort(graph: &OntologyGraph, cohort: &Cohort) -> Self {
        let mut usage = vec![0_usize; graph.len()];
        let mut used = Vec::new();
        for proband in cohort.probands() {
            used.clear();
            for term in &proband.terms {
                used.extend_from_slice(graph.ancestors(*term));
            }
            used.sort_unstable();
            used.dedup();
            for term in &used {
                usage[term.as_usize()] += 1;
            }
        }

        let values = usage
            .iter()
            .map(|count| ic_from_usage(*count, cohort.len()))
            .collect();

        Self {
            usage,
            values,
            num_probands: cohort.len(),
        }
    }

    /// Information content of `term`.
    pub fn get(&self, term: TermIdx) -> f64 {
        self.values[term.as_usize()]
    }

    /// Number of probands using `term`.
    pub fn usage(&self, term: TermIdx) -> usize {
        self.usage[term.as_usize()]
    }

    /// Number of probands the model was computed from.
    pub fn num_probands(&self) -> usize {
        self.num_probands
    }
}

/// Immutable run-wide state needed for similarity computation.
#[derive(Debug, Clone, Copy)]
pub struct Context<'a> {
    /// The ontology.
    pub graph: &'a OntologyGraph,
    /// Information content from the full cohort.
    pub ic: &'a InformationContent,
    /// Aggregation of pairwise term similarities.
    pub combiner: SetCombiner,
}

impl<'a> Context<'a> {
    /// Construct a new context.
    pub fn new(
        graph: &'a OntologyGraph,
        ic: &'a InformationContent,
        combiner: SetCombiner,
    ) -> Self {
        Self {
            graph,
            ic,
            combiner,
        }
    }

    /// The most informative common ancestor of `a` and `b` with its information content.
    ///
    /// On ties the ancestor with the smallest index wins.
    pub fn mica(&self, a: TermIdx, b: TermIdx) -> Option<(TermIdx, f64)> {
        let lhs = self.graph.ancestors(a);
        let rhs = self.graph.ancestors(b);

        // Both closures are sorted, so a merge walk yields the common ancestors.
        let mut best: Option<(TermIdx, f64)> = None;
        let (mut i, mut j) = (0, 0);
        while i < lhs.len() && j < rhs.len() {
            match lhs[i].cmp(&rhs[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    let ic = self.ic.get(lhs[i]);
                    if best.is_none_or(|(_, best_ic)| ic > best_ic) {
                        best = Some((lhs[i], ic));
                    }
                    i += 1;
                    j += 1;
                }
            }
        }
        best
    }

    /// Resnik similarity, the information content of the MICA; zero without common ancestor.
    pub fn term_similarity(&self, a: TermIdx, b: TermIdx) -> f64 {
        self.mica(a, b).map_or(0.0, |(_, ic)| ic)
    }

    /// Similarity of two term sets using the configured combiner.
    ///
    /// Returns zero if either set is empty.
    #[allow(clippy::cast_precision_loss)]
    pub fn set_similarity(&self, lhs: &[TermIdx], rhs: &[TermIdx]) -> f64 {
        if lhs.is_empty() || rhs.is_empty() {
            return 0.0;
        }

        let scores = lhs
            .iter()
            .map(|a| {
                rhs.iter()
                    .map(|b| self.term_similarity(*a, *b))
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();
        let row_max = scores
            .iter()
            .map(|row| row.iter().copied().fold(0.0, f64::max))
            .collect::<Vec<_>>();
        let col_max = (0..rhs.len())
            .map(|j| scores.iter().map(|row| row[j]).fold(0.0, f64::max))
            .collect::<Vec<_>>();

        let mean = |xs: &[f64]| xs.iter().sum::<f64>() / xs.len() as f64;
        match self.combiner {
            SetCombiner::FunSimAvg => f64::midpoint(mean(&row_max), mean(&col_max)),
            SetCombiner::FunSimMax => mean(&row_max).max(mean(&col_max)),
            SetCombiner::Bma => {
                (row_max.iter().sum::<f64>() + col_max.iter().sum::<f64>())
                    / (lhs.len() + rhs.len()) as f64
            }
            SetCombiner::Max => row_max.iter().copied().fold(0.0, f64::max),
            SetCombiner::Mean => {
                scores.iter().flatten().sum::<f64>() / (lhs.len() * rhs.len()) as f64
            }
        }
    }

    /// Mean pairwise set similarity within a group of probands.
    ///
    /// Returns `None` for fewer than two probands where the statistic is undefined.
    #[allow(clippy::cast_precision_loss)]
    pub fn group_similarity(&self, group: &[&[TermIdx]]) -> Option<f64> {
        if group.len() < 2 {
            return None;
        }
        let mut sum = 0.0;
        let mut pairs = 0_usize;
        for (i, lhs) in group.iter().enumerate() {
            for rhs in &group[i + 1..] {
                sum += self.set_similarity(lhs, rhs);
                pairs += 1;
            }
        }
        Some(sum / pairs as f64)
    }
}
