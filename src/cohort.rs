//! Proband phenotypes, gene membership, and their loaders.

use std::collections::HashMap;
use std::path::Path;

use indexmap::IndexMap;

use crate::ontology::{OntologyGraph, TermIdx};

/// Raw term identifiers per proband, in input order.
pub type RawPhenotypes = IndexMap<String, Vec<String>>;

/// Proband identifiers per gene, in input order.
pub type GeneMembership = IndexMap<String, Vec<String>>;

/// A proband with its resolved, canonical terms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proband {
    /// The proband identifier.
    pub id: String,
    /// Sorted and deduplicated canonical terms.
    pub terms: Vec<TermIdx>,
}

/// All probands with at least one resolved term.
#[derive(Debug, Clone, Default)]
pub struct Cohort {
    /// The probands in input order.
    probands: Vec<Proband>,
    /// Proband identifier to position in `probands`.
    by_id: HashMap<String, usize>,
}

impl Cohort {
    /// Construct from already resolved probands; later duplicates of an id are ignored.
    pub fn from_probands(probands: Vec<Proband>) -> Self {
        let mut result = Self::default();
        for mut proband in probands {
            if result.by_id.contains_key(&proband.id) {
                tracing::warn!("duplicate proband {}, keeping first record", proband.id);
                continue;
            }
            proband.terms.sort_unstable();
            proband.terms.dedup();
            result
                .by_id
                .insert(proband.id.clone(), result.probands.len());
            result.probands.push(proband);
        }
        result
    }

    /// Resolve raw term identifiers against `graph`.
    ///
    /// Terms that cannot be resolved are dropped with a warning, and so are probands left
    /// without any term.
    pub fn resolve(graph: &OntologyGraph, raw: &RawPhenotypes) -> Self {
        let mut dropped_terms = 0;
        let mut dropped_probands = 0;
        let mut probands = Vec::with_capacity(raw.len());
        for (proband_id, term_ids) in raw {
            let terms = term_ids
                .iter()
                .filter_map(|term_id| match graph.resolve(term_id) {
                    Ok(idx) => Some(idx),
                    Err(e) => {
                        tracing::warn!("proband {}: dropping {}", proband_id, e);
                        dropped_terms += 1;
                        None
                    }
                })
                .collect::<Vec<_>>();
            if terms.is_empty() {
                tracing::warn!("proband {} has no usable terms, dropping", proband_id);
                dropped_probands += 1;
            } else {
                probands.push(Proband {
                    id: proband_id.clone(),
                    terms,
                });
            }
        }

        let cohort = Self::from_probands(probands);
        tracing::info!(
            "  resolved {} probands ({} dropped, {} terms dropped)",
            cohort.len(),
            dropped_probands,
            dropped_terms
        );
        cohort
    }

    /// Number of probands.
    pub fn len(&self) -> usize {
        self.probands.len()
    }

    /// Whether there are no probands.
    pub fn is_empty(&self) -> bool {
        self.probands.is_empty()
    }

    /// All probands in input order.
    pub fn probands(&self) -> &[Proband] {
        &self.probands
    }

    /// Proband at position `idx`.
    pub fn get(&self, idx: usize) -> &Proband {
        &self.probands[idx]
    }

    /// Position of the proband with identifier `id`.
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.by_id.get(id).copied()
    }
}

/// Load the phenotypes JSON, `{"proband": ["HP:..", ...], ...}`.
///
/// # Errors
///
/// If the file cannot be read or is malformed.
pub fn load_phenotypes<P: AsRef<Path>>(path: P) -> Result<RawPhenotypes, anyhow::Error> {
    let reader = crate::common::open_read_maybe_gz(path.as_ref())?;
    serde_json::from_reader(reader).map_err(|e| {
        anyhow::anyhow!(
            "could not parse phenotypes from {}: {}",
            path.as_ref().display(),
            e
        )
    })
}

/// Load the genes JSON, `{"GENE": ["proband", ...], ...}`.
///
/// # Errors
///
/// If the file cannot be read or is malformed.
pub fn load_genes<P: AsRef<Path>>(path: P) -> Result<GeneMembership, anyhow::Error> {
    let reader = crate::common::open_read_maybe_gz(path.as_ref())?;
    serde_json::from_reader(reader).map_err(|e| {
        anyhow::anyhow!(
            "could not parse gene membership from {}: {}",
            path.as_ref().display(),
            e
        )
    })
}

/// Randomly reassign probands to genes, keeping the number of probands per gene.
///
/// All memberships are pooled, shuffled, and dealt back out in gene order. The input is
/// left untouched.
pub fn permute_probands(genes: &GeneMembership, rng: &mut fastrand::Rng) -> GeneMembership {
    let mut pool = genes.values().flatten().cloned().collect::<Vec<_>>();
    rng.shuffle(&mut pool);

    let mut pool = pool.into_iter();
    genes
        .iter()
        .map(|(gene, probands)| (gene.clone(), pool.by_ref().take(probands.len()).collect()))
        .collect()
}
