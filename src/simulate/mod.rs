//! Empirical null distributions of the gene-level statistic.
//!
//! For a group size `k`, random groups of `k` probands are drawn from the whole cohort and
//! their mean pairwise similarity is recorded. Distributions depend only on `k` and are cached
//! for the lifetime of the engine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use indicatif::ParallelProgressIterator;
use once_cell::sync::OnceCell;
use rayon::prelude::*;

use crate::cohort::Cohort;
use crate::similarity::Context;
use crate::Error;

/// Default number of random groups per group size.
pub const DEFAULT_ITERATIONS: u64 = 100_000;

/// Default number of iterations between two checks of the stop flag.
pub const DEFAULT_BATCH_SIZE: u64 = 1_000;

/// Relative tolerance below which a null value counts as equal to the observed one.
const TIE_TOLERANCE: f64 = 1e-12;

/// Sorted null distribution of the gene-level statistic for one group size.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct NullDistribution {
    /// Number of probands per random group.
    pub group_size: usize,
    /// Simulated statistics, ascending.
    pub scores: Vec<f64>,
}

impl NullDistribution {
    /// Construct from unsorted scores.
    pub fn new(group_size: usize, mut scores: Vec<f64>) -> Self {
        scores.sort_by(f64::total_cmp);
        Self { group_size, scores }
    }

    /// Number of simulated values.
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// Whether no values were simulated.
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Empirical P-value `(#{x >= observed} + 1) / (N + 1)`.
    ///
    /// Always in `(0, 1]`; an empty distribution yields `1.0`.
    #[allow(clippy::cast_precision_loss)]
    pub fn p_value(&self, observed: f64) -> f64 {
        let threshold = observed - TIE_TOLERANCE * observed.abs().max(1.0);
        let below = self.scores.partition_point(|x| *x < threshold);
        let at_least = self.scores.len() - below;
        (at_least + 1) as f64 / (self.scores.len() + 1) as f64
    }
}

/// Settings of the permutation engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Settings {
    /// Number of random groups per group size.
    pub iterations: u64,
    /// Number of iterations between two checks of the stop flag.
    pub batch_size: u64,
    /// Base seed; iteration `i` for group size `k` always draws the same group.
    pub seed: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            batch_size: DEFAULT_BATCH_SIZE,
            seed: 42,
        }
    }
}

/// Cache slot for one group size.
type Slot = Arc<OnceCell<Arc<NullDistribution>>>;

/// Builds and caches null distributions by group size.
pub struct PermutationEngine<'a> {
    /// Similarity context.
    ctx: Context<'a>,
    /// The full cohort that groups are drawn from.
    cohort: &'a Cohort,
    /// Engine settings.
    settings: Settings,
    /// Null distributions by group size.
    cache: Mutex<HashMap<usize, Slot>>,
}

/// Draw `k` distinct values from `0..n` into `out` (Floyd's algorithm).
fn sample_group(rng: &mut fastrand::Rng, n: usize, k: usize, out: &mut Vec<usize>) {
    out.clear();
    for j in (n - k)..n {
        let t = rng.usize(0..=j);
        if out.contains(&t) {
            out.push(j);
        } else {
            out.push(t);
        }
    }
}

impl<'a> PermutationEngine<'a> {
    /// Construct a new engine with an empty cache.
    pub fn new(ctx: Context<'a>, cohort: &'a Cohort, settings: Settings) -> Self {
        Self {
            ctx,
            cohort,
            settings,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// The engine settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Cache slot for `group_size`, created on first access.
    fn slot(&self, group_size: usize) -> Slot {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(group_size)
            .or_default()
            .clone()
    }

    /// The null distribution for `group_size` if it was computed already.
    pub fn cached(&self, group_size: usize) -> Option<Arc<NullDistribution>> {
        self.slot(group_size).get().cloned()
    }

    /// Get the null distribution for `group_size`, computing it on first request.
    ///
    /// Concurrent requests for the same size block until the first one is done. Do not
    /// request the same size from several rayon tasks that are not yet warmed via
    /// [`Self::warm`]: a worker waiting on a slot may pick up another task for the same slot.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidGroupSize`] for sizes below two or beyond the cohort, and
    /// [`Error::Cancelled`] if `stop` is raised during computation. A cancelled computation
    /// leaves the cache slot empty.
    pub fn null_distribution(
        &self,
        group_size: usize,
        stop: &AtomicBool,
    ) -> Result<Arc<NullDistribution>, Error> {
        if group_size < 2 || group_size > self.cohort.len() {
            return Err(Error::InvalidGroupSize {
                size: group_size,
                cohort: self.cohort.len(),
            });
        }
        self.slot(group_size)
            .get_or_try_init(|| self.simulate(group_size, stop).map(Arc::new))
            .cloned()
    }

    /// Compute the null distributions of all `group_sizes`, in parallel over distinct sizes.
    ///
    /// # Errors
    ///
    /// See [`Self::null_distribution`].
    pub fn warm(&self, group_sizes: &[usize], stop: &AtomicBool) -> Result<(), Error> {
        let mut group_sizes = group_sizes.to_vec();
        group_sizes.sort_unstable();
        group_sizes.dedup();

        group_sizes
            .par_iter()
            .progress_with(crate::common::progress_bar(group_sizes.len()))
            .try_for_each(|group_size| self.null_distribution(*group_size, stop).map(|_| ()))
    }

    /// Seeded generator for iteration `iteration` of group size `group_size`.
    fn rng(&self, group_size: usize, iteration: u64) -> fastrand::Rng {
        fastrand::Rng::with_seed(
            self.settings
                .seed
                .wrapping_add((group_size as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
                .wrapping_add(iteration),
        )
    }

    /// Run the simulation for one group size.
    fn simulate(&self, group_size: usize, stop: &AtomicBool) -> Result<NullDistribution, Error> {
        tracing::debug!(
            "  simulating {} random groups of {} probands ...",
            self.settings.iterations,
            group_size
        );
        let before = Instant::now();

        let batch_size = std::cmp::max(self.settings.batch_size, 1);
        let batches = (0..self.settings.iterations)
            .step_by(usize::try_from(batch_size).unwrap_or(usize::MAX))
            .map(|start| (start, std::cmp::min(start + batch_size, self.settings.iterations)))
            .collect::<Vec<_>>();

        let scores = batches
            .par_iter()
            .map(|(start, end)| {
                if stop.load(Ordering::Relaxed) {
                    return Err(Error::Cancelled);
                }
                let mut group = Vec::with_capacity(group_size);
                Ok((*start..*end)
                    .map(|iteration| {
                        let mut rng = self.rng(group_size, iteration);
                        sample_group(&mut rng, self.cohort.len(), group_size, &mut group);
                        let sets = group
                            .iter()
                            .map(|idx| self.cohort.get(*idx).terms.as_slice())
                            .collect::<Vec<_>>();
                        self.ctx.group_similarity(&sets).unwrap_or_default()
                    })
                    .collect::<Vec<_>>())
            })
            .collect::<Result<Vec<_>, _>>()?;

        let result = NullDistribution::new(group_size, scores.into_iter().flatten().collect());
        tracing::debug!(
            "  ... done simulating group size {} in {:?}",
            group_size,
            before.elapsed()
        );
        Ok(result)
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    use super::{NullDistribution, PermutationEngine, Settings};
    use crate::common::SetCombiner;
    use crate::ontology::test::toy_graph;
    use crate::ontology::OntologyGraph;
    use crate::similarity::test::toy_cohort;
    use crate::similarity::{Context, InformationContent};
    use crate::Error;

    fn settings(iterations: u64) -> Settings {
        Settings {
            iterations,
            batch_size: 16,
            seed: 7,
        }
    }

    #[rstest::rstest]
    #[case(0.0, 1.0)]
    #[case(0.1, 1.0)]
    #[case(0.5, 0.8)]
    #[case(0.7, 0.4)]
    #[case(0.9, 0.4)]
    #[case(1.0, 0.2)]
    fn p_value_add_one(#[case] observed: f64, #[case] expected: f64) {
        let null = NullDistribution::new(3, vec![0.9, 0.5, 0.1, 0.5]);
        assert_eq!(null.scores, vec![0.1, 0.5, 0.5, 0.9]);
        assert!((null.p_value(observed) - expected).abs() < 1e-12);
    }

    #[test]
    fn p_value_empty_null() {
        let null = NullDistribution::new(2, Vec::new());
        assert!(null.is_empty());
        assert!((null.p_value(123.0) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn sample_group_is_distinct_and_in_range() {
        let mut rng = fastrand::Rng::with_seed(1);
        let mut out = Vec::new();
        for k in 0..=5 {
            super::sample_group(&mut rng, 5, k, &mut out);
            let mut sorted = out.clone();
            sorted.sort_unstable();
            sorted.dedup();
            assert_eq!(sorted.len(), k);
            assert!(out.iter().all(|i| *i < 5));
        }
    }

    #[rstest::rstest]
    fn zero_iterations(toy_graph: OntologyGraph) -> Result<(), anyhow::Error> {
        let cohort = toy_cohort(&toy_graph);
        let ic = InformationContent::from_cohort(&toy_graph, &cohort);
        let ctx = Context::new(&toy_graph, &ic, SetCombiner::default());
        let engine = PermutationEngine::new(ctx, &cohort, settings(0));

        let null = engine.null_distribution(2, &AtomicBool::new(false))?;

        assert!(null.is_empty());
        assert!((null.p_value(0.0) - 1.0).abs() < f64::EPSILON);

        Ok(())
    }

    #[rstest::rstest]
    fn simulation_is_cached_and_reproducible(
        toy_graph: OntologyGraph,
    ) -> Result<(), anyhow::Error> {
        let cohort = toy_cohort(&toy_graph);
        let ic = InformationContent::from_cohort(&toy_graph, &cohort);
        let ctx = Context::new(&toy_graph, &ic, SetCombiner::default());
        let stop = AtomicBool::new(false);
        let engine = PermutationEngine::new(ctx, &cohort, settings(100));

        assert!(engine.cached(3).is_none());
        let first = engine.null_distribution(3, &stop)?;
        let second = engine.null_distribution(3, &stop)?;
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.len(), 100);
        assert!(first.scores.windows(2).all(|w| w[0] <= w[1]));
        assert!(first.scores.iter().all(|s| *s >= 0.0));

        let other = PermutationEngine::new(ctx, &cohort, settings(100));
        assert_eq!(*other.null_distribution(3, &stop)?, *first);

        // Observed statistics of random groups lie within the null distribution.
        let p = first.p_value(first.scores[50]);
        assert!(p > 0.0 && p <= 1.0);

        Ok(())
    }

    #[rstest::rstest]
    fn concurrent_requests_share_result(toy_graph: OntologyGraph) {
        let cohort = toy_cohort(&toy_graph);
        let ic = InformationContent::from_cohort(&toy_graph, &cohort);
        let ctx = Context::new(&toy_graph, &ic, SetCombiner::default());
        let stop = AtomicBool::new(false);
        let engine = PermutationEngine::new(ctx, &cohort, settings(500));

        let results = std::thread::scope(|scope| {
            let handles = (0..4)
                .map(|_| scope.spawn(|| engine.null_distribution(2, &stop)))
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("thread panicked"))
                .collect::<Result<Vec<_>, _>>()
        })
        .expect("simulation failed");

        assert!(results.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }

    #[rstest::rstest]
    fn invalid_group_size(toy_graph: OntologyGraph) {
        let cohort = toy_cohort(&toy_graph);
        let ic = InformationContent::from_cohort(&toy_graph, &cohort);
        let ctx = Context::new(&toy_graph, &ic, SetCombiner::default());
        let engine = PermutationEngine::new(ctx, &cohort, settings(10));
        let stop = AtomicBool::new(false);

        for size in [0, 1, 5] {
            assert_eq!(
                engine.null_distribution(size, &stop),
                Err(Error::InvalidGroupSize { size, cohort: 4 })
            );
        }
    }

    #[rstest::rstest]
    fn cancelled_leaves_cache_empty(toy_graph: OntologyGraph) -> Result<(), anyhow::Error> {
        let cohort = toy_cohort(&toy_graph);
        let ic = InformationContent::from_cohort(&toy_graph, &cohort);
        let ctx = Context::new(&toy_graph, &ic, SetCombiner::default());
        let engine = PermutationEngine::new(ctx, &cohort, settings(100));

        let stop = AtomicBool::new(true);
        assert_eq!(engine.warm(&[2, 3], &stop), Err(Error::Cancelled));
        assert!(engine.cached(2).is_none());

        let stop = AtomicBool::new(false);
        engine.warm(&[3, 2, 3], &stop)?;
        assert!(engine.cached(2).is_some());
        assert!(engine.cached(3).is_some());

        Ok(())
    }
}
