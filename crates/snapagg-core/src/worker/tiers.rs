//! Ordered fallback extraction.
//!
//! Report pages change shape over time. A [`TieredExtractor`] tries the most
//! precise strategy first and falls back to looser ones, but only when a tier
//! reports an extraction failure: authentication and navigation failures
//! mean the page itself is wrong and abort immediately.

use std::marker::PhantomData;

use snapagg_common::WorkerResult;

use super::{Extraction, WorkerError};

/// One extraction strategy over input `I`.
pub trait ExtractionTier<I: ?Sized>: Send + Sync {
    fn name(&self) -> &str;
    fn extract(&self, input: &I) -> Result<WorkerResult, WorkerError>;
}

/// A tier backed by a function.
pub struct FnTier<I: ?Sized, F> {
    name: String,
    f: F,
    _input: PhantomData<fn(&I)>,
}

impl<I, F> FnTier<I, F>
where
    I: ?Sized,
    F: Fn(&I) -> Result<WorkerResult, WorkerError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        FnTier {
            name: name.into(),
            f,
            _input: PhantomData,
        }
    }
}

impl<I, F> ExtractionTier<I> for FnTier<I, F>
where
    I: ?Sized,
    F: Fn(&I) -> Result<WorkerResult, WorkerError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn extract(&self, input: &I) -> Result<WorkerResult, WorkerError> {
        (self.f)(input)
    }
}

/// Tiers tried in order until one succeeds.
pub struct TieredExtractor<I: ?Sized> {
    tiers: Vec<Box<dyn ExtractionTier<I>>>,
}

impl<I: ?Sized> Default for TieredExtractor<I> {
    fn default() -> Self {
        TieredExtractor { tiers: Vec::new() }
    }
}

impl<I: ?Sized> TieredExtractor<I> {
    pub fn new() -> Self {
        TieredExtractor::default()
    }

    pub fn with_tier(mut self, tier: impl ExtractionTier<I> + 'static) -> Self {
        self.tiers.push(Box::new(tier));
        self
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    /// Run tiers in order.
    ///
    /// Returns the first success. Non-extraction failures are returned as-is
    /// without trying later tiers. When every tier fails to extract, the
    /// error is `Unparseable` if any tier saw unreadable data, else `NoData`.
    pub fn extract(&self, input: &I) -> Result<WorkerResult, WorkerError> {
        let mut failures: Vec<String> = Vec::with_capacity(self.tiers.len());
        let mut any_unparseable = false;

        for tier in &self.tiers {
            match tier.extract(input) {
                Ok(result) => {
                    tracing::debug!(tier = tier.name(), tuples = result.len(), "extraction tier succeeded");
                    return Ok(result);
                }
                Err(WorkerError::Extraction(reason)) => {
                    let kind = match &reason {
                        Extraction::NoData(_) => "no_data",
                        Extraction::Unparseable(_) => {
                            any_unparseable = true;
                            "unparseable"
                        }
                    };
                    tracing::info!(
                        target: crate::logging::event_names::TIER_FAILED,
                        tier = tier.name(),
                        kind,
                        reason = %reason,
                        "extraction tier failed, trying next"
                    );
                    failures.push(format!("{}: {}", tier.name(), reason));
                }
                Err(other) => return Err(other),
            }
        }

        let detail = if failures.is_empty() {
            "no extraction tiers configured".to_string()
        } else {
            failures.join("; ")
        };
        Err(WorkerError::Extraction(if any_unparseable {
            Extraction::Unparseable(detail)
        } else {
            Extraction::NoData(detail)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapagg_common::MetricTuple;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn ok_tier(name: &str) -> impl ExtractionTier<str> {
        let title = name.to_string();
        FnTier::new(name, move |_: &str| {
            Ok(WorkerResult::from_tuples(vec![MetricTuple::new(
                title.clone(),
                "total",
                1i64,
            )]))
        })
    }

    #[test]
    fn falls_back_on_extraction_failure() {
        let extractor = TieredExtractor::<str>::new()
            .with_tier(FnTier::new("grid", |_: &str| Err(WorkerError::no_data("empty grid"))))
            .with_tier(ok_tier("text"));
        let result = extractor.extract("page").unwrap();
        assert_eq!(result.tuples()[0].metric_title, "text");
    }

    #[test]
    fn stops_on_navigation_failure() {
        let later_calls = Arc::new(AtomicUsize::new(0));
        let counter = later_calls.clone();
        let extractor = TieredExtractor::<str>::new()
            .with_tier(FnTier::new("grid", |_: &str| {
                Err(WorkerError::Navigation("report tab missing".into()))
            }))
            .with_tier(FnTier::new("text", move |_: &str| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(WorkerResult::new())
            }));

        let err = extractor.extract("page").unwrap_err();
        assert!(matches!(err, WorkerError::Navigation(_)));
        assert_eq!(later_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn all_tiers_failing_distinguishes_unparseable() {
        let no_data = TieredExtractor::<str>::new()
            .with_tier(FnTier::new("a", |_: &str| Err(WorkerError::no_data("x"))))
            .with_tier(FnTier::new("b", |_: &str| Err(WorkerError::no_data("y"))));
        assert!(matches!(
            no_data.extract(""),
            Err(WorkerError::Extraction(Extraction::NoData(_)))
        ));

        let mixed = TieredExtractor::<str>::new()
            .with_tier(FnTier::new("a", |_: &str| Err(WorkerError::no_data("x"))))
            .with_tier(FnTier::new("b", |_: &str| Err(WorkerError::unparseable("y"))));
        match mixed.extract("") {
            Err(WorkerError::Extraction(Extraction::Unparseable(detail))) => {
                assert!(detail.contains("a: no data present: x"));
                assert!(detail.contains("b: could not parse: y"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn empty_extractor_reports_no_data() {
        let extractor = TieredExtractor::<str>::new();
        assert!(extractor.is_empty());
        assert!(matches!(
            extractor.extract(""),
            Err(WorkerError::Extraction(Extraction::NoData(_)))
        ));
    }
}
