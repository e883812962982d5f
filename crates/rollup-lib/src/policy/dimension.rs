//! Minute sampling and hour/day roll-ups, generic over the object kind

use super::{KindSampler, Policy, PolicyClients, PolicyOutcome, SampleWindow};
use crate::error::PolicyError;
use crate::models::{Dimension, JobCommonOpts, ObjectKind};
use crate::store::{BucketSample, KindTable};
use async_trait::async_trait;
use tracing::debug;

fn check_kind<K: KindSampler>(opts: &JobCommonOpts) -> Result<(), PolicyError> {
    let expected = <K::Sample as BucketSample>::KIND;
    if opts.object_kind() != expected {
        return Err(PolicyError::KindMismatch {
            expected,
            actual: opts.object_kind(),
        });
    }
    Ok(())
}

/// Samples the getters and writes the sample with its own point extrema
pub struct MinutePolicy<K> {
    sampler: K,
}

impl<K: KindSampler> MinutePolicy<K> {
    pub fn new(sampler: K) -> Self {
        Self { sampler }
    }
}

#[async_trait]
impl<K: KindSampler> Policy for MinutePolicy<K> {
    fn object_kind(&self) -> ObjectKind {
        <K::Sample as BucketSample>::KIND
    }

    fn label(&self) -> &'static str {
        Dimension::Minute.as_str()
    }

    async fn implement_policy(
        &self,
        opts: &JobCommonOpts,
        clients: &PolicyClients,
    ) -> Result<PolicyOutcome, PolicyError> {
        check_kind::<K>(opts)?;
        let opts = opts.with_dimension(Dimension::Minute);
        let window = SampleWindow::for_run(&opts);

        let mut sample = self.sampler.sample(&opts.scope, &window, clients).await;
        let extrema = sample.point_extrema(opts.scope.display_name(), &window.period_label());
        sample.set_extrema(extrema);

        K::Sample::table(&clients.stores)
            .insert(sample, &opts.at(window.period))
            .await?;
        clients.metrics.inc_store_writes(self.object_kind(), Dimension::Minute);

        debug!(
            kind = %self.object_kind(),
            scope = %opts.scope.label_selector(),
            period = %window.period_label(),
            "Minute sample written"
        );
        Ok(PolicyOutcome::Written)
    }
}

/// Hour or day roll-up. Reads exactly one bucket of the next finer
/// dimension for the previous period and carries its extrema forward.
pub struct RollupPolicy<K> {
    sampler: K,
    dimension: Dimension,
    finer: Dimension,
}

impl<K: KindSampler> RollupPolicy<K> {
    pub fn new(sampler: K, dimension: Dimension) -> Result<Self, PolicyError> {
        let finer = dimension.finer().ok_or(PolicyError::NotARollup {
            kind: <K::Sample as BucketSample>::KIND,
            dimension,
        })?;
        Ok(Self {
            sampler,
            dimension,
            finer,
        })
    }

    pub fn dimension(&self) -> Dimension {
        self.dimension
    }
}

#[async_trait]
impl<K: KindSampler> Policy for RollupPolicy<K> {
    fn object_kind(&self) -> ObjectKind {
        <K::Sample as BucketSample>::KIND
    }

    fn label(&self) -> &'static str {
        self.dimension.as_str()
    }

    async fn implement_policy(
        &self,
        opts: &JobCommonOpts,
        clients: &PolicyClients,
    ) -> Result<PolicyOutcome, PolicyError> {
        check_kind::<K>(opts)?;
        let opts = opts.with_dimension(self.dimension);
        let window = SampleWindow::for_run(&opts);
        let table = K::Sample::table(&clients.stores);

        let source_opts = opts.with_dimension(self.finer).at(window.period);
        let bucket = source_opts.bucket_time();
        let mut found = table.get_raw(&source_opts, &bucket).await?;

        if found.len() != 1 {
            clients.metrics.inc_rollup_aborts(self.object_kind(), self.dimension);
            return Err(PolicyError::RollupSourceNotSingular {
                kind: self.object_kind(),
                dimension: self.dimension,
                finer: self.finer,
                bucket,
                found: found.len(),
            });
        }
        let source = found.remove(0);

        let mut sample = self.sampler.sample(&opts.scope, &window, clients).await;
        sample.set_extrema(source.extrema);

        table.insert(sample, &opts.at(window.period)).await?;
        clients.metrics.inc_store_writes(self.object_kind(), self.dimension);

        debug!(
            kind = %self.object_kind(),
            dimension = %self.dimension,
            scope = %opts.scope.label_selector(),
            source_bucket = %bucket,
            source_samples = source.metrics.len(),
            "Roll-up written"
        );
        Ok(PolicyOutcome::Written)
    }
}
