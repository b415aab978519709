//! Repeated trials over one provider profile.

use std::time::Duration;

use rand::Rng;

use super::{FatalError, TrialOrchestrator, TrialReport};
use crate::config::{ConfigLayer, TrialConfig, TrialConfigBuilder};
use crate::engine::ContainerEngine;
use crate::probe::IpFetcher;
use crate::selection::{CatalogSource, SelectionPolicy};
use crate::tunnel::InstanceProvisioner;

/// Fixed parameters of a campaign.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CampaignPlan {
    /// Provider profile layer.
    pub profile: ConfigLayer,
    /// Workload image run in every trial.
    pub workload: String,
    /// Whether each trial chains a relay.
    pub chaining: bool,
    /// Delay between catalog load attempts.
    pub catalog_retry: Duration,
}

/// Tally of a finished campaign.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CampaignSummary {
    /// Trials whose workload ran to completion.
    pub completed: u64,
    /// Trials abandoned after a recoverable failure.
    pub abandoned: u64,
    /// Resources whose release failed across all trials.
    pub unreleased: usize,
}

/// Runs trials one after another, each with a fresh location pin.
#[derive(Debug)]
pub struct Campaign<'a, E, F, I, R: Rng, S: ?Sized> {
    orchestrator: &'a TrialOrchestrator<E, F, I>,
    catalog: &'a S,
    policy: SelectionPolicy<R>,
    plan: CampaignPlan,
}

impl<'a, E, F, I, R, S> Campaign<'a, E, F, I, R, S>
where
    E: ContainerEngine,
    F: IpFetcher,
    I: InstanceProvisioner,
    R: Rng,
    S: CatalogSource + ?Sized,
{
    /// Creates a campaign.
    #[must_use]
    pub const fn new(
        orchestrator: &'a TrialOrchestrator<E, F, I>,
        catalog: &'a S,
        policy: SelectionPolicy<R>,
        plan: CampaignPlan,
    ) -> Self {
        Self {
            orchestrator,
            catalog,
            policy,
            plan,
        }
    }

    /// Builds the configuration of the next trial: defaults, then the
    /// provider profile, then the selected location pin.
    pub async fn next_config(&mut self) -> TrialConfig {
        let template = TrialConfigBuilder::new()
            .provider(self.plan.profile.clone())
            .build();
        let selection = self
            .policy
            .select(&template, self.catalog, self.plan.catalog_retry)
            .await;
        TrialConfigBuilder::new()
            .provider(self.plan.profile.clone())
            .trial(selection.overrides())
            .build()
    }

    /// Runs a single trial with a freshly selected configuration.
    ///
    /// # Errors
    ///
    /// Returns [`FatalError`] when the workload image is unusable.
    pub async fn run_once(&mut self) -> Result<TrialReport, FatalError> {
        let config = self.next_config().await;
        self.orchestrator
            .run_trial(&config, &self.plan.workload, self.plan.chaining)
            .await
    }

    /// Runs trials until `limit` is reached, or forever when `None`.
    ///
    /// # Errors
    ///
    /// Returns [`FatalError`] as soon as a trial reports one.
    pub async fn run(&mut self, limit: Option<u64>) -> Result<CampaignSummary, FatalError> {
        let mut summary = CampaignSummary::default();
        let mut started: u64 = 0;
        while limit.is_none_or(|max| started < max) {
            started = started.saturating_add(1);
            let report = self.run_once().await?;
            if report.outcome.is_completed() {
                summary.completed = summary.completed.saturating_add(1);
            } else {
                summary.abandoned = summary.abandoned.saturating_add(1);
            }
            summary.unreleased = summary.unreleased.saturating_add(report.release.failed.len());
        }
        tracing::info!(
            completed = summary.completed,
            abandoned = summary.abandoned,
            unreleased = summary.unreleased,
            "campaign finished"
        );
        Ok(summary)
    }
}
