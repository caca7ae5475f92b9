//! # Broadcast Scheduler
//!
//! Polling control loop over the `broadcasts` table. Each tick loads due
//! campaigns and claims them with a status compare-and-set. A recurring
//! campaign with another occurrence ahead is re-armed before its pending
//! recipients are fanned out onto the delivery lane; anything else stays
//! `sending` and completes once drained.
//! Several scheduler instances may run against one database; a campaign
//! claimed by another pass is skipped.

use std::sync::{Arc, LazyLock};

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use regex::{NoExpand, Regex};
use sea_orm::DbErr;
use tokio::time::{Duration, Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::recurrence::{EndCondition, RecurrenceRule};
use crate::config::BroadcastSchedulerConfig;
use crate::db::from_db_time;
use crate::error::RecurrenceError;
use crate::models::broadcast;
use crate::queue::{self, DeliveryJob, WorkQueue};
use crate::repositories::BroadcastRepository;
use crate::telemetry::metric_names;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*(?:nama|name)\s*\}\}").expect("placeholder pattern is valid")
});

/// Replace `{{nama}}` / `{{name}}` with the recipient's display name.
pub fn personalize(template: &str, name: &str) -> String {
    PLACEHOLDER.replace_all(template, NoExpand(name)).into_owned()
}

/// Background broadcast scheduler.
pub struct BroadcastScheduler {
    broadcasts: BroadcastRepository,
    queue: Arc<dyn WorkQueue>,
    config: BroadcastSchedulerConfig,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickStats {
    pub due: u64,
    pub claimed: u64,
    pub lost_claims: u64,
    pub enqueued: u64,
    pub enqueue_failures: u64,
    pub rearmed: u64,
    pub completed: u64,
    pub errors: u64,
}

/// What happens to a recurring campaign after this occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NextStep {
    Rearm(DateTime<Utc>),
    Finish,
}

impl BroadcastScheduler {
    pub fn new(
        broadcasts: BroadcastRepository,
        queue: Arc<dyn WorkQueue>,
        config: BroadcastSchedulerConfig,
    ) -> Self {
        Self {
            broadcasts,
            queue,
            config,
        }
    }

    /// Tick once immediately, then every tick interval until shutdown.
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        info!("Starting broadcast scheduler");
        let tick_interval = Duration::from_secs(self.config.tick_interval_seconds);

        loop {
            let tick_started = Instant::now();
            if let Err(err) = self.tick(Utc::now()).await {
                error!(error = %err, "Broadcast scheduler tick failed");
            }
            histogram!(metric_names::BROADCAST_TICK_MS)
                .record(tick_started.elapsed().as_secs_f64() * 1_000.0);

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Broadcast scheduler shutdown requested");
                    break;
                }
                _ = sleep(tick_interval) => {}
            }
        }

        info!("Broadcast scheduler stopped");
    }

    /// One scheduling pass as of `now`.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickStats, DbErr> {
        let mut stats = TickStats::default();
        let due = self
            .broadcasts
            .due_campaigns(now, self.config.batch_size)
            .await?;
        stats.due = due.len() as u64;

        for campaign in due {
            if let Err(err) = self.execute(&campaign, now, &mut stats).await {
                stats.errors += 1;
                error!(broadcast_id = %campaign.id, error = %err, "Failed to execute broadcast");
            }
        }

        debug!(
            due = stats.due,
            claimed = stats.claimed,
            lost_claims = stats.lost_claims,
            enqueued = stats.enqueued,
            enqueue_failures = stats.enqueue_failures,
            rearmed = stats.rearmed,
            completed = stats.completed,
            errors = stats.errors,
            "Broadcast scheduler tick completed"
        );
        Ok(stats)
    }

    async fn execute(
        &self,
        campaign: &broadcast::Model,
        now: DateTime<Utc>,
        stats: &mut TickStats,
    ) -> Result<(), DbErr> {
        if !self.broadcasts.claim(campaign.id, now).await? {
            stats.lost_claims += 1;
            debug!(broadcast_id = %campaign.id, "Broadcast already claimed elsewhere");
            return Ok(());
        }
        stats.claimed += 1;
        counter!(metric_names::BROADCASTS_CLAIMED).increment(1);
        info!(
            broadcast_id = %campaign.id,
            tenant_id = %campaign.tenant_id,
            recurring = campaign.is_recurring,
            "Executing broadcast"
        );

        if campaign.is_recurring {
            let reset = self.broadcasts.reset_finished_recipients(campaign.id).await?;
            debug!(broadcast_id = %campaign.id, reset, "Recipients reset for new occurrence");

            // Re-armed before any job is pushed: the delivery worker only
            // completes `sending` campaigns, so a fast drain cannot end it.
            if let NextStep::Rearm(next_due) = next_step(campaign, now) {
                if !self.broadcasts.rearm(campaign.id, next_due).await? {
                    debug!(broadcast_id = %campaign.id, "Broadcast left sending before re-arm; skipping fan-out");
                    return Ok(());
                }
                stats.rearmed += 1;
                info!(broadcast_id = %campaign.id, next_due = %next_due, "Recurring broadcast re-armed");
                return self.fan_out(campaign, stats).await;
            }
        }

        self.fan_out(campaign, stats).await?;

        // Covers campaigns without recipients; otherwise the delivery worker
        // completes the campaign when the last recipient finishes.
        if self.broadcasts.complete_if_drained(campaign.id).await? {
            stats.completed += 1;
            info!(broadcast_id = %campaign.id, "Broadcast completed");
        }
        Ok(())
    }

    async fn fan_out(
        &self,
        campaign: &broadcast::Model,
        stats: &mut TickStats,
    ) -> Result<(), DbErr> {
        let pending = self.broadcasts.pending_recipients(campaign.id).await?;
        for entry in pending {
            let recipient = &entry.recipient;
            // Queued before the push so a fast worker never sees a pending row.
            if !self.broadcasts.mark_recipient_queued(recipient.id).await? {
                continue;
            }

            let job = DeliveryJob {
                tenant_id: campaign.tenant_id,
                broadcast_id: campaign.id,
                recipient_id: recipient.id,
                customer_jid: recipient.customer_jid.clone(),
                message: personalize(&campaign.message_content, &entry.display_name),
                customer_name: entry.display_name.clone(),
            };
            match queue::enqueue(self.queue.as_ref(), &job).await {
                Ok(()) => stats.enqueued += 1,
                Err(err) => {
                    stats.enqueue_failures += 1;
                    warn!(broadcast_id = %campaign.id, recipient_id = %recipient.id, error = %err, "Failed to enqueue delivery");
                    self.broadcasts
                        .record_delivery_failure(campaign.id, recipient.id, &err.to_string())
                        .await?;
                }
            }
        }
        Ok(())
    }
}

/// Decide whether a recurring campaign claimed at `claimed_at` runs again.
///
/// Rules that no longer parse, and weekly rules without a matching day,
/// finish the campaign rather than leave it claimed forever.
fn next_step(campaign: &broadcast::Model, claimed_at: DateTime<Utc>) -> NextStep {
    let rule = match rule_of(campaign) {
        Ok(rule) => rule,
        Err(err) => {
            warn!(broadcast_id = %campaign.id, error = %err, "Unparsable recurrence; finishing campaign");
            return NextStep::Finish;
        }
    };
    let end = EndCondition {
        until: campaign.recurrence_end_date.map(from_db_time),
        max_executions: campaign.recurrence_count,
    };
    // The claim has already counted this occurrence.
    let executions = campaign.execution_count.saturating_add(1);
    if end.reached(claimed_at, executions) {
        return NextStep::Finish;
    }

    match rule.next_after(claimed_at) {
        Some(next) if end.until.is_some_and(|until| next > until) => NextStep::Finish,
        Some(next) => NextStep::Rearm(next),
        None => {
            warn!(broadcast_id = %campaign.id, rule = rule.kind(), "No next occurrence; finishing campaign");
            NextStep::Finish
        }
    }
}

fn rule_of(campaign: &broadcast::Model) -> Result<RecurrenceRule, RecurrenceError> {
    RecurrenceRule::parse(
        campaign.recurrence_type.as_deref().unwrap_or_default(),
        campaign.recurrence_interval,
        campaign.recurrence_days.as_ref(),
        campaign.recurrence_time.as_deref(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::to_db_time;
    use chrono::TimeZone;
    use serde_json::json;
    use uuid::Uuid;

    fn campaign(kind: &str) -> broadcast::Model {
        let created = to_db_time(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        broadcast::Model {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            name: "promo".to_string(),
            message_content: "Halo {{nama}}".to_string(),
            status: "sending".to_string(),
            scheduled_at: Some(created),
            is_recurring: true,
            recurrence_type: Some(kind.to_string()),
            recurrence_interval: Some(2),
            recurrence_days: None,
            recurrence_time: Some("09:30".to_string()),
            recurrence_end_date: None,
            recurrence_count: None,
            execution_count: 0,
            last_executed_at: None,
            started_at: None,
            completed_at: None,
            total_recipients: 0,
            sent_count: 0,
            delivered_count: 0,
            failed_count: 0,
            created_at: created,
            updated_at: created,
        }
    }

    #[test]
    fn placeholders_are_replaced_literally() {
        assert_eq!(personalize("Halo {{nama}}!", "Budi"), "Halo Budi!");
        assert_eq!(
            personalize("Hi {{ name }}, {{nama}}", "A$1"),
            "Hi A$1, A$1"
        );
        assert_eq!(personalize("Halo {{nama}}", ""), "Halo ");
        assert_eq!(personalize("No placeholder", "Budi"), "No placeholder");
    }

    #[test]
    fn daily_campaign_rearms_from_claim_time() {
        let claimed = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        assert_eq!(
            next_step(&campaign("daily"), claimed),
            NextStep::Rearm(Utc.with_ymd_and_hms(2025, 3, 3, 9, 30, 0).unwrap())
        );
    }

    #[test]
    fn execution_limit_finishes_campaign() {
        let mut limited = campaign("hourly");
        limited.recurrence_count = Some(3);
        limited.execution_count = 2;
        let claimed = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        assert_eq!(next_step(&limited, claimed), NextStep::Finish);

        limited.execution_count = 1;
        assert!(matches!(next_step(&limited, claimed), NextStep::Rearm(_)));
    }

    #[test]
    fn next_occurrence_past_end_date_finishes() {
        let mut ending = campaign("daily");
        ending.recurrence_end_date =
            Some(to_db_time(Utc.with_ymd_and_hms(2025, 3, 2, 0, 0, 0).unwrap()));
        let claimed = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        assert_eq!(next_step(&ending, claimed), NextStep::Finish);
    }

    #[test]
    fn broken_rules_finish_campaign() {
        let mut broken = campaign("fortnightly");
        let claimed = Utc::now();
        assert_eq!(next_step(&broken, claimed), NextStep::Finish);

        broken.recurrence_type = Some("weekly".to_string());
        broken.recurrence_days = Some(json!(["funday"]));
        assert_eq!(next_step(&broken, claimed), NextStep::Finish);
    }
}
