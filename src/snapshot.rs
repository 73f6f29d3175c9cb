//! Metric snapshot builder.
//!
//! Folds the ticket events of one `[start, end)` window into a single
//! immutable [`MetricSnapshot`]. Pure and stateless, so independent
//! windows can be built concurrently.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use uuid::Uuid;

use crate::breakdown::{CountBreakdown, DurationBreakdown};
use crate::config::AnalyticsConfig;
use crate::models::{percentage, ActiveCounts, MetricSnapshot, PeriodType, TicketEvent};
use crate::sources::TicketStore;
use crate::{InsightsError, Result};

/// Half-open time range `[start, end)`. Always non-empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl SnapshotWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if end <= start {
            return Err(InsightsError::InvalidWindow { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }

    fn contains_opt(&self, at: Option<DateTime<Utc>>) -> bool {
        at.map(|at| self.contains(at)).unwrap_or(false)
    }
}

/// Where a ticket lands in a snapshot's opened/resolved/closed split.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Opened,
    Resolved,
    Closed,
}

#[derive(Debug, Clone)]
pub struct SnapshotBuilder {
    first_contact_window: Duration,
}

impl Default for SnapshotBuilder {
    fn default() -> Self {
        Self::new(&AnalyticsConfig::default())
    }
}

impl SnapshotBuilder {
    pub fn new(config: &AnalyticsConfig) -> Self {
        Self {
            first_contact_window: Duration::minutes(config.first_contact_window_minutes),
        }
    }

    /// Fetch the window's events and active counts from the store, then build.
    pub async fn capture(
        &self,
        store: &dyn TicketStore,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        period_type: PeriodType,
    ) -> Result<MetricSnapshot> {
        let window = SnapshotWindow::new(start, end)?;

        let events = store.fetch_events(window.start, window.end).await?;
        let active = store
            .fetch_active_counts(period_type, window.start, window.end)
            .await?;

        tracing::debug!(
            period_type = ?period_type,
            start = %window.start,
            end = %window.end,
            events = events.len(),
            "Building metric snapshot"
        );

        self.build(&window, period_type, &events, active)
    }

    /// Build the snapshot for `window` from already-fetched events.
    pub fn build(
        &self,
        window: &SnapshotWindow,
        period_type: PeriodType,
        events: &[TicketEvent],
        active: ActiveCounts,
    ) -> Result<MetricSnapshot> {
        let mut opened_count = 0u64;
        let mut resolved_count = 0u64;
        let mut closed_count = 0u64;
        let mut escalated_count = 0u64;

        let mut tickets_by_priority = CountBreakdown::new();
        let mut tickets_by_category = CountBreakdown::new();

        let mut resolution_total = 0.0f64;
        let mut resolution_samples = 0u64;
        let mut resolution_per_priority: HashMap<&'static str, (f64, u64)> = HashMap::new();
        let mut first_contact = 0u64;

        let mut satisfaction_sum = 0i64;
        let mut satisfaction_samples = 0i64;

        for event in events {
            if !is_consistent(event) {
                tracing::warn!(
                    ticket_id = %event.ticket_id,
                    "Skipping ticket event with timestamps before its opening"
                );
                continue;
            }

            let Some(outcome) = classify(window, event) else {
                continue;
            };

            match outcome {
                Outcome::Opened => opened_count += 1,
                Outcome::Resolved => resolved_count += 1,
                Outcome::Closed => closed_count += 1,
            }
            if event.escalated {
                escalated_count += 1;
            }

            tickets_by_priority.increment(event.priority.label());
            tickets_by_category.increment(event.category_label());

            if window.contains_opt(event.resolved_at) {
                if let Some(minutes) = event.resolution_minutes() {
                    resolution_total += minutes;
                    resolution_samples += 1;

                    let entry = resolution_per_priority
                        .entry(event.priority.label())
                        .or_insert((0.0, 0));
                    entry.0 += minutes;
                    entry.1 += 1;
                }
                if self.is_first_contact(event) {
                    first_contact += 1;
                }
            }

            match event.satisfaction {
                Some(score @ 1..=5) => {
                    satisfaction_sum += i64::from(score);
                    satisfaction_samples += 1;
                }
                Some(score) => {
                    tracing::warn!(
                        ticket_id = %event.ticket_id,
                        score,
                        "Ignoring satisfaction score outside 1-5"
                    );
                }
                None => {}
            }
        }

        let mean_resolution_minutes =
            (resolution_samples > 0).then(|| resolution_total / resolution_samples as f64);

        let resolution_by_priority: DurationBreakdown = resolution_per_priority
            .into_iter()
            .map(|(label, (total, samples))| (label.to_string(), total / samples as f64))
            .collect();

        let mean_satisfaction = (satisfaction_samples > 0).then(|| {
            (Decimal::from(satisfaction_sum) / Decimal::from(satisfaction_samples)).round_dp(2)
        });

        Ok(MetricSnapshot {
            id: Uuid::new_v4(),
            period_type,
            period_date: window.start.date_naive(),
            opened_count,
            resolved_count,
            closed_count,
            escalated_count,
            mean_resolution_minutes,
            resolution_samples,
            mean_satisfaction,
            active_users: active.active_users,
            active_technicians: active.active_technicians,
            first_contact_resolution_rate: percentage(first_contact, resolution_samples),
            tickets_by_priority,
            tickets_by_category,
            resolution_by_priority,
            created_at: Utc::now(),
        })
    }

    fn is_first_contact(&self, event: &TicketEvent) -> bool {
        match (event.first_response_at, event.resolved_at) {
            (Some(first_response), Some(resolved)) => {
                resolved - first_response <= self.first_contact_window
            }
            _ => false,
        }
    }
}

/// Closure wins over resolution, which wins over opening. `None` when nothing
/// about the ticket happened inside the window.
fn classify(window: &SnapshotWindow, event: &TicketEvent) -> Option<Outcome> {
    if window.contains_opt(event.closed_at) {
        Some(Outcome::Closed)
    } else if window.contains_opt(event.resolved_at) {
        Some(Outcome::Resolved)
    } else if window.contains(event.opened_at) {
        Some(Outcome::Opened)
    } else {
        None
    }
}

fn is_consistent(event: &TicketEvent) -> bool {
    let after_open = |at: Option<DateTime<Utc>>| at.map(|at| at >= event.opened_at).unwrap_or(true);
    after_open(event.resolved_at) && after_open(event.closed_at) && after_open(event.first_response_at)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TicketPriority, TicketStatus};
    use async_trait::async_trait;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, day, hour, 0, 0).unwrap()
    }

    fn march_first() -> SnapshotWindow {
        SnapshotWindow::new(at(1, 0), at(2, 0)).unwrap()
    }

    fn event(category: &str, priority: TicketPriority, opened_at: DateTime<Utc>) -> TicketEvent {
        TicketEvent {
            ticket_id: Uuid::new_v4(),
            title: "Ticket".to_string(),
            description: "Something broke".to_string(),
            category: Some(category.to_string()),
            subcategory: None,
            priority,
            status: TicketStatus::New,
            requester_id: None,
            technician_id: None,
            escalated: false,
            opened_at,
            first_response_at: None,
            resolved_at: None,
            closed_at: None,
            satisfaction: None,
        }
    }

    #[test]
    fn inverted_or_empty_window_is_rejected() {
        assert!(matches!(
            SnapshotWindow::new(at(2, 0), at(1, 0)),
            Err(InsightsError::InvalidWindow { .. })
        ));
        assert!(SnapshotWindow::new(at(1, 0), at(1, 0)).is_err());
    }

    #[test]
    fn partitions_events_by_outcome_in_window() {
        let open = event("network", TicketPriority::Low, at(1, 8));

        let mut resolved = event("network", TicketPriority::High, at(1, 9));
        resolved.resolved_at = Some(at(1, 11));

        let mut closed = event("hardware", TicketPriority::High, at(1, 10));
        closed.resolved_at = Some(at(1, 12));
        closed.closed_at = Some(at(1, 13));
        closed.escalated = true;

        let mut resolved_from_before = event("email", TicketPriority::Medium, at(1, 0) - Duration::days(2));
        resolved_from_before.resolved_at = Some(at(1, 6));

        let outside = event("email", TicketPriority::Low, at(3, 0));

        let snapshot = SnapshotBuilder::default()
            .build(
                &march_first(),
                PeriodType::Daily,
                &[open, resolved, closed, resolved_from_before, outside],
                ActiveCounts { active_users: 12, active_technicians: 3 },
            )
            .unwrap();

        assert_eq!(snapshot.opened_count, 1);
        assert_eq!(snapshot.resolved_count, 2);
        assert_eq!(snapshot.closed_count, 1);
        assert_eq!(snapshot.escalated_count, 1);
        assert_eq!(snapshot.total_tickets(), 4);
        assert_eq!(snapshot.resolution_rate(), 50.0);
        assert_eq!(snapshot.closure_rate(), 25.0);
        assert_eq!(snapshot.active_users, 12);
        assert_eq!(snapshot.active_technicians, 3);
        assert_eq!(snapshot.period_date, at(1, 0).date_naive());

        assert_eq!(snapshot.tickets_by_category.count("network"), 2);
        assert_eq!(snapshot.tickets_by_category.count("email"), 1);
        assert_eq!(snapshot.tickets_by_priority.count("High"), 2);
    }

    #[test]
    fn mean_resolution_covers_resolved_events_only() {
        let mut fast = event("network", TicketPriority::High, at(1, 8));
        fast.resolved_at = Some(at(1, 9));
        let mut slow = event("network", TicketPriority::Low, at(1, 8));
        slow.resolved_at = Some(at(1, 11));
        let open = event("network", TicketPriority::Low, at(1, 8));

        let snapshot = SnapshotBuilder::default()
            .build(&march_first(), PeriodType::Daily, &[fast, slow, open], ActiveCounts::default())
            .unwrap();

        assert_eq!(snapshot.mean_resolution_minutes, Some(120.0));
        assert_eq!(snapshot.resolution_samples, 2);
        assert_eq!(snapshot.resolution_by_priority.get("High"), Some(&60.0));
        assert_eq!(snapshot.resolution_by_priority.get("Low"), Some(&180.0));
    }

    #[test]
    fn late_closure_adds_no_resolution_sample() {
        let mut resolved_today = event("network", TicketPriority::High, at(1, 8));
        resolved_today.resolved_at = Some(at(1, 10));

        let mut resolved_yesterday = event("network", TicketPriority::High, at(1, 0) - Duration::days(1));
        resolved_yesterday.resolved_at = Some(at(1, 0) - Duration::hours(2));
        resolved_yesterday.closed_at = Some(at(1, 9));

        let snapshot = SnapshotBuilder::default()
            .build(
                &march_first(),
                PeriodType::Daily,
                &[resolved_today, resolved_yesterday],
                ActiveCounts::default(),
            )
            .unwrap();

        assert_eq!(snapshot.resolved_count, 1);
        assert_eq!(snapshot.closed_count, 1);
        assert_eq!(snapshot.resolution_samples, 1);
        assert_eq!(snapshot.mean_resolution_minutes, Some(120.0));
    }

    #[test]
    fn mean_resolution_is_absent_without_resolutions() {
        let snapshot = SnapshotBuilder::default()
            .build(
                &march_first(),
                PeriodType::Daily,
                &[event("network", TicketPriority::Low, at(1, 8))],
                ActiveCounts::default(),
            )
            .unwrap();

        assert_eq!(snapshot.mean_resolution_minutes, None);
        assert!(snapshot.resolution_by_priority.is_empty());
        assert_eq!(snapshot.first_contact_resolution_rate, 0.0);
    }

    #[test]
    fn malformed_event_is_skipped_not_fatal() {
        let mut broken = event("network", TicketPriority::Low, at(1, 10));
        broken.resolved_at = Some(at(1, 9));
        let fine = event("network", TicketPriority::Low, at(1, 10));

        let snapshot = SnapshotBuilder::default()
            .build(&march_first(), PeriodType::Daily, &[broken, fine], ActiveCounts::default())
            .unwrap();

        assert_eq!(snapshot.total_tickets(), 1);
    }

    #[test]
    fn satisfaction_and_first_contact_rate() {
        let builder = SnapshotBuilder::new(&AnalyticsConfig::default());

        let mut quick = event("network", TicketPriority::Low, at(1, 8));
        quick.first_response_at = Some(at(1, 9));
        quick.resolved_at = Some(at(1, 9) + Duration::minutes(30));
        quick.satisfaction = Some(5);

        let mut long = event("network", TicketPriority::Low, at(1, 8));
        long.first_response_at = Some(at(1, 9));
        long.resolved_at = Some(at(1, 15));
        long.satisfaction = Some(4);

        let mut unrated = event("network", TicketPriority::Low, at(1, 8));
        unrated.satisfaction = Some(9);

        let snapshot = builder
            .build(&march_first(), PeriodType::Daily, &[quick, long, unrated], ActiveCounts::default())
            .unwrap();

        assert_eq!(snapshot.first_contact_resolution_rate, 50.0);
        assert_eq!(snapshot.mean_satisfaction, Some(Decimal::new(450, 2)));
    }

    struct FixedStore {
        events: Vec<TicketEvent>,
    }

    #[async_trait]
    impl TicketStore for FixedStore {
        async fn fetch_events(&self, _start: DateTime<Utc>, _end: DateTime<Utc>) -> Result<Vec<TicketEvent>> {
            Ok(self.events.clone())
        }

        async fn fetch_active_counts(
            &self,
            _period_type: PeriodType,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<ActiveCounts> {
            Ok(ActiveCounts { active_users: 7, active_technicians: 2 })
        }
    }

    #[tokio::test]
    async fn capture_reads_through_the_store() {
        let store = FixedStore {
            events: vec![event("network", TicketPriority::Urgent, at(1, 8))],
        };

        let snapshot = SnapshotBuilder::default()
            .capture(&store, at(1, 0), at(2, 0), PeriodType::Daily)
            .await
            .unwrap();

        assert_eq!(snapshot.opened_count, 1);
        assert_eq!(snapshot.active_users, 7);
        assert_eq!(snapshot.tickets_by_priority.count("Urgent"), 1);
    }

    #[tokio::test]
    async fn capture_fails_fast_on_inverted_window() {
        let store = FixedStore { events: vec![] };
        let result = SnapshotBuilder::default()
            .capture(&store, at(2, 0), at(1, 0), PeriodType::Daily)
            .await;

        tokio_test::assert_err!(result);
    }
}
