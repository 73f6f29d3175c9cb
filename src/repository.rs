use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::breakdown::{CountBreakdown, DurationBreakdown};
use crate::models::{ActiveCounts, MetricSnapshot, PeriodType, TicketEvent, TicketPriority, TicketStatus};
use crate::sources::TicketStore;
use crate::{InsightsError, Result};

pub struct PgInsightsRepository {
    pool: PgPool,
}

#[derive(Debug, sqlx::FromRow)]
struct TicketEventRow {
    id: Uuid,
    subject: String,
    description: String,
    category: Option<String>,
    subcategory: Option<String>,
    priority: TicketPriority,
    status: TicketStatus,
    customer_id: Option<Uuid>,
    assigned_to: Option<Uuid>,
    escalated: bool,
    created_at: DateTime<Utc>,
    first_response_at: Option<DateTime<Utc>>,
    resolved_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
    csat_score: Option<i32>,
}

impl From<TicketEventRow> for TicketEvent {
    fn from(row: TicketEventRow) -> Self {
        TicketEvent {
            ticket_id: row.id,
            title: row.subject,
            description: row.description,
            category: row.category,
            subcategory: row.subcategory,
            priority: row.priority,
            status: row.status,
            requester_id: row.customer_id,
            technician_id: row.assigned_to,
            escalated: row.escalated,
            opened_at: row.created_at,
            first_response_at: row.first_response_at,
            resolved_at: row.resolved_at,
            closed_at: row.closed_at,
            satisfaction: row.csat_score,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SnapshotRow {
    id: Uuid,
    period_type: PeriodType,
    period_date: NaiveDate,
    opened_count: i64,
    resolved_count: i64,
    closed_count: i64,
    escalated_count: i64,
    mean_resolution_minutes: Option<f64>,
    mean_satisfaction: Option<Decimal>,
    resolution_samples: i64,
    active_users: i64,
    active_technicians: i64,
    first_contact_resolution_rate: f64,
    tickets_by_priority: Option<String>,
    tickets_by_category: Option<String>,
    resolution_by_priority: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<SnapshotRow> for MetricSnapshot {
    type Error = InsightsError;

    fn try_from(row: SnapshotRow) -> Result<Self> {
        let count = |value: i64, column: &str| {
            u64::try_from(value).map_err(|_| {
                InsightsError::MalformedPersistedData(format!(
                    "snapshot {} has negative {}: {}",
                    row.id, column, value
                ))
            })
        };

        Ok(MetricSnapshot {
            id: row.id,
            period_type: row.period_type,
            period_date: row.period_date,
            opened_count: count(row.opened_count, "opened_count")?,
            resolved_count: count(row.resolved_count, "resolved_count")?,
            closed_count: count(row.closed_count, "closed_count")?,
            escalated_count: count(row.escalated_count, "escalated_count")?,
            mean_resolution_minutes: row.mean_resolution_minutes,
            resolution_samples: count(row.resolution_samples, "resolution_samples")?,
            mean_satisfaction: row.mean_satisfaction,
            active_users: count(row.active_users, "active_users")?,
            active_technicians: count(row.active_technicians, "active_technicians")?,
            first_contact_resolution_rate: row.first_contact_resolution_rate,
            tickets_by_priority: CountBreakdown::from_persisted(row.tickets_by_priority.as_deref()),
            tickets_by_category: CountBreakdown::from_persisted(row.tickets_by_category.as_deref()),
            resolution_by_priority: DurationBreakdown::from_persisted(row.resolution_by_priority.as_deref()),
            created_at: row.created_at,
        })
    }
}

const INSERT_SNAPSHOT: &str = r#"
    INSERT INTO metric_snapshots (
        id, period_type, period_date,
        opened_count, resolved_count, closed_count, escalated_count,
        mean_resolution_minutes, mean_satisfaction, resolution_samples,
        active_users, active_technicians, first_contact_resolution_rate,
        tickets_by_priority, tickets_by_category, resolution_by_priority,
        created_at
    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
    ON CONFLICT (period_type, period_date) DO NOTHING
"#;

fn to_db_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl PgInsightsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Persist a snapshot. One snapshot exists per period: when the period
    /// already has one, the stored row is kept and `false` is returned.
    pub async fn save_snapshot(&self, snapshot: &MetricSnapshot) -> Result<bool> {
        let result = sqlx::query(INSERT_SNAPSHOT)
            .bind(snapshot.id)
            .bind(snapshot.period_type)
            .bind(snapshot.period_date)
            .bind(to_db_count(snapshot.opened_count))
            .bind(to_db_count(snapshot.resolved_count))
            .bind(to_db_count(snapshot.closed_count))
            .bind(to_db_count(snapshot.escalated_count))
            .bind(snapshot.mean_resolution_minutes)
            .bind(snapshot.mean_satisfaction)
            .bind(to_db_count(snapshot.resolution_samples))
            .bind(to_db_count(snapshot.active_users))
            .bind(to_db_count(snapshot.active_technicians))
            .bind(snapshot.first_contact_resolution_rate)
            .bind(snapshot.tickets_by_priority.to_persisted())
            .bind(snapshot.tickets_by_category.to_persisted())
            .bind(snapshot.resolution_by_priority.to_persisted())
            .bind(snapshot.created_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to save metric snapshot: {}", e);
                InsightsError::Database(e)
            })?;

        if result.rows_affected() == 0 {
            tracing::info!(
                period_type = ?snapshot.period_type,
                period_date = %snapshot.period_date,
                "Snapshot for period already stored, keeping existing row"
            );
        }
        Ok(result.rows_affected() > 0)
    }

    /// Snapshots of one period type dated within `[from, to]`, oldest first.
    pub async fn list_snapshots(
        &self,
        period_type: PeriodType,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<MetricSnapshot>> {
        let rows = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT * FROM metric_snapshots
            WHERE period_type = $1
              AND period_date BETWEEN $2 AND $3
            ORDER BY period_date ASC, created_at ASC
            "#,
        )
        .bind(period_type)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to list metric snapshots: {}", e);
            InsightsError::Database(e)
        })?;

        rows.into_iter().map(MetricSnapshot::try_from).collect()
    }
}

#[async_trait]
impl TicketStore for PgInsightsRepository {
    async fn fetch_events(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<TicketEvent>> {
        let rows = sqlx::query_as::<_, TicketEventRow>(
            r#"
            SELECT
                id, subject, description, category,
                metadata->>'subcategory' as subcategory,
                priority, status, customer_id, assigned_to,
                COALESCE((metadata->>'escalated')::BOOLEAN, FALSE) as escalated,
                created_at, first_response_at, resolved_at, closed_at, csat_score
            FROM support_tickets
            WHERE deleted_at IS NULL
              AND (
                (created_at >= $1 AND created_at < $2)
                OR (resolved_at >= $1 AND resolved_at < $2)
                OR (closed_at >= $1 AND closed_at < $2)
              )
            ORDER BY created_at ASC
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to fetch ticket events: {}", e);
            InsightsError::Database(e)
        })?;

        Ok(rows.into_iter().map(TicketEvent::from).collect())
    }

    async fn fetch_active_counts(
        &self,
        _period_type: PeriodType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<ActiveCounts> {
        let (active_users, active_technicians) = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT
                COUNT(DISTINCT customer_id)::BIGINT as active_users,
                COUNT(DISTINCT assigned_to)::BIGINT as active_technicians
            FROM support_tickets
            WHERE deleted_at IS NULL
              AND updated_at >= $1 AND updated_at < $2
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to fetch active counts: {}", e);
            InsightsError::Database(e)
        })?;

        Ok(ActiveCounts {
            active_users: u64::try_from(active_users).unwrap_or(0),
            active_technicians: u64::try_from(active_technicians).unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(opened: i64, by_category: Option<&str>) -> SnapshotRow {
        SnapshotRow {
            id: Uuid::new_v4(),
            period_type: PeriodType::Weekly,
            period_date: NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
            opened_count: opened,
            resolved_count: 2,
            closed_count: 1,
            escalated_count: 0,
            mean_resolution_minutes: Some(42.0),
            mean_satisfaction: None,
            resolution_samples: 2,
            active_users: 9,
            active_technicians: 2,
            first_contact_resolution_rate: 50.0,
            tickets_by_priority: None,
            tickets_by_category: by_category.map(str::to_string),
            resolution_by_priority: Some("garbage".to_string()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn corrupt_breakdowns_load_as_empty_maps() {
        let snapshot = MetricSnapshot::try_from(row(3, Some(r#"{"network": 3"#))).unwrap();
        assert_eq!(snapshot.opened_count, 3);
        assert!(snapshot.tickets_by_priority.is_empty());
        assert!(snapshot.tickets_by_category.is_empty());
        assert!(snapshot.resolution_by_priority.is_empty());
    }

    #[test]
    fn stored_breakdowns_are_decoded() {
        let snapshot = MetricSnapshot::try_from(row(3, Some(r#"{"network": 3}"#))).unwrap();
        assert_eq!(snapshot.tickets_by_category.count("network"), 3);
        assert_eq!(snapshot.resolution_rate(), 2.0 / 6.0 * 100.0);
    }

    #[test]
    fn resolution_samples_are_loaded() {
        let snapshot = MetricSnapshot::try_from(row(3, None)).unwrap();
        assert_eq!(snapshot.resolution_samples, 2);

        let mut negative = row(3, None);
        negative.resolution_samples = -4;
        assert!(matches!(
            MetricSnapshot::try_from(negative),
            Err(InsightsError::MalformedPersistedData(_))
        ));
    }

    #[test]
    fn insert_skips_periods_that_already_have_a_snapshot() {
        assert!(INSERT_SNAPSHOT.contains("ON CONFLICT (period_type, period_date) DO NOTHING"));
        assert!(!INSERT_SNAPSHOT.contains("ON CONFLICT (id)"));

        let migration = include_str!("../migrations/0001_metric_snapshots.sql");
        assert!(migration.contains("UNIQUE (period_type, period_date)"));
    }

    #[test]
    fn insert_binds_every_column() {
        let columns = INSERT_SNAPSHOT
            .split_once('(')
            .and_then(|(_, rest)| rest.split_once(')'))
            .map(|(list, _)| list.split(',').count())
            .unwrap();
        let placeholders = INSERT_SNAPSHOT.matches('$').count();
        assert_eq!(columns, 17);
        assert_eq!(placeholders, columns);
    }

    #[test]
    fn negative_counts_are_surfaced() {
        assert!(matches!(
            MetricSnapshot::try_from(row(-1, None)),
            Err(InsightsError::MalformedPersistedData(_))
        ));
    }
}
