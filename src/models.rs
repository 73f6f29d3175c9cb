use async_graphql::{ComplexObject, Enum, SimpleObject};
use chrono::{DateTime, Duration, Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::breakdown::{CountBreakdown, DurationBreakdown};
use crate::config::ArticleThresholds;

/// One ticket as observed by the analytics core. Produced by the ticket store, read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketEvent {
    pub ticket_id: Uuid,
    pub title: String,
    pub description: String,
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub priority: TicketPriority,
    pub status: TicketStatus,
    pub requester_id: Option<Uuid>,
    pub technician_id: Option<Uuid>,
    pub escalated: bool,
    pub opened_at: DateTime<Utc>,
    pub first_response_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub satisfaction: Option<i32>,
}

impl TicketEvent {
    /// Minutes between opening and resolution, if resolved.
    pub fn resolution_minutes(&self) -> Option<f64> {
        self.resolved_at
            .map(|resolved| (resolved - self.opened_at).num_seconds() as f64 / 60.0)
    }

    pub fn category_label(&self) -> &str {
        self.category.as_deref().unwrap_or(UNCATEGORIZED)
    }
}

/// Breakdown label for tickets without a category.
pub const UNCATEGORIZED: &str = "uncategorized";

#[derive(Debug, Clone, Copy, Enum, Eq, PartialEq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ticket_status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    New,
    InProgress,
    WaitingOnCustomer,
    Resolved,
    Closed,
}

impl TicketStatus {
    pub fn label(&self) -> &'static str {
        match self {
            TicketStatus::New => "New",
            TicketStatus::InProgress => "In progress",
            TicketStatus::WaitingOnCustomer => "Waiting on customer",
            TicketStatus::Resolved => "Resolved",
            TicketStatus::Closed => "Closed",
        }
    }
}

#[derive(Debug, Clone, Copy, Enum, Eq, PartialEq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ticket_priority", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl TicketPriority {
    pub fn label(&self) -> &'static str {
        match self {
            TicketPriority::Low => "Low",
            TicketPriority::Medium => "Medium",
            TicketPriority::High => "High",
            TicketPriority::Urgent => "Urgent",
        }
    }
}

#[derive(Debug, Clone, Copy, Enum, Eq, PartialEq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "snapshot_period", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PeriodType {
    Daily,
    Weekly,
    Monthly,
}

impl PeriodType {
    /// First day after the period starting at `start`.
    pub fn period_end(&self, start: NaiveDate) -> NaiveDate {
        match self {
            PeriodType::Daily => start + Duration::days(1),
            PeriodType::Weekly => start + Duration::days(7),
            PeriodType::Monthly => start
                .checked_add_months(Months::new(1))
                .unwrap_or(NaiveDate::MAX),
        }
    }
}

/// Users and technicians active during a period, supplied by the ticket store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveCounts {
    pub active_users: u64,
    pub active_technicians: u64,
}

/// Immutable per-period summary of ticket activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, SimpleObject)]
#[graphql(complex)]
pub struct MetricSnapshot {
    pub id: Uuid,
    pub period_type: PeriodType,
    pub period_date: NaiveDate,
    pub opened_count: u64,
    pub resolved_count: u64,
    pub closed_count: u64,
    pub escalated_count: u64,
    pub mean_resolution_minutes: Option<f64>,
    /// Tickets resolved inside the period, the population behind `mean_resolution_minutes`.
    pub resolution_samples: u64,
    pub mean_satisfaction: Option<Decimal>,
    pub active_users: u64,
    pub active_technicians: u64,
    pub first_contact_resolution_rate: f64,
    pub tickets_by_priority: CountBreakdown,
    pub tickets_by_category: CountBreakdown,
    pub resolution_by_priority: DurationBreakdown,
    pub created_at: DateTime<Utc>,
}

impl MetricSnapshot {
    pub fn total_tickets(&self) -> u64 {
        self.opened_count + self.resolved_count + self.closed_count
    }

    pub fn resolution_rate(&self) -> f64 {
        percentage(self.resolved_count, self.total_tickets())
    }

    pub fn closure_rate(&self) -> f64 {
        percentage(self.closed_count, self.total_tickets())
    }
}

#[ComplexObject]
impl MetricSnapshot {
    #[graphql(name = "totalTickets")]
    async fn gql_total_tickets(&self) -> u64 {
        self.total_tickets()
    }

    #[graphql(name = "resolutionRate")]
    async fn gql_resolution_rate(&self) -> f64 {
        self.resolution_rate()
    }

    #[graphql(name = "closureRate")]
    async fn gql_closure_rate(&self) -> f64 {
        self.closure_rate()
    }
}

/// `part / total * 100`, or 0 when there is nothing to divide by.
pub fn percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

// Trend analysis structures

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, SimpleObject)]
pub struct TrendAnalysisResult {
    pub category_trends: Vec<CategoryTrend>,
    pub time_trend: Vec<TrendPoint>,
    pub recurring_problems: Vec<RecurringProblem>,
    pub statistics: AggregateStatistics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, SimpleObject)]
#[graphql(complex)]
pub struct CategoryTrend {
    pub category: String,
    pub count: u64,
    pub previous_count: u64,
    /// `None` marks a category with no tickets in the prior period.
    pub variation_percent: Option<f64>,
}

impl CategoryTrend {
    pub fn is_new_category(&self) -> bool {
        self.variation_percent.is_none()
    }
}

#[ComplexObject]
impl CategoryTrend {
    #[graphql(name = "isNewCategory")]
    async fn gql_is_new_category(&self) -> bool {
        self.is_new_category()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, SimpleObject)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub ticket_count: u64,
    pub mean_resolution_minutes: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, SimpleObject)]
pub struct RecurringProblem {
    pub description: String,
    pub frequency: u64,
    pub category: Option<String>,
    pub last_seen_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, SimpleObject)]
pub struct AggregateStatistics {
    pub total_tickets: u64,
    pub mean_resolution_minutes: f64,
    pub resolution_rate: f64,
    pub most_common_category: Option<String>,
}

// Notification structures

#[derive(Debug, Clone, Copy, Enum, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Role {
    Cliente,
    Tecnico,
    Administrador,
}

#[derive(Debug, Clone, Copy, Enum, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NotificationPriority {
    Baixa,
    Media,
    Alta,
    Urgente,
}

#[derive(Debug, Clone, Copy, Enum, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Channel {
    InApp,
    Email,
    Push,
    Sms,
}

#[derive(Debug, Clone, Copy, Enum, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    NewTicket,
    StatusChange,
    Escalation,
    HealthCheckDegradation,
}

#[derive(Debug, Clone, Copy, Enum, Eq, PartialEq, Serialize, Deserialize)]
pub enum DeliveryState {
    Created,
    Delivered,
    Failed,
    Cancelled,
}

/// The ticket fields a notification is rendered from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketSummary {
    pub id: Uuid,
    pub title: String,
    pub status: TicketStatus,
    pub priority: TicketPriority,
    pub requester_id: Option<Uuid>,
    pub technician_id: Option<Uuid>,
}

/// Domain events that may produce notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    NewTicket { ticket: TicketSummary },
    StatusChange { ticket: TicketSummary, previous: TicketStatus },
    Escalation { ticket: TicketSummary },
    HealthCheckDegradation { component: String, detail: String },
}

impl DomainEvent {
    pub fn notification_type(&self) -> NotificationType {
        match self {
            DomainEvent::NewTicket { .. } => NotificationType::NewTicket,
            DomainEvent::StatusChange { .. } => NotificationType::StatusChange,
            DomainEvent::Escalation { .. } => NotificationType::Escalation,
            DomainEvent::HealthCheckDegradation { .. } => NotificationType::HealthCheckDegradation,
        }
    }

    pub fn ticket(&self) -> Option<&TicketSummary> {
        match self {
            DomainEvent::NewTicket { ticket }
            | DomainEvent::StatusChange { ticket, .. }
            | DomainEvent::Escalation { ticket } => Some(ticket),
            DomainEvent::HealthCheckDegradation { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, SimpleObject)]
pub struct Notification {
    pub id: Uuid,
    pub recipient_id: Uuid,
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    pub priority: NotificationPriority,
    pub channel: Channel,
    pub read: bool,
    pub sent_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
    pub ticket_id: Option<Uuid>,
    pub action: Option<String>,
    pub delivery_state: DeliveryState,
    pub delivery_id: Option<String>,
    pub attempts: u32,
    pub error: Option<String>,
}

impl Notification {
    /// Only delivered notifications take part in the unread/read lifecycle.
    pub fn is_unread(&self) -> bool {
        self.delivery_state == DeliveryState::Delivered && !self.read
    }

    /// Flip to read. Returns false when already read, leaving `read_at` untouched.
    pub fn mark_read(&mut self, now: DateTime<Utc>) -> bool {
        if self.read {
            return false;
        }
        self.read = true;
        self.read_at = Some(now.max(self.sent_at));
        true
    }
}

/// Knowledge base article usage figures.
#[derive(Debug, Clone, Serialize, Deserialize, SimpleObject)]
pub struct KnowledgeArticle {
    pub id: Uuid,
    pub title: String,
    pub views: u64,
    pub rating: Option<Decimal>,
}

impl KnowledgeArticle {
    pub fn is_popular(&self, thresholds: &ArticleThresholds) -> bool {
        self.views > thresholds.popular_views
    }

    pub fn is_well_rated(&self, thresholds: &ArticleThresholds) -> bool {
        self.rating
            .map(|rating| rating >= thresholds.well_rated_score)
            .unwrap_or(false)
    }
}
