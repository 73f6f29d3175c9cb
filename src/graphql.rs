//! GraphQL API for helpdesk analytics and notifications
//!
//! Provides InsightsQueries and InsightsMutations that can be merged
//! into any service's GraphQL schema.
//!
//! ## Usage in Services
//!
//! Services should provide `Arc<PgInsightsRepository>`, `Arc<NotificationInbox>`
//! and `Arc<InsightsConfig>` in the GraphQL context.
//!
//! Authorization checks should be done by the service layer before
//! delegating to these resolvers; `capabilities` exposes the role policy
//! for that purpose.

use async_graphql::{Context, Object, Result as GraphQLResult};
use chrono::NaiveDate;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::InsightsConfig;
use crate::dispatcher::NotificationInbox;
use crate::models::{MetricSnapshot, Notification, PeriodType, Role, TrendAnalysisResult};
use crate::repository::PgInsightsRepository;
use crate::roles::{capabilities_for, Capabilities};
use crate::sources::TicketStore;
use crate::trends::TrendAnalyzer;

pub struct InsightsQueries;

#[Object(name = "Query", extends)]
impl InsightsQueries {
    /// Metric snapshots of one period type, oldest first
    ///
    /// Note: Services should implement admin-only authorization before calling this
    async fn metric_snapshots(
        &self,
        ctx: &Context<'_>,
        period_type: PeriodType,
        from: NaiveDate,
        to: NaiveDate,
    ) -> GraphQLResult<Vec<MetricSnapshot>> {
        let repo = ctx.data::<Arc<PgInsightsRepository>>()?;

        let snapshots = repo.list_snapshots(period_type, from, to).await?;
        Ok(snapshots)
    }

    /// Category trends, time series and recurring problems over a snapshot range
    async fn trend_analysis(
        &self,
        ctx: &Context<'_>,
        period_type: PeriodType,
        from: NaiveDate,
        to: NaiveDate,
    ) -> GraphQLResult<TrendAnalysisResult> {
        let repo = ctx.data::<Arc<PgInsightsRepository>>()?;
        let config = ctx.data::<Arc<InsightsConfig>>()?;

        let snapshots = repo.list_snapshots(period_type, from, to).await?;
        let (Some(first), Some(last)) = (snapshots.first(), snapshots.last()) else {
            return Ok(TrendAnalysisResult::default());
        };

        let start = first.period_date.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc();
        let end = period_type
            .period_end(last.period_date)
            .and_hms_opt(0, 0, 0)
            .unwrap_or_default()
            .and_utc();
        let tickets = repo.fetch_events(start, end).await?;

        Ok(TrendAnalyzer::new(&config.analytics).analyze(&snapshots, &tickets))
    }

    /// Capability flags for a role
    async fn capabilities(&self, role: Role) -> Capabilities {
        capabilities_for(role)
    }

    /// Notifications for a user, newest first
    ///
    /// Note: Services should verify the caller is the recipient
    async fn notifications(
        &self,
        ctx: &Context<'_>,
        user_id: Uuid,
        unread_only: Option<bool>,
    ) -> GraphQLResult<Vec<Notification>> {
        let inbox = ctx.data::<Arc<NotificationInbox>>()?;

        Ok(inbox.for_user(user_id, unread_only.unwrap_or(false)).await)
    }

    /// Number of unread notifications for a user
    async fn unread_notification_count(&self, ctx: &Context<'_>, user_id: Uuid) -> GraphQLResult<usize> {
        let inbox = ctx.data::<Arc<NotificationInbox>>()?;

        Ok(inbox.unread_count(user_id).await)
    }
}

pub struct InsightsMutations;

#[Object(name = "Mutation", extends)]
impl InsightsMutations {
    /// Mark a notification as read; marking it again changes nothing
    async fn mark_notification_read(&self, ctx: &Context<'_>, id: Uuid) -> GraphQLResult<Notification> {
        let inbox = ctx.data::<Arc<NotificationInbox>>()?;

        let outcome = inbox.mark_read(id).await?;
        Ok(outcome.into_notification())
    }

    /// Mark all of a user's notifications as read, returning how many changed
    async fn mark_all_notifications_read(&self, ctx: &Context<'_>, user_id: Uuid) -> GraphQLResult<usize> {
        let inbox = ctx.data::<Arc<NotificationInbox>>()?;

        Ok(inbox.mark_all_read(user_id).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_graphql::{EmptySubscription, Schema};

    #[tokio::test]
    async fn capabilities_query_resolves_without_context() {
        let schema = Schema::build(InsightsQueries, InsightsMutations, EmptySubscription).finish();

        let response = schema
            .execute("{ capabilities(role: TECNICO) { canManageUsers canViewAllTickets } }")
            .await;

        assert!(response.errors.is_empty(), "{:?}", response.errors);
        let data = response.data.into_json().unwrap();
        assert_eq!(data["capabilities"]["canManageUsers"], false);
        assert_eq!(data["capabilities"]["canViewAllTickets"], true);
    }

    #[tokio::test]
    async fn mark_read_mutation_is_idempotent() {
        use crate::models::{Channel, DeliveryState, NotificationPriority, NotificationType};
        use chrono::Utc;

        let inbox = Arc::new(NotificationInbox::new());
        let id = Uuid::new_v4();
        inbox
            .record(Notification {
                id,
                recipient_id: Uuid::new_v4(),
                kind: NotificationType::StatusChange,
                title: "Ticket updated".to_string(),
                message: "Resolved".to_string(),
                priority: NotificationPriority::Baixa,
                channel: Channel::InApp,
                read: false,
                sent_at: Utc::now(),
                read_at: None,
                ticket_id: None,
                action: None,
                delivery_state: DeliveryState::Delivered,
                delivery_id: None,
                attempts: 1,
                error: None,
            })
            .await;

        let schema = Schema::build(InsightsQueries, InsightsMutations, EmptySubscription)
            .data(Arc::clone(&inbox))
            .finish();
        let mutation = format!(r#"mutation {{ markNotificationRead(id: "{}") {{ read readAt }} }}"#, id);

        let first = schema.execute(mutation.as_str()).await;
        assert!(first.errors.is_empty(), "{:?}", first.errors);
        let second = schema.execute(mutation.as_str()).await;
        assert!(second.errors.is_empty(), "{:?}", second.errors);

        let first = first.data.into_json().unwrap();
        let second = second.data.into_json().unwrap();
        assert_eq!(first["markNotificationRead"]["read"], true);
        assert_eq!(first["markNotificationRead"]["readAt"], second["markNotificationRead"]["readAt"]);
    }
}
