//! # helpdesk-insights
//!
//! Analytics and notification core for a helpdesk platform.
//!
//! ## Features
//!
//! - **Metric Snapshots** - Immutable per-period summaries of ticket activity
//! - **Trend Analysis** - Category variation, time series and recurring problems
//! - **Notifications** - Prioritized, multi-channel dispatch with retry and cancellation
//! - **Role Policy** - Static role to capability table
//! - **Repository Pattern** - PostgreSQL ticket store and snapshot persistence
//! - **GraphQL API** - Queries and mutations a host service merges into its schema
//!
//! ## Usage
//!
//! ### Building a snapshot
//!
//! ```rust
//! use chrono::{TimeZone, Utc};
//! use helpdesk_insights::{ActiveCounts, PeriodType, SnapshotBuilder, SnapshotWindow};
//!
//! let window = SnapshotWindow::new(
//!     Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
//!     Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
//! )
//! .unwrap();
//!
//! let snapshot = SnapshotBuilder::default()
//!     .build(&window, PeriodType::Daily, &[], ActiveCounts::default())
//!     .unwrap();
//! assert_eq!(snapshot.resolution_rate(), 0.0);
//! ```
//!
//! ### In a Service
//!
//! ```rust,no_run
//! use helpdesk_insights::{InsightsQueries, InsightsMutations, PgInsightsRepository};
//! use sqlx::PgPool;
//! use std::sync::Arc;
//!
//! # async fn example(db_pool: PgPool) {
//! let repo = Arc::new(PgInsightsRepository::new(db_pool.clone()));
//!
//! // Schema::build(QueryRoot, MutationRoot, EmptySubscription)
//! //     .data(repo)
//! //     .data(inbox)
//! //     .finish()
//! # }
//! ```

pub mod breakdown;
pub mod config;
pub mod dispatcher;
pub mod graphql;
pub mod models;
pub mod repository;
pub mod roles;
pub mod snapshot;
pub mod sources;
pub mod trends;

// Re-export commonly used types
pub use breakdown::{BreakdownMap, CountBreakdown, DurationBreakdown};
pub use config::{AnalyticsConfig, ArticleThresholds, DispatchConfig, InsightsConfig, RetryPolicy};
pub use dispatcher::{
    DispatchCancellation, DispatchReport, DeliveryFailure, MarkReadOutcome, NotificationDispatcher,
    NotificationInbox,
};
pub use graphql::{InsightsMutations, InsightsQueries};
pub use models::*;
pub use repository::PgInsightsRepository;
pub use roles::{capabilities_for, Capabilities};
pub use snapshot::{SnapshotBuilder, SnapshotWindow};
pub use sources::{TicketStore, Transport, TransportError, UserDirectory};
pub use trends::TrendAnalyzer;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

/// Analytics and notification errors
#[derive(Error, Debug)]
pub enum InsightsError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Invalid window: end {end} is not after start {start}")]
    InvalidWindow {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("Malformed persisted data: {0}")]
    MalformedPersistedData(String),

    #[error("Transient transport failure: {0}")]
    TransientTransportFailure(String),

    #[error("Permanent delivery failure for notification {notification_id}: {reason}")]
    PermanentDeliveryFailure {
        notification_id: Uuid,
        reason: String,
    },

    #[error("Unknown recipient: {0}")]
    UnknownRecipient(Uuid),

    #[error("Notification not found: {0}")]
    NotificationNotFound(Uuid),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, InsightsError>;
