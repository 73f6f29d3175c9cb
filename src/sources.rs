//! Narrow interfaces to the collaborators this core consumes: the ticket
//! store, the user directory and the per-channel delivery transports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{ActiveCounts, Channel, PeriodType, Role, TicketEvent};
use crate::Result;

/// Source of ticket events and activity counts.
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Tickets opened, resolved or closed within `[start, end)`.
    async fn fetch_events(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<TicketEvent>>;

    /// Active users and technicians for the period.
    async fn fetch_active_counts(
        &self,
        period_type: PeriodType,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<ActiveCounts>;
}

/// Identity and preference lookups. `None` means the user is unknown.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn resolve_role(&self, user_id: Uuid) -> Result<Option<Role>>;

    /// Preferred channel, `None` when the user has not recorded one.
    async fn resolve_channel_preference(&self, user_id: Uuid) -> Result<Option<Channel>>;

    /// Address for the channel (email, phone number, device token).
    async fn resolve_address(&self, user_id: Uuid, channel: Channel) -> Result<Option<String>> {
        match channel {
            Channel::InApp => Ok(Some(user_id.to_string())),
            _ => Ok(None),
        }
    }
}

/// Failure reported by a delivery transport.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Transport timed out")]
    Timeout,

    #[error("Transport unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid recipient address: {0}")]
    InvalidAddress(String),

    #[error("Rejected by transport: {0}")]
    Rejected(String),
}

impl TransportError {
    /// Timeouts and server-side unavailability are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Timeout | TransportError::Unavailable(_))
    }
}

/// One delivery medium. Returns the transport's delivery id on success.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        recipient_address: &str,
        title: &str,
        body: &str,
    ) -> std::result::Result<String, TransportError>;
}
