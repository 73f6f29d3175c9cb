//! Notification dispatcher.
//!
//! Turns domain events into prioritized notifications, delivers them over
//! the recipient's preferred channel and keeps them queryable in the
//! [`NotificationInbox`]. Deliveries for one event fan out concurrently
//! through a fixed-size permit pool; each transport call is retried with
//! backoff while its failure is transient.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{watch, RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{DispatchConfig, NotificationTemplate, RetryPolicy};
use crate::models::{
    Channel, DeliveryState, DomainEvent, Notification, NotificationPriority, NotificationType,
    TicketPriority,
};
use crate::roles::capabilities_for;
use crate::sources::{Transport, TransportError, UserDirectory};
use crate::{InsightsError, Result};

/// Cooperative cancellation for an in-flight dispatch.
///
/// Cancelling stops new transport calls (including retries); calls already
/// started run to completion.
#[derive(Debug, Clone)]
pub struct DispatchCancellation {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for DispatchCancellation {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchCancellation {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

/// In-memory notification store. All read-flag changes go through `mark_read`.
#[derive(Debug, Default)]
pub struct NotificationInbox {
    notifications: RwLock<HashMap<Uuid, Notification>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MarkReadOutcome {
    Marked(Notification),
    AlreadyRead(Notification),
}

impl MarkReadOutcome {
    pub fn into_notification(self) -> Notification {
        match self {
            MarkReadOutcome::Marked(notification) | MarkReadOutcome::AlreadyRead(notification) => {
                notification
            }
        }
    }
}

impl NotificationInbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, notification: Notification) {
        self.notifications
            .write()
            .await
            .insert(notification.id, notification);
    }

    pub async fn get(&self, notification_id: Uuid) -> Result<Notification> {
        self.notifications
            .read()
            .await
            .get(&notification_id)
            .cloned()
            .ok_or(InsightsError::NotificationNotFound(notification_id))
    }

    /// A user's notifications, newest first. `unread_only` keeps delivered,
    /// unread ones; failed and cancelled deliveries are never unread.
    pub async fn for_user(&self, user_id: Uuid, unread_only: bool) -> Vec<Notification> {
        let mut notifications: Vec<Notification> = self
            .notifications
            .read()
            .await
            .values()
            .filter(|n| n.recipient_id == user_id && (!unread_only || n.is_unread()))
            .cloned()
            .collect();
        notifications.sort_by(|a, b| b.sent_at.cmp(&a.sent_at).then_with(|| a.id.cmp(&b.id)));
        notifications
    }

    pub async fn unread_count(&self, user_id: Uuid) -> usize {
        self.notifications
            .read()
            .await
            .values()
            .filter(|n| n.recipient_id == user_id && n.is_unread())
            .count()
    }

    /// Idempotent; concurrent calls on one notification yield exactly one `Marked`.
    pub async fn mark_read(&self, notification_id: Uuid) -> Result<MarkReadOutcome> {
        let mut notifications = self.notifications.write().await;
        let notification = notifications
            .get_mut(&notification_id)
            .ok_or(InsightsError::NotificationNotFound(notification_id))?;

        if notification.mark_read(Utc::now()) {
            debug!(notification_id = %notification_id, "Notification marked as read");
            Ok(MarkReadOutcome::Marked(notification.clone()))
        } else {
            Ok(MarkReadOutcome::AlreadyRead(notification.clone()))
        }
    }

    /// Mark every unread notification of a user; returns how many changed.
    pub async fn mark_all_read(&self, user_id: Uuid) -> usize {
        let now = Utc::now();
        let mut notifications = self.notifications.write().await;
        notifications
            .values_mut()
            .filter(|n| n.recipient_id == user_id && n.is_unread())
            .map(|n| n.mark_read(now))
            .filter(|changed| *changed)
            .count()
    }
}

/// A delivery that ended in a permanent failure.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryFailure {
    pub notification_id: Uuid,
    pub recipient_id: Uuid,
    pub channel: Channel,
    pub attempts: u32,
    pub reason: String,
}

impl DeliveryFailure {
    pub fn into_error(self) -> InsightsError {
        InsightsError::PermanentDeliveryFailure {
            notification_id: self.notification_id,
            reason: self.reason,
        }
    }
}

/// Result of dispatching one event.
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    /// Every notification created for the event, in recipient order
    pub notifications: Vec<Notification>,
    pub failures: Vec<DeliveryFailure>,
    pub cancelled: usize,
}

impl DispatchReport {
    pub fn delivered(&self) -> impl Iterator<Item = &Notification> {
        self.notifications
            .iter()
            .filter(|n| n.delivery_state == DeliveryState::Delivered)
    }
}

enum DeliveryOutcome {
    Delivered { delivery_id: String, attempts: u32 },
    Failed { reason: String, attempts: u32 },
    Cancelled { attempts: u32 },
}

struct PlannedDelivery {
    recipient_id: Uuid,
    channel: Channel,
    address: Option<String>,
}

pub struct NotificationDispatcher {
    directory: Arc<dyn UserDirectory>,
    transports: HashMap<Channel, Arc<dyn Transport>>,
    inbox: Arc<NotificationInbox>,
    templates: HashMap<NotificationType, NotificationTemplate>,
    retry: RetryPolicy,
    permits: Arc<Semaphore>,
}

impl NotificationDispatcher {
    pub fn new(config: &DispatchConfig, directory: Arc<dyn UserDirectory>, inbox: Arc<NotificationInbox>) -> Self {
        info!(
            max_concurrency = config.max_concurrency,
            max_attempts = config.retry.max_attempts,
            "Notification dispatcher initialized"
        );

        Self {
            directory,
            transports: HashMap::new(),
            inbox,
            templates: config.templates.clone(),
            retry: config.retry.clone(),
            permits: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
        }
    }

    /// Register the transport for a channel. In-app delivery falls back to the inbox.
    pub fn with_transport(mut self, channel: Channel, transport: Arc<dyn Transport>) -> Self {
        self.transports.insert(channel, transport);
        self
    }

    pub fn inbox(&self) -> &Arc<NotificationInbox> {
        &self.inbox
    }

    /// Eligible recipients for an event.
    ///
    /// Ticket events reach the assigned technician; status changes also reach
    /// the requester. New tickets and escalations reach every staff member who
    /// can view all tickets; health-check degradation reaches user managers.
    pub async fn recipients_for(&self, event: &DomainEvent, staff: &[Uuid]) -> Result<Vec<Uuid>> {
        let mut seen = HashSet::new();
        let mut recipients = Vec::new();
        let mut push = |user_id: Uuid| {
            if seen.insert(user_id) {
                recipients.push(user_id);
            }
        };

        if let Some(ticket) = event.ticket() {
            if let Some(technician_id) = ticket.technician_id {
                push(technician_id);
            }
            if let (DomainEvent::StatusChange { .. }, Some(requester_id)) = (event, ticket.requester_id) {
                push(requester_id);
            }
        }

        for &user_id in staff {
            let role = self
                .directory
                .resolve_role(user_id)
                .await?
                .ok_or(InsightsError::UnknownRecipient(user_id))?;
            let capabilities = capabilities_for(role);

            let eligible = match event {
                DomainEvent::NewTicket { .. } | DomainEvent::Escalation { .. } => {
                    capabilities.can_view_all_tickets
                }
                DomainEvent::HealthCheckDegradation { .. } => capabilities.can_manage_users,
                DomainEvent::StatusChange { .. } => false,
            };
            if eligible {
                push(user_id);
            }
        }

        Ok(recipients)
    }

    /// Notify `recipients` about `event`.
    ///
    /// Every recipient is resolved before anything is created, so an unknown
    /// recipient fails the whole dispatch with no partial notifications.
    /// Delivery failures are reported per notification, never as an `Err`.
    pub async fn dispatch(
        &self,
        event: &DomainEvent,
        recipients: &[Uuid],
        cancel: &DispatchCancellation,
    ) -> Result<DispatchReport> {
        let kind = event.notification_type();
        let template = self.templates.get(&kind).ok_or_else(|| {
            InsightsError::Configuration(format!("No notification template for {:?}", kind))
        })?;

        let mut plan = Vec::with_capacity(recipients.len());
        for &recipient_id in recipients {
            if self.directory.resolve_role(recipient_id).await?.is_none() {
                return Err(InsightsError::UnknownRecipient(recipient_id));
            }
            let channel = self
                .directory
                .resolve_channel_preference(recipient_id)
                .await?
                .unwrap_or(Channel::InApp);
            let address = self.directory.resolve_address(recipient_id, channel).await?;
            plan.push(PlannedDelivery { recipient_id, channel, address });
        }

        let priority = priority_for(event);
        let (title, message) = template.render(&template_vars(event));
        let ticket_id = event.ticket().map(|ticket| ticket.id);
        let action = action_for(event);

        let mut tasks = JoinSet::new();
        let mut in_flight = HashMap::with_capacity(plan.len());
        for (index, planned) in plan.into_iter().enumerate() {
            let notification = Notification {
                id: Uuid::new_v4(),
                recipient_id: planned.recipient_id,
                kind,
                title: title.clone(),
                message: message.clone(),
                priority,
                channel: planned.channel,
                read: false,
                sent_at: Utc::now(),
                read_at: None,
                ticket_id,
                action: action.clone(),
                delivery_state: DeliveryState::Created,
                delivery_id: None,
                attempts: 0,
                error: None,
            };

            let transport = self.transports.get(&planned.channel).cloned();
            let permits = Arc::clone(&self.permits);
            let retry = self.retry.clone();
            let cancel = cancel.clone();

            let pending = notification.clone();
            let handle = tasks.spawn(async move {
                let outcome = match permits.acquire_owned().await {
                    Ok(_permit) => {
                        deliver(&notification, transport, planned.address, &retry, &cancel).await
                    }
                    Err(_) => DeliveryOutcome::Cancelled { attempts: 0 },
                };
                (index, notification, outcome)
            });
            in_flight.insert(handle.id(), (index, pending));
        }

        let mut finished = Vec::with_capacity(recipients.len());
        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((task_id, done)) => {
                    in_flight.remove(&task_id);
                    finished.push(done);
                }
                Err(e) => {
                    error!(error = %e, "Notification delivery task failed");
                    if let Some((index, notification)) = in_flight.remove(&e.id()) {
                        let outcome = DeliveryOutcome::Failed {
                            reason: format!("delivery task failed: {}", e),
                            attempts: 0,
                        };
                        finished.push((index, notification, outcome));
                    }
                }
            }
        }
        finished.sort_by_key(|(index, _, _)| *index);

        let mut report = DispatchReport::default();
        for (_, mut notification, outcome) in finished {
            match outcome {
                DeliveryOutcome::Delivered { delivery_id, attempts } => {
                    notification.delivery_state = DeliveryState::Delivered;
                    notification.delivery_id = Some(delivery_id);
                    notification.attempts = attempts;
                    notification.sent_at = Utc::now();
                }
                DeliveryOutcome::Failed { reason, attempts } => {
                    notification.delivery_state = DeliveryState::Failed;
                    notification.attempts = attempts;
                    notification.error = Some(reason.clone());
                    report.failures.push(DeliveryFailure {
                        notification_id: notification.id,
                        recipient_id: notification.recipient_id,
                        channel: notification.channel,
                        attempts,
                        reason,
                    });
                }
                DeliveryOutcome::Cancelled { attempts } => {
                    notification.delivery_state = DeliveryState::Cancelled;
                    notification.attempts = attempts;
                    report.cancelled += 1;
                }
            }

            self.inbox.record(notification.clone()).await;
            report.notifications.push(notification);
        }

        info!(
            kind = ?kind,
            priority = ?priority,
            notifications = report.notifications.len(),
            failures = report.failures.len(),
            cancelled = report.cancelled,
            "Dispatched notifications"
        );

        Ok(report)
    }
}

/// Escalations and urgent tickets are always urgent; the rest follow a fixed table.
pub fn priority_for(event: &DomainEvent) -> NotificationPriority {
    use NotificationPriority::*;

    match event {
        DomainEvent::Escalation { .. } => Urgente,
        DomainEvent::HealthCheckDegradation { .. } => Alta,
        DomainEvent::NewTicket { ticket } => match ticket.priority {
            TicketPriority::Low => Baixa,
            TicketPriority::Medium => Media,
            TicketPriority::High => Alta,
            TicketPriority::Urgent => Urgente,
        },
        DomainEvent::StatusChange { ticket, .. } => match ticket.priority {
            TicketPriority::Low | TicketPriority::Medium => Baixa,
            TicketPriority::High => Media,
            TicketPriority::Urgent => Urgente,
        },
    }
}

fn template_vars(event: &DomainEvent) -> HashMap<&'static str, String> {
    let mut vars = HashMap::new();
    match event {
        DomainEvent::HealthCheckDegradation { component, detail } => {
            vars.insert("component", component.clone());
            vars.insert("detail", detail.clone());
        }
        DomainEvent::NewTicket { ticket }
        | DomainEvent::StatusChange { ticket, .. }
        | DomainEvent::Escalation { ticket } => {
            vars.insert("ticket_id", ticket.id.to_string());
            vars.insert("title", ticket.title.clone());
            vars.insert("status", ticket.status.label().to_string());
        }
    }
    if let DomainEvent::StatusChange { previous, .. } = event {
        vars.insert("previous_status", previous.label().to_string());
    }
    vars
}

fn action_for(event: &DomainEvent) -> Option<String> {
    match event {
        DomainEvent::HealthCheckDegradation { component, .. } => Some(format!("view_health:{}", component)),
        _ => event.ticket().map(|ticket| format!("open_ticket:{}", ticket.id)),
    }
}

async fn deliver(
    notification: &Notification,
    transport: Option<Arc<dyn Transport>>,
    address: Option<String>,
    retry: &RetryPolicy,
    cancel: &DispatchCancellation,
) -> DeliveryOutcome {
    if cancel.is_cancelled() {
        return DeliveryOutcome::Cancelled { attempts: 0 };
    }

    let transport = match transport {
        Some(transport) => transport,
        // The inbox itself is the in-app delivery medium
        None if notification.channel == Channel::InApp => {
            return DeliveryOutcome::Delivered {
                delivery_id: notification.id.to_string(),
                attempts: 1,
            };
        }
        None => {
            return DeliveryOutcome::Failed {
                reason: format!("No transport configured for {:?}", notification.channel),
                attempts: 0,
            };
        }
    };

    let Some(address) = address else {
        warn!(
            notification_id = %notification.id,
            recipient_id = %notification.recipient_id,
            channel = ?notification.channel,
            "No address on record for recipient"
        );
        return DeliveryOutcome::Failed {
            reason: TransportError::InvalidAddress(format!("no {:?} address on record", notification.channel))
                .to_string(),
            attempts: 0,
        };
    };

    let max_attempts = retry.max_attempts.max(1);
    for attempt in 1..=max_attempts {
        if attempt > 1 {
            let delay = retry.backoff_for(attempt);
            debug!(
                notification_id = %notification.id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying notification"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    return DeliveryOutcome::Cancelled { attempts: attempt - 1 };
                }
            }
        }
        if cancel.is_cancelled() {
            return DeliveryOutcome::Cancelled { attempts: attempt - 1 };
        }

        match transport
            .send(&address, &notification.title, &notification.message)
            .await
        {
            Ok(delivery_id) => {
                debug!(
                    notification_id = %notification.id,
                    channel = ?notification.channel,
                    attempts = attempt,
                    "Notification delivered"
                );
                return DeliveryOutcome::Delivered { delivery_id, attempts: attempt };
            }
            Err(e) if e.is_transient() && attempt < max_attempts => {
                warn!(
                    notification_id = %notification.id,
                    attempt,
                    error = %e,
                    "Transient delivery failure"
                );
            }
            Err(e) => {
                let reason = if e.is_transient() {
                    InsightsError::TransientTransportFailure(e.to_string()).to_string()
                        + &format!(" (gave up after {} attempts)", attempt)
                } else {
                    e.to_string()
                };
                error!(
                    notification_id = %notification.id,
                    channel = ?notification.channel,
                    attempts = attempt,
                    error = %reason,
                    "Notification delivery failed permanently"
                );
                return DeliveryOutcome::Failed { reason, attempts: attempt };
            }
        }
    }

    // The loop returns on every path when max_attempts >= 1
    DeliveryOutcome::Failed {
        reason: "retry budget exhausted".to_string(),
        attempts: max_attempts,
    }
}
