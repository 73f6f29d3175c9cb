use async_trait::async_trait;
use helpdesk_insights::{
    Channel, DeliveryState, DispatchCancellation, DispatchConfig, DomainEvent, NotificationDispatcher,
    NotificationInbox, NotificationPriority, Result, Role, TicketPriority, TicketStatus, TicketSummary,
    Transport, TransportError, UserDirectory,
};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

struct EmailUser {
    id: Uuid,
}

#[async_trait]
impl UserDirectory for EmailUser {
    async fn resolve_role(&self, user_id: Uuid) -> Result<Option<Role>> {
        Ok((user_id == self.id).then_some(Role::Tecnico))
    }

    async fn resolve_channel_preference(&self, user_id: Uuid) -> Result<Option<Channel>> {
        Ok((user_id == self.id).then_some(Channel::Email))
    }

    async fn resolve_address(&self, user_id: Uuid, channel: Channel) -> Result<Option<String>> {
        Ok((user_id == self.id && channel == Channel::Email).then(|| "tech@helpdesk.test".to_string()))
    }
}

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<(String, String, String)>>,
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(
        &self,
        recipient_address: &str,
        title: &str,
        body: &str,
    ) -> std::result::Result<String, TransportError> {
        let mut sent = self.sent.lock().unwrap();
        sent.push((recipient_address.to_string(), title.to_string(), body.to_string()));
        Ok(format!("smtp-{}", sent.len()))
    }
}

#[tokio::test]
async fn urgent_escalation_reaches_email_recipient() -> anyhow::Result<()> {
    let technician = Uuid::new_v4();
    let email = Arc::new(RecordingTransport::default());
    let inbox = Arc::new(NotificationInbox::new());

    let dispatcher = NotificationDispatcher::new(
        &DispatchConfig::default(),
        Arc::new(EmailUser { id: technician }),
        Arc::clone(&inbox),
    )
    .with_transport(Channel::Email, email.clone());

    let ticket = TicketSummary {
        id: Uuid::new_v4(),
        title: "Payroll server down".to_string(),
        status: TicketStatus::InProgress,
        priority: TicketPriority::Urgent,
        requester_id: None,
        technician_id: Some(technician),
    };
    let event = DomainEvent::Escalation { ticket: ticket.clone() };

    let recipients = dispatcher.recipients_for(&event, &[]).await?;
    assert_eq!(recipients, vec![technician]);

    let report = dispatcher
        .dispatch(&event, &recipients, &DispatchCancellation::new())
        .await?;

    assert_eq!(report.notifications.len(), 1);
    let notification = &report.notifications[0];
    assert_eq!(notification.priority, NotificationPriority::Urgente);
    assert_eq!(notification.channel, Channel::Email);
    assert_eq!(notification.delivery_state, DeliveryState::Delivered);
    assert_eq!(notification.ticket_id, Some(ticket.id));
    assert!(!notification.read);

    let sent = email.sent.lock().unwrap().clone();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, "tech@helpdesk.test");
    assert!(sent[0].2.contains(&ticket.id.to_string()));

    assert_eq!(inbox.unread_count(technician).await, 1);
    Ok(())
}
