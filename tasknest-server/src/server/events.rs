use std::collections::HashMap;

use tracing::debug;

use crate::storage::Store;

use super::dispatch::{BestEffortDispatch, DeliverySummary};

/// Translates domain events into single-recipient pushes. Every send goes
/// through [`BestEffortDispatch`]: the domain action that raised the event
/// has already succeeded and is never rolled back or blocked by delivery.
#[derive(Clone)]
pub struct EventNotifier {
    dispatch: BestEffortDispatch,
    store: Store,
}

impl EventNotifier {
    pub fn new(dispatch: BestEffortDispatch, store: Store) -> Self {
        Self { dispatch, store }
    }

    /// A reminder was created for someone other than its creator.
    pub async fn reminder_created(
        &self,
        creator_id: &str,
        assignee_id: &str,
        task_id: &str,
        task_title: &str,
    ) -> DeliverySummary {
        if creator_id == assignee_id {
            return DeliverySummary::default();
        }
        let actor = self.display_name(creator_id).await;
        let body = format!("{actor} added \"{task_title}\" to your list");
        self.notify(assignee_id, "New task for you", &body, task_id)
            .await
    }

    /// A task was handed to a new owner.
    pub async fn task_reassigned(
        &self,
        actor_id: &str,
        new_owner_id: &str,
        task_id: &str,
        task_title: &str,
    ) -> DeliverySummary {
        if actor_id == new_owner_id {
            return DeliverySummary::default();
        }
        let actor = self.display_name(actor_id).await;
        let body = format!("{actor} assigned \"{task_title}\" to you");
        self.notify(new_owner_id, "Task reassigned to you", &body, task_id)
            .await
    }

    /// A task was completed by someone other than its assigned owner; the
    /// person who handed it out gets told.
    pub async fn task_completed(
        &self,
        completer_id: &str,
        assignor_id: &str,
        task_id: &str,
        task_title: &str,
    ) -> DeliverySummary {
        if completer_id == assignor_id {
            return DeliverySummary::default();
        }
        let actor = self.display_name(completer_id).await;
        let body = format!("{actor} completed \"{task_title}\"");
        self.notify(assignor_id, "Task completed", &body, task_id)
            .await
    }

    async fn notify(
        &self,
        recipient_id: &str,
        title: &str,
        body: &str,
        task_id: &str,
    ) -> DeliverySummary {
        let data = HashMap::from([
            ("taskId".to_string(), task_id.to_string()),
            ("action".to_string(), "openReminder".to_string()),
        ]);
        let summary = self
            .dispatch
            .send(&[recipient_id.to_string()], title, body, Some(&data))
            .await;
        debug!(
            recipient = %recipient_id,
            sent = summary.sent,
            total = summary.total_tokens,
            "event notification dispatched"
        );
        summary
    }

    async fn display_name(&self, user_id: &str) -> String {
        match self.store.member_display_name(user_id).await {
            Ok(Some(name)) => name,
            _ => user_id.to_string(),
        }
    }
}
