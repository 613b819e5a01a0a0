use std::collections::{BTreeMap, HashMap};

use chrono::{Duration, Utc};
use chrono_tz::Tz;
use tracing::{debug, info, warn};

use crate::storage::{Store, StorageError, models::DueReminder};

use super::dispatch::DispatchService;

/// Counters reported by one scan run. `notifications_sent` counts dispatch
/// invocations attempted (one per affected user per class).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub due_today_users: usize,
    pub due_today_tasks: usize,
    pub upcoming_users: usize,
    pub upcoming_tasks: usize,
    pub notifications_sent: usize,
}

/// One sweep over the task store: pushes "due today" to every user with
/// pending tasks due now, and a "big task coming up" warning for medium/hard
/// tasks due in exactly seven days.
///
/// There is no dedupe ledger; re-running the scan on the same day re-sends
/// the same set. Per-user dispatch failures are logged and do not abort the
/// sweep.
pub async fn run(
    store: &Store,
    dispatch: &DispatchService,
    tz: Tz,
) -> Result<ScanSummary, StorageError> {
    let today = Utc::now().with_timezone(&tz).date_naive();
    let mut summary = ScanSummary::default();

    let due = store.due_reminders_on(today).await?;
    summary.due_today_tasks = due.len();
    let due_groups = group_by_user(due);
    summary.due_today_users = due_groups.len();
    for (user_id, tasks) in &due_groups {
        let (title, body, data) = due_today_message(tasks);
        summary.notifications_sent += 1;
        match dispatch
            .send(store, std::slice::from_ref(user_id), &title, &body, Some(&data))
            .await
        {
            Ok(s) => debug!(user_id = %user_id, sent = s.sent, "scan: due-today dispatched"),
            Err(e) => warn!(user_id = %user_id, error = %e, "scan: due-today dispatch failed"),
        }
    }

    let horizon = today + Duration::days(7);
    let upcoming = store.upcoming_advance_reminders_on(horizon).await?;
    summary.upcoming_tasks = upcoming.len();
    let upcoming_groups = group_by_user(upcoming);
    summary.upcoming_users = upcoming_groups.len();
    for (user_id, tasks) in &upcoming_groups {
        let (title, body, data) = upcoming_message(tasks);
        summary.notifications_sent += 1;
        match dispatch
            .send(store, std::slice::from_ref(user_id), &title, &body, Some(&data))
            .await
        {
            Ok(s) => debug!(user_id = %user_id, sent = s.sent, "scan: upcoming dispatched"),
            Err(e) => warn!(user_id = %user_id, error = %e, "scan: upcoming dispatch failed"),
        }
    }

    info!(
        due_today_users = summary.due_today_users,
        due_today_tasks = summary.due_today_tasks,
        upcoming_users = summary.upcoming_users,
        upcoming_tasks = summary.upcoming_tasks,
        notifications_sent = summary.notifications_sent,
        "due-task scan complete"
    );
    Ok(summary)
}

fn group_by_user(rows: Vec<DueReminder>) -> BTreeMap<String, Vec<DueReminder>> {
    let mut groups: BTreeMap<String, Vec<DueReminder>> = BTreeMap::new();
    for row in rows {
        groups.entry(row.user_id.clone()).or_default().push(row);
    }
    groups
}

fn joined_titles(tasks: &[DueReminder]) -> String {
    tasks
        .iter()
        .map(|t| t.title.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn due_today_message(tasks: &[DueReminder]) -> (String, String, HashMap<String, String>) {
    let title = "Tasks due today".to_string();
    if let [only] = tasks {
        let body = format!("\"{}\" is due today", only.title);
        let data = HashMap::from([
            ("taskId".to_string(), only.id.clone()),
            ("action".to_string(), "openReminder".to_string()),
        ]);
        (title, body, data)
    } else {
        let body = format!(
            "You have {} tasks due today: {}",
            tasks.len(),
            joined_titles(tasks)
        );
        let data = HashMap::from([("action".to_string(), "openDueList".to_string())]);
        (title, body, data)
    }
}

fn upcoming_message(tasks: &[DueReminder]) -> (String, String, HashMap<String, String>) {
    let title = "Big task coming up".to_string();
    if let [only] = tasks {
        let body = format!("\"{}\" is due in 7 days", only.title);
        let data = HashMap::from([
            ("taskId".to_string(), only.id.clone()),
            ("action".to_string(), "openReminder".to_string()),
        ]);
        (title, body, data)
    } else {
        let body = format!(
            "You have {} big tasks due in 7 days: {}",
            tasks.len(),
            joined_titles(tasks)
        );
        let data = HashMap::from([("action".to_string(), "openUpcoming".to_string())]);
        (title, body, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reminder(id: &str, user: &str, title: &str) -> DueReminder {
        DueReminder {
            id: id.to_string(),
            user_id: user.to_string(),
            title: title.to_string(),
            difficulty: "hard".to_string(),
        }
    }

    #[test]
    fn single_task_uses_singular_phrasing() {
        let tasks = vec![reminder("a1b2c3d4", "maria", "Mow the lawn")];
        let (_, body, data) = due_today_message(&tasks);
        assert_eq!(body, "\"Mow the lawn\" is due today");
        assert_eq!(data.get("taskId").unwrap(), "a1b2c3d4");
        assert_eq!(data.get("action").unwrap(), "openReminder");
    }

    #[test]
    fn multiple_tasks_use_count_and_joined_titles() {
        let tasks = vec![
            reminder("a1", "maria", "Dishes"),
            reminder("b2", "maria", "Laundry"),
            reminder("c3", "maria", "Vacuum"),
        ];
        let (_, body, data) = due_today_message(&tasks);
        assert_eq!(body, "You have 3 tasks due today: Dishes, Laundry, Vacuum");
        assert!(data.get("taskId").is_none());
        assert_eq!(data.get("action").unwrap(), "openDueList");
    }

    #[test]
    fn upcoming_phrasing_mentions_the_week() {
        let tasks = vec![reminder("d4", "jo", "Clean the garage")];
        let (title, body, _) = upcoming_message(&tasks);
        assert_eq!(title, "Big task coming up");
        assert_eq!(body, "\"Clean the garage\" is due in 7 days");
    }

    #[test]
    fn grouping_splits_rows_per_user() {
        let rows = vec![
            reminder("a1", "maria", "Dishes"),
            reminder("b2", "jo", "Laundry"),
            reminder("c3", "maria", "Vacuum"),
        ];
        let groups = group_by_user(rows);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups.get("maria").unwrap().len(), 2);
        assert_eq!(groups.get("jo").unwrap().len(), 1);
    }
}
