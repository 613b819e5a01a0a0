//! Device-local notification scheduling for task due dates.
//!
//! Works entirely against the local task cache and the platform bridge; the
//! server is never involved. Ids come from the shared derivation so that
//! re-scheduling replaces instead of duplicating, and the due/advance pair
//! for one task never collides.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Local, NaiveDate, TimeZone};
use tracing::{debug, warn};

use tasknest_shared::domain::Difficulty;
use tasknest_shared::notify::{advance_notification_id, due_notification_id};

use crate::bridge::{LocalNotification, PermissionState, PushBridge};

/// Local hour a due-date notification fires at.
const DUE_HOUR: u32 = 8;
/// Local hour an advance warning fires at.
const ADVANCE_HOUR: u32 = 9;
/// How many days before the due date the advance warning fires.
const ADVANCE_DAYS: i64 = 7;

pub struct LocalScheduler {
    bridge: Arc<dyn PushBridge>,
}

impl LocalScheduler {
    pub fn new(bridge: Arc<dyn PushBridge>) -> Self {
        Self { bridge }
    }

    /// Schedules the due-date notification for a task. Without notification
    /// permission this is a no-op, as is a due date whose slot already
    /// passed (except "due today", which fires immediately).
    pub async fn schedule_reminder(
        &self,
        task_id: &str,
        title: &str,
        details: &str,
        due_date: NaiveDate,
    ) {
        if !self.permitted().await {
            return;
        }
        let Some(fire_at) = due_fire_at(due_date, Local::now()) else {
            debug!(task_id, %due_date, "due slot already passed; not scheduling");
            return;
        };
        let body = if details.is_empty() {
            format!("\"{title}\" is due today")
        } else {
            details.to_string()
        };
        let notification = LocalNotification {
            id: due_notification_id(task_id),
            fire_at,
            title: title.to_string(),
            body,
            payload: payload_for(task_id),
        };
        if let Err(e) = self.bridge.schedule(notification).await {
            warn!(task_id, error=%e, "failed to schedule due notification");
        }
    }

    /// Schedules the 7-day advance warning. Easy tasks never get one; a
    /// warning slot in the past is skipped.
    pub async fn schedule_advance(
        &self,
        task_id: &str,
        title: &str,
        due_date: NaiveDate,
        difficulty: Difficulty,
    ) {
        if !self.permitted().await {
            return;
        }
        let Some(fire_at) = advance_fire_at(due_date, difficulty, Local::now()) else {
            debug!(task_id, %due_date, "no advance warning for this task");
            return;
        };
        let notification = LocalNotification {
            id: advance_notification_id(task_id),
            fire_at,
            title: "Big task coming up".to_string(),
            body: format!("\"{title}\" is due in 7 days"),
            payload: payload_for(task_id),
        };
        if let Err(e) = self.bridge.schedule(notification).await {
            warn!(task_id, error=%e, "failed to schedule advance notification");
        }
    }

    /// Cancels both notifications of a task. Unknown ids are a no-op.
    pub async fn cancel(&self, task_id: &str) {
        for id in [due_notification_id(task_id), advance_notification_id(task_id)] {
            if let Err(e) = self.bridge.cancel(id).await {
                warn!(task_id, id, error=%e, "failed to cancel notification");
            }
        }
    }

    async fn permitted(&self) -> bool {
        let granted = self.bridge.permission().await == PermissionState::Granted;
        if !granted {
            debug!("notification permission absent; local scheduling disabled");
        }
        granted
    }
}

fn payload_for(task_id: &str) -> HashMap<String, String> {
    HashMap::from([
        ("taskId".to_string(), task_id.to_string()),
        ("action".to_string(), "openReminder".to_string()),
    ])
}

/// Fire time of the due-date notification: due date at 08:00 local. Past
/// slots fire immediately when the task is due today and are skipped
/// otherwise.
fn due_fire_at<Tz: TimeZone>(due_date: NaiveDate, now: DateTime<Tz>) -> Option<DateTime<Tz>> {
    let slot = local_slot(due_date, DUE_HOUR, &now)?;
    if slot > now {
        Some(slot)
    } else if due_date == now.date_naive() {
        Some(now)
    } else {
        None
    }
}

/// Fire time of the advance warning: (due − 7 days) at 09:00 local, medium
/// and hard tasks only, never retroactive.
fn advance_fire_at<Tz: TimeZone>(
    due_date: NaiveDate,
    difficulty: Difficulty,
    now: DateTime<Tz>,
) -> Option<DateTime<Tz>> {
    if !difficulty.warrants_advance_notice() {
        return None;
    }
    let warn_day = due_date - Duration::days(ADVANCE_DAYS);
    let slot = local_slot(warn_day, ADVANCE_HOUR, &now)?;
    if slot > now { Some(slot) } else { None }
}

fn local_slot<Tz: TimeZone>(day: NaiveDate, hour: u32, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    let naive = day.and_hms_opt(hour, 0, 0)?;
    now.timezone().from_local_datetime(&naive).earliest()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::testing::FakeBridge;
    use chrono::FixedOffset;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(y, m, d, h, 0, 0)
            .unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn future_due_date_fires_at_eight_local() {
        let now = at(2026, 6, 10, 12);
        let fire = due_fire_at(day(2026, 6, 15), now).unwrap();
        assert_eq!(fire, at(2026, 6, 15, 8));
    }

    #[test]
    fn due_today_after_slot_fires_immediately() {
        let now = at(2026, 6, 15, 12);
        let fire = due_fire_at(day(2026, 6, 15), now).unwrap();
        assert_eq!(fire, now);
    }

    #[test]
    fn past_due_date_is_skipped() {
        let now = at(2026, 6, 15, 12);
        assert!(due_fire_at(day(2026, 6, 14), now).is_none());
    }

    #[test]
    fn advance_warning_fires_a_week_early_at_nine() {
        let now = at(2026, 6, 1, 12);
        let fire = advance_fire_at(day(2026, 6, 15), Difficulty::Hard, now).unwrap();
        assert_eq!(fire, at(2026, 6, 8, 9));
    }

    #[test]
    fn easy_tasks_never_get_an_advance_warning() {
        let now = at(2026, 6, 1, 12);
        for due in [day(2026, 6, 15), day(2026, 12, 24), day(2027, 1, 1)] {
            assert!(advance_fire_at(due, Difficulty::Easy, now).is_none());
        }
    }

    #[test]
    fn past_advance_slot_is_skipped() {
        let now = at(2026, 6, 10, 12);
        // Warning slot would be June 8th at 09:00, already gone
        assert!(advance_fire_at(day(2026, 6, 15), Difficulty::Medium, now).is_none());
    }

    #[tokio::test]
    async fn cancel_before_any_scheduling_is_a_no_op() {
        let bridge = FakeBridge::new(true, PermissionState::Granted);
        let scheduler = LocalScheduler::new(bridge.clone());

        scheduler.cancel("a3f9b2c1").await;

        let canceled = bridge.canceled.lock().unwrap().clone();
        assert_eq!(
            canceled,
            vec![
                due_notification_id("a3f9b2c1"),
                advance_notification_id("a3f9b2c1")
            ]
        );
    }

    #[tokio::test]
    async fn rescheduling_reuses_the_same_id() {
        let bridge = FakeBridge::new(true, PermissionState::Granted);
        let scheduler = LocalScheduler::new(bridge.clone());
        let due = Local::now().date_naive() + Duration::days(3);

        scheduler
            .schedule_reminder("a3f9b2c1", "Dishes", "", due)
            .await;
        scheduler
            .schedule_reminder("a3f9b2c1", "Dishes again", "", due)
            .await;

        let scheduled = bridge.scheduled.lock().unwrap();
        assert_eq!(scheduled.len(), 2);
        assert_eq!(scheduled[0].id, scheduled[1].id);
    }

    #[tokio::test]
    async fn without_permission_nothing_is_scheduled() {
        let bridge = FakeBridge::new(true, PermissionState::Denied);
        let scheduler = LocalScheduler::new(bridge.clone());
        let due = Local::now().date_naive() + Duration::days(3);

        scheduler
            .schedule_reminder("a3f9b2c1", "Dishes", "", due)
            .await;
        scheduler
            .schedule_advance("a3f9b2c1", "Dishes", due + Duration::days(30), Difficulty::Hard)
            .await;

        assert!(bridge.scheduled.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn due_and_advance_use_distinct_ids() {
        let bridge = FakeBridge::new(true, PermissionState::Granted);
        let scheduler = LocalScheduler::new(bridge.clone());
        let due = Local::now().date_naive() + Duration::days(30);

        scheduler
            .schedule_reminder("a3f9b2c1", "Garage", "", due)
            .await;
        scheduler
            .schedule_advance("a3f9b2c1", "Garage", due, Difficulty::Hard)
            .await;

        let scheduled = bridge.scheduled.lock().unwrap();
        assert_eq!(scheduled.len(), 2);
        assert_ne!(scheduled[0].id, scheduled[1].id);
    }
}
