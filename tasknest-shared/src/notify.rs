//! Deterministic local-notification id derivation.
//!
//! A task maps to a stable pair of platform notification ids: the due-date
//! notification uses `due_notification_id(task_id)` and its paired advance
//! warning uses the next integer. Re-scheduling a task therefore replaces the
//! existing entry instead of stacking duplicates.

/// Derives the due-date notification id for a task.
///
/// The leading hexadecimal digits of the identifier (at most 8) are
/// interpreted as a base-16 integer; the first non-hex character stops the
/// scan. An identifier with no leading hex digits maps to 0.
pub fn due_notification_id(task_id: &str) -> u32 {
    let prefix: String = task_id
        .chars()
        .take_while(|c| c.is_ascii_hexdigit())
        .take(8)
        .collect();
    if prefix.is_empty() {
        return 0;
    }
    u32::from_str_radix(&prefix, 16).unwrap_or(0)
}

/// Id of the advance-warning notification paired with a task.
pub fn advance_notification_id(task_id: &str) -> u32 {
    due_notification_id(task_id).wrapping_add(1)
}
