use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};

use super::{API_V1_PREFIX, household_scope};

fn base_join(base: &str, path: &str) -> String {
    let b = base.trim_end_matches('/');
    let p = path.trim_start_matches('/');
    format!("{}/{}", b, p)
}

fn enc(s: &str) -> String {
    utf8_percent_encode(s, NON_ALPHANUMERIC).to_string()
}

pub fn auth_login(base: &str) -> String {
    base_join(base, &format!("{}/auth/login", API_V1_PREFIX))
}

pub fn member_devices(base: &str, household_id: &str, member_id: &str) -> String {
    base_join(
        base,
        &format!(
            "{}/members/{}/devices",
            household_scope(household_id),
            enc(member_id)
        ),
    )
}

pub fn dispatch(base: &str, household_id: &str) -> String {
    base_join(
        base,
        &format!("{}/notifications/dispatch", household_scope(household_id)),
    )
}

pub fn due_scan(base: &str, household_id: &str) -> String {
    base_join(
        base,
        &format!("{}/jobs/due-scan", household_scope(household_id)),
    )
}
