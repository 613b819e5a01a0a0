use crate::storage::schema::{device_tokens, members, reminders, sessions};
use chrono::{NaiveDate, NaiveDateTime};
use diesel::prelude::*;

#[derive(Debug, Clone, Queryable, Identifiable, Selectable)]
#[diesel(table_name = members)]
pub struct Member {
    pub id: String,
    pub display_name: String,
}

#[derive(Insertable)]
#[diesel(table_name = members)]
pub struct NewMember<'a> {
    pub id: &'a str,
    pub display_name: &'a str,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable)]
#[diesel(table_name = device_tokens)]
#[diesel(belongs_to(Member, foreign_key = user_id))]
pub struct DeviceToken {
    pub id: i32,
    pub user_id: String,
    pub token: String,
    pub platform: String,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = device_tokens)]
pub struct NewDeviceToken<'a> {
    pub user_id: &'a str,
    pub token: &'a str,
    pub platform: &'a str,
    pub updated_at: NaiveDateTime,
}

#[derive(Insertable)]
#[diesel(table_name = reminders)]
pub struct NewReminder<'a> {
    pub id: &'a str,
    pub user_id: &'a str,
    pub title: &'a str,
    pub difficulty: &'a str,
    pub due_date: NaiveDate,
    pub status: &'a str,
    pub enabled: bool,
    pub created_by: Option<&'a str>,
}

/// Projection returned by the due-date queries: just enough to address and
/// phrase a notification.
#[derive(Debug, Clone, Queryable)]
pub struct DueReminder {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub difficulty: String,
}

#[derive(Insertable)]
#[diesel(table_name = sessions)]
pub struct NewSession<'a> {
    pub jti: &'a str,
    pub username: &'a str,
}
