use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::DevicePlatform;

pub mod endpoints;
#[cfg(feature = "rest-client")]
pub mod rest;

pub const API_V1_PREFIX: &str = "/api/v1";

/// URL prefix for everything scoped to one household.
pub fn household_scope(household_id: &str) -> String {
    format!("{}/household/{}", API_V1_PREFIX, household_id)
}

// Auth
#[derive(Debug, Serialize, Deserialize)]
pub struct AuthReq {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthResp {
    pub token: String,
}

// Device-token registry
#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceRegisterReq {
    pub token: String,
    pub platform: DevicePlatform,
}

// Dispatch
#[derive(Debug, Serialize, Deserialize)]
pub struct DispatchReq {
    pub user_ids: Vec<String>,
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<HashMap<String, String>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DispatchResp {
    pub success: bool,
    pub sent: usize,
    pub failed: usize,
    pub cleaned: usize,
    pub total_tokens: usize,
}

// Due-task scan
#[derive(Debug, Serialize, Deserialize)]
pub struct ScanResp {
    pub success: bool,
    pub due_today_users: usize,
    pub due_today_tasks: usize,
    pub upcoming_users: usize,
    pub upcoming_tasks: usize,
    pub notifications_sent: usize,
}
