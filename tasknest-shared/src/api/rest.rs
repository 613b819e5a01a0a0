//! Minimal REST client helpers for consumers (device clients, cron tools).

use super::endpoints as ep;
use super::*;
use once_cell::sync::Lazy;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum RestError {
    #[error("http: {0}")]
    Http(String),
    #[error("status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("serde: {0}")]
    Serde(String),
}

static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        // Keep TCP connections alive at kernel level
        .tcp_keepalive(Some(Duration::from_secs(180)))
        // Enable and tune the connection pool
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(Duration::from_secs(180))
        // Bound request duration
        .timeout(Duration::from_secs(180))
        .build()
        .expect("failed to build HTTP client")
});

fn mk_client() -> Result<reqwest::Client, RestError> {
    Ok(HTTP_CLIENT.clone())
}

async fn handle_json<T: for<'de> serde::Deserialize<'de>>(
    res: reqwest::Response,
) -> Result<T, RestError> {
    let status = res.status();
    if !status.is_success() {
        let body = res.text().await.unwrap_or_default();
        return Err(RestError::Status {
            status: status.as_u16(),
            body,
        });
    }
    res.json::<T>()
        .await
        .map_err(|e| RestError::Serde(e.to_string()))
}

async fn handle_empty(res: reqwest::Response) -> Result<(), RestError> {
    if res.status().is_success() {
        Ok(())
    } else {
        let status = res.status().as_u16();
        let body = res.text().await.unwrap_or_default();
        Err(RestError::Status { status, body })
    }
}

pub async fn login(base: &str, req: &AuthReq) -> Result<AuthResp, RestError> {
    let client = mk_client()?;
    let url = ep::auth_login(base);
    let res = client
        .post(url)
        .json(req)
        .send()
        .await
        .map_err(|e| RestError::Http(e.to_string()))?;
    handle_json(res).await
}

pub async fn register_device(
    base: &str,
    household_id: &str,
    member_id: &str,
    bearer: &str,
    req: &DeviceRegisterReq,
) -> Result<(), RestError> {
    let client = mk_client()?;
    let url = ep::member_devices(base, household_id, member_id);
    let res = client
        .post(url)
        .bearer_auth(bearer)
        .json(req)
        .send()
        .await
        .map_err(|e| RestError::Http(e.to_string()))?;
    handle_empty(res).await
}

pub async fn remove_devices(
    base: &str,
    household_id: &str,
    member_id: &str,
    bearer: &str,
) -> Result<(), RestError> {
    let client = mk_client()?;
    let url = ep::member_devices(base, household_id, member_id);
    let res = client
        .delete(url)
        .bearer_auth(bearer)
        .send()
        .await
        .map_err(|e| RestError::Http(e.to_string()))?;
    handle_empty(res).await
}

