use std::io::{self, Write};
use std::path::PathBuf;

use tasknest_shared::api::{self};
use tasknest_shared::auth::Role;
use tasknest_shared::jwt;

use crate::AppError;
use crate::config::{load_config, resolve_config_path};

pub async fn login(
    server_arg: Option<String>,
    username_arg: Option<String>,
    cfg_path_opt: Option<PathBuf>,
) -> Result<(), AppError> {
    // Resolve server url: CLI arg > config if present > prompt; normalize and strip trailing slash
    let server_url = if let Some(s) = server_arg {
        crate::config::normalize_server_url(&s)
    } else {
        let from_cfg = (|| {
            let p = resolve_config_path(cfg_path_opt.clone()).ok()?;
            let cfg = load_config(&p).ok()?;
            Some(crate::config::normalize_server_url(&cfg.server_url))
        })();
        match from_cfg {
            Some(s) => s,
            None => {
                crate::config::normalize_server_url(&prompt("Server URL (e.g., 127.0.0.1:5151): ")?)
            }
        }
    };

    let username = match username_arg {
        Some(u) => u,
        None => prompt("Username: ")?,
    };
    let password = rpassword::prompt_password("Password: ")
        .map_err(|e| AppError::Io(std::io::Error::other(e.to_string())))?;

    let body: api::AuthResp = match api::rest::login(
        &server_url,
        &api::AuthReq {
            username: username.clone(),
            password: password.clone(),
        },
    )
    .await
    {
        Ok(v) => v,
        Err(e) => return Err(AppError::Http(format!("login failed: {e}"))),
    };

    // Device registration is tied to a member account; admins have no member
    // identity to register tokens under.
    let claims = jwt::decode_unverified(&body.token)
        .map_err(|e| AppError::Http(format!("invalid token: {e}")))?;
    if claims.role != Role::Member {
        return Err(AppError::Config(
            "log in with a member account to register this device".into(),
        ));
    }
    let member_id = claims
        .member_id
        .ok_or_else(|| AppError::Http("member token missing member_id".into()))?;

    // Save bearer in keyring under the server_url only (single-user support)
    let entry = crate::keyring_entry(&server_url)?;
    entry
        .set_password(&body.token)
        .map_err(|e| AppError::Keyring(e.to_string()))?;
    entry
        .get_password()
        .map_err(|e| AppError::Keyring(e.to_string()))?;

    let device_id = uuid::Uuid::new_v4().to_string();
    let cfg = crate::config::ClientConfig {
        server_url: server_url.clone(),
        household_id: claims.household_id,
        member_id,
        device_id,
        task_cache: None,
    };
    let path = crate::config::default_config_path()
        .ok_or_else(|| AppError::Config("could not determine config dir".into()))?;
    crate::config::save_config(&path, &cfg)?;

    println!(
        "Saved token in keyring for {} and wrote config to {}",
        server_url,
        path.display()
    );
    Ok(())
}

/// Sign-out: drop every registered token for this user and forget the stored
/// login. The device stops receiving pushes immediately.
pub async fn sign_out(cfg_path_opt: Option<PathBuf>) -> Result<(), AppError> {
    let path = resolve_config_path(cfg_path_opt)?;
    let cfg = load_config(&path)?;
    let server_url = crate::config::normalize_server_url(&cfg.server_url);
    let bearer = crate::read_token_from_keyring(&server_url)?;

    api::rest::remove_devices(&server_url, &cfg.household_id, &cfg.member_id, &bearer)
        .await
        .map_err(|e| AppError::Http(format!("token removal failed: {e}")))?;

    let entry = crate::keyring_entry(&server_url)?;
    if let Err(e) = entry.delete_credential() {
        tracing::warn!(error=%e, "failed to clear keyring entry");
    }

    println!("Signed out; device tokens removed for {}", cfg.member_id);
    Ok(())
}

fn prompt(msg: &str) -> Result<String, AppError> {
    print!("{}", msg);
    io::stdout().flush().ok();
    let mut buf = String::new();
    io::stdin().read_line(&mut buf).map_err(AppError::Io)?;
    Ok(buf.trim().to_string())
}
