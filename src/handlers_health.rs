use serde_json::json;
use std::convert::Infallible;
use warp::{Filter, Rejection, Reply};

use crate::vault::PhotoVault;
use crate::warp_helpers::{vault_rejection, with_vault};

pub async fn health_check() -> Result<impl Reply, Infallible> {
    Ok(warp::reply::json(&json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

pub async fn ready_check(vault: PhotoVault) -> Result<impl Reply, Rejection> {
    let photos = vault.check_ready().map_err(vault_rejection)?;
    Ok(warp::reply::json(&json!({
        "status": "ready",
        "catalog": "available",
        "photos": photos,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

pub fn build_health_routes(
    vault: PhotoVault,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let health = warp::path("health").and(warp::get()).and_then(health_check);

    let ready = warp::path("ready")
        .and(warp::get())
        .and(with_vault(vault))
        .and_then(ready_check);

    health.or(ready)
}
