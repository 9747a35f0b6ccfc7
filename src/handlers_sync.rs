use warp::{Filter, Rejection, Reply};

use crate::vault::PhotoVault;
use crate::warp_helpers::{vault_rejection, with_vault};

pub async fn queue_status(vault: PhotoVault) -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&vault.get_sync_queue_status()))
}

pub async fn flush_queue(vault: PhotoVault) -> Result<impl Reply, Rejection> {
    let report = vault.flush_sync_queue().await.map_err(vault_rejection)?;
    Ok(warp::reply::json(&report))
}

pub async fn sync_status(vault: PhotoVault) -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&vault.verify_sync_status().await))
}

pub async fn reconcile(vault: PhotoVault) -> Result<impl Reply, Rejection> {
    let report = vault.reconcile().await.map_err(vault_rejection)?;
    Ok(warp::reply::json(&report))
}

pub async fn failed_operations(vault: PhotoVault) -> Result<impl Reply, Rejection> {
    let operations = vault.get_failed_operations().map_err(vault_rejection)?;
    Ok(warp::reply::json(&operations))
}

pub async fn retry_failed(vault: PhotoVault) -> Result<impl Reply, Rejection> {
    let response = vault.retry_failed().map_err(vault_rejection)?;
    Ok(warp::reply::json(&response))
}

pub fn build_sync_routes(
    vault: PhotoVault,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let queue = warp::path!("api" / "sync" / "queue")
        .and(warp::get())
        .and(with_vault(vault.clone()))
        .and_then(queue_status);

    let flush = warp::path!("api" / "sync" / "flush")
        .and(warp::post())
        .and(with_vault(vault.clone()))
        .and_then(flush_queue);

    let status = warp::path!("api" / "sync" / "status")
        .and(warp::get())
        .and(with_vault(vault.clone()))
        .and_then(sync_status);

    let reconcile_route = warp::path!("api" / "sync" / "reconcile")
        .and(warp::post())
        .and(with_vault(vault.clone()))
        .and_then(reconcile);

    let failed = warp::path!("api" / "sync" / "failed")
        .and(warp::get())
        .and(with_vault(vault.clone()))
        .and_then(failed_operations);

    let retry = warp::path!("api" / "sync" / "retry")
        .and(warp::post())
        .and(with_vault(vault))
        .and_then(retry_failed);

    queue
        .or(flush)
        .or(status)
        .or(reconcile_route)
        .or(failed)
        .or(retry)
}
