use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::vault::PhotoVault;
use crate::vault_types::ScanRequest;
use crate::warp_helpers::{vault_rejection, with_vault};

/// Starts a scan and answers 202 right away; progress shows up in `GET /api/scan`.
pub async fn start_scan(request: ScanRequest, vault: PhotoVault) -> Result<impl Reply, Rejection> {
    let accepted = vault.scan_library(request).map_err(vault_rejection)?;
    Ok(warp::reply::with_status(
        warp::reply::json(&accepted),
        StatusCode::ACCEPTED,
    ))
}

pub async fn get_scan_report(vault: PhotoVault) -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&serde_json::json!({
        "is_running": vault.scanner().is_running(),
        "report": vault.get_scan_report(),
    })))
}

pub fn build_scan_routes(
    vault: PhotoVault,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let start = warp::path!("api" / "scan")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_vault(vault.clone()))
        .and_then(start_scan);

    let report = warp::path!("api" / "scan")
        .and(warp::get())
        .and(with_vault(vault))
        .and_then(get_scan_report);

    start.or(report)
}
