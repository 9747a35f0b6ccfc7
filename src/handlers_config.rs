use warp::{Filter, Rejection, Reply};

use crate::vault::PhotoVault;
use crate::vault_types::DrivePathsRequest;
use crate::warp_helpers::{vault_rejection, with_vault};

pub async fn get_config(vault: PhotoVault) -> Result<impl Reply, Rejection> {
    Ok(warp::reply::json(&vault.get_config()))
}

pub async fn set_drive_paths(
    request: DrivePathsRequest,
    vault: PhotoVault,
) -> Result<impl Reply, Rejection> {
    let response = vault
        .set_drive_paths(request)
        .await
        .map_err(vault_rejection)?;
    Ok(warp::reply::json(&response))
}

pub fn build_config_routes(
    vault: PhotoVault,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let get = warp::path!("api" / "config")
        .and(warp::get())
        .and(with_vault(vault.clone()))
        .and_then(get_config);

    let put = warp::path!("api" / "config")
        .and(warp::put())
        .and(warp::body::json())
        .and(with_vault(vault))
        .and_then(set_drive_paths);

    get.or(put)
}
