use warp::{Filter, Rejection, Reply};

use crate::vault::PhotoVault;
use crate::vault_types::PhotoIdsRequest;
use crate::warp_helpers::{vault_rejection, with_vault};

pub async fn list_duplicates(vault: PhotoVault) -> Result<impl Reply, Rejection> {
    let groups = vault.find_duplicates().map_err(vault_rejection)?;
    Ok(warp::reply::json(&groups))
}

pub async fn delete_duplicates(
    request: PhotoIdsRequest,
    vault: PhotoVault,
) -> Result<impl Reply, Rejection> {
    let freed = vault
        .delete_duplicates(request)
        .await
        .map_err(vault_rejection)?;
    Ok(warp::reply::json(&freed))
}

pub fn build_duplicate_routes(
    vault: PhotoVault,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let list = warp::path!("api" / "duplicates")
        .and(warp::get())
        .and(with_vault(vault.clone()))
        .and_then(list_duplicates);

    let delete = warp::path!("api" / "duplicates" / "delete")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_vault(vault))
        .and_then(delete_duplicates);

    list.or(delete)
}
