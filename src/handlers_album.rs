use serde_json::json;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::vault::PhotoVault;
use crate::vault_types::{CreateAlbumRequest, PhotoIdsRequest};
use crate::warp_helpers::{vault_rejection, with_vault};

pub async fn list_albums(vault: PhotoVault) -> Result<impl Reply, Rejection> {
    let albums = vault.get_albums().map_err(vault_rejection)?;
    Ok(warp::reply::json(&albums))
}

pub async fn create_album(
    request: CreateAlbumRequest,
    vault: PhotoVault,
) -> Result<impl Reply, Rejection> {
    let album = vault.create_album(&request.name).map_err(vault_rejection)?;
    Ok(warp::reply::with_status(
        warp::reply::json(&album),
        StatusCode::CREATED,
    ))
}

pub async fn delete_album(album_id: i64, vault: PhotoVault) -> Result<impl Reply, Rejection> {
    vault.delete_album(album_id).map_err(vault_rejection)?;
    Ok(warp::reply::json(&json!({ "success": true })))
}

pub async fn album_photos(album_id: i64, vault: PhotoVault) -> Result<impl Reply, Rejection> {
    let photos = vault.get_photos_by_album(album_id).map_err(vault_rejection)?;
    Ok(warp::reply::json(&photos))
}

pub async fn add_album_photos(
    album_id: i64,
    request: PhotoIdsRequest,
    vault: PhotoVault,
) -> Result<impl Reply, Rejection> {
    vault
        .add_photos_to_album(album_id, &request.photo_ids)
        .map_err(vault_rejection)?;
    Ok(warp::reply::json(&json!({ "success": true })))
}

pub async fn remove_album_photos(
    album_id: i64,
    request: PhotoIdsRequest,
    vault: PhotoVault,
) -> Result<impl Reply, Rejection> {
    vault
        .remove_photos_from_album(album_id, &request.photo_ids)
        .map_err(vault_rejection)?;
    Ok(warp::reply::json(&json!({ "success": true })))
}

pub fn build_album_routes(
    vault: PhotoVault,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let list = warp::path!("api" / "albums")
        .and(warp::get())
        .and(with_vault(vault.clone()))
        .and_then(list_albums);

    let create = warp::path!("api" / "albums")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_vault(vault.clone()))
        .and_then(create_album);

    let delete = warp::path!("api" / "albums" / i64)
        .and(warp::delete())
        .and(with_vault(vault.clone()))
        .and_then(delete_album);

    let photos = warp::path!("api" / "albums" / i64 / "photos")
        .and(warp::get())
        .and(with_vault(vault.clone()))
        .and_then(album_photos);

    let add = warp::path!("api" / "albums" / i64 / "photos")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_vault(vault.clone()))
        .and_then(add_album_photos);

    let remove = warp::path!("api" / "albums" / i64 / "photos")
        .and(warp::delete())
        .and(warp::body::json())
        .and(with_vault(vault))
        .and_then(remove_album_photos);

    list.or(create)
        .or(delete)
        .or(photos)
        .or(add)
        .or(remove)
}
