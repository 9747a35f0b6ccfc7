use serde_json::json;
use warp::{Filter, Rejection, Reply};

use crate::db::FilterCriteria;
use crate::vault::PhotoVault;
use crate::vault_types::{
    MovePhotosRequest, PhotoIdsRequest, PhotosQuery, RenamePhotoRequest, TagRequest,
};
use crate::warp_helpers::{vault_rejection, with_vault};

pub async fn list_photos(query: PhotosQuery, vault: PhotoVault) -> Result<impl Reply, Rejection> {
    let photos = vault.get_photos(&query).map_err(vault_rejection)?;
    Ok(warp::reply::json(&photos))
}

pub async fn delete_photos(
    request: PhotoIdsRequest,
    vault: PhotoVault,
) -> Result<impl Reply, Rejection> {
    let freed = vault.delete_photos(request).await.map_err(vault_rejection)?;
    Ok(warp::reply::json(&freed))
}

pub async fn filter_photos(
    criteria: FilterCriteria,
    vault: PhotoVault,
) -> Result<impl Reply, Rejection> {
    let photos = vault.filter_photos(&criteria).map_err(vault_rejection)?;
    Ok(warp::reply::json(&photos))
}

pub async fn move_photos(
    request: MovePhotosRequest,
    vault: PhotoVault,
) -> Result<impl Reply, Rejection> {
    let photos = vault.move_photos(request).await.map_err(vault_rejection)?;
    Ok(warp::reply::json(&photos))
}

pub async fn rename_photo(
    photo_id: i64,
    request: RenamePhotoRequest,
    vault: PhotoVault,
) -> Result<impl Reply, Rejection> {
    let photo = vault
        .rename_photo(photo_id, request)
        .await
        .map_err(vault_rejection)?;
    Ok(warp::reply::json(&photo))
}

// ===== TAGS =====

pub async fn photo_tags(photo_id: i64, vault: PhotoVault) -> Result<impl Reply, Rejection> {
    let tags = vault.photo_tags(photo_id).map_err(vault_rejection)?;
    Ok(warp::reply::json(&tags))
}

pub async fn add_tag(
    photo_id: i64,
    request: TagRequest,
    vault: PhotoVault,
) -> Result<impl Reply, Rejection> {
    let tag = vault
        .add_tag(photo_id, &request.name)
        .map_err(vault_rejection)?;
    Ok(warp::reply::json(&tag))
}

pub async fn remove_tag(
    photo_id: i64,
    tag_id: i64,
    vault: PhotoVault,
) -> Result<impl Reply, Rejection> {
    vault.remove_tag(photo_id, tag_id).map_err(vault_rejection)?;
    Ok(warp::reply::json(&json!({ "success": true })))
}

pub async fn all_tags(vault: PhotoVault) -> Result<impl Reply, Rejection> {
    let tags = vault.all_tags().map_err(vault_rejection)?;
    Ok(warp::reply::json(&tags))
}

pub fn build_photo_routes(
    vault: PhotoVault,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let list = warp::path!("api" / "photos")
        .and(warp::get())
        .and(warp::query::<PhotosQuery>())
        .and(with_vault(vault.clone()))
        .and_then(list_photos);

    let delete = warp::path!("api" / "photos" / "delete")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_vault(vault.clone()))
        .and_then(delete_photos);

    let filter = warp::path!("api" / "photos" / "filter")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_vault(vault.clone()))
        .and_then(filter_photos);

    let move_to = warp::path!("api" / "photos" / "move")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_vault(vault.clone()))
        .and_then(move_photos);

    let rename = warp::path!("api" / "photos" / i64 / "rename")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_vault(vault.clone()))
        .and_then(rename_photo);

    let tags_of_photo = warp::path!("api" / "photos" / i64 / "tags")
        .and(warp::get())
        .and(with_vault(vault.clone()))
        .and_then(photo_tags);

    let tag_photo = warp::path!("api" / "photos" / i64 / "tags")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_vault(vault.clone()))
        .and_then(add_tag);

    let untag_photo = warp::path!("api" / "photos" / i64 / "tags" / i64)
        .and(warp::delete())
        .and(with_vault(vault.clone()))
        .and_then(remove_tag);

    let tags = warp::path!("api" / "tags")
        .and(warp::get())
        .and(with_vault(vault))
        .and_then(all_tags);

    list.or(delete)
        .or(filter)
        .or(move_to)
        .or(rename)
        .or(tags_of_photo)
        .or(tag_photo)
        .or(untag_photo)
        .or(tags)
}
