use std::fs;
use std::path::Path;
use tempfile::TempDir;

use photovault::config::Config;
use photovault::vault_types::{DrivePathsRequest, PhotoIdsRequest, PhotosQuery};
use photovault::{PhotoVault, VaultError};

const KB: usize = 1000;

struct Library {
    _data: TempDir,
    primary: TempDir,
    vault: PhotoVault,
}

async fn library() -> Library {
    let data = TempDir::new().unwrap();
    let primary = TempDir::new().unwrap();
    let vault = PhotoVault::open(Config::for_data_path(data.path())).unwrap();
    vault
        .set_drive_paths(DrivePathsRequest {
            primary: Some(primary.path().display().to_string()),
            backup: None,
        })
        .await
        .unwrap();
    Library {
        _data: data,
        primary,
        vault,
    }
}

fn write_photo(dir: &Path, name: &str, len: usize, seed: u8) {
    let bytes: Vec<u8> = (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect();
    fs::write(dir.join(name), bytes).unwrap();
}

fn photo_id(vault: &PhotoVault, path: &str) -> i64 {
    vault.catalog().find_by_path(path).unwrap().unwrap().id
}

fn all_filenames(vault: &PhotoVault) -> Vec<String> {
    let mut names: Vec<String> = vault
        .get_photos(&PhotosQuery::default())
        .unwrap()
        .into_iter()
        .map(|p| p.filename)
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_duplicates_found_and_deleted() {
    let lib = library().await;
    write_photo(lib.primary.path(), "a.jpg", 500 * KB, 1);
    write_photo(lib.primary.path(), "b.jpg", 500 * KB, 1);
    write_photo(lib.primary.path(), "c.jpg", 300 * KB, 9);

    lib.vault.run_scan().await.unwrap();
    assert_eq!(all_filenames(&lib.vault), vec!["a.jpg", "b.jpg", "c.jpg"]);

    let groups = lib.vault.find_duplicates().unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].size, (500 * KB) as u64);
    assert_eq!(groups[0].reclaimable_bytes, (500 * KB) as u64);
    let mut members: Vec<&str> = groups[0].photos.iter().map(|p| p.path.as_str()).collect();
    members.sort();
    assert_eq!(members, vec!["a.jpg", "b.jpg"]);

    let a = photo_id(&lib.vault, "a.jpg");
    let b = photo_id(&lib.vault, "b.jpg");
    let c = photo_id(&lib.vault, "c.jpg");

    // Neither the last copy of a group nor a unique photo may go.
    for ids in [vec![a, b], vec![c]] {
        let err = lib
            .vault
            .delete_duplicates(PhotoIdsRequest { photo_ids: ids })
            .await
            .unwrap_err();
        assert!(matches!(err, VaultError::InvalidInput(_)));
    }
    assert_eq!(all_filenames(&lib.vault).len(), 3);

    let freed = lib
        .vault
        .delete_duplicates(PhotoIdsRequest { photo_ids: vec![b] })
        .await
        .unwrap();
    assert_eq!(freed.bytes_freed, (500 * KB) as u64);
    assert!(lib.vault.find_duplicates().unwrap().is_empty());
    assert_eq!(all_filenames(&lib.vault), vec!["a.jpg", "c.jpg"]);
    assert!(!lib.primary.path().join("b.jpg").exists());
    assert!(lib.primary.path().join("a.jpg").exists());
}

#[tokio::test]
async fn test_one_byte_difference_is_not_a_duplicate() {
    let lib = library().await;
    write_photo(lib.primary.path(), "one.png", 4 * KB, 3);
    let mut bytes = fs::read(lib.primary.path().join("one.png")).unwrap();
    bytes[100] ^= 0xff;
    fs::write(lib.primary.path().join("two.png"), bytes).unwrap();

    lib.vault.run_scan().await.unwrap();
    assert!(lib.vault.find_duplicates().unwrap().is_empty());
}

#[tokio::test]
async fn test_rescan_of_unchanged_tree_writes_nothing() {
    let lib = library().await;
    fs::create_dir_all(lib.primary.path().join("2024/summer")).unwrap();
    write_photo(lib.primary.path(), "2024/summer/beach.jpg", 2 * KB, 4);
    write_photo(lib.primary.path(), "portrait.webp", 3 * KB, 5);
    fs::write(lib.primary.path().join("notes.txt"), b"not a photo").unwrap();

    let first = lib.vault.run_scan().await.unwrap();
    assert_eq!(first.inserted, 2);
    let generation = lib.vault.catalog().generation();

    let second = lib.vault.run_scan().await.unwrap();
    assert_eq!(second.writes(), 0);
    assert_eq!(second.unchanged, 2);
    assert_eq!(lib.vault.catalog().generation(), generation);
}

#[tokio::test]
async fn test_album_lifecycle_keeps_photos() {
    let lib = library().await;
    write_photo(lib.primary.path(), "a.jpg", KB, 1);
    write_photo(lib.primary.path(), "c.jpg", KB, 2);
    lib.vault.run_scan().await.unwrap();
    let a = photo_id(&lib.vault, "a.jpg");
    let c = photo_id(&lib.vault, "c.jpg");

    let album = lib.vault.create_album("Holidays").unwrap();
    lib.vault.add_photos_to_album(album.id, &[a, c]).unwrap();
    assert_eq!(lib.vault.get_photos_by_album(album.id).unwrap().len(), 2);

    // An unknown id rejects the whole request.
    let err = lib
        .vault
        .remove_photos_from_album(album.id, &[a])
        .and_then(|_| lib.vault.add_photos_to_album(album.id, &[a, 9999]))
        .unwrap_err();
    assert!(matches!(err, VaultError::NotFound(_)));
    let remaining: Vec<i64> = lib
        .vault
        .get_photos_by_album(album.id)
        .unwrap()
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(remaining, vec![c]);

    lib.vault.delete_album(album.id).unwrap();
    assert!(lib.vault.get_albums().unwrap().is_empty());
    assert!(matches!(
        lib.vault.get_photos_by_album(album.id),
        Err(VaultError::NotFound(_))
    ));
    assert_eq!(all_filenames(&lib.vault), vec!["a.jpg", "c.jpg"]);
}

#[tokio::test]
async fn test_delete_photos_frees_bytes_and_files() {
    let lib = library().await;
    write_photo(lib.primary.path(), "keep.jpg", 2 * KB, 1);
    write_photo(lib.primary.path(), "drop.jpg", 3 * KB, 2);
    lib.vault.run_scan().await.unwrap();

    let drop = photo_id(&lib.vault, "drop.jpg");
    lib.vault.add_tag(drop, "blurry").unwrap();

    let result = lib
        .vault
        .delete_photos(PhotoIdsRequest {
            photo_ids: vec![drop, 424242],
        })
        .await;
    assert!(matches!(result, Err(VaultError::NotFound(_))));
    assert!(lib.primary.path().join("drop.jpg").exists());
    assert_eq!(all_filenames(&lib.vault), vec!["drop.jpg", "keep.jpg"]);

    let freed = lib
        .vault
        .delete_photos(PhotoIdsRequest {
            photo_ids: vec![drop],
        })
        .await
        .unwrap();
    assert_eq!(freed.bytes_freed, (3 * KB) as u64);
    assert!(!lib.primary.path().join("drop.jpg").exists());
    assert_eq!(all_filenames(&lib.vault), vec!["keep.jpg"]);
    assert!(lib.vault.all_tags().unwrap().is_empty());

    // The next scan does not bring it back.
    let report = lib.vault.run_scan().await.unwrap();
    assert_eq!(report.inserted, 0);
}

#[tokio::test]
async fn test_pagination_by_offset_and_cursor() {
    let lib = library().await;
    for i in 0..5 {
        write_photo(lib.primary.path(), &format!("img{}.jpg", i), KB, i as u8);
    }
    lib.vault.run_scan().await.unwrap();

    let first = lib
        .vault
        .get_photos(&PhotosQuery {
            limit: Some(2),
            offset: Some(0),
            after_id: None,
        })
        .unwrap();
    assert_eq!(first.len(), 2);

    let next = lib
        .vault
        .get_photos(&PhotosQuery {
            limit: Some(10),
            offset: None,
            after_id: Some(first[1].id),
        })
        .unwrap();
    assert_eq!(next.len(), 3);
    assert!(next.iter().all(|p| p.id > first[1].id));
}
