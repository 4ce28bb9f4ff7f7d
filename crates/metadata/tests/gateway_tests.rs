//! Integration tests for item and collection mutations.

mod common;

use common::{TestStorage, run_storage_test_both};
use davstore_core::LogicalPath;
use davstore_metadata::{MetadataError, NewItem};
use std::collections::BTreeMap;
use uuid::Uuid;

fn calendar_meta() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("tag".to_string(), "VCALENDAR".to_string()),
        ("D:displayname".to_string(), "Work".to_string()),
    ])
}

#[tokio::test]
async fn test_upload_round_trips_and_replaces() {
    run_storage_test_both(|storage| async move {
        let cal = storage
            .create_collection_path(&LogicalPath::parse("/cal"), None, None)
            .await
            .unwrap();
        let body: Vec<u8> = (0u8..=255).collect();

        let created = storage.upload(cal.id, "bin.ics", &body).await.unwrap();
        assert_eq!(created.data, body);
        assert_eq!(created.collection_id, cal.id);

        let replaced = storage.upload(cal.id, "bin.ics", b"second").await.unwrap();
        assert_eq!(replaced.id, created.id);
        assert_eq!(replaced.data, b"second");

        let items = storage.list_items(cal.id).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].data, b"second");
    })
    .await;
}

#[tokio::test]
async fn test_upload_into_missing_collection_fails() {
    let test = TestStorage::in_memory().await.unwrap();
    let err = test
        .storage()
        .upload(Uuid::new_v4(), "x.ics", b"data")
        .await
        .unwrap_err();
    assert!(matches!(err, MetadataError::NotFound(_)));
}

#[tokio::test]
async fn test_concurrent_uploads_to_same_name() {
    run_storage_test_both(|storage| async move {
        let cal = storage
            .create_collection_path(&LogicalPath::parse("/cal"), None, None)
            .await
            .unwrap();

        let (first, second) = tokio::join!(
            storage.upload(cal.id, "race.ics", b"from first"),
            storage.upload(cal.id, "race.ics", b"from second"),
        );
        let first = first.unwrap();
        let second = second.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(first.data, b"from first");
        assert_eq!(second.data, b"from second");

        let items = storage.list_items(cal.id).await.unwrap();
        assert_eq!(items.len(), 1);
        let stored = &items[0];
        // The upload that committed last owns the row, body and etag alike.
        let last = match stored.data.as_slice() {
            b"from first" => &first,
            b"from second" => &second,
            other => panic!("unexpected stored body {other:?}"),
        };
        assert_eq!(stored.etag(), last.etag());

        let history = storage.item_history(cal.id, "race.ics").await.unwrap().unwrap();
        assert_eq!(history.etag, last.etag().as_str());
    })
    .await;
}

#[tokio::test]
async fn test_delete_item_is_idempotent() {
    run_storage_test_both(|storage| async move {
        let cal = storage
            .create_collection_path(&LogicalPath::parse("/cal"), None, None)
            .await
            .unwrap();
        storage.upload(cal.id, "a.ics", b"a").await.unwrap();

        storage.delete(cal.id, Some("a.ics")).await.unwrap();
        storage.delete(cal.id, Some("a.ics")).await.unwrap();
        storage.delete(cal.id, Some("never.ics")).await.unwrap();

        assert!(storage.list_items(cal.id).await.unwrap().is_empty());
        assert!(storage.item_history(cal.id, "never.ics").await.unwrap().is_none());
    })
    .await;
}

#[tokio::test]
async fn test_delete_collection_cascades() {
    run_storage_test_both(|storage| async move {
        let user = storage
            .create_collection_path(&LogicalPath::parse("/user"), None, None)
            .await
            .unwrap();
        let cal = storage
            .create_collection_path(&LogicalPath::parse("/user/cal"), None, Some(calendar_meta()))
            .await
            .unwrap();
        storage.upload(cal.id, "a.ics", b"a").await.unwrap();
        storage.sync(cal.id, "").await.unwrap();

        storage.delete(user.id, None).await.unwrap();

        assert!(storage
            .resolve(&LogicalPath::parse("/user/cal"), 0)
            .await
            .unwrap()
            .is_empty());
        assert!(storage.get_item(cal.id, "a.ics").await.unwrap().is_none());
        assert!(storage.item_history(cal.id, "a.ics").await.unwrap().is_none());
        assert!(storage.get_meta(cal.id).await.unwrap().is_empty());
        assert!(storage.verify().await.unwrap());

        let err = storage.delete(user.id, None).await.unwrap_err();
        assert!(matches!(err, MetadataError::NotFound(_)));
    })
    .await;
}

#[tokio::test]
async fn test_root_cannot_be_deleted() {
    let test = TestStorage::in_memory().await.unwrap();
    let storage = test.storage();
    let err = storage.delete(storage.root().id, None).await.unwrap_err();
    assert!(matches!(err, MetadataError::Constraint(_)));
    assert!(storage.verify().await.unwrap());
}

#[tokio::test]
async fn test_move_replaces_destination_item() {
    run_storage_test_both(|storage| async move {
        let cal = storage
            .create_collection_path(&LogicalPath::parse("/cal"), None, None)
            .await
            .unwrap();
        let source = storage.upload(cal.id, "src.ics", b"source").await.unwrap();
        storage.upload(cal.id, "dst.ics", b"destination").await.unwrap();

        storage.move_item(&source, cal.id, "dst.ics").await.unwrap();

        let items = storage.list_items(cal.id).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].name, "dst.ics");
        assert_eq!(items[0].data, b"source");

        let dst = storage.item_history(cal.id, "dst.ics").await.unwrap().unwrap();
        assert_eq!(dst.etag, items[0].etag().as_str());
        let src = storage.item_history(cal.id, "src.ics").await.unwrap().unwrap();
        assert_eq!(src.etag, "");

        // Moving onto itself changes nothing.
        let current = items[0].clone();
        storage.move_item(&current, cal.id, "dst.ics").await.unwrap();
        let unchanged = storage.item_history(cal.id, "dst.ics").await.unwrap().unwrap();
        assert_eq!(unchanged.history_etag, dst.history_etag);

        // The source no longer exists.
        let err = storage.move_item(&source, cal.id, "other.ics").await.unwrap_err();
        assert!(matches!(err, MetadataError::NotFound(_)));
    })
    .await;
}

#[tokio::test]
async fn test_create_collection_path_is_get_or_create() {
    run_storage_test_both(|storage| async move {
        let path = LogicalPath::parse("/user/calendar");
        let (a, b) = tokio::join!(
            storage.create_collection_path(&path, None, None),
            storage.create_collection_path(&path, None, None),
        );
        let a = a.unwrap();
        let b = b.unwrap();
        assert_eq!(a.id, b.id);

        let again = storage.create_collection_path(&path, None, None).await.unwrap();
        assert_eq!(again.id, a.id);
        assert_eq!(again.path.to_string(), "user/calendar");

        let listing = storage.resolve(&LogicalPath::parse("/user"), 1).await.unwrap();
        assert_eq!(listing.len(), 2);
    })
    .await;
}

#[tokio::test]
async fn test_create_collection_path_replaces_contents() {
    run_storage_test_both(|storage| async move {
        let path = LogicalPath::parse("/user/work");
        let cal = storage
            .create_collection_path(&path, None, None)
            .await
            .unwrap();
        storage.upload(cal.id, "old.ics", b"old").await.unwrap();
        storage
            .create_collection_path(&LogicalPath::parse("/user/work/nested"), None, None)
            .await
            .unwrap();
        let before = storage.sync(cal.id, "").await.unwrap();

        let items = vec![
            NewItem {
                uid: Some("meeting-1@example.com".to_string()),
                data: b"BEGIN:VCALENDAR\r\nUID:meeting-1@example.com\r\nEND:VCALENDAR\r\n".to_vec(),
            },
            NewItem {
                uid: Some("not/safe".to_string()),
                data: b"BEGIN:VCALENDAR\r\nUID:not/safe\r\nEND:VCALENDAR\r\n".to_vec(),
            },
        ];
        let replaced = storage
            .create_collection_path(&path, Some(items), Some(calendar_meta()))
            .await
            .unwrap();
        assert_eq!(replaced.id, cal.id);

        let names: Vec<String> = storage
            .list_items(cal.id)
            .await
            .unwrap()
            .into_iter()
            .map(|item| item.name)
            .collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"meeting-1@example.com.ics".to_string()));
        let hashed = names
            .iter()
            .find(|name| name.as_str() != "meeting-1@example.com.ics")
            .unwrap();
        assert_eq!(hashed.len(), 32 + ".ics".len());
        assert!(hashed.ends_with(".ics"));

        assert_eq!(storage.get_meta(cal.id).await.unwrap(), calendar_meta());
        assert!(storage
            .resolve(&LogicalPath::parse("/user/work/nested"), 0)
            .await
            .unwrap()
            .is_empty());

        let after = storage.sync(cal.id, &before.token).await.unwrap();
        assert!(after.changes.contains(&"old.ics".to_string()));
        assert!(after.changes.contains(&"meeting-1@example.com.ics".to_string()));
        assert_eq!(after.changes.len(), 3);
    })
    .await;
}

#[tokio::test]
async fn test_create_collection_path_drops_items_without_kind() {
    let test = TestStorage::in_memory().await.unwrap();
    let storage = test.storage();
    let meta = BTreeMap::from([("D:displayname".to_string(), "Plain".to_string())]);
    let cal = storage
        .create_collection_path(
            &LogicalPath::parse("/plain"),
            Some(vec![NewItem {
                uid: Some("x".to_string()),
                data: b"data".to_vec(),
            }]),
            Some(meta.clone()),
        )
        .await
        .unwrap();

    assert!(storage.list_items(cal.id).await.unwrap().is_empty());
    assert_eq!(storage.get_meta(cal.id).await.unwrap(), meta);
}

#[tokio::test]
async fn test_metadata_and_collection_etag() {
    run_storage_test_both(|storage| async move {
        let cal = storage
            .create_collection_path(&LogicalPath::parse("/cal"), None, None)
            .await
            .unwrap();
        let empty_etag = storage.collection_etag(cal.id).await.unwrap();
        assert!(empty_etag.starts_with('"') && empty_etag.ends_with('"'));
        let modified = storage.last_modified(cal.id).await.unwrap();

        storage.set_meta(cal.id, &calendar_meta()).await.unwrap();
        assert_eq!(
            storage.get_meta_value(cal.id, "tag").await.unwrap().as_deref(),
            Some("VCALENDAR")
        );
        assert_eq!(storage.get_meta_value(cal.id, "missing").await.unwrap(), None);
        let with_meta = storage.collection_etag(cal.id).await.unwrap();
        assert_ne!(with_meta, empty_etag);
        assert!(storage.last_modified(cal.id).await.unwrap() >= modified);

        storage
            .set_meta(cal.id, &BTreeMap::from([("tag".to_string(), "VADDRESSBOOK".to_string())]))
            .await
            .unwrap();
        assert_eq!(storage.get_meta(cal.id).await.unwrap().len(), 1);

        storage.upload(cal.id, "a.vcf", b"card").await.unwrap();
        let with_item = storage.collection_etag(cal.id).await.unwrap();
        assert_ne!(with_item, with_meta);
        assert_eq!(storage.collection_etag(cal.id).await.unwrap(), with_item);

        let err = storage.last_modified(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, MetadataError::NotFound(_)));
    })
    .await;
}

#[tokio::test]
async fn test_get_items_and_search() {
    run_storage_test_both(|storage| async move {
        let cal = storage
            .create_collection_path(&LogicalPath::parse("/cal"), None, None)
            .await
            .unwrap();
        storage
            .upload(cal.id, "a.ics", b"SUMMARY:Lunch with Ana")
            .await
            .unwrap();
        storage
            .upload(cal.id, "b.ics", b"SUMMARY:Dentist")
            .await
            .unwrap();

        let names = vec!["b.ics".to_string(), "zzz.ics".to_string(), "a.ics".to_string()];
        let found = storage.get_items(cal.id, &names).await.unwrap();
        let keys: Vec<&str> = found.iter().map(|(name, _)| name.as_str()).collect();
        assert_eq!(keys, vec!["a.ics", "b.ics", "zzz.ics"]);
        assert!(found[0].1.is_some());
        assert!(found[2].1.is_none());
        assert!(storage.get_items(cal.id, &[]).await.unwrap().is_empty());

        let hits = storage.search_items(cal.id, b"Lunch").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "a.ics");
        assert!(storage.search_items(cal.id, b"nothing").await.unwrap().is_empty());
    })
    .await;
}

#[tokio::test]
async fn test_verify_and_health_check() {
    run_storage_test_both(|storage| async move {
        storage.health_check().await.unwrap();
        assert!(storage.verify().await.unwrap());
    })
    .await;
}

#[tokio::test]
async fn test_verify_detects_missing_root() {
    let test = TestStorage::in_memory().await.unwrap();
    sqlx::query("DELETE FROM collections")
        .execute(test.pool())
        .await
        .unwrap();
    assert!(!test.storage().verify().await.unwrap());
}
