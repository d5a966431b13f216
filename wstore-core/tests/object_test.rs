//! Object save, read and mutation integration tests

mod common;

use common::*;
use serde_json::json;
use wstore_core::{
    ListObjectsParams, Metadata, ObjectIdentifier, ObjectSelector, SubObjectIdentifier,
    TypeDefId, TypeDefName, WorkspaceError,
};

#[tokio::test]
async fn test_save_and_get_object() {
    let store = store();
    let alice = user("alice");
    let info = store.create_workspace(&alice, "objs", false, None, None).await.unwrap();

    let mut meta = Metadata::new();
    meta.insert("source".into(), "test".into());
    let mut item = named(json!({"b": [1, 2], "a": 1}), "first", &alice);
    item.metadata = meta.clone();
    let saved = store.save_objects(&alice, &ws("objs"), vec![item]).await.unwrap();

    let canonical = br#"{"a":1,"b":[1,2]}"#;
    let s = &saved[0];
    assert_eq!(s.object_id, 1);
    assert_eq!(s.object_name, "first");
    assert_eq!(s.version, 1);
    assert_eq!(s.workspace_id, info.id);
    assert_eq!(s.type_string, "Test.Plain-1.0");
    assert_eq!(s.saved_by, alice);
    assert_eq!(s.size, canonical.len() as u64);
    assert_eq!(s.checksum, format!("{:x}", md5::compute(canonical)));
    assert_eq!(s.metadata.as_ref(), Some(&meta));

    let got = store.get_objects(Some(&alice), &[obj("objs", "first")]).await.unwrap();
    assert_eq!(got[0].data.bytes().unwrap().as_ref(), canonical);
    assert_eq!(got[0].info, *s);
    assert!(got[0].copied_from.is_none());

    let ws_info = store.get_workspace_information(Some(&alice), &ws("objs")).await.unwrap();
    assert_eq!(ws_info.approximate_objects, 1);
}

#[tokio::test]
async fn test_versions_are_dense() {
    let store = store();
    let alice = user("alice");
    workspace_with(&store, &alice, "vers", &[("o", json!({"v": 1}))]).await;
    for v in 2..=3 {
        let saved = store
            .save_objects(&alice, &ws("vers"), vec![named(json!({"v": v}), "o", &alice)])
            .await
            .unwrap();
        assert_eq!(saved[0].version, v);
    }

    let got = store.get_objects(Some(&alice), &[obj_ver("vers", "o", 2)]).await.unwrap();
    assert_eq!(got[0].data.json().unwrap(), json!({"v": 2}));

    let history = store.get_object_history(Some(&alice), &obj_ver("vers", "o", 1)).await.unwrap();
    let versions: Vec<i64> = history.iter().map(|h| h.version).collect();
    assert_eq!(versions, vec![1, 2, 3]);

    let err = store
        .get_objects(Some(&alice), &[obj_ver("vers", "o", 4)])
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "No object with id 1 (name o) and version 4 exists in workspace 1"
    );
}

#[tokio::test]
async fn test_save_rejections() {
    let store = store();
    let alice = user("alice");
    store.create_workspace(&alice, "rej", false, None, None).await.unwrap();

    let err = store.save_objects(&alice, &ws("rej"), vec![]).await.unwrap_err();
    assert_eq!(err.to_string(), "No data provided");

    let missing_id = plain(json!({}), &alice).with_target(ObjectSelector::id(9).unwrap());
    let err = store.save_objects(&alice, &ws("rej"), vec![missing_id]).await.unwrap_err();
    assert_eq!(err.to_string(), "There is no object with id 9");

    let mut strict = plain(json!({"other": 1}), &alice);
    strict.type_id = TypeDefId::exact("Test", "Plain", 2, 0);
    let err = store
        .save_objects(&alice, &ws("rej"), vec![plain(json!({}), &alice), strict])
        .await
        .unwrap_err();
    assert!(matches!(err, WorkspaceError::TypedObjectValidation { position: 2, .. }));
    assert!(err.to_string().starts_with("Object #2 failed type checking:\n"));

    let unknown = typed(json!({}), "Test", "Nope", &alice);
    let err = store.save_objects(&alice, &ws("rej"), vec![unknown]).await.unwrap_err();
    assert!(err.to_string().contains("Type Test.Nope is not registered"));

    // nothing from the failed batches was written
    let listed = store
        .list_objects(Some(&alice), &ListObjectsParams { workspaces: vec![ws("rej")], ..Default::default() })
        .await
        .unwrap();
    assert!(listed.is_empty());
}

#[tokio::test]
async fn test_object_size_limit() {
    let store = store();
    let alice = user("alice");
    store.create_workspace(&alice, "big", false, None, None).await.unwrap();
    store.resources().set_max_object_size(20).unwrap();

    let err = store
        .save_objects(&alice, &ws("big"), vec![plain(json!({"data": "0123456789abcdefghij"}), &alice)])
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Object #1 data size 31 exceeds limit of 20");
    assert!(err.is_illegal_argument());
}

#[tokio::test]
async fn test_metadata_size_limit() {
    let store = store();
    let alice = user("alice");
    store.create_workspace(&alice, "meta", false, None, None).await.unwrap();
    let mut meta = Metadata::new();
    meta.insert("k".into(), "v".repeat(16_000));
    let mut item = plain(json!({}), &alice);
    item.metadata = meta;
    let err = store.save_objects(&alice, &ws("meta"), vec![item]).await.unwrap_err();
    assert!(err.to_string().starts_with("Metadata size of "));
}

#[tokio::test]
async fn test_return_size_and_spooling() {
    let store = store();
    let alice = user("alice");
    workspace_with(
        &store,
        &alice,
        "ret",
        &[("a", json!({"x": "aaaaaaaaaa"})), ("b", json!({"x": "bbbbbbbbbb"}))],
    )
    .await;
    let each = store.get_objects(Some(&alice), &[obj("ret", "a")]).await.unwrap()[0].info.size;

    let mut config = store.resources().config();
    config.max_returned_data_memory_usage = each;
    store.resources().set_config(config).unwrap();
    let got = store
        .get_objects(Some(&alice), &[obj("ret", "a"), obj("ret", "b")])
        .await
        .unwrap();
    assert!(got.iter().all(|o| o.data.is_file_backed()));
    assert_eq!(got[1].data.json().unwrap(), json!({"x": "bbbbbbbbbb"}));
    assert!(store.resources().temp_files_created() >= 2);

    store.resources().set_max_return_size(2 * each - 1).unwrap();
    let err = store
        .get_objects(Some(&alice), &[obj("ret", "a"), obj("ret", "b")])
        .await
        .unwrap_err();
    assert!(err.to_string().starts_with("Too much data requested from the workspace at once"));
}

#[tokio::test]
async fn test_object_subsets() {
    let store = store();
    let alice = user("alice");
    workspace_with(
        &store,
        &alice,
        "sub",
        &[("o", json!({"keep": {"inner": 1, "drop": 2}, "gone": true}))],
    )
    .await;
    let subset = SubObjectIdentifier {
        object: obj("sub", "o"),
        paths: vec!["/keep/inner".to_string()],
    };
    let got = store.get_object_subsets(Some(&alice), &[subset]).await.unwrap();
    assert_eq!(got[0].data.json().unwrap(), json!({"keep": {"inner": 1}}));

    let bad = SubObjectIdentifier {
        object: obj("sub", "o"),
        paths: vec!["/missing".to_string()],
    };
    assert!(store.get_object_subsets(Some(&alice), &[bad]).await.is_err());
}

#[tokio::test]
async fn test_subset_keeps_arrays() {
    let store = store();
    let alice = user("alice");
    workspace_with(&store, &alice, "s", &[("o", json!({"list": [10, 20, 30], "other": true}))]).await;

    let subset = SubObjectIdentifier {
        object: obj("s", "o"),
        paths: vec!["/list/1".to_string()],
    };
    let got = store.get_object_subsets(Some(&alice), &[subset]).await.unwrap();
    let data = got[0].data.json().unwrap();
    assert!(data["list"].is_array());
    assert_eq!(data, json!({"list": [20]}));
}

#[tokio::test]
async fn test_delete_and_hide_objects() {
    let store = store();
    let alice = user("alice");
    workspace_with(&store, &alice, "dh", &[("a", json!({})), ("b", json!({}))]).await;

    store.set_objects_deleted(&alice, &[obj("dh", "a")], true).await.unwrap();
    let err = store.get_objects(Some(&alice), &[obj("dh", "a")]).await.unwrap_err();
    assert_eq!(err.to_string(), "Object 1 (name a) in workspace 1 has been deleted");
    let err = store.set_objects_hidden(&alice, &[obj("dh", "a")], true).await.unwrap_err();
    assert!(err.to_string().contains("has been deleted"));

    let params = ListObjectsParams {
        workspaces: vec![ws("dh")],
        ..Default::default()
    };
    assert_eq!(store.list_objects(Some(&alice), &params).await.unwrap().len(), 1);
    let with_deleted = ListObjectsParams {
        show_deleted: true,
        ..params.clone()
    };
    assert_eq!(store.list_objects(Some(&alice), &with_deleted).await.unwrap().len(), 2);

    store.set_objects_deleted(&alice, &[obj("dh", "a")], false).await.unwrap();
    store.set_objects_hidden(&alice, &[obj("dh", "b")], true).await.unwrap();
    let listed = store.list_objects(Some(&alice), &params).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].object_name, "a");
    // hidden objects can still be read directly
    assert!(store.get_objects(Some(&alice), &[obj("dh", "b")]).await.is_ok());
}

#[tokio::test]
async fn test_saving_over_deleted_object_undeletes() {
    let store = store();
    let alice = user("alice");
    workspace_with(&store, &alice, "undel", &[("a", json!({"v": 1}))]).await;
    store.set_objects_deleted(&alice, &[obj("undel", "a")], true).await.unwrap();

    let saved = store
        .save_objects(&alice, &ws("undel"), vec![named(json!({"v": 2}), "a", &alice)])
        .await
        .unwrap();
    assert_eq!((saved[0].object_id, saved[0].version), (1, 2));
    assert!(store.get_objects(Some(&alice), &[obj("undel", "a")]).await.is_ok());
}

#[tokio::test]
async fn test_get_object_information_tolerant() {
    let store = store();
    let alice = user("alice");
    workspace_with(&store, &alice, "info", &[("a", json!({}))]).await;
    let ids = [obj("info", "a"), obj("info", "missing"), obj("nowhere", "x")];

    let infos = store
        .get_object_information(Some(&alice), &ids, false, false)
        .await
        .unwrap();
    assert_eq!(infos.len(), 3);
    assert!(infos[0].as_ref().is_some_and(|i| i.metadata.is_none()));
    assert!(infos[1].is_none());
    assert!(infos[2].is_none());

    let err = store
        .get_object_information(Some(&alice), &ids, true, true)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "No object with name missing exists in workspace 1");
}

#[tokio::test]
async fn test_rename_object() {
    let store = store();
    let alice = user("alice");
    workspace_with(&store, &alice, "ren", &[("a", json!({})), ("b", json!({}))]).await;

    let err = store.rename_object(&alice, &obj("ren", "a"), "a").await.unwrap_err();
    assert_eq!(err.to_string(), "Object is already named a");
    let err = store.rename_object(&alice, &obj("ren", "a"), "b").await.unwrap_err();
    assert_eq!(err.to_string(), "There is already an object in the workspace named b");
    assert!(store.rename_object(&alice, &obj("ren", "a"), "7").await.is_err());

    let info = store.rename_object(&alice, &obj("ren", "a"), "c").await.unwrap();
    assert_eq!((info.object_id, info.object_name.as_str()), (1, "c"));
    assert!(store.get_objects(Some(&alice), &[obj("ren", "c")]).await.is_ok());
    assert!(store.get_objects(Some(&alice), &[obj("ren", "a")]).await.is_err());
}

#[tokio::test]
async fn test_copy_to_new_object_copies_history() {
    let store = store();
    let alice = user("alice");
    workspace_with(&store, &alice, "from", &[("src", json!({"v": 1}))]).await;
    for v in 2..=3 {
        store
            .save_objects(&alice, &ws("from"), vec![named(json!({"v": v}), "src", &alice)])
            .await
            .unwrap();
    }
    store.create_workspace(&alice, "to", false, None, None).await.unwrap();

    let info = store.copy_object(&alice, &obj("from", "src"), &obj("to", "dst")).await.unwrap();
    assert_eq!(info.version, 3);
    assert_eq!(info.object_name, "dst");

    let got = store.get_objects(Some(&alice), &[obj_ver("to", "dst", 1)]).await.unwrap();
    assert_eq!(got[0].data.json().unwrap(), json!({"v": 1}));
    assert_eq!(got[0].copied_from.as_deref(), Some("1/1/1"));
    let history = store.get_object_history(Some(&alice), &obj("to", "dst")).await.unwrap();
    assert_eq!(history.len(), 3);
}

#[tokio::test]
async fn test_copy_version_to_new_object() {
    let store = store();
    let alice = user("alice");
    workspace_with(&store, &alice, "from", &[("src", json!({"v": 1}))]).await;
    for v in 2..=3 {
        store
            .save_objects(&alice, &ws("from"), vec![named(json!({"v": v}), "src", &alice)])
            .await
            .unwrap();
    }

    let info = store
        .copy_object(&alice, &obj_ver("from", "src", 2), &obj("from", "newobj"))
        .await
        .unwrap();
    assert_eq!((info.object_id, info.version), (2, 1));

    let got = store.get_objects(Some(&alice), &[obj("from", "newobj")]).await.unwrap();
    assert_eq!(got[0].data.json().unwrap(), json!({"v": 2}));
    assert_eq!(got[0].copied_from.as_deref(), Some("1/1/2"));
    let history = store.get_object_history(Some(&alice), &obj("from", "newobj")).await.unwrap();
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_copy_onto_existing_object() {
    let store = store();
    let alice = user("alice");
    workspace_with(&store, &alice, "cp", &[("a", json!({"v": "a"})), ("b", json!({"v": "b"}))]).await;

    let info = store.copy_object(&alice, &obj("cp", "a"), &obj("cp", "b")).await.unwrap();
    assert_eq!((info.object_id, info.version), (2, 2));
    let got = store.get_objects(Some(&alice), &[obj("cp", "b")]).await.unwrap();
    assert_eq!(got[0].data.json().unwrap(), json!({"v": "a"}));
    assert_eq!(got[0].copied_from.as_deref(), Some("1/1/1"));

    let missing = ObjectIdentifier::numbered(&ws("cp"), 42).unwrap();
    let err = store.copy_object(&alice, &obj("cp", "a"), &missing).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Copy destination is specified as object id 42 in workspace 1 which does not exist."
    );
}

#[tokio::test]
async fn test_revert_object() {
    let store = store();
    let alice = user("alice");
    let bob = user("bob");
    workspace_with(&store, &alice, "rev", &[("o", json!({"v": 1}))]).await;
    store
        .save_objects(&alice, &ws("rev"), vec![named(json!({"v": 2}), "o", &alice)])
        .await
        .unwrap();
    store
        .set_permissions(&alice, &ws("rev"), &[bob.clone()], wstore_core::Permission::Write)
        .await
        .unwrap();

    let info = store.revert_object(&bob, &obj_ver("rev", "o", 1)).await.unwrap();
    assert_eq!(info.version, 3);
    assert_eq!(info.saved_by, bob);
    let got = store.get_objects(Some(&alice), &[obj("rev", "o")]).await.unwrap();
    assert_eq!(got[0].data.json().unwrap(), json!({"v": 1}));
    assert_eq!(got[0].reverted_from, Some(1));
    let first = store.get_objects(Some(&alice), &[obj_ver("rev", "o", 1)]).await.unwrap();
    assert_eq!(got[0].info.checksum, first[0].info.checksum);
}

#[tokio::test]
async fn test_list_objects_filters() {
    let store = store();
    let alice = user("alice");
    let bob = user("bob");
    store.create_workspace(&alice, "la", true, None, None).await.unwrap();
    store
        .set_permissions(&alice, &ws("la"), &[bob.clone()], wstore_core::Permission::Write)
        .await
        .unwrap();
    store
        .save_objects(&alice, &ws("la"), vec![named(json!({}), "p", &alice)])
        .await
        .unwrap();
    store
        .save_objects(&bob, &ws("la"), vec![typed(json!({}), "Test", "Ref", &bob), named(json!({}), "p", &bob)])
        .await
        .unwrap();

    let base = ListObjectsParams {
        workspaces: vec![ws("la")],
        ..Default::default()
    };
    assert_eq!(store.list_objects(None, &base).await.unwrap().len(), 2);

    let all_versions = ListObjectsParams {
        show_all_versions: true,
        ..base.clone()
    };
    assert_eq!(store.list_objects(None, &all_versions).await.unwrap().len(), 3);

    let by_type = ListObjectsParams {
        type_name: Some(TypeDefName::new("Test", "Ref")),
        ..base.clone()
    };
    let listed = store.list_objects(None, &by_type).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].type_string, "Test.Ref-1.0");

    let by_alice = ListObjectsParams {
        saved_by: Some(alice.clone()),
        show_all_versions: true,
        ..base.clone()
    };
    let listed = store.list_objects(None, &by_alice).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].version, 1);

    // no workspaces given means every readable workspace
    store.create_workspace(&bob, "bobs", false, None, None).await.unwrap();
    store
        .save_objects(&bob, &ws("bobs"), vec![plain(json!({}), &bob)])
        .await
        .unwrap();
    let everywhere = store.list_objects(Some(&bob), &Default::default()).await.unwrap();
    assert_eq!(everywhere.len(), 3);
    let anon = store.list_objects(None, &Default::default()).await.unwrap();
    assert_eq!(anon.len(), 2);
}
