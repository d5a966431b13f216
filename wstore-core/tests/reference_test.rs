//! Reference rewriting and reference graph integration tests

mod common;

use common::*;
use serde_json::json;
use wstore_core::{ObjectChain, Permission, Provenance, ProvenanceAction, WorkspaceError};

#[tokio::test]
async fn test_references_rewritten_to_absolute() {
    let store = store();
    let alice = user("alice");
    workspace_with(&store, &alice, "refs", &[("target", json!({"t": 1}))]).await;

    let item = typed(
        json!({"ref": "refs/target", "refs": ["1/1", "refs/target/1"]}),
        "Test",
        "Ref",
        &alice,
    )
    .with_target(wstore_core::ObjectSelector::name("holder").unwrap());
    store.save_objects(&alice, &ws("refs"), vec![item]).await.unwrap();

    let got = store.get_objects(Some(&alice), &[obj("refs", "holder")]).await.unwrap();
    assert_eq!(
        got[0].data.json().unwrap(),
        json!({"ref": "1/1/1", "refs": ["1/1/1", "1/1/1"]})
    );
    assert_eq!(got[0].references, vec!["1/1/1".to_string()]);
}

#[tokio::test]
async fn test_map_key_references() {
    let store = store();
    let alice = user("alice");
    workspace_with(&store, &alice, "keys", &[("a", json!({})), ("b", json!({}))]).await;

    let item = typed(json!({"map": {"keys/a": 1, "keys/b": 2}}), "Test", "Keyed", &alice);
    let saved = store.save_objects(&alice, &ws("keys"), vec![item]).await.unwrap();
    let got = store
        .get_objects(Some(&alice), &[obj("keys", &saved[0].object_name)])
        .await
        .unwrap();
    assert_eq!(got[0].data.json().unwrap(), json!({"map": {"1/1/1": 1, "1/2/1": 2}}));

    let dup = typed(json!({"map": {"keys/a": 1, "1/1": 2}}), "Test", "Keyed", &alice);
    let err = store.save_objects(&alice, &ws("keys"), vec![dup]).await.unwrap_err();
    assert!(matches!(err, WorkspaceError::TypedObjectValidation { position: 1, .. }));
    let msg = err.to_string();
    assert!(msg.contains("Two references in a single hash are identical when resolved"));
    assert!(msg.contains("Duplicated key '1/1/1' was found at /map"));
}

#[tokio::test]
async fn test_inaccessible_reference() {
    let store = store();
    let alice = user("alice");
    let bob = user("bob");
    workspace_with(&store, &bob, "bobs", &[("secret", json!({}))]).await;
    store.create_workspace(&alice, "alices", false, None, None).await.unwrap();

    let item = typed(json!({"ref": "bobs/secret"}), "Test", "Ref", &alice);
    let err = store.save_objects(&alice, &ws("alices"), vec![item]).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Object #1 has inaccessible reference bobs/secret: Object secret cannot be accessed: \
         User alice may not read workspace bobs"
    );

    let item = typed(json!({"ref": "bobs/nothing"}), "Test", "Ref", &alice);
    store.set_global_permission(&bob, &ws("bobs"), Permission::Read).await.unwrap();
    let err = store.save_objects(&alice, &ws("alices"), vec![item]).await.unwrap_err();
    assert!(err.to_string().starts_with("Object #1 has inaccessible reference bobs/nothing: "));
}

#[tokio::test]
async fn test_unparseable_reference() {
    let store = store();
    let alice = user("alice");
    store.create_workspace(&alice, "bad", false, None, None).await.unwrap();
    let item = typed(json!({"ref": "a/b/c/d"}), "Test", "Ref", &alice);
    let err = store.save_objects(&alice, &ws("bad"), vec![item]).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Object #1 has unparseable reference a/b/c/d: \
         Illegal number of separators / in object reference a/b/c/d"
    );
}

#[tokio::test]
async fn test_reference_type_restriction() {
    let store = store();
    let alice = user("alice");
    workspace_with(&store, &alice, "typed", &[("plain", json!({}))]).await;
    let holder = typed(json!({}), "Test", "Ref", &alice)
        .with_target(wstore_core::ObjectSelector::name("refobj").unwrap());
    store.save_objects(&alice, &ws("typed"), vec![holder]).await.unwrap();

    let ok = typed(json!({"ref": "typed/plain"}), "Test", "OnlyPlain", &alice);
    store.save_objects(&alice, &ws("typed"), vec![ok]).await.unwrap();

    let bad = typed(json!({"ref": "typed/refobj"}), "Test", "OnlyPlain", &alice);
    let err = store.save_objects(&alice, &ws("typed"), vec![bad]).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Object #1: The type Test.Ref-1.0 of reference typed/refobj contained in this object \
         is not allowed for this object's type, Test.OnlyPlain-1.0"
    );
}

#[tokio::test]
async fn test_provenance_references() {
    let store = store();
    let alice = user("alice");
    workspace_with(&store, &alice, "prov", &[("input", json!({}))]).await;

    let mut item = plain(json!({}), &alice);
    item.provenance = Provenance::new(alice.clone()).add_action(
        ProvenanceAction::new()
            .with_service("assembler", Some("1.2"))
            .with_workspace_objects(["prov/input"]),
    );
    let saved = store.save_objects(&alice, &ws("prov"), vec![item]).await.unwrap();
    let got = store
        .get_objects(Some(&alice), &[obj("prov", &saved[0].object_name)])
        .await
        .unwrap();
    let action = &got[0].provenance.actions[0];
    assert_eq!(action.workspace_objects, vec!["prov/input".to_string()]);
    assert_eq!(action.resolved_objects, vec!["1/1/1".to_string()]);
    assert!(got[0].references.is_empty());

    let mut bad = plain(json!({}), &alice);
    bad.provenance = Provenance::new(alice.clone())
        .add_action(ProvenanceAction::new().with_workspace_objects(["prov/absent"]));
    let err = store.save_objects(&alice, &ws("prov"), vec![bad]).await.unwrap_err();
    assert!(err
        .to_string()
        .starts_with("Object #1 has inaccessible provenance reference prov/absent: "));
}

#[tokio::test]
async fn test_referencing_objects() {
    let store = store();
    let alice = user("alice");
    let bob = user("bob");
    workspace_with(&store, &alice, "graph", &[("target", json!({}))]).await;
    store.set_global_permission(&alice, &ws("graph"), Permission::Read).await.unwrap();
    store.create_workspace(&bob, "bobgraph", false, None, None).await.unwrap();

    let from_alice = typed(json!({"ref": "graph/target"}), "Test", "Ref", &alice)
        .with_target(wstore_core::ObjectSelector::name("a_ref").unwrap());
    store.save_objects(&alice, &ws("graph"), vec![from_alice]).await.unwrap();
    let from_bob = typed(json!({"ref": "graph/target"}), "Test", "Ref", &bob)
        .with_target(wstore_core::ObjectSelector::name("b_ref").unwrap());
    store.save_objects(&bob, &ws("bobgraph"), vec![from_bob]).await.unwrap();

    let target = [obj("graph", "target")];
    let counts = store.get_referencing_object_counts(Some(&alice), &target).await.unwrap();
    assert_eq!(counts, vec![2]);

    // alice cannot read bob's workspace
    let seen = store.get_referencing_objects(Some(&alice), &target).await.unwrap();
    assert_eq!(seen[0].len(), 1);
    assert_eq!(seen[0][0].object_name, "a_ref");
    let seen = store.get_referencing_objects(Some(&bob), &target).await.unwrap();
    assert_eq!(seen[0].len(), 2);

    store.set_objects_deleted(&alice, &[obj("graph", "a_ref")], true).await.unwrap();
    let seen = store.get_referencing_objects(Some(&bob), &target).await.unwrap();
    assert_eq!(seen[0].len(), 1);
    assert_eq!(seen[0][0].object_name, "b_ref");
    let counts = store.get_referencing_object_counts(Some(&bob), &target).await.unwrap();
    assert_eq!(counts, vec![2]);
}

#[tokio::test]
async fn test_referenced_objects_follow_chain() {
    let store = store();
    let alice = user("alice");
    let bob = user("bob");
    workspace_with(&store, &alice, "hidden_src", &[("leaf", json!({"leaf": true}))]).await;
    store.create_workspace(&alice, "shared", false, None, None).await.unwrap();
    let head = typed(json!({"ref": "hidden_src/leaf"}), "Test", "Ref", &alice)
        .with_target(wstore_core::ObjectSelector::name("head").unwrap());
    store.save_objects(&alice, &ws("shared"), vec![head]).await.unwrap();
    store
        .set_permissions(&alice, &ws("shared"), &[bob.clone()], Permission::Read)
        .await
        .unwrap();

    assert!(store.get_objects(Some(&bob), &[obj("hidden_src", "leaf")]).await.is_err());
    let chain = ObjectChain::new(obj("shared", "head"), vec![obj("hidden_src", "leaf")]);
    let got = store.get_referenced_objects(Some(&bob), &[chain]).await.unwrap();
    assert_eq!(got[0].data.json().unwrap(), json!({"leaf": true}));
    assert_eq!(got[0].info.object_name, "leaf");

    workspace_with(&store, &alice, "other", &[("loose", json!({}))]).await;
    let broken = ObjectChain::new(obj("shared", "head"), vec![obj("other", "loose")]);
    let err = store.get_referenced_objects(Some(&alice), &[broken]).await.unwrap_err();
    assert!(matches!(err, WorkspaceError::NoSuchReference(_)));
    assert_eq!(
        err.to_string(),
        "The object head in workspace shared does not contain the reference 3/1/1"
    );

    let err = store.get_referenced_objects(Some(&alice), &[]).await.unwrap_err();
    assert_eq!(err.to_string(), "No object identifiers provided");
}

#[tokio::test]
async fn test_chain_through_deleted_hop_workspace() {
    let store = store();
    let alice = user("alice");
    workspace_with(&store, &alice, "leafws", &[("leaf", json!({}))]).await;
    store.create_workspace(&alice, "headws", false, None, None).await.unwrap();
    let head = typed(json!({"ref": "leafws/leaf"}), "Test", "Ref", &alice)
        .with_target(wstore_core::ObjectSelector::name("head").unwrap());
    store.save_objects(&alice, &ws("headws"), vec![head]).await.unwrap();

    store.set_workspace_deleted(&alice, &ws("leafws"), true).await.unwrap();
    let chain = ObjectChain::new(obj("headws", "head"), vec![obj("leafws", "leaf")]);
    let err = store.get_referenced_objects(Some(&alice), &[chain]).await.unwrap_err();
    assert!(matches!(err, WorkspaceError::InaccessibleObject { .. }));
    assert!(err.to_string().starts_with("Object leaf cannot be accessed: "));
}
