//! Shared fixtures for the store integration tests

#![allow(dead_code)]

use serde_json::Value;
use std::sync::Arc;
use wstore_core::{
    Metadata, ObjectIdentifier, ObjectSelector, Provenance, RefFieldKind, SchemaRegistry,
    StoreConfig, TypeDefId, TypeDefName, TypeSpec, WorkspaceIdentifier, WorkspaceSaveObject,
    WorkspaceStore, WorkspaceUser,
};

pub fn registry() -> SchemaRegistry {
    let registry = SchemaRegistry::new();
    registry.register(TypeSpec::new("Test", "Plain", 1, 0));
    registry.register(TypeSpec::new("Test", "Plain", 2, 0).required("name"));
    registry.register(
        TypeSpec::new("Test", "Ref", 1, 0)
            .reference("ref", RefFieldKind::Single, &[])
            .reference("refs", RefFieldKind::List, &[]),
    );
    registry.register(TypeSpec::new("Test", "OnlyPlain", 1, 0).reference(
        "ref",
        RefFieldKind::Single,
        &[TypeDefName::new("Test", "Plain")],
    ));
    registry.register(TypeSpec::new("Test", "Keyed", 1, 0).reference("map", RefFieldKind::MapKeys, &[]));
    registry.register(TypeSpec::new("Test", "WithSub", 1, 0).subdata("sub"));
    registry
}

pub fn store() -> WorkspaceStore {
    WorkspaceStore::in_memory(Arc::new(registry())).unwrap()
}

pub fn disk_store(config: &StoreConfig) -> WorkspaceStore {
    WorkspaceStore::open(config, Arc::new(registry())).unwrap()
}

pub fn user(name: &str) -> WorkspaceUser {
    WorkspaceUser::new(name).unwrap()
}

pub fn ws(name: &str) -> WorkspaceIdentifier {
    WorkspaceIdentifier::name(name).unwrap()
}

pub fn obj(workspace: &str, name: &str) -> ObjectIdentifier {
    ObjectIdentifier::named(&ws(workspace), name).unwrap()
}

pub fn obj_ver(workspace: &str, name: &str, ver: i64) -> ObjectIdentifier {
    ObjectIdentifier::with_version(ws(workspace), ObjectSelector::name(name).unwrap(), ver).unwrap()
}

pub fn typed(data: Value, module: &str, name: &str, owner: &WorkspaceUser) -> WorkspaceSaveObject {
    WorkspaceSaveObject::new(
        data,
        TypeDefId::exact(module, name, 1, 0),
        Metadata::new(),
        Provenance::new(owner.clone()),
        false,
    )
}

pub fn plain(data: Value, owner: &WorkspaceUser) -> WorkspaceSaveObject {
    typed(data, "Test", "Plain", owner)
}

pub fn named(data: Value, name: &str, owner: &WorkspaceUser) -> WorkspaceSaveObject {
    plain(data, owner).with_target(ObjectSelector::name(name).unwrap())
}

/// Creates `name` owned by `owner` and saves one plain object per entry of `objects`
pub async fn workspace_with(store: &WorkspaceStore, owner: &WorkspaceUser, name: &str, objects: &[(&str, Value)]) {
    store.create_workspace(owner, name, false, None, None).await.unwrap();
    if objects.is_empty() {
        return;
    }
    let items = objects
        .iter()
        .map(|(n, data)| named(data.clone(), n, owner))
        .collect();
    store.save_objects(owner, &ws(name), items).await.unwrap();
}
