//! Provenance records
//!
//! A provenance is an ordered list of actions describing how a version came
//! to be. Actions may name workspace objects; those names are resolved at
//! save time exactly like data references and stored next to the originals.

use crate::error::Result;
use crate::ids::WorkspaceUser;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub user: WorkspaceUser,
    pub date: DateTime<Utc>,
    pub actions: Vec<ProvenanceAction>,
}

impl Provenance {
    pub fn new(user: WorkspaceUser) -> Self {
        Self {
            user,
            date: Utc::now(),
            actions: Vec::new(),
        }
    }

    pub fn add_action(mut self, action: ProvenanceAction) -> Self {
        self.actions.push(action);
        self
    }

    /// Serialized size, checked against the provenance limit
    pub fn size(&self) -> Result<u64> {
        Ok(serde_json::to_vec(self)?.len() as u64)
    }

    /// Every object reference named by any action, in order
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.actions
            .iter()
            .flat_map(|a| a.workspace_objects.iter().map(String::as_str))
    }

    /// Fills each action's resolved list from `resolve`
    pub(crate) fn with_resolved<F>(mut self, mut resolve: F) -> Self
    where
        F: FnMut(&str) -> Option<String>,
    {
        for action in &mut self.actions {
            action.resolved_objects = action
                .workspace_objects
                .iter()
                .filter_map(|r| resolve(r))
                .collect();
        }
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvenanceAction {
    pub time: Option<DateTime<Utc>>,
    pub service: Option<String>,
    pub service_version: Option<String>,
    pub method: Option<String>,
    pub method_parameters: Vec<Value>,
    pub script: Option<String>,
    pub script_version: Option<String>,
    pub command_line: Option<String>,
    pub description: Option<String>,
    pub incoming_args: Vec<String>,
    pub outgoing_args: Vec<String>,
    pub custom: BTreeMap<String, String>,
    /// Object references as supplied by the caller
    pub workspace_objects: Vec<String>,
    /// The same references in absolute `ws/obj/ver` form, filled at save time
    pub resolved_objects: Vec<String>,
}

impl ProvenanceAction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service(mut self, service: &str, version: Option<&str>) -> Self {
        self.service = Some(service.to_string());
        self.service_version = version.map(str::to_string);
        self
    }

    pub fn with_method(mut self, method: &str) -> Self {
        self.method = Some(method.to_string());
        self
    }

    pub fn with_method_parameters(mut self, params: Vec<Value>) -> Self {
        self.method_parameters = params;
        self
    }

    pub fn with_time(mut self, time: DateTime<Utc>) -> Self {
        self.time = Some(time);
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn with_workspace_objects<I, S>(mut self, refs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.workspace_objects = refs.into_iter().map(Into::into).collect();
        self
    }
}
