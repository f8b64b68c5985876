//! Input-model edits shared by drivers.
//!
//! Every sequence here runs under the model lock. A deployment edits the
//! model, commits, rebuilds configuration, and runs playbooks; if any step
//! fails the edit is undone best-effort before the error is returned.

use std::future::Future;

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::facade::types::{READY_DEPLOYMENT, SITE};
use crate::facade::{FacadeError, PlaybookRun, ServerEntry};
use crate::lifecycle::{LifecycleError, Operation};
use crate::model::{Resource, keys};

use super::DriverContext;

/// Input-model entity holding per-cluster data for managed clusters.
pub const PASS_THROUGH: &str = "pass_through";

/// One edit of the input model.
#[derive(Clone, Debug, PartialEq)]
pub enum ModelChange {
    /// Adds a server entry, replacing one with the same id.
    AddServer(ServerEntry),
    /// Removes a server entry.
    RemoveServer(String),
    /// Adds or replaces the pass-through data of one server id.
    UpsertPassThrough {
        /// Server id keyed in the entity.
        id: String,
        /// Data stored for it.
        data: Value,
    },
    /// Removes the pass-through data of one server id.
    RemovePassThrough(String),
}

impl ModelChange {
    fn describe(&self) -> String {
        match self {
            Self::AddServer(entry) => format!("add server {}", entry.id),
            Self::RemoveServer(id) => format!("remove server {id}"),
            Self::UpsertPassThrough { id, .. } => format!("add pass-through data for {id}"),
            Self::RemovePassThrough(id) => format!("remove pass-through data for {id}"),
        }
    }
}

/// What has to be put back if a change is rolled back.
enum Undo {
    DeleteServer(String),
    RestoreEntity(Value),
    Nothing,
}

/// Returns the input-model server id of `resource`.
///
/// The id recorded at activation wins; otherwise one is derived from the
/// resource name.
#[must_use]
pub fn server_id(resource: &Resource) -> String {
    resource.property(keys::SERVER_ID).map_or_else(
        || {
            resource
                .name
                .trim()
                .chars()
                .map(|ch| {
                    if ch.is_ascii_alphanumeric() {
                        ch.to_ascii_lowercase()
                    } else {
                        '-'
                    }
                })
                .collect()
        },
        ToOwned::to_owned,
    )
}

/// Applies `change`, commits, rebuilds configuration, prepares the
/// deployment, and then runs `playbooks` in order.
///
/// # Errors
///
/// Returns a failure of `operation` after rolling the change back.
pub async fn deploy(
    ctx: &DriverContext,
    change: &ModelChange,
    playbooks: &[(&str, PlaybookRun)],
    operation: Operation,
) -> Result<(), LifecycleError> {
    let holder = format!("{operation} {}", ctx.request.request_id);
    let _guard = ctx.lock().acquire(&holder).await;
    let mut undo = Undo::Nothing;
    let outcome = async {
        undo = apply(ctx, change).await?;
        commit_and_build(ctx, change).await?;
        for (name, run) in playbooks {
            ctx.facade().run_playbook(&ctx.request, name, run).await?;
        }
        Ok::<(), FacadeError>(())
    }
    .await;
    if let Err(err) = outcome {
        warn!(change = %change.describe(), error = %err, "model change failed; rolling back");
        roll_back(ctx, &undo).await;
        return Err(LifecycleError::during(operation)(err));
    }
    info!(change = %change.describe(), "model change deployed");
    Ok(())
}

/// The playbooks run by an activation: `ready_deployment` is already part of
/// [`deploy`], so only the optional site run limited to `server` remains.
#[must_use]
pub fn site_run(server: &str, run_playbook: bool) -> Vec<(&'static str, PlaybookRun)> {
    if run_playbook {
        vec![(SITE, PlaybookRun::limited_to(server))]
    } else {
        Vec::new()
    }
}

/// Runs the optional `before` playbook, then applies a removal, commits,
/// rebuilds configuration, and prepares the deployment.
///
/// # Errors
///
/// Returns a failure of `operation` after reverting uncommitted changes.
pub async fn withdraw(
    ctx: &DriverContext,
    change: &ModelChange,
    before: Option<(&str, PlaybookRun)>,
    operation: Operation,
) -> Result<(), LifecycleError> {
    let holder = format!("{operation} {}", ctx.request.request_id);
    let _guard = ctx.lock().acquire(&holder).await;
    let outcome = async {
        if let Some((name, run)) = &before {
            ctx.facade().run_playbook(&ctx.request, name, run).await?;
        }
        apply(ctx, change).await?;
        commit_and_build(ctx, change).await
    }
    .await;
    if let Err(err) = outcome {
        warn!(change = %change.describe(), error = %err, "model removal failed; reverting");
        best_effort("revert model changes", ctx.facade().revert_changes(&ctx.request)).await;
        return Err(LifecycleError::during(operation)(err));
    }
    info!(change = %change.describe(), "model change withdrawn");
    Ok(())
}

/// Undoes an [`ModelChange::AddServer`] whose deployment already
/// succeeded, for failures in later workflow steps.
pub async fn undo_server(ctx: &DriverContext, server: &str) {
    let holder = format!("rollback {}", ctx.request.request_id);
    let _guard = ctx.lock().acquire(&holder).await;
    roll_back(ctx, &Undo::DeleteServer(server.to_owned())).await;
}

/// Removes pass-through data whose deployment already succeeded, for
/// failures in later workflow steps.
pub async fn undo_pass_through(ctx: &DriverContext, id: &str) {
    let change = ModelChange::RemovePassThrough(id.to_owned());
    if let Err(err) = withdraw(ctx, &change, None, Operation::Activation).await {
        warn!(id, error = %err, "failed to remove pass-through data");
    }
}

/// Points the server entry `server` at `address`.
///
/// # Errors
///
/// Returns an update failure after reverting uncommitted changes.
pub async fn update_server_address(
    ctx: &DriverContext,
    server: &str,
    address: &str,
) -> Result<(), LifecycleError> {
    let holder = format!("update {}", ctx.request.request_id);
    let _guard = ctx.lock().acquire(&holder).await;
    let outcome = async {
        let servers = ctx.facade().list_servers(&ctx.request).await?;
        let Some(mut entry) = servers.into_iter().find(|entry| entry.id == server) else {
            debug!(server, "no server entry to update");
            return Ok(());
        };
        address.clone_into(&mut entry.ip_addr);
        ctx.facade().update_server(&ctx.request, &entry).await?;
        ctx.facade()
            .commit(&ctx.request, &format!("update address of {server}"))
            .await?;
        ctx.facade().run_config_processor(&ctx.request).await
    }
    .await;
    if let Err(err) = outcome {
        best_effort("revert model changes", ctx.facade().revert_changes(&ctx.request)).await;
        return Err(LifecycleError::during(Operation::Update)(err));
    }
    Ok(())
}

/// Runs one playbook under the model lock.
///
/// # Errors
///
/// Returns a failure of `operation` when the play fails.
pub async fn run_locked(
    ctx: &DriverContext,
    name: &str,
    run: &PlaybookRun,
    operation: Operation,
) -> Result<(), LifecycleError> {
    let holder = format!("{operation} {}", ctx.request.request_id);
    let _guard = ctx.lock().acquire(&holder).await;
    ctx.facade()
        .run_playbook(&ctx.request, name, run)
        .await
        .map_err(LifecycleError::during(operation))
}

async fn apply(ctx: &DriverContext, change: &ModelChange) -> Result<Undo, FacadeError> {
    let facade = ctx.facade();
    let request = &ctx.request;
    match change {
        ModelChange::AddServer(entry) => {
            let exists = facade
                .list_servers(request)
                .await?
                .iter()
                .any(|server| server.id == entry.id);
            if exists {
                facade.update_server(request, entry).await?;
            } else {
                facade.add_server(request, entry).await?;
            }
            Ok(Undo::DeleteServer(entry.id.clone()))
        }
        ModelChange::RemoveServer(id) => {
            let exists = facade
                .list_servers(request)
                .await?
                .iter()
                .any(|server| &server.id == id);
            if exists {
                facade.delete_server(request, id).await?;
            }
            Ok(Undo::Nothing)
        }
        ModelChange::UpsertPassThrough { id, data } => {
            let previous = facade.get_entity(request, PASS_THROUGH).await?;
            let next = with_pass_through(&previous, id, Some(data));
            facade.put_entity(request, PASS_THROUGH, &next).await?;
            Ok(Undo::RestoreEntity(previous))
        }
        ModelChange::RemovePassThrough(id) => {
            let previous = facade.get_entity(request, PASS_THROUGH).await?;
            let next = with_pass_through(&previous, id, None);
            facade.put_entity(request, PASS_THROUGH, &next).await?;
            Ok(Undo::Nothing)
        }
    }
}

async fn commit_and_build(ctx: &DriverContext, change: &ModelChange) -> Result<(), FacadeError> {
    let facade = ctx.facade();
    facade.commit(&ctx.request, &change.describe()).await?;
    facade.run_config_processor(&ctx.request).await?;
    facade
        .run_playbook(&ctx.request, READY_DEPLOYMENT, &PlaybookRun::everywhere())
        .await
}

async fn roll_back(ctx: &DriverContext, undo: &Undo) {
    let facade = ctx.facade();
    let request = &ctx.request;
    best_effort("revert model changes", facade.revert_changes(request)).await;
    match undo {
        Undo::DeleteServer(id) => {
            best_effort("delete server entry", facade.delete_server(request, id)).await;
        }
        Undo::RestoreEntity(previous) => {
            best_effort(
                "restore pass-through entity",
                facade.put_entity(request, PASS_THROUGH, previous),
            )
            .await;
        }
        Undo::Nothing => {}
    }
    best_effort("commit rollback", facade.commit(request, "rollback")).await;
    best_effort("rebuild configuration", facade.run_config_processor(request)).await;
}

async fn best_effort<F>(step: &str, action: F)
where
    F: Future<Output = Result<(), FacadeError>>,
{
    if let Err(err) = action.await {
        warn!(step, error = %err, "rollback step failed");
    }
}

/// Returns `entity` with the pass-through entry `id` replaced by `data`, or
/// removed when `data` is `None`.
#[must_use]
pub fn with_pass_through(entity: &Value, id: &str, data: Option<&Value>) -> Value {
    let mut root = entity.as_object().cloned().unwrap_or_default();
    let mut servers: Vec<Value> = root
        .get("servers")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    servers.retain(|server| server.get("id").and_then(Value::as_str) != Some(id));
    if let Some(value) = data {
        servers.push(json!({ "id": id, "data": value }));
    }
    let managed = !servers.is_empty();
    root.insert(String::from("servers"), Value::Array(servers));
    let mut global = root
        .get("global")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    global.insert(String::from("esx_cloud"), Value::Bool(managed));
    root.insert(String::from("global"), Value::Object(global));
    Value::Object(root)
}
