//! Built-in functions every hub ships with: liveness, introspection, the
//! permission-administration surface, and profile pictures.
//!
//! Per-deployment business functions are registered by the embedder next to
//! these at startup.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use gatehub_protocol::{ApiError, FunctionInfo, Invocation, Reply};
use gatehub_store::FileStore;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error};

use crate::capabilities;
use crate::identity::{Claims, Identity, IdentityProvider};
use crate::pipeline::Hub;
use crate::registry::{FnHandler, FunctionSpec, Handler, Registry};

const PICTURES_DIR: &str = "profile-pictures";

/// Register the built-in function set on a freshly opened hub.
pub fn register_all(hub: &Hub) -> Result<()> {
    let provider = hub.provider().clone();
    let preserve_admin = hub.config().preserve_admin_on_edit;

    hub.register(
        FunctionSpec::new(
            "ping",
            FnHandler(|_inv: Invocation, _id: Option<Identity>| async {
                Ok(Reply::json(200, json!({ "message": "pong" })))
            }),
        )
        .summary("Check that the hub is up")
        .tag("meta")
        .response_schema(json!({
            "type": "object",
            "properties": { "message": { "type": "string" } },
            "required": ["message"]
        })),
    )?;

    hub.register(
        FunctionSpec::new(
            "functions.list",
            FunctionsList {
                registry: hub.registry().clone(),
            },
        )
        .summary("Describe every registered function")
        .tag("meta")
        .response_schema(schema_of::<Vec<FunctionInfo>>()),
    )?;

    hub.register(
        FunctionSpec::new(
            "users.permissions.get",
            PermissionsGet {
                provider: provider.clone(),
            },
        )
        .summary("Read a user's capability grants (own account, or roles editor)")
        .tag("users")
        .requires_auth()
        .input_schema(schema_of::<PermissionsGetArgs>()),
    )?;

    hub.register(
        FunctionSpec::new(
            "users.permissions.update",
            PermissionsUpdate {
                provider,
                preserve_admin,
            },
        )
        .summary("Replace a user's capability grants")
        .tag("users")
        .require(capabilities::USERS_ROLES_EDIT)
        .input_schema(schema_of::<PermissionsUpdateArgs>()),
    )?;

    hub.register(
        FunctionSpec::new(
            "users.picture.upload",
            PictureUpload {
                files: hub.files().clone(),
            },
        )
        .summary("Store the caller's profile picture")
        .tag("users")
        .requires_auth(),
    )?;

    hub.register(
        FunctionSpec::new(
            "users.picture.get",
            PictureGet {
                files: hub.files().clone(),
            },
        )
        .summary("Fetch a user's profile picture")
        .tag("users")
        .input_schema(schema_of::<PictureGetArgs>()),
    )?;

    Ok(())
}

fn schema_of<T: JsonSchema>() -> serde_json::Value {
    serde_json::to_value(schemars::schema_for!(T)).expect("builtin schema")
}

fn parse_args<T: serde::de::DeserializeOwned>(invocation: &Invocation) -> Result<T, ApiError> {
    serde_json::from_value(invocation.body.clone())
        .map_err(|e| ApiError::InvalidArgument(e.to_string()))
}

struct FunctionsList {
    registry: Arc<Registry>,
}

#[async_trait]
impl Handler for FunctionsList {
    async fn call(&self, _inv: Invocation, _id: Option<Identity>) -> Result<Reply, ApiError> {
        Ok(Reply::data(json!(self.registry.infos())))
    }
}

#[derive(Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct PermissionsGetArgs {
    /// Id of the user whose grants are requested.
    user_id: String,
}

struct PermissionsGet {
    provider: Arc<dyn IdentityProvider>,
}

#[async_trait]
impl Handler for PermissionsGet {
    async fn call(&self, inv: Invocation, identity: Option<Identity>) -> Result<Reply, ApiError> {
        let args: PermissionsGetArgs = parse_args(&inv)?;
        let caller = identity.ok_or(ApiError::Unauthorized)?;

        let own_account = caller.id == args.user_id;
        let may_view = own_account
            || self
                .provider
                .has_capability(&caller, capabilities::USERS_ROLES_EDIT)
                .await
                .unwrap_or(false);
        if !may_view {
            return Err(ApiError::Forbidden {
                function: inv.function.clone(),
                capability: capabilities::USERS_ROLES_EDIT.to_string(),
            });
        }

        let target = self.provider.fetch_identity(&args.user_id).await.map_err(|err| {
            debug!(user = %args.user_id, error = %err, "permissions lookup failed");
            ApiError::NotFound(format!("user \"{}\"", args.user_id))
        })?;
        Ok(Reply::data(json!({
            "user_id": target.id,
            "permissions": target.claims.coerced(capabilities::known()),
        })))
    }
}

#[derive(Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct PermissionsUpdateArgs {
    /// Id of the user to update.
    user_id: String,
    /// Capabilities to grant; everything not listed is revoked.
    permissions: Vec<String>,
}

struct PermissionsUpdate {
    provider: Arc<dyn IdentityProvider>,
    preserve_admin: bool,
}

#[async_trait]
impl Handler for PermissionsUpdate {
    async fn call(&self, inv: Invocation, identity: Option<Identity>) -> Result<Reply, ApiError> {
        let args: PermissionsUpdateArgs = parse_args(&inv)?;
        let caller = identity.ok_or(ApiError::Unauthorized)?;

        let target = self.provider.fetch_identity(&args.user_id).await.map_err(|err| {
            debug!(user = %args.user_id, error = %err, "permissions update target missing");
            ApiError::NotFound(format!("user \"{}\"", args.user_id))
        })?;

        let mut claims = Claims::granting(args.permissions.iter().cloned());

        // Policy, not invariant: a roles editor who is not an admin cannot
        // strip the admin grant from an admin — it is silently reinstated.
        // Controlled by `preserve_admin_on_edit` in the hub config.
        if self.preserve_admin && !claims.granted(capabilities::ADMIN) {
            let target_is_admin = self
                .provider
                .has_capability(&target, capabilities::ADMIN)
                .await
                .unwrap_or(false);
            let caller_is_admin = self
                .provider
                .has_capability(&caller, capabilities::ADMIN)
                .await
                .unwrap_or(false);
            if target_is_admin && !caller_is_admin {
                claims.set(capabilities::ADMIN, true);
            }
        }

        self.provider
            .set_claims(&args.user_id, claims.clone())
            .await
            .map_err(|err| {
                error!(user = %args.user_id, error = %err, "claim update failed");
                ApiError::Internal
            })?;

        Ok(Reply::data(json!({
            "message": "permissions updated",
            "user_id": args.user_id,
            "permissions": claims,
        })))
    }
}

struct PictureUpload {
    files: FileStore,
}

#[async_trait]
impl Handler for PictureUpload {
    async fn call(&self, inv: Invocation, identity: Option<Identity>) -> Result<Reply, ApiError> {
        let caller = identity.ok_or(ApiError::Unauthorized)?;
        let Some(upload) = &inv.upload else {
            return Err(ApiError::InvalidArgument("no file has been uploaded".into()));
        };

        // The picture is keyed by the caller's uid, one per account.
        let name = FileStore::sanitize_name(&caller.id);
        let path = self
            .files
            .save(&format!("{PICTURES_DIR}/{name}"), &upload.bytes, false)
            .map_err(|err| ApiError::Io(err.to_string()))?;

        Ok(Reply::data(json!({
            "message": "profile picture uploaded",
            "path": path,
            "url": format!("/users.picture.get?uid={}", caller.id),
        })))
    }
}

#[derive(Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct PictureGetArgs {
    /// Id of the user whose picture is requested.
    uid: String,
}

struct PictureGet {
    files: FileStore,
}

#[async_trait]
impl Handler for PictureGet {
    async fn call(&self, inv: Invocation, _id: Option<Identity>) -> Result<Reply, ApiError> {
        let args: PictureGetArgs = parse_args(&inv)?;
        let name = FileStore::sanitize_name(&args.uid);
        match self.files.get(&format!("{PICTURES_DIR}/{name}")) {
            Some(bytes) => Ok(Reply::bytes("image/jpeg", bytes)),
            None => Err(ApiError::NotFound("profile picture".into())),
        }
    }
}
