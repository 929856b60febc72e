//! The gated dispatch core: a process-wide function registry plus the
//! authorization pipeline that fronts every invocation.
//!
//! The transport hands [`gatehub_protocol::Invocation`]s to [`Hub::invoke`]
//! and forwards the [`gatehub_protocol::Reply`] it gets back; identity
//! verification is delegated to an [`IdentityProvider`] implementation the
//! embedder supplies.

pub mod builtins;
pub mod capabilities;
mod config;
pub mod identity;
mod pipeline;
pub mod registry;

pub use config::{config_schema_json, load_config, HubConfig};
pub use identity::{Claims, Identity, IdentityProvider, StaticProvider, ADMIN_CAPABILITY};
pub use pipeline::Hub;
pub use registry::{FnHandler, FunctionSpec, Handler, Registry, RegistryError};
