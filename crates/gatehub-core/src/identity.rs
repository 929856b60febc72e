use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::capabilities;

/// The distinguished super-capability.
pub const ADMIN_CAPABILITY: &str = capabilities::ADMIN;

/// Boolean grant bag attached to an identity. Opaque to the core: any string
/// can be a capability, and only `admin` has built-in meaning.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Claims(HashMap<String, bool>);

impl Claims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a claims bag granting exactly the listed capabilities.
    pub fn granting<I, S>(capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            capabilities
                .into_iter()
                .map(|c| (c.into(), true))
                .collect(),
        )
    }

    pub fn grant(mut self, capability: impl Into<String>) -> Self {
        self.0.insert(capability.into(), true);
        self
    }

    pub fn set(&mut self, capability: impl Into<String>, granted: bool) {
        self.0.insert(capability.into(), granted);
    }

    /// Whether this exact capability is granted (no `admin` shortcut).
    pub fn granted(&self, capability: &str) -> bool {
        self.0.get(capability).copied().unwrap_or(false)
    }

    /// Capability check: the capability itself, or the `admin`
    /// super-capability.
    pub fn allows(&self, capability: &str) -> bool {
        self.granted(capability) || self.granted(ADMIN_CAPABILITY)
    }

    /// Project onto a known capability list, coercing absent grants to
    /// `false` — the shape permission dumps return.
    pub fn coerced(&self, known: &[&str]) -> HashMap<String, bool> {
        known
            .iter()
            .map(|cap| (cap.to_string(), self.granted(cap)))
            .collect()
    }
}

/// A resolved caller: stable id plus claims. Produced per invocation by the
/// provider; the core never persists one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub claims: Claims,
}

impl Identity {
    pub fn new(id: impl Into<String>, claims: Claims) -> Self {
        Self {
            id: id.into(),
            email: None,
            display_name: None,
            claims,
        }
    }
}

/// External identity provider: verifies credentials and owns the claim
/// store. The pipeline treats every failure here uniformly — a credential
/// that does not resolve is simply "no identity".
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve a raw bearer credential to an identity.
    async fn verify_credential(&self, token: &str) -> Result<Identity>;

    /// Look up an identity by its stable id.
    async fn fetch_identity(&self, id: &str) -> Result<Identity>;

    /// Replace the claims of an identity.
    async fn set_claims(&self, id: &str, claims: Claims) -> Result<()>;

    /// Capability-check hook. The default consults the claims bag with the
    /// `admin` shortcut; providers with an external grant source can
    /// override. Errors are treated as "capability absent" by the pipeline.
    async fn has_capability(&self, identity: &Identity, capability: &str) -> Result<bool> {
        Ok(identity.claims.allows(capability))
    }
}

/// In-memory provider for tests and local wiring: a fixed token table plus a
/// mutable identity map.
#[derive(Default)]
pub struct StaticProvider {
    tokens: RwLock<HashMap<String, String>>,
    identities: RwLock<HashMap<String, Identity>>,
}

impl StaticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an identity and a bearer token resolving to it.
    pub fn add(&self, token: impl Into<String>, identity: Identity) {
        self.tokens
            .write()
            .expect("token table poisoned")
            .insert(token.into(), identity.id.clone());
        self.identities
            .write()
            .expect("identity table poisoned")
            .insert(identity.id.clone(), identity);
    }
}

#[async_trait]
impl IdentityProvider for StaticProvider {
    async fn verify_credential(&self, token: &str) -> Result<Identity> {
        let id = self
            .tokens
            .read()
            .expect("token table poisoned")
            .get(token)
            .cloned()
            .ok_or_else(|| anyhow!("unknown credential"))?;
        self.fetch_identity(&id).await
    }

    async fn fetch_identity(&self, id: &str) -> Result<Identity> {
        self.identities
            .read()
            .expect("identity table poisoned")
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("unknown identity {id}"))
    }

    async fn set_claims(&self, id: &str, claims: Claims) -> Result<()> {
        let mut identities = self.identities.write().expect("identity table poisoned");
        let identity = identities
            .get_mut(id)
            .ok_or_else(|| anyhow!("unknown identity {id}"))?;
        identity.claims = claims;
        Ok(())
    }
}
