use crate::uma::scope_expression::ScopeExpression;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A relying party registered with this proxy.
///
/// Owned by the [`crate::persistence::RpStore`] collaborator; everything else
/// reads it and writes back whole records, serialized per `rp_id` through
/// [`crate::persistence::KeyedLocks`].
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq)]
pub struct Rp {
    /// Opaque identifier handed to the client application at registration
    pub rp_id: String,
    /// Issuer URL of the authorization server this RP trusts
    pub op_host: String,
    /// Client id registered at the authorization server
    pub client_id: String,
    /// Client secret registered at the authorization server
    pub client_secret: String,
    /// Scopes requested at authorization time
    #[serde(default)]
    pub scope: Vec<String>,
    /// Response types registered for this client
    #[serde(default)]
    pub response_types: Vec<String>,
    /// Redirect URIs registered for this client
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    /// UMA resources protected on behalf of this RP, in registration order
    #[serde(default)]
    pub uma_resources: Vec<UmaResource>,
}

impl Rp {
    /// Whether the registered response types include a bare token grant,
    /// in which case an at_hash binding is mandatory.
    pub fn requires_at_hash(&self) -> bool {
        self.response_types.iter().any(|rt| {
            rt.split_whitespace()
                .any(|part| part.eq_ignore_ascii_case("token"))
        })
    }
}

/// A resource registered at the authorization server for an RP.
///
/// `scopes` and `scope_expression` are mutually exclusive; setting one clears
/// the other. `ticket_scopes` are the scopes actually offered when a
/// permission ticket is issued, which differ from `scopes` when an
/// expression governs the resource.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq)]
pub struct UmaResource {
    /// Identifier assigned by the authorization server at registration
    pub id: String,
    /// Path this resource covers
    pub path: String,
    /// HTTP methods this resource covers
    pub http_methods: Vec<String>,
    /// Static scope list
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
    /// Conditional scope rule, used instead of a static list
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_expression: Option<ScopeExpression>,
    /// Scopes offered when a ticket is issued for this resource
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ticket_scopes: Vec<String>,
    /// Creation stamp reported by the authorization server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// Expiry stamp reported by the authorization server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

impl UmaResource {
    /// Whether this resource covers the given method
    pub fn covers(&self, http_method: &str) -> bool {
        self.http_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(http_method))
    }
}

/// OAuth token endpoint response, for both PAT and RPT grants
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Persisted claims token, returned on RPT grants
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pct: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgraded: Option<bool>,
}

/// Introspection response for a requesting-party token
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq)]
pub struct RptIntrospection {
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<RptPermission>,
}

/// One granted permission inside an introspected RPT
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq)]
pub struct RptPermission {
    pub resource_id: String,
    #[serde(default)]
    pub resource_scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

impl RptIntrospection {
    /// Whether any granted permission covers `resource_id` with at least one
    /// of `required_scopes`. With no required scopes a permission on the
    /// resource itself is enough.
    pub fn grants(&self, resource_id: &str, required_scopes: &[String]) -> bool {
        self.active
            && self.permissions.iter().any(|p| {
                p.resource_id == resource_id
                    && (required_scopes.is_empty()
                        || p.resource_scopes
                            .iter()
                            .any(|s| required_scopes.contains(s)))
            })
    }
}
