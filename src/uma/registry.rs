use crate::discovery::DiscoveryService;
use crate::models::{Rp, UmaResource};
use crate::persistence::{KeyedLocks, RpStore};
use crate::uma::pat::PatLifecycle;
use crate::uma::scope_expression::ScopeExpression;
use crate::uma::{call_as, call_as_json, with_pat_retry, AsAuth, Payload, UmaError};
use chrono::Utc;
use log::{info, warn};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use utoipa::ToSchema;

/// A resource the caller wants protected: a path, the methods it covers,
/// and either a flat scope list or a scope expression
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ResourceDescriptor {
    pub path: String,
    pub http_methods: Vec<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_expression: Option<ScopeExpression>,
}

/// Replacement scopes for [`ResourceRegistry::modify`]
#[derive(Debug, Clone)]
pub enum ScopeChange {
    Scopes(Vec<String>),
    Expression(ScopeExpression),
}

/// Wire form of a resource at the AS registration endpoint
#[derive(Debug, Serialize, Deserialize)]
struct ResourceDescription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default)]
    resource_scopes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RegistrationResponse {
    #[serde(rename = "_id")]
    id: String,
    #[serde(default)]
    iat: Option<i64>,
    #[serde(default)]
    exp: Option<i64>,
}

/// Registers resources at the AS resource registration endpoint and keeps
/// the RP's local resource list in step with it. All mutations for one RP
/// run under that RP's lock.
pub struct ResourceRegistry {
    http: Client,
    discovery: Arc<DiscoveryService>,
    rps: Arc<dyn RpStore>,
    pats: Arc<PatLifecycle>,
    locks: Arc<KeyedLocks>,
}

impl ResourceRegistry {
    pub fn new(
        http: Client,
        discovery: Arc<DiscoveryService>,
        rps: Arc<dyn RpStore>,
        pats: Arc<PatLifecycle>,
        locks: Arc<KeyedLocks>,
    ) -> Self {
        Self {
            http,
            discovery,
            rps,
            pats,
            locks,
        }
    }

    /// Register a batch of resources for the RP.
    ///
    /// The batch must not protect the same (path, method) pair twice. An RP
    /// that already has protected resources rejects the call unless
    /// `overwrite` is set, in which case the existing registrations are
    /// deleted at the AS and replaced by the new batch.
    pub async fn protect(
        &self,
        rp_id: &str,
        descriptors: Vec<ResourceDescriptor>,
        overwrite: bool,
    ) -> Result<Vec<UmaResource>, UmaError> {
        validate_batch(&descriptors)?;

        let _guard = self.locks.acquire(rp_id).await;
        let mut rp = self.rps.load(rp_id).await?;
        let metadata = self.discovery.metadata(&rp.op_host).await?;
        let endpoint = metadata
            .resource_registration_endpoint
            .as_deref()
            .ok_or(UmaError::MissingEndpoint("resource_registration"))?
            .to_string();

        if !rp.uma_resources.is_empty() {
            if !overwrite {
                return Err(UmaError::AlreadyProtected);
            }
            self.deregister_all(&rp, &endpoint).await?;
            rp.uma_resources.clear();
            // the old ids are gone at the AS; persist the empty list before
            // re-registering so a mid-batch failure cannot leave the stored
            // record pointing at deleted resources
            self.rps.save(rp.clone()).await?;
        }

        let mut created = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let resource = self.register_one(&rp, &endpoint, descriptor).await?;
            rp.uma_resources.push(resource.clone());
            self.rps.save(rp.clone()).await?;
            created.push(resource);
        }
        info!("Protected {} resources for {}", created.len(), rp_id);
        Ok(created)
    }

    /// Replace the scopes of the resource protecting (path, method) with a
    /// flat scope list or a scope expression. The AS registration is
    /// updated first; the local resource only changes once the AS accepts.
    pub async fn modify(
        &self,
        rp_id: &str,
        path: &str,
        http_method: &str,
        change: ScopeChange,
    ) -> Result<UmaResource, UmaError> {
        if let ScopeChange::Expression(expression) = &change {
            expression.validate()?;
        }

        let _guard = self.locks.acquire(rp_id).await;
        let mut rp = self.rps.load(rp_id).await?;
        let index = rp
            .uma_resources
            .iter()
            .position(|resource| resource.path == path && resource.covers(http_method))
            .ok_or_else(|| UmaError::ResourceNotProtected {
                path: path.to_string(),
                http_method: http_method.to_string(),
            })?;
        let resource_id = rp.uma_resources[index].id.clone();

        let metadata = self.discovery.metadata(&rp.op_host).await?;
        let endpoint = metadata
            .resource_registration_endpoint
            .as_deref()
            .ok_or(UmaError::MissingEndpoint("resource_registration"))?
            .to_string();
        let url = format!("{}/{}", endpoint.trim_end_matches('/'), resource_id);

        let ticket_scopes = match &change {
            ScopeChange::Scopes(scopes) => scopes.clone(),
            ScopeChange::Expression(expression) => expression.ticket_scopes(),
        };

        // read-merge-write so fields the AS tracks beside scopes survive
        let current: ResourceDescription = with_pat_retry(&self.pats, rp_id, |pat| {
            let url = url.clone();
            async move {
                call_as_json(
                    &self.http,
                    Method::GET,
                    &url,
                    AsAuth::Bearer(&pat.token),
                    Payload::Empty,
                )
                .await
            }
        })
        .await?;

        let merged = serde_json::to_value(ResourceDescription {
            name: current.name,
            resource_scopes: ticket_scopes.clone(),
        })?;
        with_pat_retry(&self.pats, rp_id, |pat| {
            let url = url.clone();
            let merged = merged.clone();
            async move {
                call_as(
                    &self.http,
                    Method::PUT,
                    &url,
                    AsAuth::Bearer(&pat.token),
                    Payload::Json(&merged),
                )
                .await
            }
        })
        .await?;

        let resource = &mut rp.uma_resources[index];
        match change {
            ScopeChange::Scopes(scopes) => {
                resource.scopes = scopes;
                resource.scope_expression = None;
            }
            ScopeChange::Expression(expression) => {
                resource.scopes = Vec::new();
                resource.scope_expression = Some(expression);
            }
        }
        resource.ticket_scopes = ticket_scopes;
        let updated = resource.clone();
        self.rps.save(rp).await?;
        info!("Updated scopes for {} {} on {}", http_method, path, rp_id);
        Ok(updated)
    }

    async fn register_one(
        &self,
        rp: &Rp,
        endpoint: &str,
        descriptor: ResourceDescriptor,
    ) -> Result<UmaResource, UmaError> {
        if let Some(expression) = &descriptor.scope_expression {
            expression.validate()?;
        }
        let ticket_scopes = match &descriptor.scope_expression {
            Some(expression) => expression.ticket_scopes(),
            None => descriptor.scopes.clone(),
        };

        let registration = serde_json::to_value(ResourceDescription {
            name: Some(descriptor.path.clone()),
            resource_scopes: ticket_scopes.clone(),
        })?;
        let response: RegistrationResponse = with_pat_retry(&self.pats, &rp.rp_id, |pat| {
            let registration = registration.clone();
            async move {
                call_as_json(
                    &self.http,
                    Method::POST,
                    endpoint,
                    AsAuth::Bearer(&pat.token),
                    Payload::Json(&registration),
                )
                .await
            }
        })
        .await?;

        let (scopes, scope_expression) = match descriptor.scope_expression {
            Some(expression) => (Vec::new(), Some(expression)),
            None => (descriptor.scopes, None),
        };
        Ok(UmaResource {
            id: response.id,
            path: descriptor.path,
            http_methods: descriptor.http_methods,
            scopes,
            scope_expression,
            ticket_scopes,
            iat: response.iat.or_else(|| Some(Utc::now().timestamp())),
            exp: response.exp,
        })
    }

    async fn deregister_all(&self, rp: &Rp, endpoint: &str) -> Result<(), UmaError> {
        for resource in &rp.uma_resources {
            let url = format!("{}/{}", endpoint.trim_end_matches('/'), resource.id);
            let result = with_pat_retry(&self.pats, &rp.rp_id, |pat| {
                let url = url.clone();
                async move {
                    call_as(
                        &self.http,
                        Method::DELETE,
                        &url,
                        AsAuth::Bearer(&pat.token),
                        Payload::Empty,
                    )
                    .await
                }
            })
            .await;
            match result {
                Ok(_) => {}
                // already gone at the AS, nothing to undo locally
                Err(UmaError::Upstream { status: 404, .. }) => {
                    warn!("Resource {} was already deleted at the AS", resource.id);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}

/// Find the registered resource covering this request, if any
pub fn lookup<'r>(rp: &'r Rp, path: &str, http_method: &str) -> Option<&'r UmaResource> {
    rp.uma_resources
        .iter()
        .find(|resource| resource.path == path && resource.covers(http_method))
}

fn validate_batch(descriptors: &[ResourceDescriptor]) -> Result<(), UmaError> {
    let mut seen: HashSet<(String, String)> = HashSet::new();
    for descriptor in descriptors {
        for http_method in &descriptor.http_methods {
            let pair = (descriptor.path.clone(), http_method.to_uppercase());
            if !seen.insert(pair) {
                return Err(UmaError::DuplicateMethod {
                    path: descriptor.path.clone(),
                    http_method: http_method.clone(),
                });
            }
        }
    }
    Ok(())
}
