use utoipa::OpenApi;

pub(crate) const HEALTH_TAG: &str = "Health API";
pub(crate) const SITE_TAG: &str = "Site API";
pub(crate) const UMA_TAG: &str = "UMA API";

#[derive(OpenApi)]
#[openapi(
    tags(
        (name = HEALTH_TAG, description = "Health check endpoints"),
        (name = SITE_TAG, description = "RP registration and OpenID Connect response validation"),
        (name = UMA_TAG, description = "UMA 2.0 resource protection and access decisions"),
    ),
    info(
        title = "UMA RP Proxy API",
        description = "OAuth2 / OpenID Connect / UMA 2.0 relying-party proxy",
        version = "1.0.0"
    )
)]
pub(crate) struct ApiDoc;
