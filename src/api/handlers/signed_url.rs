use crate::AppState;
use crate::api::error::AppError;
use crate::api::middleware::request_id::RequestId;
use crate::models::{SignedUrlResponse, SignedUrls};
use axum::{
    Extension, Json,
    extract::{Query, State, rejection::QueryRejection},
};
use chrono::Utc;
use serde::Deserialize;
use std::path::Path;
use utoipa::IntoParams;

#[derive(Debug, Deserialize, IntoParams)]
pub struct SignedUrlQuery {
    /// Name of the compressed VCF
    pub vcf: Option<String>,
    /// Name of its index
    pub index: Option<String>,
}

/// Final path component of a client-supplied name, so it cannot escape the key prefix
fn object_name(name: &str) -> Option<&str> {
    let base = Path::new(name).file_name().and_then(|n| n.to_str())?;
    if base.is_empty() || base.contains('\\') {
        return None;
    }
    Some(base)
}

/// Object key for one file of a request
pub fn object_key(prefix: &str, request_id: &str, name: &str) -> String {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        format!("{}_{}", request_id, name)
    } else {
        format!("{}/{}_{}", prefix, request_id, name)
    }
}

#[utoipa::path(
    get,
    path = "/signed_url",
    params(SignedUrlQuery),
    responses(
        (status = 200, description = "Grants for both files", body = SignedUrlResponse),
        (status = 400, description = "A file name is missing", body = SignedUrlResponse)
    ),
    tag = "uploads"
)]
pub async fn signed_url(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    query: Result<Query<SignedUrlQuery>, QueryRejection>,
) -> Result<Json<SignedUrlResponse>, AppError> {
    let Query(query) =
        query.map_err(|rejection| AppError::BadRequest(rejection.body_text()))?;

    let (Some(vcf), Some(index)) = (
        query.vcf.as_deref().and_then(object_name),
        query.index.as_deref().and_then(object_name),
    ) else {
        return Err(AppError::BadRequest(
            "VCF and Index both are required".to_string(),
        ));
    };

    let now = Utc::now();
    let prefix = &state.config.upload_prefix;
    let vcf_url = state
        .signer
        .presign(&object_key(prefix, &request_id, vcf), now);
    let index_url = state
        .signer
        .presign(&object_key(prefix, &request_id, index), now);

    tracing::info!(
        "🔑 Issued grants for request {} ({} + {})",
        request_id,
        vcf,
        index
    );

    Ok(Json(SignedUrlResponse {
        success: true,
        urls: Some(SignedUrls { vcf_url, index_url }),
        error: None,
    }))
}
