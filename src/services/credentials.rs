use crate::models::{GrantConstraints, GrantPair, SignedPost, SignedUrlResponse, WriteGrant};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Both a vcf and an index name are required")]
    MissingName,

    #[error("Grant issuer rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Grant issuer unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Grant issuer response did not contain both grants")]
    Incomplete,

    #[error("Grant is missing the '{0}' field")]
    MissingField(&'static str),

    #[error("Malformed grant policy: {0}")]
    MalformedPolicy(String),
}

/// Mints the pair of write grants for one attempt.
///
/// Both grants are issued together or the call fails; a failed call leaves
/// nothing usable behind.
#[async_trait]
pub trait CredentialIssuer: Send + Sync {
    async fn issue(&self, primary_name: &str, index_name: &str)
    -> Result<GrantPair, CredentialError>;
}

/// Expiry and size limit recovered from a presigned POST policy
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PolicyTerms {
    pub expires_at: Option<DateTime<Utc>>,
    pub max_bytes: Option<u64>,
}

/// Decodes the base64 `Policy` document of a presigned POST
pub fn read_policy(encoded: &str) -> Result<PolicyTerms, CredentialError> {
    let raw = STANDARD
        .decode(encoded)
        .map_err(|e| CredentialError::MalformedPolicy(format!("invalid base64: {e}")))?;
    let doc: Value = serde_json::from_slice(&raw)
        .map_err(|e| CredentialError::MalformedPolicy(format!("invalid json: {e}")))?;

    let expires_at = match doc.get("expiration").and_then(Value::as_str) {
        Some(s) => Some(
            DateTime::parse_from_rfc3339(s)
                .map_err(|e| CredentialError::MalformedPolicy(format!("bad expiration '{s}': {e}")))?
                .with_timezone(&Utc),
        ),
        None => None,
    };

    let max_bytes = doc
        .get("conditions")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_array)
        .find(|c| c.first().and_then(Value::as_str) == Some("content-length-range"))
        .and_then(|c| c.get(2))
        .and_then(Value::as_u64);

    Ok(PolicyTerms {
        expires_at,
        max_bytes,
    })
}

/// Turns one `{url, fields}` entry into a grant.
///
/// Terms missing from the policy fall back to `fallback_expiry` and
/// `fallback_max_bytes`.
pub fn grant_from_signed_post(
    post: SignedPost,
    fallback_expiry: DateTime<Utc>,
    fallback_max_bytes: u64,
) -> Result<WriteGrant, CredentialError> {
    let target_key = post
        .fields
        .get("key")
        .cloned()
        .ok_or(CredentialError::MissingField("key"))?;
    let bucket = post
        .fields
        .get("bucket")
        .cloned()
        .ok_or(CredentialError::MissingField("bucket"))?;

    let terms = match post.fields.get("Policy") {
        Some(policy) => read_policy(policy)?,
        None => PolicyTerms::default(),
    };

    Ok(WriteGrant {
        url: post.url,
        bucket,
        target_key,
        expires_at: terms.expires_at.unwrap_or(fallback_expiry),
        constraints: GrantConstraints {
            max_bytes: terms.max_bytes.unwrap_or(fallback_max_bytes),
        },
        fields: post.fields,
    })
}

/// Requests grants from the `GET /signed_url` endpoint
pub struct HttpCredentialIssuer {
    client: reqwest::Client,
    base_url: String,
    fallback_validity: Duration,
    fallback_max_bytes: u64,
}

impl HttpCredentialIssuer {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        fallback_validity_secs: u64,
        fallback_max_bytes: u64,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            fallback_validity: Duration::seconds(fallback_validity_secs as i64),
            fallback_max_bytes,
        }
    }
}

#[async_trait]
impl CredentialIssuer for HttpCredentialIssuer {
    async fn issue(
        &self,
        primary_name: &str,
        index_name: &str,
    ) -> Result<GrantPair, CredentialError> {
        if primary_name.is_empty() || index_name.is_empty() {
            return Err(CredentialError::MissingName);
        }

        let url = format!("{}/signed_url", self.base_url.trim_end_matches('/'));
        tracing::debug!("Requesting grants from {} for {} + {}", url, primary_name, index_name);

        let issued_at = Utc::now();
        let response = self
            .client
            .get(&url)
            .query(&[("vcf", primary_name), ("index", index_name)])
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        let body: Option<SignedUrlResponse> = serde_json::from_str(&text).ok();

        let urls = match body {
            Some(SignedUrlResponse {
                success: true,
                urls: Some(urls),
                ..
            }) if status.is_success() => urls,
            Some(SignedUrlResponse {
                success: true,
                urls: None,
                ..
            }) if status.is_success() => return Err(CredentialError::Incomplete),
            other => {
                let message = other.and_then(|b| b.error).unwrap_or(text);
                return Err(CredentialError::Rejected {
                    status: status.as_u16(),
                    message,
                });
            }
        };

        let fallback_expiry = issued_at + self.fallback_validity;
        let primary = grant_from_signed_post(urls.vcf_url, fallback_expiry, self.fallback_max_bytes)?;
        let index =
            grant_from_signed_post(urls.index_url, fallback_expiry, self.fallback_max_bytes)?;

        tracing::info!(
            "Received grants for {} and {} (expire {})",
            primary.target_key,
            index.target_key,
            primary.expires_at
        );

        Ok(GrantPair { primary, index })
    }
}
