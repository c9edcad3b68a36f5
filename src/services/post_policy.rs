use crate::config::IssuerConfig;
use crate::models::SignedPost;
use anyhow::{Result, anyhow};
use aws_sigv4::sign::v4::{calculate_signature, generate_signing_key};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::SystemTime;

pub const ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Issues SigV4 presigned POST grants for single objects.
///
/// Each grant pins the bucket and the exact key and caps the content length,
/// so the holder can write that one object and nothing else.
#[derive(Clone)]
pub struct PostPolicySigner {
    bucket: String,
    region: String,
    endpoint: Option<String>,
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
    max_bytes: u64,
    expiry: Duration,
}

impl std::fmt::Debug for PostPolicySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostPolicySigner")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field("max_bytes", &self.max_bytes)
            .finish_non_exhaustive()
    }
}

impl PostPolicySigner {
    pub fn from_config(config: &IssuerConfig) -> Result<Self> {
        let access_key_id = config
            .access_key_id
            .clone()
            .ok_or_else(|| anyhow!("AWS_ACCESS_KEY_ID must be set"))?;
        let secret_access_key = config
            .secret_access_key
            .clone()
            .ok_or_else(|| anyhow!("AWS_SECRET_ACCESS_KEY must be set"))?;

        Ok(Self {
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            endpoint: config.endpoint.clone(),
            access_key_id,
            secret_access_key,
            session_token: config.session_token.clone(),
            max_bytes: config.grant_max_bytes,
            expiry: Duration::seconds(config.grant_expiry_secs as i64),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Form target: path-style under a custom endpoint, virtual-hosted on AWS
    pub fn post_url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => format!("{}/{}", endpoint.trim_end_matches('/'), self.bucket),
            None => format!("https://{}.s3.{}.amazonaws.com/", self.bucket, self.region),
        }
    }

    pub fn presign(&self, key: &str, now: DateTime<Utc>) -> SignedPost {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let credential = format!(
            "{}/{}/{}/s3/aws4_request",
            self.access_key_id,
            now.format("%Y%m%d"),
            self.region
        );
        let expiration = (now + self.expiry).to_rfc3339_opts(SecondsFormat::Millis, true);

        let mut conditions = vec![
            json!(["content-length-range", 0, self.max_bytes]),
            json!({ "bucket": self.bucket }),
            json!({ "X-Amz-Algorithm": ALGORITHM }),
            json!({ "X-Amz-Credential": credential }),
            json!({ "X-Amz-Date": amz_date }),
        ];
        if let Some(token) = &self.session_token {
            conditions.push(json!({ "X-Amz-Security-Token": token }));
        }
        conditions.push(json!({ "key": key }));

        let policy = json!({ "expiration": expiration, "conditions": conditions });
        let encoded = STANDARD.encode(policy.to_string());

        let signing_key = generate_signing_key(
            &self.secret_access_key,
            SystemTime::from(now),
            &self.region,
            "s3",
        );
        let signature = calculate_signature(signing_key, encoded.as_bytes());

        let mut fields = BTreeMap::new();
        fields.insert("bucket".to_string(), self.bucket.clone());
        fields.insert("X-Amz-Algorithm".to_string(), ALGORITHM.to_string());
        fields.insert("X-Amz-Credential".to_string(), credential);
        fields.insert("X-Amz-Date".to_string(), amz_date);
        if let Some(token) = &self.session_token {
            fields.insert("X-Amz-Security-Token".to_string(), token.clone());
        }
        fields.insert("key".to_string(), key.to_string());
        fields.insert("Policy".to_string(), encoded);
        fields.insert("X-Amz-Signature".to_string(), signature);

        SignedPost {
            url: self.post_url(),
            fields,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::credentials::read_policy;
    use chrono::TimeZone;

    fn signer(config: IssuerConfig) -> PostPolicySigner {
        PostPolicySigner::from_config(&config).unwrap()
    }

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap()
    }

    #[test]
    fn test_requires_credentials() {
        assert!(PostPolicySigner::from_config(&IssuerConfig::default()).is_err());
    }

    #[test]
    fn test_post_url() {
        assert_eq!(
            signer(IssuerConfig::development()).post_url(),
            "http://127.0.0.1:9000/uploads"
        );

        let aws = IssuerConfig {
            endpoint: None,
            bucket: "variants".to_string(),
            region: "ap-southeast-2".to_string(),
            ..IssuerConfig::development()
        };
        assert_eq!(
            signer(aws).post_url(),
            "https://variants.s3.ap-southeast-2.amazonaws.com/"
        );
    }

    #[test]
    fn test_presign_fields() {
        let post = signer(IssuerConfig::development()).presign("uploads/r1_a.vcf.gz", fixed_now());

        assert_eq!(post.fields["key"], "uploads/r1_a.vcf.gz");
        assert_eq!(post.fields["bucket"], "uploads");
        assert_eq!(post.fields["X-Amz-Algorithm"], ALGORITHM);
        assert_eq!(post.fields["X-Amz-Date"], "20260314T092653Z");
        assert_eq!(
            post.fields["X-Amz-Credential"],
            "minioadmin/20260314/us-east-1/s3/aws4_request"
        );
        assert!(!post.fields.contains_key("X-Amz-Security-Token"));

        let signature = &post.fields["X-Amz-Signature"];
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_policy_terms_round_trip_through_client() {
        let now = fixed_now();
        let post = signer(IssuerConfig::development()).presign("uploads/r1_a.vcf.gz", now);
        let terms = read_policy(&post.fields["Policy"]).unwrap();
        assert_eq!(terms.expires_at, Some(now + Duration::seconds(3600)));
        assert_eq!(terms.max_bytes, Some(200_000_000));
    }

    #[test]
    fn test_signature_depends_on_key_and_time() {
        let s = signer(IssuerConfig::development());
        let a = s.presign("uploads/a.vcf.gz", fixed_now());
        let again = s.presign("uploads/a.vcf.gz", fixed_now());
        let other_key = s.presign("uploads/b.vcf.gz", fixed_now());
        let later = s.presign("uploads/a.vcf.gz", fixed_now() + Duration::seconds(1));

        assert_eq!(a.fields["X-Amz-Signature"], again.fields["X-Amz-Signature"]);
        assert_ne!(a.fields["X-Amz-Signature"], other_key.fields["X-Amz-Signature"]);
        assert_ne!(a.fields["X-Amz-Signature"], later.fields["X-Amz-Signature"]);
    }

    #[test]
    fn test_session_token_is_bound() {
        let config = IssuerConfig {
            session_token: Some("token-123".to_string()),
            ..IssuerConfig::development()
        };
        let post = signer(config).presign("uploads/a.vcf.gz", fixed_now());
        assert_eq!(post.fields["X-Amz-Security-Token"], "token-123");

        let raw = STANDARD.decode(&post.fields["Policy"]).unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        let bound = doc["conditions"]
            .as_array()
            .unwrap()
            .iter()
            .any(|c| c["X-Amz-Security-Token"] == "token-123");
        assert!(bound);
    }
}
