//! AWS Signature Version 4 query-string presigning
//!
//! Only what the S3 backend needs: presigned URLs signing the `host` header
//! with an unsigned payload.

use crate::credentials::AwsCredentials;
use crate::error::{RockError, RockResult};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "AWS4-HMAC-SHA256";
const SERVICE: &str = "s3";

/// One request to presign
#[derive(Debug, Clone)]
pub struct PresignRequest<'a> {
    pub method: &'a str,
    /// `http` or `https`
    pub scheme: &'a str,
    /// Host, with port when not the scheme default
    pub host: &'a str,
    /// Unencoded absolute path, e.g. `/bucket/dir/file.zip`
    pub path: &'a str,
    /// Extra query parameters, unencoded
    pub query: &'a [(&'a str, &'a str)],
}

/// Build a presigned URL valid for `expires_secs` from `now`
pub fn presign_url(
    credentials: &AwsCredentials,
    region: &str,
    request: &PresignRequest<'_>,
    now: DateTime<Utc>,
    expires_secs: u64,
) -> RockResult<String> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = now.format("%Y%m%d").to_string();
    let scope = format!("{}/{}/{}/aws4_request", date_stamp, region, SERVICE);
    let credential = format!("{}/{}", credentials.access_key_id, scope);
    let expires = expires_secs.to_string();

    let mut params: Vec<(String, String)> = vec![
        ("X-Amz-Algorithm".into(), ALGORITHM.into()),
        ("X-Amz-Credential".into(), credential),
        ("X-Amz-Date".into(), amz_date.clone()),
        ("X-Amz-Expires".into(), expires),
        ("X-Amz-SignedHeaders".into(), "host".into()),
    ];
    if let Some(token) = &credentials.session_token {
        params.push(("X-Amz-Security-Token".into(), token.clone()));
    }
    params.extend(
        request
            .query
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string())),
    );

    let canonical_uri = encode_path(request.path);
    let canonical_query = canonical_query(&params);
    let canonical_request = format!(
        "{}\n{}\n{}\nhost:{}\n\nhost\nUNSIGNED-PAYLOAD",
        request.method, canonical_uri, canonical_query, request.host
    );
    let string_to_sign = format!(
        "{}\n{}\n{}\n{}",
        ALGORITHM,
        amz_date,
        scope,
        hex::encode(Sha256::digest(canonical_request.as_bytes()))
    );

    let key = signing_key(&credentials.secret_access_key, &date_stamp, region)?;
    let signature = hex::encode(hmac(&key, string_to_sign.as_bytes())?);

    Ok(format!(
        "{}://{}{}?{}&X-Amz-Signature={}",
        request.scheme, request.host, canonical_uri, canonical_query, signature
    ))
}

fn signing_key(secret: &str, date_stamp: &str, region: &str) -> RockResult<Vec<u8>> {
    let k_date = hmac(format!("AWS4{}", secret).as_bytes(), date_stamp.as_bytes())?;
    let k_region = hmac(&k_date, region.as_bytes())?;
    let k_service = hmac(&k_region, SERVICE.as_bytes())?;
    hmac(&k_service, b"aws4_request")
}

fn hmac(key: &[u8], data: &[u8]) -> RockResult<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| RockError::Internal(format!("HMAC key rejected: {}", e)))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Sorted, RFC 3986 encoded query string
fn canonical_query(params: &[(String, String)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (urlencoding::encode(k).into_owned(), urlencoding::encode(v).into_owned()))
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Encode each path segment, keeping the `/` separators
pub fn encode_path(path: &str) -> String {
    let encoded = path
        .split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/");
    if encoded.starts_with('/') {
        encoded
    } else {
        format!("/{}", encoded)
    }
}
