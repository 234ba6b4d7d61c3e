//! Minimal AWS Signature Version 4 signer, scoped to what a single
//! `bedrock-runtime` `InvokeModel` POST needs: one signed header set per
//! request, no chunked payload signing, no query-string signing variant.

use chrono::Utc;
use hmac::{Hmac, Mac};
use relay_core::error::GatewayError;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub struct SigV4Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub region: String,
}

pub struct SignedHeaders {
    pub x_amz_date: String,
    pub authorization: String,
    pub x_amz_security_token: Option<String>,
}

fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Signs a `bedrock-runtime` request. `canonical_uri` must already be
/// percent-encoded; `host` and `path_and_query` come from the request the
/// caller is about to send.
pub fn sign(
    creds: &SigV4Credentials,
    method: &str,
    host: &str,
    canonical_uri: &str,
    body: &[u8],
) -> Result<SignedHeaders, GatewayError> {
    let now = Utc::now();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date_stamp = now.format("%Y%m%d").to_string();
    let service = "bedrock";

    let payload_hash = sha256_hex(body);

    let mut header_pairs = vec![
        ("content-type".to_string(), "application/json".to_string()),
        ("host".to_string(), host.to_string()),
        ("x-amz-date".to_string(), amz_date.clone()),
    ];
    if let Some(token) = &creds.session_token {
        header_pairs.push(("x-amz-security-token".to_string(), token.clone()));
    }
    header_pairs.sort_by(|a, b| a.0.cmp(&b.0));

    let signed_headers = header_pairs.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>().join(";");
    let canonical_headers: String = header_pairs.iter().map(|(k, v)| format!("{k}:{v}\n")).collect();

    let canonical_request =
        format!("{method}\n{canonical_uri}\n\n{canonical_headers}\n{signed_headers}\n{payload_hash}");

    let credential_scope = format!("{date_stamp}/{}/{service}/aws4_request", creds.region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{amz_date}\n{credential_scope}\n{}",
        sha256_hex(canonical_request.as_bytes())
    );

    let k_date = hmac(format!("AWS4{}", creds.secret_access_key).as_bytes(), date_stamp.as_bytes());
    let k_region = hmac(&k_date, creds.region.as_bytes());
    let k_service = hmac(&k_region, service.as_bytes());
    let k_signing = hmac(&k_service, b"aws4_request");
    let signature = hex::encode(hmac(&k_signing, string_to_sign.as_bytes()));

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{credential_scope}, SignedHeaders={signed_headers}, Signature={signature}",
        creds.access_key_id
    );

    Ok(SignedHeaders {
        x_amz_date: amz_date,
        authorization,
        x_amz_security_token: creds.session_token.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn produces_well_formed_authorization_header() {
        let creds = SigV4Credentials {
            access_key_id: "AKIDEXAMPLE".into(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY".into(),
            session_token: None,
            region: "us-east-1".into(),
        };
        let signed = sign(&creds, "POST", "bedrock-runtime.us-east-1.amazonaws.com", "/model/anthropic.claude-3-sonnet/invoke", b"{}").unwrap();
        assert!(signed.authorization.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/"));
        assert!(signed.authorization.contains("SignedHeaders=content-type;host;x-amz-date"));
        assert_eq!(signed.x_amz_security_token, None);
    }

    #[test]
    fn includes_session_token_header_when_present() {
        let creds = SigV4Credentials {
            access_key_id: "AKIDEXAMPLE".into(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY".into(),
            session_token: Some("token123".into()),
            region: "us-east-1".into(),
        };
        let signed = sign(&creds, "POST", "bedrock-runtime.us-east-1.amazonaws.com", "/model/anthropic.claude-3-sonnet/invoke", b"{}").unwrap();
        assert!(signed.authorization.contains("x-amz-security-token"));
        assert_eq!(signed.x_amz_security_token.as_deref(), Some("token123"));
    }
}
