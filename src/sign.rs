// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use anyhow::{bail, Result};
use constant_time_eq::constant_time_eq;
use data_encoding::BASE64URL_NOPAD;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verifiers reject response timestamps older than this.
pub const SKEW_WINDOW_MS: i64 = 5 * 60 * 1000;

/// HMAC-SHA256 signer over canonical UTF-8 payloads. The header format
/// is `v=1; alg=hmac-sha256; key=<kid>; sig=<base64url(signature)>`.
#[derive(Clone)]
pub struct Signer {
    secret: Vec<u8>,
    key_id: String,
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").field("key_id", &self.key_id).finish()
    }
}

fn mac_bytes(secret: &[u8], payload: &str) -> Result<Vec<u8>> {
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(m) => m,
        _ => bail!("failed to create hmac instance"),
    };
    mac.update(payload.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

impl Signer {
    pub fn new(secret: impl Into<Vec<u8>>, key_id: impl Into<String>) -> Signer {
        Signer {
            secret: secret.into(),
            key_id: key_id.into(),
        }
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn sign(&self, payload: &str) -> Result<String> {
        let sig = mac_bytes(&self.secret, payload)?;
        Ok(format!(
            "v=1; alg=hmac-sha256; key={}; sig={}",
            self.key_id,
            BASE64URL_NOPAD.encode(&sig)
        ))
    }

    /// Verify a signature header against a payload. The comparison is
    /// constant-time; an out-of-window timestamp fails verification.
    pub fn verify(
        &self,
        header: &str,
        payload: &str,
        now_ms: i64,
        timestamp_ms: Option<i64>,
    ) -> Result<bool> {
        let fields = parse_header(header)?;
        if fields.version != "1" || fields.alg != "hmac-sha256" {
            return Ok(false);
        }
        if fields.key_id != self.key_id {
            return Ok(false);
        }
        if let Some(ts) = timestamp_ms {
            if now_ms - ts > SKEW_WINDOW_MS {
                return Ok(false);
            }
        }
        let claimed = match BASE64URL_NOPAD.decode(fields.sig.as_bytes()) {
            Ok(b) => b,
            _ => return Ok(false),
        };
        let expected = mac_bytes(&self.secret, payload)?;
        Ok(constant_time_eq(&claimed, &expected))
    }
}

struct HeaderFields {
    version: String,
    alg: String,
    key_id: String,
    sig: String,
}

fn parse_header(header: &str) -> Result<HeaderFields> {
    let mut version = None;
    let mut alg = None;
    let mut key_id = None;
    let mut sig = None;
    for part in header.split(';') {
        let part = part.trim();
        match part.split_once('=') {
            Some(("v", v)) => version = Some(v.to_string()),
            Some(("alg", v)) => alg = Some(v.to_string()),
            Some(("key", v)) => key_id = Some(v.to_string()),
            Some(("sig", v)) => sig = Some(v.to_string()),
            _ => (),
        }
    }
    match (version, alg, key_id, sig) {
        (Some(version), Some(alg), Some(key_id), Some(sig)) => Ok(HeaderFields {
            version,
            alg,
            key_id,
            sig,
        }),
        _ => bail!("malformed signature header"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify_round_trip() -> Result<()> {
        let signer = Signer::new(b"topsecret".to_vec(), "k1");
        let header = signer.sign("{\"a\":1}")?;
        assert!(header.starts_with("v=1; alg=hmac-sha256; key=k1; sig="));
        assert!(signer.verify(&header, "{\"a\":1}", 0, None)?);
        assert!(!signer.verify(&header, "{\"a\":2}", 0, None)?);
        Ok(())
    }

    #[test]
    fn same_payload_same_signature() -> Result<()> {
        let a = Signer::new(b"s".to_vec(), "kid").sign("payload")?;
        let b = Signer::new(b"s".to_vec(), "kid").sign("payload")?;
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn stale_timestamp_is_rejected() -> Result<()> {
        let signer = Signer::new(b"s".to_vec(), "kid");
        let header = signer.sign("p")?;
        let now = 10 * 60 * 1000;
        assert!(!signer.verify(&header, "p", now, Some(0))?);
        assert!(signer.verify(&header, "p", now, Some(now - 1000))?);
        Ok(())
    }

    #[test]
    fn malformed_header_is_an_error() {
        let signer = Signer::new(b"s".to_vec(), "kid");
        assert!(signer.verify("not a header", "p", 0, None).is_err());
    }
}
