//! Delegation token sealer: encrypt+compress+seal and the inverse unseal,
//! per the `v1`/`v2` payload shapes. Every unseal failure mode — bad
//! base64, bad cipher text, bad compression, bad JSON, unknown version, or
//! a stale `t` — collapses to the same opaque error so no oracle leaks to
//! the client about which check failed.

use std::io::{Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::URL_SAFE, Engine};
use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::model::Conditions;

const MAX_TOKEN_BYTES: usize = 8192;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

#[derive(Clone)]
pub struct TokenConfig {
    key: [u8; 16],
    iv: [u8; 16],
    max_age_secs: i64,
}

impl TokenConfig {
    pub fn from_app_config(cfg: &AppConfig) -> Self {
        Self {
            key: derive_128(&cfg.token_salt, &cfg.token_key),
            iv: derive_128(&cfg.token_salt, &cfg.token_iv),
            max_age_secs: cfg.token_max_age_secs,
        }
    }
}

fn derive_128(salt: &str, material: &str) -> [u8; 16] {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(material.as_bytes());
    let digest = hasher.finalize();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest[..16]);
    out
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub account: PrincipalRef,
    #[serde(default)]
    pub user: Option<PrincipalRef>,
    #[serde(default)]
    pub roles: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrincipalRef {
    pub uuid: Uuid,
}

/// The modern (v2) sealed payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPayloadV2 {
    pub t: i64,
    pub p: Principal,
    pub c: Conditions,
    pub v: u8,
    /// The full `keyId` of the signature that minted this token, if any.
    /// A later request presenting this token alongside its own signature
    /// must sign with this exact keyId (spec §4.3 stage 10).
    #[serde(rename = "dk", default)]
    pub devkey_id: Option<String>,
}

impl TokenPayloadV2 {
    pub fn new(now_ms: i64, principal: Principal, conditions: &Conditions, devkey_id: Option<String>) -> Self {
        Self {
            t: now_ms,
            p: principal,
            c: conditions.token_subset(),
            v: 2,
            devkey_id,
        }
    }
}

/// The legacy (v1) sealed payload: `{u, l, g, t}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPayloadV1 {
    pub u: Uuid,
    pub l: String,
    #[serde(default)]
    pub g: Vec<String>,
    pub t: i64,
}

#[derive(Debug, Clone)]
pub enum UnsealedToken {
    V1(TokenPayloadV1),
    V2(TokenPayloadV2),
}

impl UnsealedToken {
    pub fn account_uuid(&self) -> Uuid {
        match self {
            UnsealedToken::V1(p) => p.u,
            UnsealedToken::V2(p) => p.p.account.uuid,
        }
    }

    pub fn user_uuid(&self) -> Option<Uuid> {
        match self {
            UnsealedToken::V1(_) => None,
            UnsealedToken::V2(p) => p.p.user.as_ref().map(|u| u.uuid),
        }
    }

    pub fn is_implicit_operator(&self) -> bool {
        match self {
            UnsealedToken::V1(p) => p.g.iter().any(|g| g == "operators"),
            UnsealedToken::V2(_) => false,
        }
    }

    pub fn conditions(&self) -> Conditions {
        match self {
            UnsealedToken::V1(_) => Conditions::default(),
            UnsealedToken::V2(p) => p.c.clone(),
        }
    }

    pub fn devkey_id(&self) -> Option<&str> {
        match self {
            UnsealedToken::V1(_) => None,
            UnsealedToken::V2(p) => p.devkey_id.as_deref(),
        }
    }
}

pub struct TokenSealer {
    cfg: TokenConfig,
}

impl TokenSealer {
    pub fn new(cfg: TokenConfig) -> Self {
        Self { cfg }
    }

    pub fn seal(&self, payload: &TokenPayloadV2) -> AppResult<String> {
        let json = serde_json::to_vec(payload).map_err(AppError::internal)?;
        let compressed = compress(&json).map_err(AppError::internal)?;
        let ciphertext = encrypt(&self.cfg, &compressed);
        let encoded = URL_SAFE.encode(ciphertext);
        if encoded.len() > MAX_TOKEN_BYTES {
            return Err(AppError::internal("sealed token exceeds header size budget"));
        }
        Ok(encoded)
    }

    /// Any failure mode here — decode, decrypt, decompress, parse, version,
    /// or staleness — returns the same opaque error.
    pub fn unseal(&self, token: &str) -> AppResult<UnsealedToken> {
        self.try_unseal(token).map_err(|_| AppError::InvalidAuthenticationToken)
    }

    fn try_unseal(&self, token: &str) -> Result<UnsealedToken, ()> {
        let ciphertext = URL_SAFE.decode(token).map_err(|_| ())?;
        let compressed = decrypt(&self.cfg, &ciphertext).map_err(|_| ())?;
        let json = decompress(&compressed).map_err(|_| ())?;
        let value: serde_json::Value = serde_json::from_slice(&json).map_err(|_| ())?;
        let version = value.get("v").and_then(|v| v.as_u64()).unwrap_or(1);
        let unsealed = match version {
            1 => UnsealedToken::V1(serde_json::from_value(value).map_err(|_| ())?),
            2 => UnsealedToken::V2(serde_json::from_value(value).map_err(|_| ())?),
            _ => return Err(()),
        };
        let t = match &unsealed {
            UnsealedToken::V1(p) => p.t,
            UnsealedToken::V2(p) => p.t,
        };
        let now = now_ms();
        if now.saturating_sub(t) > self.cfg.max_age_secs * 1000 {
            return Err(());
        }
        Ok(unsealed)
    }
}

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

fn compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

fn decompress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

fn encrypt(cfg: &TokenConfig, plaintext: &[u8]) -> Vec<u8> {
    Aes128CbcEnc::new(&cfg.key.into(), &cfg.iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
}

fn decrypt(cfg: &TokenConfig, ciphertext: &[u8]) -> Result<Vec<u8>, ()> {
    Aes128CbcDec::new(&cfg.key.into(), &cfg.iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sealer() -> TokenSealer {
        TokenSealer::new(TokenConfig {
            key: derive_128("salt", "key"),
            iv: derive_128("salt", "iv"),
            max_age_secs: 3600,
        })
    }

    fn sample_v2() -> TokenPayloadV2 {
        TokenPayloadV2::new(
            now_ms(),
            Principal {
                account: PrincipalRef { uuid: Uuid::new_v4() },
                user: None,
                roles: vec![],
            },
            &Conditions {
                active_roles: vec![Uuid::new_v4()],
                fromjob: true,
                ..Default::default()
            },
            Some("/poseidon/keys/ab:cd".into()),
        )
    }

    #[test]
    fn round_trips_v2_payload() {
        let sealer = sealer();
        let payload = sample_v2();
        let sealed = sealer.seal(&payload).unwrap();
        let unsealed = sealer.unseal(&sealed).unwrap();
        match unsealed {
            UnsealedToken::V2(p) => {
                assert_eq!(p.p.account.uuid, payload.p.account.uuid);
                assert_eq!(p.c.fromjob, true);
                assert_eq!(p.devkey_id.as_deref(), Some("/poseidon/keys/ab:cd"));
            }
            _ => panic!("expected v2"),
        }
    }

    #[test]
    fn token_subset_excludes_date_sourceip_user_agent() {
        let conditions = Conditions {
            date: Some("2026-07-31".into()),
            sourceip: Some("10.0.0.1".into()),
            user_agent: Some("curl".into()),
            active_roles: vec![Uuid::new_v4()],
            fromjob: true,
            ..Default::default()
        };
        let subset = conditions.token_subset();
        assert!(subset.date.is_none());
        assert!(subset.sourceip.is_none());
        assert!(subset.user_agent.is_none());
        assert_eq!(subset.active_roles, conditions.active_roles);
        assert!(subset.fromjob);
    }

    #[test]
    fn accepts_legacy_v1_payload_and_marks_operator_group() {
        let sealer = sealer();
        let v1 = TokenPayloadV1 {
            u: Uuid::new_v4(),
            l: "poseidon".into(),
            g: vec!["operators".into()],
            t: now_ms(),
        };
        let json = serde_json::to_vec(&v1).unwrap();
        let compressed = compress(&json).unwrap();
        let ciphertext = encrypt(&sealer.cfg, &compressed);
        let encoded = URL_SAFE.encode(ciphertext);

        let unsealed = sealer.unseal(&encoded).unwrap();
        assert!(unsealed.is_implicit_operator());
        assert_eq!(unsealed.account_uuid(), v1.u);
    }

    #[test]
    fn rejects_tampered_ciphertext_with_opaque_error() {
        let sealer = sealer();
        let sealed = sealer.seal(&sample_v2()).unwrap();
        let mut tampered = sealed.clone();
        tampered.push('x');
        let err = sealer.unseal(&tampered).unwrap_err();
        assert!(matches!(err, AppError::InvalidAuthenticationToken));
    }

    #[test]
    fn rejects_stale_token() {
        let sealer = TokenSealer::new(TokenConfig {
            key: derive_128("salt", "key"),
            iv: derive_128("salt", "iv"),
            max_age_secs: 0,
        });
        std::thread::sleep(std::time::Duration::from_millis(5));
        let mut payload = sample_v2();
        payload.t = now_ms() - 10_000;
        let sealed = sealer.seal(&payload).unwrap();
        let err = sealer.unseal(&sealed).unwrap_err();
        assert!(matches!(err, AppError::InvalidAuthenticationToken));
    }

    #[test]
    fn rejects_unknown_version() {
        let sealer = sealer();
        let mut payload = sample_v2();
        payload.v = 7;
        let json = serde_json::to_vec(&payload).unwrap();
        let compressed = compress(&json).unwrap();
        let ciphertext = encrypt(&sealer.cfg, &compressed);
        let encoded = URL_SAFE.encode(ciphertext);
        let err = sealer.unseal(&encoded).unwrap_err();
        assert!(matches!(err, AppError::InvalidAuthenticationToken));
    }
}
