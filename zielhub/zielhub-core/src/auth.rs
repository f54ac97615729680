//! The two authorization channels: authority sessions and per-form access
//! codes.
//!
//! Sessions identify an authority principal via a bearer token. Access codes
//! are the school-side credential: an opaque human-typeable token bound 1:1
//! to a form, stored only as a digest of its normalized text.

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::store::Role;

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
}

#[async_trait]
pub trait SessionVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Option<Claims>;
}

pub struct Hs256Verifier {
    key: DecodingKey,
}

impl Hs256Verifier {
    pub fn new(secret: String) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

#[async_trait]
impl SessionVerifier for Hs256Verifier {
    async fn verify(&self, token: &str) -> Option<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();
        decode::<Claims>(token, &self.key, &validation)
            .ok()
            .map(|d| d.claims)
    }
}

/// Outcome of a capability check. Both channels feed this shared type so the
/// status gate downstream never cares which channel authorized the call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthDecision {
    Allowed,
    Denied(DeniedReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeniedReason {
    /// Session principal is not the form's owner.
    NotOwner,
    /// Superadmins have no access to the form resource class at all.
    RolePartition,
}

/// Ownership check for the session channel. Superadmin is a strict privilege
/// partition, not a superset: it is denied here unconditionally.
pub fn authorize_owner(claims: &Claims, form_owner: Option<Uuid>) -> AuthDecision {
    if claims.role == Role::Superadmin {
        return AuthDecision::Denied(DeniedReason::RolePartition);
    }
    match form_owner {
        Some(owner) if owner == claims.sub => AuthDecision::Allowed,
        _ => AuthDecision::Denied(DeniedReason::NotOwner),
    }
}

// Unambiguous uppercase alphabet: no I/O/0/1 so a code survives being read
// over the phone or typed from a printout.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LEN: usize = 8;

pub fn generate_access_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// Case-fold and trim before any lookup or comparison, so the school can
/// type the code however it was transcribed.
pub fn normalize_code(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Digest of the normalized code. Used both as the store's lookup key and
/// for presented-vs-stored comparison; comparing fixed-length digests never
/// short-circuits on a matching prefix of the secret itself.
pub fn code_digest(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_code(raw).as_bytes());
    hex::encode(hasher.finalize())
}

/// Verify a presented code against a stored digest.
pub fn code_matches(candidate: &str, stored_digest: &str) -> bool {
    code_digest(candidate) == stored_digest
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    #[test]
    fn normalization_folds_case_and_whitespace() {
        assert_eq!(normalize_code("  ab2c  "), "AB2C");
        assert_eq!(code_digest("ab2c"), code_digest(" AB2C "));
    }

    #[test]
    fn digest_distinguishes_codes() {
        assert_ne!(code_digest("AAAA2222"), code_digest("AAAA2223"));
        assert!(code_matches("xk4p2mnq", &code_digest("XK4P2MNQ")));
        assert!(!code_matches("XK4P2MNR", &code_digest("XK4P2MNQ")));
    }

    #[test]
    fn generated_codes_use_safe_alphabet() {
        for _ in 0..50 {
            let code = generate_access_code();
            assert_eq!(code.len(), 8);
            assert!(code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn ownership_partition() {
        let owner = Uuid::new_v4();
        let admin = Claims {
            sub: owner,
            role: Role::Admin,
        };
        assert_eq!(authorize_owner(&admin, Some(owner)), AuthDecision::Allowed);
        assert_eq!(
            authorize_owner(&admin, Some(Uuid::new_v4())),
            AuthDecision::Denied(DeniedReason::NotOwner)
        );
        assert_eq!(
            authorize_owner(&admin, None),
            AuthDecision::Denied(DeniedReason::NotOwner)
        );

        // Denied even if a form somehow records the superadmin as owner.
        let superadmin = Claims {
            sub: owner,
            role: Role::Superadmin,
        };
        assert_eq!(
            authorize_owner(&superadmin, Some(owner)),
            AuthDecision::Denied(DeniedReason::RolePartition)
        );
    }

    #[tokio::test]
    async fn hs256_verifier_round_trip() {
        let secret = "test-secret".to_string();
        let claims = Claims {
            sub: Uuid::new_v4(),
            role: Role::Admin,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap();

        let verifier = Hs256Verifier::new(secret);
        let verified = verifier.verify(&token).await.unwrap();
        assert_eq!(verified.sub, claims.sub);

        assert!(verifier.verify("not-a-token").await.is_none());
    }
}
