//! WAMP-CRA (Challenge-Response Authentication).
//!
//! A realm may be configured with an [`AuthProvider`] that looks up a
//! secret (optionally PBKDF2-salted) for an `authid` and checks a client's
//! signature of the router-issued challenge before completing the
//! handshake. Credential storage and the challenge transport itself are
//! the embedder's concern; this module only computes and verifies the
//! cryptographic pieces, following the fixture in wampcc's
//! `internal_server` test helper (salt/iterations/keylen, HMAC-SHA256 over
//! a JSON challenge string, base64 throughout).

use std::collections::HashMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::{thread_rng, Rng};
use serde::Serialize;
use sha2::Sha256;

use crate::{Error, ErrorKind, WampResult, ID};

/// Salting parameters for a PBKDF2-derived WAMP-CRA secret.
#[derive(Debug, Clone)]
pub struct CraSalt {
    pub salt: String,
    pub iterations: u32,
    pub keylen: u32,
}

/// Credentials a realm holds for one `authid`.
#[derive(Debug, Clone)]
pub struct CraCredentials {
    /// The plain secret, or the PBKDF2 passphrase when `salt` is set.
    pub secret: String,
    pub salt: Option<CraSalt>,
    pub authrole: String,
}

/// Looks up CRA credentials by `authid` for a realm.
///
/// Implementations typically wrap a static map or an external user store;
/// the router never persists credentials itself.
pub trait AuthProvider: Send + Sync {
    fn lookup(&self, authid: &str) -> Option<CraCredentials>;
}

/// An in-memory [`AuthProvider`] suitable for tests and small deployments.
pub struct StaticAuthProvider {
    users: HashMap<String, CraCredentials>,
}

impl StaticAuthProvider {
    pub fn new() -> StaticAuthProvider {
        StaticAuthProvider {
            users: HashMap::new(),
        }
    }

    pub fn add_user(&mut self, authid: &str, credentials: CraCredentials) {
        self.users.insert(authid.to_string(), credentials);
    }
}

impl Default for StaticAuthProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthProvider for StaticAuthProvider {
    fn lookup(&self, authid: &str) -> Option<CraCredentials> {
        self.users.get(authid).cloned()
    }
}

#[derive(Serialize)]
struct ChallengeData<'a> {
    nonce: String,
    authprovider: &'static str,
    authid: &'a str,
    authrole: &'a str,
    authmethod: &'static str,
    session: ID,
}

/// Builds the JSON challenge string signed by the client, and returns it
/// alongside the derived key the router expects the signature to be made
/// under.
pub fn make_challenge(
    session: ID,
    authid: &str,
    credentials: &CraCredentials,
) -> WampResult<(String, Vec<u8>)> {
    let nonce: u64 = thread_rng().gen();
    let challenge = ChallengeData {
        nonce: nonce.to_string(),
        authprovider: "static",
        authid,
        authrole: &credentials.authrole,
        authmethod: "wampcra",
        session,
    };
    let challenge_string =
        serde_json::to_string(&challenge).map_err(|e| Error::new(ErrorKind::JSONError(e)))?;
    let key = derive_key(credentials);
    Ok((challenge_string, key))
}

/// Derives the signing key: either the raw secret bytes, or a PBKDF2-HMAC-SHA256
/// derived key when the credentials carry salting parameters.
pub fn derive_key(credentials: &CraCredentials) -> Vec<u8> {
    match credentials.salt {
        Some(ref salt) => {
            let mut key = vec![0u8; salt.keylen as usize];
            pbkdf2_hmac::<Sha256>(
                credentials.secret.as_bytes(),
                salt.salt.as_bytes(),
                salt.iterations,
                &mut key,
            );
            STANDARD.encode(key).into_bytes()
        }
        None => credentials.secret.as_bytes().to_vec(),
    }
}

/// Computes the base64 HMAC-SHA256 signature a conforming client would send
/// back in AUTHENTICATE.
pub fn sign_challenge(key: &[u8], challenge: &str) -> WampResult<String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)
        .map_err(|_| Error::new(ErrorKind::AuthFailed("invalid key length".to_string())))?;
    mac.update(challenge.as_bytes());
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Verifies a client-supplied signature against the expected key/challenge
/// in constant time.
pub fn verify_signature(key: &[u8], challenge: &str, signature: &str) -> bool {
    let expected = match sign_challenge(key, challenge) {
        Ok(s) => s,
        Err(_) => return false,
    };
    constant_time_eq(expected.as_bytes(), signature.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_unsalted_secret() {
        let creds = CraCredentials {
            secret: "secret2".to_string(),
            salt: None,
            authrole: "user".to_string(),
        };
        let (challenge, key) = make_challenge(42, "alice", &creds).unwrap();
        let signature = sign_challenge(&key, &challenge).unwrap();
        assert!(verify_signature(&key, &challenge, &signature));
        assert!(!verify_signature(&key, &challenge, "wrong-signature"));
    }

    #[test]
    fn round_trips_salted_secret() {
        let creds = CraCredentials {
            secret: "secret2".to_string(),
            salt: Some(CraSalt {
                salt: "saltxx".to_string(),
                iterations: 1500,
                keylen: 32,
            }),
            authrole: "user".to_string(),
        };
        let (challenge, key) = make_challenge(42, "alice", &creds).unwrap();
        let signature = sign_challenge(&key, &challenge).unwrap();
        assert!(verify_signature(&key, &challenge, &signature));
    }

    #[test]
    fn rejects_tampered_challenge() {
        let creds = CraCredentials {
            secret: "secret2".to_string(),
            salt: None,
            authrole: "user".to_string(),
        };
        let (challenge, key) = make_challenge(42, "alice", &creds).unwrap();
        let signature = sign_challenge(&key, &challenge).unwrap();
        assert!(!verify_signature(&key, "a different challenge", &signature));
    }
}
