//! Signature verification for role metadata.
//!
//! A role is trusted when at least `threshold` of the key IDs its parent
//! declared have produced a valid ECDSA signature over the canonical JSON
//! of the signed body. Signatures are raw `(r, s)` pairs, each half
//! `ceil(bits / 8)` big-endian octets of the curve, as Notary produces
//! them.

use crate::error::{self, Error, Result};
use crate::schema::{Key, KeyType, Role, RoleKeys, Signature, Signed, SigningMethod};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use log::debug;
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature as EcdsaSignature, VerifyingKey};
use p256::pkcs8::DecodePublicKey;
use snafu::{ensure, ResultExt};
use std::collections::{HashMap, HashSet};
use x509_cert::der::referenced::OwnedToRef;
use x509_cert::der::DecodePem;
use x509_cert::Certificate;

/// The byte length of a raw P-256 signature: two big-endian octet strings
/// of `ceil(256 / 8)` bytes each.
const P256_SIGNATURE_LEN: usize = 64;

/// Checks the signatures on `envelope` against the key IDs and threshold in
/// `role_keys`, resolving key material from `keys`.
///
/// A signature that fails cryptographically only disqualifies itself; the
/// remaining signatures are still considered. Structural problems (an
/// unusable key type, an unsupported signing method) abort verification.
pub(crate) fn verify_signed<T: Role>(
    role: &str,
    envelope: &Signed<T>,
    keys: &HashMap<String, Key>,
    role_keys: &RoleKeys,
) -> Result<()> {
    verify_threshold(
        role,
        envelope,
        keys,
        &role_keys.keyids,
        role_keys.threshold.get(),
    )
}

pub(crate) fn verify_threshold<T: Role>(
    role: &str,
    envelope: &Signed<T>,
    keys: &HashMap<String, Key>,
    keyids: &[String],
    threshold: u64,
) -> Result<()> {
    let canonical = envelope.signed.canonical_form()?;
    let mut valid: u64 = 0;
    let mut counted: HashSet<&str> = HashSet::new();
    for signature in &envelope.signatures {
        if !keyids.contains(&signature.keyid) {
            continue;
        }
        // a key may appear once per threshold no matter how many
        // signatures reference it
        if !counted.insert(signature.keyid.as_str()) {
            continue;
        }
        let Some(key) = keys.get(&signature.keyid) else {
            debug!("role '{role}': no key material for key ID '{}'", signature.keyid);
            continue;
        };
        match verify_signature(&canonical, key, signature) {
            Ok(()) => {
                valid += 1;
                if valid >= threshold {
                    return Ok(());
                }
            }
            Err(Error::SignatureCheckFailed) => {
                debug!(
                    "role '{role}': signature by key '{}' did not verify",
                    signature.keyid
                );
            }
            Err(err) => return Err(err),
        }
    }
    error::SignatureThresholdNotMetSnafu {
        role,
        valid,
        threshold,
    }
    .fail()
}

/// Verifies a single signature over canonical JSON bytes.
fn verify_signature(canonical: &[u8], key: &Key, signature: &Signature) -> Result<()> {
    ensure!(
        signature.method == SigningMethod::Ecdsa,
        error::UnsupportedSigningMethodSnafu {
            method: signature.method.to_string(),
        }
    );
    let verifying_key = decode_verifying_key(key)?;
    let raw = BASE64
        .decode(&signature.sig)
        .context(error::SignatureDecodeSnafu)?;
    ensure!(
        raw.len() == P256_SIGNATURE_LEN,
        error::SignatureLengthSnafu {
            expected: P256_SIGNATURE_LEN,
            actual: raw.len(),
        }
    );
    let signature = EcdsaSignature::from_slice(&raw)
        .map_err(|_| error::SignatureCheckFailedSnafu.build())?;
    verifying_key
        .verify(canonical, &signature)
        .map_err(|_| error::SignatureCheckFailedSnafu.build())
}

/// Extracts a P-256 verifying key from role key material.
///
/// `ecdsa` keys are a PKIX `SubjectPublicKeyInfo`; `ecdsa-x509` keys wrap
/// the same thing in a PEM-encoded certificate, from which only the subject
/// public key is taken. The certificate itself is not validated; trust in
/// the key comes from the role metadata that lists it.
fn decode_verifying_key(key: &Key) -> Result<VerifyingKey> {
    let raw = BASE64
        .decode(&key.keyval.public)
        .context(error::KeyDecodeSnafu)?;
    match key.keytype {
        KeyType::Ecdsa => VerifyingKey::from_public_key_der(&raw).map_err(|e| {
            error::KeyParseSnafu {
                reason: e.to_string(),
            }
            .build()
        }),
        KeyType::EcdsaX509 => {
            let certificate = Certificate::from_pem(&raw).map_err(|e| {
                error::KeyParseSnafu {
                    reason: e.to_string(),
                }
                .build()
            })?;
            VerifyingKey::try_from(
                certificate
                    .tbs_certificate
                    .subject_public_key_info
                    .owned_to_ref(),
            )
            .map_err(|e| {
                error::KeyParseSnafu {
                    reason: e.to_string(),
                }
                .build()
            })
        }
        _ => error::InvalidKeyTypeSnafu {
            keytype: key.keytype.to_string(),
        }
        .fail(),
    }
}
