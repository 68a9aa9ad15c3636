use crate::crypto::primitives::{pubkey_to_address, Address, Hash};
use crate::error::{NodeError, Result};
use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use num_bigint::BigUint;
use once_cell::sync::Lazy;

/// Length of an encoded signature: r (32) ‖ s (32) ‖ recovery id (1)
pub const SIGNATURE_LENGTH: usize = 65;

/// Order of the secp256k1 group
static SECP256K1_N: Lazy<BigUint> = Lazy::new(|| {
    BigUint::parse_bytes(
        b"fffffffffffffffffffffffffffffffebaaedce6af48a03bbfd25e8cd0364141",
        16,
    )
    .expect("group order constant is valid hex")
});

/// Half the group order, the upper bound of the low-s rule
static SECP256K1_HALF_N: Lazy<BigUint> = Lazy::new(|| &*SECP256K1_N >> 1u32);

/// Signs a 32-byte message hash, producing r ‖ s ‖ v with v ∈ {0, 1}.
///
/// The signature is low-s normalized, so the same key and hash always
/// produce the same recoverable encoding.
pub fn sign_hash(message_hash: &Hash, key: &SigningKey) -> Result<[u8; SIGNATURE_LENGTH]> {
    let (sig, recovery_id) = key
        .sign_prehash_recoverable(message_hash.as_bytes())
        .map_err(|e| NodeError::Crypto(format!("failed to sign hash: {e}")))?;

    let mut encoded = [0u8; SIGNATURE_LENGTH];
    encoded[..32].copy_from_slice(&sig.r().to_bytes());
    encoded[32..64].copy_from_slice(&sig.s().to_bytes());
    encoded[64] = recovery_id.to_byte();
    Ok(encoded)
}

/// Recovers the uncompressed public key (0x04-tagged, 65 bytes) from a
/// 65-byte signature over the given message hash
pub fn recover_pubkey(message_hash: &Hash, signature: &[u8]) -> Result<Vec<u8>> {
    if signature.len() != SIGNATURE_LENGTH {
        return Err(NodeError::InvalidSignature(format!(
            "signature must be {SIGNATURE_LENGTH} bytes, got {}",
            signature.len()
        )));
    }

    let recovery_id = RecoveryId::try_from(signature[64])
        .map_err(|_| NodeError::InvalidSignature(format!("bad recovery id {}", signature[64])))?;
    let sig = Signature::from_slice(&signature[..64])
        .map_err(|e| NodeError::InvalidSignature(format!("bad r/s encoding: {e}")))?;

    let verifying_key =
        VerifyingKey::recover_from_prehash(message_hash.as_bytes(), &sig, recovery_id)
            .map_err(|e| NodeError::InvalidSignature(format!("recovery failed: {e}")))?;

    Ok(verifying_key.to_encoded_point(false).as_bytes().to_vec())
}

/// Recovers the signer's address from a 65-byte signature
pub fn recover_address(message_hash: &Hash, signature: &[u8]) -> Result<Address> {
    let pubkey = recover_pubkey(message_hash, signature)?;
    Ok(pubkey_to_address(&pubkey))
}

/// Checks that the given public key produced the signature (r, s) over the
/// message hash. Accepts the key with or without its 0x04 tag.
pub fn verify(pubkey: &[u8], message_hash: &Hash, r: &[u8], s: &[u8]) -> bool {
    if r.len() > 32 || s.len() > 32 {
        return false;
    }

    let tagged;
    let sec1 = match pubkey.len() {
        65 => pubkey,
        64 => {
            let mut buf = Vec::with_capacity(65);
            buf.push(0x04);
            buf.extend_from_slice(pubkey);
            tagged = buf;
            &tagged
        }
        _ => return false,
    };

    let verifying_key = match VerifyingKey::from_sec1_bytes(sec1) {
        Ok(key) => key,
        Err(_) => return false,
    };

    let mut raw = [0u8; 64];
    raw[32 - r.len()..32].copy_from_slice(r);
    raw[64 - s.len()..].copy_from_slice(s);

    match Signature::from_slice(&raw) {
        Ok(sig) => verifying_key
            .verify_prehash(message_hash.as_bytes(), &sig)
            .is_ok(),
        Err(_) => false,
    }
}

/// Validates raw signature components: r and s in [1, N), s no greater
/// than N/2 (malleability), and a recovery id of 0 or 1
pub fn validate_signature_values(v: u64, r: &BigUint, s: &BigUint) -> bool {
    let one = BigUint::from(1u8);
    if r < &one || s < &one {
        return false;
    }
    if s > &SECP256K1_HALF_N {
        return false;
    }
    r < &SECP256K1_N && s < &SECP256K1_N && (v == 0 || v == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::Wallet;
    use crate::crypto::primitives::keccak256;

    #[test]
    fn sign_and_recover_round_trip() {
        let wallet = Wallet::random();
        let hash = keccak256(b"round trip");

        let signature = sign_hash(&hash, wallet.signing_key()).unwrap();
        let recovered = recover_address(&hash, &signature).unwrap();

        assert_eq!(recovered, wallet.address());
    }

    #[test]
    fn recovered_pubkey_matches_wallet() {
        let wallet = Wallet::random();
        let hash = keccak256(b"pubkey check");

        let signature = sign_hash(&hash, wallet.signing_key()).unwrap();
        let pubkey = recover_pubkey(&hash, &signature).unwrap();

        assert_eq!(pubkey, wallet.public_key());
        assert_eq!(pubkey[0], 0x04);
        assert_eq!(pubkey.len(), 65);
    }

    #[test]
    fn verify_accepts_valid_and_rejects_tampered() {
        let wallet = Wallet::random();
        let hash = keccak256(b"verify me");

        let signature = sign_hash(&hash, wallet.signing_key()).unwrap();
        let pubkey = wallet.public_key();

        assert!(verify(&pubkey, &hash, &signature[..32], &signature[32..64]));

        let other_hash = keccak256(b"something else");
        assert!(!verify(
            &pubkey,
            &other_hash,
            &signature[..32],
            &signature[32..64]
        ));
    }

    #[test]
    fn rejects_wrong_length_signature() {
        let hash = keccak256(b"short");
        assert!(recover_pubkey(&hash, &[0u8; 64]).is_err());
    }

    #[test]
    fn validates_component_ranges() {
        let r = BigUint::from(1u8);
        let s = BigUint::from(1u8);
        assert!(validate_signature_values(0, &r, &s));
        assert!(validate_signature_values(1, &r, &s));
        assert!(!validate_signature_values(2, &r, &s));

        let zero = BigUint::default();
        assert!(!validate_signature_values(0, &zero, &s));
        assert!(!validate_signature_values(0, &r, &zero));

        // High-s values are malleable and must be rejected
        let high_s = &*SECP256K1_HALF_N + 1u8;
        assert!(!validate_signature_values(0, &r, &high_s));
        assert!(validate_signature_values(0, &r, &SECP256K1_HALF_N));
    }

    #[test]
    fn signatures_are_low_s() {
        let wallet = Wallet::random();
        for i in 0..8u8 {
            let hash = keccak256([i]);
            let signature = sign_hash(&hash, wallet.signing_key()).unwrap();
            let s = BigUint::from_bytes_be(&signature[32..64]);
            assert!(s <= *SECP256K1_HALF_N);
        }
    }
}
