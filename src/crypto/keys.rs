use crate::crypto::primitives::{pubkey_to_address, Address, Hash};
use crate::crypto::signature::{sign_hash, SIGNATURE_LENGTH};
use crate::error::{NodeError, Result};
use data_encoding::HEXLOWER;
use k256::ecdsa::SigningKey;
use rand::rngs::OsRng;

/// A secp256k1 keypair with its derived account address
pub struct Wallet {
    signing_key: SigningKey,
}

impl Wallet {
    /// Generates a wallet with a fresh random private key
    pub fn random() -> Wallet {
        Wallet {
            signing_key: SigningKey::random(&mut OsRng),
        }
    }

    /// Imports a wallet from a hex-encoded 32-byte private key
    pub fn from_hex(hex_key: &str) -> Result<Wallet> {
        let stripped = hex_key.strip_prefix("0x").unwrap_or(hex_key);
        let bytes = HEXLOWER
            .decode(stripped.to_ascii_lowercase().as_bytes())
            .map_err(|e| NodeError::Crypto(format!("invalid private key hex: {e}")))?;
        let signing_key = SigningKey::from_slice(&bytes)
            .map_err(|e| NodeError::Crypto(format!("invalid private key: {e}")))?;
        Ok(Wallet { signing_key })
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// Uncompressed public key bytes (0x04-tagged, 65 bytes)
    pub fn public_key(&self) -> Vec<u8> {
        self.signing_key
            .verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec()
    }

    /// The account address derived from the public key
    pub fn address(&self) -> Address {
        pubkey_to_address(&self.public_key())
    }

    /// Hex form of the private key, without prefix
    pub fn private_key_hex(&self) -> String {
        HEXLOWER.encode(&self.signing_key.to_bytes())
    }

    /// Signs a 32-byte message hash with this wallet's key
    pub fn sign_hash(&self, message_hash: &Hash) -> Result<[u8; SIGNATURE_LENGTH]> {
        sign_hash(message_hash, &self.signing_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::primitives::keccak256;
    use crate::crypto::signature::recover_address;

    #[test]
    fn random_wallets_are_distinct() {
        let a = Wallet::random();
        let b = Wallet::random();
        assert_ne!(a.address(), b.address());
    }

    #[test]
    fn hex_import_round_trip() {
        let wallet = Wallet::random();
        let imported = Wallet::from_hex(&wallet.private_key_hex()).unwrap();
        assert_eq!(wallet.address(), imported.address());
    }

    #[test]
    fn signed_hash_recovers_to_wallet_address() {
        let wallet = Wallet::random();
        let hash = keccak256(b"wallet signature");
        let signature = wallet.sign_hash(&hash).unwrap();
        assert_eq!(recover_address(&hash, &signature).unwrap(), wallet.address());
    }

    #[test]
    fn rejects_bad_private_key() {
        assert!(Wallet::from_hex("not hex").is_err());
        assert!(Wallet::from_hex("0x00").is_err());
    }
}
