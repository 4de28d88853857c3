//! Keccak-256 and recoverable secp256k1 signatures in Ethereum's
//! `(v, r, s)` form.

use secp256k1::ecdsa::{RecoverableSignature as SecpRecoverable, RecoveryId};
use secp256k1::{Message, Secp256k1, SecretKey};
use sha3::{Digest, Keccak256};

use super::address::EthAddress;
use crate::error::WalletError;

pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Recoverable signature with `v` in pre-EIP-155 form (27 or 28).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub v: u8,
    pub r: [u8; 32],
    pub s: [u8; 32],
}

impl Signature {
    pub fn recovery_id(&self) -> u8 {
        self.v.wrapping_sub(27) & 1
    }

    /// `v` adjusted for a replay-protected chain: `{0,1} + chain_id·2 + 35`.
    pub fn eip155_v(&self, chain_id: u64) -> u64 {
        self.recovery_id() as u64 + chain_id * 2 + 35
    }
}

/// Sign a 32-byte digest, producing `v ∈ {27, 28}`.
pub fn sign_digest(digest: &[u8; 32], secret: &SecretKey) -> Signature {
    let secp = Secp256k1::new();
    let message = Message::from_digest(*digest);
    let (recovery_id, bytes) = secp.sign_ecdsa_recoverable(&message, secret).serialize_compact();

    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&bytes[..32]);
    s.copy_from_slice(&bytes[32..]);
    Signature { v: 27 + recovery_id.to_i32() as u8, r, s }
}

/// Recover the signing address from a signature over `keccak256(message)`.
pub fn recover_address(signature: &Signature, message: &[u8]) -> Result<EthAddress, WalletError> {
    let digest = keccak256(message);
    let recovery_id = RecoveryId::from_i32(signature.recovery_id() as i32)
        .map_err(|e| WalletError::InvalidSerialization(e.to_string()))?;

    let mut compact = [0u8; 64];
    compact[..32].copy_from_slice(&signature.r);
    compact[32..].copy_from_slice(&signature.s);
    let recoverable = SecpRecoverable::from_compact(&compact, recovery_id)
        .map_err(|e| WalletError::InvalidSerialization(e.to_string()))?;

    let secp = Secp256k1::new();
    let message = Message::from_digest(digest);
    let pubkey = secp
        .recover_ecdsa(&message, &recoverable)
        .map_err(|e| WalletError::InvalidSerialization(e.to_string()))?;
    Ok(EthAddress::from_pubkey(&pubkey))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_recover_round_trip() {
        let secret = SecretKey::from_slice(&keccak256(b"round trip")).unwrap();
        let message = b"chainkit signer test";
        let signature = sign_digest(&keccak256(message), &secret);
        assert!(signature.v == 27 || signature.v == 28);

        let secp = Secp256k1::new();
        let expected = EthAddress::from_pubkey(&secret.public_key(&secp));
        assert_eq!(recover_address(&signature, message).unwrap(), expected);
    }

    #[test]
    fn eip155_v_encodes_chain_id() {
        let signature = Signature { v: 28, r: [1; 32], s: [2; 32] };
        assert_eq!(signature.eip155_v(1), 38);
        assert_eq!(signature.recovery_id(), 1);
    }
}
