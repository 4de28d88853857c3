//! Legacy (pre-typed-envelope) Ethereum transactions with EIP-155 replay
//! protection. Unsigned and signed serializations are distinct RLP lists.

use alloy_primitives::{Bytes, U256};
use alloy_rlp::{Encodable, Header};
use secp256k1::SecretKey;

use super::address::EthAddress;
use super::signer::{keccak256, sign_digest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthTransaction {
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    /// `None` for contract creation.
    pub to: Option<EthAddress>,
    pub value: U256,
    pub data: Bytes,
    pub chain_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedEthTransaction {
    pub tx: EthTransaction,
    pub v: u64,
    pub r: U256,
    pub s: U256,
}

fn encode_list(fields: &[&dyn Encodable]) -> Vec<u8> {
    let mut payload = Vec::new();
    for field in fields {
        field.encode(&mut payload);
    }
    let mut out = Vec::with_capacity(payload.len() + 9);
    Header { list: true, payload_length: payload.len() }.encode(&mut out);
    out.extend_from_slice(&payload);
    out
}

impl EthTransaction {
    /// EIP-155 unsigned form: `(nonce, gasPrice, gas, to, value, data,
    /// chainId, 0, 0)`.
    pub fn serialize_unsigned(&self) -> Vec<u8> {
        let to = self.to_bytes();
        let zero = 0u8;
        encode_list(&[
            &self.nonce,
            &self.gas_price,
            &self.gas_limit,
            &to,
            &self.value,
            &self.data,
            &self.chain_id,
            &zero,
            &zero,
        ])
    }

    pub fn signing_digest(&self) -> [u8; 32] {
        keccak256(&self.serialize_unsigned())
    }

    /// Sign with `v = 2·chainId + 35 + recovery_id`.
    pub fn sign(self, secret: &SecretKey) -> SignedEthTransaction {
        let signature = sign_digest(&self.signing_digest(), secret);
        let v = signature.eip155_v(self.chain_id);
        SignedEthTransaction {
            tx: self,
            v,
            r: U256::from_be_bytes(signature.r),
            s: U256::from_be_bytes(signature.s),
        }
    }

    fn to_bytes(&self) -> Bytes {
        match &self.to {
            Some(address) => Bytes::copy_from_slice(address.as_bytes()),
            None => Bytes::new(),
        }
    }
}

impl SignedEthTransaction {
    /// Signed form: `(nonce, gasPrice, gas, to, value, data, v, r, s)`.
    pub fn serialize(&self) -> Vec<u8> {
        let to = self.tx.to_bytes();
        encode_list(&[
            &self.tx.nonce,
            &self.tx.gas_price,
            &self.tx.gas_limit,
            &to,
            &self.tx.value,
            &self.tx.data,
            &self.v,
            &self.r,
            &self.s,
        ])
    }

    pub fn hash(&self) -> [u8; 32] {
        keccak256(&self.serialize())
    }
}

#[cfg(test)]
mod tests {
    use super::super::signer::{recover_address, Signature};
    use super::*;
    use secp256k1::Secp256k1;

    fn test_tx() -> EthTransaction {
        EthTransaction {
            nonce: 9,
            gas_price: 20_000_000_000,
            gas_limit: 21_000,
            to: Some(EthAddress::parse("0x3535353535353535353535353535353535353535").unwrap()),
            value: U256::from(10u64).pow(U256::from(18u64)),
            data: Bytes::new(),
            chain_id: 1,
        }
    }

    #[test]
    fn eip155_reference_signing_digest() {
        // the transaction from the EIP-155 specification example
        let tx = test_tx();
        assert_eq!(
            hex::encode(tx.serialize_unsigned()),
            "ec098504a817c800825208943535353535353535353535353535353535353535880de0b6b3a764000080018080"
        );
        assert_eq!(
            hex::encode(tx.signing_digest()),
            "daf5a779ae972f972197303d7b574746c7ef83eadac0f2791ad23db92e4c8e53"
        );
    }

    #[test]
    fn signed_v_carries_chain_id_and_recovers() {
        let secret = SecretKey::from_slice(&keccak256(b"eth tx signer")).unwrap();
        let tx = test_tx();
        let digest_preimage = tx.serialize_unsigned();
        let signed = tx.sign(&secret);
        assert!(signed.v == 37 || signed.v == 38);

        let signature = Signature {
            v: 27 + (signed.v - 35 - 2) as u8,
            r: signed.r.to_be_bytes(),
            s: signed.s.to_be_bytes(),
        };
        let secp = Secp256k1::new();
        let expected = EthAddress::from_pubkey(&secret.public_key(&secp));
        assert_eq!(recover_address(&signature, &digest_preimage).unwrap(), expected);
    }

    #[test]
    fn unsigned_and_signed_forms_differ() {
        let secret = SecretKey::from_slice(&keccak256(b"eth tx signer")).unwrap();
        let tx = test_tx();
        let unsigned = tx.serialize_unsigned();
        let signed = tx.sign(&secret);
        assert_ne!(unsigned, signed.serialize());
        assert_eq!(signed.hash().len(), 32);
    }
}
