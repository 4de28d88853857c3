//! 20-byte Ethereum addresses. Parsing is case-insensitive plain hex;
//! rendering applies the EIP-55 mixed-case checksum.

use secp256k1::PublicKey;

use super::signer::keccak256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EthAddress(pub [u8; 20]);

impl EthAddress {
    pub fn parse(s: &str) -> Option<EthAddress> {
        let hex_part = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s);
        if hex_part.len() != 40 {
            return None;
        }
        let bytes = hex::decode(hex_part).ok()?;
        Some(EthAddress(bytes.try_into().ok()?))
    }

    pub fn from_pubkey(pubkey: &PublicKey) -> EthAddress {
        let uncompressed = pubkey.serialize_uncompressed();
        let hash = keccak256(&uncompressed[1..]);
        let mut address = [0u8; 20];
        address.copy_from_slice(&hash[12..]);
        EthAddress(address)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl std::fmt::Display for EthAddress {
    /// EIP-55 checksummed rendering.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lower = hex::encode(self.0);
        let hash = keccak256(lower.as_bytes());
        write!(f, "0x")?;
        for (i, c) in lower.chars().enumerate() {
            let nibble = (hash[i / 2] >> (4 * (1 - i % 2))) & 0x0f;
            if c.is_ascii_alphabetic() && nibble >= 8 {
                write!(f, "{}", c.to_ascii_uppercase())?;
            } else {
                write!(f, "{c}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_is_case_insensitive() {
        let a = EthAddress::parse("0xCD2a3d9F938E13CD947Ec05AbC7FE734Df8DD826").unwrap();
        let b = EthAddress::parse("0xcd2a3d9f938e13cd947ec05abc7fe734df8dd826").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn display_applies_eip55_checksum() {
        let addr = EthAddress::parse("0xcd2a3d9f938e13cd947ec05abc7fe734df8dd826").unwrap();
        assert_eq!(addr.to_string(), "0xCD2a3d9F938E13CD947Ec05AbC7FE734Df8DD826");
    }

    #[test]
    fn wrong_length_is_rejected() {
        assert!(EthAddress::parse("0x1234").is_none());
        assert!(EthAddress::parse("not hex at all, wrong length too!!!!!!!!").is_none());
    }
}
