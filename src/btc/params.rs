//! Per-chain address and derivation parameters for the UTXO family.

/// Address-encoding and derivation parameters for one UTXO chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressParams {
    /// Base58check version byte for pay-to-pubkey-hash.
    pub pubkey_prefix: u8,
    /// Base58check version byte for pay-to-script-hash.
    pub script_prefix: u8,
    /// Bech32 human-readable part; `None` for chains without segwit.
    pub bech32_hrp: Option<&'static str>,
    /// Sighash fork id (0x40 for bcash, 0 elsewhere).
    pub fork_id: u8,
    /// Account-level BIP-32 derivation path.
    pub bip32_path: &'static str,
}

pub const BITCOIN_MAINNET: AddressParams = AddressParams {
    pubkey_prefix: 0x00,
    script_prefix: 0x05,
    bech32_hrp: Some("bc"),
    fork_id: 0,
    bip32_path: "m/0'",
};

pub const BITCOIN_TESTNET: AddressParams = AddressParams {
    pubkey_prefix: 0x6f,
    script_prefix: 0xc4,
    bech32_hrp: Some("tb"),
    fork_id: 0,
    bip32_path: "m/1'",
};

pub const BCASH_MAINNET: AddressParams = AddressParams {
    pubkey_prefix: 0x00,
    script_prefix: 0x05,
    bech32_hrp: None,
    fork_id: 0x40,
    bip32_path: "m/44'/145'/0'",
};

pub const BCASH_TESTNET: AddressParams = AddressParams {
    pubkey_prefix: 0x6f,
    script_prefix: 0xc4,
    bech32_hrp: None,
    fork_id: 0x40,
    bip32_path: "m/44'/1'/0'",
};

pub const LITECOIN_MAINNET: AddressParams = AddressParams {
    pubkey_prefix: 0x30,
    script_prefix: 0x32,
    bech32_hrp: Some("ltc"),
    fork_id: 0,
    bip32_path: "m/44'/2'/0'",
};

pub const LITECOIN_TESTNET: AddressParams = AddressParams {
    pubkey_prefix: 0x6f,
    script_prefix: 0x3a,
    bech32_hrp: Some("tltc"),
    fork_id: 0,
    bip32_path: "m/44'/1'/0'",
};
