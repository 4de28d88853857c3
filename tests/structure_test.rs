//! Typed-data coder end-to-end: the well-known "Ether Mail" document,
//! signed with the keccak256("cow") secret key.
//!
//! Run with: cargo test --test structure_test

use chainkit::eth::signer::{keccak256, recover_address};
use chainkit::eth::{EthAddress, StructureCoder};
use secp256k1::SecretKey;

const ETHER_MAIL: &str = r#"{
    "types": {
        "EIP712Domain": [
            { "name": "name", "type": "string" },
            { "name": "version", "type": "string" },
            { "name": "chainId", "type": "uint256" },
            { "name": "verifyingContract", "type": "address" }
        ],
        "Person": [
            { "name": "name", "type": "string" },
            { "name": "wallet", "type": "address" }
        ],
        "Mail": [
            { "name": "from", "type": "Person" },
            { "name": "to", "type": "Person" },
            { "name": "contents", "type": "string" }
        ]
    },
    "primaryType": "Mail",
    "domain": {
        "name": "Ether Mail",
        "version": "1",
        "chainId": 1,
        "verifyingContract": "0xCcCCccccCCCCcCCCCCCcCcCccCcCCCcCcccccccC"
    },
    "message": {
        "from": {
            "name": "Cow",
            "wallet": "0xCD2a3d9F938E13CD947Ec05AbC7FE734Df8DD826"
        },
        "to": {
            "name": "Bob",
            "wallet": "0xbBbBBBBbbBBBbbbBbbBbbbbBBbBbbbbBbBbbBBbB"
        },
        "contents": "Hello, Bob!"
    }
}"#;

fn ether_mail_coder() -> StructureCoder {
    let typed_data = serde_json::from_str(ETHER_MAIL).unwrap();
    StructureCoder::create_from_typed_data(&typed_data).unwrap()
}

/// The secret key for these published vectors is keccak256 of the 3-byte
/// seed material "cow".
fn cow_secret() -> SecretKey {
    SecretKey::from_slice(&keccak256(b"cow")).unwrap()
}

#[test]
fn encode_type_lists_dependencies_lexicographically() {
    let coder = ether_mail_coder();
    assert_eq!(
        coder.encode_type("Mail").unwrap(),
        "Mail(Person from,Person to,string contents)Person(string name,address wallet)"
    );
}

#[test]
fn hash_type_matches_reference() {
    let coder = ether_mail_coder();
    assert_eq!(
        hex::encode(coder.hash_type("Mail").unwrap()),
        "a0cedeb2dc280ba39b857546d74f5549c3a1d7bdc2dd96bf881f76108e23dac2"
    );
}

#[test]
fn encode_data_prefixes_the_type_hash() {
    let coder = ether_mail_coder();
    assert_eq!(
        hex::encode(coder.encode_data().unwrap()),
        "a0cedeb2dc280ba39b857546d74f5549c3a1d7bdc2dd96bf881f76108e23dac2\
         fc71e5fa27ff56c350aa531bc129ebdf613b772b6604664f5d8dbe21b85eb0c8\
         cd54f074a4af31b4411ff6a60c9719dbd559c221c8ac3492d9d872b041d703d1\
         b5aadf3154a261abdd9086fc627b61efca26ae5702701d05cd2305f7c52a2fc8"
    );
}

#[test]
fn hash_data_matches_reference() {
    let coder = ether_mail_coder();
    assert_eq!(
        hex::encode(coder.hash_data().unwrap()),
        "c52c0ee5d84264471806290a3f2c4cecfc5490626bf912d01f240d7a274b371e"
    );
}

#[test]
fn hash_domain_matches_reference() {
    let coder = ether_mail_coder();
    assert_eq!(
        hex::encode(coder.hash_domain().unwrap()),
        "f2cee375fa42b42143804025fc449deafd50cc031ca257e0b194a650a912090f"
    );
}

#[test]
fn cow_key_controls_the_published_address() {
    let secret = cow_secret();
    let secp = secp256k1::Secp256k1::new();
    let address = EthAddress::from_pubkey(&secret.public_key(&secp));
    assert_eq!(
        address,
        EthAddress::parse("0xcd2a3d9f938e13cd947ec05abc7fe734df8dd826").unwrap()
    );
}

#[test]
fn sign_data_produces_the_published_signature() {
    let coder = ether_mail_coder();
    let result = coder.sign_data(&cow_secret()).unwrap();

    assert_eq!(
        hex::encode(result.digest),
        "be609aee343fb3c4b28e1df9e632fca64fcfaede20f02e86244efddf30957bd2"
    );
    assert_eq!(result.signature.v, 28);
    assert_eq!(
        hex::encode(result.signature.r),
        "4355c47d63924e8a72e509b65029052eb6c299d53a04e167c5775fd466751c9d"
    );
    assert_eq!(
        hex::encode(result.signature.s),
        "07299936d304c153f6443dfa05f40ff007d72911b6f72307f996231605b91562"
    );
}

#[test]
fn ecrecover_over_digest_returns_the_signer() {
    let coder = ether_mail_coder();
    let secret = cow_secret();
    let result = coder.sign_data(&secret).unwrap();

    let secp = secp256k1::Secp256k1::new();
    let expected = EthAddress::from_pubkey(&secret.public_key(&secp));
    assert_eq!(recover_address(&result.signature, &result.message).unwrap(), expected);
}
