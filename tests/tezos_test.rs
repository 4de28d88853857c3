//! Tezos operation forging and signing against the reference vectors.
//!
//! Run with: cargo test --test tezos_test

use chainkit::chains::xtz::{
    TezosAccount, TezosAddress, TezosBlockHash, TezosFeeBasis, TezosOperation, TezosTransaction,
};
use chainkit::chains::ChainAccount;
use chainkit::Seed;

const PHRASE_1: &str =
    "patient doctor olympic frog force glimpse endless antenna online dragon bargain someone";
const PHRASE_2: &str =
    "boring head harsh green empty clip fatal typical found crane dinner timber";

fn seed(phrase: &str) -> Seed {
    Seed::from_phrase(phrase).unwrap()
}

fn address(s: &str) -> TezosAddress {
    TezosAddress::parse(s).unwrap()
}

#[test]
fn transaction_operation_forges_to_reference_bytes() {
    let source = address("tz1SeV3tueHQMTfquZSU7y98otvQTw6GDKaY");
    let target = address("tz1es8RjqHUD483BN9APWtvCzgjTFVGeMh3y");
    let branch = TezosBlockHash::parse("BMZck1BxBCkFHJNSDp6GZBYsawi5U6cQYdzipKK7EUTZCrsG74s").unwrap();

    let operation = TezosOperation::Transaction {
        source,
        fee_basis: TezosFeeBasis::new(52_500, 10_200, 3),
        amount: 100_000_000,
        destination: target,
    };
    let unsigned = TezosTransaction::new(operation).serialize_unsigned(&branch);
    assert_eq!(
        hex::encode(unsigned),
        "f3b761a633b2b0cc9d2edbb09cda4800818f893b3d6567b09a818f1a5f685fb8\
         6c004cdee21a9180f80956ab8d27fb6abdbd89934052949a0303d84fac0280c2\
         d72f0000d2e495a7ab40156d0a7c35b73d2530a3470fc87000"
    );
}

#[test]
fn reveal_operation_forges_to_reference_bytes() {
    let account = TezosAccount::from_seed(&seed(PHRASE_1)).unwrap();
    let source = address("tz1SeV3tueHQMTfquZSU7y98otvQTw6GDKaY");
    let branch = TezosBlockHash::parse("BMZck1BxBCkFHJNSDp6GZBYsawi5U6cQYdzipKK7EUTZCrsG74s").unwrap();

    let operation = TezosOperation::Reveal {
        source,
        fee_basis: TezosFeeBasis::new(52_500, 10_200, 3),
        public_key: *account.public_key(),
    };
    let unsigned = TezosTransaction::new(operation).serialize_unsigned(&branch);
    assert_eq!(
        hex::encode(unsigned),
        "f3b761a633b2b0cc9d2edbb09cda4800818f893b3d6567b09a818f1a5f685fb8\
         6b004cdee21a9180f80956ab8d27fb6abdbd89934052949a0303d84fac0200ef\
         c82a1445744a87fec55fce35e1b7ec80f9bbed9df2a03bcdde1a346f3d4294"
    );
}

#[test]
fn delegation_operations_forge_to_reference_bytes() {
    let source = address("tz1SeV3tueHQMTfquZSU7y98otvQTw6GDKaY");
    let delegate = address("tz1RKLoYm4vtLzo7TAgGifMDAkiWhjfyXwP4");
    let branch = TezosBlockHash::parse("BMZck1BxBCkFHJNSDp6GZBYsawi5U6cQYdzipKK7EUTZCrsG74s").unwrap();
    let fee_basis = TezosFeeBasis::new(52_500, 10_200, 3);

    let on = TezosOperation::Delegation { source, fee_basis, delegate: Some(delegate) };
    assert_eq!(
        hex::encode(TezosTransaction::new(on).serialize_unsigned(&branch)),
        "f3b761a633b2b0cc9d2edbb09cda4800818f893b3d6567b09a818f1a5f685fb8\
         6e004cdee21a9180f80956ab8d27fb6abdbd89934052949a0303d84fac02ff00\
         3e47f837f0467b4acde406ed5842f35e2414b1a8"
    );

    let off = TezosOperation::Delegation { source, fee_basis, delegate: None };
    assert_eq!(
        hex::encode(TezosTransaction::new(off).serialize_unsigned(&branch)),
        "f3b761a633b2b0cc9d2edbb09cda4800818f893b3d6567b09a818f1a5f685fb8\
         6e004cdee21a9180f80956ab8d27fb6abdbd89934052949a0303d84fac0200"
    );
}

#[test]
fn reveal_transaction_batch_forges_in_order() {
    let account = TezosAccount::from_seed(&seed(PHRASE_1)).unwrap();
    let source = address("tz1SeV3tueHQMTfquZSU7y98otvQTw6GDKaY");
    let target = address("tz1es8RjqHUD483BN9APWtvCzgjTFVGeMh3y");
    let branch = TezosBlockHash::parse("BMZck1BxBCkFHJNSDp6GZBYsawi5U6cQYdzipKK7EUTZCrsG74s").unwrap();

    let reveal = TezosOperation::Reveal {
        source,
        fee_basis: TezosFeeBasis::new(52_500, 10_200, 3),
        public_key: *account.public_key(),
    };
    let transfer = TezosOperation::Transaction {
        source,
        fee_basis: TezosFeeBasis::new(52_500, 10_200, 3),
        amount: 100_000_000,
        destination: target,
    };

    let batch = TezosTransaction::with_reveal(transfer, reveal);
    assert_eq!(
        hex::encode(batch.serialize_unsigned(&branch)),
        "f3b761a633b2b0cc9d2edbb09cda4800818f893b3d6567b09a818f1a5f685fb8\
         6b004cdee21a9180f80956ab8d27fb6abdbd89934052949a0303d84fac0200ef\
         c82a1445744a87fec55fce35e1b7ec80f9bbed9df2a03bcdde1a346f3d42946c\
         004cdee21a9180f80956ab8d27fb6abdbd89934052949a0303d84fac0280c2d7\
         2f0000d2e495a7ab40156d0a7c35b73d2530a3470fc87000"
    );
}

#[test]
fn sign_single_transaction_matches_reference() {
    let source = address("tz1SeV3tueHQMTfquZSU7y98otvQTw6GDKaY");
    let target = address("tz1es8RjqHUD483BN9APWtvCzgjTFVGeMh3y");
    let branch = TezosBlockHash::parse("BMZck1BxBCkFHJNSDp6GZBYsawi5U6cQYdzipKK7EUTZCrsG74s").unwrap();

    let operation = TezosOperation::Transaction {
        source,
        fee_basis: TezosFeeBasis::new(52_500, 10_200, 3),
        amount: 100_000_000,
        destination: target,
    };
    let mut tx = TezosTransaction::new(operation);
    let signed = tx.serialize_and_sign(&seed(PHRASE_1), &branch).unwrap().to_vec();
    assert_eq!(
        hex::encode(&signed),
        "f3b761a633b2b0cc9d2edbb09cda4800818f893b3d6567b09a818f1a5f685fb8\
         6c004cdee21a9180f80956ab8d27fb6abdbd89934052949a0303d84fac0280c2\
         d72f0000d2e495a7ab40156d0a7c35b73d2530a3470fc87000333955b5c77d6c\
         054dd9cad5359b57f7c0990932bf36e957604762e03d4a18364c88ff2785dba9\
         9e4899d3f5d84f93507f5ef60f000e9b8b84189d49dd975004"
    );
    assert_eq!(
        tx.hash().unwrap().to_string(),
        "onwgTQgCHBPvTGFWmGrXzDMm3HQdJ4bvWwvv6LEEExmKy6CwMoo"
    );
}

/// A reveal-plus-transaction bundle with correlated counters, signed by the
/// second test account.
#[test]
fn sign_reveal_transaction_bundle_matches_reference() {
    let account = TezosAccount::from_seed(&seed(PHRASE_2)).unwrap();
    assert_eq!(account.primary_address(), "tz1PTZ7kd7BwpB9sNuMgJrwksEiYX3fb9Bdf");

    let source = address("tz1PTZ7kd7BwpB9sNuMgJrwksEiYX3fb9Bdf");
    let target = address("tz1YZpECan19MCZpubtM4zo4mgURHaLoMomy");
    let branch = TezosBlockHash::parse("BLcz2Y6BikLFrwnejtRgBPSiGt1RLTjizUCg15BsUZ6x6JFazJS").unwrap();
    let counter = 6_307_075;

    let reveal = TezosOperation::Reveal {
        source,
        fee_basis: TezosFeeBasis::new(0, 24_000, counter),
        public_key: *account.public_key(),
    };
    let transfer = TezosOperation::Transaction {
        source,
        fee_basis: TezosFeeBasis::new(10_500, 24_000, counter + 1),
        amount: 100_000,
        destination: target,
    };

    let mut tx = TezosTransaction::with_reveal(transfer, reveal);
    let signed = tx.serialize_and_sign(&seed(PHRASE_2), &branch).unwrap().to_vec();
    assert_eq!(
        hex::encode(&signed),
        "77aa56c6022b22922cc1e5760ff22768437341b41f6f084b14a8d2487c80b7a8\
         6b0029e55328366cf257b64de39e784c9b6682c2f2b50083fa8003c0bb01ac02\
         0064b6cfc1ed37bc26ab4c68ec93d4769f98e83f1e07afd36fb4cb42d0120333\
         9e6c0029e55328366cf257b64de39e784c9b6682c2f2b5845284fa8003c0bb01\
         ac02a08d0600008dcd911b4896ac05a3649d4cd1c462cef4e7f6450071205552\
         78435abcd9a8b1397d1964024acd978ee6286b34a04d18aa0d8ee00bf911bc10\
         879bcac6dd9198189f39ee80246724750ac8f3ccba042c3d1fd45507"
    );
    assert_eq!(
        tx.hash().unwrap().to_string(),
        "op5o529Ggohc614wQBKfxsQXG6tcH5Q6jqDSDZ4dVDz8mC6LGDB"
    );
}
