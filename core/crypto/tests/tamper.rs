use proptest::prelude::*;

use streamseal_common::{DeviceId, Error};
use streamseal_crypto::{
    decrypt_bytes, encrypt_bytes, Decryptor, IvBuilder, MemorySink, MonotonicCounter,
    SymmetricKey,
};

const HEADER_LEN: usize = 20;

fn sealed(plaintext: &[u8]) -> (SymmetricKey, Vec<u8>) {
    let key = SymmetricKey::from_bytes([0x5au8; 32]);
    let ivs = IvBuilder::new(
        DeviceId::new("tamper").unwrap(),
        MonotonicCounter::starting_at(77),
    );
    let encrypted = encrypt_bytes(&key, &ivs, plaintext).unwrap();
    (key, encrypted)
}

/// Decrypt into a fresh sink and return the result plus whatever the sink kept.
fn open(key: &SymmetricKey, stream: &[u8]) -> (Result<u64, Error>, Vec<u8>) {
    let mut sink = MemorySink::new();
    let result = Decryptor::new(key).decrypt_stream(None, &mut &stream[..], &mut sink);
    (result, sink.into_inner())
}

fn flip(stream: &[u8], bit: usize) -> Vec<u8> {
    let mut out = stream.to_vec();
    out[bit / 8] ^= 1 << (bit % 8);
    out
}

#[test]
fn test_every_bit_after_header_is_authenticated() {
    let (key, stream) = sealed(&[0x02u8; 40]);

    for bit in HEADER_LEN * 8..stream.len() * 8 {
        let (result, kept) = open(&key, &flip(&stream, bit));
        assert!(
            matches!(result, Err(Error::AuthenticationFailure)),
            "bit {} gave {:?}",
            bit,
            result
        );
        assert!(kept.is_empty());
    }
}

#[test]
fn test_header_bit_flips_fail_closed() {
    let (key, stream) = sealed(b"header tamper");

    for bit in 0..HEADER_LEN * 8 {
        let (result, kept) = open(&key, &flip(&stream, bit));
        assert!(result.is_err(), "bit {} was accepted", bit);
        assert!(kept.is_empty());
    }
}

#[test]
fn test_wrong_key_reports_authentication_failure() {
    let (_, stream) = sealed(&[7u8; 2048]);
    let other = SymmetricKey::from_bytes([0x5bu8; 32]);

    let (result, kept) = open(&other, &stream);

    assert!(matches!(result, Err(Error::AuthenticationFailure)));
    assert!(kept.is_empty());
}

#[test]
fn test_tag_truncation_and_extension() {
    let (key, stream) = sealed(&[1u8; 1500]);

    let mut truncated = stream.clone();
    truncated.pop();
    assert!(decrypt_bytes(&key, &truncated).is_err());

    let mut extended = stream.clone();
    extended.extend_from_slice(b"junk");
    assert!(matches!(
        decrypt_bytes(&key, &extended),
        Err(Error::AuthenticationFailure)
    ));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..4096)) {
        let (key, stream) = sealed(&data);
        let (result, kept) = open(&key, &stream);
        prop_assert_eq!(result.unwrap(), data.len() as u64);
        prop_assert_eq!(kept, data);
    }

    #[test]
    fn prop_single_bit_flip_rejected(
        data in proptest::collection::vec(any::<u8>(), 0..3000),
        pick in any::<prop::sample::Index>(),
    ) {
        let (key, stream) = sealed(&data);
        let bit = HEADER_LEN * 8 + pick.index((stream.len() - HEADER_LEN) * 8);

        let (result, kept) = open(&key, &flip(&stream, bit));

        prop_assert!(matches!(result, Err(Error::AuthenticationFailure)));
        prop_assert!(kept.is_empty());
    }
}
