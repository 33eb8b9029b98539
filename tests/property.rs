//! Property-based tests for the frame codec and handshake parsing.

use proptest::prelude::*;
use tideway::protocol::{Frame, OpCode, apply_mask, compute_accept_key};

fn data_opcode_strategy() -> impl Strategy<Value = OpCode> {
    prop_oneof![
        Just(OpCode::Text),
        Just(OpCode::Binary),
        Just(OpCode::Continuation),
    ]
}

fn any_opcode_strategy() -> impl Strategy<Value = OpCode> {
    prop_oneof![
        Just(OpCode::Continuation),
        Just(OpCode::Text),
        Just(OpCode::Binary),
        Just(OpCode::Close),
        Just(OpCode::Ping),
        Just(OpCode::Pong),
    ]
}

proptest! {
    // Roundtrip: parse(encode(frame)) == frame, across all opcodes and the
    // 7-bit and 16-bit length encodings.
    #[test]
    fn test_roundtrip_unmasked(
        fin in any::<bool>(),
        opcode in any_opcode_strategy(),
        payload in prop::collection::vec(any::<u8>(), 0..1000)
    ) {
        let frame = Frame::new(fin, opcode, payload.clone());
        let bytes = frame.encode();

        let (parsed, consumed) = Frame::parse(&bytes).unwrap();
        prop_assert_eq!(consumed, bytes.len());
        prop_assert_eq!(parsed.fin, fin);
        prop_assert_eq!(parsed.opcode, opcode);
        prop_assert_eq!(parsed.payload(), payload.as_slice());
        prop_assert_eq!(parsed.mask, None);
    }

    // Masked roundtrip: the parser must undo the client's masking and
    // report the key it used.
    #[test]
    fn test_roundtrip_masked(
        fin in any::<bool>(),
        opcode in data_opcode_strategy(),
        payload in prop::collection::vec(any::<u8>(), 0..500),
        mask in any::<[u8; 4]>()
    ) {
        let frame = Frame::new(fin, opcode, payload.clone());
        let bytes = frame.encode_masked(mask);

        let (parsed, consumed) = Frame::parse_client(&bytes).unwrap();
        prop_assert_eq!(consumed, bytes.len());
        prop_assert_eq!(parsed.payload(), payload.as_slice());
        prop_assert_eq!(parsed.mask, Some(mask));
    }

    // XOR masking is self-inverse.
    #[test]
    fn test_mask_reversible(
        data in prop::collection::vec(any::<u8>(), 0..2000),
        mask in any::<[u8; 4]>()
    ) {
        let mut masked = data.clone();
        apply_mask(&mut masked, mask);
        apply_mask(&mut masked, mask);
        prop_assert_eq!(data, masked);
    }

    // Masking correctness against the definition: payload[i] ^ mask[i % 4].
    #[test]
    fn test_mask_matches_definition(
        data in prop::collection::vec(any::<u8>(), 0..256),
        mask in any::<[u8; 4]>()
    ) {
        let mut masked = data.clone();
        apply_mask(&mut masked, mask);
        for (i, (before, after)) in data.iter().zip(&masked).enumerate() {
            prop_assert_eq!(before ^ mask[i % 4], *after);
        }
    }

    // Length encodings stay consistent across the 125/126/65535 boundaries.
    #[test]
    fn test_payload_length_encoding(
        len in prop_oneof![0usize..=125, 126usize..=1000, 65530usize..=65540, 65536usize..70000]
    ) {
        let frame = Frame::binary(vec![0x5a; len]);
        let bytes = frame.encode();

        let (parsed, consumed) = Frame::parse(&bytes).unwrap();
        prop_assert_eq!(consumed, bytes.len());
        prop_assert_eq!(parsed.payload().len(), len);
    }

    // Truncating an encoded frame anywhere before its end must yield
    // IncompleteFrame, never a frame with a short payload.
    #[test]
    fn test_truncation_yields_incomplete(
        payload in prop::collection::vec(any::<u8>(), 1..300),
        mask in any::<[u8; 4]>(),
        cut_fraction in 0.0f64..1.0
    ) {
        let bytes = Frame::binary(payload).encode_masked(mask);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let cut = ((bytes.len() - 1) as f64 * cut_fraction) as usize;

        let result = Frame::parse(&bytes[..cut]);
        match result {
            Err(err) => prop_assert!(err.is_incomplete(), "unexpected error: {err:?}"),
            Ok(_) => prop_assert!(false, "truncated frame parsed successfully"),
        }
    }

    // The accept key is deterministic and always 28 base64 characters
    // (SHA-1 is 20 bytes).
    #[test]
    fn test_accept_key_shape(key in "[A-Za-z0-9+/]{22}==") {
        let accept = compute_accept_key(&key);
        prop_assert_eq!(accept.len(), 28);
        prop_assert_eq!(accept, compute_accept_key(&key));
    }
}
