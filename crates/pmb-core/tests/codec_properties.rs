//! Property-based tests for the envelope codec
//!
//! Covers the round trip, self-filtering and multi-key decrypt guarantees
//! across arbitrary payloads and key sets.

use pmb_core::{Codec, KeySet, LocalNetInfo};
use proptest::prelude::*;
use serde_json::{Map, Value};

const PROVENANCE: [&str; 4] = ["id", "hostname", "ip", "sent"];

// ============================================================================
// Strategy Generators
// ============================================================================

fn value_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        ".{0,64}".prop_map(Value::String),
        any::<i64>().prop_map(Value::from),
        any::<bool>().prop_map(Value::Bool),
        Just(Value::Null),
    ]
}

/// Application payloads: a `type` plus arbitrary non-provenance fields
fn payload_strategy() -> impl Strategy<Value = Map<String, Value>> {
    (
        "[A-Za-z]{1,16}",
        prop::collection::btree_map("[a-z_-]{1,12}", value_strategy(), 0..8),
    )
        .prop_map(|(kind, fields)| {
            let mut payload: Map<String, Value> = fields
                .into_iter()
                .filter(|(k, _)| !PROVENANCE.contains(&k.as_str()))
                .collect();
            payload.insert("type".into(), Value::String(kind));
            payload
        })
}

fn keyset_strategy() -> impl Strategy<Value = KeySet> {
    prop::collection::vec("[a-z0-9]{32}", 0..4).prop_map(KeySet::from_keys)
}

fn codec(id: &str) -> Codec {
    Codec::with_net_info(
        id,
        LocalNetInfo {
            hostname: Some("prop-host".into()),
            ip: Some("127.0.0.1".into()),
        },
    )
}

fn strip_provenance(mut contents: Map<String, Value>) -> Map<String, Value> {
    for field in PROVENANCE {
        contents.remove(field);
    }
    contents
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    /// Every produced body decodes back to the input payload
    #[test]
    fn payload_roundtrip(payload in payload_strategy(), keys in keyset_strategy()) {
        let bodies = codec("sender").prepare(payload.clone(), &keys).unwrap();
        prop_assert_eq!(bodies.len(), keys.len().max(1));

        let receiver = codec("receiver");
        for body in &bodies {
            let envelope = receiver.parse(body.as_bytes(), &keys).expect("body should decode");
            prop_assert_eq!(envelope.sender_id(), Some("sender"));
            prop_assert_eq!(strip_provenance(envelope.into_contents()), payload.clone());
        }
    }

    /// A connection never surfaces its own messages
    #[test]
    fn own_messages_filtered(
        payload in payload_strategy(),
        keys in keyset_strategy(),
        id in "[a-z]{1,8}-[a-z0-9]{12}",
    ) {
        let me = codec(&id);
        for body in me.prepare(payload, &keys).unwrap() {
            prop_assert!(me.parse(body.as_bytes(), &keys).is_none());
        }
    }

    /// Only the key that encrypted a body can open it, wherever it sits in the set
    #[test]
    fn multi_key_decrypt(payload in payload_strategy(), rotate in 0usize..3) {
        let k1 = KeySet::generate_key();
        let k2 = KeySet::generate_key();
        let k3 = KeySet::generate_key();

        let only_k2 = KeySet::from_keys(vec![k2.clone()]);
        let bodies = codec("sender").prepare(payload, &only_k2).unwrap();
        prop_assert_eq!(bodies.len(), 1);

        let mut all = vec![k1.clone(), k2, k3.clone()];
        all.rotate_left(rotate);
        let receiver = codec("receiver");

        prop_assert!(receiver.parse(bodies[0].as_bytes(), &KeySet::from_keys(all)).is_some());
        prop_assert!(receiver
            .parse(bodies[0].as_bytes(), &KeySet::from_keys(vec![k1, k3]))
            .is_none());
    }

    /// Arbitrary garbage is dropped, never a panic
    #[test]
    fn garbage_never_panics(
        body in prop::collection::vec(any::<u8>(), 0..256),
        keys in keyset_strategy(),
    ) {
        let _ = codec("receiver").parse(&body, &keys);
    }
}
