//! Property-based codec tests.
//!
//! Uses proptest to verify:
//! 1. Any `ServerFrame` survives encode → decode.
//! 2. Any `ClientFrame` survives encode → decode, with the message id intact.
//! 3. Random bytes never cause a panic in either decoder.

use proptest::prelude::*;
use relaychat_proto::codec;
use relaychat_proto::frame::{Ack, ClientFrame, ServerFrame};
use relaychat_proto::message::{Message, MessageId, ParticipantId, Timestamp};

fn arb_message() -> impl Strategy<Value = Message> {
    (
        "[a-f0-9-]{1,40}",
        "[a-z0-9]{1,16}",
        "[^\x00]{1,512}",
        proptest::option::of(any::<u64>()),
    )
        .prop_map(|(id, sender, text, ts)| Message {
            id: MessageId::new(id),
            sender_id: ParticipantId::new(sender),
            text,
            timestamp: ts.map(Timestamp::from_millis),
        })
}

fn arb_ack() -> impl Strategy<Value = Ack> {
    (
        "[a-f0-9-]{1,40}",
        any::<u32>(),
        any::<bool>(),
        proptest::option::of(".{0,64}"),
    )
        .prop_map(|(id, attempt, success, error)| Ack {
            message_id: MessageId::new(id),
            attempt,
            success,
            error,
        })
}

fn arb_server_frame() -> impl Strategy<Value = ServerFrame> {
    prop_oneof![
        arb_message().prop_map(ServerFrame::ReceiveMessage),
        prop::collection::vec(arb_message(), 0..16).prop_map(ServerFrame::SyncMessages),
        any::<u32>().prop_map(ServerFrame::UserCount),
        arb_ack().prop_map(ServerFrame::Ack),
    ]
}

proptest! {
    #[test]
    fn server_frame_round_trip(frame in arb_server_frame()) {
        let bytes = codec::encode_server(&frame).expect("encode should succeed");
        let decoded = codec::decode_server(&bytes).expect("decode should succeed");
        prop_assert_eq!(frame, decoded);
    }

    #[test]
    fn send_message_keeps_identity(message in arb_message(), attempt in 0u32..8) {
        let frame = ClientFrame::SendMessage { message: message.clone(), attempt };
        let bytes = codec::encode_client(&frame).expect("encode should succeed");
        match codec::decode_client(&bytes).expect("decode should succeed") {
            ClientFrame::SendMessage { message: decoded, attempt: decoded_attempt } => {
                prop_assert_eq!(decoded.id, message.id);
                prop_assert_eq!(decoded_attempt, attempt);
            }
            ClientFrame::RequestSync => prop_assert!(false, "decoded wrong variant"),
        }
    }

    #[test]
    fn random_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..1024)) {
        let _ = codec::decode_server(&bytes);
        let _ = codec::decode_client(&bytes);
    }
}
