use oic_codec::error::CodecError;
use oic_codec::message::{encode_message_cbor, MessageV1};
use oic_transport::adapter::TransportAdapter;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OutboundError {
    #[error("encode failed: {0}")]
    Codec(#[from] CodecError),
    #[error("datagram of {size} bytes exceeds transport limit {limit}")]
    TooLarge { size: usize, limit: usize },
    #[error("transport send failed: {0}")]
    Transport(String),
}

/// Encodes `message` and sends it to `host`, or to the multicast group when
/// `host` is `None`.
pub fn send_message<A: TransportAdapter>(
    adapter: &mut A,
    host: Option<&str>,
    message: &MessageV1,
) -> Result<(), OutboundError> {
    let bytes = encode_message_cbor(message)?;
    if let Some(limit) = adapter.max_payload_hint() {
        if bytes.len() > limit {
            return Err(OutboundError::TooLarge {
                size: bytes.len(),
                limit,
            });
        }
    }
    let sent = match host {
        Some(host) => adapter.send(host, &bytes),
        None => adapter.multicast(&bytes),
    };
    sent.map_err(|err| OutboundError::Transport(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::{send_message, OutboundError};
    use oic_codec::message::{decode_message_cbor, MessageV1, PresenceMessage};
    use oic_core::PresenceTrigger;
    use oic_transport::adapter::{Destination, InMemoryAdapter, TransportAdapter};

    struct TinyAdapter(InMemoryAdapter);

    impl TransportAdapter for TinyAdapter {
        type Error = &'static str;

        fn local_host(&self) -> &str {
            self.0.local_host()
        }

        fn send(&mut self, host: &str, bytes: &[u8]) -> Result<(), Self::Error> {
            self.0.send(host, bytes)
        }

        fn multicast(&mut self, bytes: &[u8]) -> Result<(), Self::Error> {
            self.0.multicast(bytes)
        }

        fn recv(&mut self) -> Option<(String, Vec<u8>)> {
            self.0.recv()
        }

        fn max_payload_hint(&self) -> Option<usize> {
            Some(4)
        }
    }

    fn presence() -> MessageV1 {
        MessageV1::presence(PresenceMessage {
            nonce: 1,
            ttl_secs: 60,
            resource_type: None,
            trigger: PresenceTrigger::Create,
        })
    }

    #[test]
    fn host_selects_unicast_and_none_selects_multicast() {
        let mut adapter = InMemoryAdapter::new("server");
        let message = presence();
        send_message(&mut adapter, Some("client"), &message).expect("unicast should send");
        send_message(&mut adapter, None, &message).expect("multicast should send");

        let sent = adapter.take_outbound();
        assert_eq!(sent[0].0, Destination::Host("client".into()));
        assert_eq!(sent[1].0, Destination::Multicast);
        assert_eq!(decode_message_cbor(&sent[1].1).expect("decodes"), message);
    }

    #[test]
    fn oversized_datagram_is_refused_before_sending() {
        let mut adapter = TinyAdapter(InMemoryAdapter::new("server"));
        let err = send_message(&mut adapter, None, &presence()).expect_err("too large");
        assert!(matches!(err, OutboundError::TooLarge { limit: 4, .. }));
        assert!(adapter.0.take_outbound().is_empty());
    }
}
