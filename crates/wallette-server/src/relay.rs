use std::sync::Arc;

use tracing::debug;

use wallette_shared::error::ProtocolError;
use wallette_shared::protocol::{EncodedEnvelope, SignalingEvent};
use wallette_shared::Identity;

use crate::transport::EventTransport;

/// Addressed forwarder for encrypted negotiation envelopes. It never decrypts
/// and keeps no session state.
#[derive(Clone)]
pub struct SignalingRelay {
    transport: Arc<EventTransport>,
}

impl SignalingRelay {
    pub fn new(transport: Arc<EventTransport>) -> Self {
        Self { transport }
    }

    /// Returns whether the recipient had a live push channel. Only the
    /// envelope size is checked.
    pub async fn relay(
        &self,
        sender: &Identity,
        recipient: &Identity,
        envelope: EncodedEnvelope,
    ) -> Result<bool, ProtocolError> {
        envelope.check_size()?;
        let size = envelope.encoded_len();
        let delivered = self
            .transport
            .send(recipient, SignalingEvent::WebRtcNegotiation(envelope))
            .await;

        if delivered {
            debug!(from = %sender, to = %recipient, size, "Relayed negotiation envelope");
        } else {
            debug!(from = %sender, to = %recipient, "Recipient offline, envelope dropped");
        }
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wallette_shared::constants::MAX_ENVELOPE_SIZE;

    fn id(s: &str) -> Identity {
        Identity::parse(s).unwrap()
    }

    fn envelope(len: usize) -> EncodedEnvelope {
        EncodedEnvelope {
            encoded_iv: "AAAA".into(),
            encoded_ice_negotiation: "A".repeat(len),
        }
    }

    #[tokio::test]
    async fn test_relay_forwards_untouched() {
        let transport = Arc::new(EventTransport::new(4));
        let relay = SignalingRelay::new(transport.clone());
        let bob = id("0xb0b");
        let mut reg = transport.register(&bob).await;

        let sent = envelope(16);
        assert!(relay.relay(&id("0xa11ce"), &bob, sent.clone()).await.unwrap());
        assert_eq!(
            reg.events.recv().await.unwrap(),
            SignalingEvent::WebRtcNegotiation(sent)
        );
    }

    #[tokio::test]
    async fn test_offline_recipient_is_not_an_error() {
        let relay = SignalingRelay::new(Arc::new(EventTransport::new(4)));
        let delivered = relay
            .relay(&id("0xa11ce"), &id("0xb0b"), envelope(16))
            .await
            .unwrap();
        assert!(!delivered);
    }

    #[tokio::test]
    async fn test_oversized_envelope_rejected() {
        let transport = Arc::new(EventTransport::new(4));
        let relay = SignalingRelay::new(transport.clone());
        let bob = id("0xb0b");
        let mut reg = transport.register(&bob).await;

        let result = relay
            .relay(&id("0xa11ce"), &bob, envelope(MAX_ENVELOPE_SIZE))
            .await;
        assert!(matches!(result, Err(ProtocolError::EnvelopeTooLarge { .. })));
        assert!(reg.events.try_recv().is_err());
    }
}
