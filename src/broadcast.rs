use std::{net::SocketAddr, sync::Arc};

use tracing::warn;

use crate::{connection::Connection, frame, registry::ConnectionRegistry};

/// Fans one sender's message out to every other live connection.
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Delivers `payload` to every registered connection except `origin`,
    /// framed as `"<origin-addr>: <payload><EOF>"` so recipients can
    /// attribute the message.
    ///
    /// With fewer than two connections there is no recipient and the call
    /// degenerates to a no-op. Deliveries are independent: a failed send
    /// tears that one recipient down and the fan-out continues.
    pub async fn broadcast(&self, payload: &[u8], origin: &Connection) {
        let frame = frame::encode(&attributed(payload, origin.peer()));

        for recipient in self.registry.snapshot() {
            if recipient.id() == origin.id() {
                continue;
            }
            if let Err(error) = recipient.send_frame(&frame).await {
                warn!(peer = %recipient.peer(), ?error, "dropping unreachable recipient");
                recipient.close(&self.registry).await;
            }
        }
    }
}

/// Prepends the sender's address so recipients can tell who spoke. The
/// display layer splits on the first `": "`.
fn attributed(payload: &[u8], origin: SocketAddr) -> Vec<u8> {
    let mut message = origin.to_string().into_bytes();
    message.extend_from_slice(b": ");
    message.extend_from_slice(payload);
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribution_prefixes_sender_address() {
        let origin: SocketAddr = "127.0.0.1:9000".parse().expect("addr");
        assert_eq!(
            attributed(b"hello", origin),
            b"127.0.0.1:9000: hello".to_vec()
        );
    }

    #[test]
    fn attribution_keeps_empty_payload_parseable() {
        let origin: SocketAddr = "127.0.0.1:9000".parse().expect("addr");
        assert_eq!(attributed(b"", origin), b"127.0.0.1:9000: ".to_vec());
    }
}
