//! Framed byte transport.
//!
//! A [`Channel`] is one end of a duplex that moves whole frames. The in-memory
//! pair made by [`Channel::pair`] is what tests and the CLI's loopback mode
//! use; anything that can move `Vec<u8>` frames in order can stand in for it.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use super::RemoteError;

/// One end of a framed duplex.
pub struct Channel {
    sender: FrameSender,
    receiver: FrameReceiver,
}

impl Channel {
    /// Two connected ends, each buffering up to `capacity` frames per direction.
    pub fn pair(capacity: usize) -> (Channel, Channel) {
        let (a_tx, a_rx) = mpsc::channel(capacity.max(1));
        let (b_tx, b_rx) = mpsc::channel(capacity.max(1));
        (
            Channel {
                sender: FrameSender(a_tx),
                receiver: FrameReceiver(b_rx),
            },
            Channel {
                sender: FrameSender(b_tx),
                receiver: FrameReceiver(a_rx),
            },
        )
    }

    pub fn split(self) -> (FrameSender, FrameReceiver) {
        (self.sender, self.receiver)
    }
}

#[derive(Clone)]
pub struct FrameSender(mpsc::Sender<Vec<u8>>);

impl FrameSender {
    pub async fn send(&self, frame: Vec<u8>) -> Result<(), RemoteError> {
        self.0.send(frame).await.map_err(|_| RemoteError::Closed)
    }
}

pub struct FrameReceiver(mpsc::Receiver<Vec<u8>>);

impl FrameReceiver {
    /// Next frame, or `None` once the other end is gone.
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.0.recv().await
    }
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, RemoteError> {
    postcard::to_stdvec(value).map_err(RemoteError::Encode)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, RemoteError> {
    postcard::from_bytes(bytes).map_err(RemoteError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_is_crossed() {
        let (left, right) = Channel::pair(4);
        let (left_tx, mut left_rx) = left.split();
        let (right_tx, mut right_rx) = right.split();

        left_tx.send(b"ping".to_vec()).await.unwrap();
        assert_eq!(right_rx.recv().await.unwrap(), b"ping");
        right_tx.send(b"pong".to_vec()).await.unwrap();
        assert_eq!(left_rx.recv().await.unwrap(), b"pong");

        drop(right_tx);
        drop(right_rx);
        assert!(left_rx.recv().await.is_none());
        assert!(matches!(
            left_tx.send(Vec::new()).await,
            Err(RemoteError::Closed)
        ));
    }

    #[test]
    fn test_decode_garbage() {
        assert!(matches!(
            decode::<super::super::protocol::ClientFrame>(&[0xff, 0xff, 0xff]),
            Err(RemoteError::Decode(_))
        ));
    }
}
