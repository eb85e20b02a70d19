use attendo_core::{Descriptor, EncodeError, FaceEncoder};
use std::panic::AssertUnwindSafe;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("engine thread exited")]
    ChannelClosed,
    #[error("face encoder panicked")]
    Panicked,
    #[error("could not start engine thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Messages sent from request handlers to the engine thread.
enum EngineRequest {
    Encode {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<Option<Descriptor>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    /// Encode one image. `Ok(None)` when no face is found.
    pub async fn encode(&self, image: Vec<u8>) -> Result<Option<Descriptor>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Encode {
                image,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }
}

/// Spawn the encoder on a dedicated OS thread.
///
/// Model sessions need exclusive access, so every encode request is
/// serialized through this one thread.
pub fn spawn_engine<E>(mut encoder: E) -> Result<EngineHandle, EngineError>
where
    E: FaceEncoder + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("attendo-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Encode { image, reply } => {
                        let started = std::time::Instant::now();
                        // A panic fails this request only; the thread keeps serving.
                        let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                            encoder.encode(&image).map_err(EngineError::from)
                        }))
                        .unwrap_or_else(|_| {
                            tracing::error!(bytes = image.len(), "encoder panicked");
                            Err(EngineError::Panicked)
                        });
                        tracing::debug!(
                            bytes = image.len(),
                            face = matches!(result, Ok(Some(_))),
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "encode finished"
                        );
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}

#[cfg(test)]
pub(crate) mod testing {
    use attendo_core::{Descriptor, EncodeError, FaceEncoder, DESCRIPTOR_DIM};

    /// Encoder for tests: the image bytes are a UTF-8 float (every descriptor
    /// component takes that value), `noface` means no face, anything else is
    /// an undecodable image.
    pub struct StubEncoder;

    impl FaceEncoder for StubEncoder {
        fn encode(&mut self, image: &[u8]) -> Result<Option<Descriptor>, EncodeError> {
            let text = String::from_utf8_lossy(image);
            if text == "noface" {
                return Ok(None);
            }
            match text.parse::<f32>() {
                Ok(v) => Ok(Some(Descriptor::try_from(vec![v; DESCRIPTOR_DIM]).unwrap())),
                Err(_) => Err(EncodeError::Decode(image::ImageError::IoError(
                    std::io::Error::new(std::io::ErrorKind::InvalidData, "not an image"),
                ))),
            }
        }
    }

    /// Like [`StubEncoder`], but panics on the bytes `panic`.
    pub struct PanickingEncoder;

    impl FaceEncoder for PanickingEncoder {
        fn encode(&mut self, image: &[u8]) -> Result<Option<Descriptor>, EncodeError> {
            if image == b"panic" {
                panic!("encoder failure");
            }
            StubEncoder.encode(image)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{PanickingEncoder, StubEncoder};
    use super::*;

    #[tokio::test]
    async fn test_encode_roundtrip_through_thread() {
        let engine = spawn_engine(StubEncoder).unwrap();
        let d = engine.encode(b"0.5".to_vec()).await.unwrap().unwrap();
        assert!(d.values().iter().all(|&v| v == 0.5));
    }

    #[tokio::test]
    async fn test_no_face_is_none() {
        let engine = spawn_engine(StubEncoder).unwrap();
        assert!(engine.encode(b"noface".to_vec()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_encode_error_is_forwarded() {
        let engine = spawn_engine(StubEncoder).unwrap();
        let err = engine.encode(b"\x89PNG".to_vec()).await.unwrap_err();
        assert!(matches!(err, EngineError::Encode(EncodeError::Decode(_))));
    }

    #[tokio::test]
    async fn test_concurrent_handles_share_one_thread() {
        let engine = spawn_engine(StubEncoder).unwrap();
        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.encode(format!("{i}").into_bytes()).await })
            })
            .collect();
        for (i, task) in tasks.into_iter().enumerate() {
            let d = task.await.unwrap().unwrap().unwrap();
            assert_eq!(d.values()[0], i as f32);
        }
    }

    #[tokio::test]
    async fn test_panic_fails_only_that_request() {
        let engine = spawn_engine(PanickingEncoder).unwrap();
        let err = engine.encode(b"panic".to_vec()).await.unwrap_err();
        assert!(matches!(err, EngineError::Panicked));

        let d = engine.encode(b"0.25".to_vec()).await.unwrap().unwrap();
        assert_eq!(d.values()[0], 0.25);
    }
}
