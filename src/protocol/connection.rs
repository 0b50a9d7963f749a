//! Connection frame loop: reads frames, dispatches by content type, and
//! enforces the alert-on-error policy.
//!
//! One task owns the connection and drives [`Connection::process`]; the
//! handshake driver and application handler are called inline, so frame
//! order is processing order. A protocol error sends a best-effort ALERT
//! and tears the connection down; an authentication failure sends the same
//! ALERT but leaves the connection (and any cipher state activated by an
//! earlier exchange) intact.

use crate::config::TransportConfig;
use crate::core::codec;
use crate::error::{Result, TransportError};
use crate::protocol::frame::{Channel, FrameCodec};
use crate::protocol::handshake::HandshakeDriver;
use crate::protocol::packet::{ContentType, HandshakePacket};
use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error};

/// Receives decrypted application payloads in frame order.
#[async_trait]
pub trait ApplicationHandler: Send {
    async fn handle(&mut self, payload: Vec<u8>) -> Result<()>;
}

/// Drops every application payload; for connections that only handshake.
pub struct DiscardHandler;

#[async_trait]
impl ApplicationHandler for DiscardHandler {
    async fn handle(&mut self, _payload: Vec<u8>) -> Result<()> {
        Ok(())
    }
}

/// One secure connection: the frame codec, the write half, and the two
/// injected consumers. The read half is passed to [`Connection::process`]
/// so it can live in a split or borrowed form.
pub struct Connection<W, D, A> {
    codec: FrameCodec,
    writer: W,
    driver: D,
    handler: A,
    hello_handler: Option<Box<dyn FnMut(&str) + Send>>,
}

impl<W, D, A> Connection<W, D, A>
where
    W: AsyncWrite + Unpin + Send,
    D: HandshakeDriver,
    A: ApplicationHandler,
{
    pub fn new(config: &TransportConfig, writer: W, driver: D, handler: A) -> Self {
        Self {
            codec: FrameCodec::new(config),
            writer,
            driver,
            handler,
            hello_handler: None,
        }
    }

    /// Install a callback for inbound HELLO payloads.
    pub fn with_hello_handler(mut self, hello_handler: Box<dyn FnMut(&str) + Send>) -> Self {
        self.hello_handler = Some(hello_handler);
        self
    }

    /// Borrow the send half, e.g. to originate a client flow or push
    /// application data between reads.
    pub fn channel(&mut self) -> Channel<'_, W> {
        Channel {
            codec: &mut self.codec,
            writer: &mut self.writer,
        }
    }

    /// Split into the send half and the driver, for originating a flow
    /// that needs both (e.g. a client `start_*` call).
    pub fn parts(&mut self) -> (Channel<'_, W>, &mut D) {
        (
            Channel {
                codec: &mut self.codec,
                writer: &mut self.writer,
            },
            &mut self.driver,
        )
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    /// Run the frame loop until clean EOF, a fatal error, or a peer alert.
    pub async fn process<R: AsyncRead + Unpin + Send>(&mut self, reader: &mut R) -> Result<()> {
        loop {
            let record = match self.codec.read_frame(reader).await {
                Ok(Some(record)) => record,
                Ok(None) => return Ok(()),
                Err(err) => {
                    self.alert_best_effort(&err).await;
                    return Err(err);
                }
            };

            match record.content_type {
                ContentType::ApplicationData => self.handler.handle(record.payload).await?,
                ContentType::Handshake => {
                    let outcome = match codec::decode::<HandshakePacket>(&record.payload) {
                        Ok(packet) => {
                            let mut channel = Channel {
                                codec: &mut self.codec,
                                writer: &mut self.writer,
                            };
                            self.driver.on_packet(packet, &mut channel).await
                        }
                        Err(err) => Err(err),
                    };
                    if let Err(err) = outcome {
                        self.alert_best_effort(&err).await;
                        if err.is_fatal() {
                            return Err(err);
                        }
                        debug!(error = %err, "handshake exchange failed, connection stays up");
                    }
                }
                ContentType::ChangeCipherSpec => {
                    if let Err(err) = self.codec.activate_read() {
                        self.alert_best_effort(&err).await;
                        return Err(err);
                    }
                }
                ContentType::Alert => {
                    let message = String::from_utf8_lossy(&record.payload).into_owned();
                    error!(alert = %message, "peer alert received");
                    return Err(TransportError::Alert(message));
                }
                ContentType::Hello => match codec::decode::<String>(&record.payload) {
                    Ok(hello) => {
                        debug!(%hello, "hello received");
                        if let Some(handler) = self.hello_handler.as_mut() {
                            handler(&hello);
                        }
                    }
                    Err(err) => {
                        self.alert_best_effort(&err).await;
                        return Err(err);
                    }
                },
            }
        }
    }

    /// Send an ALERT describing `err`; failures here are only logged, the
    /// caller is already on an error path.
    async fn alert_best_effort(&mut self, err: &TransportError) {
        let mut channel = Channel {
            codec: &mut self.codec,
            writer: &mut self.writer,
        };
        if channel.send_alert(&err.to_string()).await.is_err() {
            debug!("failed to deliver alert before teardown");
        }
    }
}
