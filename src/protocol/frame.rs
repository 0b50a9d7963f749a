//! Record layer: wire framing, encryption/MAC composition, and the frame
//! send/receive primitives.
//!
//! Plaintext mode frames an 8-byte header (`version:u8, content_type:u8,
//! length:u32 BE, reserved:u16`) followed by the raw payload. Once a cipher
//! is active the header body plus an 8-byte HMAC tag are encrypted as a
//! single AES-256-ECB block; that ciphertext block doubles as the CBC IV for
//! the payload, and a 16-byte truncated HMAC-SHA256 closes the frame.
//!
//! The declared on-wire length of a non-empty encrypted payload is always
//! the smallest multiple of 16 strictly greater than the payload length:
//! PKCS7 adds a full pad block even for block-aligned input. Peers depend on
//! this exact rounding.

use crate::config::TransportConfig;
use crate::core::cipher::{CipherState, CipherSuite};
use crate::core::codec;
use crate::core::crypto::{
    cbc_decrypt, cbc_encrypt, ct_eq, ecb_decrypt_block, ecb_encrypt_block, hmac_sha256,
};
use crate::error::{constants, Result, TransportError};
use crate::protocol::packet::{ContentType, HandshakePacket};
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

/// One decoded frame: its content type and decrypted payload.
#[derive(Debug)]
pub struct Record {
    pub content_type: ContentType,
    pub payload: Vec<u8>,
}

/// Stateful frame codec for one connection.
///
/// Owns the four cipher slots and the logical frame counter used for HELLO
/// enforcement. Exclusively owned by its connection's frame loop; no
/// internal synchronization.
pub struct FrameCodec {
    version: u8,
    max_frame_length: u32,
    required_hello_packet: bool,
    frames_read: u64,
    suite: CipherSuite,
}

impl FrameCodec {
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            version: config.version,
            max_frame_length: config.max_frame_length,
            required_hello_packet: config.required_hello_packet,
            frames_read: 0,
            suite: CipherSuite::default(),
        }
    }

    /// Install a derived read/write pair into the pending cipher slots.
    pub fn set_pending(&mut self, read: CipherState, write: CipherState) {
        self.suite.set_pending(read, write);
    }

    /// Promote the pending read state (CHANGE_CIPHER_SPEC received).
    pub fn activate_read(&mut self) -> Result<()> {
        self.suite.activate_read()
    }

    /// Whether outgoing frames are currently encrypted.
    pub fn write_active(&self) -> bool {
        self.suite.write_active()
    }

    /// Whether a pending write state is waiting for activation.
    pub fn pending_write_ready(&self) -> bool {
        self.suite.pending_write_ready()
    }

    /// Whether a pending read state is waiting for the peer's
    /// CHANGE_CIPHER_SPEC.
    pub fn pending_read_ready(&self) -> bool {
        self.suite.pending.read.is_some()
    }

    /// Promote the pending write state. Normally driven through
    /// [`Channel::change_write_cipher_spec`], which also emits the
    /// CHANGE_CIPHER_SPEC frame the peer synchronizes on.
    pub fn activate_write(&mut self) -> Result<()> {
        self.suite.activate_write()
    }

    /// Encode one frame under the current write state.
    ///
    /// With an active write cipher (and `force_plaintext` unset) the frame
    /// is sealed; otherwise it goes out as a plaintext header plus raw
    /// payload with no MAC.
    pub fn seal(
        &mut self,
        content_type: ContentType,
        payload: &[u8],
        force_plaintext: bool,
    ) -> Result<Vec<u8>> {
        if payload.len() > self.max_frame_length as usize {
            return Err(TransportError::OversizedFrame(payload.len()));
        }

        let state = match self.suite.current.write.as_mut() {
            Some(state) if !force_plaintext => state,
            _ => {
                let mut out = BytesMut::with_capacity(8 + payload.len());
                out.extend_from_slice(&header_body(
                    self.version,
                    content_type,
                    payload.len() as u32,
                ));
                out.extend_from_slice(payload);
                return Ok(out.to_vec());
            }
        };

        let frame_length: u32 = if payload.is_empty() {
            0
        } else {
            // Full pad block even when already aligned
            (((payload.len() + 16) >> 4) << 4) as u32
        };
        // The declared length is what the peer checks against its cap, so
        // the padded length is the one that has to fit.
        if frame_length > self.max_frame_length {
            return Err(TransportError::OversizedFrame(frame_length as usize));
        }

        let body = header_body(self.version, content_type, frame_length);
        let tag = hmac_sha256(&state.mac_key, &[&state.sequence_bytes(), &body]);
        state.sequence += 1;
        let seq_after = state.sequence_bytes();

        let mut block = [0u8; 16];
        block[..8].copy_from_slice(&body);
        block[8..].copy_from_slice(&tag[..8]);
        // The encrypted header doubles as the CBC IV for the payload
        let header = ecb_encrypt_block(&state.key, &block);

        let mut out = BytesMut::with_capacity(16 + frame_length as usize + 16);
        out.extend_from_slice(&header);

        if !payload.is_empty() {
            let ciphertext = cbc_encrypt(&state.key, &header, payload);
            debug_assert_eq!(ciphertext.len(), frame_length as usize);
            let mac = hmac_sha256(&state.mac_key, &[&seq_after, &body, &header, &ciphertext]);
            out.extend_from_slice(&ciphertext);
            out.extend_from_slice(&mac[..16]);
        }

        trace!(
            content_type = content_type as u8,
            frame_length,
            "frame sealed"
        );
        Ok(out.to_vec())
    }

    /// Read and decode one frame, or `None` on a clean EOF at a frame
    /// boundary.
    ///
    /// # Errors
    /// Protocol errors (bad tag, bad MAC, malformed header, missing HELLO)
    /// are connection-fatal. EOF in the middle of a frame maps to
    /// [`TransportError::ConnectionClosed`].
    pub async fn read_frame<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut R,
    ) -> Result<Option<Record>> {
        let record = if self.suite.read_active() {
            match self.read_sealed(reader).await? {
                Some(record) => record,
                None => return Ok(None),
            }
        } else {
            match self.read_plaintext(reader).await? {
                Some(record) => record,
                None => return Ok(None),
            }
        };

        // First logical frame of the stream must be HELLO when configured,
        // independent of cipher state.
        if self.frames_read == 0
            && self.required_hello_packet
            && record.content_type != ContentType::Hello
        {
            return Err(TransportError::HelloRequired);
        }
        self.frames_read += 1;

        Ok(Some(record))
    }

    async fn read_sealed<R: AsyncRead + Unpin>(&mut self, reader: &mut R) -> Result<Option<Record>> {
        let mut header = [0u8; 16];
        if !read_full(reader, &mut header).await? {
            return Ok(None);
        }

        let state = self
            .suite
            .current
            .read
            .as_mut()
            .ok_or(TransportError::CipherState(constants::ERR_NO_PENDING_READ))?;

        let block = ecb_decrypt_block(&state.key, &header);
        let mut body = [0u8; 8];
        body.copy_from_slice(&block[..8]);

        let expected = hmac_sha256(&state.mac_key, &[&state.sequence_bytes(), &body]);
        if !ct_eq(&block[8..16], &expected[..8]) {
            return Err(TransportError::InvalidFrameTag);
        }
        state.sequence += 1;
        let seq_after = state.sequence_bytes();

        let (content_type, length) = self.parse_header(&body)?;

        if length == 0 {
            return Ok(Some(Record {
                content_type,
                payload: Vec::new(),
            }));
        }
        if length % 16 != 0 {
            return Err(TransportError::InvalidHeader);
        }

        let mut ciphertext = vec![0u8; length as usize];
        if !read_full(reader, &mut ciphertext).await? {
            return Err(TransportError::ConnectionClosed);
        }
        let mut mac = [0u8; 16];
        if !read_full(reader, &mut mac).await? {
            return Err(TransportError::ConnectionClosed);
        }

        let state = self
            .suite
            .current
            .read
            .as_ref()
            .ok_or(TransportError::CipherState(constants::ERR_NO_PENDING_READ))?;
        let expected = hmac_sha256(&state.mac_key, &[&seq_after, &body, &header, &ciphertext]);
        if !ct_eq(&mac, &expected[..16]) {
            return Err(TransportError::InvalidFrameMac);
        }

        // The encrypted header block is reused as the CBC IV
        let payload = cbc_decrypt(&state.key, &header, &ciphertext)?;

        Ok(Some(Record {
            content_type,
            payload,
        }))
    }

    async fn read_plaintext<R: AsyncRead + Unpin>(
        &mut self,
        reader: &mut R,
    ) -> Result<Option<Record>> {
        let mut body = [0u8; 8];
        if !read_full(reader, &mut body).await? {
            return Ok(None);
        }

        let (content_type, length) = self.parse_header(&body)?;

        let mut payload = vec![0u8; length as usize];
        if length > 0 && !read_full(reader, &mut payload).await? {
            return Err(TransportError::ConnectionClosed);
        }

        Ok(Some(Record {
            content_type,
            payload,
        }))
    }

    fn parse_header(&self, body: &[u8; 8]) -> Result<(ContentType, u32)> {
        if body[0] != self.version {
            return Err(TransportError::UnsupportedVersion(body[0]));
        }
        let content_type = ContentType::from_byte(body[1])?;
        let length = u32::from_be_bytes([body[2], body[3], body[4], body[5]]);
        if length > self.max_frame_length {
            return Err(TransportError::OversizedFrame(length as usize));
        }
        Ok((content_type, length))
    }
}

fn header_body(version: u8, content_type: ContentType, length: u32) -> [u8; 8] {
    let mut body = [0u8; 8];
    body[0] = version;
    body[1] = content_type as u8;
    body[2..6].copy_from_slice(&length.to_be_bytes());
    // bytes 6..8 reserved, zero
    body
}

/// Fill `buf` completely. Returns `Ok(false)` on EOF before the first byte,
/// errors on EOF mid-buffer.
async fn read_full<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(TransportError::ConnectionClosed);
        }
        filled += n;
    }
    Ok(true)
}

/// Borrowed send half of a connection: the codec plus its writer.
///
/// Handed to the handshake coordinator so responses, cipher-spec changes,
/// and alerts all flow through the same sequencing state as regular sends.
pub struct Channel<'a, W: AsyncWrite + Unpin + Send> {
    pub codec: &'a mut FrameCodec,
    pub writer: &'a mut W,
}

impl<'a, W: AsyncWrite + Unpin + Send> Channel<'a, W> {
    /// Seal and write one frame.
    pub async fn send(
        &mut self,
        content_type: ContentType,
        payload: &[u8],
        force_plaintext: bool,
    ) -> Result<()> {
        let frame = self.codec.seal(content_type, payload, force_plaintext)?;
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Encode and send a handshake packet.
    pub async fn send_handshake(&mut self, packet: &HandshakePacket) -> Result<()> {
        let payload = codec::encode(packet)?;
        self.send(ContentType::Handshake, &payload, false).await
    }

    /// Send an application-data frame.
    pub async fn send_application(&mut self, payload: &[u8]) -> Result<()> {
        self.send(ContentType::ApplicationData, payload, false).await
    }

    /// Send a HELLO frame carrying a bare string.
    pub async fn send_hello(&mut self, hello: &str) -> Result<()> {
        let payload = codec::encode(&hello)?;
        self.send(ContentType::Hello, &payload, false).await
    }

    /// Send an ALERT frame; the payload is the raw UTF-8 message.
    pub async fn send_alert(&mut self, message: &str) -> Result<()> {
        self.send(ContentType::Alert, message.as_bytes(), false).await
    }

    /// Switch the write direction to the pending cipher state.
    ///
    /// The empty CHANGE_CIPHER_SPEC frame goes out under the *old* write
    /// state (plaintext if none) before the promotion. The peer must see the
    /// spec change under the prior state before any frame under the new one.
    pub async fn change_write_cipher_spec(&mut self) -> Result<()> {
        if !self.codec.pending_write_ready() {
            return Err(TransportError::CipherState(constants::ERR_NO_PENDING_WRITE));
        }
        self.send(ContentType::ChangeCipherSpec, &[], false).await?;
        self.codec.activate_write()
    }
}
