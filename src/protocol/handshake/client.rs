//! Client side of the handshake state machine.
//!
//! The client originates a flow (`start_*` / `resume_ticket`), then the
//! connection loop feeds it the server's responses. Exactly one flow is in
//! flight at a time; a response that does not match the awaited state is a
//! protocol error.
//!
//! Key installation mirrors the server: the pending states are derived when
//! the server's response arrives, the client's CHANGE_CIPHER_SPEC goes out
//! immediately after, and the read direction switches when the server's
//! cipher-spec change is seen by the frame loop.

use crate::core::crypto::{ct_eq, random_bytes};
use crate::core::schedule::{derive_master_secret, derive_states, Role};
use crate::error::{constants, Result, TransportError};
use crate::protocol::ecdh;
use crate::protocol::frame::{Channel, FrameCodec};
use crate::protocol::handshake::HandshakeDriver;
use crate::protocol::packet::{require, HandshakePacket, TransportInfo};
use crate::protocol::srp::{self, SrpGroup};
use async_trait::async_trait;
use num_bigint::BigUint;
use serde_bytes::ByteBuf;
use tokio::io::AsyncWrite;
use tracing::debug;
use x25519_dalek::EphemeralSecret;
use zeroize::Zeroizing;

enum ClientState {
    Idle,
    AwaitEcdhe {
        secret: EphemeralSecret,
        public: [u8; 32],
    },
    AwaitEcdhef {
        secret: EphemeralSecret,
        public: [u8; 32],
    },
    AwaitSrpInit {
        identity: String,
        password: Zeroizing<String>,
        session_key: Vec<u8>,
        ticket_count: u32,
    },
    AwaitSrpExchange {
        key: [u8; 32],
        expected_m2: [u8; 32],
        a_wire: Vec<u8>,
        b_wire: Vec<u8>,
        session_id: String,
    },
    AwaitTicket {
        master: Zeroizing<Vec<u8>>,
        client_random: [u8; 32],
        plain: bool,
    },
    Established,
}

/// Per-connection client handshake coordinator.
pub struct ClientHandshake {
    agent: Option<String>,
    state: ClientState,
    master_secret: Option<Zeroizing<Vec<u8>>>,
    session_id: Option<String>,
    server_info: Option<TransportInfo>,
    tickets: Vec<Vec<u8>>,
    ticket_ttl: Option<u64>,
    additional_login_step: Option<Vec<u8>>,
}

impl ClientHandshake {
    pub fn new(agent: Option<String>) -> Self {
        Self {
            agent,
            state: ClientState::Idle,
            master_secret: None,
            session_id: None,
            server_info: None,
            tickets: Vec::new(),
            ticket_ttl: None,
            additional_login_step: None,
        }
    }

    /// Whether a flow has completed and the connection is usable.
    pub fn is_established(&self) -> bool {
        matches!(self.state, ClientState::Established)
    }

    /// The session id the server assigned, once known.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// The negotiated master secret; persist it alongside a ticket to
    /// resume later.
    pub fn master_secret(&self) -> Option<&Zeroizing<Vec<u8>>> {
        self.master_secret.as_ref()
    }

    /// Server parameters received in the handshake response, if any.
    pub fn server_info(&self) -> Option<&TransportInfo> {
        self.server_info.as_ref()
    }

    /// Resumption tickets collected so far (drains the internal store).
    pub fn take_tickets(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.tickets)
    }

    /// Ticket TTL in seconds, as advertised with the last ticket batch.
    pub fn ticket_ttl(&self) -> Option<u64> {
        self.ticket_ttl
    }

    /// Opaque step-up payload the server attached to the login, if any.
    pub fn additional_login_step(&self) -> Option<&[u8]> {
        self.additional_login_step.as_deref()
    }

    /// Open an anonymous ephemeral ECDH flow.
    pub async fn start_ecdhe<W: AsyncWrite + Unpin + Send>(
        &mut self,
        channel: &mut Channel<'_, W>,
    ) -> Result<()> {
        let (secret, public) = ecdh::generate();
        channel
            .send_handshake(&HandshakePacket::Ecdhe {
                key: ByteBuf::from(public.to_vec()),
                agent: self.agent.clone(),
                config: None,
            })
            .await?;
        self.state = ClientState::AwaitEcdhe { secret, public };
        Ok(())
    }

    /// Open an ECDH flow pinned to a named long-lived server key.
    pub async fn start_ecdhef<W: AsyncWrite + Unpin + Send>(
        &mut self,
        key_id: &str,
        channel: &mut Channel<'_, W>,
    ) -> Result<()> {
        let (secret, public) = ecdh::generate();
        channel
            .send_handshake(&HandshakePacket::Ecdhef {
                key_id: Some(key_id.to_string()),
                key: ByteBuf::from(public.to_vec()),
                agent: self.agent.clone(),
            })
            .await?;
        self.state = ClientState::AwaitEcdhef { secret, public };
        Ok(())
    }

    /// Open an SRP-6a password login, optionally asking for resumption
    /// tickets in the same exchange.
    ///
    /// `session_key` is the public key the server binds to the new session;
    /// a later `session`-flow resumption must prove possession of the
    /// matching private key.
    #[allow(clippy::too_many_arguments)]
    pub async fn start_srp<W: AsyncWrite + Unpin + Send>(
        &mut self,
        identity: &str,
        password: &str,
        host: &str,
        session_key: &[u8],
        ticket_count: u32,
        channel: &mut Channel<'_, W>,
    ) -> Result<()> {
        channel
            .send_handshake(&HandshakePacket::SrpInit {
                i: Some(identity.to_string()),
                host: Some(host.to_string()),
                n: None,
                g: None,
                k: None,
                s: None,
                b: None,
                session_id: None,
            })
            .await?;
        self.state = ClientState::AwaitSrpInit {
            identity: identity.to_string(),
            password: Zeroizing::new(password.to_string()),
            session_key: session_key.to_vec(),
            ticket_count,
        };
        Ok(())
    }

    /// Redeem a resumption ticket against a previously persisted master
    /// secret. With `plain` the session is restored without encryption.
    pub async fn resume_ticket<W: AsyncWrite + Unpin + Send>(
        &mut self,
        ticket: &[u8],
        master_secret: Zeroizing<Vec<u8>>,
        plain: bool,
        channel: &mut Channel<'_, W>,
    ) -> Result<()> {
        let client_random = random_bytes::<32>();
        channel
            .send_handshake(&HandshakePacket::Ticket {
                ticket_id: Some(ByteBuf::from(ticket.to_vec())),
                client_random: (!plain).then(|| ByteBuf::from(client_random.to_vec())),
                plain: plain.then_some(true),
                server_random: None,
            })
            .await?;
        self.state = ClientState::AwaitTicket {
            master: master_secret,
            client_random,
            plain,
        };
        Ok(())
    }

    /// Request a batch of resumption tickets on an established connection.
    pub async fn request_tickets<W: AsyncWrite + Unpin + Send>(
        &mut self,
        count: u32,
        channel: &mut Channel<'_, W>,
    ) -> Result<()> {
        channel
            .send_handshake(&HandshakePacket::TicketRequest { count })
            .await
    }

    fn install_keys(
        &mut self,
        codec: &mut FrameCodec,
        premaster: &[u8],
        client_random: &[u8],
        server_random: &[u8],
    ) {
        let master = derive_master_secret(premaster, client_random, server_random);
        let (read, write) = derive_states(&master, client_random, server_random, Role::Client);
        codec.set_pending(read, write);
        self.master_secret = Some(master);
    }

    async fn on_ecdh_response<W: AsyncWrite + Unpin + Send>(
        &mut self,
        secret: EphemeralSecret,
        public: [u8; 32],
        server_key: ByteBuf,
        channel: &mut Channel<'_, W>,
    ) -> Result<()> {
        let premaster = ecdh::agree(secret, &server_key)?;
        self.install_keys(channel.codec, &premaster[..], &public, &server_key);
        self.state = ClientState::Established;
        debug!("ecdh exchange complete");
        channel.change_write_cipher_spec().await
    }

    #[allow(clippy::too_many_arguments)]
    async fn on_srp_init_response<W: AsyncWrite + Unpin + Send>(
        &mut self,
        identity: String,
        password: Zeroizing<String>,
        session_key: Vec<u8>,
        ticket_count: u32,
        packet: SrpInitFields,
        channel: &mut Channel<'_, W>,
    ) -> Result<()> {
        let n = require(packet.n, "n")?;
        let g = require(packet.g, "g")?;
        let salt = require(packet.s, "s")?;
        let b_wire = require(packet.b, "b")?;
        let session_id = require(packet.session_id, "session_id")?;

        let group = SrpGroup {
            n: BigUint::from_bytes_be(&n),
            g: BigUint::from_bytes_be(&g),
        };
        // k is recomputed locally; the advertised value is not trusted.
        let k = group.k();
        let b_pub = BigUint::from_bytes_be(&b_wire);

        let x = srp::compute_x(&salt, &identity, &password);
        let a = srp::private_value();
        let a_pub = srp::client_public(&group, &a);
        let u = srp::compute_u(&group, &a_pub, &b_pub)?;
        let secret = srp::client_secret(&group, &b_pub, &k, &x, &a, &u)?;
        let key = srp::session_key(&group, &secret);

        let m1 = srp::client_proof(&group, &identity, &salt, &a_pub, &b_pub, &key);
        let expected_m2 = srp::server_proof(&a_pub, &m1, &key);
        let a_wire = a_pub.to_bytes_be();

        channel
            .send_handshake(&HandshakePacket::SrpExchange {
                a: Some(ByteBuf::from(a_wire.clone())),
                m1: Some(ByteBuf::from(m1.to_vec())),
                session_key: Some(ByteBuf::from(session_key)),
                ticket_count: (ticket_count > 0).then_some(ticket_count),
                m2: None,
                tickets: None,
                ttl: None,
                additional_login_step: None,
            })
            .await?;
        self.state = ClientState::AwaitSrpExchange {
            key,
            expected_m2,
            a_wire,
            b_wire: b_wire.into_vec(),
            session_id,
        };
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn on_srp_exchange_response<W: AsyncWrite + Unpin + Send>(
        &mut self,
        key: [u8; 32],
        expected_m2: [u8; 32],
        a_wire: Vec<u8>,
        b_wire: Vec<u8>,
        session_id: String,
        packet: SrpExchangeFields,
        channel: &mut Channel<'_, W>,
    ) -> Result<()> {
        let m2 = require(packet.m2, "m2")?;
        if !ct_eq(&m2, &expected_m2) {
            return Err(TransportError::Authentication(
                constants::ERR_SRP_PROOF_MISMATCH.into(),
            ));
        }

        if let Some(tickets) = packet.tickets {
            self.tickets
                .extend(tickets.into_iter().map(ByteBuf::into_vec));
            self.ticket_ttl = packet.ttl;
        }
        self.additional_login_step = packet.additional_login_step.map(ByteBuf::into_vec);
        self.session_id = Some(session_id);

        self.install_keys(channel.codec, &key, &a_wire, &b_wire);
        self.state = ClientState::Established;
        debug!("srp login complete");
        channel.change_write_cipher_spec().await
    }

    async fn on_ticket_response<W: AsyncWrite + Unpin + Send>(
        &mut self,
        master: Zeroizing<Vec<u8>>,
        client_random: [u8; 32],
        plain: bool,
        server_random: Option<ByteBuf>,
        channel: &mut Channel<'_, W>,
    ) -> Result<()> {
        if plain {
            self.master_secret = Some(master);
            self.state = ClientState::Established;
            debug!("plaintext ticket resumption complete");
            return Ok(());
        }

        let server_random = require(server_random, "server_random")?;
        // Resumption re-derives only the key block; the master secret is
        // the persisted one.
        let (read, write) = derive_states(&master, &client_random, &server_random, Role::Client);
        channel.codec.set_pending(read, write);
        self.master_secret = Some(master);
        self.state = ClientState::Established;
        debug!("ticket resumption complete");
        channel.change_write_cipher_spec().await
    }
}

/// Server-sent fields of an `srp_init` response.
struct SrpInitFields {
    n: Option<ByteBuf>,
    g: Option<ByteBuf>,
    s: Option<ByteBuf>,
    b: Option<ByteBuf>,
    session_id: Option<String>,
}

/// Server-sent fields of an `srp_exchange` response.
struct SrpExchangeFields {
    m2: Option<ByteBuf>,
    tickets: Option<Vec<ByteBuf>>,
    ttl: Option<u64>,
    additional_login_step: Option<ByteBuf>,
}

#[async_trait]
impl HandshakeDriver for ClientHandshake {
    async fn on_packet<W: AsyncWrite + Unpin + Send>(
        &mut self,
        packet: HandshakePacket,
        channel: &mut Channel<'_, W>,
    ) -> Result<()> {
        let state = std::mem::replace(&mut self.state, ClientState::Idle);
        match (state, packet) {
            (
                ClientState::AwaitEcdhe { secret, public },
                HandshakePacket::Ecdhe { key, config, .. },
            ) => {
                self.server_info = config;
                self.on_ecdh_response(secret, public, key, channel).await
            }
            (
                ClientState::AwaitEcdhef { secret, public },
                HandshakePacket::Ecdhef { key, .. },
            ) => self.on_ecdh_response(secret, public, key, channel).await,
            (
                ClientState::AwaitSrpInit {
                    identity,
                    password,
                    session_key,
                    ticket_count,
                },
                HandshakePacket::SrpInit {
                    n,
                    g,
                    s,
                    b,
                    session_id,
                    ..
                },
            ) => {
                self.on_srp_init_response(
                    identity,
                    password,
                    session_key,
                    ticket_count,
                    SrpInitFields {
                        n,
                        g,
                        s,
                        b,
                        session_id,
                    },
                    channel,
                )
                .await
            }
            (
                ClientState::AwaitSrpExchange {
                    key,
                    expected_m2,
                    a_wire,
                    b_wire,
                    session_id,
                },
                HandshakePacket::SrpExchange {
                    m2,
                    tickets,
                    ttl,
                    additional_login_step,
                    ..
                },
            ) => {
                self.on_srp_exchange_response(
                    key,
                    expected_m2,
                    a_wire,
                    b_wire,
                    session_id,
                    SrpExchangeFields {
                        m2,
                        tickets,
                        ttl,
                        additional_login_step,
                    },
                    channel,
                )
                .await
            }
            (
                ClientState::AwaitTicket {
                    master,
                    client_random,
                    plain,
                },
                HandshakePacket::Ticket { server_random, .. },
            ) => {
                self.on_ticket_response(master, client_random, plain, server_random, channel)
                    .await
            }
            // Ticket batches can arrive on an already-established
            // connection in response to request_tickets.
            (state, HandshakePacket::TicketResponse { tickets, ttl }) => {
                self.state = state;
                self.tickets
                    .extend(tickets.into_iter().map(ByteBuf::into_vec));
                self.ticket_ttl = Some(ttl);
                debug!(count = self.tickets.len(), "resumption tickets received");
                Ok(())
            }
            (_, packet) => Err(TransportError::MalformedPacket(format!(
                "unexpected handshake packet: {packet:?}"
            ))),
        }
    }
}
