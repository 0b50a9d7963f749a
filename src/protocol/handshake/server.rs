//! Server side of the handshake state machine.
//!
//! Every inbound packet type has exactly one arm in the dispatch; the match
//! is exhaustive so adding a packet variant without deciding its server
//! behavior does not compile. Each accepted login flow ends the same way:
//! derive the pending cipher states from its premaster secret, send the
//! response under the old write state, and immediately switch the write
//! direction (the server speaks first under the new keys).
//!
//! Collaborator failures that are not authentication verdicts are masked to
//! a generic internal error before they can reach the wire.

use crate::core::crypto::{ct_eq, random_bytes};
use crate::core::schedule::{derive_master_secret, derive_states, Role};
use crate::error::{constants, Result, TransportError};
use crate::protocol::ecdh;
use crate::protocol::frame::{Channel, FrameCodec};
use crate::protocol::handshake::{
    ecdhex_proof_message, key_proof_message, session_proof_message, HandshakeDriver,
};
use crate::protocol::packet::{require, HandshakePacket, TransportInfo};
use crate::protocol::srp::{self, SrpGroup};
use crate::service::login::{
    EcdheLogin, Identity, KeyLogin, ProofVerifier, SessionRecord, SessionStore, SessionValidator,
    SrpLogin, StaticKeystore,
};
use crate::service::tickets::{TicketData, TicketService};
use crate::utils::replay::NonceService;
use crate::config::{TransportConfig, TICKET_REQUEST_MAX};
use async_trait::async_trait;
use num_bigint::BigUint;
use serde_bytes::ByteBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::io::AsyncWrite;
use tracing::{debug, warn};
use zeroize::Zeroizing;

/// Everything a server handshake needs that outlives a single connection:
/// configuration, the login collaborators, and the shared services.
pub struct ServerContext {
    pub config: TransportConfig,
    pub ecdhe_login: Arc<dyn EcdheLogin>,
    pub proof_verifier: Arc<dyn ProofVerifier>,
    pub srp_login: Arc<dyn SrpLogin>,
    pub key_login: Arc<dyn KeyLogin>,
    pub sessions: Arc<dyn SessionStore>,
    pub session_validator: Arc<dyn SessionValidator>,
    pub keystore: Arc<dyn StaticKeystore>,
    pub tickets: TicketService,
    pub nonces: Arc<NonceService>,
}

impl ServerContext {
    fn transport_info(&self) -> TransportInfo {
        TransportInfo {
            version: self.config.version,
            ticket_ttl: self.tickets.ttl_seconds(),
        }
    }
}

/// SRP exchange state carried between `srp_init` and `srp_exchange`.
struct SrpPending {
    group: SrpGroup,
    b: BigUint,
    b_pub: BigUint,
    verifier: BigUint,
    identity: String,
    salt: Vec<u8>,
    session_id: String,
}

/// Key-possession state carried between `key_init` and `key_exchange`.
struct KeyPending {
    session_id: String,
    secret: Zeroizing<[u8; 32]>,
    public_key: Vec<u8>,
    encrypted: Vec<u8>,
}

/// Per-connection server handshake coordinator.
pub struct ServerHandshake {
    ctx: Arc<ServerContext>,
    identity: Option<Identity>,
    session_id: Option<String>,
    master_secret: Option<Zeroizing<Vec<u8>>>,
    resumed_agent: Option<String>,
    srp: Option<SrpPending>,
    key_auth: Option<KeyPending>,
}

impl ServerHandshake {
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        Self {
            ctx,
            identity: None,
            session_id: None,
            master_secret: None,
            resumed_agent: None,
            srp: None,
            key_auth: None,
        }
    }

    /// The authenticated identity, once a login flow has completed.
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    /// The session bound to this connection, once established or resumed.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Whether any handshake flow has produced a master secret.
    pub fn is_established(&self) -> bool {
        self.master_secret.is_some()
    }

    /// Derive and stage the pending cipher states from a premaster secret
    /// and the two exchanged randoms. Activation happens separately.
    fn install_keys(
        &mut self,
        codec: &mut FrameCodec,
        premaster: &[u8],
        client_random: &[u8],
        server_random: &[u8],
    ) {
        let master = derive_master_secret(premaster, client_random, server_random);
        let (read, write) = derive_states(&master, client_random, server_random, Role::Server);
        codec.set_pending(read, write);
        self.master_secret = Some(master);
    }

    fn agent(&self) -> Option<String> {
        self.identity
            .as_ref()
            .and_then(|identity| identity.agent.clone())
            .or_else(|| self.resumed_agent.clone())
    }

    async fn bind_and_create_session(
        &self,
        public_key: &[u8],
        agent: Option<&str>,
    ) -> Result<(Identity, String)> {
        let identity = self
            .ctx
            .ecdhe_login
            .bind(public_key, agent)
            .await
            .map_err(collaborator)?;
        let session_id = self
            .ctx
            .sessions
            .create(SessionRecord {
                id: String::new(),
                user: identity.user.clone(),
                agent: identity.agent.clone(),
                bound_public_key: Some(public_key.to_vec()),
                additional_login_step: None,
            })
            .await
            .map_err(collaborator)?;
        Ok((identity, session_id))
    }

    async fn on_ecdhe<W: AsyncWrite + Unpin + Send>(
        &mut self,
        key: ByteBuf,
        agent: Option<String>,
        channel: &mut Channel<'_, W>,
    ) -> Result<()> {
        let (secret, server_public) = ecdh::generate();
        let premaster = ecdh::agree(secret, &key)?;

        let (identity, session_id) = self.bind_and_create_session(&key, agent.as_deref()).await?;
        debug!(user = %identity.user, %session_id, "ecdhe login accepted");

        self.install_keys(channel.codec, &premaster[..], &key, &server_public);
        self.identity = Some(identity);
        self.session_id = Some(session_id);

        channel
            .send_handshake(&HandshakePacket::Ecdhe {
                key: ByteBuf::from(server_public.to_vec()),
                agent: None,
                config: Some(self.ctx.transport_info()),
            })
            .await?;
        channel.change_write_cipher_spec().await
    }

    #[allow(clippy::too_many_arguments)]
    async fn on_ecdhex<W: AsyncWrite + Unpin + Send>(
        &mut self,
        key: ByteBuf,
        nonce: ByteBuf,
        timestamp: u64,
        signature: ByteBuf,
        agent: Option<String>,
        plain: Option<bool>,
        channel: &mut Channel<'_, W>,
    ) -> Result<()> {
        self.ctx.nonces.verify(&key, &nonce, timestamp).await?;
        let message = ecdhex_proof_message(&key, &nonce, timestamp);
        self.ctx
            .proof_verifier
            .verify(&key, &message, &signature)
            .await
            .map_err(collaborator)?;

        let (secret, server_public) = ecdh::generate();
        let premaster = ecdh::agree(secret, &key)?;

        let (identity, session_id) = self.bind_and_create_session(&key, agent.as_deref()).await?;
        debug!(user = %identity.user, %session_id, "ecdhex login accepted");

        self.install_keys(channel.codec, &premaster[..], &key, &server_public);
        self.identity = Some(identity);
        self.session_id = Some(session_id);

        channel
            .send_handshake(&HandshakePacket::Ecdhe {
                key: ByteBuf::from(server_public.to_vec()),
                agent: None,
                config: Some(self.ctx.transport_info()),
            })
            .await?;

        // plain=true leaves the connection unencrypted; the pending states
        // stay staged in case the client changes its mind.
        if !plain.unwrap_or(false) {
            channel.change_write_cipher_spec().await?;
        }
        Ok(())
    }

    async fn on_session<W: AsyncWrite + Unpin + Send>(
        &mut self,
        session_id: Option<String>,
        session_key: Option<ByteBuf>,
        nonce: Option<ByteBuf>,
        timestamp: Option<u64>,
        signature: Option<ByteBuf>,
        channel: &mut Channel<'_, W>,
    ) -> Result<()> {
        let session_id = require(session_id, "session_id")?;
        let session_key = require(session_key, "session_key")?;
        let nonce = require(nonce, "nonce")?;
        let timestamp = require(timestamp, "timestamp")?;
        let signature = require(signature, "signature")?;

        let record = self
            .ctx
            .sessions
            .restore(&session_id)
            .await
            .map_err(collaborator)?
            .ok_or_else(unknown_session)?;
        let bound = record.bound_public_key.clone().ok_or_else(unknown_session)?;

        self.ctx
            .nonces
            .verify(session_id.as_bytes(), &nonce, timestamp)
            .await?;
        let message = session_proof_message(&session_id, &session_key, &nonce, timestamp);
        self.ctx
            .proof_verifier
            .verify(&bound, &message, &signature)
            .await
            .map_err(collaborator)?;

        let (secret, server_public) = ecdh::generate();
        let premaster = ecdh::agree(secret, &session_key)?;

        debug!(user = %record.user, %session_id, "session resumed");
        self.install_keys(channel.codec, &premaster[..], &session_key, &server_public);
        self.identity = Some(Identity {
            user: record.user,
            agent: record.agent,
        });
        self.session_id = Some(session_id);

        channel
            .send_handshake(&HandshakePacket::Session {
                session_id: None,
                session_key: None,
                nonce: None,
                timestamp: None,
                signature: None,
                key: Some(ByteBuf::from(server_public.to_vec())),
                additional_login_step: record.additional_login_step.map(ByteBuf::from),
            })
            .await?;
        channel.change_write_cipher_spec().await
    }

    async fn on_ticket_request<W: AsyncWrite + Unpin + Send>(
        &mut self,
        count: u32,
        channel: &mut Channel<'_, W>,
    ) -> Result<()> {
        if count > TICKET_REQUEST_MAX {
            return Err(TransportError::MalformedPacket(format!(
                "ticket count {count} out of range"
            )));
        }
        let session_id = self.session_id.clone().ok_or_else(not_authenticated)?;
        let master = self
            .master_secret
            .as_ref()
            .ok_or_else(not_authenticated)?
            .clone();

        let tickets = self
            .ctx
            .tickets
            .issue(
                count as usize,
                TicketData {
                    session_id,
                    agent: self.agent(),
                    master_secret: master,
                    created: SystemTime::now(),
                },
            )
            .await
            .map_err(collaborator)?;

        channel
            .send_handshake(&HandshakePacket::TicketResponse {
                tickets: tickets.into_iter().map(ByteBuf::from).collect(),
                ttl: self.ctx.tickets.ttl_seconds(),
            })
            .await
    }

    async fn on_ticket<W: AsyncWrite + Unpin + Send>(
        &mut self,
        ticket_id: Option<ByteBuf>,
        client_random: Option<ByteBuf>,
        plain: Option<bool>,
        channel: &mut Channel<'_, W>,
    ) -> Result<()> {
        let ticket_id = require(ticket_id, "ticket_id")?;
        let plain = plain.unwrap_or(false);
        // Shape-check before redeeming so a malformed packet cannot burn
        // the single-use ticket.
        let client_random = if plain {
            None
        } else {
            Some(require(client_random, "client_random")?)
        };

        let data = self.ctx.tickets.redeem(&ticket_id).await?;
        if !self.ctx.session_validator.validate(&data.session_id).await {
            debug!(session_id = %data.session_id, "ticket for invalidated session");
            return Err(TransportError::Authentication(
                constants::ERR_INVALID_TICKET.into(),
            ));
        }

        debug!(session_id = %data.session_id, plain, "ticket redeemed");
        self.session_id = Some(data.session_id.clone());
        self.resumed_agent = data.agent.clone();

        match client_random {
            Some(client_random) => {
                let server_random = random_bytes::<32>();
                // Restoration skips master secret derivation: the ticket
                // carries the master secret, only the key block is fresh.
                let (read, write) = derive_states(
                    &data.master_secret,
                    &client_random,
                    &server_random,
                    Role::Server,
                );
                channel.codec.set_pending(read, write);
                self.master_secret = Some(data.master_secret.clone());

                channel
                    .send_handshake(&HandshakePacket::Ticket {
                        ticket_id: None,
                        client_random: None,
                        plain: None,
                        server_random: Some(ByteBuf::from(server_random.to_vec())),
                    })
                    .await?;
                channel.change_write_cipher_spec().await
            }
            None => {
                self.master_secret = Some(data.master_secret.clone());
                channel
                    .send_handshake(&HandshakePacket::Ticket {
                        ticket_id: None,
                        client_random: None,
                        plain: Some(true),
                        server_random: None,
                    })
                    .await
            }
        }
    }

    async fn on_srp_init<W: AsyncWrite + Unpin + Send>(
        &mut self,
        i: Option<String>,
        host: Option<String>,
        channel: &mut Channel<'_, W>,
    ) -> Result<()> {
        let identity = require(i, "i")?;
        let host = require(host, "host")?;

        let user = self
            .ctx
            .srp_login
            .lookup(&identity, &host)
            .await
            .map_err(collaborator)?;

        let group = SrpGroup::default();
        let k = group.k();
        let verifier = BigUint::from_bytes_be(&user.verifier);
        let b = srp::private_value();
        let b_pub = srp::server_public(&group, &k, &verifier, &b);

        let session_id = self
            .ctx
            .sessions
            .create(SessionRecord {
                id: String::new(),
                user: identity.clone(),
                agent: None,
                bound_public_key: None,
                additional_login_step: None,
            })
            .await
            .map_err(collaborator)?;
        debug!(%identity, %session_id, "srp exchange opened");

        let response = HandshakePacket::SrpInit {
            i: None,
            host: None,
            n: Some(ByteBuf::from(group.n.to_bytes_be())),
            g: Some(ByteBuf::from(group.g.to_bytes_be())),
            k: Some(ByteBuf::from(k.to_bytes_be())),
            s: Some(ByteBuf::from(user.salt.clone())),
            b: Some(ByteBuf::from(b_pub.to_bytes_be())),
            session_id: Some(session_id.clone()),
        };
        self.srp = Some(SrpPending {
            group,
            b,
            b_pub,
            verifier,
            identity,
            salt: user.salt,
            session_id,
        });
        channel.send_handshake(&response).await
    }

    async fn on_srp_exchange<W: AsyncWrite + Unpin + Send>(
        &mut self,
        a: Option<ByteBuf>,
        m1: Option<ByteBuf>,
        session_key: Option<ByteBuf>,
        ticket_count: Option<u32>,
        channel: &mut Channel<'_, W>,
    ) -> Result<()> {
        let pending = self.srp.take().ok_or_else(|| {
            TransportError::MalformedPacket("srp_exchange before srp_init".into())
        })?;
        let a_bytes = require(a, "a")?;
        let m1 = require(m1, "m1")?;
        let session_key = require(session_key, "session_key")?;

        let a_pub = BigUint::from_bytes_be(&a_bytes);
        let u = srp::compute_u(&pending.group, &a_pub, &pending.b_pub)?;
        let secret = srp::server_secret(&pending.group, &a_pub, &pending.verifier, &u, &pending.b)?;
        let key = srp::session_key(&pending.group, &secret);

        let expected_m1 = srp::client_proof(
            &pending.group,
            &pending.identity,
            &pending.salt,
            &a_pub,
            &pending.b_pub,
            &key,
        );
        if !ct_eq(&m1, &expected_m1) {
            let _ = self.ctx.sessions.destroy(&pending.session_id).await;
            warn!(identity = %pending.identity, "srp password proof mismatch");
            return Err(TransportError::Authentication(
                constants::ERR_SRP_PROOF_MISMATCH.into(),
            ));
        }
        let m2 = srp::server_proof(&a_pub, &expected_m1, &key);

        // Bind the client's session key to the session row so the session
        // flow can re-authenticate a later resumption against it.
        self.ctx
            .sessions
            .create(SessionRecord {
                id: pending.session_id.clone(),
                user: pending.identity.clone(),
                agent: None,
                bound_public_key: Some(session_key.to_vec()),
                additional_login_step: None,
            })
            .await
            .map_err(collaborator)?;

        let step = self
            .ctx
            .srp_login
            .confirmed(&pending.identity, &pending.session_id)
            .await
            .map_err(collaborator)?;

        // The randoms are the exact wire encodings of A and B.
        let server_random = pending.b_pub.to_bytes_be();
        self.install_keys(channel.codec, &key, &a_bytes, &server_random);
        debug!(identity = %pending.identity, session_id = %pending.session_id, "srp login accepted");

        let mut tickets = Vec::new();
        let count = ticket_count.unwrap_or(0).min(TICKET_REQUEST_MAX) as usize;
        if count > 0 {
            if let Some(master) = self.master_secret.as_ref() {
                tickets = self
                    .ctx
                    .tickets
                    .issue(
                        count,
                        TicketData {
                            session_id: pending.session_id.clone(),
                            agent: None,
                            master_secret: master.clone(),
                            created: SystemTime::now(),
                        },
                    )
                    .await
                    .map_err(collaborator)?;
            }
        }

        self.identity = Some(Identity {
            user: pending.identity.clone(),
            agent: None,
        });
        self.session_id = Some(pending.session_id.clone());

        let issued = !tickets.is_empty();
        channel
            .send_handshake(&HandshakePacket::SrpExchange {
                a: None,
                m1: None,
                session_key: None,
                ticket_count: None,
                m2: Some(ByteBuf::from(m2.to_vec())),
                tickets: issued.then(|| tickets.into_iter().map(ByteBuf::from).collect()),
                ttl: issued.then(|| self.ctx.tickets.ttl_seconds()),
                additional_login_step: step.map(ByteBuf::from),
            })
            .await?;
        channel.change_write_cipher_spec().await
    }

    async fn on_ecdhef<W: AsyncWrite + Unpin + Send>(
        &mut self,
        key_id: Option<String>,
        key: ByteBuf,
        agent: Option<String>,
        channel: &mut Channel<'_, W>,
    ) -> Result<()> {
        let key_id = require(key_id, "key_id")?;
        let static_secret = self.ctx.keystore.lookup(&key_id).ok_or_else(|| {
            TransportError::Authentication(constants::ERR_UNKNOWN_KEY_ID.into())
        })?;

        let server_public = ecdh::static_public(&static_secret);
        let premaster = ecdh::agree_static(&static_secret, &key)?;

        let (identity, session_id) = self.bind_and_create_session(&key, agent.as_deref()).await?;
        debug!(user = %identity.user, %key_id, "ecdhef login accepted");

        self.install_keys(channel.codec, &premaster[..], &key, &server_public);
        self.identity = Some(identity);
        self.session_id = Some(session_id);

        channel
            .send_handshake(&HandshakePacket::Ecdhef {
                key_id: Some(key_id),
                key: ByteBuf::from(server_public.to_vec()),
                agent: None,
            })
            .await?;
        channel.change_write_cipher_spec().await
    }

    async fn on_key_init<W: AsyncWrite + Unpin + Send>(
        &mut self,
        key: Option<ByteBuf>,
        channel: &mut Channel<'_, W>,
    ) -> Result<()> {
        let client_key = require(key, "key")?;

        let secret = Zeroizing::new(random_bytes::<32>());
        let encrypted = self
            .ctx
            .key_login
            .encrypt_to(&client_key, &secret[..])
            .await
            .map_err(collaborator)?;

        let session_id = self
            .ctx
            .sessions
            .create(SessionRecord {
                id: String::new(),
                user: String::new(),
                agent: None,
                bound_public_key: Some(client_key.to_vec()),
                additional_login_step: None,
            })
            .await
            .map_err(collaborator)?;
        debug!(%session_id, "key possession challenge issued");

        channel
            .send_handshake(&HandshakePacket::KeyInit {
                key: None,
                encrypted_k: Some(ByteBuf::from(encrypted.clone())),
                session_id: Some(session_id.clone()),
            })
            .await?;
        self.key_auth = Some(KeyPending {
            session_id,
            secret,
            public_key: client_key.to_vec(),
            encrypted,
        });
        Ok(())
    }

    async fn on_key_exchange<W: AsyncWrite + Unpin + Send>(
        &mut self,
        session_id: Option<String>,
        nonce: Option<ByteBuf>,
        timestamp: Option<u64>,
        signature: Option<ByteBuf>,
        k: Option<ByteBuf>,
        channel: &mut Channel<'_, W>,
    ) -> Result<()> {
        let pending = self.key_auth.take().ok_or_else(|| {
            TransportError::MalformedPacket("key_exchange before key_init".into())
        })?;
        let session_id = require(session_id, "session_id")?;
        let nonce = require(nonce, "nonce")?;
        let timestamp = require(timestamp, "timestamp")?;
        let signature = require(signature, "signature")?;
        let k = require(k, "k")?;

        if session_id != pending.session_id {
            return Err(unknown_session());
        }
        self.ctx
            .nonces
            .verify(&pending.public_key, &nonce, timestamp)
            .await?;
        let message = key_proof_message(&session_id, &k, &nonce, timestamp);
        self.ctx
            .proof_verifier
            .verify(&pending.public_key, &message, &signature)
            .await
            .map_err(collaborator)?;

        if !ct_eq(&k, &pending.secret[..]) {
            let _ = self.ctx.sessions.destroy(&session_id).await;
            warn!(%session_id, "key possession proof carried a wrong secret");
            return Err(TransportError::Authentication(
                constants::ERR_KEY_MISMATCH.into(),
            ));
        }

        let step = self
            .ctx
            .key_login
            .confirmed(&pending.public_key, &session_id)
            .await
            .map_err(collaborator)?;
        debug!(%session_id, "key possession login accepted");

        // The randoms are the client's named key and the encrypted blob the
        // client had to decrypt; both already crossed the wire.
        self.install_keys(
            channel.codec,
            &pending.secret[..],
            &pending.public_key,
            &pending.encrypted,
        );
        self.session_id = Some(session_id);

        channel
            .send_handshake(&HandshakePacket::KeyExchange {
                session_id: None,
                nonce: None,
                timestamp: None,
                signature: None,
                k: None,
                additional_login_step: step.map(ByteBuf::from),
            })
            .await?;
        channel.change_write_cipher_spec().await
    }
}

#[async_trait]
impl HandshakeDriver for ServerHandshake {
    async fn on_packet<W: AsyncWrite + Unpin + Send>(
        &mut self,
        packet: HandshakePacket,
        channel: &mut Channel<'_, W>,
    ) -> Result<()> {
        match packet {
            HandshakePacket::Ecdhe {
                key,
                agent,
                config: _,
            } => self.on_ecdhe(key, agent, channel).await,
            HandshakePacket::Ecdhex {
                key,
                nonce,
                timestamp,
                signature,
                agent,
                plain,
            } => {
                self.on_ecdhex(key, nonce, timestamp, signature, agent, plain, channel)
                    .await
            }
            HandshakePacket::Session {
                session_id,
                session_key,
                nonce,
                timestamp,
                signature,
                key: _,
                additional_login_step: _,
            } => {
                self.on_session(session_id, session_key, nonce, timestamp, signature, channel)
                    .await
            }
            HandshakePacket::TicketRequest { count } => {
                self.on_ticket_request(count, channel).await
            }
            HandshakePacket::TicketResponse { .. } => Err(TransportError::MalformedPacket(
                "unexpected ticket_response from client".into(),
            )),
            HandshakePacket::Ticket {
                ticket_id,
                client_random,
                plain,
                server_random: _,
            } => self.on_ticket(ticket_id, client_random, plain, channel).await,
            HandshakePacket::SrpInit { i, host, .. } => self.on_srp_init(i, host, channel).await,
            HandshakePacket::SrpExchange {
                a,
                m1,
                session_key,
                ticket_count,
                ..
            } => {
                self.on_srp_exchange(a, m1, session_key, ticket_count, channel)
                    .await
            }
            HandshakePacket::Ecdhef { key_id, key, agent } => {
                self.on_ecdhef(key_id, key, agent, channel).await
            }
            HandshakePacket::KeyInit { key, .. } => self.on_key_init(key, channel).await,
            HandshakePacket::KeyExchange {
                session_id,
                nonce,
                timestamp,
                signature,
                k,
                additional_login_step: _,
            } => {
                self.on_key_exchange(session_id, nonce, timestamp, signature, k, channel)
                    .await
            }
        }
    }
}

/// Masks collaborator failures: authentication verdicts pass through, any
/// other failure becomes an opaque internal error.
fn collaborator(err: TransportError) -> TransportError {
    match err {
        TransportError::Authentication(_) => err,
        other => {
            warn!(error = %other, "collaborator failure during handshake");
            TransportError::Internal
        }
    }
}

fn unknown_session() -> TransportError {
    TransportError::Authentication(constants::ERR_UNKNOWN_SESSION.into())
}

fn not_authenticated() -> TransportError {
    TransportError::Authentication(constants::ERR_NOT_AUTHENTICATED.into())
}
