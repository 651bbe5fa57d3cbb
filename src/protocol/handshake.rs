//! Connection establishment: the CONNECT → READY state machine.
//!
//! Drives a fresh transport through CONNECT/ACCEPT (with REFUSE, REDIRECT,
//! RESEND, and TLS renegotiation), the network-service prelude implied by the
//! NSI flags, PROTOCOL and DATA_TYPES negotiation (or the cookie fast path
//! that skips both), and the two-phase authentication dialogue.

use crate::error::{Error, Result};
use crate::protocol::auth::{
    generate_verifier, timezone_statement, verify_server_response, AuthenticationMode,
    Credentials, SessionData,
};
use crate::protocol::buffer::ReadBuffer;
use crate::protocol::capabilities::Capabilities;
use crate::protocol::codec::{ReplyAssembler, ReplyEvent};
use crate::protocol::constants::*;
use crate::protocol::cookie::{self, ConnectionCookie};
use crate::protocol::messages::{
    AuthPhaseOneMessage, AuthPhaseTwoMessage, ClientInfo, ConnectMessage, DataTypesMessage,
    MarkerMessage, ProtocolMessage,
};
use crate::protocol::packet::{Packet, PacketStream, TlsUpgrader};
use crate::protocol::response::{parse_auth_parameters, parse_error_as_failure};
use bytes::Bytes;

/// States of the connection lifecycle.
///
/// The establishment path runs `Initialized` through `ReadyForRequest`; the
/// teardown path `ReadyToLogOff` through `Closed` is driven by the
/// dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Initialized,
    ConnectSent,
    RenegotiatingTls,
    ProtocolSent,
    DataTypesSent,
    WaitingToStartAuthentication,
    Authenticating,
    ReadyForRequest,
    ReadyToLogOff,
    LoggingOff,
    Closing,
    Closed,
}

impl ConnectionState {
    /// Whether new tasks may be accepted in this state.
    pub fn accepts_requests(self) -> bool {
        self == ConnectionState::ReadyForRequest
    }

    /// Whether the connection is on its way down or gone.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConnectionState::ReadyToLogOff
                | ConnectionState::LoggingOff
                | ConnectionState::Closing
                | ConnectionState::Closed
        )
    }
}

/// Inputs to the establishment phase.
pub struct HandshakeConfig<'a> {
    /// The parenthesised `(DESCRIPTION=...)` string.
    pub connect_descriptor: &'a str,
    /// Service name or SID, used as the cookie cache key.
    pub service: &'a str,
    /// Server name for TLS (SNI and renegotiation).
    pub server_name: &'a str,
    /// Whether the address used the TCPS protocol.
    pub use_tls: bool,
    pub tls_upgrader: Option<&'a dyn TlsUpgrader>,
    pub sdu: u32,
}

/// Outcome of the establishment phase.
pub enum Established {
    /// Handshake is done up to authentication.
    Ready {
        /// Whether a cached cookie skipped PROTOCOL and DATA_TYPES.
        used_cookie: bool,
    },
    /// The listener redirected us; reconnect to the carried address data.
    Redirect(String),
}

/// Fields of an ACCEPT packet the client consumes.
#[derive(Debug)]
struct AcceptInfo {
    protocol_version: u16,
    sdu: u32,
    flags2: u32,
    cookie_uuid: Option<[u8; 16]>,
}

fn parse_accept(payload: Bytes) -> Result<AcceptInfo> {
    let mut buf = ReadBuffer::new(payload);

    let protocol_version = buf.read_u16_be()?;
    if protocol_version < TNS_VERSION_MIN_ACCEPTED {
        return Err(Error::ServerVersionNotSupported {
            version: protocol_version,
            minimum: TNS_VERSION_MIN_ACCEPTED,
        });
    }

    let _protocol_options = buf.read_u16_be()?;
    buf.skip(10)?;

    let nsi_flags = buf.read_u8()?;
    if nsi_flags & TNS_NSI_NA_REQUIRED != 0 {
        return Err(Error::connection(
            "server requires native network encryption",
        ));
    }
    buf.skip(9)?;

    let sdu = buf.read_u32_be()?;

    let mut flags2 = 0u32;
    if protocol_version >= TNS_VERSION_MIN_OOB_CHECK {
        buf.skip(5)?;
        flags2 = buf.read_u32_be()?;
    }

    let mut cookie_uuid = None;
    if flags2 & TNS_ACCEPT_FLAG_FAST_AUTH != 0 && buf.has_remaining(16) {
        let uuid_bytes = buf.read_bytes(16)?;
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&uuid_bytes);
        cookie_uuid = Some(uuid);
    }

    Ok(AcceptInfo {
        protocol_version,
        sdu,
        flags2,
        cookie_uuid,
    })
}

fn parse_refuse(payload: Bytes, service: &str) -> Error {
    let message = String::from_utf8_lossy(&payload).to_string();
    if message.contains("ERR=12514") {
        return Error::InvalidServiceName {
            service_name: service.to_string(),
        };
    }
    if message.contains("ERR=12505") {
        return Error::InvalidSid {
            sid: service.to_string(),
        };
    }
    if message.contains("ERR=12504") {
        return Error::SidNotSupported;
    }
    Error::ConnectionRefused { message }
}

fn parse_redirect(payload: Bytes) -> Result<String> {
    let mut buf = ReadBuffer::new(payload);
    let length = buf.read_u16_be()? as usize;
    let data = buf.read_bytes(length.min(buf.remaining()))?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

/// Read one assembled logical reply, tolerating CONTROL packets and
/// recovering from a server BREAK (the error then surfaces as `Err`).
pub(crate) async fn read_reply(
    stream: &mut PacketStream,
    caps: &mut Capabilities,
) -> Result<Bytes> {
    let mut assembler = ReplyAssembler::new();
    loop {
        let packet = stream.read_packet().await?;
        match packet.packet_type {
            TNS_PACKET_TYPE_DATA => match assembler.push(&packet)? {
                ReplyEvent::Complete(reply) => return Ok(reply),
                ReplyEvent::Incomplete => {}
                ReplyEvent::ServerEof => return Err(Error::UncleanShutdown),
            },
            TNS_PACKET_TYPE_MARKER => {
                return Err(recover_from_marker(stream, caps).await);
            }
            TNS_PACKET_TYPE_CONTROL => handle_control_packet(&packet, caps),
            other => {
                return Err(Error::UnexpectedPacketType {
                    expected: TNS_PACKET_TYPE_DATA,
                    actual: other,
                });
            }
        }
    }
}

pub(crate) fn handle_control_packet(packet: &Packet, caps: &mut Capabilities) {
    match packet.control_type() {
        Some(TNS_CONTROL_TYPE_RESET_OOB) => {
            caps.supports_oob = false;
        }
        Some(TNS_CONTROL_TYPE_INBAND_NOTIFICATION) => {
            log::debug!("inband notification control packet");
        }
        _ => {}
    }
}

/// The server sent a BREAK. Answer with RESET, wait for its RESET, and read
/// the DATA reply carrying the actual error.
pub(crate) async fn recover_from_marker(
    stream: &mut PacketStream,
    caps: &mut Capabilities,
) -> Error {
    let reset = MarkerMessage::reset();
    if let Err(e) = stream.send_message(TNS_PACKET_TYPE_MARKER, &reset).await {
        return e;
    }

    let mut assembler = ReplyAssembler::new();
    // bounded scan: some servers send several markers before the error
    for _ in 0..16 {
        let packet = match stream.read_packet().await {
            Ok(p) => p,
            Err(e) => return e,
        };
        match packet.packet_type {
            TNS_PACKET_TYPE_MARKER => continue,
            TNS_PACKET_TYPE_DATA => match assembler.push(&packet) {
                Ok(ReplyEvent::Complete(reply)) => {
                    let mut buf = ReadBuffer::new(reply);
                    return match buf.read_u8() {
                        Ok(TNS_MSG_TYPE_ERROR) => {
                            parse_error_as_failure(&mut buf, caps.server_ttc_field_version)
                        }
                        Ok(other) => Error::UnexpectedBackendMessage {
                            message_type: other,
                            context: "recovering from break marker",
                        },
                        Err(e) => e,
                    };
                }
                Ok(ReplyEvent::Incomplete) => continue,
                Ok(ReplyEvent::ServerEof) => return Error::UncleanShutdown,
                Err(e) => return e,
            },
            TNS_PACKET_TYPE_CONTROL => handle_control_packet(&packet, caps),
            _ => break,
        }
    }
    Error::connection("break marker received but no error followed")
}

async fn send_connect_packet(
    stream: &mut PacketStream,
    connect_bytes: &[u8],
    sdu: u32,
) -> Result<()> {
    let msg = ConnectMessage {
        connect_string: connect_bytes,
        sdu,
    };
    let oversized = !msg.connect_data_in_packet();
    stream.send_message(TNS_PACKET_TYPE_CONNECT, &msg).await?;
    if oversized {
        stream.send_data(connect_bytes, 0).await?;
    }
    Ok(())
}

fn advance(state: &mut ConnectionState, next: ConnectionState) {
    log::trace!("connection state {:?} -> {:?}", state, next);
    *state = next;
}

/// Drive CONNECT → ACCEPT and the capability exchange.
pub async fn establish(
    stream: &mut PacketStream,
    config: &HandshakeConfig<'_>,
    caps: &mut Capabilities,
) -> Result<Established> {
    let mut state = ConnectionState::Initialized;
    let connect_bytes = config.connect_descriptor.as_bytes();

    send_connect_packet(stream, connect_bytes, config.sdu).await?;
    advance(&mut state, ConnectionState::ConnectSent);
    log::debug!("CONNECT sent ({} bytes of connect data)", connect_bytes.len());

    loop {
        debug_assert!(matches!(
            state,
            ConnectionState::ConnectSent | ConnectionState::RenegotiatingTls
        ));
        let packet = stream.read_packet().await?;
        match packet.packet_type {
            TNS_PACKET_TYPE_ACCEPT => {
                let accept = parse_accept(packet.payload.clone())?;

                if packet.packet_flags & TNS_PACKET_FLAG_TLS_RENEG != 0 && config.use_tls {
                    // remove the current TLS handler and install a fresh one
                    // with the same server name, then re-send CONNECT
                    let upgrader =
                        config
                            .tls_upgrader
                            .ok_or_else(|| Error::FailedToAddTlsHandler {
                                message: "server requested TLS renegotiation but no TLS \
                                          provider is configured"
                                    .to_string(),
                            })?;
                    advance(&mut state, ConnectionState::RenegotiatingTls);
                    log::debug!("TLS renegotiation requested by server");
                    stream.install_tls(upgrader, config.server_name).await?;
                    send_connect_packet(stream, connect_bytes, config.sdu).await?;
                    advance(&mut state, ConnectionState::ConnectSent);
                    continue;
                }

                stream.set_sdu(accept.sdu);
                caps.sdu = accept.sdu;
                stream.set_large_sdu(accept.protocol_version >= TNS_VERSION_MIN_LARGE_SDU);
                caps.adjust_for_protocol(accept.protocol_version, accept.flags2, false);
                log::debug!(
                    "ACCEPT: protocol version {}, sdu {}",
                    accept.protocol_version,
                    accept.sdu
                );

                if let Some(uuid) = accept.cookie_uuid {
                    if let Some(cached) = cookie::get(uuid, config.service) {
                        apply_cookie(&cached, caps)?;
                        advance(&mut state, ConnectionState::WaitingToStartAuthentication);
                        log::debug!("connection cookie hit; skipping capability exchange");
                        return Ok(Established::Ready { used_cookie: true });
                    }
                }

                let negotiated = negotiate_capabilities(stream, caps, &mut state).await?;
                if let Some(uuid) = accept.cookie_uuid {
                    cookie::store(
                        uuid,
                        config.service,
                        ConnectionCookie {
                            protocol_version: accept.protocol_version,
                            server_banner: negotiated.banner,
                            charset_id: negotiated.charset_id,
                            ncharset_id: negotiated.ncharset_id,
                            flags: 0,
                            compile_caps: negotiated.compile_caps,
                            runtime_caps: negotiated.runtime_caps,
                        },
                    );
                }
                advance(&mut state, ConnectionState::WaitingToStartAuthentication);
                return Ok(Established::Ready { used_cookie: false });
            }
            TNS_PACKET_TYPE_REFUSE => {
                return Err(parse_refuse(packet.payload, config.service));
            }
            TNS_PACKET_TYPE_REDIRECT => {
                return Ok(Established::Redirect(parse_redirect(packet.payload)?));
            }
            TNS_PACKET_TYPE_RESEND => {
                send_connect_packet(stream, connect_bytes, config.sdu).await?;
            }
            other => {
                return Err(Error::UnexpectedPacketType {
                    expected: TNS_PACKET_TYPE_ACCEPT,
                    actual: other,
                });
            }
        }
    }
}

struct NegotiatedCapabilities {
    banner: Bytes,
    charset_id: u16,
    ncharset_id: u16,
    compile_caps: Vec<u8>,
    runtime_caps: Vec<u8>,
}

fn apply_cookie(cookie: &ConnectionCookie, caps: &mut Capabilities) -> Result<()> {
    caps.check_ncharset_id(cookie.ncharset_id)?;
    caps.adjust_for_server_capabilities(&cookie.compile_caps, &cookie.runtime_caps);
    Ok(())
}

/// PROTOCOL and DATA_TYPES exchange.
async fn negotiate_capabilities(
    stream: &mut PacketStream,
    caps: &mut Capabilities,
    state: &mut ConnectionState,
) -> Result<NegotiatedCapabilities> {
    let protocol_msg = ProtocolMessage::default();
    stream.send_data_message(&protocol_msg).await?;
    *state = ConnectionState::ProtocolSent;

    let reply = read_reply(stream, caps).await?;
    let negotiated = parse_protocol_response(reply, caps)?;
    caps.check_ncharset_id(negotiated.ncharset_id)?;

    let data_types_msg = DataTypesMessage {
        compile_caps: &caps.compile_caps,
        runtime_caps: &caps.runtime_caps,
    };
    stream.send_data_message(&data_types_msg).await?;
    *state = ConnectionState::DataTypesSent;

    let reply = read_reply(stream, caps).await?;
    parse_data_types_response(reply)?;

    Ok(negotiated)
}

fn parse_protocol_response(
    reply: Bytes,
    caps: &mut Capabilities,
) -> Result<NegotiatedCapabilities> {
    let mut buf = ReadBuffer::new(reply);
    let message_type = buf.read_u8()?;
    if message_type == TNS_MSG_TYPE_ERROR {
        return Err(parse_error_as_failure(&mut buf, caps.server_ttc_field_version));
    }
    if message_type != TNS_MSG_TYPE_PROTOCOL {
        return Err(Error::UnexpectedBackendMessage {
            message_type,
            context: "awaiting protocol response",
        });
    }

    let _server_version = buf.read_u8()?;
    let _zero = buf.read_u8()?;

    let mut banner = Vec::new();
    loop {
        let b = buf.read_u8()?;
        if b == 0 {
            break;
        }
        banner.push(b);
    }

    let charset_id = buf.read_u16_le()?;
    let _server_flags = buf.read_u8()?;

    let num_elements = buf.read_u16_le()?;
    if num_elements > 0 {
        buf.skip((num_elements * 5) as usize)?;
    }

    let fdo_length = buf.read_u16_be()?;
    buf.skip(fdo_length as usize)?;

    let compile_caps = buf
        .read_bytes_with_length()?
        .map(|b| b.to_vec())
        .unwrap_or_default();
    let runtime_caps = buf
        .read_bytes_with_length()?
        .map(|b| b.to_vec())
        .unwrap_or_default();
    caps.adjust_for_server_capabilities(&compile_caps, &runtime_caps);

    // servers after the capability vectors also send the national charset
    let ncharset_id = if buf.has_remaining(2) {
        buf.read_u16_le()?
    } else {
        TNS_CHARSET_UTF16
    };
    caps.charset_id = charset_id;
    caps.ncharset_id = ncharset_id;

    Ok(NegotiatedCapabilities {
        banner: Bytes::from(banner),
        charset_id,
        ncharset_id,
        compile_caps,
        runtime_caps,
    })
}

fn parse_data_types_response(reply: Bytes) -> Result<()> {
    let mut buf = ReadBuffer::new(reply);
    let message_type = buf.read_u8()?;
    if message_type != TNS_MSG_TYPE_DATA_TYPES {
        return Err(Error::UnexpectedBackendMessage {
            message_type,
            context: "awaiting data types response",
        });
    }

    loop {
        let data_type = buf.read_u16_be()?;
        if data_type == 0 {
            break;
        }
        let conv_data_type = buf.read_u16_be()?;
        if conv_data_type != 0 {
            buf.skip(4)?;
        }
    }
    Ok(())
}

/// Client identity for the auth key-value pairs.
fn local_client_info() -> (String, String, String) {
    let pid = std::process::id().to_string();
    let machine = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    let osuser = whoami::username();
    (pid, machine, osuser)
}

/// Run the two-phase authentication dialogue.
pub async fn authenticate(
    stream: &mut PacketStream,
    caps: &mut Capabilities,
    credentials: &Credentials,
    mode: AuthenticationMode,
) -> Result<SessionData> {
    let (pid, machine, osuser) = local_client_info();
    let mut session = SessionData::default();

    if let Credentials::UsernamePassword { username, .. } = credentials {
        let phase_one = AuthPhaseOneMessage {
            username: username.as_str(),
            auth_mode: mode.phase_one_bits(),
            client: ClientInfo {
                terminal: "unknown",
                program: "oracle-wire-rs",
                machine: &machine,
                pid: &pid,
                osuser: &osuser,
            },
        };
        stream.send_data_message(&phase_one).await?;
        log::debug!("authentication phase one sent for user {}", username);

        let reply = read_reply(stream, caps).await?;
        absorb_auth_reply(reply, caps, &mut session)?;
    }

    let timezone = timezone_statement();
    let driver_banner = "oracle-wire-rs : 0.1.0";

    match credentials {
        Credentials::UsernamePassword { username, password } => {
            let verifier = generate_verifier(password, &mut session)?;
            let phase_two = AuthPhaseTwoMessage {
                username: username.as_str(),
                auth_mode: mode.phase_two_bits(credentials),
                session_key: Some(&verifier.session_key),
                speedy_key: verifier.speedy_key.as_deref(),
                encoded_password: Some(&verifier.encoded_password),
                token: None,
                timezone_stmt: &timezone,
                driver_name: driver_banner,
            };
            stream.send_data_message(&phase_two).await?;
        }
        Credentials::Token { token } => {
            let phase_two = AuthPhaseTwoMessage {
                username: "",
                auth_mode: mode.phase_two_bits(credentials),
                session_key: None,
                speedy_key: None,
                encoded_password: None,
                token: Some(token.as_str()),
                timezone_stmt: &timezone,
                driver_name: driver_banner,
            };
            stream.send_data_message(&phase_two).await?;
        }
    }
    log::debug!("authentication phase two sent");

    let reply = read_reply(stream, caps).await?;
    absorb_auth_reply(reply, caps, &mut session)?;
    verify_server_response(&session)?;

    Ok(session)
}

/// Merge one auth reply's messages into the session.
fn absorb_auth_reply(
    reply: Bytes,
    caps: &Capabilities,
    session: &mut SessionData,
) -> Result<()> {
    let mut buf = ReadBuffer::new(reply);
    while buf.remaining() > 0 {
        let message_type = buf.read_u8()?;
        match message_type {
            TNS_MSG_TYPE_PARAMETER => {
                let (params, verifier_type) = parse_auth_parameters(&mut buf)?;
                if verifier_type != 0 {
                    session.verifier_type = verifier_type;
                }
                session.params.extend(params);
            }
            TNS_MSG_TYPE_ERROR => {
                return Err(parse_error_as_failure(
                    &mut buf,
                    caps.server_ttc_field_version,
                ));
            }
            TNS_MSG_TYPE_STATUS => {
                let _call_status = buf.read_ub4()?;
                if buf.remaining() >= 2 {
                    let _seq = buf.read_ub2()?;
                }
            }
            TNS_MSG_TYPE_SERVER_SIDE_PIGGYBACK => {
                crate::protocol::response::parse_server_side_piggyback(&mut buf)?;
            }
            TNS_MSG_TYPE_END_OF_RESPONSE => break,
            other => {
                return Err(Error::UnexpectedBackendMessage {
                    message_type: other,
                    context: "processing authentication reply",
                });
            }
        }
    }
    Ok(())
}
