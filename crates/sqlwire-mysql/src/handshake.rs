//! Connection handshake: greeting, capability negotiation, TLS upgrade and
//! the authentication exchange.
//!
//! Three authentication paths exist, chosen from the greeting:
//!
//! - `CLIENT_PLUGIN_AUTH` servers, and `CLIENT_SECURE_CONNECTION` servers from
//!   4.1.1 on, run the plugin exchange loop
//! - 4.1.0 servers with `CLIENT_SECURE_CONNECTION` use the legacy
//!   secure-auth sequence
//! - everything older sends the pre-4.1 handshake response with a 323
//!   scramble

use std::sync::LazyLock;

use regex::Regex;

use sqlwire_core::Result;

use crate::auth::{AuthContext, AuthenticationPlugin, PluginRegistry, names, scramble};
use crate::config::MySqlConfig;
use crate::error::{auth_error, auth_rejected, greeting_rejected, protocol_error, protocol_error_with_data};
use crate::protocol::capabilities::{
    CLIENT_COMPRESS, CLIENT_CONNECT_ATTRS, CLIENT_CONNECT_WITH_DB, CLIENT_PLUGIN_AUTH,
    CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA, CLIENT_PROTOCOL_41, CLIENT_SECURE_CONNECTION,
    CLIENT_SSL,
};
use crate::protocol::{Command, ErrPacket, OkPacket, PacketChannel, PacketReader, PacketWriter};
use crate::tls;

/// Upper bound on challenge/response rounds in one exchange.
pub const MAX_AUTH_ROUNDS: usize = 100;

static VERSION_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(\d+)(?:\.(\d+))?(?:\.(\d+))?").ok());

/// Server version parsed from the greeting's version string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
    pub subminor: u32,
    raw: String,
}

impl ServerVersion {
    /// Parse the leading dotted numbers; anything after them is ignored and
    /// missing parts are zero.
    pub fn parse(raw: &str) -> Self {
        let mut parts = [0u32; 3];
        if let Some(caps) = VERSION_RE.as_ref().and_then(|re| re.captures(raw.trim())) {
            for (i, part) in parts.iter_mut().enumerate() {
                *part = caps
                    .get(i + 1)
                    .and_then(|m| m.as_str().parse().ok())
                    .unwrap_or(0);
            }
        }
        Self {
            major: parts[0],
            minor: parts[1],
            subminor: parts[2],
            raw: raw.to_string(),
        }
    }

    /// The version string as sent by the server.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn meets_minimum(&self, major: u32, minor: u32, subminor: u32) -> bool {
        (self.major, self.minor, self.subminor) >= (major, minor, subminor)
    }
}

impl std::fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.subminor)
    }
}

/// The server's initial handshake packet.
#[derive(Debug, Clone)]
pub struct Greeting {
    pub protocol_version: u8,
    pub server_version: ServerVersion,
    pub connection_id: u32,
    /// Full scramble (part 1 followed by part 2)
    pub seed: Vec<u8>,
    pub capabilities: u32,
    pub charset: u8,
    pub status_flags: u16,
    /// Default plugin named by `CLIENT_PLUGIN_AUTH` servers
    pub auth_plugin: Option<String>,
}

impl Greeting {
    /// Parse a greeting payload. A leading 0xFF is the server refusing the
    /// connection (too many connections, host blocked, ...).
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut reader = PacketReader::new(payload);
        let protocol_version = reader
            .read_u8()
            .ok_or_else(|| protocol_error("Empty server greeting"))?;
        if protocol_version == 0xFF {
            return Err(greeting_rejected(&ErrPacket::parse(payload)?));
        }

        let server_version =
            ServerVersion::parse(&String::from_utf8_lossy(reader.read_null_bytes()));
        let connection_id = reader
            .read_u32_le()
            .ok_or_else(|| protocol_error_with_data("Greeting is missing the connection id", payload))?;

        let mut seed = reader.read_null_bytes().to_vec();
        let mut capabilities = u32::from(reader.read_u16_le().unwrap_or(0));
        let mut charset = 0;
        let mut status_flags = 0;
        let mut auth_plugin = None;

        if protocol_version > 9 && reader.remaining() >= 16 {
            charset = reader.read_u8().unwrap_or(0);
            status_flags = reader.read_u16_le().unwrap_or(0);
            capabilities |= u32::from(reader.read_u16_le().unwrap_or(0)) << 16;
            let auth_data_len = usize::from(reader.read_u8().unwrap_or(0));
            reader.skip(10);

            if capabilities & CLIENT_SECURE_CONNECTION != 0 {
                let wanted = if capabilities & CLIENT_PLUGIN_AUTH != 0 {
                    auth_data_len.saturating_sub(8).max(13)
                } else {
                    13
                };
                let part2 = reader
                    .read_bytes(wanted.min(reader.remaining()))
                    .unwrap_or_default();
                let part2 = part2.strip_suffix(&[0]).unwrap_or(part2);
                seed.extend_from_slice(part2);
            }
            if capabilities & CLIENT_PLUGIN_AUTH != 0 {
                let name = reader.read_null_bytes();
                if !name.is_empty() {
                    auth_plugin = Some(String::from_utf8_lossy(name).into_owned());
                }
            }
        }

        Ok(Self {
            protocol_version,
            server_version,
            connection_id,
            seed,
            capabilities,
            charset,
            status_flags,
            auth_plugin,
        })
    }

    fn has(&self, flag: u32) -> bool {
        self.capabilities & flag != 0
    }
}

/// Who to authenticate as.
#[derive(Debug, Clone, Copy)]
pub struct Credentials<'a> {
    pub user: &'a str,
    pub password: &'a str,
    pub database: Option<&'a str>,
}

/// Result of a completed handshake.
#[derive(Debug, Clone)]
pub struct HandshakeOutcome {
    pub greeting: Greeting,
    /// Negotiated capabilities (client wanted AND server advertised)
    pub capabilities: u32,
    /// Final OK packet of the authentication exchange
    pub ok: OkPacket,
    /// Plugin that completed authentication (`None` on legacy paths)
    pub plugin: Option<String>,
    /// Whether the channel was upgraded to TLS
    pub secure: bool,
}

/// State of one authentication exchange: current plugin, last challenge,
/// what has been sent, and the round count.
pub struct AuthExchange {
    plugin: Box<dyn AuthenticationPlugin>,
    challenge: Vec<u8>,
    responses: Vec<Vec<u8>>,
    rounds: usize,
}

impl std::fmt::Debug for AuthExchange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthExchange")
            .field("plugin", &self.plugin.name())
            .field("challenge_len", &self.challenge.len())
            .field("responses", &self.responses.len())
            .field("rounds", &self.rounds)
            .finish()
    }
}

impl AuthExchange {
    pub fn new(plugin: Box<dyn AuthenticationPlugin>) -> Self {
        Self {
            plugin,
            challenge: Vec::new(),
            responses: Vec::new(),
            rounds: 0,
        }
    }

    pub fn plugin_name(&self) -> &str {
        self.plugin.name()
    }

    pub fn rounds(&self) -> usize {
        self.rounds
    }

    pub fn last_challenge(&self) -> &[u8] {
        &self.challenge
    }

    /// Every packet produced so far, across plugin switches.
    pub fn responses(&self) -> &[Vec<u8>] {
        &self.responses
    }

    /// Replace the plugin after an auth-switch request.
    pub fn switch_to(&mut self, plugin: Box<dyn AuthenticationPlugin>) {
        tracing::debug!(from = self.plugin.name(), to = plugin.name(), "authentication plugin switch");
        self.plugin = plugin;
    }

    /// Feed one challenge to the current plugin.
    pub fn step(&mut self, ctx: &AuthContext<'_>, challenge: &[u8]) -> Result<Vec<Vec<u8>>> {
        if self.rounds >= MAX_AUTH_ROUNDS {
            return Err(auth_error(format!(
                "Authentication did not complete within {} rounds",
                MAX_AUTH_ROUNDS
            )));
        }
        self.rounds += 1;
        self.challenge.clear();
        self.challenge.extend_from_slice(challenge);
        let packets = self.plugin.next_step(ctx, challenge)?;
        self.responses.extend(packets.iter().cloned());
        Ok(packets)
    }
}

/// Server packet received during authentication.
#[derive(Debug, PartialEq, Eq)]
enum AuthReply {
    Ok,
    Err,
    Switch { plugin: String, data: Vec<u8> },
    SwitchToOldPassword,
    MoreData(Vec<u8>),
    Challenge(Vec<u8>),
}

fn classify(payload: &[u8]) -> AuthReply {
    match payload.first() {
        Some(0x00) => AuthReply::Ok,
        Some(0xFF) => AuthReply::Err,
        Some(0xFE) if payload.len() == 1 => AuthReply::SwitchToOldPassword,
        Some(0xFE) => {
            let mut reader = PacketReader::new(&payload[1..]);
            let plugin = String::from_utf8_lossy(reader.read_null_bytes()).into_owned();
            let data = reader.read_rest();
            let data = data.strip_suffix(&[0]).unwrap_or(data);
            AuthReply::Switch {
                plugin,
                data: data.to_vec(),
            }
        }
        Some(0x01) => AuthReply::MoreData(payload[1..].to_vec()),
        _ => AuthReply::Challenge(payload.to_vec()),
    }
}

/// How the first response of an exchange is wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WireShape {
    HandshakeResponse,
    ChangeUser,
    AuthSwitchResponse,
    Raw,
}

fn ensure_confidentiality(plugin: &dyn AuthenticationPlugin, secure: bool) -> Result<()> {
    if plugin.requires_confidentiality() && !secure {
        return Err(auth_error(format!(
            "Authentication plugin '{}' requires a secure (TLS) connection",
            plugin.name()
        )));
    }
    Ok(())
}

fn select_initial(
    registry: &PluginRegistry,
    requested: Option<&str>,
    secure: bool,
) -> Result<Box<dyn AuthenticationPlugin>> {
    let plugin = match requested.and_then(|name| registry.create(name)) {
        Some(plugin) => plugin,
        None => {
            if let Some(name) = requested {
                tracing::warn!(
                    requested = name,
                    default = registry.default_plugin(),
                    "authentication plugin unavailable, using default"
                );
            }
            registry.create(registry.default_plugin()).ok_or_else(|| {
                auth_error(format!(
                    "Default authentication plugin '{}' is not available",
                    registry.default_plugin()
                ))
            })?
        }
    };
    ensure_confidentiality(plugin.as_ref(), secure)?;
    Ok(plugin)
}

fn select_switch(
    registry: &PluginRegistry,
    name: &str,
    secure: bool,
) -> Result<Box<dyn AuthenticationPlugin>> {
    let plugin = registry.create(name).ok_or_else(|| {
        auth_error(format!(
            "Server requested authentication plugin '{}', which is not available",
            name
        ))
    })?;
    ensure_confidentiality(plugin.as_ref(), secure)?;
    Ok(plugin)
}

/// Run the connect-time handshake on a fresh channel.
///
/// On success compression is enabled if it was negotiated. Database
/// selection, the transport's after-handshake hook and `SET NAMES` are left
/// to the session.
#[tracing::instrument(level = "debug", skip(channel, config))]
pub fn negotiate(channel: &mut PacketChannel, config: &MySqlConfig, host: &str) -> Result<HandshakeOutcome> {
    let packet = channel.read_packet()?;
    let greeting = Greeting::parse(packet.payload())?;
    channel.recycle(packet);
    tracing::debug!(
        protocol = greeting.protocol_version,
        server_version = greeting.server_version.as_str(),
        connection_id = greeting.connection_id,
        plugin = greeting.auth_plugin.as_deref(),
        "received server greeting"
    );

    let mut capabilities = config.capability_flags() & greeting.capabilities;
    let secure = tls::negotiate_ssl(config.ssl_mode, greeting.capabilities)?;
    if secure {
        channel.write_packet(&tls::build_ssl_request(
            capabilities,
            config.max_packet_size,
            config.charset,
        ))?;
        channel.upgrade_stream(|stream| {
            tls::upgrade(stream, &config.tls_config, host, config.ssl_mode)
        })?;
    } else {
        capabilities &= !CLIENT_SSL;
    }

    let password = config.password.as_deref().unwrap_or("");
    let database = if capabilities & CLIENT_CONNECT_WITH_DB != 0 {
        config.database.as_deref()
    } else {
        None
    };
    let mut negotiator = Negotiator {
        channel,
        config,
        greeting: &greeting,
        capabilities,
        creds: Credentials {
            user: &config.user,
            password,
            database,
        },
    };

    let (ok, plugin) = if greeting.has(CLIENT_PLUGIN_AUTH) {
        let (ok, name) = negotiator.run_exchange(greeting.auth_plugin.as_deref(), WireShape::HandshakeResponse)?;
        (ok, Some(name))
    } else if greeting.has(CLIENT_SECURE_CONNECTION) && greeting.server_version.meets_minimum(4, 1, 1) {
        let (ok, name) = negotiator.run_exchange(Some(names::MYSQL_NATIVE_PASSWORD), WireShape::HandshakeResponse)?;
        (ok, Some(name))
    } else if greeting.has(CLIENT_SECURE_CONNECTION) {
        (negotiator.legacy_secure_auth()?, None)
    } else {
        (negotiator.pre41_auth()?, None)
    };

    if capabilities & CLIENT_COMPRESS != 0 {
        channel.enable_compression();
    }

    tracing::debug!(
        connection_id = greeting.connection_id,
        server_version = greeting.server_version.as_str(),
        plugin = plugin.as_deref(),
        secure,
        "authentication complete"
    );

    Ok(HandshakeOutcome {
        greeting,
        capabilities,
        ok,
        plugin,
        secure,
    })
}

/// Re-authenticate an open session with COM_CHANGE_USER.
///
/// Starts with `plugin` (the one that last authenticated) and follows any
/// auth switch the server requests.
pub fn change_user(
    channel: &mut PacketChannel,
    config: &MySqlConfig,
    greeting: &Greeting,
    capabilities: u32,
    plugin: Option<&str>,
    creds: Credentials<'_>,
) -> Result<(OkPacket, Option<String>)> {
    channel.reset_sequence();
    let mut negotiator = Negotiator {
        channel,
        config,
        greeting,
        capabilities,
        creds,
    };
    if capabilities & CLIENT_SECURE_CONNECTION != 0 {
        let requested = plugin.unwrap_or(names::MYSQL_NATIVE_PASSWORD);
        let (ok, name) = negotiator.run_exchange(Some(requested), WireShape::ChangeUser)?;
        Ok((ok, Some(name)))
    } else {
        Ok((negotiator.pre41_change_user()?, None))
    }
}

struct Negotiator<'a, 'c> {
    channel: &'c mut PacketChannel,
    config: &'a MySqlConfig,
    greeting: &'a Greeting,
    capabilities: u32,
    creds: Credentials<'a>,
}

impl<'a> Negotiator<'a, '_> {
    fn has(&self, flag: u32) -> bool {
        self.capabilities & flag != 0
    }

    fn auth_context(&self, secure: bool) -> AuthContext<'a> {
        let config = self.config;
        AuthContext {
            user: self.creds.user,
            password: self.creds.password,
            secure,
            server_rsa_public_key: config.server_rsa_public_key.as_deref(),
            allow_public_key_retrieval: config.allow_public_key_retrieval,
        }
    }

    fn run_exchange(&mut self, requested: Option<&str>, entry: WireShape) -> Result<(OkPacket, String)> {
        let secure = self.channel.is_secure();
        let registry = &self.config.auth_plugins;
        let mut exchange = AuthExchange::new(select_initial(registry, requested, secure)?);
        let mut challenge = self.greeting.seed.clone();
        let mut shape = entry;
        tracing::debug!(plugin = exchange.plugin_name(), "starting authentication exchange");

        loop {
            let ctx = self.auth_context(secure);
            let packets = exchange.step(&ctx, &challenge)?;
            self.send_responses(shape, exchange.plugin_name(), &packets)?;

            let packet = self.channel.read_packet()?;
            let reply = classify(packet.payload());
            tracing::trace!(round = exchange.rounds(), reply = ?std::mem::discriminant(&reply), "authentication reply");
            match reply {
                AuthReply::Ok => {
                    let ok = OkPacket::parse(packet.payload(), self.capabilities)?;
                    self.channel.recycle(packet);
                    return Ok((ok, exchange.plugin_name().to_string()));
                }
                AuthReply::Err => {
                    return Err(auth_rejected(&ErrPacket::parse(packet.payload())?));
                }
                AuthReply::Switch { plugin, data } => {
                    exchange.switch_to(select_switch(registry, &plugin, secure)?);
                    challenge = data;
                    shape = WireShape::AuthSwitchResponse;
                }
                AuthReply::SwitchToOldPassword => {
                    exchange.switch_to(select_switch(registry, names::MYSQL_OLD_PASSWORD, secure)?);
                    let seed = &self.greeting.seed;
                    challenge = seed[..seed.len().min(8)].to_vec();
                    shape = WireShape::AuthSwitchResponse;
                }
                AuthReply::MoreData(data) | AuthReply::Challenge(data) => {
                    challenge = data;
                    shape = WireShape::Raw;
                }
            }
            self.channel.recycle(packet);
        }
    }

    fn send_responses(&mut self, shape: WireShape, plugin: &str, packets: &[Vec<u8>]) -> Result<()> {
        match shape {
            WireShape::HandshakeResponse | WireShape::ChangeUser => {
                let (first, rest) = match packets.split_first() {
                    Some((first, rest)) => (first.as_slice(), rest),
                    None => (&[][..], &[][..]),
                };
                let payload = if shape == WireShape::HandshakeResponse {
                    self.handshake_response(first, plugin)
                } else {
                    self.change_user_packet(first, plugin)
                };
                self.channel.write_packet(&payload)?;
                for packet in rest {
                    self.channel.write_packet(packet)?;
                }
            }
            WireShape::AuthSwitchResponse | WireShape::Raw => {
                for packet in packets {
                    self.channel.write_packet(packet)?;
                }
            }
        }
        Ok(())
    }

    /// HandshakeResponse41.
    #[allow(clippy::cast_possible_truncation)]
    fn handshake_response(&self, auth: &[u8], plugin: &str) -> Vec<u8> {
        let mut writer = PacketWriter::with_capacity(128);
        writer.write_u32_le(self.capabilities);
        writer.write_u32_le(self.config.max_packet_size);
        writer.write_u8(self.config.charset);
        writer.write_zeros(23);
        writer.write_null_string(self.creds.user);
        self.write_auth_data(&mut writer, auth);

        if self.has(CLIENT_CONNECT_WITH_DB) {
            writer.write_null_string(self.creds.database.unwrap_or(""));
        }
        if self.has(CLIENT_PLUGIN_AUTH) {
            writer.write_null_string(plugin);
        }
        if self.has(CLIENT_CONNECT_ATTRS) {
            self.write_attributes(&mut writer);
        }
        writer.into_bytes()
    }

    fn change_user_packet(&self, auth: &[u8], plugin: &str) -> Vec<u8> {
        let mut writer = PacketWriter::command(Command::ChangeUser);
        writer.write_null_string(self.creds.user);
        self.write_auth_data(&mut writer, auth);
        writer.write_null_string(self.creds.database.unwrap_or(""));
        if self.has(CLIENT_PROTOCOL_41) {
            writer.write_u16_le(u16::from(self.config.charset));
        }
        if self.has(CLIENT_PLUGIN_AUTH) {
            writer.write_null_string(plugin);
        }
        if self.has(CLIENT_CONNECT_ATTRS) {
            self.write_attributes(&mut writer);
        }
        writer.into_bytes()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn write_auth_data(&self, writer: &mut PacketWriter, auth: &[u8]) {
        if self.has(CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA) {
            writer.write_lenenc_bytes(auth);
        } else if self.has(CLIENT_SECURE_CONNECTION) {
            let len = auth.len().min(255);
            writer.write_u8(len as u8);
            writer.write_bytes(&auth[..len]);
        } else {
            writer.write_bytes(auth);
            writer.write_u8(0);
        }
    }

    fn write_attributes(&self, writer: &mut PacketWriter) {
        let mut attrs: Vec<_> = self.config.attributes.iter().collect();
        attrs.sort();
        let mut encoded = PacketWriter::new();
        for (key, value) in attrs {
            encoded.write_lenenc_string(key);
            encoded.write_lenenc_string(value);
        }
        writer.write_lenenc_bytes(encoded.as_bytes());
    }

    /// Capability/size prefix used by the legacy responses: 4.1 layout when
    /// the server speaks it, otherwise 2-byte flags and a 3-byte size.
    #[allow(clippy::cast_possible_truncation)]
    fn legacy_prefix(&self) -> PacketWriter {
        let mut writer = PacketWriter::with_capacity(64);
        if self.has(CLIENT_PROTOCOL_41) {
            writer.write_u32_le(self.capabilities);
            writer.write_u32_le(self.config.max_packet_size);
            writer.write_u8(self.config.charset);
            writer.write_zeros(23);
        } else {
            writer.write_u16_le((self.capabilities & 0xFFFF) as u16);
            writer.write_u24_le(self.config.max_packet_size.min(0xFF_FFFF));
        }
        writer.write_null_string(self.creds.user);
        writer
    }

    /// Pre-4.1 scramble: the "new" 323 hash from protocol 10 on, the "old"
    /// hash before.
    fn pre41_scramble(&self) -> Vec<u8> {
        let password = self.creds.password.as_bytes();
        let seed = &self.greeting.seed;
        let mut out = if self.greeting.protocol_version > 9 {
            scramble::scramble_323(password, &seed[..seed.len().min(8)])
        } else {
            scramble::old_scramble(password, seed)
        };
        out.push(0);
        out
    }

    /// HandshakeResponse320.
    fn pre41_auth(&mut self) -> Result<OkPacket> {
        let mut writer = self.legacy_prefix();
        writer.write_bytes(&self.pre41_scramble());
        if self.has(CLIENT_CONNECT_WITH_DB) {
            writer.write_null_string(self.creds.database.unwrap_or(""));
        }
        self.channel.write_packet(writer.as_bytes())?;
        self.read_final()
    }

    fn pre41_change_user(&mut self) -> Result<OkPacket> {
        let mut writer = PacketWriter::command(Command::ChangeUser);
        writer.write_null_string(self.creds.user);
        writer.write_bytes(&self.pre41_scramble());
        writer.write_null_string(self.creds.database.unwrap_or(""));
        self.channel.write_packet(writer.as_bytes())?;
        self.read_final()
    }

    /// 4.1.0 secure authentication.
    ///
    /// With a password, the client first sends a placeholder scramble and
    /// answers whatever the server replies with: a 24-byte salted hash gets
    /// the SHA1 unwrap, anything else the 323 scramble of the first 8 seed
    /// bytes. An empty password is sent as an empty string with no second
    /// stage.
    fn legacy_secure_auth(&mut self) -> Result<OkPacket> {
        let password = self.creds.password;
        let mut writer = self.legacy_prefix();
        if password.is_empty() {
            writer.write_u8(0);
        } else {
            writer.write_bytes(scramble::FALSE_SCRAMBLE);
            writer.write_u8(0);
        }
        if self.has(CLIENT_CONNECT_WITH_DB) {
            writer.write_null_string(self.creds.database.unwrap_or(""));
        }
        self.channel.write_packet(writer.as_bytes())?;

        if password.is_empty() {
            return self.read_final();
        }

        let packet = self.channel.read_packet()?;
        let reply = packet.payload();
        let answer = match reply.first() {
            Some(0xFF) => return Err(auth_rejected(&ErrPacket::parse(reply)?)),
            Some(&first) if reply.len() == scramble::LEGACY_SECURE_REPLY_LEN && first != 0 => {
                if first == b'*' {
                    let mut out = scramble::legacy_old_password_response(password, reply)?;
                    out.push(0);
                    out
                } else {
                    scramble::legacy_secure_response(password, reply)?
                }
            }
            Some(0x00) => {
                let ok = OkPacket::parse(reply, self.capabilities)?;
                self.channel.recycle(packet);
                return Ok(ok);
            }
            _ => {
                let seed = &self.greeting.seed;
                let mut out = scramble::scramble_323(password.as_bytes(), &seed[..seed.len().min(8)]);
                out.push(0);
                out
            }
        };
        self.channel.recycle(packet);
        self.channel.write_packet(&answer)?;
        self.read_final()
    }

    /// Read the OK or ERR that ends a fixed-sequence authentication.
    fn read_final(&mut self) -> Result<OkPacket> {
        let packet = self.channel.read_packet()?;
        let payload = packet.payload();
        let result = match payload.first() {
            Some(0x00) => OkPacket::parse(payload, self.capabilities),
            Some(0xFF) => Err(auth_rejected(&ErrPacket::parse(payload)?)),
            _ => Err(protocol_error_with_data(
                "Unexpected packet at the end of authentication",
                payload,
            )),
        };
        self.channel.recycle(packet);
        result
    }
}
