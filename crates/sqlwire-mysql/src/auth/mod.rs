//! Pluggable authentication.
//!
//! Each protocol-level auth method is an [`AuthenticationPlugin`]. The
//! handshake feeds it server challenges one at a time and sends back whatever
//! packets it produces. Plugins are created fresh for every handshake (and on
//! every auth switch) from factories held in a [`PluginRegistry`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use sqlwire_core::Result;

pub mod plugins;
pub mod scramble;

pub use plugins::{
    CachingSha2PasswordPlugin, ClearPasswordPlugin, NativePasswordPlugin, OldPasswordPlugin,
    Sha256PasswordPlugin,
};

/// Well-known authentication plugin names.
pub mod names {
    /// SHA1-based authentication (legacy default)
    pub const MYSQL_NATIVE_PASSWORD: &str = "mysql_native_password";
    /// SHA256-based authentication (MySQL 8.0+ default)
    pub const CACHING_SHA2_PASSWORD: &str = "caching_sha2_password";
    /// RSA-based SHA256 authentication
    pub const SHA256_PASSWORD: &str = "sha256_password";
    /// Cleartext password; only over a secure channel
    pub const MYSQL_CLEAR_PASSWORD: &str = "mysql_clear_password";
    /// Pre-4.1 scramble, selected by a bare auth-switch request
    pub const MYSQL_OLD_PASSWORD: &str = "mysql_old_password";
}

/// Per-step inputs handed to a plugin.
#[derive(Clone, Copy)]
pub struct AuthContext<'a> {
    pub user: &'a str,
    pub password: &'a str,
    /// Whether the channel is encrypted
    pub secure: bool,
    /// Server RSA public key (PEM) configured by the application
    pub server_rsa_public_key: Option<&'a [u8]>,
    /// Whether the plugin may ask the server for its public key
    pub allow_public_key_retrieval: bool,
}

impl fmt::Debug for AuthContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthContext")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("secure", &self.secure)
            .field("has_public_key", &self.server_rsa_public_key.is_some())
            .field("allow_public_key_retrieval", &self.allow_public_key_retrieval)
            .finish()
    }
}

/// One authentication method.
pub trait AuthenticationPlugin: Send {
    /// Protocol name, e.g. `mysql_native_password`.
    fn name(&self) -> &str;

    /// Whether the plugin may only run over an encrypted channel.
    fn requires_confidentiality(&self) -> bool {
        false
    }

    /// Consume one server challenge and return the packets to send back.
    ///
    /// An empty list means nothing is sent and the handshake waits for the
    /// server's next packet. A list holding one empty payload sends an empty
    /// packet.
    fn next_step(&mut self, ctx: &AuthContext<'_>, challenge: &[u8]) -> Result<Vec<Vec<u8>>>;
}

/// Factory producing a fresh plugin instance.
pub type PluginFactory = Arc<dyn Fn() -> Box<dyn AuthenticationPlugin> + Send + Sync>;

/// Name-keyed set of plugin factories.
#[derive(Clone)]
pub struct PluginRegistry {
    factories: BTreeMap<String, PluginFactory>,
    default_plugin: String,
    disabled: BTreeSet<String>,
}

impl PluginRegistry {
    /// A registry with no plugins and the given default name.
    pub fn empty(default_plugin: impl Into<String>) -> Self {
        Self {
            factories: BTreeMap::new(),
            default_plugin: default_plugin.into(),
            disabled: BTreeSet::new(),
        }
    }

    /// The five built-in plugins, defaulting to mysql_native_password.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty(names::MYSQL_NATIVE_PASSWORD);
        registry.register(names::MYSQL_NATIVE_PASSWORD, || {
            Box::new(NativePasswordPlugin::default())
        });
        registry.register(names::CACHING_SHA2_PASSWORD, || {
            Box::new(CachingSha2PasswordPlugin::default())
        });
        registry.register(names::SHA256_PASSWORD, || {
            Box::new(Sha256PasswordPlugin::default())
        });
        registry.register(names::MYSQL_CLEAR_PASSWORD, || {
            Box::new(ClearPasswordPlugin)
        });
        registry.register(names::MYSQL_OLD_PASSWORD, || Box::new(OldPasswordPlugin));
        registry
    }

    /// Register (or replace) the factory for `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn AuthenticationPlugin> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    pub fn set_default(&mut self, name: impl Into<String>) -> &mut Self {
        self.default_plugin = name.into();
        self
    }

    pub fn default_plugin(&self) -> &str {
        &self.default_plugin
    }

    /// Refuse to use `name` even if the server asks for it.
    pub fn disable(&mut self, name: impl Into<String>) -> &mut Self {
        self.disabled.insert(name.into());
        self
    }

    /// Registered and not disabled.
    pub fn is_available(&self, name: &str) -> bool {
        self.factories.contains_key(name) && !self.disabled.contains(name)
    }

    /// Instantiate `name` if it is available.
    pub fn create(&self, name: &str) -> Option<Box<dyn AuthenticationPlugin>> {
        if !self.is_available(name) {
            return None;
        }
        self.factories.get(name).map(|factory| factory())
    }

    /// Available plugin names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories
            .keys()
            .filter(|name| !self.disabled.contains(name.as_str()))
            .map(String::as_str)
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.factories.keys().collect::<Vec<_>>())
            .field("default_plugin", &self.default_plugin)
            .field("disabled", &self.disabled)
            .finish()
    }
}
