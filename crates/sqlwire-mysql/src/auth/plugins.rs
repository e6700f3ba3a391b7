//! Built-in authentication plugins.

use sqlwire_core::Result;

use super::scramble;
use super::{AuthContext, AuthenticationPlugin, names};
use crate::error::auth_error;

/// Status bytes the server sends during caching_sha2_password.
pub mod caching_sha2 {
    /// Client asks for the server's RSA public key
    pub const REQUEST_PUBLIC_KEY: u8 = 0x02;
    /// The password hash was cached; an OK packet follows
    pub const FAST_AUTH_SUCCESS: u8 = 0x03;
    /// The server needs the full password
    pub const PERFORM_FULL_AUTH: u8 = 0x04;
}

/// Byte sha256_password sends to request the server's public key.
pub const SHA256_REQUEST_PUBLIC_KEY: u8 = 0x01;

/// `mysql_native_password`: one SHA1 scramble of the seed.
#[derive(Debug, Default)]
pub struct NativePasswordPlugin;

impl AuthenticationPlugin for NativePasswordPlugin {
    fn name(&self) -> &str {
        names::MYSQL_NATIVE_PASSWORD
    }

    fn next_step(&mut self, ctx: &AuthContext<'_>, challenge: &[u8]) -> Result<Vec<Vec<u8>>> {
        Ok(vec![scramble::native_password(ctx.password, challenge)])
    }
}

/// `mysql_clear_password`: the password in cleartext.
#[derive(Debug, Default)]
pub struct ClearPasswordPlugin;

impl AuthenticationPlugin for ClearPasswordPlugin {
    fn name(&self) -> &str {
        names::MYSQL_CLEAR_PASSWORD
    }

    fn requires_confidentiality(&self) -> bool {
        true
    }

    fn next_step(&mut self, ctx: &AuthContext<'_>, _challenge: &[u8]) -> Result<Vec<Vec<u8>>> {
        Ok(vec![scramble::null_terminated(ctx.password)])
    }
}

/// `mysql_old_password`: the 323 scramble of the first 8 seed bytes.
#[derive(Debug, Default)]
pub struct OldPasswordPlugin;

impl AuthenticationPlugin for OldPasswordPlugin {
    fn name(&self) -> &str {
        names::MYSQL_OLD_PASSWORD
    }

    fn next_step(&mut self, ctx: &AuthContext<'_>, challenge: &[u8]) -> Result<Vec<Vec<u8>>> {
        let seed = &challenge[..challenge.len().min(8)];
        let mut response = scramble::scramble_323(ctx.password.as_bytes(), seed);
        response.push(0);
        Ok(vec![response])
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum Sha2Stage {
    #[default]
    Initial,
    FastAuthSent,
    AwaitingPublicKey,
    Done,
}

/// `caching_sha2_password`.
///
/// Sends the fast-auth scramble first. If the server has no cached hash it
/// asks for full authentication: the cleartext password over TLS, otherwise
/// the RSA-encrypted password using a configured or retrieved key.
#[derive(Debug, Default)]
pub struct CachingSha2PasswordPlugin {
    stage: Sha2Stage,
    seed: Vec<u8>,
}

impl CachingSha2PasswordPlugin {
    fn full_auth(&mut self, ctx: &AuthContext<'_>) -> Result<Vec<Vec<u8>>> {
        if ctx.secure {
            self.stage = Sha2Stage::Done;
            return Ok(vec![scramble::null_terminated(ctx.password)]);
        }
        if let Some(key) = ctx.server_rsa_public_key {
            self.stage = Sha2Stage::Done;
            return Ok(vec![scramble::rsa_encrypt_password(
                ctx.password,
                &self.seed,
                key,
            )?]);
        }
        if ctx.allow_public_key_retrieval {
            tracing::debug!("requesting server RSA public key for caching_sha2_password");
            self.stage = Sha2Stage::AwaitingPublicKey;
            return Ok(vec![vec![caching_sha2::REQUEST_PUBLIC_KEY]]);
        }
        Err(auth_error(
            "caching_sha2_password full authentication needs TLS, a configured server RSA public key, or public key retrieval",
        ))
    }
}

impl AuthenticationPlugin for CachingSha2PasswordPlugin {
    fn name(&self) -> &str {
        names::CACHING_SHA2_PASSWORD
    }

    fn next_step(&mut self, ctx: &AuthContext<'_>, challenge: &[u8]) -> Result<Vec<Vec<u8>>> {
        match self.stage {
            Sha2Stage::Initial => {
                self.seed = scramble::strip_seed_terminator(challenge).to_vec();
                self.stage = if ctx.password.is_empty() {
                    Sha2Stage::Done
                } else {
                    Sha2Stage::FastAuthSent
                };
                Ok(vec![scramble::caching_sha2_password(ctx.password, &self.seed)])
            }
            Sha2Stage::FastAuthSent => match challenge.first() {
                Some(&caching_sha2::FAST_AUTH_SUCCESS) => {
                    self.stage = Sha2Stage::Done;
                    Ok(Vec::new())
                }
                Some(&caching_sha2::PERFORM_FULL_AUTH) => self.full_auth(ctx),
                other => Err(auth_error(format!(
                    "Unexpected caching_sha2_password status byte: {other:?}"
                ))),
            },
            Sha2Stage::AwaitingPublicKey => {
                self.stage = Sha2Stage::Done;
                Ok(vec![scramble::rsa_encrypt_password(
                    ctx.password,
                    &self.seed,
                    challenge,
                )?])
            }
            Sha2Stage::Done => Ok(Vec::new()),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
enum Sha256Stage {
    #[default]
    Initial,
    AwaitingPublicKey,
    Done,
}

/// `sha256_password`.
#[derive(Debug, Default)]
pub struct Sha256PasswordPlugin {
    stage: Sha256Stage,
    seed: Vec<u8>,
}

impl AuthenticationPlugin for Sha256PasswordPlugin {
    fn name(&self) -> &str {
        names::SHA256_PASSWORD
    }

    fn next_step(&mut self, ctx: &AuthContext<'_>, challenge: &[u8]) -> Result<Vec<Vec<u8>>> {
        match self.stage {
            Sha256Stage::Initial => {
                self.seed = scramble::strip_seed_terminator(challenge).to_vec();
                if ctx.password.is_empty() {
                    self.stage = Sha256Stage::Done;
                    return Ok(vec![vec![0]]);
                }
                if ctx.secure {
                    self.stage = Sha256Stage::Done;
                    return Ok(vec![scramble::null_terminated(ctx.password)]);
                }
                if let Some(key) = ctx.server_rsa_public_key {
                    self.stage = Sha256Stage::Done;
                    return Ok(vec![scramble::rsa_encrypt_password(
                        ctx.password,
                        &self.seed,
                        key,
                    )?]);
                }
                if ctx.allow_public_key_retrieval {
                    self.stage = Sha256Stage::AwaitingPublicKey;
                    return Ok(vec![vec![SHA256_REQUEST_PUBLIC_KEY]]);
                }
                Err(auth_error(
                    "sha256_password needs TLS, a configured server RSA public key, or public key retrieval",
                ))
            }
            Sha256Stage::AwaitingPublicKey => {
                self.stage = Sha256Stage::Done;
                Ok(vec![scramble::rsa_encrypt_password(
                    ctx.password,
                    &self.seed,
                    challenge,
                )?])
            }
            Sha256Stage::Done => Ok(Vec::new()),
        }
    }
}
