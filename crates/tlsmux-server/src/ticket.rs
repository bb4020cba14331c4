//! Session ticket key rotation
//!
//! rustls has no `SetSessionTicketKeys`; instead the shared server
//! configuration holds one [`RotatingTicketer`] for the lifetime of the
//! process, and rotation mutates the key vector behind its lock. A
//! handshake in flight sees either the old or the new vector; both are
//! valid because aged keys stay usable for decryption until they fall off
//! the end.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::TryRngCore;
use rustls::server::ProducesTickets;
use thiserror::Error;
use tracing::{debug, error};

/// Bytes in one master ticket key.
pub const TICKET_KEY_LEN: usize = 32;

/// Upper bound on retained keys. With hourly rotation the oldest key stays
/// decryptable for ~96 hours.
pub const MAX_TICKET_KEYS: usize = 96;

/// Interval between rotations.
pub const ROTATION_PERIOD: Duration = Duration::from_secs(60 * 60);

const NONCE_LEN: usize = 12;

/// Lifetime advertised in TLS 1.3 ticket messages, seconds. Well inside
/// the decryption window of the key vector.
const TICKET_LIFETIME: u32 = 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum TicketError {
    #[error("system random generator failed: {0}")]
    Rng(String),
}

struct TicketKey {
    cipher: Aes256Gcm,
}

impl TicketKey {
    fn generate() -> Result<Self, TicketError> {
        let mut key = [0u8; TICKET_KEY_LEN];
        OsRng
            .try_fill_bytes(&mut key)
            .map_err(|e| TicketError::Rng(e.to_string()))?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        Ok(Self { cipher })
    }
}

/// Ordered session ticket key vector with AES-256-GCM ticket protection.
///
/// Index 0 encrypts new tickets; indices 1.. are decryption-only. Each
/// [`RotatingTicketer::rotate`] shifts every key one slot toward higher
/// indices, installs a fresh key at index 0, and drops keys past
/// [`MAX_TICKET_KEYS`].
pub struct RotatingTicketer {
    keys: RwLock<Vec<TicketKey>>,
}

impl RotatingTicketer {
    /// Start with a single freshly generated key, so tickets are usable
    /// before the first rotation tick.
    pub fn new() -> Result<Self, TicketError> {
        Ok(Self {
            keys: RwLock::new(vec![TicketKey::generate()?]),
        })
    }

    /// Age every key one slot and install a fresh key at index 0.
    pub fn rotate(&self) -> Result<(), TicketError> {
        // Generate before taking the write lock; RNG may block.
        let fresh = TicketKey::generate()?;
        let mut keys = self.keys.write().unwrap_or_else(PoisonError::into_inner);
        keys.insert(0, fresh);
        keys.truncate(MAX_TICKET_KEYS);
        Ok(())
    }

    pub fn key_count(&self) -> usize {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl ProducesTickets for RotatingTicketer {
    fn enabled(&self) -> bool {
        true
    }

    fn lifetime(&self) -> u32 {
        TICKET_LIFETIME
    }

    fn encrypt(&self, plain: &[u8]) -> Option<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.try_fill_bytes(&mut nonce).ok()?;

        let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
        let newest = keys.first()?;
        let sealed = newest
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plain)
            .ok()?;

        let mut ticket = Vec::with_capacity(NONCE_LEN + sealed.len());
        ticket.extend_from_slice(&nonce);
        ticket.extend_from_slice(&sealed);
        Some(ticket)
    }

    fn decrypt(&self, cipher: &[u8]) -> Option<Vec<u8>> {
        if cipher.len() < NONCE_LEN {
            return None;
        }
        let (nonce, sealed) = cipher.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce);

        // Newest key first; older keys accept tickets issued before
        // rotation.
        let keys = self.keys.read().unwrap_or_else(PoisonError::into_inner);
        keys.iter().find_map(|k| k.cipher.decrypt(nonce, sealed).ok())
    }
}

impl fmt::Debug for RotatingTicketer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RotatingTicketer")
            .field("keys", &self.key_count())
            .finish()
    }
}

/// Run the hourly rotation loop. A random-generation failure aborts the
/// process: rotating onto a stale key would silently weaken forward
/// secrecy.
pub fn spawn_rotation(ticketer: Arc<RotatingTicketer>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(ROTATION_PERIOD).await;
            match ticketer.rotate() {
                Ok(()) => debug!(
                    "rotated session ticket keys ({} retained)",
                    ticketer.key_count()
                ),
                Err(e) => {
                    error!("session ticket key rotation failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
    })
}
