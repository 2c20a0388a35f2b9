//! Alias-scoped client certificate selection.
//!
//! [`choose_alias`] is the whole policy: it returns the configured alias if
//! it is among the aliases usable for the current handshake, and nothing
//! otherwise.  [`AliasCertResolver`] plugs that policy into rustls.
//!
//! When the configured alias is unavailable the handshake continues without
//! a client certificate instead of failing.  A misconfigured alias is
//! therefore caught by the server's client-certificate requirement, not by
//! the client.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use rustls::SignatureScheme;
use rustls::client::ResolvesClientCert;
use rustls::crypto::CryptoProvider;
use rustls::sign::CertifiedKey;
use tracing::{debug, warn};

use crate::mtls::store::ClientKeystore;

/// Picks the alias to present given the aliases usable for a handshake.
pub type AliasStrategy =
    Arc<dyn for<'a> Fn(&BTreeSet<&str>, &'a str) -> Option<&'a str> + Send + Sync>;

/// Return `configured` if it is one of `available`, else `None`.
///
/// An empty `available` set always yields `None`.
pub fn choose_alias<'a>(available: &BTreeSet<&str>, configured: &'a str) -> Option<&'a str> {
    if available.is_empty() || !available.contains(configured) {
        return None;
    }
    Some(configured)
}

/// rustls client certificate resolver bound to one alias.
pub struct AliasCertResolver {
    alias: String,
    identities: BTreeMap<String, Arc<CertifiedKey>>,
    strategy: AliasStrategy,
}

impl AliasCertResolver {
    /// Build a resolver for `alias` over every identity in `keystore`.
    ///
    /// Keys the provider cannot load are skipped, except the key for `alias`
    /// itself.
    ///
    /// # Errors
    ///
    /// Returns the rustls error if the configured alias's key is unusable.
    pub fn new(
        alias: &str,
        keystore: &ClientKeystore,
        provider: &CryptoProvider,
    ) -> Result<Self, rustls::Error> {
        let mut identities = BTreeMap::new();
        for (entry_alias, entry) in keystore.entries() {
            match provider.key_provider.load_private_key(entry.private_key()) {
                Ok(signing_key) => {
                    let certified = CertifiedKey::new(entry.chain().to_vec(), signing_key);
                    identities.insert(entry_alias.to_owned(), Arc::new(certified));
                }
                Err(e) if entry_alias == alias => return Err(e),
                Err(e) => {
                    warn!(alias = %entry_alias, error = %e, "Unusable keystore entry skipped");
                }
            }
        }

        if !identities.contains_key(alias) {
            warn!(
                alias = %alias,
                keystore = %keystore.path().display(),
                "Client alias not found in keystore; no client certificate will be presented"
            );
        }

        Ok(Self {
            alias: alias.to_owned(),
            identities,
            strategy: Arc::new(choose_alias),
        })
    }

    /// Replace the selection strategy.
    ///
    /// Whatever the strategy returns, only the configured alias is ever
    /// presented.
    #[must_use]
    pub fn with_strategy(mut self, strategy: AliasStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// The configured alias.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Aliases whose key can sign with one of `sigschemes`.
    fn usable_aliases(&self, sigschemes: &[SignatureScheme]) -> BTreeSet<&str> {
        self.identities
            .iter()
            .filter(|(_, key)| key.key.choose_scheme(sigschemes).is_some())
            .map(|(alias, _)| alias.as_str())
            .collect()
    }

    fn select(&self, sigschemes: &[SignatureScheme]) -> Option<Arc<CertifiedKey>> {
        let available = self.usable_aliases(sigschemes);
        let chosen = (self.strategy)(&available, &self.alias);

        match chosen {
            Some(chosen) if chosen == self.alias => {
                debug!(alias = %self.alias, "Presenting client certificate");
                self.identities.get(chosen).cloned()
            }
            Some(other) => {
                warn!(
                    alias = %self.alias,
                    chosen = %other,
                    "Strategy chose a different alias; presenting no client certificate"
                );
                None
            }
            None => {
                warn!(
                    alias = %self.alias,
                    available = ?available,
                    "Configured alias unavailable for this handshake; \
                     presenting no client certificate"
                );
                None
            }
        }
    }
}

impl fmt::Debug for AliasCertResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AliasCertResolver")
            .field("alias", &self.alias)
            .field("identities", &self.identities.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ResolvesClientCert for AliasCertResolver {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        self.select(sigschemes)
    }

    fn has_certs(&self) -> bool {
        !self.identities.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
