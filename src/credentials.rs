//! Round-robin credential rotation.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::ProviderError;

/// Opaque provider secret. Never printed.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Credential(String);

impl Credential {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Ordered, non-empty credential set handed out in round-robin order.
///
/// Each logical fetch claims one start position with a single atomic
/// increment and then walks the whole set from there on its own. Concurrent
/// fetches start at different credentials but never disturb each other's
/// walk. Success or failure of a credential is not tracked here.
#[derive(Debug)]
pub struct CredentialRotator {
    credentials: Vec<Credential>,
    position: AtomicUsize,
}

impl CredentialRotator {
    pub fn new(credentials: Vec<Credential>) -> Result<Self, ProviderError> {
        if credentials.is_empty() {
            return Err(ProviderError::Configuration);
        }
        Ok(Self {
            credentials,
            position: AtomicUsize::new(0),
        })
    }

    /// Build from raw strings, dropping blanks and duplicates (first wins).
    pub fn from_values<I, S>(values: I) -> Result<Self, ProviderError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut credentials: Vec<Credential> = Vec::new();
        for value in values {
            let value = value.as_ref().trim();
            if value.is_empty() || credentials.iter().any(|c| c.expose() == value) {
                continue;
            }
            credentials.push(Credential::new(value));
        }
        Self::new(credentials)
    }

    /// Every credential exactly once, starting at the next round-robin slot.
    pub fn cycle(&self) -> impl Iterator<Item = &Credential> + '_ {
        let len = self.credentials.len();
        let start = self.position.fetch_add(1, Ordering::Relaxed) % len;
        (0..len).map(move |offset| &self.credentials[(start + offset) % len])
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}
