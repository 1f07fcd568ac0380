//! Registry of transcoding providers with capability-based selection.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::error_handling::types::ProviderError;
use crate::media::types::TranscodeRequest;
use crate::provider_registry::provider::TranscodeProvider;
use crate::provider_registry::types::ProviderDescriptor;

struct Entry {
    provider: Arc<dyn TranscodeProvider>,
    in_flight: u32,
    quarantined_until: Option<Instant>,
}

/// Owns the set of registered providers.
///
/// Registration and deregistration take the write lock; selection and
/// lookups work on a read-side snapshot.
pub struct ProviderRegistry {
    entries: RwLock<HashMap<String, Entry>>,
    quarantine: Duration,
}

impl ProviderRegistry {
    pub fn new(quarantine: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            quarantine,
        }
    }

    /// Registers a provider. Idempotent by provider id: re-registering
    /// replaces the implementation but keeps in-flight bookkeeping.
    pub fn register(&self, provider: Arc<dyn TranscodeProvider>) {
        let id = provider.info().id;
        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        match entries.get_mut(&id) {
            Some(entry) => {
                debug!("Provider {} re-registered", id);
                entry.provider = provider;
            }
            None => {
                info!("Provider {} registered", id);
                entries.insert(
                    id,
                    Entry {
                        provider,
                        in_flight: 0,
                        quarantined_until: None,
                    },
                );
            }
        }
    }

    /// Removes a provider. Refused while it has in-flight sessions.
    pub fn deregister(&self, id: &str) -> Result<(), ProviderError> {
        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        match entries.get(id) {
            None => Ok(()),
            Some(entry) if entry.in_flight > 0 => {
                Err(ProviderError::DeregisterBusy(id.to_string()))
            }
            Some(_) => {
                entries.remove(id);
                info!("Provider {} deregistered", id);
                Ok(())
            }
        }
    }

    /// Picks a provider for the request:
    /// capability filter, then quarantine filter, then highest priority;
    /// ties break by lowest in-flight count, then by id.
    pub fn select(
        &self,
        request: &TranscodeRequest,
    ) -> Result<Arc<dyn TranscodeProvider>, ProviderError> {
        let entries = match self.entries.read() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();

        let mut candidates: Vec<(&String, &Entry, i32)> = entries
            .iter()
            .filter(|(_, entry)| entry.provider.capabilities().supports(request))
            .filter(|(id, entry)| match entry.quarantined_until {
                Some(until) if until > now => {
                    debug!("Skipping quarantined provider {}", id);
                    false
                }
                _ => true,
            })
            .map(|(id, entry)| (id, entry, entry.provider.info().priority))
            .collect();

        candidates.sort_by(|a, b| {
            b.2.cmp(&a.2)
                .then(a.1.in_flight.cmp(&b.1.in_flight))
                .then(a.0.cmp(b.0))
        });

        match candidates.first() {
            Some((id, entry, _)) => {
                debug!("Selected provider {} for media {}", id, request.media_id);
                Ok(entry.provider.clone())
            }
            None => Err(ProviderError::NoCompatibleProvider),
        }
    }

    /// Puts a provider into its launch-failure cool-down.
    pub fn quarantine(&self, id: &str) {
        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(entry) = entries.get_mut(id) {
            warn!(
                "Quarantining provider {} for {:?} after launch failure",
                id, self.quarantine
            );
            entry.quarantined_until = Some(Instant::now() + self.quarantine);
        }
    }

    pub fn is_quarantined(&self, id: &str) -> bool {
        let entries = match self.entries.read() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries
            .get(id)
            .and_then(|e| e.quarantined_until)
            .map(|until| until > Instant::now())
            .unwrap_or(false)
    }

    pub fn session_started(&self, id: &str) {
        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(entry) = entries.get_mut(id) {
            entry.in_flight += 1;
        }
    }

    pub fn session_ended(&self, id: &str) {
        let mut entries = match self.entries.write() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(entry) = entries.get_mut(id) {
            entry.in_flight = entry.in_flight.saturating_sub(1);
        }
    }

    /// Snapshot of all registered providers for the public API.
    pub fn descriptors(&self) -> Vec<ProviderDescriptor> {
        let entries = match self.entries.read() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        let mut descriptors: Vec<ProviderDescriptor> = entries
            .values()
            .map(|entry| ProviderDescriptor {
                info: entry.provider.info(),
                capabilities: entry.provider.capabilities(),
                in_flight: entry.in_flight,
                quarantined: entry
                    .quarantined_until
                    .map(|until| until > now)
                    .unwrap_or(false),
            })
            .collect();
        descriptors.sort_by(|a, b| a.info.id.cmp(&b.info.id));
        descriptors
    }
}
