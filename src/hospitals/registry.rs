use std::collections::BTreeMap;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::error::RegistryError;
use crate::hospitals::{
    adapter::{Collector, SourceKind},
    codes::SourceId,
};

/// Builds a fresh collector. Must not perform I/O.
pub type Constructor = fn() -> Box<dyn Collector>;

/// One registered source.
#[derive(Clone, Copy)]
pub struct RegistryEntry {
    pub source: SourceId,
    pub kind: SourceKind,
    pub constructor: Constructor,
}

impl std::fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("source", &self.source)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// Maps each SourceId to the constructor of its collector.
///
/// LIFECYCLE:
/// - Filled at startup through explicit `register` calls
/// - Frozen behind an `Arc` (see `install_global`) before the first pass
/// - Never mutated afterwards
///
#[derive(Debug, Default)]
pub struct Registry {
    entries: BTreeMap<SourceId, RegistryEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `source` to `constructor`.
    ///
    /// ERRORS:
    /// - `DuplicateRegistration` if `source` is already bound; the
    ///   registry is left unchanged
    /// - `MissingIdentity` if the collector built by `constructor` does
    ///   not declare `source` as its identity
    /// - `KindMismatch` if that collector reports a kind other than `kind`
    ///
    pub fn register(
        &mut self,
        source: SourceId,
        kind: SourceKind,
        constructor: Constructor,
    ) -> Result<(), RegistryError> {
        if self.entries.contains_key(&source) {
            return Err(RegistryError::DuplicateRegistration(source));
        }

        let built = constructor();
        let declared = built.source_id();
        if declared != source {
            return Err(RegistryError::MissingIdentity {
                registered: source,
                declared,
            });
        }
        if built.kind() != kind {
            return Err(RegistryError::KindMismatch {
                source_id: source,
                registered: kind,
                declared: built.kind(),
            });
        }

        self.entries.insert(
            source,
            RegistryEntry {
                source,
                kind,
                constructor,
            },
        );
        log::debug!("registered {kind} collector for {source} ({})", source.label());
        Ok(())
    }

    /// Returns a new collector instance for `source`.
    pub fn create(&self, source: SourceId) -> Result<Box<dyn Collector>, RegistryError> {
        self.entries
            .get(&source)
            .map(|entry| (entry.constructor)())
            .ok_or(RegistryError::NotRegistered(source))
    }

    /// All entries; may be iterated any number of times.
    pub fn list_all(&self) -> impl Iterator<Item = &RegistryEntry> + '_ {
        self.entries.values()
    }

    pub fn kind_of(&self, source: SourceId) -> Option<SourceKind> {
        self.entries.get(&source).map(|e| e.kind)
    }

    pub fn contains(&self, source: SourceId) -> bool {
        self.entries.contains_key(&source)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

static GLOBAL: OnceCell<Arc<Registry>> = OnceCell::new();

/// Freezes `registry` as the process-wide registry.
///
/// May be called once; a second call fails and leaves the first in place.
pub fn install_global(registry: Registry) -> Result<Arc<Registry>, RegistryError> {
    let frozen = Arc::new(registry);
    GLOBAL
        .set(frozen.clone())
        .map_err(|_| RegistryError::AlreadyInstalled)?;
    Ok(frozen)
}

/// The process-wide registry, if installed.
pub fn global() -> Option<Arc<Registry>> {
    GLOBAL.get().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollectorError;
    use crate::http::RetrievalClient;
    use crate::schema::Reading;
    use crate::util;

    struct Stub(SourceId);

    #[async_trait::async_trait]
    impl Collector for Stub {
        fn source_id(&self) -> SourceId {
            self.0
        }

        fn kind(&self) -> SourceKind {
            SourceKind::Html
        }

        async fn scrape(&self, _client: &RetrievalClient) -> Result<Reading, CollectorError> {
            Ok(Reading::new(self.0, util::now()))
        }
    }

    fn sciacca() -> Box<dyn Collector> {
        Box::new(Stub(SourceId::PsSciacca))
    }

    fn ribera() -> Box<dyn Collector> {
        Box::new(Stub(SourceId::PsRibera))
    }

    #[test]
    fn duplicate_registration_fails_and_keeps_registry() {
        let mut reg = Registry::new();
        reg.register(SourceId::PsSciacca, SourceKind::Html, sciacca).unwrap();

        let err = reg
            .register(SourceId::PsSciacca, SourceKind::Api, sciacca)
            .unwrap_err();

        assert_eq!(err, RegistryError::DuplicateRegistration(SourceId::PsSciacca));
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.kind_of(SourceId::PsSciacca), Some(SourceKind::Html));
    }

    #[test]
    fn mismatched_identity_is_rejected() {
        let mut reg = Registry::new();
        let err = reg
            .register(SourceId::PsSciacca, SourceKind::Html, ribera)
            .unwrap_err();

        assert_eq!(
            err,
            RegistryError::MissingIdentity {
                registered: SourceId::PsSciacca,
                declared: SourceId::PsRibera,
            }
        );
        assert!(reg.is_empty());
    }

    #[test]
    fn mismatched_kind_is_rejected() {
        let mut reg = Registry::new();
        let err = reg
            .register(SourceId::PsRibera, SourceKind::Api, ribera)
            .unwrap_err();

        assert_eq!(
            err,
            RegistryError::KindMismatch {
                source_id: SourceId::PsRibera,
                registered: SourceKind::Api,
                declared: SourceKind::Html,
            }
        );
        assert!(!reg.contains(SourceId::PsRibera));
    }

    #[test]
    fn create_returns_fresh_instances() {
        let mut reg = Registry::new();
        reg.register(SourceId::PsRibera, SourceKind::Html, ribera).unwrap();

        let c = reg.create(SourceId::PsRibera).unwrap();
        assert_eq!(c.source_id(), SourceId::PsRibera);

        assert_eq!(
            reg.create(SourceId::PsLicata).err(),
            Some(RegistryError::NotRegistered(SourceId::PsLicata))
        );
    }

    #[test]
    fn list_all_is_restartable() {
        let mut reg = Registry::new();
        reg.register(SourceId::PsSciacca, SourceKind::Html, sciacca).unwrap();
        reg.register(SourceId::PsRibera, SourceKind::Html, ribera).unwrap();

        assert_eq!(reg.list_all().count(), 2);
        assert_eq!(reg.list_all().count(), 2);
        assert!(reg.list_all().any(|e| e.source == SourceId::PsRibera));
    }

    #[test]
    fn global_installs_once() {
        let _ = install_global(Registry::new());
        let again = install_global(Registry::new());

        assert_eq!(again.err(), Some(RegistryError::AlreadyInstalled));
        assert!(global().is_some());
    }
}
