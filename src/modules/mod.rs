pub mod borrowers;
pub mod catalog;
pub mod lending;

use std::sync::Arc;

use biblio_events::Multicast;
use biblio_kernel::settings::Settings;
use biblio_kernel::ModuleRegistry;

use catalog::cache::SearchCache;
use catalog::store::CatalogStore;
use lending::audit::AuditLog;
use lending::ledger::LendingLedger;

/// Wire up shared state and register all service modules.
pub fn register_all(registry: &mut ModuleRegistry, settings: &Settings) {
    let store = Arc::new(CatalogStore::new());
    let cache = Arc::new(SearchCache::new());
    let availability = Arc::new(Multicast::new());
    let audit = Arc::new(AuditLog::new());

    let ledger = Arc::new(LendingLedger::new(
        Arc::clone(&store),
        Arc::clone(&cache),
        availability,
        audit,
        settings.lending.loan_period_days,
    ));

    registry.register(catalog::create_module(Arc::clone(&store), cache));
    registry.register(borrowers::create_module(store));
    registry.register(lending::create_module(ledger));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_modules_register() {
        let mut registry = ModuleRegistry::new();
        let settings = Settings::default();

        register_all(&mut registry, &settings);

        assert_eq!(registry.len(), 3);
        assert!(registry.get_module("catalog").is_some());
        assert!(registry.get_module("borrowers").is_some());
        assert!(registry.get_module("lending").is_some());
    }
}
