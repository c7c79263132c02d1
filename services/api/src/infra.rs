use metrics_exporter_prometheus::PrometheusHandle;
use rental_engine::config::MarketplaceConfig;
use rental_engine::error::AppError;
use rental_engine::marketplace::{
    InMemoryBookingRepository, InMemoryConversationRepository, InMemoryPresence,
    InMemoryPropertyRepository, Marketplace, MarketplaceStores, PropertySeedImporter,
    RecordingFanout,
};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Single-node adapters. The presence table is filled by the websocket gateway when one is
/// attached; until then every recipient reads as offline and messages wait in the store.
pub(crate) struct InMemoryBackends {
    pub(crate) properties: Arc<InMemoryPropertyRepository>,
    pub(crate) presence: Arc<InMemoryPresence>,
    pub(crate) fanout: Arc<RecordingFanout>,
    pub(crate) stores: MarketplaceStores,
}

pub(crate) fn in_memory_backends() -> InMemoryBackends {
    let properties = Arc::new(InMemoryPropertyRepository::default());
    let presence = Arc::new(InMemoryPresence::default());
    let fanout = Arc::new(RecordingFanout::default());
    let stores = MarketplaceStores {
        properties: properties.clone(),
        bookings: Arc::new(InMemoryBookingRepository::default()),
        conversations: Arc::new(InMemoryConversationRepository::default()),
        presence: presence.clone(),
        fanout: fanout.clone(),
    };

    InMemoryBackends {
        properties,
        presence,
        fanout,
        stores,
    }
}

/// Build the engine over in-memory stores, seeding listings when a CSV is configured.
pub(crate) fn build_marketplace(
    config: &MarketplaceConfig,
    seed: Option<&Path>,
) -> Result<Arc<Marketplace>, AppError> {
    let backends = in_memory_backends();

    if let Some(path) = seed {
        let listings = PropertySeedImporter::from_path(path)?;
        let stored = PropertySeedImporter::load_into(listings, backends.properties.as_ref())?;
        info!(path = %path.display(), stored, "listing seed loaded");
    }

    Ok(Arc::new(Marketplace::new(backends.stores, config.clone())))
}
