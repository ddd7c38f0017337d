/// Per-engine parameter persistence
pub mod model_store;
/// Shared room temperature cache (ventilation / health write-through)
pub mod room_cache;

pub use model_store::ModelStore;
pub use room_cache::RoomTemperatureCache;
