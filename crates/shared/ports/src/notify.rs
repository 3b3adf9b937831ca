use copytrade_core::EngineEvent;

/// Port for the outbound messaging layer
///
/// Delivery is best-effort. Implementations must return immediately; a slow
/// or disconnected consumer may drop events but never stalls the engine.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: EngineEvent);
}
