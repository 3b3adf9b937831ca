use copytrade_core::Timestamp;

/// Source of the current time
///
/// The engine reads time only through this port: expiry, daily trade
/// windows, execution timestamps and request signing. Tests substitute a
/// manually advanced clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;

    /// Unix milliseconds, as exchange signatures expect
    fn now_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}
