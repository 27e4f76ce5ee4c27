pub mod monitor;
pub mod store;

pub use monitor::{evaluate_exit, MonitorRegistry, PositionMonitor};
pub use store::{NewPosition, PositionStore};
