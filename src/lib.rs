mod cache;
mod consumption;
mod coordinator;
mod entity;
mod error;
mod gateway;
mod logger;
mod protocol;
mod session;
mod types;

pub use cache::StateCache;
pub use consumption::ConsumptionMeter;
pub use coordinator::{PollCoordinator, PollStats};
pub use entity::*;
pub use error::{Error, Result};
pub use gateway::{FloGateway, FloGatewayBuilder};
pub use logger::MessageLogMode;
pub use session::FloSession;
pub use types::*;
