pub mod error;
pub mod frame;
pub mod ids;
pub mod push;
pub mod transport;

pub use error::PushError;
pub use ids::{ConnectionId, SessionId, UiId};
pub use push::{CriticalNotification, PushMode};
pub use transport::{DeliveryPolicy, TransportKind};
