pub mod channel;
pub mod connection;
pub mod handler;
pub mod protocol;
pub mod server;
pub mod session;

pub use channel::{Channel, ChannelQueues, WireEvent};
pub use connection::PushConnection;
pub use handler::{ChannelEvent, PushHandler, PushRequest, RequestKind};
pub use protocol::{JsonRpcDecoder, JsonStateSerializer, RpcDecoder, StateSerializer};
pub use server::{start, ServerConfig, ServerHandle};
pub use session::{Session, SessionRegistry, SessionUis, Ui};
