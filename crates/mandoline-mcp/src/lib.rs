pub mod config;
pub mod context;
pub mod cors;
pub mod credentials;
pub mod daemon;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod logging;
pub mod protocol;
pub mod resources;
pub mod server;
pub mod session;
pub mod sweeper;
pub mod tools;
pub mod transport;

pub use config::ServerConfig;
pub use context::{ContextError, RequestContext};
pub use cors::CorsPolicy;
pub use dispatcher::{Dispatcher, SessionPolicy};
pub use error::{DispatchError, ServerError};
pub use server::{McpServer, ServerInfo};
pub use session::{ClientInfo, SessionError, SessionRegistry};
pub use transport::{StreamableHttpTransport, Transport, TransportError, TransportFactory};
