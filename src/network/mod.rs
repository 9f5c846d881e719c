//! Networking: protocol types, token validation, session management, and the
//! WebSocket server.

pub mod auth;
pub mod protocol;
pub mod server;
pub mod session;

pub use protocol::{ClientAction, ServerEvent};
pub use server::{AppContext, GameServer};
pub use session::ConnectionManager;
