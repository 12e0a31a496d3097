//! Concrete collaborators for the sync engine: the community REST API over
//! `reqwest` and the push channel over a WebSocket.

pub mod error;
pub mod push;
pub mod rest;

pub use error::ClientError;
pub use push::WsPushChannel;
pub use rest::HttpApi;
