//! Status endpoint.

mod routes;
mod server;

pub use routes::router;
pub use server::{StatusServer, StatusServerConfig};
