mod client;
mod pool;
mod resolver;

pub use client::WireClient;
pub use pool::ConnectionPool;
pub use resolver::{NameResolver, StaticResolver};
