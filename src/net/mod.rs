pub mod tcp;

pub use tcp::{TcpConnection, TcpConnectionFactory};
