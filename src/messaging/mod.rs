pub mod node_addr;
pub mod message;
pub mod wire;
pub mod transport;
