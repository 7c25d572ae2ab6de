pub mod host_key;
pub mod network_listener;

pub use network_listener::NetworkListener;
