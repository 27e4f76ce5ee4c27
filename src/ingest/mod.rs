pub mod dex_parsers;
pub mod websocket;

pub use dex_parsers::{parse_block_for_pools, SignatureWindow};
pub use websocket::PoolWatcher;
