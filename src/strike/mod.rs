pub mod dex_client;
pub mod executor;
pub mod relay;
pub mod wallet;

pub use dex_client::{HttpSwapClient, OrderRequest, SwapOrder, SwapReceipt, SwapRouter};
pub use executor::ExecutionCoordinator;
pub use relay::{BundleRelay, BundleStatus};
pub use wallet::WalletSigner;
