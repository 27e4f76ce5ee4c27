pub mod cache;
pub mod pipeline;
pub mod providers;

pub use cache::MetadataCache;
pub use pipeline::EnrichmentPipeline;
pub use providers::{
    DexScreenerClient, HolderStake, PoolInfoProvider, PriceProvider, PriceSnapshot, RiskProvider,
    RiskReport, RpcPoolInfo, RugcheckClient, SolscanClient, TokenMeta, TokenMetaProvider,
    TopHoldersProvider,
};
