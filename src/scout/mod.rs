pub mod filter;

pub use filter::{evaluate, FilterOutcome};
