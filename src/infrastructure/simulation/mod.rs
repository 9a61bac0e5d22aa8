pub mod latency_model;
pub mod slippage_model;
