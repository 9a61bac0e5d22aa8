pub mod decision;
pub mod errors;
pub mod overrides;
pub mod ports;
pub mod symbols;
pub mod trading;
pub mod types;
pub mod wire;
