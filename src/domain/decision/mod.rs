pub mod corroboration;
pub mod earnings;
pub mod engine;

pub use corroboration::{CorroborationConfig, CorroborationState, SourceClass};
pub use earnings::{EarningsEmbargoState, EmbargoConfig};
pub use engine::{DecisionConfig, GateEntry, ProposedAction, Reason, RiskState, evaluate};
