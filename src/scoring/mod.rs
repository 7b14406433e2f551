pub mod logmath;
mod posteriors;
mod prefix_score;
mod state;
mod window;

pub use posteriors::PosteriorTensor;
pub use prefix_score::CtcPrefixScorer;
pub use state::{CtcState, ForwardTable, PrefixState, ScoringIdMap};
