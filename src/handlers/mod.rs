pub mod analysis_handler;
pub mod cascade;
pub mod normalizer;
pub mod portion;
pub mod two_step;

pub use analysis_handler::AnalysisHandler;
pub use cascade::NutritionCascade;
pub use portion::PortionEstimator;
pub use two_step::{TwoStepOutcome, TwoStepPipeline};
