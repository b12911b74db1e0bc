pub mod error;
pub mod similarity;
pub mod token_estimator;

pub use error::{ApiError, CoreError, TurnError};
pub use similarity::cosine_similarity;
