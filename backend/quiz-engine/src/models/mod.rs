pub mod attempt;
pub mod identity;
pub mod question;
pub mod session;
pub mod timer;

pub use attempt::{Attempt, AttemptAnswer, AttemptSummary, FinishReason, Tally};
pub use identity::Identity;
pub use question::{Difficulty, Question, RawQuestion};
pub use session::{AnswerRecord, SessionState, SessionStatus, StartParams};
