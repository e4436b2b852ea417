mod category;
mod status;
mod voter;

pub use category::{Category, UnknownCategory};
pub use status::{ElectionStatus, UnknownStatus};
pub use voter::VoterId;
