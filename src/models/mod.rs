mod candidate;
mod record;
mod scored;
mod subscriber;

pub use candidate::CandidateItem;
pub use record::{DeliveryLogEntry, DeliveryStatus, RecordStats, SentRecord};
pub use scored::{Score, ScoredItem};
pub use subscriber::Subscriber;
