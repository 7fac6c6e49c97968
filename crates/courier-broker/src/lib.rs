// In-memory pub/sub core: topic registry, replay rings, bounded fan-out.
//
// The registry owns topics; each topic owns its replay ring and subscriber
// set. Subscriber queues are bounded and fed with non-blocking enqueues so a
// stalled consumer can never stall a publisher.

mod config;
mod error;
mod registry;
mod ring;
mod subscriber;
mod topic;

pub use config::Config;
pub use error::{RegistryError, Result};
pub use registry::{Health, Registry, Stats, TopicInfo, TopicStats};
pub use subscriber::Subscription;
