pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("topic {0} already exists")]
    TopicExists(String),
    #[error("topic {0} not found")]
    TopicNotFound(String),
    #[error("client {client_id} already subscribed to topic {topic}")]
    AlreadySubscribed { client_id: String, topic: String },
    #[error("client {client_id} not subscribed to topic {topic}")]
    NotSubscribed { client_id: String, topic: String },
    #[error("invalid capacity for {0}")]
    InvalidCapacity(&'static str),
}
