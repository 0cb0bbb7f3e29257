pub mod config;
pub mod subscriber;
pub mod topic;

pub use config::MqttConfig;
pub use subscriber::run_mqtt_subscriber;
pub use topic::{parse_topic, TopicRoute};
