use helio_domain::{DomainError, DomainResult};

/// Routing decision for one inbound MQTT topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicRoute {
    /// `inverter/{owner}/{device}/data`
    Telemetry { owner_id: String, device_id: String },
    /// `devices/inverter/{owner}/{device}`
    DeviceIdentity { owner_id: String, device_id: String },
    /// Recognized family but not a message we consume
    Ignored,
}

/// Parse an MQTT topic into a routing decision.
///
/// Telemetry arrives on `inverter/{owner}/{device}/data`; device identity
/// announcements on `devices/inverter/{owner}/{device}`. Anything else
/// under those families is ignored; unknown families are an error.
///
/// Ids become `:`-separated cache key segments downstream, so an id
/// containing `:` is rejected at this boundary.
pub fn parse_topic(topic: &str) -> DomainResult<TopicRoute> {
    let parts: Vec<&str> = topic.split('/').collect();

    match parts.as_slice() {
        ["inverter", owner_id, device_id, "data"] => {
            let owner_id = owner_id.trim();
            let device_id = device_id.trim();
            if !valid_id(owner_id) || !valid_id(device_id) {
                return Err(DomainError::InvalidTopic(topic.to_string()));
            }
            Ok(TopicRoute::Telemetry {
                owner_id: owner_id.to_string(),
                device_id: device_id.to_string(),
            })
        }
        ["inverter", _, _, _] => Ok(TopicRoute::Ignored),
        ["devices", "inverter", owner_id, device_id] => {
            let owner_id = owner_id.trim();
            let device_id = device_id.trim();
            if !valid_id(owner_id) || !valid_id(device_id) {
                return Err(DomainError::InvalidTopic(topic.to_string()));
            }
            Ok(TopicRoute::DeviceIdentity {
                owner_id: owner_id.to_string(),
                device_id: device_id.to_string(),
            })
        }
        _ => Err(DomainError::InvalidTopic(topic.to_string())),
    }
}

fn valid_id(segment: &str) -> bool {
    !segment.is_empty() && !segment.contains(':')
}
