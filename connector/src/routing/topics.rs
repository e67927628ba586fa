const KEY_MESSAGE_ID: &str = "$.mid";
const KEY_CONTENT_TYPE: &str = "$.ct";
const KEY_CONTENT_ENCODING: &str = "$.ce";
const CONTENT_TYPE: &str = "application/json";
const CONTENT_ENCODING: &str = "utf-8";

/// Hub topic delivering cloud-to-device messages of the device.
pub fn command_subscription_topic(device_id: &str) -> String {
    format!("devices/{device_id}/messages/devicebound/#")
}

/// Hub topic for a device-to-cloud message.
///
/// The message properties are url-encoded with their keys sorted; the message id is
/// only included when non-empty.
pub fn telemetry_topic(device_id: &str, message_id: &str) -> String {
    let mut properties = vec![
        (KEY_CONTENT_TYPE, CONTENT_TYPE),
        (KEY_CONTENT_ENCODING, CONTENT_ENCODING),
    ];
    if !message_id.is_empty() {
        properties.push((KEY_MESSAGE_ID, message_id));
    }
    properties.sort_by_key(|(key, _)| *key);

    let encoded = properties
        .iter()
        .map(|(key, value)| format!("{}={}", urlencoding::encode(key), urlencoding::encode(value)))
        .collect::<Vec<_>>()
        .join("&");

    format!("devices/{device_id}/messages/events/{encoded}")
}

/// MQTT topic filter matching with `+` and `#` wildcards.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_topic_properties_sorted() {
        assert_eq!(
            telemetry_topic("dev", "42"),
            "devices/dev/messages/events/%24.ce=utf-8&%24.ct=application%2Fjson&%24.mid=42"
        );
    }

    #[test]
    fn test_telemetry_topic_without_message_id() {
        assert_eq!(
            telemetry_topic("dev", ""),
            "devices/dev/messages/events/%24.ce=utf-8&%24.ct=application%2Fjson"
        );
    }

    #[test]
    fn test_command_subscription_topic() {
        assert_eq!(
            command_subscription_topic("dev"),
            "devices/dev/messages/devicebound/#"
        );
    }

    #[test]
    fn test_topic_matches() {
        assert!(topic_matches("device-to-cloud", "device-to-cloud"));
        assert!(topic_matches(
            "devices/dev/messages/devicebound/#",
            "devices/dev/messages/devicebound/%24.to=x"
        ));
        assert!(topic_matches("a/+/c", "a/b/c"));
        assert!(topic_matches("a/#", "a"));
        assert!(!topic_matches("a/+/c", "a/b/d"));
        assert!(!topic_matches("a/b", "a/b/c"));
        assert!(!topic_matches("a/b/c", "a/b"));
    }
}
