use std::time::Duration;

/// Namespace every broker destination lives under.
pub const TOPIC_PREFIX: &str = "/topic/";

/// Suffix identifying the gNodeB telemetry stream of a device.
pub const TELEMETRY_TOPIC_SUFFIX: &str = ".gnb.telemetry";

/// Keycloak realm that issues operator tokens.
pub const AUTH_REALM: &str = "OAIBOX";

/// Keycloak client id used for the password grant.
pub const AUTH_CLIENT_ID: &str = "OAIBOX-API";

/// Fixed pause between broker connection attempts.
pub const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(500);

/// Time allowed for the broker to answer CONNECT with CONNECTED.
pub const STOMP_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Heart-beat interval offered to the broker in the CONNECT frame.
pub const STOMP_HEARTBEAT: Duration = Duration::from_secs(10);

/// STOMP protocol version requested from the broker.
pub const STOMP_VERSION: &str = "1.2";

/// Largest inbound frame accepted (4 MB).
pub const STOMP_MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Directory, relative to the working directory, that receives CSV exports.
pub const DEFAULT_OUTPUT_DIR: &str = "output";

/// Builds the destination carrying a device's telemetry.
///
/// `telemetry_topic("t1", "m1")` is `/topic/t1.m1.gnb.telemetry`.
pub fn telemetry_topic(tenant_id: &str, device_id: &str) -> String {
    format!("{TOPIC_PREFIX}{tenant_id}.{device_id}{TELEMETRY_TOPIC_SUFFIX}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_is_built_from_tenant_and_device() {
        assert_eq!(telemetry_topic("t1", "m1"), "/topic/t1.m1.gnb.telemetry");
    }

    #[test]
    fn topic_keeps_ids_verbatim() {
        let topic = telemetry_topic("tenant-A", "gnb_07");
        assert!(topic.starts_with(TOPIC_PREFIX));
        assert!(topic.ends_with(TELEMETRY_TOPIC_SUFFIX));
        assert!(topic.contains("tenant-A.gnb_07"));
    }

    #[test]
    fn retry_interval_matches_broker_expectation() {
        assert_eq!(CONNECT_RETRY_INTERVAL, Duration::from_millis(500));
    }
}
