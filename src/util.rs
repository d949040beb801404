use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the unix epoch, as stamped on outgoing envelopes.
pub fn create_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|since_the_epoch| since_the_epoch.as_millis() as u64)
        .unwrap_or(0)
}

pub fn format_url_string(host: &str, port: u16) -> String {
    format!("ws://{}:{}", host, port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_url_string_test() {
        assert_eq!(format_url_string("127.0.0.1", 50000), "ws://127.0.0.1:50000");
    }

    #[test]
    fn create_timestamp_test() {
        let first = create_timestamp();
        let second = create_timestamp();
        assert!(first > 0);
        assert!(second >= first);
    }
}
