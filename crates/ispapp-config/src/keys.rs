/// UCI package holding the device settings (`/etc/config/ispapp`).
pub const PACKAGE: &str = "ispapp";
/// Section type; the store addresses the first one (`@settings[0]`).
pub const SECTION: &str = "settings";

pub const LOGIN: &str = "login";
pub const DOMAIN: &str = "Domain";
pub const LISTENER_PORT: &str = "ListenerPort";
pub const KEY: &str = "Key";
pub const ACCESS_TOKEN: &str = "accessToken";
pub const REFRESH_TOKEN: &str = "refreshToken";
pub const UPDATE_INTERVAL: &str = "UpdateInterval";

/// Options that must never be logged or echoed back to the UI.
pub fn is_secret(key: &str) -> bool {
    matches!(key, KEY | ACCESS_TOKEN | REFRESH_TOKEN)
}

/// Value safe to put in a log line.
pub fn redact<'a>(key: &str, value: &'a str) -> &'a str {
    if is_secret(key) {
        "<redacted>"
    } else {
        value
    }
}
