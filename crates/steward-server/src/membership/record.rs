use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::Ipv4Addr;

const BASE62: &[u8; 62] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

fn default_role() -> String {
    "worker".to_string()
}

/// Body of `PUT /ping`, as reported by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keepalive {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub payload: Value,
}

impl Keepalive {
    /// Key of the membership record this keepalive refreshes.
    pub fn entity_key(&self) -> Option<String> {
        if let Some(key) = self.key.as_deref().filter(|key| !key.is_empty()) {
            return Some(key.to_string());
        }
        if let Some(ip) = self.ip.as_deref().filter(|ip| !ip.is_empty()) {
            return Some(entity_key(ip));
        }
        self.id.clone().filter(|id| !id.is_empty())
    }
}

/// Derive a store-safe key from an address. IPv4 addresses are shortened to base 62.
pub fn entity_key(ip: &str) -> String {
    match ip.parse::<Ipv4Addr>() {
        Ok(addr) => base62(u32::from(addr)),
        Err(_) => ip.replace([':', '/'], "_"),
    }
}

fn base62(mut n: u32) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(BASE62[(n % 62) as usize]);
        n /= 62;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

/// Membership record persisted under `pods/<key>`.
///
/// Fields are declared in alphabetical order and `payload` maps are sorted, so
/// the serialized form is canonical and safe to hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    pub key: String,
    #[serde(default)]
    pub payload: Value,
    pub role: String,
    pub seq: i64,
}

impl MembershipRecord {
    pub fn new(key: String, seq: i64, update: Keepalive) -> Self {
        Self {
            app: update.app,
            id: update.id,
            ip: update.ip,
            key,
            payload: update.payload,
            role: update.role,
            seq,
        }
    }

    /// Apply a newer keepalive. The key and the sequence number never change.
    pub fn merge(&mut self, update: Keepalive) {
        if update.app.is_some() {
            self.app = update.app;
        }
        if update.id.is_some() {
            self.id = update.id;
        }
        if update.ip.is_some() {
            self.ip = update.ip;
        }
        self.role = update.role;
        self.payload = update.payload;
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn keepalive(value: Value) -> Keepalive {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_ipv4_is_shortened() {
        assert_eq!(entity_key("0.0.0.0"), "0");
        assert_eq!(entity_key("0.0.0.61"), "Z");
        assert_eq!(entity_key("0.0.0.62"), "10");
        assert_eq!(entity_key("10.0.0.1"), "blXcB");
        assert_eq!(entity_key("fe80::1"), "fe80__1");
    }

    #[test]
    fn test_entity_key_precedence() {
        let update = keepalive(json!({"id": "a", "ip": "0.0.0.62", "key": "explicit"}));
        assert_eq!(update.entity_key().as_deref(), Some("explicit"));
        let update = keepalive(json!({"id": "a", "ip": "0.0.0.62"}));
        assert_eq!(update.entity_key().as_deref(), Some("10"));
        let update = keepalive(json!({"id": "a"}));
        assert_eq!(update.entity_key().as_deref(), Some("a"));
        assert_eq!(keepalive(json!({})).entity_key(), None);
    }

    #[test]
    fn test_merge_keeps_sequence() {
        let mut record = MembershipRecord::new(
            "k".into(),
            4,
            keepalive(json!({"id": "a", "ip": "10.0.0.1", "role": "db", "payload": {"v": 1}})),
        );
        record.merge(keepalive(json!({"role": "db", "payload": {"v": 2}})));
        assert_eq!(record.seq, 4);
        assert_eq!(record.id.as_deref(), Some("a"));
        assert_eq!(record.payload, json!({"v": 2}));
    }

    #[test]
    fn test_serialization_is_canonical() {
        let record = MembershipRecord::new(
            "k".into(),
            0,
            keepalive(json!({"ip": "10.0.0.1", "payload": {"zeta": 1, "alpha": 2}})),
        );
        assert_eq!(
            record.to_json().unwrap(),
            r#"{"ip":"10.0.0.1","key":"k","payload":{"alpha":2,"zeta":1},"role":"worker","seq":0}"#
        );
    }
}
