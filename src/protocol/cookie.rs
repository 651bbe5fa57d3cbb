//! Process-wide connection cookie cache.
//!
//! A 23c server that advertises fast authentication hands out a UUID in its
//! ACCEPT. Once a handshake has completed against that server, the negotiated
//! protocol state is cached here; a later connection that sees the same UUID
//! for the same service can skip the PROTOCOL and DATA_TYPES round-trips
//! entirely and jump straight to authentication.
//!
//! This cache is the only process-wide mutable state in the crate.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

/// Cache key: the server instance UUID plus the service name or SID.
pub type CookieKey = ([u8; 16], String);

/// Captured handshake state for one (server, service) pair.
#[derive(Debug, Clone)]
pub struct ConnectionCookie {
    pub protocol_version: u16,
    pub server_banner: Bytes,
    pub charset_id: u16,
    pub ncharset_id: u16,
    pub flags: u8,
    pub compile_caps: Vec<u8>,
    pub runtime_caps: Vec<u8>,
}

fn cache() -> &'static Mutex<HashMap<CookieKey, ConnectionCookie>> {
    static CACHE: OnceLock<Mutex<HashMap<CookieKey, ConnectionCookie>>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Look up the cookie for a (server UUID, service) pair.
pub fn get(uuid: [u8; 16], service: &str) -> Option<ConnectionCookie> {
    cache()
        .lock()
        .expect("cookie cache poisoned")
        .get(&(uuid, service.to_string()))
        .cloned()
}

/// Store a cookie after a successful handshake.
pub fn store(uuid: [u8; 16], service: &str, cookie: ConnectionCookie) {
    cache()
        .lock()
        .expect("cookie cache poisoned")
        .insert((uuid, service.to_string()), cookie);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cookie() -> ConnectionCookie {
        ConnectionCookie {
            protocol_version: 319,
            server_banner: Bytes::from_static(b"Oracle Database 23ai"),
            charset_id: 873,
            ncharset_id: 2000,
            flags: 0,
            compile_caps: vec![1, 2, 3],
            runtime_caps: vec![4, 5],
        }
    }

    #[test]
    fn test_store_and_get() {
        let uuid = [7u8; 16];
        store(uuid, "SVC_A", sample_cookie());

        let hit = get(uuid, "SVC_A").expect("cookie should be cached");
        assert_eq!(hit.protocol_version, 319);
        assert_eq!(hit.compile_caps, vec![1, 2, 3]);

        assert!(get(uuid, "SVC_B").is_none());
        assert!(get([8u8; 16], "SVC_A").is_none());
    }
}
