//! Bucket key resolution
//!
//! Authenticated requests are limited per user, everything else per client
//! address. IPv6 clients are grouped by routing prefix so rotating through a
//! single allocation does not yield fresh quota.

use super::policy::KeyStrategy;
use crate::security::auth::Claims;
use axum::extract::ConnectInfo;
use axum::http::Request;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};

/// Shared bucket for requests with neither an identity nor an address
pub const UNKNOWN_KEY: &str = "unknown";

pub const FORWARDED_FOR: &str = "x-forwarded-for";

/// The parts of a request the resolver looks at
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestIdentity {
    pub principal: Option<String>,
    pub peer: Option<IpAddr>,
    pub forwarded_for: Option<String>,
}

impl RequestIdentity {
    pub fn from_request<B>(request: &Request<B>) -> Self {
        let principal = request
            .extensions()
            .get::<Claims>()
            .and_then(|claims| claims.principal_id())
            .map(str::to_owned);

        let peer = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        let forwarded_for = request
            .headers()
            .get(FORWARDED_FOR)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        Self {
            principal,
            peer,
            forwarded_for,
        }
    }
}

#[derive(Debug, Clone)]
pub struct KeyResolver {
    ipv6_prefix: u8,
    trust_proxy: bool,
}

impl KeyResolver {
    pub fn new(ipv6_prefix: u8, trust_proxy: bool) -> Self {
        Self {
            ipv6_prefix: ipv6_prefix.clamp(1, 128),
            trust_proxy,
        }
    }

    pub fn resolve(&self, strategy: KeyStrategy, identity: &RequestIdentity) -> String {
        match strategy {
            KeyStrategy::Principal => {
                if let Some(id) = &identity.principal {
                    return format!("user:{id}");
                }
                self.ip_key(self.client_ip(identity))
            }
            KeyStrategy::ForwardedFor => {
                let ip = identity
                    .forwarded_for
                    .as_deref()
                    .and_then(first_forwarded)
                    .or(identity.peer);
                self.ip_key(ip)
            }
        }
    }

    fn client_ip(&self, identity: &RequestIdentity) -> Option<IpAddr> {
        if self.trust_proxy {
            if let Some(ip) = identity.forwarded_for.as_deref().and_then(first_forwarded) {
                return Some(ip);
            }
        }
        identity.peer
    }

    fn ip_key(&self, ip: Option<IpAddr>) -> String {
        match ip {
            Some(ip) => format!("ip:{}", normalize_ip(ip, self.ipv6_prefix)),
            None => UNKNOWN_KEY.to_string(),
        }
    }
}

/// First address of an `X-Forwarded-For` list, if it parses
pub fn first_forwarded(header: &str) -> Option<IpAddr> {
    header.split(',').next()?.trim().parse().ok()
}

/// IPv4 as-is, IPv6 collapsed to `network/prefix`
pub fn normalize_ip(ip: IpAddr, ipv6_prefix: u8) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return v4.to_string();
            }
            let prefix = ipv6_prefix.clamp(1, 128);
            let mask = u128::MAX << (128 - u32::from(prefix));
            let network = Ipv6Addr::from(u128::from(v6) & mask);
            format!("{network}/{prefix}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::net::Ipv4Addr;

    fn resolver() -> KeyResolver {
        KeyResolver::new(56, false)
    }

    #[test]
    fn test_principal_wins_over_address() {
        let identity = RequestIdentity {
            principal: Some("42".to_string()),
            peer: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))),
            forwarded_for: None,
        };
        assert_eq!(resolver().resolve(KeyStrategy::Principal, &identity), "user:42");
    }

    #[test]
    fn test_ipv4_key() {
        let identity = RequestIdentity {
            peer: Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 9))),
            ..Default::default()
        };
        assert_eq!(
            resolver().resolve(KeyStrategy::Principal, &identity),
            "ip:192.168.1.9"
        );
    }

    #[test]
    fn test_unknown_fallback() {
        let identity = RequestIdentity::default();
        assert_eq!(resolver().resolve(KeyStrategy::Principal, &identity), UNKNOWN_KEY);
        assert_eq!(resolver().resolve(KeyStrategy::ForwardedFor, &identity), UNKNOWN_KEY);
    }

    #[test]
    fn test_ipv6_grouped_by_prefix() {
        let a: IpAddr = "2001:db8:abcd:1200::1".parse().unwrap();
        let b: IpAddr = "2001:db8:abcd:12ff:ffff::9".parse().unwrap();
        let c: IpAddr = "2001:db8:abcd:1300::1".parse().unwrap();

        assert_eq!(normalize_ip(a, 56), "2001:db8:abcd:1200::/56");
        assert_eq!(normalize_ip(a, 56), normalize_ip(b, 56));
        assert_ne!(normalize_ip(a, 56), normalize_ip(c, 56));
    }

    #[test]
    fn test_ipv4_mapped_ipv6_is_treated_as_ipv4() {
        let mapped: IpAddr = "::ffff:203.0.113.7".parse().unwrap();
        assert_eq!(normalize_ip(mapped, 56), "203.0.113.7");
    }

    #[test]
    fn test_webhook_key_uses_first_forwarded_entry() {
        let identity = RequestIdentity {
            principal: Some("someone".to_string()),
            peer: Some(IpAddr::V4(Ipv4Addr::new(10, 1, 1, 1))),
            forwarded_for: Some("203.0.113.5, 70.41.3.18".to_string()),
        };
        assert_eq!(
            resolver().resolve(KeyStrategy::ForwardedFor, &identity),
            "ip:203.0.113.5"
        );
    }

    #[test]
    fn test_webhook_key_falls_back_to_peer() {
        let identity = RequestIdentity {
            peer: Some(IpAddr::V4(Ipv4Addr::new(10, 1, 1, 1))),
            forwarded_for: Some("not-an-address".to_string()),
            ..Default::default()
        };
        assert_eq!(
            resolver().resolve(KeyStrategy::ForwardedFor, &identity),
            "ip:10.1.1.1"
        );
    }

    #[test]
    fn test_forwarded_for_ignored_unless_trusted() {
        let identity = RequestIdentity {
            peer: Some(IpAddr::V4(Ipv4Addr::new(10, 1, 1, 1))),
            forwarded_for: Some("198.51.100.4".to_string()),
            ..Default::default()
        };
        assert_eq!(
            resolver().resolve(KeyStrategy::Principal, &identity),
            "ip:10.1.1.1"
        );
        assert_eq!(
            KeyResolver::new(56, true).resolve(KeyStrategy::Principal, &identity),
            "ip:198.51.100.4"
        );
    }

    #[test]
    fn test_identity_from_request() {
        let mut request = Request::builder()
            .uri("/api/projects")
            .header("X-Forwarded-For", "203.0.113.5")
            .body(())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))));

        let identity = RequestIdentity::from_request(&request);
        assert_eq!(identity.principal, None);
        assert_eq!(identity.peer, Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));
        assert_eq!(identity.forwarded_for.as_deref(), Some("203.0.113.5"));
    }

    proptest! {
        #[test]
        fn prop_user_key_ignores_address(
            id in "[a-z0-9-]{1,24}",
            a in any::<u32>(),
            b in any::<u32>()
        ) {
            let first = RequestIdentity {
                principal: Some(id.clone()),
                peer: Some(IpAddr::V4(Ipv4Addr::from(a))),
                forwarded_for: None,
            };
            let second = RequestIdentity {
                principal: Some(id.clone()),
                peer: Some(IpAddr::V4(Ipv4Addr::from(b))),
                forwarded_for: None,
            };
            let resolver = resolver();
            prop_assert_eq!(
                resolver.resolve(KeyStrategy::Principal, &first),
                resolver.resolve(KeyStrategy::Principal, &second)
            );
        }

        #[test]
        fn prop_same_ipv6_prefix_same_key(
            network in any::<u64>(),
            host_a in any::<u64>(),
            host_b in any::<u64>()
        ) {
            // a /64 network shares its /56 prefix regardless of interface id
            let a = Ipv6Addr::from((u128::from(network) << 64) | u128::from(host_a));
            let b = Ipv6Addr::from((u128::from(network) << 64) | u128::from(host_b));
            prop_assume!(a.to_ipv4_mapped().is_none() && b.to_ipv4_mapped().is_none());
            prop_assert_eq!(normalize_ip(IpAddr::V6(a), 56), normalize_ip(IpAddr::V6(b), 56));
        }
    }
}
