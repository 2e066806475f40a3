//! Private and loopback network classification.
//!
//! The facilitator replays buyer-supplied URLs and the webhook dispatcher
//! posts to seller-supplied URLs; both must refuse destinations inside the
//! platform's own network. The classification here is pure (IP in, verdict
//! out); callers resolve hostnames themselves and check every resolved
//! address.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Returns `true` if the address must not be dialed from the platform:
/// loopback, RFC1918 private ranges, link-local, unspecified, carrier-grade
/// NAT, and their IPv6 equivalents (including IPv4-mapped forms).
pub fn is_forbidden_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_forbidden_v4(v4),
        IpAddr::V6(v6) => is_forbidden_v6(v6),
    }
}

fn is_forbidden_v4(ip: Ipv4Addr) -> bool {
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        // 100.64.0.0/10 carrier-grade NAT
        || (ip.octets()[0] == 100 && (ip.octets()[1] & 0b1100_0000) == 64)
}

fn is_forbidden_v6(ip: Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_forbidden_v4(v4);
    }
    ip.is_loopback()
        || ip.is_unspecified()
        // fc00::/7 unique local
        || (ip.segments()[0] & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (ip.segments()[0] & 0xffc0) == 0xfe80
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forbidden(s: &str) -> bool {
        is_forbidden_ip(s.parse().unwrap())
    }

    #[test]
    fn rejects_loopback_and_private_ranges() {
        assert!(forbidden("127.0.0.1"));
        assert!(forbidden("10.0.0.8"));
        assert!(forbidden("172.16.4.1"));
        assert!(forbidden("192.168.1.1"));
        assert!(forbidden("169.254.169.254"));
        assert!(forbidden("100.64.1.1"));
        assert!(forbidden("0.0.0.0"));
        assert!(forbidden("::1"));
        assert!(forbidden("fd00::1"));
        assert!(forbidden("fe80::1"));
        assert!(forbidden("::ffff:192.168.0.1"));
    }

    #[test]
    fn allows_public_addresses() {
        assert!(!forbidden("1.1.1.1"));
        assert!(!forbidden("8.8.8.8"));
        assert!(!forbidden("2606:4700:4700::1111"));
    }
}
