//! Utility module
//!
//! This module provides common helpers used throughout the library.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Converts a duration to floating-point milliseconds
pub fn duration_to_millis(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

/// Median of the given values; mean of the two middle values for even counts
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Address of the primary network interface, loopback when there is none
pub fn local_ip() -> IpAddr {
    local_ip_address::local_ip().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// IP a socket bound to `addr` is reachable on
pub fn advertised_ip(addr: SocketAddr) -> IpAddr {
    if addr.ip().is_unspecified() {
        local_ip()
    } else {
        addr.ip()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_conversion() {
        assert_eq!(duration_to_millis(Duration::from_micros(1500)), 1.5);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
    }

    #[test]
    fn test_local_ip() {
        let ip = local_ip();
        assert!(!ip.is_unspecified());
        assert!(ip.is_ipv4());
    }

    #[test]
    fn test_advertised_ip() {
        let addr: SocketAddr = "127.0.0.1:6454".parse().unwrap();
        assert_eq!(advertised_ip(addr), IpAddr::V4(Ipv4Addr::LOCALHOST));

        let any: SocketAddr = "0.0.0.0:6454".parse().unwrap();
        assert!(!advertised_ip(any).is_unspecified());
    }
}
