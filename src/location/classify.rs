/// Address family of an IP address string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpFamily {
    V4,
    V6,
    Unknown,
}

impl IpFamily {
    /// Classify by textual shape only: any `:` means IPv6, otherwise a `.` means IPv4.
    ///
    /// `1.2.3.4:80` is therefore IPv6.
    pub fn classify(ip: &str) -> Self {
        if ip.contains(':') {
            IpFamily::V6
        } else if ip.contains('.') {
            IpFamily::V4
        } else {
            IpFamily::Unknown
        }
    }
}

/// Whether a hostname is tagged as an IPv6 endpoint (`ipv6-c001-ord001-ix...`).
pub fn is_ipv6_tagged(hostname: &str) -> bool {
    hostname.to_ascii_lowercase().contains("ipv6")
}

/// A reverse-DNS answer usable in place of the original hostname.
pub(crate) fn valid_ptr_name(name: &str) -> Option<String> {
    let name = name.trim().trim_end_matches('.');
    if name.is_empty() || name.contains(':') {
        return None;
    }
    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(IpFamily::classify("45.57.120.66"), IpFamily::V4);
        assert_eq!(IpFamily::classify("2a00:86c0:2040::1"), IpFamily::V6);
        assert_eq!(IpFamily::classify("1.2.3.4:80"), IpFamily::V6);
        assert_eq!(IpFamily::classify("::ffff:45.57.120.66"), IpFamily::V6);
        assert_eq!(IpFamily::classify(""), IpFamily::Unknown);
        assert_eq!(IpFamily::classify("unresolved"), IpFamily::Unknown);
    }

    #[test]
    fn test_ipv6_tag() {
        assert!(is_ipv6_tagged("ipv6-c001-ord001-ix.1.oca.nflxvideo.net"));
        assert!(is_ipv6_tagged("IPV6-C001-ORD001-IX.1.oca.nflxvideo.net"));
        assert!(!is_ipv6_tagged("ipv4-c211-ord001-dev-ix.1.oca.nflxvideo.net"));
        assert!(!is_ipv6_tagged("c001.ord001.ix.nflxvideo.net"));
    }

    #[test]
    fn test_valid_ptr_name() {
        assert_eq!(
            valid_ptr_name("ipv4-c211-ord001-dev-ix.1.oca.nflxvideo.net."),
            Some("ipv4-c211-ord001-dev-ix.1.oca.nflxvideo.net".to_string())
        );
        assert_eq!(valid_ptr_name(""), None);
        assert_eq!(valid_ptr_name("2001:db8::1"), None);
    }
}
