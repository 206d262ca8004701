//! Fact extraction from free-form console output.
//!
//! A rule pairs a regex (first capture group) with a transform. A transcript
//! that does not match yields `Ok(None)`; a match whose capture cannot be
//! converted yields `ProvisionError::MalformedOutput`.
use crate::error::{ProvisionError, Result};
use regex::Regex;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

pub const INET_ADDRESS_PATTERN: &str = r"inet (?:addr:)?\s*([0-9.]+(?:/\d+)?)";
pub const HARDWARE_ADDRESS_PATTERN: &str = r"(?:HWaddr|ether)\s+(\S+)";
pub const INTERFACE_MAC_PATTERN: &str = r"address is\s+(\S+)\s+\(bia";
pub const INTERFACE_HANDLE_PATTERN: &str = r"ifh\s+(\S+)\s+\(";

/// Colon separated MAC address, always six lowercase octets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl FromStr for MacAddress {
    type Err = String;

    /// Accepts `0011.2233.4455`, `00:11:22:33:44:55` and `00-11-22-33-44-55`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let digits: String = s
            .chars()
            .filter(|c| !matches!(c, '.' | ':' | '-'))
            .collect();
        if digits.len() != 12 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("'{}' is not a 48-bit hardware address", s));
        }
        let mut octets = [0u8; 6];
        for (i, octet) in octets.iter_mut().enumerate() {
            *octet = u8::from_str_radix(&digits[i * 2..i * 2 + 2], 16)
                .map_err(|e| format!("'{}': {}", s, e))?;
        }
        Ok(MacAddress(octets))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

/// Router-internal numeric interface handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterfaceHandle(pub u64);

impl fmt::Display for InterfaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Parse an integer with an optional base prefix (`0x`, `0o`, `0b`), decimal otherwise.
pub fn parse_prefixed_integer(text: &str) -> std::result::Result<u64, String> {
    let lower = text.trim().to_ascii_lowercase();
    let (digits, radix) = if let Some(rest) = lower.strip_prefix("0x") {
        (rest, 16)
    } else if let Some(rest) = lower.strip_prefix("0o") {
        (rest, 8)
    } else if let Some(rest) = lower.strip_prefix("0b") {
        (rest, 2)
    } else {
        (lower.as_str(), 10)
    };
    let digits = digits.replace('_', "");
    u64::from_str_radix(&digits, radix).map_err(|e| format!("'{}': {}", text, e))
}

/// The address part of `a.b.c.d` or `a.b.c.d/len`.
pub fn parse_ipv4(text: &str) -> std::result::Result<Ipv4Addr, String> {
    let address = text.split('/').next().unwrap_or(text);
    address
        .parse::<Ipv4Addr>()
        .map_err(|e| format!("'{}': {}", text, e))
}

/// Named pattern plus transform producing a typed fact.
pub struct ExtractionRule<T> {
    name: &'static str,
    pattern: Regex,
    transform: fn(&str) -> std::result::Result<T, String>,
}

impl<T> fmt::Debug for ExtractionRule<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractionRule")
            .field("name", &self.name)
            .field("pattern", &self.pattern.as_str())
            .finish()
    }
}

impl<T> ExtractionRule<T> {
    pub fn new(
        name: &'static str,
        pattern: &str,
        transform: fn(&str) -> std::result::Result<T, String>,
    ) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|e| {
            ProvisionError::Config(format!("Invalid pattern for rule '{}': {}", name, e))
        })?;
        if pattern.captures_len() < 2 {
            return Err(ProvisionError::Config(format!(
                "Pattern for rule '{}' needs a capture group",
                name
            )));
        }
        Ok(Self {
            name,
            pattern,
            transform,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// First match wins. Absent pattern is not an error.
    pub fn extract(&self, transcript: &str) -> Result<Option<T>> {
        let Some(captures) = self.pattern.captures(transcript) else {
            return Ok(None);
        };
        let Some(captured) = captures.get(1) else {
            return Ok(None);
        };
        (self.transform)(captured.as_str())
            .map(Some)
            .map_err(|detail| ProvisionError::malformed(self.name, detail))
    }
}

impl ExtractionRule<Ipv4Addr> {
    pub fn inet_address(pattern: &str) -> Result<Self> {
        Self::new("inet_address", pattern, parse_ipv4)
    }
}

impl ExtractionRule<MacAddress> {
    pub fn hardware_address(pattern: &str) -> Result<Self> {
        Self::new("hardware_address", pattern, MacAddress::from_str)
    }

    pub fn interface_mac(pattern: &str) -> Result<Self> {
        Self::new("interface_mac", pattern, MacAddress::from_str)
    }
}

impl ExtractionRule<InterfaceHandle> {
    pub fn interface_handle(pattern: &str) -> Result<Self> {
        Self::new("interface_handle", pattern, |text| {
            parse_prefixed_integer(text).map(InterfaceHandle)
        })
    }
}

/// The rule set used by the workflow, compiled once per run.
#[derive(Debug)]
pub struct FactRules {
    pub inet_address: ExtractionRule<Ipv4Addr>,
    pub hardware_address: ExtractionRule<MacAddress>,
    pub interface_mac: ExtractionRule<MacAddress>,
    pub interface_handle: ExtractionRule<InterfaceHandle>,
}

impl FactRules {
    pub fn compile(patterns: &crate::config::FactPatterns) -> Result<Self> {
        Ok(Self {
            inet_address: ExtractionRule::inet_address(&patterns.inet_address)?,
            hardware_address: ExtractionRule::hardware_address(&patterns.hardware_address)?,
            interface_mac: ExtractionRule::interface_mac(&patterns.interface_mac)?,
            interface_handle: ExtractionRule::interface_handle(&patterns.interface_handle)?,
        })
    }

    pub fn builtin() -> Result<Self> {
        Self::compile(&crate::config::FactPatterns::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_mac_from_dotted_hex() {
        let rules = FactRules::builtin().unwrap();
        let transcript = "GigabitEthernet0/RP0/CPU0/0 is up\n  Hardware is GigabitEthernet, address is 0011.2233.4455 (bia 0011.2233.4455)";
        let mac = rules.interface_mac.extract(transcript).unwrap().unwrap();
        assert_eq!(mac.to_string(), "00:11:22:33:44:55");
    }

    #[test]
    fn test_interface_handle_hex_prefix() {
        let rules = FactRules::builtin().unwrap();
        let handle = rules
            .interface_handle
            .extract("Interface GigabitEthernet0/RP0/CPU0/0, ifh 0x2a (up, 1514)")
            .unwrap()
            .unwrap();
        assert_eq!(handle, InterfaceHandle(42));
    }

    #[test]
    fn test_missing_pattern_is_absent_not_error() {
        let rules = FactRules::builtin().unwrap();
        assert!(rules.interface_mac.extract("").unwrap().is_none());
        assert!(rules
            .interface_handle
            .extract("% Invalid input detected at '^' marker.")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_matched_but_unparsable_is_malformed() {
        let rules = FactRules::builtin().unwrap();
        let err = rules
            .interface_handle
            .extract("ifh zz9 (")
            .unwrap_err();
        assert!(matches!(err, ProvisionError::MalformedOutput { ref rule, .. } if rule == "interface_handle"));

        let err = rules
            .interface_mac
            .extract("address is 0011.2233 (bia")
            .unwrap_err();
        assert!(matches!(err, ProvisionError::MalformedOutput { .. }));
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let rules = FactRules::builtin().unwrap();
        let transcript = "address is aabb.ccdd.eeff (bia aabb.ccdd.eeff)";
        let first = rules.interface_mac.extract(transcript).unwrap();
        let second = rules.interface_mac.extract(transcript).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_ifconfig_old_and_new_formats() {
        let rules = FactRules::builtin().unwrap();
        let legacy = "netBr1    Link encap:Ethernet  HWaddr 52:54:00:AA:BB:CC\n          inet addr:10.0.0.1  Bcast:10.0.0.255  Mask:255.255.255.0";
        assert_eq!(
            rules.inet_address.extract(legacy).unwrap(),
            Some(Ipv4Addr::new(10, 0, 0, 1))
        );
        assert_eq!(
            rules.hardware_address.extract(legacy).unwrap().unwrap().to_string(),
            "52:54:00:aa:bb:cc"
        );

        let modern = "netBr1: flags=4163<UP>  mtu 1500\n        inet 10.0.0.1  netmask 255.255.255.0\n        ether 52:54:00:aa:bb:cc  txqueuelen 1000";
        assert_eq!(
            rules.inet_address.extract(modern).unwrap(),
            Some(Ipv4Addr::new(10, 0, 0, 1))
        );
        assert!(rules.hardware_address.extract(modern).unwrap().is_some());
    }

    #[test]
    fn test_prefixed_integers() {
        assert_eq!(parse_prefixed_integer("42"), Ok(42));
        assert_eq!(parse_prefixed_integer("0X2A"), Ok(42));
        assert_eq!(parse_prefixed_integer("0o52"), Ok(42));
        assert_eq!(parse_prefixed_integer("0b101010"), Ok(42));
        assert!(parse_prefixed_integer("0x").is_err());
    }

    #[test]
    fn test_ipv4_with_prefix_length() {
        assert_eq!(parse_ipv4("10.0.0.1/24"), Ok(Ipv4Addr::new(10, 0, 0, 1)));
        assert!(parse_ipv4("10.0.0").is_err());
    }

    #[test]
    fn test_pattern_without_capture_group_rejected() {
        let err = ExtractionRule::interface_mac(r"address is \S+").unwrap_err();
        assert!(matches!(err, ProvisionError::Config(_)));
    }
}
