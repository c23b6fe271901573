//! Canonical textual form of mesh node addresses.
//!
//! Raw address bytes are rendered as lowercase hex in 4-digit groups joined
//! by colons. Every all-zero group that is followed by another group is
//! elided, the remaining groups drop leading zeros, and any run of two or
//! more colons collapses to `::`. A short final group is kept verbatim.
//!
//! Unlike RFC 5952 formatting, every zero run is elided, so an address
//! with two separate zero runs renders with two `::` markers. Mesh node
//! addresses seen in practice have a single zero run.

use std::fmt;

/// Normalized colon-separated, zero-elided address text.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CanonicalAddress(String);

impl CanonicalAddress {
    /// Renders raw address bytes.
    ///
    /// Byte slices whose hex length is not a multiple of four are grouped
    /// as-is: the final group is short and never padded.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
        let groups: Vec<&str> = hex
            .as_bytes()
            .chunks(4)
            .map(|chunk| std::str::from_utf8(chunk).unwrap_or_default())
            .collect();
        Self(normalize_groups(&groups))
    }

    /// Canonicalizes existing address text. Already-canonical input is
    /// returned unchanged.
    pub fn parse(text: &str) -> Self {
        let lowered = text.trim().to_ascii_lowercase();
        let groups: Vec<&str> = lowered.split(':').collect();
        Self(normalize_groups(&groups))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for CanonicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn normalize_groups(groups: &[&str]) -> String {
    let last = groups.len().saturating_sub(1);
    let rendered: Vec<&str> = groups
        .iter()
        .enumerate()
        .map(|(idx, group)| {
            if idx == last && group.len() < 4 {
                return *group;
            }
            let trimmed = group.trim_start_matches('0');
            match (group.is_empty(), trimmed.is_empty(), idx == last) {
                (true, _, _) => "",
                (false, true, false) => "",
                (false, true, true) => "0",
                (false, false, _) => trimmed,
            }
        })
        .collect();

    collapse_colons(&rendered.join(":"))
}

fn collapse_colons(joined: &str) -> String {
    let mut out = String::with_capacity(joined.len());
    let mut run = 0usize;

    for ch in joined.chars() {
        if ch == ':' {
            run += 1;
            continue;
        }
        push_colons(&mut out, run);
        run = 0;
        out.push(ch);
    }
    push_colons(&mut out, run);

    out
}

fn push_colons(out: &mut String, run: usize) {
    match run {
        0 => {}
        1 => out.push(':'),
        _ => out.push_str("::"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(hex: &str) -> Vec<u8> {
        (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).unwrap())
            .collect()
    }

    #[test]
    fn test_zero_run_collapses() {
        let addr = CanonicalAddress::from_bytes(&bytes("20010db8000000000000000000000001"));
        assert_eq!(addr.as_str(), "2001:db8::1");
    }

    #[test]
    fn test_no_zero_groups() {
        let addr = CanonicalAddress::from_bytes(&bytes("20010db8000102030405060708090a0b"));
        assert_eq!(addr.as_str(), "2001:db8:1:203:405:607:809:a0b");
    }

    #[test]
    fn test_leading_zero_run() {
        let addr = CanonicalAddress::from_bytes(&bytes("00000000000000000000000000000001"));
        assert_eq!(addr.as_str(), "::1");
    }

    #[test]
    fn test_trailing_zero_group_is_kept() {
        let addr = CanonicalAddress::from_bytes(&bytes("fe800000000000000000000000000000"));
        assert_eq!(addr.as_str(), "fe80::0");
    }

    #[test]
    fn test_every_zero_run_is_elided() {
        let addr = CanonicalAddress::from_bytes(&bytes("00010000000000020000000000000003"));
        assert_eq!(addr.as_str(), "1::2::3");
    }

    #[test]
    fn test_short_final_group_is_not_padded() {
        let addr = CanonicalAddress::from_bytes(&[0xfd, 0x12, 0xab]);
        assert_eq!(addr.as_str(), "fd12:ab");
    }

    #[test]
    fn test_short_final_group_keeps_leading_zeros() {
        let addr = CanonicalAddress::from_bytes(&[0x20, 0x01, 0x00]);
        assert_eq!(addr.as_str(), "2001:00");
        assert_eq!(CanonicalAddress::parse(addr.as_str()), addr);

        let addr = CanonicalAddress::from_bytes(&[0xfd, 0x00, 0x00, 0x00, 0x05]);
        assert_eq!(addr.as_str(), "fd00::05");
        assert_eq!(CanonicalAddress::parse(addr.as_str()), addr);
    }

    #[test]
    fn test_empty_bytes() {
        assert_eq!(CanonicalAddress::from_bytes(&[]).as_str(), "");
    }

    #[test]
    fn test_parse_is_idempotent() {
        let samples = [
            "20010db8000000000000000000000001",
            "20010db8000102030405060708090a0b",
            "fe800000000000000000000000000000",
            "00000000000000000000000000000001",
            "fd00000000000000020d6ffffe0a1b2c",
        ];

        for sample in samples {
            let once = CanonicalAddress::from_bytes(&bytes(sample));
            let twice = CanonicalAddress::parse(once.as_str());
            assert_eq!(once, twice, "sample {}", sample);
        }
    }

    #[test]
    fn test_parse_uncompressed_text() {
        let addr = CanonicalAddress::parse("2001:0DB8:0000:0000:0000:0000:0000:0001");
        assert_eq!(addr.as_str(), "2001:db8::1");
    }
}
