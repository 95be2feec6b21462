//! Room codes - short human-shareable room addresses

use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Code length in characters.
pub const CODE_LEN: usize = 6;

/// Alphabet without the lookalikes 0/O and 1/I.
const ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZ";

/// A short, human-shareable room address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomCode(String);

impl RoomCode {
    /// Generate a fresh random code.
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        let code: String = (0..CODE_LEN)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Extract a room code from a share string.
    ///
    /// Accepted forms, first present wins:
    /// 1. query parameter: `?room=AB3F9K`
    /// 2. fragment parameter: `#room=AB3F9K`
    /// 3. path segment: `/room/AB3F9K`
    pub fn from_share_string(input: &str) -> Option<Self> {
        if let Some(code) = find_param(input, '?', "room=") {
            return code.parse().ok();
        }
        if let Some(code) = find_param(input, '#', "room=") {
            return code.parse().ok();
        }
        if let Some(rest) = input.split("/room/").nth(1) {
            let segment: &str = rest
                .split(|c: char| c == '/' || c == '?' || c == '#')
                .next()
                .unwrap_or("");
            return segment.parse().ok();
        }
        None
    }
}

/// Find `key` inside the section of `input` starting at `marker`.
fn find_param<'a>(input: &'a str, marker: char, key: &str) -> Option<&'a str> {
    let section = input.split(marker).nth(1)?;
    // The fragment begins after '?', so strip a trailing fragment from the query
    let section = section.split('#').next().unwrap_or(section);
    for pair in section.split('&') {
        if let Some(value) = pair.strip_prefix(key) {
            return Some(value);
        }
    }
    None
}

impl FromStr for RoomCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let valid = upper.len() == CODE_LEN
            && upper.bytes().all(|b| ALPHABET.contains(&b));
        if valid {
            Ok(Self(upper))
        } else {
            Err(Error::InvalidRoomCode(s.to_string()))
        }
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_is_valid() {
        for _ in 0..50 {
            let code = RoomCode::random();
            assert!(code.as_str().parse::<RoomCode>().is_ok());
        }
    }

    #[test]
    fn test_parse_normalizes_case() {
        let code: RoomCode = "ab3f9k".parse().unwrap();
        assert_eq!(code.as_str(), "AB3F9K");
    }

    #[test]
    fn test_parse_rejects_bad_codes() {
        assert!("".parse::<RoomCode>().is_err());
        assert!("AB3F9".parse::<RoomCode>().is_err());
        assert!("AB3F9O".parse::<RoomCode>().is_err()); // contains O
        assert!("AB3F91".parse::<RoomCode>().is_err()); // contains 1
    }

    #[test]
    fn test_share_string_query() {
        let code = RoomCode::from_share_string("https://x.test/join?room=AB3F9K").unwrap();
        assert_eq!(code.as_str(), "AB3F9K");
    }

    #[test]
    fn test_share_string_fragment() {
        let code = RoomCode::from_share_string("https://x.test/join#room=AB3F9K").unwrap();
        assert_eq!(code.as_str(), "AB3F9K");
    }

    #[test]
    fn test_share_string_path() {
        let code = RoomCode::from_share_string("https://x.test/room/AB3F9K/board").unwrap();
        assert_eq!(code.as_str(), "AB3F9K");
    }

    #[test]
    fn test_share_string_precedence() {
        // Query beats fragment beats path
        let code =
            RoomCode::from_share_string("https://x.test/room/CCCCCC?room=AB3F9K#room=DDDDDD")
                .unwrap();
        assert_eq!(code.as_str(), "AB3F9K");

        let code = RoomCode::from_share_string("https://x.test/room/CCCCCC#room=DDDDDD").unwrap();
        assert_eq!(code.as_str(), "DDDDDD");
    }

    #[test]
    fn test_share_string_none() {
        assert!(RoomCode::from_share_string("https://x.test/lobby").is_none());
    }
}
