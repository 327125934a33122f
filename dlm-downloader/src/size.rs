use core::fmt;
use std::str::FromStr;

/// A byte count parsed from a human-friendly string such as `10MB` or
/// `512 K`. Suffixes are powers of 1024; a missing suffix means bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct Size(i64);

impl Size {
    pub(crate) fn bytes(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 < 1024 {
            return write!(f, "{}B", self.0);
        }

        let mut value = self.0 as f64 / 1024.0;
        let mut suffix = "KB";
        if value >= 1024.0 {
            value /= 1024.0;
            suffix = "MB";
        }
        if value >= 1024.0 {
            value /= 1024.0;
            suffix = "GB";
        }

        write!(f, "{value:.2}{suffix}")
    }
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum SizeParseError {
    #[error("error parsing number {0:?}")]
    Number(String),
    #[error("invalid size suffix {0:?}")]
    Suffix(String),
}

impl FromStr for Size {
    type Err = SizeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if !s.starts_with(|c: char| c.is_ascii_digit() || c == '.') {
            return Err(SizeParseError::Number(s.to_owned()));
        }

        let mut last_digit = 0;
        for (i, c) in s.char_indices() {
            if c.is_ascii_digit() || c == '.' {
                last_digit = i;
                continue;
            }
            if c == ' ' {
                continue;
            }
            break;
        }

        let number_portion = &s[..=last_digit];
        let number: f64 = number_portion
            .parse()
            .map_err(|_| SizeParseError::Number(number_portion.to_owned()))?;

        let unit = s[last_digit + 1..].trim().to_ascii_uppercase();
        let unit = unit.as_bytes();

        // A leading `B` means plain bytes; anything after it is ignored, like
        // the flag parser this replaces.
        if unit.is_empty() || unit[0] == b'B' {
            return Ok(Size(number as i64));
        }

        if unit.len() > 2 || (unit.len() > 1 && unit[1] != b'B') {
            return Err(SizeParseError::Suffix(String::from_utf8_lossy(unit).into_owned()));
        }

        let multiplier = match unit[0] {
            b'K' => 1024.0,
            b'M' => 1024.0 * 1024.0,
            b'G' => 1024.0 * 1024.0 * 1024.0,
            b'T' => 1024.0 * 1024.0 * 1024.0 * 1024.0,
            _ => return Err(SizeParseError::Suffix(String::from_utf8_lossy(unit).into_owned())),
        };

        Ok(Size((number * multiplier) as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_sizes_with_and_without_suffixes() {
        let cases: &[(&str, i64)] = &[
            ("123", 123),
            ("123B", 123),
            ("1KB", 1024),
            ("1KB ", 1024),
            ("1.5KB", 1536),
            ("2MB", 2 * 1024 * 1024),
            ("0.5MB", 524_288),
            ("1GB", 1024 * 1024 * 1024),
            ("1.5GB", (1.5 * 1024.0 * 1024.0 * 1024.0) as i64),
            ("1TB", 1024 * 1024 * 1024 * 1024),
            ("1.5TB", (1.5 * 1024.0 * 1024.0 * 1024.0 * 1024.0) as i64),
            ("100", 100),
            ("100 B", 100),
            ("100K", 102_400),
            ("100M", 104_857_600),
            ("100G", 107_374_182_400),
            ("100T", 109_951_162_777_600),
        ];

        for (input, expected) in cases {
            let parsed: Size = input.parse().unwrap_or_else(|e| panic!("{input}: {e}"));
            assert_eq!(parsed.bytes(), *expected, "{input}");
        }
    }

    #[test]
    fn rejects_unknown_and_malformed_suffixes() {
        for input in ["1PB", "abc", "1XB", "1.2.3KB", "1KBB", ""] {
            assert!(input.parse::<Size>().is_err(), "{input}");
        }
    }

    #[test]
    fn canonical_strings_round_trip() {
        for input in ["100B", "1.00KB", "1.50KB", "2.00MB", "1.00GB"] {
            let parsed: Size = input.parse().expect(input);
            assert_eq!(parsed.to_string(), input);

            let reparsed: Size = parsed.to_string().parse().expect(input);
            assert_eq!(reparsed, parsed);
        }
    }
}
