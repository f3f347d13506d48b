//! Serde adapters for values that are more readable as strings.

/// `UtcOffset` as `"+02:00"`. `"UTC"` and `"Z"` are accepted on input.
pub(crate) mod offset {
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};
    use time::UtcOffset;
    use time::format_description::BorrowedFormatItem;
    use time::macros::format_description;

    const FORMAT: &[BorrowedFormatItem<'static>] = format_description!("[offset_hour sign:mandatory]:[offset_minute]");

    pub(crate) fn parse(s: &str) -> Result<UtcOffset, String> {
        match s.trim() {
            "UTC" | "utc" | "Z" | "z" => Ok(UtcOffset::UTC),
            other => UtcOffset::parse(other, FORMAT).map_err(|e| format!("invalid UTC offset `{other}`: {e}")),
        }
    }

    pub(crate) fn serialize<S: Serializer>(offset: &UtcOffset, serializer: S) -> Result<S::Ok, S::Error> {
        let formatted = offset.format(FORMAT).map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&formatted)
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<UtcOffset, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(D::Error::custom)
    }
}

/// Permission bits as an octal string, `"2775"` or `"0o2775"`.
///
/// A bare integer is read digit for digit as octal too, since environment
/// variables such as `CAPSTORE_SERVICE__MODE=2770` arrive as numbers.
pub(crate) mod octal {
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Str(String),
    }

    pub(crate) fn parse(s: &str) -> Result<u32, String> {
        let digits = s.trim().trim_start_matches("0o");
        let mode = u32::from_str_radix(digits, 8).map_err(|e| format!("invalid octal mode `{s}`: {e}"))?;
        if mode > 0o7777 {
            return Err(format!("mode `{s}` has bits outside 0o7777"));
        }
        Ok(mode)
    }

    pub(crate) fn serialize<S: Serializer>(mode: &u32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{mode:o}"))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Int(digits) => parse(&digits.to_string()),
            Raw::Str(raw) => parse(&raw),
        }
        .map_err(D::Error::custom)
    }
}
