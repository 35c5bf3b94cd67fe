//! Serde helpers for backend payloads.
//!
//! MI results are string typed (`"level": "0"`, `"enabled": "y"`), while
//! some bridges re-encode them as JSON numbers and booleans. Both forms are
//! accepted.

use serde::{Deserialize, Deserializer, de};

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(u64),
    String(String),
}

fn parse_number<E: de::Error>(value: NumberOrString) -> Result<u64, E> {
    match value {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::String(s) => s
            .trim()
            .parse()
            .map_err(|_| E::custom(format!("expected a number, got {s:?}"))),
    }
}

pub(crate) fn number<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u64>,
{
    let n = parse_number(NumberOrString::deserialize(deserializer)?)?;
    T::try_from(n).map_err(|_| de::Error::custom(format!("number {n} out of range")))
}

pub(crate) fn optional_number<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u64>,
{
    match Option::<NumberOrString>::deserialize(deserializer)? {
        None => Ok(None),
        // "<MULTIPLE>" style placeholders carry no line
        Some(NumberOrString::String(s)) if s.trim().parse::<u64>().is_err() => Ok(None),
        Some(value) => {
            let n = parse_number(value)?;
            T::try_from(n)
                .map(Some)
                .map_err(|_| de::Error::custom(format!("number {n} out of range")))
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Flag {
    Bool(bool),
    String(String),
}

/// `"y"`/`"n"` or a JSON boolean.
pub(crate) fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => Ok(b),
        Flag::String(s) => match s.as_str() {
            "y" | "yes" | "true" => Ok(true),
            "n" | "no" | "false" => Ok(false),
            other => Err(de::Error::custom(format!("expected y/n, got {other:?}"))),
        },
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Sample {
        #[serde(deserialize_with = "super::number")]
        level: usize,
        #[serde(default, deserialize_with = "super::optional_number")]
        line: Option<u32>,
        #[serde(deserialize_with = "super::flag")]
        enabled: bool,
    }

    #[test]
    fn accepts_mi_strings() {
        let s: Sample =
            serde_json::from_str(r#"{"level": "3", "line": "42", "enabled": "n"}"#).unwrap();
        assert_eq!(s.level, 3);
        assert_eq!(s.line, Some(42));
        assert!(!s.enabled);
    }

    #[test]
    fn accepts_json_scalars() {
        let s: Sample = serde_json::from_str(r#"{"level": 0, "enabled": true}"#).unwrap();
        assert_eq!(s.level, 0);
        assert_eq!(s.line, None);
        assert!(s.enabled);
    }

    #[test]
    fn placeholder_line_is_none() {
        let s: Sample =
            serde_json::from_str(r#"{"level": "0", "line": "<MULTIPLE>", "enabled": "y"}"#)
                .unwrap();
        assert_eq!(s.line, None);
    }

    #[test]
    fn rejects_garbage_level() {
        let res = serde_json::from_str::<Sample>(r#"{"level": "top", "enabled": "y"}"#);
        assert!(res.is_err());
    }
}
