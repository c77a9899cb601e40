use std::time::Duration;

use crate::error::ProbeError;

/// Decoded query string of a probe request.
///
/// Parameters may repeat; list parameters additionally accept comma separated
/// values (`workspace=a,b&workspace=c`).
#[derive(Debug, Clone, Default)]
pub struct QueryParams {
    pairs: Vec<(String, String)>,
}

impl QueryParams {
    pub fn from_raw(raw: Option<&str>) -> Self {
        let pairs = raw
            .unwrap_or_default()
            .split('&')
            .filter(|part| !part.is_empty())
            .map(|part| {
                let (key, value) = part.split_once('=').unwrap_or((part, ""));
                (decode(key), decode(value))
            })
            .collect();
        Self { pairs }
    }

    fn values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.pairs
            .iter()
            .filter(move |(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// First value of `name`, trimmed; empty values count as absent.
    pub fn get<'a>(&'a self, name: &str) -> Option<&'a str> {
        self.pairs
            .iter()
            .filter(|(key, _)| key == name)
            .map(|(_, value)| value.trim())
            .find(|v| !v.is_empty())
    }

    pub fn get_list(&self, name: &str) -> Vec<String> {
        self.values(name)
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn get_list_required(&self, name: &str) -> Result<Vec<String>, ProbeError> {
        let list = self.get_list(name);
        if list.is_empty() {
            return Err(ProbeError::ClientInput(format!(
                "parameter \"{name}\" is missing"
            )));
        }
        Ok(list)
    }

    pub fn get_bool(&self, name: &str) -> Result<bool, ProbeError> {
        match self.get(name).map(str::to_ascii_lowercase).as_deref() {
            None | Some("0" | "false" | "no" | "off") => Ok(false),
            Some("1" | "true" | "yes" | "on") => Ok(true),
            Some(other) => Err(ProbeError::ClientInput(format!(
                "parameter \"{name}\" has invalid boolean value \"{other}\""
            ))),
        }
    }

    pub fn get_usize(&self, name: &str) -> Result<Option<usize>, ProbeError> {
        self.get(name)
            .map(|v| {
                v.parse::<usize>().map_err(|_| {
                    ProbeError::ClientInput(format!("parameter \"{name}\" is not a number: \"{v}\""))
                })
            })
            .transpose()
    }

    pub fn get_duration(&self, name: &str) -> Result<Option<Duration>, ProbeError> {
        self.get(name)
            .map(|v| {
                parse_duration(v).map_err(|e| {
                    ProbeError::ClientInput(format!("parameter \"{name}\" is invalid: {e}"))
                })
            })
            .transpose()
    }
}

fn decode(part: &str) -> String {
    let spaced = part.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .unwrap_or(spaced)
}

/// Parse durations like `90s`, `5m`, `1h30m` or `250ms`. A bare `0` is zero.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let input = input.trim();
    if input == "0" {
        return Ok(Duration::ZERO);
    }
    if input.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut total_secs = 0.0;
    let mut num_str = String::new();
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c.is_ascii_digit() || c == '.' {
            num_str.push(c);
            continue;
        }
        let num: f64 = num_str
            .parse()
            .map_err(|_| format!("invalid duration number: {num_str}"))?;
        num_str.clear();
        total_secs += match c {
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                num / 1000.0
            }
            's' => num,
            'm' => num * 60.0,
            'h' => num * 3600.0,
            _ => return Err(format!("unknown duration unit: {c}")),
        };
    }

    if !num_str.is_empty() {
        return Err(format!("missing unit in duration {input}"));
    }
    Duration::try_from_secs_f64(total_secs).map_err(|e| format!("duration {input} out of range: {e}"))
}
