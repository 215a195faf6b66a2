use anyhow::{anyhow, Result};
use chrono::{DateTime, Local, NaiveDate, Utc};

/// This is the standard way of converting a date to a string in focusclock. Rollover markers are
/// compared against it.
pub fn date_to_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Local calendar day of a utc instant.
pub fn local_day(moment: DateTime<Utc>) -> NaiveDate {
    moment.with_timezone(&Local).date_naive()
}

/// Stopwatch style rendering with centiseconds, e.g. `01:02:03.45`.
pub fn format_elapsed(ms: i64) -> String {
    let ms = ms.max(0);
    let centis = (ms / 10) % 100;
    let seconds = (ms / 1000) % 60;
    let minutes = (ms / 60_000) % 60;
    let hours = ms / 3_600_000;
    format!("{hours:02}:{minutes:02}:{seconds:02}.{centis:02}")
}

/// Compact rendering used for totals and targets.
pub fn format_duration(ms: i64) -> String {
    let seconds = ms.max(0) / 1000;
    let (h, m, s) = (seconds / 3600, (seconds / 60) % 60, seconds % 60);
    if h > 0 {
        format!("{h}h{m}m{s}s")
    } else if m > 0 {
        format!("{m}m{s}s")
    } else {
        format!("{s}s")
    }
}

/// Parses durations like `90m`, `1h30m`, `45s` or `1h 5m 3s` into milliseconds. A bare number is
/// taken as minutes.
pub fn parse_duration_ms(input: &str) -> Result<i64> {
    let input = input.trim();
    if input.is_empty() {
        return Err(anyhow!("Empty duration"));
    }
    let too_large = || anyhow!("Duration {input} is too large");
    if let Ok(minutes) = input.parse::<i64>() {
        return minutes.checked_mul(60_000).ok_or_else(too_large);
    }

    let mut total = 0i64;
    let mut number = String::new();
    for c in input.chars() {
        match c {
            '0'..='9' => number.push(c),
            ' ' => continue,
            'h' | 'm' | 's' => {
                let value = number
                    .parse::<i64>()
                    .map_err(|_| anyhow!("Can't parse {input} into a duration"))?;
                number.clear();
                let unit = match c {
                    'h' => 3_600_000,
                    'm' => 60_000,
                    _ => 1000,
                };
                total = value
                    .checked_mul(unit)
                    .and_then(|ms| total.checked_add(ms))
                    .ok_or_else(too_large)?;
            }
            _ => return Err(anyhow!("Unexpected '{c}' in duration {input}")),
        }
    }
    if !number.is_empty() {
        return Err(anyhow!("Missing unit at the end of {input}"));
    }
    Ok(total)
}
