//! DATE, DATETIME/TIMESTAMP and TIME values.
//!
//! Both row encodings decode into the same sub-field structures. The text
//! forms are `YYYY-MM-DD`, `YYYY-MM-DD hh:mm:ss[.ffffff]` and
//! `[-]hhh:mm:ss[.ffffff]`; the binary forms are length-prefixed with
//! lengths 0/4/7/11 (date-like) and 0/8/12 (TIME).

#![allow(clippy::cast_possible_truncation)]

use std::fmt;

use sqlwire_core::{Result, Value};

use crate::config::ZeroDateTimeBehavior;
use crate::error::protocol_error_with_data;
use crate::protocol::PacketWriter;

const MICROS_PER_SECOND: i64 = 1_000_000;
const SECONDS_PER_DAY: i64 = 86_400;

/// Calendar date as sent by the server; month and day may be zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct MySqlDate {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

/// Date plus time of day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct MySqlDateTime {
    pub date: MySqlDate,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub microsecond: u32,
}

/// Signed duration; TIME ranges over roughly +/- 838 hours.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MySqlTime {
    pub negative: bool,
    pub days: u32,
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub microseconds: u32,
}

impl MySqlDate {
    pub const ZERO: MySqlDate = MySqlDate {
        year: 0,
        month: 0,
        day: 0,
    };

    pub fn new(year: u16, month: u8, day: u8) -> Self {
        Self { year, month, day }
    }

    /// `0000-00-00`.
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Parse `YYYY-MM-DD`.
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.trim().splitn(3, '-');
        let year = parts.next()?.parse().ok()?;
        let month = parts.next()?.parse().ok()?;
        let day = parts.next()?.parse().ok()?;
        Some(Self { year, month, day })
    }

    /// Binary form: 0 bytes (zero date) or at least 4 bytes of y/m/d.
    pub fn decode_binary(data: &[u8]) -> Result<Self> {
        match data.len() {
            0 => Ok(Self::ZERO),
            n if n >= 4 => Ok(Self {
                year: u16::from_le_bytes([data[0], data[1]]),
                month: data[2],
                day: data[3],
            }),
            _ => Err(protocol_error_with_data("Invalid binary DATE length", data)),
        }
    }

    /// Days since 1970-01-01 (proleptic Gregorian).
    pub fn to_days(&self) -> i32 {
        days_from_civil(
            i64::from(self.year),
            i64::from(self.month),
            i64::from(self.day),
        ) as i32
    }

    pub fn from_days(days: i32) -> Self {
        let (year, month, day) = civil_from_days(i64::from(days));
        Self {
            year: year.clamp(0, 9999) as u16,
            month: month as u8,
            day: day as u8,
        }
    }

    pub(crate) fn encode_binary(&self, writer: &mut PacketWriter) {
        if self.is_zero() {
            writer.write_u8(0);
        } else {
            writer.write_u8(4);
            writer.write_u16_le(self.year);
            writer.write_u8(self.month);
            writer.write_u8(self.day);
        }
    }
}

impl fmt::Display for MySqlDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

impl MySqlDateTime {
    pub fn new(date: MySqlDate, hour: u8, minute: u8, second: u8, microsecond: u32) -> Self {
        Self {
            date,
            hour,
            minute,
            second,
            microsecond,
        }
    }

    /// Zero date part; the time of day is not consulted.
    pub fn is_zero(&self) -> bool {
        self.date.is_zero()
    }

    /// Parse `YYYY-MM-DD[ hh:mm:ss[.ffffff]]`. A `T` separator is accepted.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let (date, time) = match text.find([' ', 'T']) {
            Some(i) => (&text[..i], Some(&text[i + 1..])),
            None => (text, None),
        };
        let date = MySqlDate::parse(date)?;
        let Some(time) = time else {
            return Some(Self::new(date, 0, 0, 0, 0));
        };
        let (clock, microsecond) = split_fraction(time)?;
        let mut parts = clock.splitn(3, ':');
        let hour = parts.next()?.parse().ok()?;
        let minute = parts.next()?.parse().ok()?;
        let second = parts.next().map_or(Some(0), |s| s.parse().ok())?;
        Some(Self::new(date, hour, minute, second, microsecond))
    }

    pub fn decode_binary(data: &[u8]) -> Result<Self> {
        let date = MySqlDate::decode_binary(data)?;
        let mut value = Self::new(date, 0, 0, 0, 0);
        if data.len() >= 7 {
            value.hour = data[4];
            value.minute = data[5];
            value.second = data[6];
        } else if data.len() > 4 {
            return Err(protocol_error_with_data("Invalid binary DATETIME length", data));
        }
        if data.len() >= 11 {
            value.microsecond = u32::from_le_bytes([data[7], data[8], data[9], data[10]]);
        } else if data.len() > 7 {
            return Err(protocol_error_with_data("Invalid binary DATETIME length", data));
        }
        Ok(value)
    }

    /// Microseconds since 1970-01-01 00:00:00, no time zone applied.
    pub fn to_micros(&self) -> i64 {
        let seconds = i64::from(self.date.to_days()) * SECONDS_PER_DAY
            + i64::from(self.hour) * 3600
            + i64::from(self.minute) * 60
            + i64::from(self.second);
        seconds * MICROS_PER_SECOND + i64::from(self.microsecond)
    }

    pub fn from_micros(micros: i64) -> Self {
        let seconds = micros.div_euclid(MICROS_PER_SECOND);
        let microsecond = micros.rem_euclid(MICROS_PER_SECOND) as u32;
        let days = seconds.div_euclid(SECONDS_PER_DAY);
        let of_day = seconds.rem_euclid(SECONDS_PER_DAY);
        Self {
            date: MySqlDate::from_days(days as i32),
            hour: (of_day / 3600) as u8,
            minute: (of_day % 3600 / 60) as u8,
            second: (of_day % 60) as u8,
            microsecond,
        }
    }

    pub(crate) fn encode_binary(&self, writer: &mut PacketWriter) {
        let has_time = self.hour != 0 || self.minute != 0 || self.second != 0;
        if self.is_zero() && !has_time && self.microsecond == 0 {
            writer.write_u8(0);
            return;
        }
        let len = if self.microsecond != 0 {
            11
        } else if has_time {
            7
        } else {
            4
        };
        writer.write_u8(len);
        writer.write_u16_le(self.date.year);
        writer.write_u8(self.date.month);
        writer.write_u8(self.date.day);
        if len >= 7 {
            writer.write_u8(self.hour);
            writer.write_u8(self.minute);
            writer.write_u8(self.second);
        }
        if len == 11 {
            writer.write_u32_le(self.microsecond);
        }
    }
}

impl fmt::Display for MySqlDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:02}:{:02}:{:02}",
            self.date, self.hour, self.minute, self.second
        )?;
        if self.microsecond != 0 {
            write!(f, ".{:06}", self.microsecond)?;
        }
        Ok(())
    }
}

impl MySqlTime {
    /// Parse `[-]hhh:mm:ss[.ffffff]`; hours may exceed 24.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let (negative, text) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let (clock, microseconds) = split_fraction(text)?;
        let mut parts = clock.splitn(3, ':');
        let hours: u32 = parts.next()?.parse().ok()?;
        let minutes = parts.next()?.parse().ok()?;
        let seconds = parts.next().map_or(Some(0), |s| s.parse().ok())?;
        Some(Self {
            negative,
            days: hours / 24,
            hours: (hours % 24) as u8,
            minutes,
            seconds,
            microseconds,
        })
    }

    /// Binary form: 0 bytes is 00:00:00, 8 without and 12 with microseconds.
    pub fn decode_binary(data: &[u8]) -> Result<Self> {
        match data.len() {
            0 => Ok(Self::default()),
            8 | 12 => Ok(Self {
                negative: data[0] != 0,
                days: u32::from_le_bytes([data[1], data[2], data[3], data[4]]),
                hours: data[5],
                minutes: data[6],
                seconds: data[7],
                microseconds: if data.len() == 12 {
                    u32::from_le_bytes([data[8], data[9], data[10], data[11]])
                } else {
                    0
                },
            }),
            _ => Err(protocol_error_with_data("Invalid binary TIME length", data)),
        }
    }

    /// Signed microseconds.
    pub fn to_micros(&self) -> i64 {
        let seconds = i64::from(self.days) * SECONDS_PER_DAY
            + i64::from(self.hours) * 3600
            + i64::from(self.minutes) * 60
            + i64::from(self.seconds);
        let micros = seconds * MICROS_PER_SECOND + i64::from(self.microseconds);
        if self.negative { -micros } else { micros }
    }

    pub fn from_micros(micros: i64) -> Self {
        let magnitude = micros.unsigned_abs();
        let seconds = magnitude / 1_000_000;
        Self {
            negative: micros < 0,
            days: (seconds / 86_400) as u32,
            hours: (seconds % 86_400 / 3600) as u8,
            minutes: (seconds % 3600 / 60) as u8,
            seconds: (seconds % 60) as u8,
            microseconds: (magnitude % 1_000_000) as u32,
        }
    }

    pub(crate) fn encode_binary(&self, writer: &mut PacketWriter) {
        if *self == Self::default() {
            writer.write_u8(0);
            return;
        }
        writer.write_u8(if self.microseconds == 0 { 8 } else { 12 });
        writer.write_u8(u8::from(self.negative));
        writer.write_u32_le(self.days);
        writer.write_u8(self.hours);
        writer.write_u8(self.minutes);
        writer.write_u8(self.seconds);
        if self.microseconds != 0 {
            writer.write_u32_le(self.microseconds);
        }
    }
}

impl fmt::Display for MySqlTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hours = self.days * 24 + u32::from(self.hours);
        if self.negative {
            f.write_str("-")?;
        }
        write!(f, "{:02}:{:02}:{:02}", hours, self.minutes, self.seconds)?;
        if self.microseconds != 0 {
            write!(f, ".{:06}", self.microseconds)?;
        }
        Ok(())
    }
}

/// Map a decoded DATE/DATETIME/TIMESTAMP to a value, applying the zero-date
/// policy. `date_only` selects the DATE representation and zero form.
pub fn date_time_value(
    value: MySqlDateTime,
    date_only: bool,
    behavior: ZeroDateTimeBehavior,
) -> Result<Value> {
    if value.is_zero() {
        return match behavior {
            ZeroDateTimeBehavior::ConvertToNull => Ok(Value::Null),
            ZeroDateTimeBehavior::PassThrough => Ok(Value::Text(if date_only {
                "0000-00-00".to_string()
            } else {
                "0000-00-00 00:00:00".to_string()
            })),
            ZeroDateTimeBehavior::Exception => Err(sqlwire_core::Error::Type(
                sqlwire_core::TypeError {
                    expected: if date_only { "DATE" } else { "DATETIME" },
                    actual: format!("zero value {}", value),
                    column: None,
                    rust_type: None,
                },
            )),
        };
    }
    Ok(if date_only {
        Value::Date(value.date.to_days())
    } else {
        Value::Timestamp(value.to_micros())
    })
}

/// Split off an optional `.ffffff` fraction, right-padding it to
/// microseconds.
fn split_fraction(text: &str) -> Option<(&str, u32)> {
    match text.split_once('.') {
        None => Some((text, 0)),
        Some((clock, fraction)) => {
            let digits: String = fraction.chars().take(6).collect();
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let scale = 10u32.pow(6 - digits.len() as u32);
            Some((clock, digits.parse::<u32>().ok()? * scale))
        }
    }
}

// Howard Hinnant's civil calendar algorithms.
fn days_from_civil(year: i64, month: i64, day: i64) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = y.div_euclid(400);
    let yoe = y - era * 400;
    let mp = (month + 9) % 12;
    let doy = (153 * mp + 2) / 5 + day - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146_097 + doe - 719_468
}

fn civil_from_days(days: i64) -> (i64, i64, i64) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = doy - (153 * mp + 2) / 5 + 1;
    let month = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}
