//! Date/time wire encodings (§4.2): TDS's own numeric conventions for `DATE`, `TIMEN`,
//! `DATETIME2`, `DATETIMEOFFSET`, `DATETIME` and `SMALLDATETIME`, converted to and from `chrono`
//! types. Gated behind the `chrono` feature, same as the rest of the crate's temporal surface.

use bytes::{Buf, Bytes};
use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::{err_protocol, Error};

/// TDS counts days from `0001-01-01`. `chrono::NaiveDate` is pure proleptic Gregorian, which is
/// exactly the calendar the wire format assumes — no Julian/Gregorian cutover correction is
/// needed on this stack (see DESIGN.md's Open Question entry).
fn ce_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1, 1, 1).expect("0001-01-01 is representable")
}

fn datetime_epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1900, 1, 1).expect("1900-01-01 is representable")
}

/// Byte width of the nanos-since-midnight field for a given `TIME`/`DATETIME2`/`DATETIMEOFFSET`
/// scale (fractional-second digits), per §4.2.
pub(crate) fn scale_byte_len(scale: u8) -> Result<usize, Error> {
    Ok(match scale {
        0..=2 => 3,
        3..=4 => 4,
        5..=7 => 5,
        _ => return Err(err_protocol!("invalid time scale {}", scale)),
    })
}

/// `DATE`: a 3-byte little-endian day count since `0001-01-01`.
pub(crate) fn read_date(buf: &mut Bytes) -> Result<NaiveDate, Error> {
    read_date_from(&buf.split_to(3))
}

fn read_date_from(raw: &[u8]) -> Result<NaiveDate, Error> {
    let days = u32::from(raw[0]) | (u32::from(raw[1]) << 8) | (u32::from(raw[2]) << 16);
    ce_epoch()
        .checked_add_signed(Duration::days(i64::from(days)))
        .ok_or_else(|| err_protocol!("DATE value {} days out of range", days))
}

/// `TIME(scale)`: a little-endian integer counting units of `10^(7-scale)` * 100ns since
/// midnight, `scale_byte_len(scale)` bytes wide.
pub(crate) fn read_time(buf: &mut Bytes, scale: u8) -> Result<NaiveTime, Error> {
    let len = scale_byte_len(scale)?;
    let mut raw: u64 = 0;
    for i in 0..len {
        raw |= u64::from(buf.get_u8()) << (8 * i);
    }

    let nanos = raw
        .checked_mul(10u64.pow(u32::from(7 - scale)))
        .and_then(|v| v.checked_mul(100))
        .ok_or_else(|| err_protocol!("TIME value overflowed while scaling to nanoseconds"))?;

    const NANOS_PER_DAY: u64 = 24 * 3600 * 1_000_000_000;
    if nanos >= NANOS_PER_DAY {
        return Err(err_protocol!("TIME value {} ns is not within a single day", nanos));
    }

    let secs = (nanos / 1_000_000_000) as u32;
    let nano_part = (nanos % 1_000_000_000) as u32;
    NaiveTime::from_num_seconds_from_midnight_opt(secs, nano_part)
        .ok_or_else(|| err_protocol!("invalid TIME value"))
}

/// `DATETIME2(scale)`: a `TIME(scale)` followed by a `DATE`.
pub(crate) fn read_datetime2(buf: &mut Bytes, scale: u8) -> Result<NaiveDateTime, Error> {
    let time = read_time(buf, scale)?;
    let date = read_date(buf)?;
    Ok(NaiveDateTime::new(date, time))
}

/// `DATETIMEOFFSET(scale)`: a `DATETIME2(scale)` followed by a signed 2-byte minutes-offset,
/// applied to UTC. Returned as the offset paired with the (UTC) local datetime rather than a
/// `DateTime<FixedOffset>`, since the caller may want either the UTC instant or the original
/// wall-clock reading the server sent.
pub(crate) fn read_datetimeoffset(buf: &mut Bytes, scale: u8) -> Result<(NaiveDateTime, i16), Error> {
    let utc = read_datetime2(buf, scale)?;
    let offset_minutes = buf.get_i16_le();
    Ok((utc, offset_minutes))
}

/// `DATETIME` (8 bytes): 4-byte signed days-since-1900-01-01, then 4-byte ticks-since-midnight
/// at 1/300s resolution; `milliseconds = (ticks * 10 + 1) / 3`.
pub(crate) fn read_datetime(buf: &mut Bytes) -> Result<NaiveDateTime, Error> {
    let days = buf.get_i32_le();
    let ticks = buf.get_u32_le();

    let date = datetime_epoch()
        .checked_add_signed(Duration::days(i64::from(days)))
        .ok_or_else(|| err_protocol!("DATETIME value {} days out of range", days))?;

    let millis = (u64::from(ticks) * 10 + 1) / 3;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(
        (millis / 1000) as u32,
        ((millis % 1000) * 1_000_000) as u32,
    )
    .ok_or_else(|| err_protocol!("DATETIME tick count {} out of range", ticks))?;

    Ok(NaiveDateTime::new(date, time))
}

/// `SMALLDATETIME` (4 bytes): `u16` days-since-1900-01-01, then `u16` minutes-since-midnight.
pub(crate) fn read_smalldatetime(buf: &mut Bytes) -> Result<NaiveDateTime, Error> {
    let days = buf.get_u16_le();
    let minutes = buf.get_u16_le();

    let date = datetime_epoch()
        .checked_add_signed(Duration::days(i64::from(days)))
        .ok_or_else(|| err_protocol!("SMALLDATETIME value {} days out of range", days))?;

    let time = NaiveTime::from_hms_opt(u32::from(minutes / 60), u32::from(minutes % 60), 0)
        .ok_or_else(|| err_protocol!("SMALLDATETIME minute count {} out of range", minutes))?;

    Ok(NaiveDateTime::new(date, time))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_the_epoch_date() {
        let mut buf = Bytes::from_static(&[0, 0, 0]);
        assert_eq!(read_date(&mut buf).unwrap(), ce_epoch());
    }

    #[test]
    fn reads_a_known_date() {
        // 2024-01-15 is 738,900 days after 0001-01-01.
        let days = 738_900u32;
        let mut buf = Bytes::from(vec![
            (days & 0xFF) as u8,
            ((days >> 8) & 0xFF) as u8,
            ((days >> 16) & 0xFF) as u8,
        ]);
        let date = read_date(&mut buf).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
    }

    #[test]
    fn reads_midnight_at_scale_zero() {
        let mut buf = Bytes::from_static(&[0, 0, 0]);
        assert_eq!(read_time(&mut buf, 0).unwrap(), NaiveTime::from_hms_opt(0, 0, 0).unwrap());
    }

    #[test]
    fn reads_noon_at_full_scale() {
        // 12:00:00 is 12*3600*10^7 = 432_000_000_000 units of 100ns at scale 7.
        let units: u64 = 12 * 3600 * 10_000_000;
        let bytes = units.to_le_bytes()[..5].to_vec();
        let mut buf = Bytes::from(bytes);
        assert_eq!(read_time(&mut buf, 7).unwrap(), NaiveTime::from_hms_opt(12, 0, 0).unwrap());
    }

    #[test]
    fn rejects_a_time_that_overflows_a_day() {
        let units: u64 = 25 * 3600 * 10_000_000; // 25 hours, scale 7
        let bytes = units.to_le_bytes()[..5].to_vec();
        let mut buf = Bytes::from(bytes);
        assert!(read_time(&mut buf, 7).is_err());
    }

    #[test]
    fn reads_smalldatetime() {
        // 1900-01-01 + 1 day, 01:30.
        let mut buf = Bytes::from_static(&[1, 0, 90, 0]);
        let dt = read_smalldatetime(&mut buf).unwrap();
        assert_eq!(dt.date(), NaiveDate::from_ymd_opt(1900, 1, 2).unwrap());
        assert_eq!(dt.time(), NaiveTime::from_hms_opt(1, 30, 0).unwrap());
    }
}
