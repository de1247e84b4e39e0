use crate::protocol::TELEMETRY_FRAME_LEN;
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

/// One decoded telemetry notification
///
/// Frame layout after the per-byte `-1` correction:
/// - Bytes 3-5: elapsed hours, minutes, seconds
/// - Bytes 6-7: speed (`100*hi + lo`, 0.1 km/h)
/// - Bytes 8-9: cadence in rpm
/// - Bytes 10-11: distance (0.1 km)
/// - Bytes 12-13: calories (kcal)
/// - Bytes 14-15: heart rate (bpm)
/// - Bytes 16-17: power (0.1 W)
/// - Byte 18: resistance level
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Elapsed hours
    pub hours: u8,
    /// Elapsed minutes within the hour
    pub minutes: u8,
    /// Elapsed seconds within the minute
    pub seconds: u8,
    /// Speed in km/h
    pub speed: f32,
    /// Pedal cadence
    pub rpm: u16,
    /// Distance in km
    pub distance: f32,
    /// Energy in kcal
    pub calories: u16,
    /// Heart rate in bpm
    pub heart_rate: u16,
    /// Power in watts
    pub watt: f32,
    /// Resistance level reported by the console
    pub level: u8,
}

impl TelemetrySample {
    /// Whole minutes elapsed, used to index the level schedule
    #[must_use]
    pub fn elapsed_minute(&self) -> u32 {
        u32::from(self.minutes) + 60 * u32::from(self.hours)
    }

    /// Elapsed session time
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        Duration::from_secs(
            u64::from(self.hours) * 3600 + u64::from(self.minutes) * 60 + u64::from(self.seconds),
        )
    }
}

impl fmt::Display for TelemetrySample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}:{:02}",
            self.hours, self.minutes, self.seconds
        )
    }
}

/// Decode a 21-byte telemetry frame
///
/// The console adds 1 to every byte so no zero appears mid-frame; a zero byte
/// (never sent by a healthy console) decodes as 0 rather than wrapping.
#[must_use]
pub fn parse_telemetry(raw: &[u8; TELEMETRY_FRAME_LEN]) -> TelemetrySample {
    let data = raw.map(|b| b.saturating_sub(1));
    let pair = |hi: usize| 100 * u16::from(data[hi]) + u16::from(data[hi + 1]);

    TelemetrySample {
        hours: data[3],
        minutes: data[4],
        seconds: data[5],
        speed: f32::from(pair(6)) / 10.0,
        rpm: pair(8),
        distance: f32::from(pair(10)) / 10.0,
        calories: pair(12),
        heart_rate: pair(14),
        watt: f32::from(pair(16)) / 10.0,
        level: data[18],
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build an encoded frame the way the console does
    pub(crate) fn encode_frame(
        (hours, minutes, seconds): (u8, u8, u8),
        speed_tenths: u16,
        rpm: u16,
        distance_tenths: u16,
        calories: u16,
        heart_rate: u16,
        watt_tenths: u16,
        level: u8,
    ) -> [u8; TELEMETRY_FRAME_LEN] {
        let mut data = [0u8; TELEMETRY_FRAME_LEN];
        let mut put_pair = |at: usize, value: u16| {
            data[at] = u8::try_from(value / 100).unwrap();
            data[at + 1] = u8::try_from(value % 100).unwrap();
        };
        put_pair(6, speed_tenths);
        put_pair(8, rpm);
        put_pair(10, distance_tenths);
        put_pair(12, calories);
        put_pair(14, heart_rate);
        put_pair(16, watt_tenths);
        data[3] = hours;
        data[4] = minutes;
        data[5] = seconds;
        data[18] = level;
        data.map(|b| b + 1)
    }

    #[test]
    fn test_parse_telemetry() {
        let raw = encode_frame((0, 12, 34), 153, 80, 24, 120, 140, 955, 8);
        let sample = parse_telemetry(&raw);

        assert_eq!(sample.hours, 0);
        assert_eq!(sample.minutes, 12);
        assert_eq!(sample.seconds, 34);
        assert_eq!(sample.speed, 15.3);
        assert_eq!(sample.rpm, 80);
        assert_eq!(sample.distance, 2.4);
        assert_eq!(sample.calories, 120);
        assert_eq!(sample.heart_rate, 140);
        assert_eq!(sample.watt, 95.5);
        assert_eq!(sample.level, 8);
    }

    #[test]
    fn test_pair_combination() {
        // speed bytes 0x02 0x36 -> 1*100 + 53 = 153 -> 15.3 km/h
        let mut raw = [1u8; TELEMETRY_FRAME_LEN];
        raw[6] = 0x02;
        raw[7] = 0x36;
        let sample = parse_telemetry(&raw);
        assert_eq!(sample.speed, 15.3);
        assert_eq!(sample.rpm, 0);
    }

    #[test]
    fn test_zero_bytes_do_not_wrap() {
        let sample = parse_telemetry(&[0u8; TELEMETRY_FRAME_LEN]);
        assert_eq!(sample.level, 0);
        assert_eq!(sample.heart_rate, 0);
    }

    #[test]
    fn test_elapsed_minute() {
        let sample = parse_telemetry(&encode_frame((1, 5, 59), 0, 0, 0, 0, 0, 0, 1));
        assert_eq!(sample.elapsed_minute(), 65);
        assert_eq!(sample.elapsed(), Duration::from_secs(3600 + 5 * 60 + 59));
        assert_eq!(sample.to_string(), "01:05:59");
    }
}
