use crate::{
    error::{BikeError, Result},
    protocol::MAX_LEVEL,
};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Resistance-vs-time profiles offered by the workout menu
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProgramKind {
    /// Base level for the whole session
    Constant,
    /// One level up every `round(duration / 5)` minutes
    RampUp,
    /// Ramp up over the first half, mirror back down over the second
    RampUpDown,
    /// Repeating 5-minute block: base, base, base+2, base+2, base+4
    SteppedCycle,
    /// Base, base+1, plateau at base+2, base+1, base
    WarmupCooldown,
}

impl ProgramKind {
    /// All programs, in menu order
    pub const ALL: [Self; 5] = [
        Self::Constant,
        Self::RampUp,
        Self::RampUpDown,
        Self::SteppedCycle,
        Self::WarmupCooldown,
    ];

    /// Shortest session the program can be laid out over
    #[must_use]
    pub const fn minimum_duration(self) -> u32 {
        match self {
            Self::Constant | Self::SteppedCycle => 1,
            Self::RampUp => 3,
            Self::RampUpDown => 6,
            Self::WarmupCooldown => 4,
        }
    }

    /// Highest offset above the base level the program can reach
    fn headroom(self, duration_minutes: u32) -> u32 {
        match self {
            Self::Constant => 0,
            Self::RampUp => (duration_minutes - 1) / ramp_rate(duration_minutes, 5.0),
            Self::RampUpDown => {
                let rising = duration_minutes.div_ceil(2);
                (rising - 1) / ramp_rate(duration_minutes / 2, 5.0)
            }
            Self::SteppedCycle => 4,
            Self::WarmupCooldown => 2,
        }
    }
}

impl fmt::Display for ProgramKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant => write!(f, "constant"),
            Self::RampUp => write!(f, "ramp-up"),
            Self::RampUpDown => write!(f, "ramp-up-down"),
            Self::SteppedCycle => write!(f, "stepped-cycle"),
            Self::WarmupCooldown => write!(f, "warmup-cooldown"),
        }
    }
}

impl FromStr for ProgramKind {
    type Err = BikeError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_lowercase().replace(['_', ' '], "-");
        match normalized.as_str() {
            "constant" => Ok(Self::Constant),
            "ramp-up" | "program-1" => Ok(Self::RampUp),
            "ramp-up-down" | "program-2" => Ok(Self::RampUpDown),
            "stepped-cycle" | "program-3" => Ok(Self::SteppedCycle),
            "warmup-cooldown" | "program-4" => Ok(Self::WarmupCooldown),
            _ => Err(BikeError::InvalidProgram(s.to_string())),
        }
    }
}

/// `round(minutes / divisor)`; zero only for durations below the program minimum
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn ramp_rate(minutes: u32, divisor: f64) -> u32 {
    // Ties go to the even neighbour.
    (f64::from(minutes) / divisor).round_ties_even() as u32
}

/// A workout program as chosen by the rider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResistanceProgram {
    /// Starting resistance level
    pub base_level: u8,
    /// Session length in minutes
    pub duration_minutes: u32,
    /// Resistance profile
    pub kind: ProgramKind,
}

impl ResistanceProgram {
    /// Create a new program description
    #[must_use]
    pub const fn new(base_level: u8, duration_minutes: u32, kind: ProgramKind) -> Self {
        Self {
            base_level,
            duration_minutes,
            kind,
        }
    }

    /// Lay the program out minute by minute
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::InvalidDuration`] if the session is shorter than the
    /// program's pattern, or [`BikeError::InvalidLevel`] if the base level is zero
    /// or the program would climb above [`MAX_LEVEL`].
    pub fn build_schedule(&self) -> Result<LevelSchedule> {
        build_schedule(self.base_level, self.duration_minutes, self.kind)
    }
}

/// Lay out `kind` over `duration_minutes`, starting at `base_level`
///
/// # Errors
///
/// See [`ResistanceProgram::build_schedule`].
pub fn build_schedule(
    base_level: u8,
    duration_minutes: u32,
    kind: ProgramKind,
) -> Result<LevelSchedule> {
    let minimum = kind.minimum_duration();
    if duration_minutes < minimum {
        return Err(BikeError::InvalidDuration {
            program: kind.to_string(),
            minutes: duration_minutes,
            minimum,
        });
    }

    let peak = u32::from(base_level) + kind.headroom(duration_minutes);
    if base_level == 0 || peak > u32::from(MAX_LEVEL) {
        return Err(BikeError::InvalidLevel {
            level: if base_level == 0 { 0 } else { peak },
            maximum: MAX_LEVEL,
        });
    }

    let base = u32::from(base_level);
    let n = duration_minutes;
    let offsets: Vec<u32> = match kind {
        ProgramKind::Constant => vec![0; n as usize],
        ProgramKind::RampUp => {
            let rate = ramp_rate(n, 5.0);
            (0..n).map(|minute| minute / rate).collect()
        }
        ProgramKind::RampUpDown => {
            let rate = ramp_rate(n / 2, 5.0);
            let rising = n.div_ceil(2);
            (0..n)
                .map(|minute| {
                    let mirrored = if minute < rising { minute } else { n - 1 - minute };
                    mirrored / rate
                })
                .collect()
        }
        ProgramKind::SteppedCycle => (0..n)
            .map(|minute| match minute % 5 {
                0 | 1 => 0,
                2 | 3 => 2,
                _ => 4,
            })
            .collect(),
        ProgramKind::WarmupCooldown => (0..n)
            .map(|minute| match minute {
                0 => 0,
                1 => 1,
                m if m == n - 1 => 0,
                m if m == n - 2 => 1,
                _ => 2,
            })
            .collect(),
    };

    let levels = offsets
        .into_iter()
        .map(|offset| u8::try_from(base + offset))
        .collect::<std::result::Result<Vec<u8>, _>>()
        .map_err(|_| BikeError::InvalidLevel {
            level: peak,
            maximum: MAX_LEVEL,
        })?;

    Ok(LevelSchedule { levels })
}

/// Resistance level for every minute of a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelSchedule {
    levels: Vec<u8>,
}

impl LevelSchedule {
    /// Wrap a hand-made schedule
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::InvalidDuration`] for an empty schedule and
    /// [`BikeError::InvalidLevel`] for any level outside `1..=MAX_LEVEL`.
    pub fn from_levels(levels: Vec<u8>) -> Result<Self> {
        if levels.is_empty() {
            return Err(BikeError::InvalidDuration {
                program: "custom".to_string(),
                minutes: 0,
                minimum: 1,
            });
        }
        if let Some(&bad) = levels.iter().find(|&&l| l == 0 || l > MAX_LEVEL) {
            return Err(BikeError::InvalidLevel {
                level: u32::from(bad),
                maximum: MAX_LEVEL,
            });
        }
        Ok(Self { levels })
    }

    /// Number of minutes covered
    #[must_use]
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    /// Whether the schedule is empty (never true for a built schedule)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Level for a given elapsed minute
    #[must_use]
    pub fn level_at(&self, minute: u32) -> Option<u8> {
        self.levels.get(minute as usize).copied()
    }

    /// All levels in minute order
    #[must_use]
    pub fn levels(&self) -> &[u8] {
        &self.levels
    }

    /// `(minute, new level)` for every minute whose level differs from the previous one
    #[must_use]
    pub fn transitions(&self) -> Vec<(u32, u8)> {
        self.levels
            .windows(2)
            .zip(1u32..)
            .filter(|(pair, _)| pair[0] != pair[1])
            .map(|(pair, minute)| (minute, pair[1]))
            .collect()
    }

    /// Stair-step series for plotting
    ///
    /// Minutes run from 1 to `len`; every level change repeats the minute so the
    /// line jumps vertically instead of slanting.
    #[must_use]
    pub fn prettify(&self) -> (Vec<u32>, Vec<u8>) {
        let mut x = Vec::with_capacity(self.levels.len() * 2);
        let mut y = Vec::with_capacity(self.levels.len() * 2);

        for (minute, &level) in (1u32..).zip(&self.levels) {
            if let Some(&previous) = y.last() {
                if previous != level {
                    x.push(minute - 1);
                    y.push(level);
                }
            }
            x.push(minute);
            y.push(level);
        }

        (x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_length_for_all_programs() {
        for kind in ProgramKind::ALL {
            for duration in kind.minimum_duration()..=90 {
                let schedule = build_schedule(10, duration, kind).unwrap();
                assert_eq!(schedule.len(), duration as usize, "{kind} / {duration}");
                assert!(
                    schedule.levels().iter().all(|&l| l >= 10),
                    "{kind} / {duration} dropped below base"
                );
            }
        }
    }

    #[test]
    fn test_constant() {
        let schedule = build_schedule(7, 30, ProgramKind::Constant).unwrap();
        assert!(schedule.levels().iter().all(|&l| l == 7));
        assert!(schedule.transitions().is_empty());
    }

    #[test]
    fn test_ramp_up() {
        let schedule = build_schedule(10, 10, ProgramKind::RampUp).unwrap();
        assert_eq!(
            schedule.levels(),
            &[10, 10, 11, 11, 12, 12, 13, 13, 14, 14]
        );
        assert!(schedule.levels().windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_ramp_up_down_is_symmetric() {
        let schedule = build_schedule(10, 10, ProgramKind::RampUpDown).unwrap();
        assert_eq!(
            schedule.levels(),
            &[10, 11, 12, 13, 14, 14, 13, 12, 11, 10]
        );

        let odd = build_schedule(5, 21, ProgramKind::RampUpDown).unwrap();
        let levels = odd.levels();
        for minute in 0..levels.len() {
            assert_eq!(levels[minute], levels[levels.len() - 1 - minute]);
        }
        assert_eq!(levels[0], 5);

        // Half of 25 is 12 minutes, so one level every 2 minutes up to base + 6.
        let climb = build_schedule(10, 25, ProgramKind::RampUpDown).unwrap();
        assert_eq!(
            &climb.levels()[..13],
            &[10, 10, 11, 11, 12, 12, 13, 13, 14, 14, 15, 15, 16]
        );
        assert_eq!(climb.levels().iter().max(), Some(&16));
        assert_eq!(climb.levels()[24], 10);
    }

    #[test]
    fn test_stepped_cycle() {
        let schedule = build_schedule(10, 10, ProgramKind::SteppedCycle).unwrap();
        assert_eq!(
            schedule.levels(),
            &[10, 10, 12, 12, 14, 10, 10, 12, 12, 14]
        );
    }

    #[test]
    fn test_warmup_cooldown() {
        let schedule = build_schedule(3, 8, ProgramKind::WarmupCooldown).unwrap();
        assert_eq!(schedule.levels(), &[3, 4, 5, 5, 5, 5, 4, 3]);

        let shortest = build_schedule(3, 4, ProgramKind::WarmupCooldown).unwrap();
        assert_eq!(shortest.levels(), &[3, 4, 4, 3]);
    }

    #[test]
    fn test_too_short_durations_fail_fast() {
        assert!(matches!(
            build_schedule(3, 3, ProgramKind::WarmupCooldown),
            Err(BikeError::InvalidDuration { minimum: 4, .. })
        ));
        assert!(matches!(
            build_schedule(3, 2, ProgramKind::RampUp),
            Err(BikeError::InvalidDuration { .. })
        ));
        assert!(matches!(
            build_schedule(3, 5, ProgramKind::RampUpDown),
            Err(BikeError::InvalidDuration { .. })
        ));
        assert!(build_schedule(3, 0, ProgramKind::Constant).is_err());
    }

    #[test]
    fn test_level_bounds() {
        assert!(matches!(
            build_schedule(0, 10, ProgramKind::Constant),
            Err(BikeError::InvalidLevel { level: 0, .. })
        ));
        assert!(matches!(
            build_schedule(252, 10, ProgramKind::SteppedCycle),
            Err(BikeError::InvalidLevel { level: 256, .. })
        ));
        assert!(build_schedule(250, 10, ProgramKind::SteppedCycle).is_ok());
    }

    #[test]
    fn test_transitions() {
        let schedule = build_schedule(10, 10, ProgramKind::RampUp).unwrap();
        assert_eq!(
            schedule.transitions(),
            vec![(2, 11), (4, 12), (6, 13), (8, 14)]
        );
    }

    #[test]
    fn test_prettify() {
        let schedule = LevelSchedule::from_levels(vec![1, 1, 2, 2]).unwrap();
        let (x, y) = schedule.prettify();
        assert_eq!(x, vec![1, 2, 2, 3, 4]);
        assert_eq!(y, vec![1, 1, 2, 2, 2]);
    }

    #[test]
    fn test_from_levels_validation() {
        assert!(LevelSchedule::from_levels(vec![]).is_err());
        assert!(LevelSchedule::from_levels(vec![3, 0, 3]).is_err());
        assert!(LevelSchedule::from_levels(vec![3, 255]).is_err());
        assert_eq!(LevelSchedule::from_levels(vec![4]).unwrap().level_at(0), Some(4));
    }

    #[test]
    fn test_program_names() {
        for kind in ProgramKind::ALL {
            assert_eq!(kind.to_string().parse::<ProgramKind>().unwrap(), kind);
        }
        assert_eq!("Program 1".parse::<ProgramKind>().unwrap(), ProgramKind::RampUp);
        assert_eq!(
            "warmup_cooldown".parse::<ProgramKind>().unwrap(),
            ProgramKind::WarmupCooldown
        );
        assert!(matches!(
            "program 9".parse::<ProgramKind>(),
            Err(BikeError::InvalidProgram(_))
        ));
    }
}
