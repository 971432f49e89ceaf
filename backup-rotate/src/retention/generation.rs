//! Generation directory names.
//!
//! A generation is a directory named `<period>-NN` in the destination, with
//! `NN` zero-padded to at least two digits. Slot 00 is always the newest.

use std::fmt;
use std::str::FromStr;

use super::Period;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation {
    pub period: Period,
    pub slot: u32,
}

impl Generation {
    pub fn new(period: Period, slot: u32) -> Self {
        Self { period, slot }
    }

    /// Directory name of this generation.
    pub fn dir_name(&self) -> String {
        self.to_string()
    }

    /// Generation one slot older.
    pub fn older(&self) -> Self {
        Self::new(self.period, self.slot + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.period, self.slot)
    }
}

impl FromStr for Generation {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (period, slot) = s.rsplit_once('-').ok_or(())?;
        if slot.len() < 2 || !slot.bytes().all(|b| b.is_ascii_digit()) {
            return Err(());
        }

        let generation = Self {
            period: period.parse()?,
            slot: slot.parse().map_err(|_| ())?,
        };
        // Only the canonical spelling names a generation; `daily-001` is
        // someone else's directory
        if generation.dir_name() != s {
            return Err(());
        }
        Ok(generation)
    }
}

/// Parse directory names, keeping only generations of `period`, sorted by slot.
pub fn generations_of<'a, I>(period: Period, names: I) -> Vec<Generation>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut found: Vec<Generation> = names
        .into_iter()
        .filter_map(|name| name.parse::<Generation>().ok())
        .filter(|generation| generation.period == period)
        .collect();
    found.sort();
    found.dedup();
    found
}
