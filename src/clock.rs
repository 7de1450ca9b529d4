use chrono::{Local, NaiveDate};

/// Source of "today" for sweeps, validation and occupancy.
#[derive(Debug, Clone, Copy, Default)]
pub enum Clock {
    /// Local calendar date of the host.
    #[default]
    System,
    /// Pinned date, for tests and replays.
    Fixed(NaiveDate),
}

impl Clock {
    pub fn today(&self) -> NaiveDate {
        match self {
            Clock::System => Local::now().date_naive(),
            Clock::Fixed(day) => *day,
        }
    }
}
