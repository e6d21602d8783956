use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod window;

pub use window::{DateWindow, WindowError};

/// A collection exposed by the Oura v2 user collection API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum DataType {
    PersonalInfo,
    DailyActivity,
    DailyReadiness,
    DailySleep,
    Sleep,
    SleepTime,
    HeartRate,
    DailyHrv,
    DailySpo2,
    DailyStress,
    DailyResilience,
    DailyCardiovascularAge,
    Vo2Max,
    Workout,
    Session,
    Tag,
    EnhancedTag,
    RestModePeriod,
    RingConfiguration,
}

impl DataType {
    pub const ALL: [DataType; 19] = [
        DataType::PersonalInfo,
        DataType::DailyActivity,
        DataType::DailyReadiness,
        DataType::DailySleep,
        DataType::Sleep,
        DataType::SleepTime,
        DataType::HeartRate,
        DataType::DailyHrv,
        DataType::DailySpo2,
        DataType::DailyStress,
        DataType::DailyResilience,
        DataType::DailyCardiovascularAge,
        DataType::Vo2Max,
        DataType::Workout,
        DataType::Session,
        DataType::Tag,
        DataType::EnhancedTag,
        DataType::RestModePeriod,
        DataType::RingConfiguration,
    ];

    /// Name used for directories, file prefixes and the main table.
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::PersonalInfo => "personal_info",
            DataType::DailyActivity => "daily_activity",
            DataType::DailyReadiness => "daily_readiness",
            DataType::DailySleep => "daily_sleep",
            DataType::Sleep => "sleep",
            DataType::SleepTime => "sleep_time",
            DataType::HeartRate => "heart_rate",
            DataType::DailyHrv => "daily_hrv",
            DataType::DailySpo2 => "daily_spo2",
            DataType::DailyStress => "daily_stress",
            DataType::DailyResilience => "daily_resilience",
            DataType::DailyCardiovascularAge => "daily_cardiovascular_age",
            DataType::Vo2Max => "vo2_max",
            DataType::Workout => "workout",
            DataType::Session => "session",
            DataType::Tag => "tag",
            DataType::EnhancedTag => "enhanced_tag",
            DataType::RestModePeriod => "rest_mode_period",
            DataType::RingConfiguration => "ring_configuration",
        }
    }

    /// Path relative to the API base URL.
    pub fn endpoint(&self) -> &'static str {
        match self {
            DataType::HeartRate => "/v2/usercollection/heartrate",
            DataType::Vo2Max => "/v2/usercollection/vO2_max",
            DataType::PersonalInfo => "/v2/usercollection/personal_info",
            DataType::DailyActivity => "/v2/usercollection/daily_activity",
            DataType::DailyReadiness => "/v2/usercollection/daily_readiness",
            DataType::DailySleep => "/v2/usercollection/daily_sleep",
            DataType::Sleep => "/v2/usercollection/sleep",
            DataType::SleepTime => "/v2/usercollection/sleep_time",
            DataType::DailyHrv => "/v2/usercollection/daily_hrv",
            DataType::DailySpo2 => "/v2/usercollection/daily_spo2",
            DataType::DailyStress => "/v2/usercollection/daily_stress",
            DataType::DailyResilience => "/v2/usercollection/daily_resilience",
            DataType::DailyCardiovascularAge => "/v2/usercollection/daily_cardiovascular_age",
            DataType::Workout => "/v2/usercollection/workout",
            DataType::Session => "/v2/usercollection/session",
            DataType::Tag => "/v2/usercollection/tag",
            DataType::EnhancedTag => "/v2/usercollection/enhanced_tag",
            DataType::RestModePeriod => "/v2/usercollection/rest_mode_period",
            DataType::RingConfiguration => "/v2/usercollection/ring_configuration",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown data type: {s}"))
    }
}

/// Pipeline stage selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum Step {
    Extract,
    Process,
    Load,
}

impl Step {
    pub const ALL: [Step; 3] = [Step::Extract, Step::Process, Step::Load];
}
