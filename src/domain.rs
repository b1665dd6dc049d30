use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::MagvalError;
use crate::time_util::random_time_in;

/// Identifiers of the locally evaluable magnetic models and their named
/// combinations, using the wire spellings of the data service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelId {
    #[serde(rename = "CHAOS-Static")]
    ChaosStatic,
    #[serde(rename = "CHAOS-Core")]
    ChaosCore,
    #[serde(rename = "CHAOS-MMA")]
    ChaosMma,
    #[serde(rename = "CHAOS-MMA-Primary")]
    ChaosMmaPrimary,
    #[serde(rename = "CHAOS-MMA-Secondary")]
    ChaosMmaSecondary,
    #[serde(rename = "CHAOS")]
    Chaos,
    #[serde(rename = "MIO_SHA_2C")]
    MioSha2c,
    #[serde(rename = "MIO_SHA_2C-Primary")]
    MioSha2cPrimary,
    #[serde(rename = "MIO_SHA_2C-Secondary")]
    MioSha2cSecondary,
}

impl ModelId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelId::ChaosStatic => "CHAOS-Static",
            ModelId::ChaosCore => "CHAOS-Core",
            ModelId::ChaosMma => "CHAOS-MMA",
            ModelId::ChaosMmaPrimary => "CHAOS-MMA-Primary",
            ModelId::ChaosMmaSecondary => "CHAOS-MMA-Secondary",
            ModelId::Chaos => "CHAOS",
            ModelId::MioSha2c => "MIO_SHA_2C",
            ModelId::MioSha2cPrimary => "MIO_SHA_2C-Primary",
            ModelId::MioSha2cSecondary => "MIO_SHA_2C-Secondary",
        }
    }

    pub const ALL: [ModelId; 9] = [
        ModelId::ChaosCore,
        ModelId::ChaosStatic,
        ModelId::ChaosMmaPrimary,
        ModelId::ChaosMmaSecondary,
        ModelId::ChaosMma,
        ModelId::Chaos,
        ModelId::MioSha2cPrimary,
        ModelId::MioSha2cSecondary,
        ModelId::MioSha2c,
    ];
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ModelId {
    type Err = MagvalError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        ModelId::ALL
            .iter()
            .find(|id| id.as_str() == value.trim())
            .copied()
            .ok_or_else(|| MagvalError::InvalidModelId(value.to_string()))
    }
}

/// A model request as sent to the server: a bare name, or a server-side
/// expression of the form `name = expression`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelExpression {
    pub name: String,
    pub expression: Option<String>,
}

impl ModelExpression {
    /// The expression as sent on the wire.
    pub fn request_string(&self) -> String {
        match &self.expression {
            Some(expression) => format!("{} = {}", self.name, expression),
            None => self.name.clone(),
        }
    }

    /// The model identifier, required for local evaluation; server-side
    /// expressions cannot be evaluated locally.
    pub fn local_model_id(&self) -> Result<ModelId, MagvalError> {
        if self.expression.is_some() {
            return Err(MagvalError::UnsupportedModelExpression(
                self.request_string(),
            ));
        }
        self.name.parse()
    }
}

impl FromStr for ModelExpression {
    type Err = MagvalError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (name, expression) = match value.split_once('=') {
            Some((name, expression)) => {
                if expression.trim().is_empty() {
                    return Err(MagvalError::InvalidModelExpression(value.to_string()));
                }
                (name.trim(), Some(expression.trim().to_string()))
            }
            None => (value.trim(), None),
        };
        if name.is_empty() {
            return Err(MagvalError::InvalidModelExpression(value.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            expression,
        })
    }
}

impl fmt::Display for ModelExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.request_string())
    }
}

/// Server capabilities, as reported by `/hapi/capabilities`.
#[derive(Debug, Clone, Deserialize)]
pub struct Capabilities {
    #[serde(rename = "outputFormats")]
    pub output_formats: Vec<String>,
}

/// Per-dataset metadata, as reported by `/hapi/info`.
#[derive(Debug, Clone)]
pub struct DatasetInfo {
    pub id: String,
    pub start_date: DateTime<Utc>,
    pub stop_date: DateTime<Utc>,
    pub max_time_selection: Duration,
}

impl DatasetInfo {
    /// The sampling window length: a tenth of the maximum allowed time
    /// selection, clamped to the dataset span when that is shorter.
    pub fn sample_selection(&self) -> Duration {
        let selection = self.max_time_selection / 10;
        let span = self.stop_date - self.start_date;
        if span < selection { span } else { selection }
    }

    /// Pick a random sample window inside the dataset's valid range.
    pub fn random_window<R: Rng>(&self, rng: &mut R) -> TimeWindow {
        let selection = self.sample_selection();
        let start = random_time_in(rng, self.start_date, self.stop_date - selection);
        TimeWindow {
            start,
            end: start + selection,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Pick a random sub-window of the given length inside this window.
    pub fn random_subwindow<R: Rng>(&self, rng: &mut R, selection: Duration) -> TimeWindow {
        let selection = if self.duration() < selection {
            self.duration()
        } else {
            selection
        };
        let start = random_time_in(rng, self.start, self.end - selection);
        TimeWindow {
            start,
            end: start + selection,
        }
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            self.start.format("%Y-%m-%dT%H:%M:%SZ"),
            self.end.format("%Y-%m-%dT%H:%M:%SZ")
        )
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    fn day_dataset() -> DatasetInfo {
        DatasetInfo {
            id: "SW_OPER_MAGA_LR_1B".to_string(),
            start_date: Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            stop_date: Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap(),
            max_time_selection: Duration::hours(24),
        }
    }

    #[test]
    fn model_id_round_trips_wire_spelling() {
        for id in ModelId::ALL {
            assert_eq!(id.as_str().parse::<ModelId>().unwrap(), id);
        }
        assert_matches!(
            "CHAOS-Bogus".parse::<ModelId>(),
            Err(MagvalError::InvalidModelId(_))
        );
    }

    #[test]
    fn model_expression_bare_name() {
        let expr: ModelExpression = "CHAOS-Core".parse().unwrap();
        assert_eq!(expr.request_string(), "CHAOS-Core");
        assert_eq!(expr.local_model_id().unwrap(), ModelId::ChaosCore);
    }

    #[test]
    fn model_expression_server_side() {
        let expr: ModelExpression = "Custom = 'CHAOS-Core' + 'CHAOS-Static'".parse().unwrap();
        assert_eq!(expr.name, "Custom");
        assert_eq!(
            expr.request_string(),
            "Custom = 'CHAOS-Core' + 'CHAOS-Static'"
        );
        assert_matches!(
            expr.local_model_id(),
            Err(MagvalError::UnsupportedModelExpression(_))
        );
    }

    #[test]
    fn model_expression_invalid() {
        assert_matches!(
            "= x".parse::<ModelExpression>(),
            Err(MagvalError::InvalidModelExpression(_))
        );
        assert_matches!(
            "Name =".parse::<ModelExpression>(),
            Err(MagvalError::InvalidModelExpression(_))
        );
    }

    #[test]
    fn sample_selection_is_tenth_of_max() {
        // PT24H max selection gives a PT2H24M sample window
        assert_eq!(day_dataset().sample_selection(), Duration::minutes(144));
    }

    #[test]
    fn sample_selection_clamps_to_span() {
        let mut info = day_dataset();
        info.max_time_selection = Duration::days(365);
        assert_eq!(info.sample_selection(), Duration::hours(24));
    }

    #[test]
    fn random_window_within_dataset_range() {
        let info = day_dataset();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..50 {
            let window = info.random_window(&mut rng);
            assert!(window.start >= info.start_date);
            assert!(window.end <= info.stop_date);
            assert_eq!(window.duration(), Duration::minutes(144));
        }
    }

    #[test]
    fn window_display_is_iso_pair() {
        let window = TimeWindow::new(
            Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2020, 1, 1, 2, 24, 0).unwrap(),
        );
        assert_eq!(window.to_string(), "2020-01-01T00:00:00Z/2020-01-01T02:24:00Z");
    }
}
