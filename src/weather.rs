//! Wind observation helpers
//!
//! Maps a wind bearing onto the 8-point compass and classifies a room facade
//! as exposed or sheltered relative to the current wind.

use serde::{Deserialize, Serialize};

/// Eight-point compass direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompassDirection {
    #[serde(alias = "n")]
    N,
    #[serde(alias = "ne")]
    NE,
    #[serde(alias = "e")]
    E,
    #[serde(alias = "se")]
    SE,
    #[serde(alias = "s")]
    S,
    #[serde(alias = "sw")]
    SW,
    #[serde(alias = "w")]
    W,
    #[serde(alias = "nw")]
    NW,
}

impl CompassDirection {
    /// Directions in clockwise order starting at north.
    pub const ALL: [CompassDirection; 8] = [
        CompassDirection::N,
        CompassDirection::NE,
        CompassDirection::E,
        CompassDirection::SE,
        CompassDirection::S,
        CompassDirection::SW,
        CompassDirection::W,
        CompassDirection::NW,
    ];

    /// Snap a bearing in degrees to the nearest of the eight directions.
    pub fn from_bearing(bearing: f64) -> Self {
        let index = ((bearing + 22.5).rem_euclid(360.0) / 45.0) as usize;
        Self::ALL[index.min(7)]
    }

    pub fn index(&self) -> usize {
        Self::ALL.iter().position(|d| d == self).unwrap_or(0)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompassDirection::N => "N",
            CompassDirection::NE => "NE",
            CompassDirection::E => "E",
            CompassDirection::SE => "SE",
            CompassDirection::S => "S",
            CompassDirection::SW => "SW",
            CompassDirection::W => "W",
            CompassDirection::NW => "NW",
        }
    }

    /// Number of 45° steps between two directions (0 to 4).
    pub fn steps_to(&self, other: CompassDirection) -> usize {
        let diff = self.index().abs_diff(other.index());
        if diff > 4 {
            8 - diff
        } else {
            diff
        }
    }
}

/// Facade exposure to the current wind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindExposure {
    /// Wind within ±45° of the facade direction
    Exposed,
    /// Wind from the side or the back
    Sheltered,
    Unknown,
}

/// Classify the facade exposure. Unknown when either side is missing.
pub fn wind_exposure(
    wind: Option<CompassDirection>,
    orientation: Option<CompassDirection>,
) -> WindExposure {
    match (wind, orientation) {
        (Some(wind), Some(facade)) if wind.steps_to(facade) <= 1 => WindExposure::Exposed,
        (Some(_), Some(_)) => WindExposure::Sheltered,
        _ => WindExposure::Unknown,
    }
}

/// Raw weather entity attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeatherObservation {
    pub wind_speed: Option<f64>,
    pub wind_speed_unit: Option<String>,
    pub wind_bearing: Option<f64>,
}

/// Wind reading published with each snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindReading {
    pub speed: Option<f64>,
    pub speed_unit: Option<String>,
    pub bearing: Option<f64>,
    pub direction: Option<CompassDirection>,
    pub exposure: WindExposure,
    pub room_orientation: Option<CompassDirection>,
}

impl WindReading {
    pub fn from_observation(
        observation: &WeatherObservation,
        orientation: Option<CompassDirection>,
    ) -> Self {
        let direction = observation.wind_bearing.map(CompassDirection::from_bearing);
        let speed_unit = observation.wind_speed.map(|_| {
            observation
                .wind_speed_unit
                .clone()
                .unwrap_or_else(|| "km/h".to_string())
        });
        Self {
            speed: observation.wind_speed,
            speed_unit,
            bearing: observation.wind_bearing,
            direction,
            exposure: wind_exposure(direction, orientation),
            room_orientation: orientation,
        }
    }

    pub fn empty(orientation: Option<CompassDirection>) -> Self {
        Self {
            speed: None,
            speed_unit: None,
            bearing: None,
            direction: None,
            exposure: WindExposure::Unknown,
            room_orientation: orientation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearing_to_direction() {
        assert_eq!(CompassDirection::from_bearing(0.0), CompassDirection::N);
        assert_eq!(CompassDirection::from_bearing(22.0), CompassDirection::N);
        assert_eq!(CompassDirection::from_bearing(23.0), CompassDirection::NE);
        assert_eq!(CompassDirection::from_bearing(180.0), CompassDirection::S);
        assert_eq!(CompassDirection::from_bearing(350.0), CompassDirection::N);
        assert_eq!(CompassDirection::from_bearing(300.0), CompassDirection::NW);
        assert_eq!(CompassDirection::from_bearing(-90.0), CompassDirection::W);
    }

    #[test]
    fn test_exposure() {
        use CompassDirection::*;
        assert_eq!(wind_exposure(Some(N), Some(N)), WindExposure::Exposed);
        assert_eq!(wind_exposure(Some(NW), Some(N)), WindExposure::Exposed);
        assert_eq!(wind_exposure(Some(NE), Some(NW)), WindExposure::Sheltered);
        assert_eq!(wind_exposure(Some(S), Some(N)), WindExposure::Sheltered);
        assert_eq!(wind_exposure(None, Some(N)), WindExposure::Unknown);
        assert_eq!(wind_exposure(Some(N), None), WindExposure::Unknown);
    }

    #[test]
    fn test_orientation_accepts_lowercase() {
        let dir: CompassDirection = serde_json::from_str("\"sw\"").unwrap();
        assert_eq!(dir, CompassDirection::SW);
        assert_eq!(serde_json::to_string(&dir).unwrap(), "\"SW\"");
    }

    #[test]
    fn test_reading_from_observation() {
        let obs = WeatherObservation {
            wind_speed: Some(12.0),
            wind_speed_unit: None,
            wind_bearing: Some(95.0),
        };
        let reading = WindReading::from_observation(&obs, Some(CompassDirection::SE));
        assert_eq!(reading.direction, Some(CompassDirection::E));
        assert_eq!(reading.speed_unit.as_deref(), Some("km/h"));
        assert_eq!(reading.exposure, WindExposure::Exposed);
    }
}
