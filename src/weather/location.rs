use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::{
    arguments::Arguments,
    error::{Error, Result},
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        if !(-90.0..=90.0).contains(&latitude) {
            return Err(Error::Validation(format!(
                "Latitude {latitude} out of range [-90, 90]"
            )));
        }
        if !(-180.0..=180.0).contains(&longitude) {
            return Err(Error::Validation(format!(
                "Longitude {longitude} out of range [-180, 180]"
            )));
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }
}

/// What the caller asked for: a place name to geocode, or coordinates.
#[derive(Debug, Clone, PartialEq)]
pub enum LocationQuery {
    Named(String),
    /// `name` is the caller's label for the point, kept for display.
    Coordinates {
        coordinates: Coordinates,
        name: Option<String>,
    },
}

impl LocationQuery {
    /// Read `location` or `latitude`/`longitude` from operation arguments.
    /// A complete coordinate pair wins over a name; a lone latitude or
    /// longitude is ignored when a name is present.
    pub fn from_arguments(args: &Arguments) -> Result<Self> {
        let name = args
            .get_string("location")
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        match (args.get_f64("latitude"), args.get_f64("longitude"), name) {
            (Some(latitude), Some(longitude), name) => Ok(LocationQuery::Coordinates {
                coordinates: Coordinates::new(latitude, longitude)?,
                name,
            }),
            (_, _, Some(name)) => Ok(LocationQuery::Named(name)),
            (Some(_), None, None) | (None, Some(_), None) => Err(Error::Validation(
                "Both latitude and longitude are required".into(),
            )),
            (None, None, None) => Err(Error::Validation(
                "Either location name or coordinates (latitude, longitude) required".into(),
            )),
        }
    }
}

/// One result from the geocoding endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Place {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub admin1: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub population: Option<u64>,
}

impl Place {
    /// `name, admin1, country`, skipping missing parts.
    pub fn display_name(&self) -> String {
        [Some(&self.name), self.admin1.as_ref(), self.country.as_ref()]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn haystack(&self) -> Vec<String> {
        [Some(&self.name), self.admin1.as_ref(), self.country.as_ref()]
            .into_iter()
            .flatten()
            .map(|s| s.to_lowercase())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
}

/// A location resolved to coordinates, ready to be attached to a result.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLocation {
    pub name: String,
    pub coordinates: Coordinates,
    pub confidence: Confidence,
}

impl ResolvedLocation {
    /// Without a label the name is the coordinates themselves.
    pub fn from_coordinates(coordinates: Coordinates, name: Option<&str>) -> Self {
        Self {
            name: name.map(str::to_string).unwrap_or_else(|| {
                format!("{:.4}, {:.4}", coordinates.latitude, coordinates.longitude)
            }),
            coordinates,
            confidence: Confidence::High,
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "coordinates": {
                "latitude": self.coordinates.latitude,
                "longitude": self.coordinates.longitude,
            }
        })
    }
}

/// The part of a free-text query sent to the geocoder.
pub fn search_term(query: &str) -> &str {
    query.split(',').next().unwrap_or(query).trim()
}

/// Pick the best geocoding result for `query`.
///
/// With a qualified query such as "Paris, Texas" the first result whose
/// name, region or country contains every comma-separated part is preferred.
/// Two-letter US state codes are expanded before matching. Otherwise the
/// provider's own ranking stands.
pub fn select_best<'a>(query: &str, places: &'a [Place]) -> Option<(&'a Place, Confidence)> {
    let first = places.first()?;
    if !query.contains(',') {
        return Some((first, Confidence::Medium));
    }

    let parts: Vec<String> = query
        .split(',')
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty())
        .collect();

    places
        .iter()
        .find(|place| {
            let haystack = place.haystack();
            parts.iter().all(|part| {
                let expanded = expand_state_code(part);
                haystack.iter().any(|field| {
                    field.contains(part.as_str()) || expanded.is_some_and(|e| field.contains(e))
                })
            })
        })
        .map(|place| (place, Confidence::High))
        .or(Some((first, Confidence::Medium)))
}

fn expand_state_code(part: &str) -> Option<&'static str> {
    if part.len() != 2 {
        return None;
    }
    US_STATES
        .iter()
        .find(|(code, _)| code.eq_ignore_ascii_case(part))
        .map(|(_, name)| *name)
}

const US_STATES: &[(&str, &str)] = &[
    ("al", "alabama"),
    ("ak", "alaska"),
    ("az", "arizona"),
    ("ar", "arkansas"),
    ("ca", "california"),
    ("co", "colorado"),
    ("ct", "connecticut"),
    ("de", "delaware"),
    ("fl", "florida"),
    ("ga", "georgia"),
    ("hi", "hawaii"),
    ("id", "idaho"),
    ("il", "illinois"),
    ("in", "indiana"),
    ("ia", "iowa"),
    ("ks", "kansas"),
    ("ky", "kentucky"),
    ("la", "louisiana"),
    ("me", "maine"),
    ("md", "maryland"),
    ("ma", "massachusetts"),
    ("mi", "michigan"),
    ("mn", "minnesota"),
    ("ms", "mississippi"),
    ("mo", "missouri"),
    ("mt", "montana"),
    ("ne", "nebraska"),
    ("nv", "nevada"),
    ("nh", "new hampshire"),
    ("nj", "new jersey"),
    ("nm", "new mexico"),
    ("ny", "new york"),
    ("nc", "north carolina"),
    ("nd", "north dakota"),
    ("oh", "ohio"),
    ("ok", "oklahoma"),
    ("or", "oregon"),
    ("pa", "pennsylvania"),
    ("ri", "rhode island"),
    ("sc", "south carolina"),
    ("sd", "south dakota"),
    ("tn", "tennessee"),
    ("tx", "texas"),
    ("ut", "utah"),
    ("vt", "vermont"),
    ("va", "virginia"),
    ("wa", "washington"),
    ("wv", "west virginia"),
    ("wi", "wisconsin"),
    ("wy", "wyoming"),
];
