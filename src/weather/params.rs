//! Open-Meteo variable lists requested by each operation.

pub const FORECAST_DAILY: &[&str] = &[
    "temperature_2m_max",
    "temperature_2m_min",
    "apparent_temperature_max",
    "apparent_temperature_min",
    "precipitation_sum",
    "rain_sum",
    "showers_sum",
    "snowfall_sum",
    "precipitation_hours",
    "weather_code",
    "sunrise",
    "sunset",
    "wind_speed_10m_max",
    "wind_gusts_10m_max",
    "uv_index_max",
    "et0_fao_evapotranspiration",
];

// Hourly payloads get large quickly; forecasts carry only the first few.
pub const FORECAST_HOURLY: &[&str] = &[
    "temperature_2m",
    "relative_humidity_2m",
    "dew_point_2m",
    "apparent_temperature",
    "precipitation",
];

pub const CURRENT: &[&str] = &[
    "temperature_2m",
    "relative_humidity_2m",
    "precipitation",
    "weather_code",
    "wind_speed_10m",
];

pub const HISTORICAL_DAILY: &[&str] = FORECAST_DAILY;

pub const AGRICULTURAL_DAILY: &[&str] = &[
    "temperature_2m_max",
    "temperature_2m_min",
    "precipitation_sum",
    "et0_fao_evapotranspiration",
    "vapor_pressure_deficit_max",
];

pub const AGRICULTURAL_HOURLY: &[&str] = &[
    "temperature_2m",
    "relative_humidity_2m",
    "precipitation",
    "soil_temperature_0cm",
    "soil_temperature_6cm",
    "soil_moisture_0_to_1cm",
    "soil_moisture_1_to_3cm",
    "soil_moisture_3_to_9cm",
    "soil_moisture_9_to_27cm",
];

/// Locations the agricultural tooling is tuned for; also the examples given
/// to the model in operation descriptions.
pub const AGRICULTURAL_LOCATIONS: &[&str] = &[
    "Grand Island, Nebraska",
    "Scottsbluff, Nebraska",
    "Ames, Iowa",
    "Cedar Rapids, Iowa",
    "Fresno, California",
    "Salinas, California",
    "Lubbock, Texas",
    "Amarillo, Texas",
];

pub fn join(fields: &[&str]) -> String {
    fields.join(",")
}
