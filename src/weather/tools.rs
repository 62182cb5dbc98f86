//! Registration of the weather operations on a [`Registry`].

use std::{fmt, str::FromStr, sync::Arc};

use chrono::Local;
use serde_json::Value;
use tracing::info;

use super::{
    client::WeatherClient,
    location::LocationQuery,
    params::AGRICULTURAL_LOCATIONS,
    policy::{self, DEFAULT_DAYS},
};
use crate::{
    arguments::Arguments,
    error::{Error, Result},
    registry::{OperationDescriptor, ParamType, Parameter, Registry},
};

pub const FORECAST: &str = "get_weather_forecast";
pub const HISTORICAL: &str = "get_historical_weather";
pub const AGRICULTURAL: &str = "get_agricultural_conditions";

/// Which family of operations a worker hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperationGroup {
    Forecast,
    Historical,
    Agricultural,
    #[default]
    All,
}

impl OperationGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationGroup::Forecast => "forecast",
            OperationGroup::Historical => "historical",
            OperationGroup::Agricultural => "agricultural",
            OperationGroup::All => "all",
        }
    }

    fn includes(&self, other: OperationGroup) -> bool {
        *self == OperationGroup::All || *self == other
    }
}

impl fmt::Display for OperationGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationGroup {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forecast" => Ok(OperationGroup::Forecast),
            "historical" => Ok(OperationGroup::Historical),
            "agricultural" => Ok(OperationGroup::Agricultural),
            "all" => Ok(OperationGroup::All),
            other => Err(Error::Config(format!(
                "Unknown operation group '{other}'. Expected forecast, historical, agricultural or all"
            ))),
        }
    }
}

fn with_location_parameters(descriptor: OperationDescriptor) -> OperationDescriptor {
    descriptor
        .with_parameter(
            Parameter::optional("location", ParamType::String)
                .with_description("Place name, e.g. 'Ames, Iowa'"),
        )
        .with_parameter(
            Parameter::optional("latitude", ParamType::Number)
                .with_description("Latitude in decimal degrees"),
        )
        .with_parameter(
            Parameter::optional("longitude", ParamType::Number)
                .with_description("Longitude in decimal degrees"),
        )
}

pub fn forecast_descriptor() -> OperationDescriptor {
    with_location_parameters(OperationDescriptor::new(
        FORECAST,
        "Get the weather forecast for a location: daily highs and lows, precipitation, \
         wind, UV index, and current conditions. Up to 16 days.",
    ))
    .with_parameter(
        Parameter::optional("days", ParamType::Integer)
            .with_default(DEFAULT_DAYS)
            .with_description("Number of forecast days (1-16)"),
    )
}

pub fn historical_descriptor() -> OperationDescriptor {
    with_location_parameters(OperationDescriptor::new(
        HISTORICAL,
        "Get historical daily weather for a location and date range. \
         Data is available up to 5 days before today.",
    ))
    .with_parameter(
        Parameter::required("start_date", ParamType::String)
            .with_description("Start date, YYYY-MM-DD"),
    )
    .with_parameter(
        Parameter::required("end_date", ParamType::String).with_description("End date, YYYY-MM-DD"),
    )
}

pub fn agricultural_descriptor() -> OperationDescriptor {
    with_location_parameters(OperationDescriptor::new(
        AGRICULTURAL,
        format!(
            "Get agricultural conditions for a location: soil moisture and temperature at \
             several depths, evapotranspiration and vapor pressure deficit. Up to 7 days. \
             Well-covered farming areas include {}.",
            AGRICULTURAL_LOCATIONS.join("; ")
        ),
    ))
    .with_parameter(
        Parameter::optional("days", ParamType::Integer)
            .with_default(DEFAULT_DAYS)
            .with_description("Number of days (1-7)"),
    )
}

/// Register the operations of `group` on `registry`, all sharing `client`.
pub fn register(
    registry: &mut Registry,
    client: Arc<WeatherClient>,
    group: OperationGroup,
) -> Result<()> {
    if group.includes(OperationGroup::Forecast) {
        let client = client.clone();
        registry.register(forecast_descriptor(), move |args: Arguments| {
            let client = client.clone();
            async move { forecast(&client, args).await }
        })?;
    }
    if group.includes(OperationGroup::Historical) {
        let client = client.clone();
        registry.register(historical_descriptor(), move |args: Arguments| {
            let client = client.clone();
            async move { historical(&client, args).await }
        })?;
    }
    if group.includes(OperationGroup::Agricultural) {
        registry.register(agricultural_descriptor(), move |args: Arguments| {
            let client = client.clone();
            async move { agricultural(&client, args).await }
        })?;
    }
    info!("Registered {} weather operations ({})", registry.len(), group);
    Ok(())
}

/// A fresh registry holding the operations of `group`.
pub fn registry(client: Arc<WeatherClient>, group: OperationGroup) -> Result<Registry> {
    let mut registry = Registry::new();
    register(&mut registry, client, group)?;
    Ok(registry)
}

async fn forecast(client: &WeatherClient, args: Arguments) -> Result<Value> {
    let query = LocationQuery::from_arguments(&args)?;
    let days = policy::clamp_forecast_days(args.get_i64("days").unwrap_or(DEFAULT_DAYS as i64));
    let location = client.resolve(&query).await?;
    client.forecast(&location, days).await
}

async fn historical(client: &WeatherClient, args: Arguments) -> Result<Value> {
    let query = LocationQuery::from_arguments(&args)?;
    let start = policy::parse_date(&args.get_string("start_date").unwrap_or_default())?;
    let end = policy::parse_date(&args.get_string("end_date").unwrap_or_default())?;
    // Reject out-of-policy ranges before spending a geocoding round trip.
    policy::check_historical_range(start, end, Local::now().date_naive())?;
    let location = client.resolve(&query).await?;
    client.archive(&location, start, end).await
}

async fn agricultural(client: &WeatherClient, args: Arguments) -> Result<Value> {
    let query = LocationQuery::from_arguments(&args)?;
    let days =
        policy::clamp_agricultural_days(args.get_i64("days").unwrap_or(DEFAULT_DAYS as i64));
    let location = client.resolve(&query).await?;
    client.agricultural(&location, days).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WeatherConfig;

    fn client() -> Arc<WeatherClient> {
        Arc::new(WeatherClient::new(WeatherConfig::default()).unwrap())
    }

    #[test]
    fn test_group_parsing() {
        assert_eq!(
            "Forecast".parse::<OperationGroup>().unwrap(),
            OperationGroup::Forecast
        );
        assert_eq!("all".parse::<OperationGroup>().unwrap(), OperationGroup::All);
        assert!("soil".parse::<OperationGroup>().is_err());
    }

    #[test]
    fn test_group_selects_operations() {
        let registry = registry(client(), OperationGroup::Historical).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(HISTORICAL));

        let names: Vec<_> = registry_names(OperationGroup::All);
        assert_eq!(names, vec![FORECAST, HISTORICAL, AGRICULTURAL]);
    }

    fn registry_names(group: OperationGroup) -> Vec<String> {
        registry(client(), group)
            .unwrap()
            .describe_all()
            .into_iter()
            .map(|d| d.name)
            .collect()
    }

    #[test]
    fn test_registering_twice_fails() {
        let mut registry = registry(client(), OperationGroup::Forecast).unwrap();
        let err = register(&mut registry, client(), OperationGroup::All).unwrap_err();
        assert!(matches!(err, Error::DuplicateOperation(ref name) if name == FORECAST));
    }

    #[tokio::test]
    async fn test_missing_location_is_a_validation_error() {
        let registry = registry(client(), OperationGroup::Forecast).unwrap();
        let err = registry
            .dispatch(FORECAST, Arguments::new().set("days", 3))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_recent_historical_range_rejected_without_network() {
        let registry = registry(client(), OperationGroup::Historical).unwrap();
        let today = Local::now().date_naive();
        let args = Arguments::new()
            .set("latitude", 42.03)
            .set("longitude", -93.62)
            .set("start_date", (today - chrono::Duration::days(10)).to_string())
            .set("end_date", (today - chrono::Duration::days(3)).to_string());
        let err = registry.dispatch(HISTORICAL, args).await.unwrap_err();
        assert!(matches!(err, Error::DateOutOfPolicy { .. }));
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn test_year_plus_historical_range_rejected_without_network() {
        let registry = registry(client(), OperationGroup::Historical).unwrap();
        let args = Arguments::new()
            .set("location", "Ames, Iowa")
            .set("start_date", "2020-01-01")
            .set("end_date", "2021-06-30");
        let err = registry.dispatch(HISTORICAL, args).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
        assert!(err.to_string().contains("Date range too large (546 days)"));
    }
}
