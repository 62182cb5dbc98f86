use chrono::NaiveDate;
use serde_json::{json, Value};
use weather_mcp::{
    config::WeatherConfig,
    weather::{tools, Confidence, LocationQuery, OperationGroup, WeatherClient},
    Arguments, Error, ErrorKind,
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer) -> WeatherConfig {
    WeatherConfig {
        forecast_url: format!("{}/v1/forecast", server.uri()),
        archive_url: format!("{}/v1/archive", server.uri()),
        geocoding_url: format!("{}/v1/search", server.uri()),
        ..WeatherConfig::default()
    }
}

fn paris_results() -> Value {
    json!({
        "results": [
            {"name": "Paris", "latitude": 48.85341, "longitude": 2.3488,
             "country": "France", "admin1": "Île-de-France", "timezone": "Europe/Paris"},
            {"name": "Paris", "latitude": 33.66094, "longitude": -95.55551,
             "country": "United States", "admin1": "Texas", "timezone": "America/Chicago"}
        ]
    })
}

fn forecast_body() -> Value {
    json!({
        "latitude": 33.66,
        "longitude": -95.56,
        "timezone": "America/Chicago",
        "current": {"temperature_2m": 24.1, "weather_code": 3},
        "daily": {
            "time": ["2024-06-20", "2024-06-21", "2024-06-22"],
            "temperature_2m_max": [31.2, 30.8, 29.9],
            "temperature_2m_min": [21.0, 20.4, 19.8]
        }
    })
}

#[tokio::test]
async fn test_geocode_prefers_matching_region() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .and(query_param("name", "Paris"))
        .and(query_param("count", "5"))
        .and(query_param("language", "en"))
        .and(query_param("format", "json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(paris_results()))
        .mount(&server)
        .await;

    let client = WeatherClient::new(config(&server)).unwrap();
    let location = client.geocode("Paris, Texas").await.unwrap();
    assert_eq!(location.name, "Paris, Texas, United States");
    assert_eq!(location.confidence, Confidence::High);
    assert!((location.coordinates.latitude - 33.66094).abs() < 1e-9);

    let location = client.geocode("Paris").await.unwrap();
    assert_eq!(location.name, "Paris, Île-de-France, France");
    assert_eq!(location.confidence, Confidence::Medium);
}

#[tokio::test]
async fn test_geocode_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"generationtime_ms": 0.3})))
        .mount(&server)
        .await;

    let client = WeatherClient::new(config(&server)).unwrap();
    let err = client.geocode("Atlantis").await.unwrap_err();
    assert!(matches!(err, Error::LocationNotFound(ref name) if name == "Atlantis"));
    assert_eq!(err.kind(), ErrorKind::Provider);
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn test_forecast_operation_clamps_days_and_adds_location() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(paris_results()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .and(query_param("forecast_days", "16"))
        .and(query_param("timezone", "auto"))
        .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body()))
        .expect(1)
        .mount(&server)
        .await;

    let client = std::sync::Arc::new(WeatherClient::new(config(&server)).unwrap());
    let registry = tools::registry(client, OperationGroup::Forecast).unwrap();
    let result = registry
        .dispatch(
            tools::FORECAST,
            Arguments::new()
                .set("location", "Paris, Texas")
                .set("days", 30),
        )
        .await
        .unwrap();

    assert_eq!(result["daily"]["temperature_2m_max"][0], 31.2);
    assert_eq!(result["location_info"]["name"], "Paris, Texas, United States");
    assert_eq!(
        result["location_info"]["coordinates"]["latitude"],
        33.66094
    );
}

#[tokio::test]
async fn test_repeated_requests_hit_the_cache() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body()))
        .expect(1)
        .mount(&server)
        .await;

    let client = WeatherClient::new(config(&server)).unwrap();
    let query = LocationQuery::from_arguments(
        &Arguments::new()
            .set("latitude", 33.66)
            .set("longitude", -95.56),
    )
    .unwrap();
    let location = client.resolve(&query).await.unwrap();

    let first = client.forecast(&location, 3).await.unwrap();
    let second = client.forecast(&location, 3).await.unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_cache_can_be_disabled() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(200).set_body_json(forecast_body()))
        .expect(2)
        .mount(&server)
        .await;

    let client = WeatherClient::new(WeatherConfig {
        cache_ttl: None,
        ..config(&server)
    })
    .unwrap();
    let location = client
        .resolve(&LocationQuery::from_arguments(
            &Arguments::new().set("latitude", 1.0).set("longitude", 2.0),
        )
        .unwrap())
        .await
        .unwrap();
    client.forecast(&location, 3).await.unwrap();
    client.forecast(&location, 3).await.unwrap();
}

#[tokio::test]
async fn test_upstream_error_reason_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/archive"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": true,
            "reason": "Parameter 'start_date' is out of allowed range"
        })))
        .mount(&server)
        .await;

    let client = WeatherClient::new(config(&server)).unwrap();
    let location = client
        .resolve(&LocationQuery::from_arguments(
            &Arguments::new().set("latitude", 41.66).set("longitude", -91.53),
        )
        .unwrap())
        .await
        .unwrap();
    let start = NaiveDate::from_ymd_opt(1900, 1, 1).unwrap();
    let end = NaiveDate::from_ymd_opt(1900, 1, 31).unwrap();
    let err = client.archive(&location, start, end).await.unwrap_err();

    assert!(matches!(err, Error::Upstream { status: 400, .. }));
    assert_eq!(err.kind(), ErrorKind::Provider);
    assert!(err.to_string().contains("out of allowed range"));
}

#[tokio::test]
async fn test_unreachable_provider_is_a_provider_error() {
    let client = WeatherClient::new(WeatherConfig {
        forecast_url: "http://127.0.0.1:9/v1/forecast".into(),
        ..WeatherConfig::default()
    })
    .unwrap();
    let location = client
        .resolve(&LocationQuery::from_arguments(
            &Arguments::new().set("latitude", 1.0).set("longitude", 2.0),
        )
        .unwrap())
        .await
        .unwrap();
    let err = client.forecast(&location, 1).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Provider);
}
