//! Single-call query classification: free text to a structured intent.

use std::{fmt, sync::Arc, sync::OnceLock};

use chrono::{Datelike, Days, Duration, Local, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    error::Result,
    llm::{Message, Provider},
};

const UNPARSABLE_MESSAGE: &str =
    "I had trouble understanding your query. Could you please be more specific?";
const NO_JSON_MESSAGE: &str = "I couldn't understand your query. Could you please rephrase?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    Forecast,
    Historical,
    Agricultural,
    #[default]
    #[serde(other)]
    General,
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryType::Forecast => "forecast",
            QueryType::Historical => "historical",
            QueryType::Agricultural => "agricultural",
            QueryType::General => "general",
        };
        f.write_str(name)
    }
}

/// Inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

/// What a query is asking for.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueryIntent {
    #[serde(default)]
    pub query_type: QueryType,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub time_references: Vec<String>,
    #[serde(default)]
    pub parameters: Vec<String>,
    #[serde(default)]
    pub requires_clarification: bool,
    #[serde(default)]
    pub clarification_message: Option<String>,
    /// Resolved from `time_references` after parsing.
    #[serde(skip)]
    pub date_range: Option<DateRange>,
}

impl QueryIntent {
    /// The first location mentioned, if any.
    pub fn location(&self) -> Option<&str> {
        self.locations.first().map(String::as_str)
    }

    fn clarification(message: &str) -> Self {
        Self {
            query_type: QueryType::General,
            requires_clarification: true,
            clarification_message: Some(message.to_string()),
            ..Self::default()
        }
    }
}

pub struct QueryClassifier {
    provider: Arc<dyn Provider>,
}

impl QueryClassifier {
    pub fn new(provider: Arc<dyn Provider>) -> Self {
        Self { provider }
    }

    /// Classify `query`. Model output that is not valid JSON degrades to a
    /// general intent asking for clarification; only a failed model call is
    /// an error.
    pub async fn classify(&self, query: &str) -> Result<QueryIntent> {
        let prompt = classification_prompt(query);
        let reply = self
            .provider
            .complete("", &[Message::user().with_text(prompt)], &[])
            .await?;
        let intent = parse_classification(&reply.text(), Local::now().date_naive());
        debug!(
            "Classified query as {} (location {:?}, range {:?})",
            intent.query_type,
            intent.location(),
            intent.date_range
        );
        Ok(intent)
    }
}

/// Parse the model's reply, taking the text between the first `{` and the
/// last `}` as the JSON object.
pub fn parse_classification(raw: &str, today: NaiveDate) -> QueryIntent {
    let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) else {
        return QueryIntent::clarification(NO_JSON_MESSAGE);
    };
    if end < start {
        return QueryIntent::clarification(NO_JSON_MESSAGE);
    }

    match serde_json::from_str::<QueryIntent>(&raw[start..=end]) {
        Ok(mut intent) => {
            intent.date_range =
                resolve_date_range(intent.query_type, &intent.time_references, today);
            intent
        }
        Err(e) => {
            warn!("Unparsable classification: {}", e);
            QueryIntent::clarification(UNPARSABLE_MESSAGE)
        }
    }
}

fn next_days_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"next (\d+) days?").expect("valid regex"))
}

fn past_days_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?:past|last) (\d+) days?").expect("valid regex"))
}

fn captured_days(pattern: &Regex, text: &str) -> Option<u64> {
    pattern
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Turn the first relative time reference into concrete dates. With no
/// references, forecasts cover the coming week and historical queries the
/// 30 days ending yesterday.
pub fn resolve_date_range(
    query_type: QueryType,
    time_references: &[String],
    today: NaiveDate,
) -> Option<DateRange> {
    let days = Duration::days;
    let Some(reference) = time_references.first().map(|r| r.to_lowercase()) else {
        return match query_type {
            QueryType::Forecast => Some(DateRange::new(today, today + days(7))),
            QueryType::Historical => Some(DateRange::new(today - days(30), today - days(1))),
            _ => None,
        };
    };
    let r = reference.as_str();

    let range = if r.contains("today") {
        Some(DateRange::new(today, today))
    } else if r.contains("tomorrow") {
        Some(DateRange::new(today + days(1), today + days(1)))
    } else if r.contains("yesterday") {
        Some(DateRange::new(today - days(1), today - days(1)))
    } else if r.contains("next week") || r.contains("this week") {
        Some(DateRange::new(today, today + days(7)))
    } else if r.contains("next month") {
        Some(DateRange::new(today, today + days(30)))
    } else if r.contains("last week") {
        Some(DateRange::new(today - days(7), today))
    } else if r.contains("last month") {
        Some(DateRange::new(today - days(30), today - days(1)))
    } else if let Some(n) = captured_days(next_days_pattern(), r) {
        today
            .checked_add_days(Days::new(n))
            .map(|end| DateRange::new(today, end))
    } else if let Some(n) = captured_days(past_days_pattern(), r) {
        today
            .checked_sub_days(Days::new(n))
            .map(|start| DateRange::new(start, today - days(1)))
    } else if r.contains("planting season") {
        planting_season(today)
    } else {
        None
    };

    range.or_else(|| {
        (query_type == QueryType::Forecast).then(|| DateRange::new(today, today + days(7)))
    })
}

/// Spring planting window: the next 60 days through June, otherwise from
/// April 1 of the following year.
fn planting_season(today: NaiveDate) -> Option<DateRange> {
    if today.month() <= 6 {
        return Some(DateRange::new(today, today + Duration::days(60)));
    }
    let spring = NaiveDate::from_ymd_opt(today.year() + 1, 4, 1)?;
    Some(DateRange::new(spring, spring + Duration::days(60)))
}

fn classification_prompt(query: &str) -> String {
    format!(
        r#"Analyze this weather query and extract key information:
Query: "{query}"

Determine:
1. Query type:
   - forecast: Future weather (today to 16 days ahead)
   - historical: Past weather (5+ days ago)
   - agricultural: Farming/crop conditions
   - general: Unclear or needs more info

2. Location references:
   - Extract specific locations mentioned
   - Note if location is ambiguous (e.g., "Iowa" - which city?)
   - Empty if no location specified

3. Time references:
   - Extract specific dates or relative times
   - For agricultural queries, note planting/harvest seasons
   - Empty if no time specified

4. Weather parameters:
   - Temperature (min/max/average)
   - Precipitation (rain/snow)
   - For agricultural: soil moisture, frost risk, growing degree days
   - Wind, humidity, UV index if mentioned

5. Clarification needs:
   - Missing location
   - Ambiguous location (state vs city)
   - Missing time period
   - Vague agricultural needs

Respond in this exact JSON format:
{{
    "query_type": "forecast|historical|agricultural|general",
    "locations": ["Fresno, California", "latitude,longitude"],
    "time_references": ["tomorrow", "next 7 days", "March 2024"],
    "parameters": ["temperature_2m_max", "precipitation_sum", "soil_moisture_0_to_1cm"],
    "requires_clarification": true/false,
    "clarification_message": "Specific helpful message about what's needed"
}}

Be specific with parameters using actual parameter names when possible.
For clarification messages, be helpful and specific about what information is missing."#
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::ScriptedProvider;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 20).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn refs(r: &[&str]) -> Vec<String> {
        r.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_extracts_embedded_json() {
        let raw = r#"Here is the classification:
{"query_type": "historical", "locations": ["Austin, Texas"], "time_references": ["last week"],
 "parameters": ["precipitation_sum"], "requires_clarification": false, "clarification_message": ""}
Hope that helps."#;
        let intent = parse_classification(raw, today());
        assert_eq!(intent.query_type, QueryType::Historical);
        assert_eq!(intent.location(), Some("Austin, Texas"));
        assert!(!intent.requires_clarification);
        assert_eq!(
            intent.date_range,
            Some(DateRange::new(date(2024, 6, 13), today()))
        );
    }

    #[test]
    fn test_parse_survives_out_of_range_day_counts() {
        let intent = parse_classification(
            r#"{"query_type":"forecast","locations":["Ames"],"time_references":["next 100000000 days"]}"#,
            today(),
        );
        assert_eq!(intent.query_type, QueryType::Forecast);
        assert_eq!(
            intent.date_range,
            Some(DateRange::new(today(), date(2024, 6, 27)))
        );

        let intent = parse_classification(
            r#"{"query_type":"historical","time_references":["past 99999999999999999999999 days"]}"#,
            today(),
        );
        assert!(intent.date_range.is_none());

        let range = resolve_date_range(
            QueryType::General,
            &refs(&["last 100000000 days"]),
            today(),
        );
        assert!(range.is_none());
    }

    #[test]
    fn test_parse_failures_degrade_to_clarification() {
        let intent = parse_classification("I am not sure.", today());
        assert_eq!(intent.query_type, QueryType::General);
        assert!(intent.requires_clarification);
        assert_eq!(intent.clarification_message.as_deref(), Some(NO_JSON_MESSAGE));

        let intent = parse_classification("{not json}", today());
        assert!(intent.requires_clarification);
        assert_eq!(
            intent.clarification_message.as_deref(),
            Some(UNPARSABLE_MESSAGE)
        );
    }

    #[test]
    fn test_unknown_query_type_is_general() {
        let intent = parse_classification(r#"{"query_type": "comparison"}"#, today());
        assert_eq!(intent.query_type, QueryType::General);
        assert!(intent.date_range.is_none());
    }

    #[test]
    fn test_defaults_without_time_references() {
        assert_eq!(
            resolve_date_range(QueryType::Forecast, &[], today()),
            Some(DateRange::new(today(), date(2024, 6, 27)))
        );
        assert_eq!(
            resolve_date_range(QueryType::Historical, &[], today()),
            Some(DateRange::new(date(2024, 5, 21), date(2024, 6, 19)))
        );
        assert_eq!(resolve_date_range(QueryType::Agricultural, &[], today()), None);
    }

    #[test]
    fn test_relative_references() {
        let resolve = |r: &str| resolve_date_range(QueryType::General, &refs(&[r]), today());
        assert_eq!(resolve("Tomorrow"), Some(DateRange::new(date(2024, 6, 21), date(2024, 6, 21))));
        assert_eq!(resolve("yesterday"), Some(DateRange::new(date(2024, 6, 19), date(2024, 6, 19))));
        assert_eq!(resolve("next month"), Some(DateRange::new(today(), date(2024, 7, 20))));
        assert_eq!(
            resolve("last month"),
            Some(DateRange::new(date(2024, 5, 21), date(2024, 6, 19)))
        );
        assert_eq!(resolve("next 3 days"), Some(DateRange::new(today(), date(2024, 6, 23))));
        assert_eq!(
            resolve("past 10 days"),
            Some(DateRange::new(date(2024, 6, 10), date(2024, 6, 19)))
        );
        assert_eq!(resolve("March 2024"), None);
    }

    #[test]
    fn test_only_first_reference_counts() {
        let range = resolve_date_range(
            QueryType::General,
            &refs(&["tomorrow", "last month"]),
            today(),
        );
        assert_eq!(range.map(|r| r.days()), Some(1));
    }

    #[test]
    fn test_unrecognized_reference_on_forecast_defaults_to_week() {
        let range = resolve_date_range(QueryType::Forecast, &refs(&["the weekend"]), today());
        assert_eq!(range, Some(DateRange::new(today(), date(2024, 6, 27))));
    }

    #[test]
    fn test_planting_season() {
        assert_eq!(
            planting_season(today()),
            Some(DateRange::new(today(), date(2024, 8, 19)))
        );
        let autumn = date(2024, 9, 1);
        assert_eq!(
            planting_season(autumn),
            Some(DateRange::new(date(2025, 4, 1), date(2025, 5, 31)))
        );
    }

    #[tokio::test]
    async fn test_classify_uses_provider_reply() {
        let provider = ScriptedProvider::new(vec![Message::assistant().with_text(
            r#"{"query_type": "agricultural", "locations": ["Des Moines, Iowa"],
                "time_references": [], "parameters": ["soil_moisture_0_to_1cm"],
                "requires_clarification": false}"#,
        )]);
        let classifier = QueryClassifier::new(Arc::new(provider.clone()));
        let intent = classifier
            .classify("Soil moisture in Des Moines?")
            .await
            .unwrap();
        assert_eq!(intent.query_type, QueryType::Agricultural);
        assert_eq!(intent.location(), Some("Des Moines, Iowa"));

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0].messages[0].text().contains("Soil moisture in Des Moines?"));
        assert!(requests[0].operations.is_empty());
    }
}
