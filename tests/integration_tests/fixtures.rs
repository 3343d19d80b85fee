//! Test fixtures for integration tests
//!
//! Provides sample detail payloads served by the mock source

/// Complete detail payload: title plus every relationship collection
pub const COMPLETE_DETAIL_JSON: &str = r#"{
    "title": "The Left Hand of Darkness",
    "summary": "An envoy visits the planet Gethen.",
    "published_on": "1969-03-01",
    "attributes": {"pages": 286, "language": "en"},
    "authors": [{"key": "ulg", "name": "Ursula K. Le Guin"}],
    "publishers": [{"key": "ace", "name": "Ace Books"}],
    "subjects": [{"key": "sf", "name": "Science fiction"}]
}"#;

/// Detail payload missing its relationship collections
pub const PARTIAL_DETAIL_JSON: &str = r#"{
    "title": "Untitled draft",
    "authors": []
}"#;

/// Body that is not a detail payload at all
pub const MALFORMED_BODY: &str = "<html><body>Service temporarily unavailable</body></html>";
