//! Upstream feed seam: what to fetch, and the trait the host implements to fetch it.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use serde_json::Value as Json;

/// One upstream request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    /// Every route.
    Routes,
    /// A route's pattern on a given service day.
    Pattern {
        route_short_name: String,
        date: NaiveDate,
    },
}

impl Query {
    /// Path relative to the API base URL. Month and day are not zero-padded.
    pub fn path(&self) -> String {
        match self {
            Query::Routes => "Routes".to_string(),
            Query::Pattern {
                route_short_name,
                date,
            } => format!(
                "route/{}/pattern/{}-{}-{}",
                route_short_name,
                date.year(),
                date.month(),
                date.day()
            ),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("upstream returned status {0}")]
    Status(u16),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Fetches a query's JSON body from upstream.
#[async_trait]
pub trait Source: Send + Sync {
    async fn fetch(&self, query: &Query) -> Result<Json, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routes_path() {
        assert_eq!(Query::Routes.path(), "Routes");
    }

    #[test]
    fn pattern_path_is_date_scoped() {
        let q = Query::Pattern {
            route_short_name: "12".into(),
            date: NaiveDate::from_ymd_opt(2024, 3, 7).unwrap(),
        };
        assert_eq!(q.path(), "route/12/pattern/2024-3-7");

        let later = Query::Pattern {
            route_short_name: "12".into(),
            date: NaiveDate::from_ymd_opt(2024, 11, 21).unwrap(),
        };
        assert_eq!(later.path(), "route/12/pattern/2024-11-21");
    }
}
