use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use super::{BackendError, BackendResult, ScoringBackend};
use crate::state::scoring::{
    CompetitionId, Leaderboard, MatchId, MatchSummary, ScoreSubmission, ScoringView, Team, UserId,
};

const USER_HEADER: &str = "x-user-id";

/// REST client for the scoring service.
#[derive(Clone)]
pub struct HttpScoringBackend {
    client: Client,
    base_url: Arc<str>,
}

#[derive(Serialize)]
struct ConcedeBody {
    team: Team,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
    error: Option<String>,
}

impl HttpScoringBackend {
    /// Build a client for `base_url` with a per-request timeout.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> BackendResult<Self> {
        let base_url = base_url.into();
        let base_url = base_url.trim().trim_end_matches('/');
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(BackendError::rejected(
                400,
                format!("backend url `{base_url}` must include http:// or https://"),
            ));
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| BackendError::Unreachable {
                message: format!("failed to build HTTP client: {err}"),
            })?;

        Ok(Self {
            client,
            base_url: Arc::from(base_url),
        })
    }

    fn request(&self, method: Method, path: &str, caller: Option<UserId>) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path);
        let builder = self.client.request(method, url);
        match caller {
            Some(user) => builder.header(USER_HEADER, user.to_string()),
            None => builder,
        }
    }

    async fn send_json<T>(builder: RequestBuilder) -> BackendResult<T>
    where
        T: DeserializeOwned,
    {
        let response = builder.send().await.map_err(map_send_error)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Rejected {
                status: status.as_u16(),
                message: parse_error_message(status, &body),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|err| BackendError::Decode {
                message: err.to_string(),
            })
    }
}

fn map_send_error(err: reqwest::Error) -> BackendError {
    if err.is_timeout() {
        BackendError::Timeout
    } else {
        BackendError::Unreachable {
            message: err.to_string(),
        }
    }
}

fn parse_error_message(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return message.trim().to_string();
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        trimmed.chars().take(180).collect()
    }
}

impl ScoringBackend for HttpScoringBackend {
    fn get_scoring_view(
        &self,
        match_id: MatchId,
        caller: UserId,
    ) -> BoxFuture<'static, BackendResult<ScoringView>> {
        let backend = self.clone();
        Box::pin(async move {
            let path = format!("matches/{match_id}/scoring");
            Self::send_json(backend.request(Method::GET, &path, Some(caller))).await
        })
    }

    fn submit_hole_score(
        &self,
        match_id: MatchId,
        caller: UserId,
        hole_number: u8,
        submission: ScoreSubmission,
    ) -> BoxFuture<'static, BackendResult<ScoringView>> {
        let backend = self.clone();
        Box::pin(async move {
            let path = format!("matches/{match_id}/holes/{hole_number}/score");
            let builder = backend
                .request(Method::POST, &path, Some(caller))
                .json(&submission);
            Self::send_json(builder).await
        })
    }

    fn submit_scorecard(
        &self,
        match_id: MatchId,
        caller: UserId,
    ) -> BoxFuture<'static, BackendResult<MatchSummary>> {
        let backend = self.clone();
        Box::pin(async move {
            let path = format!("matches/{match_id}/scorecard");
            Self::send_json(backend.request(Method::POST, &path, Some(caller))).await
        })
    }

    fn concede_match(
        &self,
        match_id: MatchId,
        caller: UserId,
        team: Team,
        reason: Option<String>,
    ) -> BoxFuture<'static, BackendResult<ScoringView>> {
        let backend = self.clone();
        Box::pin(async move {
            let path = format!("matches/{match_id}/concede");
            let builder = backend
                .request(Method::POST, &path, Some(caller))
                .json(&ConcedeBody { team, reason });
            Self::send_json(builder).await
        })
    }

    fn get_leaderboard(
        &self,
        competition_id: CompetitionId,
    ) -> BoxFuture<'static, BackendResult<Leaderboard>> {
        let backend = self.clone();
        Box::pin(async move {
            let path = format!("competitions/{competition_id}/leaderboard");
            Self::send_json(backend.request(Method::GET, &path, None)).await
        })
    }

    fn health_check(&self) -> BoxFuture<'static, BackendResult<()>> {
        let backend = self.clone();
        Box::pin(async move {
            let response = backend
                .request(Method::GET, "health", None)
                .send()
                .await
                .map_err(map_send_error)?;
            if response.status().is_success() {
                Ok(())
            } else {
                Err(BackendError::Rejected {
                    status: response.status().as_u16(),
                    message: "health check failed".into(),
                })
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;

    #[test]
    fn base_url_requires_scheme_and_drops_trailing_slash() {
        assert!(HttpScoringBackend::new("scores.example.com", Duration::from_secs(1)).is_err());
        let backend =
            HttpScoringBackend::new("https://scores.example.com/api/", Duration::from_secs(1))
                .unwrap();
        assert_eq!(&*backend.base_url, "https://scores.example.com/api");
    }

    #[test]
    fn error_message_prefers_json_payload() {
        assert_eq!(
            parse_error_message(StatusCode::CONFLICT, r#"{"message":" scorecard already submitted "}"#),
            "scorecard already submitted"
        );
        assert_eq!(parse_error_message(StatusCode::BAD_GATEWAY, "  "), "HTTP 502");
        assert_eq!(
            parse_error_message(StatusCode::FORBIDDEN, "not a participant"),
            "not a participant"
        );
    }

    #[test]
    fn caller_header_is_attached() {
        let backend =
            HttpScoringBackend::new("http://localhost:9000", Duration::from_secs(1)).unwrap();
        let user = Uuid::new_v4();
        let request = backend
            .request(Method::GET, "matches/x/scoring", Some(user))
            .build()
            .unwrap();
        assert_eq!(request.url().as_str(), "http://localhost:9000/matches/x/scoring");
        assert_eq!(
            request.headers().get(USER_HEADER).unwrap().to_str().unwrap(),
            user.to_string()
        );
    }
}
