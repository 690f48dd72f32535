use secrecy::{ExposeSecret, SecretString};
use url::Url;

use super::{NotifyError, RestoreNotifier, WS_FORMAT, WS_FUNCTION};
use crate::config::RemoteConfig;
use crate::events::{EventBroadcaster, MigrationEvent};
use crate::sanitize::{redact_token, TOKEN_PARAM};
use crate::secrets::SecretError;

/// Calls the destination's REST web service with a single GET request.
///
/// Success is the literal body `null`. Anything else is a failure and is
/// reported as an `http_request_failed` event with the token redacted.
pub struct HttpRestoreNotifier {
    client: reqwest::blocking::Client,
    endpoint: Url,
    token: SecretString,
    events: EventBroadcaster,
}

impl std::fmt::Debug for HttpRestoreNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRestoreNotifier")
            .field("endpoint", &self.endpoint.as_str())
            .finish_non_exhaustive()
    }
}

impl HttpRestoreNotifier {
    /// Fails with [`NotifyError::NotConfigured`] unless both the endpoint
    /// and a token source are set.
    pub fn new(config: &RemoteConfig, events: EventBroadcaster) -> Result<Self, NotifyError> {
        let endpoint = config
            .endpoint_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or(NotifyError::NotConfigured)?;
        let endpoint = Url::parse(endpoint).map_err(|e| NotifyError::InvalidUrl(e.to_string()))?;

        let token = match config.token_source().resolve() {
            Ok(token) => token,
            Err(SecretError::NoSourceProvided) => return Err(NotifyError::NotConfigured),
            Err(e) => return Err(e.into()),
        };

        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            token,
            events,
        })
    }

    fn request_url(&self, filename: &str, category_id: Option<i64>) -> Url {
        let mut url = self.endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair(TOKEN_PARAM, self.token.expose_secret())
                .append_pair("wsfunction", WS_FUNCTION)
                .append_pair("filename", filename);
            if let Some(category_id) = category_id {
                query.append_pair("categoryid", &category_id.to_string());
            }
            query.append_pair("moodlewsrestformat", WS_FORMAT);
        }
        url
    }

    fn send(&self, url: &Url) -> Result<(), NotifyError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(NotifyError::InvalidStatus(status.as_u16()));
        }

        let body = response
            .text()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        validate_body(&body)
    }
}

/// The web service returns `null` on success and an object carrying an
/// `exception` field on failure.
fn validate_body(body: &str) -> Result<(), NotifyError> {
    if body == "null" {
        return Ok(());
    }

    let data: serde_json::Value = serde_json::from_str(body).unwrap_or(serde_json::Value::Null);
    if is_truthy(data.get("exception")) {
        let message = data
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or_default()
            .to_string();
        return Err(NotifyError::Exception(message));
    }
    Err(NotifyError::UnexpectedResponse)
}

fn is_truthy(value: Option<&serde_json::Value>) -> bool {
    match value {
        None | Some(serde_json::Value::Null) => false,
        Some(serde_json::Value::Bool(b)) => *b,
        Some(serde_json::Value::String(s)) => !s.is_empty() && s != "0",
        Some(serde_json::Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(serde_json::Value::Array(a)) => !a.is_empty(),
        Some(serde_json::Value::Object(_)) => true,
    }
}

impl RestoreNotifier for HttpRestoreNotifier {
    fn request_restore(&self, filename: &str, category_id: Option<i64>) -> Result<(), NotifyError> {
        let url = self.request_url(filename, category_id);
        let span = tracing::info_span!("notify_restore", filename = %filename, category_id = ?category_id);
        let _guard = span.enter();

        match self.send(&url) {
            Ok(()) => {
                tracing::info!("Restore requested on destination");
                Ok(())
            }
            Err(e) => {
                let error = e.to_string();
                tracing::warn!(url = %redact_token(url.as_str()), error = %redact_token(&error), "Restore request failed");
                self.events
                    .emit(MigrationEvent::http_request_failed(url.as_str(), &error));
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread::JoinHandle;

    /// Serves exactly one HTTP response and returns the request line seen.
    fn serve_once(status: &str, body: &str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );

        let handle = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if line == "\r\n" || line.is_empty() {
                    break;
                }
            }
            stream.write_all(response.as_bytes()).unwrap();
            stream.flush().unwrap();
            request_line
        });

        (format!("http://{}/webservice/rest/server.php", addr), handle)
    }

    fn remote(endpoint: &str) -> RemoteConfig {
        RemoteConfig {
            endpoint_url: Some(endpoint.to_string()),
            token: Some("s3cr3t-token".to_string()),
            timeout_secs: 5,
            connect_timeout_secs: 5,
            ..Default::default()
        }
    }

    #[test]
    fn test_not_configured() {
        let events = EventBroadcaster::new(4);
        let result = HttpRestoreNotifier::new(&RemoteConfig::default(), events.clone());
        assert!(matches!(result, Err(NotifyError::NotConfigured)));

        let mut config = RemoteConfig::default();
        config.endpoint_url = Some("https://dest.example/ws".into());
        let result = HttpRestoreNotifier::new(&config, events);
        assert!(matches!(result, Err(NotifyError::NotConfigured)));
    }

    #[test]
    fn test_success_on_null_body() {
        let (endpoint, server) = serve_once("200 OK", "null");
        let notifier = HttpRestoreNotifier::new(&remote(&endpoint), EventBroadcaster::new(4)).unwrap();

        notifier.request_restore("12-backup.mbz", Some(3)).unwrap();

        let request_line = server.join().unwrap();
        assert!(request_line.starts_with("GET /webservice/rest/server.php?"));
        assert!(request_line.contains("wstoken=s3cr3t-token"));
        assert!(request_line.contains("wsfunction=tool_coursemigration_request_restore"));
        assert!(request_line.contains("filename=12-backup.mbz"));
        assert!(request_line.contains("categoryid=3"));
        assert!(request_line.contains("moodlewsrestformat=json"));
    }

    #[test]
    fn test_forbidden_emits_redacted_event() {
        let (endpoint, server) = serve_once("403 Forbidden", "");
        let events = EventBroadcaster::new(4);
        let mut rx = events.subscribe();
        let notifier = HttpRestoreNotifier::new(&remote(&endpoint), events).unwrap();

        let err = notifier.request_restore("12-backup.mbz", Some(3)).unwrap_err();
        server.join().unwrap();
        assert!(matches!(err, NotifyError::InvalidStatus(403)));
        assert_eq!(
            err.to_string(),
            "Error attempting to make HTTP request: Invalid HTTP code: 403."
        );

        let record = rx.try_recv().unwrap();
        match record.event {
            MigrationEvent::HttpRequestFailed { url, error } => {
                assert!(url.contains("wstoken=XXX"));
                assert!(!url.contains("s3cr3t-token"));
                assert!(!error.contains("s3cr3t-token"));
                assert!(error.contains("Invalid HTTP code: 403"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_exception_body() {
        let (endpoint, server) = serve_once(
            "200 OK",
            r#"{"exception":"invalid_parameter_exception","errorcode":"invalidparameter","message":"Invalid parameter value detected"}"#,
        );
        let notifier = HttpRestoreNotifier::new(&remote(&endpoint), EventBroadcaster::new(4)).unwrap();

        let err = notifier.request_restore("a.mbz", None).unwrap_err();
        let request_line = server.join().unwrap();
        assert!(!request_line.contains("categoryid"));
        assert_eq!(
            err.to_string(),
            "Error attempting to make HTTP request: Invalid parameter value detected."
        );
    }

    #[test]
    fn test_validate_body() {
        assert!(validate_body("null").is_ok());
        assert!(matches!(
            validate_body(r#"{"status": true}"#),
            Err(NotifyError::UnexpectedResponse)
        ));
        assert!(matches!(
            validate_body("<html>oops</html>"),
            Err(NotifyError::UnexpectedResponse)
        ));
        assert!(matches!(
            validate_body(r#"{"exception": "x"}"#),
            Err(NotifyError::Exception(m)) if m.is_empty()
        ));
        assert!(matches!(
            validate_body(r#"{"exception": ""}"#),
            Err(NotifyError::UnexpectedResponse)
        ));
    }
}
