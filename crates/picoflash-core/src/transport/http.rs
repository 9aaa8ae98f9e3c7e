//! HTTP gateway for the device's `/rest/ota_*` endpoints.
//!
//! Every call is a GET with query parameters answered by a JSON body. A body
//! carrying an `error` key is a structured rejection whatever the HTTP
//! status code.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use super::traits::{DeviceGateway, DeviceStatus, GatewayError, WriteAck};

/// Per-call timeouts in milliseconds.
///
/// `write` is the shortest of the data calls since it recurs for every chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallTimeouts {
    pub status_ms: u64,
    pub abort_ms: u64,
    pub begin_ms: u64,
    pub write_ms: u64,
    pub end_ms: u64,
    pub apply_ms: u64,
    /// Status polls while the device reboots.
    pub probe_ms: u64,
}

impl Default for CallTimeouts {
    fn default() -> Self {
        Self {
            status_ms: 5_000,
            abort_ms: 5_000,
            begin_ms: 30_000,
            write_ms: 10_000,
            end_ms: 30_000,
            apply_ms: 5_000,
            probe_ms: 3_000,
        }
    }
}

/// Blocking HTTP implementation of `DeviceGateway`.
pub struct HttpGateway {
    base_url: String,
    client: Client,
    timeouts: CallTimeouts,
}

impl std::fmt::Debug for HttpGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpGateway")
            .field("base_url", &self.base_url)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl HttpGateway {
    /// Gateway for `host` (bare host/IP or full `http://` URL).
    pub fn new(host: &str, timeouts: CallTimeouts) -> Result<Self, GatewayError> {
        let base_url = if host.starts_with("http://") || host.starts_with("https://") {
            host.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", host.trim_end_matches('/'))
        };
        // The device sits on the local network; system proxies never reach it
        let client = Client::builder()
            .no_proxy()
            .user_agent(concat!("picoflash/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| GatewayError::Network(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            client,
            timeouts,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn get(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
        timeout_ms: u64,
    ) -> Result<Value, GatewayError> {
        let url = format!("{}/rest/{}", self.base_url, endpoint);
        let map_err = |e: reqwest::Error| {
            if e.is_timeout() {
                GatewayError::Timeout { timeout_ms }
            } else {
                GatewayError::Network(e.to_string())
            }
        };

        let response = self
            .client
            .get(&url)
            .query(query)
            .timeout(Duration::from_millis(timeout_ms))
            .send()
            .map_err(map_err)?;
        let status = response.status();
        let body = response.text().map_err(map_err)?;
        debug!(endpoint, status = status.as_u16(), len = body.len(), "Response");

        serde_json::from_str(&body).map_err(|e| {
            GatewayError::Malformed(format!(
                "{endpoint} returned HTTP {status} with non-JSON body: {e}"
            ))
        })
    }

    /// Like `get`, but an `error` key in the body is a rejection.
    fn call(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
        timeout_ms: u64,
    ) -> Result<Value, GatewayError> {
        let value = self.get(endpoint, query, timeout_ms)?;
        rejection(&value).map_or(Ok(value), Err)
    }
}

fn rejection(value: &Value) -> Option<GatewayError> {
    let reason = value.get("error")?;
    let reason = reason
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| reason.to_string());
    Some(GatewayError::Rejected { reason })
}

fn parse<T: for<'de> Deserialize<'de>>(endpoint: &str, value: Value) -> Result<T, GatewayError> {
    serde_json::from_value(value)
        .map_err(|e| GatewayError::Malformed(format!("{endpoint} response: {e}")))
}

impl DeviceGateway for HttpGateway {
    #[instrument(level = "debug", skip(self))]
    fn status(&self) -> Result<DeviceStatus, GatewayError> {
        let value = self.get("ota_status", &[], self.timeouts.status_ms)?;
        parse("ota_status", value)
    }

    fn abort(&self) -> Result<(), GatewayError> {
        self.get("ota_abort", &[], self.timeouts.abort_ms)?;
        Ok(())
    }

    #[instrument(level = "debug", skip(self))]
    fn begin(&self, size: usize, sha256_hex: &str) -> Result<(), GatewayError> {
        self.call(
            "ota_begin",
            &[("size", size.to_string()), ("sha256", sha256_hex.to_string())],
            self.timeouts.begin_ms,
        )?;
        Ok(())
    }

    fn write(&self, chunk: &[u8]) -> Result<WriteAck, GatewayError> {
        let value = self.call(
            "ota_write",
            &[("data", BASE64.encode(chunk))],
            self.timeouts.write_ms,
        )?;
        parse("ota_write", value)
    }

    fn end(&self) -> Result<(), GatewayError> {
        self.call("ota_end", &[], self.timeouts.end_ms)?;
        Ok(())
    }

    fn apply(&self) -> Result<(), GatewayError> {
        self.call("ota_apply", &[], self.timeouts.apply_ms)?;
        Ok(())
    }

    fn probe(&self) -> Result<DeviceStatus, GatewayError> {
        let value = self.get("ota_status", &[], self.timeouts.probe_ms)?;
        parse("ota_status", value)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use super::*;
    use serde_json::json;

    /// Answer one request on a local port with `response`, then close.
    fn serve_once(response: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 2048];
                let _ = stream.read(&mut buf);
                let _ = stream.write_all(response.as_bytes());
            }
        });
        format!("http://{addr}")
    }

    #[test]
    fn test_base_url() {
        let gw = HttpGateway::new("192.168.4.1", CallTimeouts::default()).unwrap();
        assert_eq!(gw.base_url(), "http://192.168.4.1");

        let gw = HttpGateway::new("http://pico.local/", CallTimeouts::default()).unwrap();
        assert_eq!(gw.base_url(), "http://pico.local");
    }

    #[test]
    fn test_rejection_detection() {
        assert!(rejection(&json!({"status": "ok", "max_chunk": 2048})).is_none());
        match rejection(&json!({"error": "Invalid size"})) {
            Some(GatewayError::Rejected { reason }) => assert_eq!(reason, "Invalid size"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_parse_responses() {
        let ack: WriteAck =
            parse("ota_write", json!({"status": "ok", "received": 2048, "progress": 12})).unwrap();
        assert_eq!(
            ack,
            WriteAck {
                progress: 12,
                received: 2048
            }
        );

        let status: DeviceStatus = parse(
            "ota_status",
            json!({
                "state": "receiving",
                "progress": 40,
                "received": 4096,
                "total": 10240,
                "error": "OK"
            }),
        )
        .unwrap();
        assert_eq!(status.state, "receiving");
        assert!(!status.is_ready_for_begin());

        assert!(matches!(
            parse::<WriteAck>("ota_write", json!({"status": "ok"})),
            Err(GatewayError::Malformed(_))
        ));
    }

    #[test]
    fn test_apply_cut_off_reply_counts_as_lost() {
        // Device resets mid-reply and closes the connection
        let url = serve_once(concat!(
            "HTTP/1.1 200 OK\r\n",
            "Content-Type: application/json\r\n",
            "Connection: close\r\n\r\n",
            "{\"status\":\"appl",
        ));
        let gw = HttpGateway::new(&url, CallTimeouts::default()).unwrap();

        let err = gw.apply().unwrap_err();
        assert!(err.is_reply_lost(), "unexpected: {err:?}");
        assert!(!matches!(err, GatewayError::Rejected { .. }));
    }

    #[test]
    fn test_apply_error_body_is_rejection() {
        let url = serve_once(concat!(
            "HTTP/1.1 400 Bad Request\r\n",
            "Content-Type: application/json\r\n",
            "Content-Length: 30\r\n",
            "Connection: close\r\n\r\n",
            "{\"error\":\"Not ready to apply\"}",
        ));
        let gw = HttpGateway::new(&url, CallTimeouts::default()).unwrap();

        match gw.apply() {
            Err(GatewayError::Rejected { reason }) => assert_eq!(reason, "Not ready to apply"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
