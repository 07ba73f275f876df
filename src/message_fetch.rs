//! Streaming download of message audio from the API server.

use reqwest::StatusCode;
use reqwest::blocking::Client;
use std::io::Read;
use std::time::Duration;

use crate::audio::AudioFetcher;
use crate::config::NetworkConfig;
use crate::error::{StreamError, StreamResult};

/// Blocking HTTP fetcher for the playback thread.
///
/// `timeout` bounds the whole download, body included. Playback reads the
/// body at real-time pace, so it is also the longest message that can play.
pub struct HttpFetcher {
    connect_timeout: Duration,
    timeout: Duration,
    // Built on first use, from the playback thread; the blocking client
    // must not be created inside the async runtime.
    client: Option<Client>,
}

impl HttpFetcher {
    pub fn new(connect_timeout: Duration, timeout: Duration) -> Self {
        Self {
            connect_timeout,
            timeout,
            client: None,
        }
    }

    fn client(&mut self) -> StreamResult<&Client> {
        if self.client.is_none() {
            let client = Client::builder()
                .connect_timeout(self.connect_timeout)
                .timeout(self.timeout)
                .build()
                .map_err(map_reqwest)?;
            self.client = Some(client);
        }
        self.client
            .as_ref()
            .ok_or_else(|| StreamError::Transport("http client unavailable".into()))
    }
}

pub fn audio_url(server_url: &str, message_id: &str) -> String {
    format!("{}/messages/{}/audio", server_url.trim_end_matches('/'), message_id)
}

fn map_reqwest(e: reqwest::Error) -> StreamError {
    if e.is_timeout() {
        StreamError::Timeout(e.to_string())
    } else {
        StreamError::Transport(e.to_string())
    }
}

impl AudioFetcher for HttpFetcher {
    fn open(&mut self, cfg: &NetworkConfig, message_id: &str) -> StreamResult<Box<dyn Read + Send>> {
        let url = audio_url(&cfg.server_url, message_id);
        log::info!("Fetching {}", url);
        let resp = self
            .client()?
            .get(&url)
            .bearer_auth(&cfg.auth_token)
            .send()
            .map_err(map_reqwest)?;

        if resp.status() != StatusCode::OK {
            return Err(StreamError::Protocol(format!("HTTP {} for {}", resp.status(), url)));
        }
        if let Some(len) = resp.content_length() {
            log::debug!("Audio body is {} bytes", len);
        }
        Ok(Box::new(resp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::thread;

    /// Serve one canned response and hand back the raw request head.
    fn serve_once(status: &str, body: &'static [u8]) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let status = status.to_string();
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut head = Vec::new();
            let mut byte = [0u8; 1];
            while !head.ends_with(b"\r\n\r\n") {
                if conn.read(&mut byte).unwrap() == 0 {
                    break;
                }
                head.push(byte[0]);
            }
            tx.send(String::from_utf8_lossy(&head).to_string()).unwrap();
            write!(
                conn,
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                status,
                body.len()
            )
            .unwrap();
            conn.write_all(body).unwrap();
        });
        (base, rx)
    }

    fn net(server_url: String) -> NetworkConfig {
        NetworkConfig {
            server_url,
            auth_token: "secret".into(),
            ..Default::default()
        }
    }

    #[test]
    fn streams_body_with_bearer_auth() {
        let (base, head) = serve_once("200 OK", b"ID3-and-frames");
        let mut fetcher = HttpFetcher::new(Duration::from_secs(2), Duration::from_secs(5));
        let mut body = fetcher.open(&net(base), "msg-7").unwrap();
        let mut got = Vec::new();
        body.read_to_end(&mut got).unwrap();
        assert_eq!(got, b"ID3-and-frames");

        let head = head.recv().unwrap().to_lowercase();
        assert!(head.starts_with("get /messages/msg-7/audio "));
        assert!(head.contains("authorization: bearer secret"));
    }

    #[test]
    fn non_ok_status_is_a_protocol_error() {
        let (base, _head) = serve_once("404 Not Found", b"");
        let mut fetcher = HttpFetcher::new(Duration::from_secs(2), Duration::from_secs(5));
        let err = fetcher.open(&net(base), "missing").err().unwrap();
        assert!(matches!(err, StreamError::Protocol(_)));
    }

    #[test]
    fn unreachable_server_is_a_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let mut fetcher = HttpFetcher::new(Duration::from_secs(1), Duration::from_secs(2));
        let err = fetcher.open(&net(base), "m").err().unwrap();
        assert!(matches!(err, StreamError::Transport(_) | StreamError::Timeout(_)));
    }

    #[test]
    fn stalled_body_ends_with_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut buf = [0u8; 1024];
            let _ = conn.read(&mut buf);
            conn.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\n0123456789")
                .unwrap();
            thread::sleep(Duration::from_secs(3));
        });

        let mut fetcher = HttpFetcher::new(Duration::from_secs(1), Duration::from_millis(300));
        let started = std::time::Instant::now();
        let mut body = fetcher.open(&net(base), "slow").unwrap();
        let mut got = Vec::new();
        assert!(body.read_to_end(&mut got).is_err());
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn audio_url_joins_cleanly() {
        assert_eq!(audio_url("https://api.example.com/", "a1"), "https://api.example.com/messages/a1/audio");
    }
}
