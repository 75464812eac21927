//! Raw rendering of HTTP responses
//!
//! The admin tool prints each response the way it appeared on the wire: the
//! status line, one `name: value` line per header, a blank line, then the
//! body. Scripts parse this output, so the shape is fixed.

use bytes::Bytes;

/// A response as received by the admin tool
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub version: String,
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl RawResponse {
    /// Collect a reqwest response, reading the whole body
    pub async fn read(response: reqwest::Response) -> Result<Self, reqwest::Error> {
        let version = format!("{:?}", response.version());
        let status = response.status();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.bytes().await?;

        Ok(Self {
            version,
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            body,
        })
    }

    /// Status line, headers, blank line, body
    pub fn render(&self) -> String {
        let mut out = format!("{} {} {}", self.version, self.status, self.reason)
            .trim_end()
            .to_string();
        out.push('\n');
        for (name, value) in &self.headers {
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&String::from_utf8_lossy(&self.body));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_matches_wire_layout() {
        let response = RawResponse {
            version: "HTTP/1.1".into(),
            status: 200,
            reason: "OK".into(),
            headers: vec![
                ("content-type".into(), "application/json".into()),
                ("content-length".into(), "15".into()),
            ],
            body: Bytes::from_static(b"{\"query_ID\":1}"),
        };

        assert_eq!(
            response.render(),
            "HTTP/1.1 200 OK\ncontent-type: application/json\ncontent-length: 15\n\n{\"query_ID\":1}"
        );
    }

    #[test]
    fn test_render_parses_back_like_a_script_would() {
        let response = RawResponse {
            version: "HTTP/1.1".into(),
            status: 404,
            reason: "Not Found".into(),
            headers: vec![("content-type".into(), "text/plain; charset=utf-8".into())],
            body: Bytes::from_static(b"not found: query_ID 9 is unknown"),
        };
        let text = response.render();
        let (head, body) = text.split_once("\n\n").unwrap();
        let mut lines = head.lines();
        assert_eq!(lines.next(), Some("HTTP/1.1 404 Not Found"));
        let header = lines.next().unwrap();
        let (name, value) = header.split_once(':').unwrap();
        assert_eq!(name, "content-type");
        assert_eq!(value.trim(), "text/plain; charset=utf-8");
        assert_eq!(body, "not found: query_ID 9 is unknown");
    }
}
