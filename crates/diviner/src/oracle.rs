//! Oracle client.
//!
//! The oracle is a web form: the test input is posted as a multipart file
//! field and the reference output comes back inside `<pre>` blocks of an HTML
//! page.

use std::sync::LazyLock;
use std::time::Duration;

use regex::{Captures, Regex};
use reqwest::blocking::{Client, multipart};

use crate::error::{OracleError, SetupError};

/// Multipart field the oracle form expects.
pub const INPUT_FIELD: &str = "input";

/// Marker the tokens oracle prints instead of a second `<pre>` block.
pub const NO_ERROR_OUTPUT: &str = "(no error output)";

static PRE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<pre\b[^>]*>(.*?)</pre\s*>").unwrap());
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]*>").unwrap());
static ENTITY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);").unwrap());

/// Anything that can turn a test input into reference output.
///
/// One call is one attempt; retrying is the resolver's job.
pub trait ReferenceSource: Send + Sync {
    fn fetch(&self, file_name: &str, input: &[u8]) -> Result<String, OracleError>;

    /// Human-readable location, used in the run banner.
    fn describe(&self) -> String;
}

/// How the reference output is cut out of the oracle page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageExtraction {
    /// Text of the first `<pre>` block.
    FirstBlock,
    /// Tokens block followed by the errors block, unless the page says there
    /// is no error output.
    TokensAndErrors,
}

impl PageExtraction {
    pub fn extract(self, html: &str) -> Result<String, OracleError> {
        let blocks = pre_blocks(html);
        let first = blocks.first().ok_or(OracleError::MissingOutput)?;
        match self {
            PageExtraction::FirstBlock => Ok(first.clone()),
            PageExtraction::TokensAndErrors => {
                if html.contains(NO_ERROR_OUTPUT) {
                    Ok(first.clone())
                } else {
                    Ok(blocks.iter().take(2).map(String::as_str).collect())
                }
            }
        }
    }
}

/// Text content of every `<pre>` block, tags stripped and entities decoded.
pub fn pre_blocks(html: &str) -> Vec<String> {
    PRE_BLOCK
        .captures_iter(html)
        .map(|caps| decode_entities(&TAG.replace_all(&caps[1], "")))
        .collect()
}

fn decode_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |caps: &Captures| {
            let name = &caps[1];
            let decoded = match name {
                "lt" => Some('<'),
                "gt" => Some('>'),
                "amp" => Some('&'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some('\u{a0}'),
                _ => {
                    let code = if let Some(hex) = name.strip_prefix("#x").or(name.strip_prefix("#X")) {
                        u32::from_str_radix(hex, 16).ok()
                    } else if let Some(dec) = name.strip_prefix('#') {
                        dec.parse().ok()
                    } else {
                        None
                    };
                    code.and_then(char::from_u32)
                }
            };
            match decoded {
                Some(c) => c.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Oracle reached over HTTP.
pub struct HttpOracle {
    url: String,
    client: Client,
    extraction: PageExtraction,
}

impl HttpOracle {
    pub fn new(
        url: impl Into<String>,
        timeout: Duration,
        extraction: PageExtraction,
    ) -> Result<Self, SetupError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SetupError::Client(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            client,
            extraction,
        })
    }
}

impl ReferenceSource for HttpOracle {
    fn fetch(&self, file_name: &str, input: &[u8]) -> Result<String, OracleError> {
        let part = multipart::Part::bytes(input.to_vec()).file_name(file_name.to_string());
        let form = multipart::Form::new().part(INPUT_FIELD, part);

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .map_err(|e| OracleError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(OracleError::Http(response.status().as_u16()));
        }

        let body = response
            .text()
            .map_err(|e| OracleError::Network(e.to_string()))?;
        self.extraction.extract(&body)
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_pre_blocks_decode_text() {
        let html = r#"<html><body><h2>Output</h2>
<pre class="out">a &lt; b &amp;&amp; c
<b>bold</b>&#65;&#x42;
</pre><pre>second</pre></body></html>"#;
        let blocks = pre_blocks(html);
        assert_eq!(blocks, ["a < b && c\nboldAB\n", "second"]);
    }

    #[test]
    fn test_unknown_entity_kept() {
        assert_eq!(decode_entities("&bogus; &amp;lt;"), "&bogus; &lt;");
    }

    #[test]
    fn test_tokens_and_errors_extraction() {
        let both = "<pre>ID:x\n</pre><pre>1:1 bad char\n</pre>";
        assert_eq!(
            PageExtraction::TokensAndErrors.extract(both).unwrap(),
            "ID:x\n1:1 bad char\n"
        );

        let clean = "<pre>ID:x\n</pre><p>(no error output)</p>";
        assert_eq!(
            PageExtraction::TokensAndErrors.extract(clean).unwrap(),
            "ID:x\n"
        );
        assert_eq!(PageExtraction::FirstBlock.extract(both).unwrap(), "ID:x\n");
    }

    #[test]
    fn test_missing_pre_is_an_error() {
        assert!(matches!(
            PageExtraction::FirstBlock.extract("<html>busy</html>"),
            Err(OracleError::MissingOutput)
        ));
    }

    /// Serve one canned response and hand back the raw request.
    fn serve_once(status: &'static str, body: &'static str) -> (String, thread::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/o5/", listener.local_addr().unwrap());
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let mut head = String::new();
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                if let Some(value) = line
                    .to_ascii_lowercase()
                    .strip_prefix("content-length:")
                    .map(|v| v.trim().to_string())
                {
                    content_length = value.parse().unwrap();
                }
                let end = line == "\r\n";
                head.push_str(&line);
                if end {
                    break;
                }
            }
            let mut payload = vec![0; content_length];
            reader.read_exact(&mut payload).unwrap();
            head.push_str(&String::from_utf8_lossy(&payload));

            let mut stream = reader.into_inner();
            write!(
                stream,
                "HTTP/1.1 {status}\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            )
            .unwrap();
            stream.flush().unwrap();
            head
        });
        (url, handle)
    }

    #[test]
    fn test_http_oracle_posts_multipart_input() {
        let (url, server) = serve_once("200 OK", "<html><pre>OK\n</pre></html>");
        let oracle =
            HttpOracle::new(url, Duration::from_secs(5), PageExtraction::FirstBlock).unwrap();

        let output = oracle.fetch("t1.foo", b"int x;").unwrap();
        assert_eq!(output, "OK\n");

        let request = server.join().unwrap();
        assert!(request.starts_with("POST /o5/"));
        assert!(request.contains("name=\"input\""));
        assert!(request.contains("filename=\"t1.foo\""));
        assert!(request.contains("int x;"));
    }

    #[test]
    fn test_http_oracle_reports_status() {
        let (url, server) = serve_once("503 Service Unavailable", "busy");
        let oracle =
            HttpOracle::new(url, Duration::from_secs(5), PageExtraction::FirstBlock).unwrap();

        assert!(matches!(
            oracle.fetch("t1.foo", b""),
            Err(OracleError::Http(503))
        ));
        server.join().unwrap();
    }
}
