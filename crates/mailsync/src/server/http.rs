//! Minimal HTTP/1.1 request parsing and response writing
//!
//! Enough for a JSON trigger endpoint: request line, headers, and an
//! ignored body. Connections are closed after one response.

use anyhow::{Context, Result};
use serde::Serialize;
use std::io::{BufRead, Read, Write};

/// Upper bound on header lines accepted per request
const MAX_HEADERS: usize = 64;

/// Bodies are never needed; anything larger than this is not drained
const MAX_DISCARDED_BODY: u64 = 64 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
}

impl Request {
    /// Read one request from `reader`
    pub fn read_from<R: BufRead>(reader: &mut R) -> Result<Self> {
        let mut request_line = String::new();
        reader
            .read_line(&mut request_line)
            .context("Failed to read request")?;

        // Format: POST /sync/42 HTTP/1.1
        let mut parts = request_line.split_whitespace();
        let method = parts.next().context("Empty request line")?.to_ascii_uppercase();
        let target = parts.next().context("Request line has no path")?;
        let path = target.split('?').next().unwrap_or(target).to_string();

        let mut headers = Vec::new();
        loop {
            let mut line = String::new();
            let read = reader.read_line(&mut line).context("Failed to read header")?;
            let line = line.trim_end();
            if read == 0 || line.is_empty() {
                break;
            }
            if headers.len() >= MAX_HEADERS {
                anyhow::bail!("Too many headers");
            }
            if let Some((name, value)) = line.split_once(':') {
                headers.push((name.trim().to_string(), value.trim().to_string()));
            }
        }

        let request = Self {
            method,
            path,
            headers,
        };

        if let Some(len) = request.header("Content-Length").and_then(|v| v.parse::<u64>().ok()) {
            std::io::copy(&mut reader.take(len.min(MAX_DISCARDED_BODY)), &mut std::io::sink())
                .context("Failed to read request body")?;
        }

        Ok(request)
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: serde_json::Value,
}

impl Response {
    pub fn json<T: Serialize>(status: u16, body: &T) -> Self {
        let body = serde_json::to_value(body)
            .unwrap_or_else(|e| serde_json::json!({ "success": false, "error": e.to_string() }));
        Self { status, body }
    }

    pub fn error(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            body: serde_json::json!({ "success": false, "error": message.into() }),
        }
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        let body = self.body.to_string();
        write!(
            writer,
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.status,
            reason_phrase(self.status),
            body.len(),
            body
        )?;
        writer.flush()?;
        Ok(())
    }
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        _ => "Unknown",
    }
}
