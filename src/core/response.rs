// Inbound response validation: status line, Content-Length, and body length checks.
use crate::core::charset::Charset;
use crate::core::error::{Error, ErrorKind};
use regex::Regex;
use std::sync::LazyLock;

static STATUS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^HTTP/[0-9.]+[ \t]+(([0-9]{3})(?:[ \t][^\r\n]*)?)\r?(?:\n|$)")
        .expect("status line pattern")
});
static CONTENT_LENGTH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^Content-Length:\s*([0-9]+)").expect("content-length pattern")
});

/// A validated broker response borrowed from the decoded text.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Response<'a> {
    pub status: u16,
    pub headers: &'a str,
    pub body: &'a str,
}

/// Decodes raw response bytes and returns the validated body.
///
/// An empty read is a valid empty result, not a protocol error.
pub fn read_body(raw: &[u8], charset: Charset) -> Result<String, Error> {
    if raw.is_empty() {
        return Ok(String::new());
    }
    let text = charset.decode(raw);
    let response = parse_response(&text)?;
    Ok(response.body.to_string())
}

pub fn parse_response(text: &str) -> Result<Response<'_>, Error> {
    let Some((headers, body)) = split_head(text) else {
        return Err(Error::new(ErrorKind::MalformedResponse)
            .with_message("response has no header/body separator")
            .with_detail(text));
    };

    let Some(status_line) = STATUS_LINE.captures(headers) else {
        return Err(Error::new(ErrorKind::NonHttpResponse)
            .with_message("non-HTTP response received")
            .with_detail(text));
    };
    let status_text = status_line.get(1).map_or("", |m| m.as_str()).trim_end();
    let status = status_line
        .get(2)
        .and_then(|m| m.as_str().parse::<u16>().ok())
        .ok_or_else(|| {
            Error::new(ErrorKind::NonHttpResponse)
                .with_message("response status code is not numeric")
                .with_detail(text)
        })?;
    if status != 200 {
        return Err(Error::new(ErrorKind::RequestFailed)
            .with_message(format!("request failed: {status_text}"))
            .with_status(status)
            .with_detail(body));
    }

    let declared = CONTENT_LENGTH
        .captures(headers)
        .and_then(|caps| caps.get(1))
        .ok_or_else(|| {
            Error::new(ErrorKind::MissingContentLength)
                .with_message("no Content-Length header in response headers")
                .with_detail(headers)
        })?;
    let declared = declared.as_str().parse::<u64>().map_err(|err| {
        Error::new(ErrorKind::MalformedResponse)
            .with_message("Content-Length header is out of range")
            .with_source(err)
    })?;
    let actual = Charset::char_len(body) as u64;
    if declared != actual {
        return Err(Error::new(ErrorKind::TruncatedResponse)
            .with_message(
                "response length differs from Content-Length header: possibly broken response",
            )
            .with_lengths(declared, actual));
    }

    Ok(Response {
        status,
        headers,
        body,
    })
}

/// Splits at the first blank line, accepting `\n` or `\r\n` line ends.
fn split_head(text: &str) -> Option<(&str, &str)> {
    let mut from = 0;
    while let Some(offset) = text[from..].find('\n') {
        let newline = from + offset;
        let rest = &text[newline + 1..];
        let rest = rest.strip_prefix('\r').unwrap_or(rest);
        if let Some(body) = rest.strip_prefix('\n') {
            let head = &text[..newline];
            return Some((head.strip_suffix('\r').unwrap_or(head), body));
        }
        from = newline + 1;
    }
    None
}
