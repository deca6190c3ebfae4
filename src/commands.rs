//! NNTP command builders and response parsers

use crate::error::{NntpError, Result};
use crate::response::NntpResponse;
use chrono::NaiveDateTime;

/// Longest response line accepted before the peer is considered broken
pub const MAX_RESPONSE_LINE: usize = 4096;

/// Parse NNTP response line into code and message
pub fn parse_response_line(line: &str) -> Result<(u16, String)> {
    // Check minimum length and that first 3 chars are ASCII digits
    let bytes = line.as_bytes();
    if bytes.len() < 3
        || !bytes[0].is_ascii_digit()
        || !bytes[1].is_ascii_digit()
        || !bytes[2].is_ascii_digit()
        || (bytes.len() > 3 && bytes[3] != b' ')
    {
        return Err(NntpError::InvalidResponse(line.chars().take(100).collect()));
    }

    // Safe to slice since we verified ASCII
    let code = line[0..3]
        .parse::<u16>()
        .map_err(|_| NntpError::InvalidResponse(line.chars().take(100).collect()))?;

    let message = if line.len() > 4 {
        line[4..].to_string()
    } else {
        String::new()
    };

    Ok((code, message))
}

/// Parse single-line NNTP response
pub fn parse_single_response(line: &str) -> Result<NntpResponse> {
    let (code, message) = parse_response_line(line)?;
    Ok(NntpResponse { code, message })
}

/// Build AUTHINFO USER command
pub fn authinfo_user(username: &str) -> String {
    format!("AUTHINFO USER {}\r\n", username)
}

/// Build AUTHINFO PASS command
pub fn authinfo_pass(password: &str) -> String {
    format!("AUTHINFO PASS {}\r\n", password)
}

/// Build GROUP command
pub fn group(newsgroup: &str) -> String {
    format!("GROUP {}\r\n", newsgroup)
}

/// Build STAT command (RFC 3977 §6.2.4)
///
/// Accepts either an article number or a message-id.
pub fn stat(id: &str) -> String {
    format!("STAT {}\r\n", id)
}

/// Build POST command (RFC 3977 §6.3.1)
pub fn post() -> &'static str {
    "POST\r\n"
}

/// Build IHAVE command (RFC 3977 §6.3.2)
pub fn ihave(message_id: &str) -> String {
    format!("IHAVE {}\r\n", message_id)
}

/// Build DATE command (RFC 3977 §7.1)
pub fn date() -> &'static str {
    "DATE\r\n"
}

/// Build QUIT command
pub fn quit() -> &'static str {
    "QUIT\r\n"
}

/// Result of a successful GROUP command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupInfo {
    /// Estimated number of articles
    pub count: u64,
    /// Lowest article number
    pub first: u64,
    /// Highest article number
    pub last: u64,
    /// Group name as echoed by the server
    pub name: String,
}

/// Parse GROUP response
///
/// Response format: "211 count first last group-name"
pub fn parse_group_response(response: &NntpResponse) -> Result<GroupInfo> {
    let parts: Vec<&str> = response.message.split_whitespace().collect();
    if parts.len() < 3 {
        return Err(NntpError::InvalidResponse(response.message.clone()));
    }

    let number = |s: &str| {
        s.parse::<u64>()
            .map_err(|_| NntpError::InvalidResponse(response.message.clone()))
    };

    Ok(GroupInfo {
        count: number(parts[0])?,
        first: number(parts[1])?,
        last: number(parts[2])?,
        name: parts.get(3).map(|s| s.to_string()).unwrap_or_default(),
    })
}

/// Parse STAT response (RFC 3977 §6.2.4)
///
/// Response format: "223 n message-id"
/// - n is the article number (0 if message-id was used in request)
///
/// Returns tuple of (article_number, message_id)
pub fn parse_stat_response(response: &NntpResponse) -> Result<(u64, String)> {
    let mut parts = response.message.split_whitespace();
    let article_number = parts
        .next()
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| NntpError::InvalidResponse(response.message.clone()))?;
    let message_id = parts
        .next()
        .ok_or_else(|| NntpError::InvalidResponse(response.message.clone()))?;

    Ok((article_number, message_id.to_string()))
}

/// Parse DATE response (RFC 3977 §7.1)
///
/// Response format: "111 yyyymmddhhmmss", always UTC
pub fn parse_date_response(response: &NntpResponse) -> Result<NaiveDateTime> {
    let stamp = response.message.split_whitespace().next().unwrap_or("");
    if stamp.len() != 14 {
        return Err(NntpError::InvalidResponse(response.message.clone()));
    }
    NaiveDateTime::parse_from_str(stamp, "%Y%m%d%H%M%S")
        .map_err(|_| NntpError::InvalidResponse(response.message.clone()))
}

/// Find a message-id (`<...@...>`) echoed in a response text
///
/// Servers commonly answer a post with "240 <id> Article received".
pub fn find_message_id(text: &str) -> Option<&str> {
    text.split_whitespace()
        .find(|token| token.len() > 2 && token.starts_with('<') && token.ends_with('>'))
        .filter(|token| token.contains('@'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::codes;

    fn response(code: u16, message: &str) -> NntpResponse {
        NntpResponse {
            code,
            message: message.to_string(),
        }
    }

    #[test]
    fn test_parse_response_line() {
        let (code, message) = parse_response_line("200 news.example.com ready").unwrap();
        assert_eq!(code, 200);
        assert_eq!(message, "news.example.com ready");

        let (code, message) = parse_response_line("205").unwrap();
        assert_eq!(code, 205);
        assert_eq!(message, "");
    }

    #[test]
    fn test_parse_response_line_rejects_garbage() {
        assert!(matches!(
            parse_response_line("hello"),
            Err(NntpError::InvalidResponse(_))
        ));
        assert!(parse_response_line("20").is_err());
        assert!(parse_response_line("2000 too long code").is_err());
        assert!(parse_response_line("").is_err());
    }

    #[test]
    fn test_command_formats() {
        assert_eq!(authinfo_user("bob"), "AUTHINFO USER bob\r\n");
        assert_eq!(authinfo_pass("secret"), "AUTHINFO PASS secret\r\n");
        assert_eq!(group("alt.binaries.test"), "GROUP alt.binaries.test\r\n");
        assert_eq!(stat("<a@b>"), "STAT <a@b>\r\n");
        assert_eq!(stat("42"), "STAT 42\r\n");
        assert_eq!(post(), "POST\r\n");
        assert_eq!(ihave("<a@b>"), "IHAVE <a@b>\r\n");
        assert_eq!(date(), "DATE\r\n");
        assert_eq!(quit(), "QUIT\r\n");
    }

    #[test]
    fn test_parse_group_response() {
        let info = parse_group_response(&response(
            codes::GROUP_SELECTED,
            "1234 3000234 3002322 misc.test",
        ))
        .unwrap();
        assert_eq!(info.count, 1234);
        assert_eq!(info.first, 3000234);
        assert_eq!(info.last, 3002322);
        assert_eq!(info.name, "misc.test");

        assert!(parse_group_response(&response(codes::GROUP_SELECTED, "12 x 14")).is_err());
    }

    #[test]
    fn test_parse_stat_response() {
        let (number, id) =
            parse_stat_response(&response(codes::ARTICLE_STAT, "0 <abc@example.com>")).unwrap();
        assert_eq!(number, 0);
        assert_eq!(id, "<abc@example.com>");

        assert!(parse_stat_response(&response(codes::ARTICLE_STAT, "12")).is_err());
        assert!(parse_stat_response(&response(codes::ARTICLE_STAT, "x <a@b>")).is_err());
    }

    #[test]
    fn test_parse_date_response() {
        let date = parse_date_response(&response(codes::SERVER_DATE, "20240131235959")).unwrap();
        assert_eq!(date.to_string(), "2024-01-31 23:59:59");

        assert!(parse_date_response(&response(codes::SERVER_DATE, "2024")).is_err());
        assert!(parse_date_response(&response(codes::SERVER_DATE, "20241331235959")).is_err());
    }

    #[test]
    fn test_find_message_id() {
        assert_eq!(
            find_message_id("<abc@host> Article received ok"),
            Some("<abc@host>")
        );
        assert_eq!(find_message_id("Article posted"), None);
        assert_eq!(find_message_id("<notanid> ok"), None);
    }
}
