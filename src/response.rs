//! NNTP response types and status codes

/// Single-line NNTP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NntpResponse {
    /// 3-digit NNTP response code
    pub code: u16,
    /// Status message from server
    pub message: String,
}

/// NNTP response codes used by the upload path (RFC 3977, RFC 4643)
pub mod codes {
    /// Server date/time (RFC 3977 Section 7.1)
    pub const SERVER_DATE: u16 = 111;

    /// Server ready, posting allowed
    pub const READY_POSTING_ALLOWED: u16 = 200;
    /// Server ready, no posting
    pub const READY_NO_POSTING: u16 = 201;
    /// Closing connection
    pub const CLOSING_CONNECTION: u16 = 205;
    /// Group selected
    pub const GROUP_SELECTED: u16 = 211;
    /// Article stat
    pub const ARTICLE_STAT: u16 = 223;
    /// Article transferred OK (IHAVE)
    pub const ARTICLE_TRANSFERRED: u16 = 235;
    /// Article posted OK
    pub const ARTICLE_POSTED: u16 = 240;
    /// Authentication accepted
    pub const AUTH_ACCEPTED: u16 = 281;

    /// Send article to be transferred (IHAVE)
    pub const SEND_ARTICLE_TRANSFER: u16 = 335;
    /// Send article to be posted
    pub const SEND_ARTICLE: u16 = 340;
    /// Password required
    pub const AUTH_CONTINUE: u16 = 381;

    /// Service temporarily unavailable
    pub const SERVICE_UNAVAILABLE: u16 = 400;
    /// No such newsgroup
    pub const NO_SUCH_GROUP: u16 = 411;
    /// No article with that number
    pub const NO_SUCH_ARTICLE_NUMBER: u16 = 423;
    /// No article with that message-id
    pub const NO_SUCH_ARTICLE_ID: u16 = 430;
    /// Article not wanted (IHAVE)
    pub const ARTICLE_NOT_WANTED: u16 = 435;
    /// Transfer not possible; try again later
    pub const TRANSFER_NOT_POSSIBLE: u16 = 436;
    /// Transfer rejected; do not retry
    pub const TRANSFER_REJECTED: u16 = 437;
    /// Posting not permitted
    pub const POSTING_NOT_PERMITTED: u16 = 440;
    /// Posting failed
    pub const POSTING_FAILED: u16 = 441;

    /// Service permanently unavailable
    pub const SERVICE_PERMANENTLY_UNAVAILABLE: u16 = 502;
}

