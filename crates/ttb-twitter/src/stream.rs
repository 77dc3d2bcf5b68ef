//! Filtered-stream body handling: newline framing and rate-limit headers.

use std::io::{self, Cursor};

use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use reqwest::header::HeaderMap;
use tokio_util::{
    codec::{FramedRead, LinesCodec},
    io::StreamReader,
};

use ttb_core::{errors::Error, twitter::LineStream};

/// Longest single stream line accepted before the connection is treated as broken.
pub const MAX_LINE_LEN: usize = 1024 * 1024;

pub const RATE_LIMIT_RESET_HEADER: &str = "x-rate-limit-reset";

/// Query parameters requested on every stream connection.
pub const STREAM_QUERY: [(&str, &str); 4] = [
    ("tweet.fields", "lang"),
    ("media.fields", "url"),
    ("expansions", "attachments.media_keys,author_id"),
    ("user.fields", "username"),
];

/// Split a chunked byte body into lines (`\n` or `\r\n` terminated).
pub fn into_lines<S, B>(body: S) -> LineStream
where
    S: Stream<Item = Result<B, io::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    FramedRead::new(
        StreamReader::new(body.map(|chunk| chunk.map(Cursor::new))),
        LinesCodec::new_with_max_length(MAX_LINE_LEN),
    )
    .map(|line| line.map_err(|e| Error::External(format!("stream read error: {e}"))))
    .boxed()
}

/// Epoch seconds from `x-rate-limit-reset`, if present and sane.
pub fn rate_limit_reset(headers: &HeaderMap) -> Option<DateTime<Utc>> {
    let raw = headers.get(RATE_LIMIT_RESET_HEADER)?.to_str().ok()?;
    let secs = raw.trim().parse::<i64>().ok()?;
    DateTime::from_timestamp(secs, 0)
}
