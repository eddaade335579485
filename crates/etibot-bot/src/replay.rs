//! JSON-lines gateway replay.
//!
//! Each non-blank line of the input is one gateway frame
//! (`{"op":0,"t":"READY","s":1,"d":{...}}`). Lines starting with `#` are
//! comments. Malformed lines are logged and skipped so one bad capture
//! does not end the replay.

use etibot_types::GatewayPayload;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::warn;

/// Parse one line. Blank lines and comments yield `None`.
///
/// # Errors
///
/// Returns the JSON error for a line that is not a gateway frame.
pub fn parse_line(line: &str) -> Result<Option<GatewayPayload>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some)
}

/// Stream the frames in `reader`, ending at end of input or on a read error.
pub fn frames<R>(reader: R) -> BoxStream<'static, GatewayPayload>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    futures::stream::unfold(
        (reader.lines(), 0_u64),
        |(mut lines, mut line_number)| async move {
            loop {
                line_number = line_number.saturating_add(1);
                match lines.next_line().await {
                    Ok(Some(line)) => match parse_line(&line) {
                        Ok(Some(frame)) => return Some((frame, (lines, line_number))),
                        Ok(None) => {}
                        Err(e) => warn!(line = line_number, error = %e, "skipping malformed frame"),
                    },
                    Ok(None) => return None,
                    Err(e) => {
                        warn!(line = line_number, error = %e, "replay input read failed");
                        return None;
                    }
                }
            }
        },
    )
    .boxed()
}
