//! Shared SSE plumbing for the gateway adapter.
//!
//! OpenAI-style streams arrive as `data:` lines separated by blank lines.
//! [`drain_data_lines`] pulls complete payloads out of a rolling buffer;
//! [`sse_response_stream`] turns a `reqwest::Response` plus a payload parser
//! into a [`BoxStream`] of deltas, with a guaranteed final `done` item.

use charla_domain::{BoxStream, Error, Result};

use crate::traits::StreamDelta;

/// Extract complete `data:` payloads from an SSE buffer.
///
/// Consumed bytes are drained in place; a trailing partial event stays in
/// the buffer for the next call.
pub(crate) fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    let mut data_lines = Vec::new();

    while let Some(pos) = buffer.find("\n\n") {
        let block: String = buffer.drain(..pos).collect();
        buffer.drain(..2);

        for line in block.lines() {
            let line = line.trim();
            if let Some(data) = line.strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    data_lines.push(data.to_string());
                }
            }
        }
    }

    data_lines
}

/// Build a delta stream from an SSE response and a payload parser.
///
/// The parser maps one `data:` payload to zero or one deltas. The stream
/// buffers chunks, flushes the tail when the body closes, and emits a final
/// `done` delta if the parser never produced one.
pub(crate) fn sse_response_stream<F>(
    response: reqwest::Response,
    mut parse_data: F,
) -> BoxStream<'static, Result<StreamDelta>>
where
    F: FnMut(&str) -> Option<Result<StreamDelta>> + Send + 'static,
{
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();
        let mut done_emitted = false;

        loop {
            match response.chunk().await {
                Ok(Some(bytes)) => {
                    buffer.push_str(&String::from_utf8_lossy(&bytes));
                    for data in drain_data_lines(&mut buffer) {
                        if let Some(delta) = parse_data(&data) {
                            if matches!(&delta, Ok(d) if d.done) {
                                done_emitted = true;
                            }
                            yield delta;
                            if done_emitted {
                                return;
                            }
                        }
                    }
                }
                Ok(None) => {
                    // Body closed — flush any trailing partial event.
                    if !buffer.trim().is_empty() {
                        buffer.push_str("\n\n");
                        for data in drain_data_lines(&mut buffer) {
                            if let Some(delta) = parse_data(&data) {
                                if matches!(&delta, Ok(d) if d.done) {
                                    done_emitted = true;
                                }
                                yield delta;
                            }
                        }
                    }
                    break;
                }
                Err(e) => {
                    yield Err(Error::Http(e.to_string()));
                    break;
                }
            }
        }

        if !done_emitted {
            yield Ok(StreamDelta { content: String::new(), done: true });
        }
    };

    Box::pin(stream)
}
