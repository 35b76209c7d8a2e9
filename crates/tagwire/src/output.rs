use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use tagwire_frame::Frame;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// A frame and the connection it arrived on.
#[derive(Debug, Clone)]
pub struct Received {
    pub connection: u64,
    pub frame: Frame,
}

#[derive(Serialize)]
struct FrameOutput<'a> {
    connection: u64,
    tag: u32,
    size: usize,
    payload: String,
    hex: String,
    peer: &'a str,
    timestamp: String,
}

pub fn print_frame(received: &Received, peer: &str, format: OutputFormat) {
    let frame = &received.frame;
    match format {
        OutputFormat::Json => {
            let out = FrameOutput {
                connection: received.connection,
                tag: frame.tag,
                size: frame.payload.len(),
                payload: payload_preview(&frame.payload),
                hex: hex(&frame.payload),
                peer,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CONN", "TAG", "SIZE", "PEER", "PAYLOAD"])
                .add_row(vec![
                    received.connection.to_string(),
                    frame.tag.to_string(),
                    frame.payload.len().to_string(),
                    peer.to_string(),
                    payload_preview(&frame.payload),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "conn={} tag={} size={} peer={} payload={}",
                received.connection,
                frame.tag,
                frame.payload.len(),
                peer,
                payload_preview(&frame.payload)
            );
        }
        OutputFormat::Raw => print_raw(&frame.payload),
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

/// Printable text, or a size marker for binary bodies.
///
/// Bodies built with `write_string` start with a 4-byte length; those show
/// as the string itself.
fn payload_preview(payload: &[u8]) -> String {
    if let Some(text) = prefixed_string(payload) {
        return text.to_string();
    }
    match std::str::from_utf8(payload) {
        Ok(text) if !text.chars().any(char::is_control) => text.to_string(),
        _ => format!("<binary {} bytes>", payload.len()),
    }
}

fn prefixed_string(payload: &[u8]) -> Option<&str> {
    let (len, rest) = payload.split_first_chunk::<4>()?;
    let len = usize::try_from(i32::from_le_bytes(*len)).ok()?;
    if len != rest.len() {
        return None;
    }
    std::str::from_utf8(rest)
        .ok()
        .filter(|text| !text.chars().any(char::is_control))
}

fn hex(payload: &[u8]) -> String {
    payload.iter().map(|b| format!("{b:02x}")).collect()
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_unwraps_length_prefixed_strings() {
        let mut body = 7i32.to_le_bytes().to_vec();
        body.extend_from_slice(b"Aradhya");
        assert_eq!(payload_preview(&body), "Aradhya");
    }

    #[test]
    fn preview_passes_plain_text_and_marks_binary() {
        assert_eq!(payload_preview(b"hello"), "hello");
        assert_eq!(payload_preview(&[0, 159, 146, 150]), "<binary 4 bytes>");
        assert_eq!(payload_preview(&21i32.to_le_bytes()), "<binary 4 bytes>");
    }

    #[test]
    fn hex_is_lowercase_pairs() {
        assert_eq!(hex(&[0x00, 0xab, 0x10]), "00ab10");
    }
}
