use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use modlink_wire::Packet;
use serde::Serialize;

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

#[derive(Serialize)]
struct PacketOutput {
    uid: u32,
    function_id: u8,
    sequence_number: u8,
    error_code: u8,
    payload_size: usize,
    payload: String,
    timestamp: String,
}

/// Print a response or callback packet in the requested format.
pub fn print_packet(packet: &Packet, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = PacketOutput {
                uid: packet.uid,
                function_id: packet.function_id,
                sequence_number: packet.sequence_number,
                error_code: packet.error_code,
                payload_size: packet.payload.len(),
                payload: payload_preview(packet.payload.as_ref()),
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
                .set_header(vec!["UID", "FUNCTION", "SEQ", "ERROR", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    packet.uid.to_string(),
                    packet.function_id.to_string(),
                    packet.sequence_number.to_string(),
                    packet.error_code.to_string(),
                    packet.payload.len().to_string(),
                    payload_preview(packet.payload.as_ref()),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "uid={} function={} seq={} error={} size={} payload={}",
                packet.uid,
                packet.function_id,
                packet.sequence_number,
                packet.error_code,
                packet.payload.len(),
                payload_preview(packet.payload.as_ref())
            );
        }
        OutputFormat::Raw => {
            print_raw(packet.payload.as_ref());
        }
    }
}

#[derive(Serialize)]
struct CallbackOutput {
    uid: u32,
    callback_id: u8,
    payload_size: usize,
    payload: String,
    timestamp: String,
}

/// Print an asynchronous callback delivery in the requested format.
pub fn print_callback(uid: u32, callback_id: u8, payload: &[u8], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = CallbackOutput {
                uid,
                callback_id,
                payload_size: payload.len(),
                payload: payload_preview(payload),
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
                .set_header(vec!["UID", "CALLBACK", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    uid.to_string(),
                    callback_id.to_string(),
                    payload.len().to_string(),
                    payload_preview(payload),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "uid={} callback={} size={} payload={}",
                uid,
                callback_id,
                payload.len(),
                payload_preview(payload)
            );
        }
        OutputFormat::Raw => {
            print_raw(payload);
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
