use std::fs;
use std::time::Duration;

use bytes::Bytes;
use modlink_client::Connection;
use modlink_wire::ERROR_CODE_OK;

use crate::cmd::{SendArgs, Target};
use crate::exit::{client_error, CliError, CliResult, DATA_INVALID, SUCCESS, USAGE};
use crate::output::{print_packet, OutputFormat};

pub fn run(args: SendArgs, target: &Target, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let payload = resolve_payload(&args)?;

    let connection = Connection::new();
    connection.set_request_timeout(timeout);
    connection
        .connect(&target.host, target.port)
        .map_err(|err| client_error("connect failed", err))?;

    let result = dispatch(&connection, &args, payload, format);
    connection.disconnect();
    result
}

fn dispatch(
    connection: &Connection,
    args: &SendArgs,
    payload: Bytes,
    format: OutputFormat,
) -> CliResult<i32> {
    if args.fire_and_forget {
        connection
            .send_fire_and_forget(args.uid, args.function, payload)
            .map_err(|err| client_error("send failed", err))?;
        return Ok(SUCCESS);
    }

    let response = connection
        .request(args.uid, args.function, payload)
        .map_err(|err| client_error("request failed", err))?;
    print_packet(&response, format);

    if response.error_code != ERROR_CODE_OK {
        return Ok(DATA_INVALID);
    }
    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Bytes> {
    if let Some(data) = &args.data {
        return Ok(Bytes::copy_from_slice(data.as_bytes()));
    }
    if let Some(path) = &args.file {
        let data = fs::read(path).map_err(|err| {
            crate::exit::io_error(&format!("failed reading {}", path.display()), err)
        })?;
        return Ok(Bytes::from(data));
    }
    Ok(Bytes::new())
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        _ => Err(CliError::new(
            USAGE,
            format!("unsupported duration unit: {unit}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_accepts_seconds_and_millis() {
        assert_eq!(parse_duration("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("7").unwrap(), Duration::from_secs(7));
    }

    #[test]
    fn parse_duration_rejects_zero_and_garbage() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("").is_err());
        assert!(parse_duration("fast").is_err());
    }

    #[test]
    fn resolve_payload_prefers_inline_data() {
        let args = SendArgs {
            uid: 1,
            function: 1,
            data: Some("hello".to_string()),
            file: None,
            fire_and_forget: false,
            timeout: "5s".to_string(),
        };
        assert_eq!(resolve_payload(&args).unwrap().as_ref(), b"hello");
    }

    #[test]
    fn resolve_payload_defaults_to_empty() {
        let args = SendArgs {
            uid: 1,
            function: 1,
            data: None,
            file: None,
            fire_and_forget: false,
            timeout: "5s".to_string(),
        };
        assert!(resolve_payload(&args).unwrap().is_empty());
    }
}
