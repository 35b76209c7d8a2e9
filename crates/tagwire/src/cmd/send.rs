use std::fs;
use std::time::Duration;

use tagwire_frame::{Frame, PacketBuffer};
use tagwire_peer::{Client, PeerEvent};
use tokio::sync::mpsc;

use crate::cmd::SendArgs;
use crate::exit::{
    buffer_error, io_error, peer_error, CliError, CliResult, FAILURE, SUCCESS, TIMEOUT, USAGE,
};
use crate::output::{print_frame, OutputFormat, Received};

enum Body {
    Raw(Vec<u8>),
    Packet(PacketBuffer<'static>),
}

pub async fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let config = args.connection.peer_config();
    let mut client = Client::new(config).map_err(|err| peer_error("invalid config", err))?;
    let body = resolve_body(&args, &client)?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    if args.wait {
        client
            .subscribe(move |event| match event {
                PeerEvent::Message { id, tag, payload } => {
                    let _ = tx.send(Some(Received {
                        connection: *id,
                        frame: Frame::new(*tag, payload.to_vec()),
                    }));
                }
                PeerEvent::Disconnected { .. } => {
                    let _ = tx.send(None);
                }
                _ => {}
            })
            .map_err(|err| peer_error("subscribe failed", err))?;
    }

    client
        .start()
        .await
        .map_err(|err| peer_error("connect failed", err))?;

    let sent = match body {
        Body::Raw(bytes) => client.send_bytes(args.tag, &bytes).await,
        Body::Packet(mut packet) => client.send_frame(args.tag, &mut packet).await,
    };
    sent.map_err(|err| peer_error("send failed", err))?;

    let result = if args.wait {
        wait_for_reply(&mut rx, wait_timeout).await.map(|received| {
            let peer = config.socket_addr().to_string();
            print_frame(&received, &peer, format);
            SUCCESS
        })
    } else {
        Ok(SUCCESS)
    };

    client.stop().await;
    result
}

async fn wait_for_reply(
    rx: &mut mpsc::UnboundedReceiver<Option<Received>>,
    timeout: Duration,
) -> CliResult<Received> {
    match tokio::time::timeout(timeout, rx.recv()).await {
        Ok(Some(Some(received))) => Ok(received),
        Ok(Some(None)) | Ok(None) => Err(CliError::new(
            FAILURE,
            "connection closed before a reply arrived",
        )),
        Err(_) => Err(CliError::new(
            TIMEOUT,
            format!("no reply within {}ms", timeout.as_millis()),
        )),
    }
}

/// Build the body before connecting so a body that cannot fit fails fast.
fn resolve_body(args: &SendArgs, client: &Client) -> CliResult<Body> {
    if let Some(data) = &args.data {
        return Ok(Body::Raw(data.as_bytes().to_vec()));
    }
    if let Some(text) = &args.string {
        let mut packet = client.new_packet();
        packet
            .write_string(text)
            .map_err(|err| buffer_error("--string does not fit in one frame", err))?;
        return Ok(Body::Packet(packet));
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map(Body::Raw)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Ok(Body::Raw(Vec::new()))
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
