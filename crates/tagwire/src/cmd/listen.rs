use tagwire_frame::Frame;
use tagwire_peer::{
    BoxFuture, ClientConnected, ClientConnectedHandler, HandlerResult, Listener, PeerEvent,
};
use tokio::sync::mpsc;
use tracing::info;

use crate::cmd::ListenArgs;
use crate::exit::{peer_error, CliResult, SUCCESS};
use crate::output::{print_frame, OutputFormat, Received};

/// Sends the running connection count to each new client.
struct CountGreeting {
    tag: u32,
}

impl ClientConnectedHandler for CountGreeting {
    fn on_client_connected<'a>(
        &'a self,
        ctx: ClientConnected<'a>,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            ctx.greeting.write_u64(ctx.total_connections)?;
            ctx.connection.send_frame(self.tag, ctx.greeting).await?;
            Ok(())
        })
    }
}

pub async fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let mut listener = Listener::new(args.connection.peer_config())
        .map_err(|err| peer_error("invalid config", err))?;

    if let Some(tag) = args.greeting_tag {
        listener
            .register_on_client_connected(CountGreeting { tag })
            .map_err(|err| peer_error("greeting setup failed", err))?;
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    listener
        .subscribe(move |event| match event {
            PeerEvent::Message { id, tag, payload } => {
                let _ = tx.send(Received {
                    connection: *id,
                    frame: Frame::new(*tag, payload.to_vec()),
                });
            }
            PeerEvent::Connected { id, peer } => info!(id, %peer, "client connected"),
            PeerEvent::Disconnected { id } => info!(id, "client disconnected"),
            PeerEvent::Exception { .. } => {}
        })
        .map_err(|err| peer_error("subscribe failed", err))?;

    let addr = listener
        .start()
        .await
        .map_err(|err| peer_error("bind failed", err))?;
    info!(%addr, "listening for frames");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut printed = 0usize;

    loop {
        let received = tokio::select! {
            _ = &mut shutdown => break,
            received = rx.recv() => received,
        };
        let Some(received) = received else { break };

        if let Some(tags) = &args.tags {
            if !tags.contains(&received.frame.tag) {
                continue;
            }
        }

        let peer = listener
            .connection(received.connection)
            .map(|conn| conn.peer_addr().to_string())
            .unwrap_or_else(|| "-".to_string());
        print_frame(&received, &peer, format);
        printed = printed.saturating_add(1);

        if args.count.is_some_and(|count| printed >= count) {
            break;
        }
    }

    listener.shutdown().await;
    Ok(SUCCESS)
}
