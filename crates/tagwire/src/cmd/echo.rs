use tagwire_peer::{BoxFuture, HandlerResult, Listener, MessageContext, MessageHandler};
use tracing::info;

use crate::cmd::EchoArgs;
use crate::exit::{peer_error, CliResult, SUCCESS};

/// Replies on the same tag with the received body.
struct Echo;

impl MessageHandler for Echo {
    fn on_message<'a>(&'a self, ctx: MessageContext<'a>) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let body = ctx.body.as_slice();
            info!(
                id = ctx.connection.id(),
                tag = ctx.tag,
                size = body.len(),
                "echoing frame"
            );
            ctx.connection.send_bytes(ctx.tag, body).await?;
            Ok(())
        })
    }
}

pub async fn run(args: EchoArgs) -> CliResult<i32> {
    let mut listener = Listener::new(args.connection.peer_config())
        .map_err(|err| peer_error("invalid config", err))?;

    for tag in &args.tags {
        listener
            .register(*tag, Echo)
            .map_err(|err| peer_error("handler setup failed", err))?;
    }

    let addr = listener
        .start()
        .await
        .map_err(|err| peer_error("bind failed", err))?;
    info!(%addr, tags = ?args.tags, "echo server ready");

    // ctrl_c only fails if the signal handler cannot be installed; stop either way.
    let _ = tokio::signal::ctrl_c().await;

    listener.shutdown().await;
    Ok(SUCCESS)
}
