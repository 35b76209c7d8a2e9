//! Minimal server: reads a name under tag 7 and greets it back.
//!
//! Run with:
//!   cargo run --example echo-server --features peer
//!
//! In another terminal:
//!   cargo run --example greeting-client --features peer
//! or
//!   cargo run --features cli -- send --tag 7 --string Aradhya --wait

use tagwire::peer::{
    BoxFuture, ClientConnected, ClientConnectedHandler, HandlerResult, Listener, MessageContext,
    MessageHandler, PeerConfig, PeerEvent,
};

const GREETING: u32 = 1;
const HELLO: u32 = 7;

struct Welcome;

impl ClientConnectedHandler for Welcome {
    fn on_client_connected<'a>(
        &'a self,
        ctx: ClientConnected<'a>,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            eprintln!(
                "Client #{} connected from {}",
                ctx.total_connections, ctx.peer_addr
            );
            ctx.greeting.write_u64(ctx.total_connections)?;
            ctx.connection.send_frame(GREETING, ctx.greeting).await?;
            Ok(())
        })
    }
}

struct Hello;

impl MessageHandler for Hello {
    fn on_message<'a>(&'a self, mut ctx: MessageContext<'a>) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let name = ctx.body.read_string()?;
            ctx.response.write_string(&format!("hello, {name}"))?;
            ctx.connection.send_frame(ctx.tag, ctx.response).await?;
            Ok(())
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut listener = Listener::new(PeerConfig::default())?;
    listener.register_on_client_connected(Welcome)?;
    listener.register(HELLO, Hello)?;
    listener.subscribe(|event| {
        if let PeerEvent::Exception { id, error } = event {
            eprintln!("Connection {id:?} failed: {error}");
        }
    })?;

    let addr = listener.start().await?;
    eprintln!("Listening on {addr}, Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    listener.shutdown().await;
    Ok(())
}
