//! Client for the echo-server example: sends a name, prints the reply.
//!
//! Run with:
//!   cargo run --example greeting-client --features peer -- Aradhya

use tagwire::frame::PacketBuffer;
use tagwire::peer::{
    BoxFuture, Client, HandlerResult, MessageContext, MessageHandler, PeerConfig,
    ServerConnected, ServerConnectedHandler,
};
use tokio::sync::mpsc;

const GREETING: u32 = 1;
const HELLO: u32 = 7;

struct Connected;

impl ServerConnectedHandler for Connected {
    fn on_server_connected<'a>(
        &'a self,
        ctx: ServerConnected<'a>,
    ) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            eprintln!("Connected to {}", ctx.connection.peer_addr());
            Ok(())
        })
    }
}

/// Forwards decoded bodies to `main`.
struct Forward(mpsc::UnboundedSender<String>);

impl MessageHandler for Forward {
    fn on_message<'a>(&'a self, mut ctx: MessageContext<'a>) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let line = match ctx.tag {
                GREETING => format!("server greeting: you are client #{}", ctx.body.read_u64()?),
                _ => ctx.body.read_string()?,
            };
            self.0.send(line)?;
            Ok(())
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let name = std::env::args().nth(1).unwrap_or_else(|| "Aradhya".to_string());

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut client = Client::new(PeerConfig::default())?;
    client.register_on_server_connected(Connected)?;
    client.register(GREETING, Forward(tx.clone()))?;
    client.register(HELLO, Forward(tx))?;
    client.start().await?;

    let mut packet: PacketBuffer<'static> = client.new_packet();
    packet.write_string(&name)?;
    client.send_frame(HELLO, &mut packet).await?;

    for _ in 0..2 {
        match rx.recv().await {
            Some(line) => println!("{line}"),
            None => break,
        }
    }

    client.stop().await;
    Ok(())
}
