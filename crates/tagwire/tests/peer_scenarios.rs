#![cfg(feature = "peer")]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tagwire::frame::PacketBuffer;
use tagwire::peer::{
    BoxFuture, Client, HandlerError, HandlerResult, Listener, MessageContext, MessageHandler,
    PeerConfig, PeerError, PeerEvent,
};
use tokio::sync::mpsc;

#[derive(Debug, PartialEq)]
struct Greeting {
    age: i32,
    active: bool,
    name: String,
}

/// Decodes `(i32, bool, string)` bodies and forwards them.
struct Decode(mpsc::UnboundedSender<Greeting>);

impl MessageHandler for Decode {
    fn on_message<'a>(&'a self, mut ctx: MessageContext<'a>) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let greeting = Greeting {
                age: ctx.body.read_i32()?,
                active: ctx.body.read_bool()?,
                name: ctx.body.read_string()?,
            };
            self.0.send(greeting)?;
            Ok(())
        })
    }
}

/// Fails on the first frame, forwards the rest.
struct FailFirst {
    calls: AtomicUsize,
    seen: mpsc::UnboundedSender<u32>,
}

impl MessageHandler for FailFirst {
    fn on_message<'a>(&'a self, mut ctx: MessageContext<'a>) -> BoxFuture<'a, HandlerResult> {
        Box::pin(async move {
            let value = ctx.body.read_u32()?;
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(HandlerError::from(format!("refusing {value}")));
            }
            self.seen.send(value)?;
            Ok(())
        })
    }
}

fn ephemeral() -> PeerConfig {
    PeerConfig {
        port: 0,
        ..PeerConfig::default()
    }
}

async fn connect(listener: &Listener) -> Client {
    let addr = listener.local_addr().expect("listener should be running");
    let mut client = Client::new(PeerConfig::new(addr)).expect("client should build");
    client.start().await.expect("client should connect");
    client
}

#[tokio::test]
async fn typed_fields_arrive_in_write_order() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut listener = Listener::new(ephemeral()).expect("listener should build");
    listener.register(7, Decode(tx)).expect("registration should succeed");
    listener.start().await.expect("listener should start");

    let client = connect(&listener).await;
    let mut packet = client.new_packet();
    packet.write_i32(21).unwrap();
    packet.write_bool(true).unwrap();
    packet.write_string("Aradhya").unwrap();
    client.send_frame(7, &mut packet).await.expect("send should succeed");
    assert_eq!(packet.write_position(), 0, "send should reset the packet");

    let greeting = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("handler should run")
        .expect("channel should stay open");
    assert_eq!(
        greeting,
        Greeting {
            age: 21,
            active: true,
            name: "Aradhya".to_string(),
        }
    );
}

#[tokio::test]
async fn every_primitive_survives_the_wire() {
    struct Primitives(mpsc::UnboundedSender<Vec<String>>);

    impl MessageHandler for Primitives {
        fn on_message<'a>(
            &'a self,
            mut ctx: MessageContext<'a>,
        ) -> BoxFuture<'a, HandlerResult> {
            Box::pin(async move {
                let b = &mut ctx.body;
                let fields = vec![
                    b.read_bool()?.to_string(),
                    b.read_char()?.to_string(),
                    b.read_i32()?.to_string(),
                    b.read_u32()?.to_string(),
                    b.read_i64()?.to_string(),
                    b.read_u64()?.to_string(),
                    b.read_f32()?.to_string(),
                    b.read_f64()?.to_string(),
                    format!("{:?}", b.read_bytes()?),
                    b.read_string()?,
                    b.remaining_read().to_string(),
                ];
                self.0.send(fields)?;
                Ok(())
            })
        }
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut listener = Listener::new(ephemeral()).expect("listener should build");
    listener.register(2, Primitives(tx)).unwrap();
    listener.start().await.unwrap();

    let client = connect(&listener).await;
    let mut packet = client.new_packet();
    packet.write_bool(false).unwrap();
    packet.write_char('é').unwrap();
    packet.write_i32(i32::MIN).unwrap();
    packet.write_u32(u32::MAX).unwrap();
    packet.write_i64(-5).unwrap();
    packet.write_u64(u64::MAX).unwrap();
    packet.write_f32(1.5).unwrap();
    packet.write_f64(-0.25).unwrap();
    packet.write_bytes(&[]).unwrap();
    packet.write_string("").unwrap();
    client.send_frame(2, &mut packet).await.unwrap();

    let fields = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("handler should run")
        .expect("channel should stay open");
    assert_eq!(
        fields,
        vec![
            "false".to_string(),
            "é".to_string(),
            i32::MIN.to_string(),
            u32::MAX.to_string(),
            "-5".to_string(),
            u64::MAX.to_string(),
            "1.5".to_string(),
            "-0.25".to_string(),
            "[]".to_string(),
            String::new(),
            "0".to_string(),
        ]
    );
}

#[tokio::test]
async fn failing_handler_does_not_stop_the_connection() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let exceptions = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&exceptions);

    let mut listener = Listener::new(ephemeral()).expect("listener should build");
    listener
        .register(
            3,
            FailFirst {
                calls: AtomicUsize::new(0),
                seen: tx,
            },
        )
        .unwrap();
    listener
        .subscribe(move |event| {
            if let PeerEvent::Exception { error, .. } = event {
                let handler = matches!(error, PeerError::Handler(_));
                sink.lock().unwrap().push((handler, error.to_string()));
            }
        })
        .unwrap();
    listener.start().await.unwrap();

    let client = connect(&listener).await;
    for value in [10u32, 20] {
        let mut packet = client.new_packet();
        packet.write_u32(value).unwrap();
        client.send_frame(3, &mut packet).await.unwrap();
    }

    let second = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("second frame should still be dispatched");
    assert_eq!(second, Some(20));

    let exceptions = exceptions.lock().unwrap();
    assert_eq!(exceptions.len(), 1);
    assert!(exceptions[0].0);
    assert!(exceptions[0].1.contains("refusing 10"));
}

#[tokio::test]
async fn unknown_tags_are_dropped_silently() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);

    let mut listener = Listener::new(ephemeral()).expect("listener should build");
    listener.register(7, Decode(tx)).unwrap();
    listener
        .subscribe(move |event| match event {
            PeerEvent::Message { tag, .. } => sink.lock().unwrap().push(format!("message {tag}")),
            PeerEvent::Exception { .. } => sink.lock().unwrap().push("exception".to_string()),
            _ => {}
        })
        .unwrap();
    listener.start().await.unwrap();

    let client = connect(&listener).await;
    client.send_bytes(99, b"nobody listens").await.unwrap();
    let mut packet = client.new_packet();
    packet.write_i32(1).unwrap();
    packet.write_bool(false).unwrap();
    packet.write_string("x").unwrap();
    client.send_frame(7, &mut packet).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("tag 7 should be dispatched")
        .expect("channel should stay open");
    assert_eq!(*events.lock().unwrap(), vec!["message 99", "message 7"]);
}

#[tokio::test]
async fn lifecycle_calls_are_idempotent() {
    let mut listener = Listener::new(ephemeral()).expect("listener should build");
    let addr = listener.start().await.unwrap();
    assert_eq!(listener.start().await.unwrap(), addr);

    let mut client = Client::new(PeerConfig::new(addr)).unwrap();
    client.start().await.unwrap();
    client.start().await.unwrap();
    client.stop().await;
    client.stop().await;
    assert!(matches!(client.start().await, Err(PeerError::Stopped)));

    for _ in 0..100 {
        if listener.total_connections() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(listener.total_connections(), 1);

    listener.stop().await;
    listener.stop().await;
    assert!(matches!(listener.start().await, Err(PeerError::Stopped)));
}

#[tokio::test]
async fn oversized_bodies_are_rejected_before_the_wire() {
    let mut listener = Listener::new(ephemeral()).expect("listener should build");
    listener.start().await.unwrap();
    let client = connect(&listener).await;

    let too_big = vec![0u8; client.new_packet().capacity() + 1];
    assert!(matches!(
        client.send_bytes(1, &too_big).await,
        Err(PeerError::Frame(_))
    ));

    let mut packet: PacketBuffer<'static> = client.new_packet();
    assert!(packet.write_bytes(&too_big).is_err());
    assert_eq!(packet.write_position(), 0);
}
