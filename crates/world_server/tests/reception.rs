mod common;

use common::{fast_config, start_world, wait_until, WAIT};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::time::timeout;
use world_server::{ClientEvent, ClientRequest, MemoryStore, Reception, WireMessage};

async fn next_event(lines: &mut Lines<BufReader<OwnedReadHalf>>) -> Option<ClientEvent> {
    let line = timeout(WAIT, lines.next_line()).await.ok()?.ok()??;
    match serde_json::from_str(&line).ok()? {
        WireMessage::Event(event) => Some(event),
        WireMessage::Request(_) => None,
    }
}

async fn request(stream: &mut tokio::net::tcp::OwnedWriteHalf, request: ClientRequest) {
    let mut line = serde_json::to_string(&WireMessage::Request(request)).unwrap();
    line.push('\n');
    stream.write_all(line.as_bytes()).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn serves_json_lines_over_tcp() {
    let world = start_world(&fast_config(), Arc::new(MemoryStore::new()));
    let reception = Reception::bind("127.0.0.1:0".parse().unwrap(), Arc::clone(&world), 8)
        .await
        .unwrap();
    let addr = reception.local_addr().unwrap();
    let handle = reception.handle();
    let running = tokio::spawn(reception.run());

    let (read, mut write) = TcpStream::connect(addr).await.unwrap().into_split();
    let mut lines = BufReader::new(read).lines();
    assert!(matches!(next_event(&mut lines).await, Some(ClientEvent::Welcome { .. })));

    request(&mut write, ClientRequest::Ping).await;
    assert_eq!(next_event(&mut lines).await, Some(ClientEvent::Pong));

    write.write_all(b"this is not json\n").await.unwrap();
    assert_eq!(
        next_event(&mut lines).await,
        Some(ClientEvent::Error {
            message: "Invalid message".into()
        })
    );

    // bytes that are not UTF-8 are just another bad line
    write.write_all(b"\xff\xfe\xfd\n").await.unwrap();
    assert_eq!(
        next_event(&mut lines).await,
        Some(ClientEvent::Error {
            message: "Invalid message".into()
        })
    );

    request(&mut write, ClientRequest::CreateAccount { account: "alice".into() }).await;
    assert_eq!(
        next_event(&mut lines).await,
        Some(ClientEvent::AccountCreated { account: "alice".into() })
    );

    // closing the socket ends the butler
    drop(write);
    drop(lines);
    let closed = {
        let world = Arc::clone(&world);
        tokio::task::spawn_blocking(move || wait_until(WAIT, || world.connection_count() == 0))
    };
    assert!(closed.await.unwrap());

    handle.shutdown();
    running.await.unwrap().unwrap();
    tokio::task::spawn_blocking(move || world.shutdown()).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refuses_connections_beyond_the_limit() {
    let world = start_world(&fast_config(), Arc::new(MemoryStore::new()));
    let reception = Reception::bind("127.0.0.1:0".parse().unwrap(), Arc::clone(&world), 1)
        .await
        .unwrap();
    let addr = reception.local_addr().unwrap();
    let handle = reception.handle();
    let running = tokio::spawn(reception.run());

    let (first_read, _first_write) = TcpStream::connect(addr).await.unwrap().into_split();
    let mut first = BufReader::new(first_read).lines();
    assert!(matches!(next_event(&mut first).await, Some(ClientEvent::Welcome { .. })));

    let (second_read, _second_write) = TcpStream::connect(addr).await.unwrap().into_split();
    let mut second = BufReader::new(second_read).lines();
    assert!(matches!(
        next_event(&mut second).await,
        Some(ClientEvent::Disconnected { reason }) if reason.contains("full")
    ));

    handle.shutdown();
    running.await.unwrap().unwrap();
    tokio::task::spawn_blocking(move || world.shutdown()).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_burst_of_connects_never_exceeds_the_limit() {
    const LIMIT: usize = 2;
    const BURST: usize = 12;

    let world = start_world(&fast_config(), Arc::new(MemoryStore::new()));
    let reception = Reception::bind("127.0.0.1:0".parse().unwrap(), Arc::clone(&world), LIMIT)
        .await
        .unwrap();
    let addr = reception.local_addr().unwrap();
    let handle = reception.handle();
    let running = tokio::spawn(reception.run());

    // connect everything before reading a single greeting
    let mut streams = Vec::new();
    for _ in 0..BURST {
        streams.push(TcpStream::connect(addr).await.unwrap().into_split());
    }
    let mut welcomed = 0;
    let mut refused = 0;
    let mut kept = Vec::new();
    for (read, write) in streams {
        let mut lines = BufReader::new(read).lines();
        match next_event(&mut lines).await {
            Some(ClientEvent::Welcome { .. }) => welcomed += 1,
            Some(ClientEvent::Disconnected { reason }) if reason.contains("full") => refused += 1,
            other => panic!("unexpected greeting {other:?}"),
        }
        kept.push((lines, write));
    }
    assert_eq!(welcomed, LIMIT);
    assert_eq!(refused, BURST - LIMIT);
    assert_eq!(world.connection_count(), LIMIT);

    // hanging up frees the slots again
    drop(kept);
    let drained = {
        let world = Arc::clone(&world);
        tokio::task::spawn_blocking(move || wait_until(WAIT, || world.context().butlers.occupied() == 0))
            .await
            .unwrap()
    };
    assert!(drained);
    let (read, _write) = TcpStream::connect(addr).await.unwrap().into_split();
    let mut lines = BufReader::new(read).lines();
    assert!(matches!(next_event(&mut lines).await, Some(ClientEvent::Welcome { .. })));

    handle.shutdown();
    running.await.unwrap().unwrap();
    tokio::task::spawn_blocking(move || world.shutdown()).await.unwrap();
}
