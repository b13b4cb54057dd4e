//! Connection transports.
//!
//! The butler needs two primitives per connection: a [`Source`] yielding
//! decoded [`WireMessage`]s and an [`Outbound`] writing [`ClientEvent`]s.
//!
//! * TCP connections speak newline-delimited JSON. A blocked read is
//!   released by shutting the socket down.
//! * [`pipe`] builds an in-process connection and hands back the
//!   [`LocalClient`] end, used by tests and embedders.

use crate::messages::{ClientEvent, ClientRequest, WireMessage};
use actor_runtime::{ChannelSource, Source, SourceError, Unblock};
use crossbeam::channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::time::{Duration, Instant};

/// Write half of a connection.
pub trait Outbound: Send {
    fn write_event(&mut self, event: &ClientEvent) -> io::Result<()>;

    /// Flushes and closes the transport. Further writes fail.
    fn close(&mut self);
}

/// A client connection as the butler sees it.
pub struct Connection {
    pub peer: String,
    pub inbound: Box<dyn Source<Item = WireMessage>>,
    pub outbound: Box<dyn Outbound>,
}

impl Connection {
    /// Wraps a blocking TCP stream.
    pub fn tcp(stream: TcpStream) -> io::Result<Self> {
        let peer = stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        stream.set_nodelay(true)?;

        let inbound = JsonLinesSource::new(BufReader::new(stream.try_clone()?))
            .with_unblocker(SocketUnblock(stream.try_clone()?));
        let outbound = JsonLinesSink::new(stream.try_clone()?, Some(stream));

        Ok(Self {
            peer,
            inbound: Box::new(inbound),
            outbound: Box::new(outbound),
        })
    }
}

struct SocketUnblock(TcpStream);

impl Unblock for SocketUnblock {
    fn unblock(&self) {
        let _ = self.0.shutdown(Shutdown::Both);
    }
}

/// Longest accepted line, newline excluded.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

enum Line {
    Complete,
    Oversize,
    End,
}

/// Reads one JSON document per line. Blank lines are skipped. A line that
/// is not UTF-8, not JSON or longer than the limit is reported as a decode
/// error and the stream continues with the next line.
pub struct JsonLinesSource<R> {
    reader: R,
    buffer: Vec<u8>,
    max_line: usize,
    unblocker: Option<SocketUnblock>,
}

impl<R: BufRead + Send + 'static> JsonLinesSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::new(),
            max_line: MAX_LINE_BYTES,
            unblocker: None,
        }
    }

    pub fn with_max_line(mut self, max_line: usize) -> Self {
        self.max_line = max_line.max(1);
        self
    }

    fn with_unblocker(mut self, unblocker: SocketUnblock) -> Self {
        self.unblocker = Some(unblocker);
        self
    }

    fn read_line(&mut self) -> io::Result<Line> {
        self.buffer.clear();
        let limit = self.max_line as u64 + 1;
        let read = (&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut self.buffer)?;
        if read == 0 {
            return Ok(Line::End);
        }
        if self.buffer.len() > self.max_line && !self.buffer.ends_with(b"\n") {
            self.discard_rest_of_line()?;
            return Ok(Line::Oversize);
        }
        Ok(Line::Complete)
    }

    fn discard_rest_of_line(&mut self) -> io::Result<()> {
        loop {
            let available = self.reader.fill_buf()?;
            if available.is_empty() {
                return Ok(());
            }
            match available.iter().position(|byte| *byte == b'\n') {
                Some(end) => {
                    self.reader.consume(end + 1);
                    return Ok(());
                }
                None => {
                    let len = available.len();
                    self.reader.consume(len);
                }
            }
        }
    }
}

impl<R: BufRead + Send + 'static> Source for JsonLinesSource<R> {
    type Item = WireMessage;

    fn pull(&mut self, stop: &Receiver<()>) -> Result<Option<WireMessage>, SourceError> {
        loop {
            let read = self.read_line();
            if let Err(TryRecvError::Disconnected) = stop.try_recv() {
                return Err(SourceError::Interrupted);
            }
            match read? {
                Line::End => return Ok(None),
                Line::Oversize => {
                    return Err(SourceError::Decode(format!(
                        "line longer than {} bytes",
                        self.max_line
                    )))
                }
                Line::Complete => {}
            }

            let Ok(text) = std::str::from_utf8(&self.buffer) else {
                return Err(SourceError::Decode("line is not valid UTF-8".to_string()));
            };
            let line = text.trim();
            if line.is_empty() {
                continue;
            }
            return serde_json::from_str(line)
                .map(Some)
                .map_err(|e| SourceError::Decode(e.to_string()));
        }
    }

    fn unblocker(&self) -> Option<Box<dyn Unblock>> {
        let stream = self.unblocker.as_ref()?.0.try_clone().ok()?;
        Some(Box::new(SocketUnblock(stream)))
    }
}

/// Writes one JSON document per line, wrapped in [`WireMessage::Event`].
pub struct JsonLinesSink<W: Write> {
    writer: Option<BufWriter<W>>,
    socket: Option<TcpStream>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W, socket: Option<TcpStream>) -> Self {
        Self {
            writer: Some(BufWriter::new(writer)),
            socket,
        }
    }
}

impl<W: Write + Send> Outbound for JsonLinesSink<W> {
    fn write_event(&mut self, event: &ClientEvent) -> io::Result<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "connection closed"))?;
        serde_json::to_writer(&mut *writer, &WireMessage::Event(event.clone()))?;
        writer.write_all(b"\n")?;
        writer.flush()
    }

    fn close(&mut self) {
        if let Some(mut writer) = self.writer.take() {
            let _ = writer.flush();
        }
        if let Some(socket) = self.socket.take() {
            let _ = socket.shutdown(Shutdown::Both);
        }
    }
}

/// Builds an in-process connection.
///
/// The client's requests go through a bounded queue of `capacity`; events
/// towards the client are unbounded so a test that does not read never
/// stalls the server.
pub fn pipe(peer: &str, capacity: usize) -> (Connection, LocalClient) {
    let (request_tx, request_rx) = bounded(capacity.max(1));
    let (event_tx, event_rx) = unbounded();

    let connection = Connection {
        peer: peer.to_string(),
        inbound: Box::new(ChannelSource::new(request_rx)),
        outbound: Box::new(LocalOutbound {
            events: Some(event_tx),
        }),
    };
    let client = LocalClient {
        requests: Some(request_tx),
        events: event_rx,
    };
    (connection, client)
}

struct LocalOutbound {
    events: Option<Sender<ClientEvent>>,
}

impl Outbound for LocalOutbound {
    fn write_event(&mut self, event: &ClientEvent) -> io::Result<()> {
        let events = self
            .events
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "connection closed"))?;
        events
            .send(event.clone())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client went away"))
    }

    fn close(&mut self) {
        self.events = None;
    }
}

/// Client end of a [`pipe`].
pub struct LocalClient {
    requests: Option<Sender<WireMessage>>,
    events: Receiver<ClientEvent>,
}

impl LocalClient {
    pub fn send(&self, request: ClientRequest) -> bool {
        self.send_raw(WireMessage::Request(request))
    }

    /// Sends any envelope, including ones the server must reject.
    pub fn send_raw(&self, message: WireMessage) -> bool {
        match &self.requests {
            Some(requests) => requests.send(message).is_ok(),
            None => false,
        }
    }

    pub fn recv(&self, timeout: Duration) -> Option<ClientEvent> {
        self.events.recv_timeout(timeout).ok()
    }

    /// Skips events until one matches `predicate`.
    pub fn expect<F>(&self, timeout: Duration, predicate: F) -> Option<ClientEvent>
    where
        F: Fn(&ClientEvent) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(remaining) {
                Ok(event) if predicate(&event) => return Some(event),
                Ok(_) => continue,
                Err(_) => return None,
            }
        }
    }

    /// Collects whatever arrives within `window`.
    pub fn drain(&self, window: Duration) -> Vec<ClientEvent> {
        let deadline = Instant::now() + window;
        let mut events = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(remaining) {
                Ok(event) => events.push(event),
                Err(_) => return events,
            }
        }
    }

    /// Ends the request stream, as a dropped socket would.
    pub fn hang_up(&mut self) {
        self.requests = None;
    }

    /// Waits until the server closes the connection, discarding events.
    pub fn wait_closed(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(remaining) {
                Ok(_) => continue,
                Err(RecvTimeoutError::Disconnected) => return true,
                Err(RecvTimeoutError::Timeout) => return false,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::bounded;
    use std::io::Cursor;

    #[test]
    fn json_lines_decode_skip_blanks_and_report_garbage() {
        let input = concat!(
            r#"{"direction":"request","message":{"type":"ping"}}"#,
            "\n\n",
            "garbage\n",
            r#"{"direction":"request","message":{"type":"login","data":{"account":"alice"}}}"#,
            "\n"
        );
        let (_stop_tx, stop) = bounded::<()>(0);
        let mut source = JsonLinesSource::new(Cursor::new(input.as_bytes().to_vec()));

        assert_eq!(
            source.pull(&stop).unwrap(),
            Some(WireMessage::Request(ClientRequest::Ping))
        );
        assert!(matches!(source.pull(&stop), Err(SourceError::Decode(_))));
        assert_eq!(
            source.pull(&stop).unwrap(),
            Some(WireMessage::Request(ClientRequest::Login {
                account: "alice".into()
            }))
        );
        assert_eq!(source.pull(&stop).unwrap(), None);
    }

    #[test]
    fn bytes_that_are_not_utf8_only_cost_their_line() {
        let mut input = b"\xff\xfe garbage\n".to_vec();
        input.extend_from_slice(br#"{"direction":"request","message":{"type":"ping"}}"#);
        input.push(b'\n');
        let (_stop_tx, stop) = bounded::<()>(0);
        let mut source = JsonLinesSource::new(Cursor::new(input));

        assert!(matches!(source.pull(&stop), Err(SourceError::Decode(_))));
        assert_eq!(
            source.pull(&stop).unwrap(),
            Some(WireMessage::Request(ClientRequest::Ping))
        );
        assert_eq!(source.pull(&stop).unwrap(), None);
    }

    #[test]
    fn overlong_lines_are_skipped_whole() {
        let ping = r#"{"direction":"request","message":{"type":"ping"}}"#;
        let mut input = "x".repeat(200);
        input.push('\n');
        input.push_str(ping);
        input.push('\n');
        let (_stop_tx, stop) = bounded::<()>(0);
        // a small buffer makes the discard span several refills
        let reader = BufReader::with_capacity(16, Cursor::new(input.into_bytes()));
        let mut source = JsonLinesSource::new(reader).with_max_line(ping.len());

        match source.pull(&stop) {
            Err(SourceError::Decode(detail)) => assert!(detail.contains("longer than"), "{detail}"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(
            source.pull(&stop).unwrap(),
            Some(WireMessage::Request(ClientRequest::Ping))
        );
        assert_eq!(source.pull(&stop).unwrap(), None);
    }

    #[test]
    fn sink_writes_one_event_per_line() {
        let mut buffer = Vec::new();
        {
            let mut sink = JsonLinesSink::new(&mut buffer, None);
            sink.write_event(&ClientEvent::Pong).unwrap();
            sink.write_event(&ClientEvent::LoggedOut).unwrap();
            sink.close();
            assert!(sink.write_event(&ClientEvent::Pong).is_err());
        }
        let text = String::from_utf8(buffer).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: WireMessage = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first, WireMessage::Event(ClientEvent::Pong));
    }

    #[test]
    fn pipe_reports_closure_to_both_ends() {
        let (mut connection, mut client) = pipe("local", 4);
        assert!(client.send(ClientRequest::Ping));
        connection.outbound.write_event(&ClientEvent::Pong).unwrap();
        assert_eq!(client.recv(Duration::from_secs(1)), Some(ClientEvent::Pong));

        connection.outbound.close();
        assert!(client.wait_closed(Duration::from_secs(1)));

        client.hang_up();
        assert!(!client.send(ClientRequest::Ping));
        let (_stop_tx, stop) = bounded::<()>(0);
        assert_eq!(
            connection.inbound.pull(&stop).unwrap(),
            Some(WireMessage::Request(ClientRequest::Ping))
        );
        assert_eq!(connection.inbound.pull(&stop).unwrap(), None);
    }
}
