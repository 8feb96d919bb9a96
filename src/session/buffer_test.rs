use super::*;
use crate::session::handlers::handler;
use serde_json::{Value, json};

#[derive(Debug, Clone, PartialEq)]
enum Op {
    Attach(String),
    Detach(String),
    Transmit(String, Vec<Value>),
}

#[derive(Default)]
struct RecordingTransport {
    ops: Mutex<Vec<Op>>,
}

impl RecordingTransport {
    fn ops(&self) -> Vec<Op> {
        self.ops.lock().expect("lock").clone()
    }
}

impl Transport for RecordingTransport {
    fn attach(&self, event: &str, _handler: EventHandler) {
        self.ops.lock().expect("lock").push(Op::Attach(event.into()));
    }

    fn detach(&self, event: &str, _handler: &EventHandler) {
        self.ops.lock().expect("lock").push(Op::Detach(event.into()));
    }

    fn transmit(&self, frame: Frame) -> Result<(), SessionError> {
        self.ops
            .lock()
            .expect("lock")
            .push(Op::Transmit(frame.event, frame.args));
        Ok(())
    }
}

fn noop() -> EventHandler {
    handler(|_| {})
}

fn attach(event: &str) -> Op {
    Op::Attach(event.into())
}

fn transmit(event: &str, args: Vec<Value>) -> Op {
    Op::Transmit(event.into(), args)
}

#[test]
fn flush_replays_listeners_then_messages_in_fifo_order() {
    let buffer = CommandBuffer::new();
    buffer.send(Frame::new("hello", vec![json!("x")])).expect("queue");
    buffer.register_listener("chat", noop());
    buffer.send(Frame::new("bye", vec![json!(1), json!(2)])).expect("queue");
    buffer.register_listener("snapshot", noop());
    assert_eq!(buffer.pending(), (2, 2));

    let transport = Arc::new(RecordingTransport::default());
    assert!(buffer.flush(transport.clone()));

    assert_eq!(
        transport.ops(),
        vec![
            attach("chat"),
            attach("snapshot"),
            transmit("hello", vec![json!("x")]),
            transmit("bye", vec![json!(1), json!(2)]),
        ]
    );
    assert_eq!(buffer.pending(), (0, 0));
}

#[test]
fn queued_args_are_snapshotted_at_send_time() {
    let buffer = CommandBuffer::new();
    let mut payload = json!({"n": 1});
    buffer.send(Frame::new("count", vec![payload.clone()])).expect("queue");
    payload["n"] = json!(2);

    let transport = Arc::new(RecordingTransport::default());
    buffer.flush(transport.clone());

    assert_eq!(transport.ops(), vec![transmit("count", vec![json!({"n": 1})])]);
}

#[test]
fn second_flush_is_ignored() {
    let buffer = CommandBuffer::new();
    buffer.send(Frame::new("hello", Vec::new())).expect("queue");

    let first = Arc::new(RecordingTransport::default());
    let second = Arc::new(RecordingTransport::default());
    assert!(buffer.flush(first.clone()));
    assert!(!buffer.flush(second.clone()));

    assert_eq!(first.ops().len(), 1);
    assert!(second.ops().is_empty());
}

#[test]
fn unregister_removes_only_first_matching_queued_listener() {
    let buffer = CommandBuffer::new();
    let h = noop();
    let other = noop();
    buffer.register_listener("chat", h.clone());
    buffer.register_listener("chat", other.clone());
    buffer.register_listener("snapshot", h.clone());

    buffer.unregister_listener("chat", &h);
    buffer.unregister_listener("chat", &noop());
    buffer.unregister_listener("missing", &h);

    let transport = Arc::new(RecordingTransport::default());
    buffer.flush(transport.clone());
    assert_eq!(transport.ops(), vec![attach("chat"), attach("snapshot")]);
}

#[test]
fn unregistering_the_first_queued_listener_works() {
    let buffer = CommandBuffer::new();
    let h = noop();
    buffer.register_listener("chat", h.clone());
    buffer.unregister_listener("chat", &h);

    assert_eq!(buffer.pending(), (0, 0));
}

#[test]
fn after_flush_calls_pass_through() {
    let buffer = CommandBuffer::new();
    let transport = Arc::new(RecordingTransport::default());
    assert!(buffer.flush(transport.clone()));

    let h = noop();
    buffer.register_listener("chat", h.clone());
    buffer.send(Frame::new("hello", vec![json!("x")])).expect("send");
    buffer.unregister_listener("chat", &h);

    assert_eq!(
        transport.ops(),
        vec![attach("chat"), transmit("hello", vec![json!("x")]), Op::Detach("chat".into())]
    );
    assert_eq!(buffer.pending(), (0, 0));
}
