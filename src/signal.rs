use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crate::config::StreamerConfig;
use crate::message::{Kind, Message, Outbound};
use crate::peer::PeerConnector;
use crate::session::Session;
use crate::table::SessionTable;
use crate::transport::{EventQueue, SignalingTransport, TransportEvent};

/// What the signaling loop did with one inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// New session created for a first-time request.
    Created,
    /// Request for an id that already has a session.
    Duplicate,
    /// Answer queued on the session's inbox.
    Answered,
    /// Answer for an id with no session.
    UnknownPeer,
    /// Well-formed message of a type this server does not handle.
    Ignored,
    Malformed,
    /// Peer allocation or inbox delivery failed.
    Failed,
}

/// Owner of the signaling transport and the only writer of the session table.
pub struct SignalingLoop {
    config: StreamerConfig,
    table: Arc<SessionTable>,
    connector: Arc<dyn PeerConnector>,
    transport: Arc<dyn SignalingTransport>,
    events: Arc<EventQueue>,
    terminate: Arc<AtomicBool>,
}

impl SignalingLoop {
    pub fn new(
        config: StreamerConfig,
        table: Arc<SessionTable>,
        connector: Arc<dyn PeerConnector>,
        transport: Arc<dyn SignalingTransport>,
        events: Arc<EventQueue>,
        terminate: Arc<AtomicBool>,
    ) -> Self {
        Self {
            config,
            table,
            connector,
            transport,
            events,
            terminate,
        }
    }

    fn terminated(&self) -> bool {
        self.terminate.load(Ordering::Acquire)
    }

    pub fn run(&self) {
        log::info!("Launching signaling thread...");
        log::info!("URL is {}", self.config.signaling_url);
        self.open_transport();

        while !self.terminated() {
            if let Some(event) = self.events.pop_for(self.config.poll_interval) {
                self.handle_event(event);
            }
            // a Closed event can be lost to a full queue; the link state cannot
            self.reconnect_if_down();
            self.relay_outbound();
        }
        log::info!("Signaling thread exiting");
    }

    fn open_transport(&self) {
        if let Err(e) = self.transport.open(self.events.clone()) {
            log::error!("Failed to open signaling transport: {}", e);
        }
    }

    fn reconnect_if_down(&self) {
        if self.terminated() || self.transport.is_open() {
            return;
        }
        log::warn!("WebSocket unexpectedly closed, try to reopen...");
        thread::sleep(self.config.reconnect_delay);
        if !self.terminated() {
            self.open_transport();
        }
    }

    pub fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Message(text) => {
                let outcome = self.handle_message(&text);
                log::debug!("Signaling message '{}' -> {:?}", text, outcome);
            }
            TransportEvent::Closed => self.reconnect_if_down(),
        }
    }

    pub fn handle_message(&self, text: &str) -> Dispatch {
        let msg = match Message::parse(text) {
            Ok(msg) => msg,
            Err(e) => {
                log::debug!("Discarding malformed signaling message: {}", e);
                return Dispatch::Malformed;
            }
        };

        match msg.kind() {
            Kind::Request => self.on_request(msg.id),
            Kind::Answer => {
                let Some(session) = self.table.get(&msg.id) else {
                    log::debug!("Answer from unknown peer {}", msg.id);
                    return Dispatch::UnknownPeer;
                };
                let Some(sdp) = msg.sdp else {
                    log::warn!("Answer from {} carries no sdp", msg.id);
                    return Dispatch::Malformed;
                };
                match session.submit_remote_answer(sdp) {
                    Ok(()) => Dispatch::Answered,
                    Err(e) => {
                        log::warn!("Could not deliver answer to {}: {}", msg.id, e);
                        Dispatch::Failed
                    }
                }
            }
            Kind::Other => {
                log::debug!("Ignoring '{}' message from {}", msg.r#type, msg.id);
                Dispatch::Ignored
            }
        }
    }

    fn on_request(&self, id: String) -> Dispatch {
        if self.table.contains(&id) {
            log::warn!("Peer {} already has a session, ignoring request", id);
            return Dispatch::Duplicate;
        }

        log::info!("Instantiating new client peer {}", id);
        let session = match Session::create(
            id,
            self.config.stun_server.as_deref(),
            self.connector.as_ref(),
            self.config.signal_push_timeout,
        ) {
            Ok(session) => Arc::new(session),
            Err(e) => {
                log::error!("Failed to create peer connection: {}", e);
                return Dispatch::Failed;
            }
        };

        if self.table.insert(session) {
            Dispatch::Created
        } else {
            Dispatch::Duplicate
        }
    }

    /// Run each session's negotiation step and relay what it produced.
    pub fn relay_outbound(&self) {
        for session in self.table.snapshot() {
            session.negotiate();
            let mut retired = false;
            while let Some(out) = session.poll_outbound(self.config.outbound_poll) {
                match out {
                    Outbound::Signal(text) => {
                        if let Err(e) = self.transport.send(text) {
                            log::warn!("Failed to relay signaling for {}: {}", session.id(), e);
                        }
                    }
                    Outbound::Quit => {
                        self.retire(&session);
                        retired = true;
                        break;
                    }
                }
            }
            if !retired && session.teardown_requested() {
                self.retire(&session);
            }
        }
    }

    fn retire(&self, session: &Session) {
        if self.table.remove(session.id()).is_some() {
            log::info!("Removing client peer {}", session.id());
        }
        session.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::PeerState;
    use crate::session::SessionState;
    use crate::testing::{wait_until, FakeConnector, FakeTransport};
    use std::time::Duration;

    struct Rig {
        signaling: SignalingLoop,
        connector: Arc<FakeConnector>,
        transport: Arc<FakeTransport>,
        table: Arc<SessionTable>,
        events: Arc<EventQueue>,
        terminate: Arc<AtomicBool>,
    }

    fn rig() -> Rig {
        let config = StreamerConfig {
            reconnect_delay: Duration::from_millis(10),
            poll_interval: Duration::from_millis(10),
            signal_push_timeout: Duration::from_millis(10),
            ..Default::default()
        };
        let connector = Arc::new(FakeConnector::default());
        let transport = Arc::new(FakeTransport::default());
        let table = Arc::new(SessionTable::new());
        let events = Arc::new(EventQueue::new(
            crate::config::SIGNAL_QUEUE_CAPACITY,
            crate::queue::Overflow::Block(Duration::from_millis(10)),
        ));
        let terminate = Arc::new(AtomicBool::new(false));
        let signaling = SignalingLoop::new(
            config,
            table.clone(),
            connector.clone(),
            transport.clone(),
            events.clone(),
            terminate.clone(),
        );
        transport.open(events.clone()).unwrap();
        Rig {
            signaling,
            connector,
            transport,
            table,
            events,
            terminate,
        }
    }

    #[test]
    fn distinct_requests_create_one_session_each() {
        let r = rig();
        for id in ["a", "b", "c", "b", "a"] {
            r.signaling
                .handle_message(&format!(r#"{{"id":"{id}","type":"request"}}"#));
        }
        assert_eq!(r.table.ids(), vec!["a", "b", "c"]);
        assert_eq!(r.connector.connects(), 3);
    }

    #[test]
    fn duplicate_request_leaves_table_unchanged() {
        let r = rig();
        let req = r#"{"id":"p1","type":"request"}"#;
        assert_eq!(r.signaling.handle_message(req), Dispatch::Created);
        let before = r.table.get("p1").unwrap();

        assert_eq!(r.signaling.handle_message(req), Dispatch::Duplicate);
        assert_eq!(r.table.len(), 1);
        assert!(Arc::ptr_eq(&before, &r.table.get("p1").unwrap()));
        assert_eq!(r.connector.connects(), 1);
    }

    #[test]
    fn answer_for_unknown_peer_is_discarded() {
        let r = rig();
        let outcome = r
            .signaling
            .handle_message(r#"{"id":"ghost","type":"answer","sdp":"v=0"}"#);
        assert_eq!(outcome, Dispatch::UnknownPeer);
        assert!(r.table.is_empty());
        assert_eq!(r.connector.connects(), 0);
    }

    #[test]
    fn malformed_and_foreign_messages_are_discarded() {
        let r = rig();
        assert_eq!(r.signaling.handle_message("{"), Dispatch::Malformed);
        assert_eq!(
            r.signaling.handle_message(r#"{"type":"request"}"#),
            Dispatch::Malformed
        );
        assert_eq!(
            r.signaling.handle_message(r#"{"id":"p1","type":"offer","sdp":"x"}"#),
            Dispatch::Ignored
        );
        r.signaling.handle_message(r#"{"id":"p1","type":"request"}"#);
        assert_eq!(
            r.signaling.handle_message(r#"{"id":"p1","type":"answer"}"#),
            Dispatch::Malformed
        );
        assert_eq!(r.table.len(), 1);
        assert!(r.transport.sent().is_empty());
    }

    #[test]
    fn failed_peer_allocation_creates_nothing() {
        let r = rig();
        r.connector.fail_connects(true);
        assert_eq!(
            r.signaling.handle_message(r#"{"id":"p1","type":"request"}"#),
            Dispatch::Failed
        );
        assert!(r.table.is_empty());
    }

    #[test]
    fn full_negotiation_and_teardown() {
        let r = rig();

        r.signaling.handle_message(r#"{"id":"p1","type":"request"}"#);
        assert_eq!(r.table.get("p1").unwrap().state(), SessionState::Negotiating);

        let events = r.connector.events("p1").unwrap();
        events.gathering_complete("offer", "v=0\r\no=- 1 1 IN IP4 0.0.0.0\r\n");
        r.signaling.relay_outbound();
        let sent = r.transport.sent();
        assert_eq!(sent.len(), 1);
        let value: serde_json::Value = serde_json::from_str(&sent[0]).unwrap();
        assert_eq!(value["id"], "p1");
        assert_eq!(value["type"], "offer");
        assert!(!value["sdp"].as_str().unwrap().is_empty());

        let outcome = r
            .signaling
            .handle_message(r#"{"id":"p1","type":"answer","sdp":"<valid>"}"#);
        assert_eq!(outcome, Dispatch::Answered);
        assert_eq!(r.table.get("p1").unwrap().pending_answers(), 1);
        assert_eq!(r.table.ids(), vec!["p1"]);

        r.signaling.relay_outbound();
        let log = r.connector.log("p1").unwrap();
        assert_eq!(*log.answers.lock(), vec!["<valid>"]);

        events.state_changed(PeerState::Connected);
        r.signaling.relay_outbound();
        assert!(r.table.contains("p1"));

        events.state_changed(PeerState::Closed);
        r.signaling.relay_outbound();
        assert!(!r.table.contains("p1"));
        assert_eq!(log.close_count(), 1);
        // the teardown marker never reaches the wire
        assert_eq!(r.transport.sent().len(), 1);
    }

    #[test]
    fn session_can_return_after_teardown() {
        let r = rig();
        let req = r#"{"id":"p1","type":"request"}"#;
        r.signaling.handle_message(req);
        r.connector.events("p1").unwrap().state_changed(PeerState::Failed);
        r.signaling.relay_outbound();
        assert!(r.table.is_empty());

        assert_eq!(r.signaling.handle_message(req), Dispatch::Created);
        assert_eq!(r.connector.connects(), 2);
    }

    #[test]
    fn relay_failure_keeps_session() {
        let r = rig();
        r.signaling.handle_message(r#"{"id":"p1","type":"request"}"#);
        r.transport.close();
        r.connector
            .events("p1")
            .unwrap()
            .gathering_complete("offer", "v=0");
        r.signaling.relay_outbound();
        assert!(r.transport.sent().is_empty());
        assert!(r.table.contains("p1"));
    }

    #[test]
    fn reopens_transport_after_unexpected_close() {
        let r = rig();
        assert_eq!(r.transport.opens(), 1);
        r.transport.drop_connection();
        let event = r.events.try_pop().unwrap();
        r.signaling.handle_event(event);
        assert_eq!(r.transport.opens(), 2);
        assert!(r.transport.is_connected());
    }

    #[test]
    fn stale_close_event_does_not_reopen_live_link() {
        let r = rig();
        r.signaling.handle_event(TransportEvent::Closed);
        assert_eq!(r.transport.opens(), 1);
    }

    #[test]
    fn reopens_when_close_event_was_lost() {
        let r = rig();
        // the closure never made it into the queue
        r.transport.lose_connection();
        assert!(r.events.is_empty());

        r.signaling.reconnect_if_down();
        assert_eq!(r.transport.opens(), 2);
        assert!(r.transport.is_connected());
    }

    #[test]
    fn run_loop_recovers_from_lost_close_event() {
        let r = rig();
        let Rig {
            signaling,
            transport,
            terminate,
            ..
        } = r;

        let worker = thread::spawn(move || signaling.run());
        assert!(wait_until(Duration::from_secs(5), || transport.opens() >= 2));
        transport.lose_connection();
        assert!(wait_until(Duration::from_secs(5), || transport.opens() >= 3));
        assert!(transport.is_connected());

        terminate.store(true, Ordering::Release);
        worker.join().unwrap();
    }

    #[test]
    fn no_reopen_once_terminating() {
        let r = rig();
        r.transport.drop_connection();
        r.terminate.store(true, Ordering::Release);
        r.signaling.handle_event(TransportEvent::Closed);
        r.signaling.reconnect_if_down();
        assert_eq!(r.transport.opens(), 1);
    }

    #[test]
    fn terminal_session_retired_even_with_full_outbox() {
        let r = rig();
        r.signaling.handle_message(r#"{"id":"p1","type":"request"}"#);
        let events = r.connector.events("p1").unwrap();
        for _ in 0..crate::config::SESSION_QUEUE_CAPACITY {
            events.gathering_complete("offer", "v=0");
        }
        events.state_changed(PeerState::Failed);

        r.signaling.relay_outbound();
        assert!(!r.table.contains("p1"));
        assert_eq!(r.connector.log("p1").unwrap().close_count(), 1);
        assert_eq!(r.transport.sent().len(), crate::config::SESSION_QUEUE_CAPACITY);

        r.signaling.relay_outbound();
        assert!(r.table.is_empty());
    }

    #[test]
    fn run_loop_processes_and_exits() {
        let r = rig();
        let Rig {
            signaling,
            connector,
            transport,
            table,
            events,
            terminate,
        } = r;

        let worker = thread::spawn(move || signaling.run());
        assert!(wait_until(Duration::from_secs(5), || transport.opens() >= 2));

        transport.inject(r#"{"id":"v1","type":"request"}"#);
        assert!(wait_until(Duration::from_secs(5), || table.contains("v1")));

        connector
            .events("v1")
            .unwrap()
            .gathering_complete("offer", "v=0");
        assert!(wait_until(Duration::from_secs(5), || transport.sent().len() == 1));

        transport.drop_connection();
        assert!(wait_until(Duration::from_secs(5), || transport.opens() >= 3));

        connector
            .events("v1")
            .unwrap()
            .state_changed(PeerState::Disconnected);
        assert!(wait_until(Duration::from_secs(5), || table.is_empty()));

        terminate.store(true, Ordering::Release);
        worker.join().unwrap();
        assert!(events.is_empty());
    }
}
