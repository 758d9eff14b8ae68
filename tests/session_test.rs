// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Connection lifecycle against a scripted connector.

mod common;

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use common::{connected, device, drain, quiet_config, FakeConnector, Outcome};
use smartmed_link::{ConnectCause, ConnectionState, LinkError, Session, SessionEvent};

#[tokio::test(start_paused = true)]
async fn test_connect_retries_after_refusal() {
    let (client, _server) = tokio::io::duplex(1024);
    let connector = FakeConnector::new([Outcome::Refuse, Outcome::Accept(client)]);
    let (session, mut events) = Session::new(quiet_config(), connector.clone());

    session.connect(device()).await.unwrap();

    assert_eq!(connector.attempts(), 2);
    assert_eq!(session.state(), ConnectionState::Connected);
    assert_eq!(session.device().map(|d| d.name), Some("D1".to_string()));
    assert_eq!(
        drain(&mut events),
        vec![SessionEvent::Connected {
            device_name: "D1".to_string()
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_connect_gives_up_after_configured_attempts() {
    let connector = FakeConnector::new([Outcome::Refuse, Outcome::Refuse, Outcome::Refuse]);
    let (session, mut events) = Session::new(quiet_config(), connector.clone());

    let result = session.connect(device()).await;

    assert!(matches!(
        result,
        Err(LinkError::ConnectFailed(ConnectCause::NotResponding(_)))
    ));
    assert_eq!(connector.attempts(), 3);
    assert_eq!(session.state(), ConnectionState::Disconnected);

    let emitted = drain(&mut events);
    assert_eq!(emitted.len(), 1);
    assert!(matches!(emitted[0], SessionEvent::Error(_)));
}

#[tokio::test(start_paused = true)]
async fn test_hung_attempt_times_out() {
    let (client, _server) = tokio::io::duplex(1024);
    let connector = FakeConnector::new([Outcome::Hang, Outcome::Accept(client)]);
    let (session, _events) = Session::new(quiet_config(), connector.clone());

    let started = tokio::time::Instant::now();
    session.connect(device()).await.unwrap();

    // One 10s timeout plus one 1s backoff.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(11) && elapsed < Duration::from_secs(12));
    assert_eq!(connector.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_second_connect_rejected_while_connecting() {
    let connector = FakeConnector::new([Outcome::Hang]);
    let (session, _events) = Session::new(quiet_config(), connector.clone());

    let first = {
        let session = session.clone();
        tokio::spawn(async move { session.connect(device()).await })
    };
    while session.state() != ConnectionState::Connecting {
        tokio::task::yield_now().await;
    }

    assert_eq!(
        session.connect(device()).await,
        Err(LinkError::AlreadyConnecting)
    );
    assert_eq!(connector.attempts(), 1);

    session.disconnect().await;
    let _ = first.await;
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_cancels_attempt_in_flight() {
    let (client, _server) = tokio::io::duplex(1024);
    let connector = FakeConnector::new([Outcome::Hang, Outcome::Accept(client)]);
    let (session, mut events) = Session::new(quiet_config(), connector.clone());

    let first = {
        let session = session.clone();
        tokio::spawn(async move { session.connect(device()).await })
    };
    while connector.attempts() == 0 {
        tokio::task::yield_now().await;
    }

    let started = tokio::time::Instant::now();
    session.disconnect().await;
    assert_eq!(session.state(), ConnectionState::Disconnected);

    // The hung attempt ends without waiting out the connect timeout.
    let result = first.await.unwrap();
    assert_eq!(result, Err(LinkError::ConnectFailed(ConnectCause::Cancelled)));
    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(connector.attempts(), 1);

    let emitted = drain(&mut events);
    assert_eq!(emitted.len(), 1);
    assert!(matches!(emitted[0], SessionEvent::Error(_)));

    // A new connect is accepted right away.
    session.connect(device()).await.unwrap();
    assert_eq!(session.state(), ConnectionState::Connected);
    assert_eq!(connector.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_during_backoff_is_prompt() {
    let connector = FakeConnector::new([Outcome::Refuse, Outcome::Refuse, Outcome::Refuse]);
    let (session, _events) = Session::new(quiet_config(), connector.clone());

    let first = {
        let session = session.clone();
        tokio::spawn(async move { session.connect(device()).await })
    };
    while connector.attempts() == 0 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    session.disconnect().await;
    let started = tokio::time::Instant::now();

    assert_eq!(
        first.await.unwrap(),
        Err(LinkError::ConnectFailed(ConnectCause::Cancelled))
    );
    assert!(started.elapsed() < Duration::from_millis(900));
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_interrupts_blocked_send() {
    // Small pipe that the device never drains.
    let (client, _server) = tokio::io::duplex(8);
    let connector = FakeConnector::new([Outcome::Accept(client)]);
    let (session, mut events) = Session::new(quiet_config(), connector);
    session.connect(device()).await.unwrap();

    let blocked = {
        let session = session.clone();
        tokio::spawn(async move { session.send("SET_ALARM:Aspirin:08:00(1)").await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!blocked.is_finished());

    let disconnect = tokio::time::timeout(Duration::from_secs(5), session.disconnect()).await;
    assert!(disconnect.is_ok());
    assert_eq!(blocked.await.unwrap(), Err(LinkError::NotConnected));

    assert_eq!(session.state(), ConnectionState::Disconnected);
    let emitted = drain(&mut events);
    assert_eq!(
        emitted.last(),
        Some(&SessionEvent::Disconnected)
    );
    assert!(!emitted.iter().any(|e| matches!(e, SessionEvent::Error(_))));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_is_idempotent() {
    let (session, mut events, _server) = connected(quiet_config()).await;

    session.disconnect().await;
    session.disconnect().await;

    assert_eq!(session.state(), ConnectionState::Disconnected);
    assert!(session.device().is_none());
    assert_eq!(drain(&mut events), vec![SessionEvent::Disconnected]);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_closes_device_end() {
    let (session, _events, mut server) = connected(quiet_config()).await;

    session.disconnect().await;

    let mut buf = Vec::new();
    let n = server.read_to_end(&mut buf).await.unwrap();
    assert_eq!(n, 0);
}

#[tokio::test(start_paused = true)]
async fn test_send_requires_connection() {
    let connector = FakeConnector::new([]);
    let (session, mut events) = Session::new(quiet_config(), connector);

    assert_eq!(session.send("PING").await, Err(LinkError::NotConnected));
    assert!(drain(&mut events).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_send_after_disconnect_fails() {
    let (session, _events, _server) = connected(quiet_config()).await;

    session.disconnect().await;

    assert_eq!(session.send("GET_STATUS").await, Err(LinkError::NotConnected));
}

#[tokio::test(start_paused = true)]
async fn test_send_appends_newline() {
    let (session, _events, mut server) = connected(quiet_config()).await;

    session.send("GET_STATUS").await.unwrap();
    session.send("PING\n").await.unwrap();

    let mut buf = [0u8; 16];
    server.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"GET_STATUS\nPING\n");
}

#[tokio::test(start_paused = true)]
async fn test_inbound_lines_delivered_in_order() {
    let (_session, mut events, mut server) = connected(quiet_config()).await;

    server.write_all(b"STATUS:Asp").await.unwrap();
    server
        .write_all(b"irin:5\r\nHISTORY:Aspirin:08:00:2026-03-01\n\n")
        .await
        .unwrap();

    assert_eq!(
        events.recv().await,
        Some(SessionEvent::DataReceived("STATUS:Aspirin:5".to_string()))
    );
    assert_eq!(
        events.recv().await,
        Some(SessionEvent::DataReceived(
            "HISTORY:Aspirin:08:00:2026-03-01".to_string()
        ))
    );
    assert!(drain(&mut events).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_device_closing_stream_disconnects() {
    let (session, mut events, server) = connected(quiet_config()).await;

    drop(server);

    assert!(matches!(events.recv().await, Some(SessionEvent::Error(_))));
    assert_eq!(events.recv().await, Some(SessionEvent::Disconnected));
    assert_eq!(session.state(), ConnectionState::Disconnected);

    // Teardown already happened; nothing more is emitted.
    session.disconnect().await;
    assert!(drain(&mut events).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_replaces_existing_connection() {
    let (first, _first_server) = tokio::io::duplex(1024);
    let (second, _second_server) = tokio::io::duplex(1024);
    let connector = FakeConnector::new([Outcome::Accept(first), Outcome::Accept(second)]);
    let (session, mut events) = Session::new(quiet_config(), connector);

    session.connect(device()).await.unwrap();
    session
        .connect(smartmed_link::DeviceHandle::new("00:11:22:33:44:66", "D2"))
        .await
        .unwrap();

    assert_eq!(
        drain(&mut events),
        vec![
            SessionEvent::Connected {
                device_name: "D1".to_string()
            },
            SessionEvent::Disconnected,
            SessionEvent::Connected {
                device_name: "D2".to_string()
            },
        ]
    );
    assert_eq!(session.device().map(|d| d.name), Some("D2".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_handshake_sends_hello() {
    let config = smartmed_link::SessionConfig {
        handshake: true,
        ..quiet_config()
    };
    let (_session, _events, mut server) = connected(config).await;

    let mut buf = [0u8; 6];
    server.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"HELLO\n");
}
