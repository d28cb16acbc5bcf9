//! Channel behaviour against a scripted engine.

mod common;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use rand::seq::SliceRandom;

use esbridge::ChannelConfig;
use esbridge::Error;
use esbridge::Map;
use esbridge::Preamble;
use esbridge::Value;
use esrpc::Packet;

use common::FakeEngine;
use common::empty_messages;
use common::version_frame;

// ============================================================================
//  CORRELATION
// ============================================================================

#[tokio::test]
async fn test_concurrent_sends_pair_by_id_under_shuffled_responses() -> anyhow::Result<()> {
    let (channel, mut engine) = FakeEngine::connect(ChannelConfig::default());
    const N: usize = 32;

    let mut calls = Vec::new();
    for i in 0..N {
        let channel = channel.clone();
        calls.push(tokio::spawn(async move {
            channel
                .send("analyze-metafile", Map::new().with("metafile", i.to_string()))
                .await
        }));
    }

    let mut requests = Vec::new();
    for _ in 0..N {
        requests.push(engine.expect_request("analyze-metafile").await);
    }
    requests.shuffle(&mut rand::thread_rng());
    for request in &requests {
        let tag = request.payload.get_str("metafile").unwrap_or_default().to_string();
        engine
            .respond(request.id, Map::new().with("result", format!("echo {}", tag)))
            .await;
    }

    for (i, call) in calls.into_iter().enumerate() {
        let response = call.await??;
        let expected = format!("echo {}", i);
        assert_eq!(response.get_str("result"), Some(expected.as_str()));
    }
    assert_eq!(channel.ledger().pending_outbound(), 0);
    Ok(())
}

#[tokio::test]
async fn test_responses_survive_arbitrary_read_boundaries() -> anyhow::Result<()> {
    let config = ChannelConfig::new().preamble(Preamble::AnyVersion);
    let (channel, mut engine) = FakeEngine::connect_fragmented(config, 3);

    let first = tokio::spawn({
        let channel = channel.clone();
        async move { channel.send("analyze-metafile", Map::new().with("metafile", "{}")).await }
    });
    let second = tokio::spawn({
        let channel = channel.clone();
        async move { channel.send("transform", Map::new().with("input", "x")).await }
    });
    let a = engine.next().await.expect("first request");
    let b = engine.next().await.expect("second request");

    let mut stream = version_frame("0.16.17");
    for request in [&a, &b] {
        let payload = match request.command() {
            Some("transform") => empty_messages().with("code", "x;\n").with("map", b"".to_vec()),
            _ => Map::new().with("result", "ok"),
        };
        stream.extend(Packet::response(request.id, payload).encode()?);
    }
    engine.send_raw(&stream).await;

    assert_eq!(first.await??.get_str("result"), Some("ok"));
    assert_eq!(second.await??.get_str("code"), Some("x;\n"));
    assert_eq!(channel.engine_version(), Some("0.16.17"));
    Ok(())
}

#[tokio::test]
async fn test_stray_response_is_ignored() -> anyhow::Result<()> {
    let (channel, mut engine) = FakeEngine::connect(ChannelConfig::default());

    engine.respond(4242, Map::new().with("result", "late")).await;

    let call = tokio::spawn({
        let channel = channel.clone();
        async move { channel.send("analyze-metafile", Map::new().with("metafile", "{}")).await }
    });
    let request = engine.expect_request("analyze-metafile").await;
    engine.respond(request.id, Map::new().with("result", "ok")).await;

    assert_eq!(call.await??.get_str("result"), Some("ok"));
    assert!(!channel.is_closed());
    Ok(())
}

#[tokio::test]
async fn test_error_entry_settles_as_remote_failure() -> anyhow::Result<()> {
    let (channel, mut engine) = FakeEngine::connect(ChannelConfig::default());

    let call = tokio::spawn({
        let channel = channel.clone();
        async move { channel.send("rebuild", Map::new().with("key", 0)).await }
    });
    let request = engine.expect_request("rebuild").await;
    engine.respond(request.id, Map::new().with("error", "build context is gone")).await;

    match call.await? {
        Err(Error::Remote(msg)) => assert_eq!(msg, "build context is gone"),
        other => panic!("expected Remote, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_response_missing_schema_field_is_protocol_error() -> anyhow::Result<()> {
    let (channel, mut engine) = FakeEngine::connect(ChannelConfig::default());

    let call = tokio::spawn({
        let channel = channel.clone();
        async move {
            channel
                .send("format-msgs", Map::new().with("messages", Value::Array(vec![])).with("isWarning", false))
                .await
        }
    });
    let request = engine.expect_request("format-msgs").await;
    engine.respond(request.id, Map::new()).await;

    match call.await? {
        Err(Error::Protocol(msg)) => assert!(msg.contains("messages"), "{}", msg),
        other => panic!("expected Protocol, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_malformed_response_fails_only_its_call() -> anyhow::Result<()> {
    let (channel, mut engine) = FakeEngine::connect(ChannelConfig::default());

    let first = tokio::spawn({
        let channel = channel.clone();
        async move { channel.send("analyze-metafile", Map::new().with("metafile", "a")).await }
    });
    let a = engine.expect_request("analyze-metafile").await;
    let second = tokio::spawn({
        let channel = channel.clone();
        async move { channel.send("analyze-metafile", Map::new().with("metafile", "b")).await }
    });
    let b = engine.expect_request("analyze-metafile").await;

    // Valid header, value with an unknown tag.
    let mut frame = 5u32.to_le_bytes().to_vec();
    frame.extend_from_slice(&((a.id << 1) | 1).to_le_bytes());
    frame.push(0x09);
    engine.send_raw(&frame).await;
    engine.respond(b.id, Map::new().with("result", "fine")).await;

    assert!(matches!(first.await?, Err(Error::Protocol(_))));
    assert_eq!(second.await??.get_str("result"), Some("fine"));
    assert!(!channel.is_closed());
    Ok(())
}

// ============================================================================
//  TEARDOWN
// ============================================================================

#[tokio::test]
async fn test_close_settles_every_pending_call_once() -> anyhow::Result<()> {
    let (channel, mut engine) = FakeEngine::connect(ChannelConfig::default());
    const K: usize = 5;

    let mut calls = Vec::new();
    let mut ids = Vec::new();
    for i in 0..K {
        let ch = channel.clone();
        calls.push(tokio::spawn(async move {
            ch.send("analyze-metafile", Map::new().with("metafile", i.to_string())).await
        }));
        ids.push(engine.expect_request("analyze-metafile").await.id);
    }
    assert_eq!(channel.ledger().pending_outbound(), K);

    channel.close("stopped");
    channel.close("stopped again");

    // Answers after the close reach nobody.
    for id in ids {
        engine.respond(id, Map::new().with("result", "too late")).await;
    }

    for call in calls {
        match call.await? {
            Err(Error::ChannelClosed { reason }) => assert_eq!(reason, "stopped"),
            other => panic!("expected ChannelClosed, got {:?}", other),
        }
    }
    assert_eq!(channel.ledger().pending_outbound(), 0);

    let late = channel.send("analyze-metafile", Map::new().with("metafile", "x")).await;
    assert!(matches!(late, Err(Error::ChannelClosed { reason }) if reason == "stopped"));
    Ok(())
}

#[tokio::test]
async fn test_engine_hangup_closes_channel() -> anyhow::Result<()> {
    let (channel, mut engine) = FakeEngine::connect(ChannelConfig::default());

    let call = tokio::spawn({
        let channel = channel.clone();
        async move { channel.send("rebuild", Map::new().with("key", 1)).await }
    });
    engine.expect_request("rebuild").await;
    drop(engine);

    let err = call.await?.unwrap_err();
    assert!(err.is_closed(), "{:?}", err);
    assert!(channel.is_closed());
    Ok(())
}

#[tokio::test]
async fn test_oversized_frame_closes_channel() -> anyhow::Result<()> {
    let (channel, mut engine) = FakeEngine::connect(ChannelConfig::new().max_frame_size(64));

    let call = tokio::spawn({
        let channel = channel.clone();
        async move { channel.send("rebuild", Map::new().with("key", 1)).await }
    });
    engine.expect_request("rebuild").await;
    engine.send_raw(&1000u32.to_le_bytes()).await;

    match call.await? {
        Err(Error::ChannelClosed { reason }) => assert!(reason.contains("exceeds"), "{}", reason),
        other => panic!("expected ChannelClosed, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_call_timeout_forgets_the_call() -> anyhow::Result<()> {
    let config = ChannelConfig::new().call_timeout(Duration::from_millis(50));
    let (channel, mut engine) = FakeEngine::connect(config);

    let call = tokio::spawn({
        let channel = channel.clone();
        async move { channel.send("cancel", Map::new().with("key", 3)).await }
    });
    engine.expect_request("cancel").await;

    assert!(matches!(call.await?, Err(Error::Timeout)));
    assert_eq!(channel.ledger().pending_outbound(), 0);
    assert!(!channel.is_closed());
    Ok(())
}

// ============================================================================
//  PREAMBLE
// ============================================================================

#[tokio::test]
async fn test_expected_version_preamble() -> anyhow::Result<()> {
    let config = ChannelConfig::new().preamble(Preamble::Version("0.16.17".into()));
    let (channel, mut engine) = FakeEngine::connect(config);

    engine.send_raw(&version_frame("0.16.17")).await;
    let pong = engine.call("ping", Map::new()).await;

    assert!(pong.is_empty());
    assert_eq!(channel.engine_version(), Some("0.16.17"));
    Ok(())
}

#[tokio::test]
async fn test_version_mismatch_closes_channel() -> anyhow::Result<()> {
    let config = ChannelConfig::new().preamble(Preamble::Version("0.16.17".into()));
    let (channel, mut engine) = FakeEngine::connect(config);

    let call = tokio::spawn({
        let channel = channel.clone();
        async move { channel.send("rebuild", Map::new().with("key", 0)).await }
    });
    engine.expect_request("rebuild").await;
    engine.send_raw(&version_frame("0.15.0")).await;

    match call.await? {
        Err(Error::ChannelClosed { reason }) => assert!(reason.contains("0.15.0"), "{}", reason),
        other => panic!("expected ChannelClosed, got {:?}", other),
    }
    assert_eq!(channel.engine_version(), None);
    Ok(())
}

// ============================================================================
//  INBOUND DISPATCH
// ============================================================================

#[tokio::test]
async fn test_ping_is_answered_without_a_handler() -> anyhow::Result<()> {
    let (_channel, mut engine) = FakeEngine::connect(ChannelConfig::default());
    let response = engine.call("ping", Map::new()).await;
    assert!(response.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_unsupported_command_gets_error_response() -> anyhow::Result<()> {
    let (_channel, mut engine) = FakeEngine::connect(ChannelConfig::default());
    let response = engine.call("serve-stop", Map::new()).await;
    assert_eq!(response.get_str("error"), Some("unsupported command: serve-stop"));
    Ok(())
}

#[tokio::test]
async fn test_request_missing_schema_field_skips_handler() -> anyhow::Result<()> {
    let (channel, mut engine) = FakeEngine::connect(ChannelConfig::default());
    let called = Arc::new(AtomicBool::new(false));
    let flag = called.clone();
    channel.on_inbound_command("on-load", move |_channel, _payload| {
        flag.store(true, Ordering::SeqCst);
        async move { Ok(Map::new()) }
    });

    let response = engine.call("on-load", Map::new().with("key", 0)).await;
    let error = response.get_str("error").unwrap_or_default();
    assert!(error.contains("path"), "{}", error);
    assert!(!called.load(Ordering::SeqCst));
    Ok(())
}

#[tokio::test]
async fn test_handler_error_becomes_error_response() -> anyhow::Result<()> {
    let (channel, mut engine) = FakeEngine::connect(ChannelConfig::default());
    channel.on_inbound_command("on-dispose", |_channel, _payload| async move {
        Err::<Map, Error>(Error::Protocol("no such build".into()))
    });

    let response = engine.call("on-dispose", Map::new().with("key", 9)).await;
    assert_eq!(response.get_str("error"), Some("protocol error: no such build"));
    assert_eq!(channel.ledger().pending_inbound(), 0);
    Ok(())
}

#[tokio::test]
async fn test_panicking_handler_still_answers() -> anyhow::Result<()> {
    let (channel, mut engine) = FakeEngine::connect(ChannelConfig::default());
    channel.on_inbound_command("on-start", |_channel, payload| async move {
        if payload.get_int("key") == Some(3) {
            panic!("hook blew up");
        }
        Ok(empty_messages())
    });

    let id = engine.request("on-start", Map::new().with("key", 3)).await;
    let response = tokio::time::timeout(Duration::from_secs(5), engine.expect_response(id)).await?;
    let error = response.get_str("error").unwrap_or_default();
    assert!(error.contains("panicked: hook blew up"), "{}", error);
    assert_eq!(channel.ledger().pending_inbound(), 0);

    let response = engine.call("on-start", Map::new().with("key", 4)).await;
    assert_eq!(response, empty_messages());
    assert!(!channel.is_closed());
    Ok(())
}

#[tokio::test]
async fn test_handler_may_call_back_before_answering() -> anyhow::Result<()> {
    let (channel, mut engine) = FakeEngine::connect(ChannelConfig::default());
    channel.on_inbound_command("on-start", |channel, payload| async move {
        let key = payload.get_int("key").unwrap_or_default();
        let resolved = channel
            .send("resolve", Map::new().with("key", key).with("pluginName", "p").with("path", "./dep"))
            .await?;
        Ok(empty_messages().with("seen", resolved.get_str("path").unwrap_or_default()))
    });

    let start = engine.request("on-start", Map::new().with("key", 4)).await;
    let nested = engine.expect_request("resolve").await;
    assert_eq!(nested.payload.get_str("path"), Some("./dep"));
    engine.respond(nested.id, empty_messages().with("path", "/abs/dep.js")).await;

    let response = engine.expect_response(start).await;
    assert_eq!(response.get_str("seen"), Some("/abs/dep.js"));
    Ok(())
}

#[tokio::test]
async fn test_slow_handler_does_not_block_later_requests() -> anyhow::Result<()> {
    let (channel, mut engine) = FakeEngine::connect(ChannelConfig::default());
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    let release_rx = std::sync::Mutex::new(Some(release_rx));
    channel.on_inbound_command("on-dispose", move |_channel, payload| {
        let wait = if payload.get_int("key") == Some(1) {
            release_rx.lock().ok().and_then(|mut slot| slot.take())
        } else {
            None
        };
        async move {
            if let Some(wait) = wait {
                let _ = wait.await;
            }
            Ok(Map::new().with("key", payload.get_int("key").unwrap_or_default()))
        }
    });

    let slow = engine.request("on-dispose", Map::new().with("key", 1)).await;
    let fast = engine.request("on-dispose", Map::new().with("key", 2)).await;

    let first = engine.next().await.expect("response");
    assert_eq!((first.id, first.payload.get_int("key")), (fast, Some(2)));

    let _ = release_tx.send(());
    let second = engine.next().await.expect("response");
    assert_eq!((second.id, second.payload.get_int("key")), (slow, Some(1)));
    Ok(())
}

#[tokio::test]
async fn test_notify_expects_no_response() -> anyhow::Result<()> {
    let (channel, mut engine) = FakeEngine::connect(ChannelConfig::default());

    channel.notify("cancel", Map::new().with("key", 7)).await?;
    let packet: Packet = engine.expect_request("cancel").await;

    assert_eq!(packet.payload.get_int("key"), Some(7));
    assert_eq!(channel.ledger().pending_outbound(), 0);
    Ok(())
}
