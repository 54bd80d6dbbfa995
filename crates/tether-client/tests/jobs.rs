//! Job dispatch over a live session: correlation, timeouts, teardown, and
//! push fanout.

mod support;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use bytes::Bytes;
use futures::StreamExt;

use support::{test_config, Gateway};
use tether_client::{CmClient, JobError};
use tether_core::{Message, MsgKind};

#[tokio::test]
async fn job_round_trips() {
    let g = Gateway::bind().await;
    let config = test_config(vec![g.addr()]);

    let script = tokio::spawn(async move {
        let mut conn = g.accept().await;
        conn.establish(1).await;
        let request = conn.recv_non_heartbeat().await;
        assert_eq!(request.kind, MsgKind::Other(1000));
        assert_eq!(request.body, Bytes::from_static(b"ping"));
        conn.reply(&request, Bytes::from_static(b"pong")).await;
        conn
    });

    let client = CmClient::connect(config).await.unwrap();
    let response = client
        .submit_job(MsgKind::Other(1000), Bytes::from_static(b"ping"))
        .await
        .unwrap();
    assert_eq!(response.body, Bytes::from_static(b"pong"));

    client.disconnect().await;
    drop(script);
}

#[tokio::test]
async fn out_of_order_responses_reach_the_right_callers() {
    let g = Gateway::bind().await;
    let config = test_config(vec![g.addr()]);

    let script = tokio::spawn(async move {
        let mut conn = g.accept().await;
        conn.establish(1).await;
        let a = conn.recv_non_heartbeat().await;
        let b = conn.recv_non_heartbeat().await;
        // Answer in reverse arrival order.
        conn.reply(&b, b.body.clone()).await;
        conn.reply(&a, a.body.clone()).await;
        conn
    });

    let client = CmClient::connect(config).await.unwrap();
    let (first, second) = tokio::join!(
        client.submit_job(MsgKind::Other(1000), Bytes::from_static(b"first")),
        client.submit_job(MsgKind::Other(1001), Bytes::from_static(b"second")),
    );
    assert_eq!(first.unwrap().body, Bytes::from_static(b"first"));
    assert_eq!(second.unwrap().body, Bytes::from_static(b"second"));

    client.disconnect().await;
    drop(script);
}

#[tokio::test]
async fn timed_out_job_fails_and_late_response_is_discarded() {
    let g = Gateway::bind().await;
    let mut config = test_config(vec![g.addr()]);
    config.job_timeout = Duration::from_millis(200);

    let script = tokio::spawn(async move {
        let mut conn = g.accept().await;
        conn.establish(1).await;
        let slow = conn.recv_non_heartbeat().await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        // Lands after the caller's deadline; the client must discard it.
        conn.reply(&slow, Bytes::from_static(b"late")).await;

        let prompt = conn.recv_non_heartbeat().await;
        conn.reply(&prompt, Bytes::from_static(b"prompt")).await;
        conn
    });

    let client = CmClient::connect(config).await.unwrap();
    let slow = client
        .submit_job(MsgKind::Other(1000), Bytes::from_static(b"slow"))
        .await;
    assert_matches!(slow, Err(JobError::Timeout));

    // The connection survives the late response and keeps serving jobs.
    let prompt = client
        .submit_job_with_timeout(
            MsgKind::Other(1001),
            Bytes::from_static(b"prompt"),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
    assert_eq!(prompt.body, Bytes::from_static(b"prompt"));

    client.disconnect().await;
    drop(script);
}

#[tokio::test]
async fn disconnect_fails_pending_jobs() {
    let g = Gateway::bind().await;
    let config = test_config(vec![g.addr()]);

    let script = tokio::spawn(async move {
        let mut conn = g.accept().await;
        conn.establish(1).await;
        let _never_answered = conn.recv_non_heartbeat().await;
        conn
    });

    let client = Arc::new(CmClient::connect(config).await.unwrap());
    let submitter = {
        let client = client.clone();
        tokio::spawn(async move {
            client
                .submit_job_with_timeout(
                    MsgKind::Other(1000),
                    Bytes::from_static(b"hanging"),
                    Duration::from_secs(30),
                )
                .await
        })
    };

    // Let the job reach the wire before tearing down.
    tokio::time::sleep(Duration::from_millis(100)).await;
    client.disconnect().await;

    assert_matches!(submitter.await.unwrap(), Err(JobError::Disconnected));
    drop(script);
}

#[tokio::test]
async fn multi_container_fans_out_in_order() {
    let g = Gateway::bind().await;
    let config = test_config(vec![g.addr()]);

    let script = tokio::spawn(async move {
        let mut conn = g.accept().await;
        conn.establish(1).await;
        let request = conn.recv_non_heartbeat().await;
        let reply = Message::new(MsgKind::Other(1000), Bytes::from_static(b"answer"))
            .with_target_job(request.source_job);
        let container = Message::pack_multi(&[
            Message::new(MsgKind::Other(2000), Bytes::from_static(b"one")),
            reply,
            Message::new(MsgKind::Other(2000), Bytes::from_static(b"two")),
        ]);
        conn.send(&container).await;
        conn
    });

    let client = CmClient::connect(config).await.unwrap();
    let mut pushes = client.subscribe(MsgKind::Other(2000));

    let response = client
        .submit_job(MsgKind::Other(1000), Bytes::from_static(b"ask"))
        .await
        .unwrap();
    assert_eq!(response.body, Bytes::from_static(b"answer"));
    assert_eq!(
        pushes.next().await.unwrap().body,
        Bytes::from_static(b"one")
    );
    assert_eq!(
        pushes.next().await.unwrap().body,
        Bytes::from_static(b"two")
    );

    client.disconnect().await;
    drop(script);
}

#[tokio::test]
async fn oversize_request_is_rejected_locally() {
    let g = Gateway::bind().await;
    let mut config = test_config(vec![g.addr()]);
    // Small, but still roomy enough for the key-exchange frames.
    config.frame_max_size = 512;

    let script = tokio::spawn(async move {
        let mut conn = g.accept().await;
        conn.establish(1).await;
        conn
    });

    let client = CmClient::connect(config).await.unwrap();
    let err = client
        .submit_job(MsgKind::Other(1000), Bytes::from(vec![0u8; 1024]))
        .await;
    assert_matches!(err, Err(JobError::PayloadTooLarge));

    client.disconnect().await;
    drop(script);
}

#[tokio::test]
async fn fire_and_forget_send_reaches_the_server() {
    let g = Gateway::bind().await;
    let config = test_config(vec![g.addr()]);

    let script = tokio::spawn(async move {
        let mut conn = g.accept().await;
        conn.establish(1).await;
        conn.recv_non_heartbeat().await
    });

    let client = CmClient::connect(config).await.unwrap();
    client
        .send(MsgKind::Other(3000), Bytes::from_static(b"notice"))
        .await
        .unwrap();

    let seen = script.await.unwrap();
    assert_eq!(seen.kind, MsgKind::Other(3000));
    assert_eq!(seen.body, Bytes::from_static(b"notice"));
    client.disconnect().await;
}
