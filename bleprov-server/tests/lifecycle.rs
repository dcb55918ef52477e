//! Advertising / accept / exit behaviour of the whole server

mod common;

use std::time::Duration;

use bleprov_proto::att;
use bleprov_server::{
    Association, Exit, ProcessContext, Reason, Server, ServerConfig, Shutdown, Signal,
};
use common::*;
use tokio::time::Instant;

fn context(timeout_secs: u64) -> ProcessContext {
    let config = ServerConfig {
        no_client_timeout: Duration::from_secs(timeout_secs),
        ..ServerConfig::default()
    };
    ProcessContext::new(config, Shutdown::new())
}

#[tokio::test(start_paused = true)]
async fn stops_when_nobody_connects() {
    let radio = FakeRadio::default();
    let relay = Recorder::default();
    let mut server = Server::new(
        context(2),
        MemAcceptor::default(),
        radio.clone(),
        FakeTool::default(),
        relay.clone(),
        "3RHUB-96B9FEEC",
    );

    let started = Instant::now();
    assert_eq!(server.run().await.unwrap(), Exit::NoClient);
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert!(started.elapsed() < Duration::from_secs(3));

    assert_eq!(relay.signals(), vec![Signal::Pending, Signal::Stopped, Signal::SettingsNotify]);
    assert_eq!(radio.events(), vec!["start", "stop"]);
}

#[tokio::test(start_paused = true)]
async fn exits_after_success_limit() {
    let link = MemLink::default();
    let mut acceptor = MemAcceptor::default();
    acceptor.queue.push_back(connection(
        &link,
        vec![subscribe(), write_request(WIFI_VALUE, b"{\"ssid\":\"Home\"}\n")],
    ));
    let radio = FakeRadio::default();
    let tool = FakeTool::new(&[Association::Activated], &[Some(IP)]);
    let relay = Recorder::default();

    let mut server =
        Server::new(context(300), acceptor, radio.clone(), tool.clone(), relay.clone(), "3RHUB-1");
    assert_eq!(server.run().await.unwrap(), Exit::SuccessLimit);
    assert_eq!(server.context().successes(), 1);

    assert_eq!(
        relay.signals(),
        vec![
            Signal::Pending,
            Signal::Configuring,
            Signal::Success,
            Signal::Stopped,
            Signal::SettingsNotify
        ]
    );
    // advertising is off while the client is being served and is not resumed
    assert_eq!(radio.events(), vec!["start", "stop"]);
    assert_eq!(link.notifications().concat(), b"{\"ip\":\"192.168.1.42\"}\n".to_vec());
}

#[tokio::test(start_paused = true)]
async fn failed_attempt_goes_back_to_advertising() {
    let link = MemLink::default();
    let mut acceptor = MemAcceptor::default();
    acceptor.queue.push_back(connection(&link, vec![subscribe(), write_request(WIFI_VALUE, b"oops\n")]));
    let radio = FakeRadio::default();
    let relay = Recorder::default();

    let mut server =
        Server::new(context(5), acceptor, radio.clone(), FakeTool::default(), relay.clone(), "3RHUB-1");
    assert_eq!(server.run().await.unwrap(), Exit::NoClient);

    assert_eq!(link.notifications(), vec![b"{\"err\":\"bad fmt\"}".to_vec()]);
    assert_eq!(radio.events(), vec!["start", "stop", "start", "stop"]);
    assert_eq!(relay.signals(), vec![Signal::Pending, Signal::Stopped, Signal::SettingsNotify]);
}

#[tokio::test(start_paused = true)]
async fn signal_interrupts_advertising() {
    let ctx = context(300);
    let shutdown = ctx.shutdown.clone();
    let radio = FakeRadio::default();
    let relay = Recorder::default();
    let mut server =
        Server::new(ctx, MemAcceptor::default(), radio.clone(), FakeTool::default(), relay.clone(), "3RHUB-1");

    let stop = async {
        tokio::time::sleep(Duration::from_secs(10)).await;
        shutdown.request(Reason::Terminate);
    };
    let (exit, ()) = tokio::join!(server.run(), stop);

    assert_eq!(exit.unwrap(), Exit::Terminated);
    assert_eq!(radio.events(), vec!["start", "stop"]);
    assert_eq!(relay.signals(), vec![Signal::Pending, Signal::Stopped, Signal::SettingsNotify]);
}

#[tokio::test(start_paused = true)]
async fn failed_stop_does_not_block_readvertising() {
    let link = MemLink::default();
    let mut acceptor = MemAcceptor::default();
    acceptor.queue.push_back(connection(&link, vec![subscribe(), write_request(WIFI_VALUE, b"oops\n")]));
    let radio = FakeRadio::failing_stops(1);
    let relay = Recorder::default();

    let mut server =
        Server::new(context(5), acceptor, radio.clone(), FakeTool::default(), relay.clone(), "3RHUB-1");
    assert_eq!(server.run().await.unwrap(), Exit::NoClient);

    assert_eq!(radio.events(), vec!["start", "stop failed", "start", "stop"]);
    assert_eq!(relay.signals(), vec![Signal::Pending, Signal::Stopped, Signal::SettingsNotify]);
}

#[tokio::test(start_paused = true)]
async fn accept_failure_is_fatal_and_reported() {
    let radio = FakeRadio::default();
    let relay = Recorder::default();
    let mut server =
        Server::new(context(300), FailingAcceptor, radio.clone(), FakeTool::default(), relay.clone(), "3RHUB-1");

    assert!(server.run().await.is_err());
    assert_eq!(radio.events(), vec!["start", "stop"]);
    assert_eq!(relay.signals(), vec![Signal::Pending, Signal::Stopped, Signal::SettingsNotify]);
}

#[tokio::test(start_paused = true)]
async fn signal_interrupts_a_connected_session() {
    let link = MemLink::default();
    let (client, conn) = open_connection(&link, vec![subscribe()]);
    let mut acceptor = MemAcceptor::default();
    acceptor.queue.push_back(conn);
    let ctx = context(300);
    let shutdown = ctx.shutdown.clone();
    let radio = FakeRadio::default();
    let relay = Recorder::default();
    let mut server =
        Server::new(ctx, acceptor, radio.clone(), FakeTool::default(), relay.clone(), "3RHUB-1");

    let stop = async {
        tokio::time::sleep(Duration::from_secs(10)).await;
        shutdown.request(Reason::Terminate);
    };
    let (exit, ()) = tokio::join!(server.run(), stop);
    drop(client);

    assert_eq!(exit.unwrap(), Exit::Terminated);
    // the CCCD write was answered, so the session was live when the signal came
    assert_eq!(link.sent(), vec![vec![att::OP_WRITE_RSP]]);
    assert_eq!(radio.events(), vec!["start", "stop"]);
    assert_eq!(relay.signals(), vec![Signal::Pending, Signal::Stopped, Signal::SettingsNotify]);
}
