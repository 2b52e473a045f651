//! End to end transfer scenarios against a scripted mock server.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use ftpkit::{
    CancellationToken, FtpClientConfig, FtpDataChannelMode, FtpFileRetrieveError,
    FtpTransferOptions, FtpTransferOutcome, Password, Username,
};

mod test_helpers;
use test_helpers::*;

async fn serve_retr_over_epsv(ctl: &mut MockControl, expect_type: bool, file: &str, payload: &[u8]) {
    if expect_type {
        ctl.expect("TYPE I").await;
        ctl.send("200 Type set to I").await;
    }
    let (listener, port) = data_listener().await;
    ctl.expect("EPSV").await;
    ctl.send(&format!("229 Entering Extended Passive Mode (|||{port}|)"))
        .await;
    ctl.expect(&format!("RETR {file}")).await;
    ctl.send("150 Opening BINARY mode data connection").await;
    let (mut data, _) = listener.accept().await.unwrap();
    data.write_all(payload).await.unwrap();
    data.shutdown().await.unwrap();
    drop(data);
    ctl.send("226 Transfer complete").await;
}

fn opts_with_size(size: u64) -> FtpTransferOptions {
    FtpTransferOptions {
        known_size: Some(size),
        ..Default::default()
    }
}

#[tokio::test]
async fn epsv_download_happy_path() {
    let payload = vec![7u8; 1000];
    let expected = payload.clone();
    let (addr, handle) = spawn_control_server(move |mut ctl| async move {
        greet(&mut ctl, &[]).await;
        serve_retr_over_epsv(&mut ctl, true, "foo", &payload).await;
        ctl.expect("QUIT").await;
        ctl.send("221 Goodbye").await;
    })
    .await;

    let mut client = connect_client(addr, FtpClientConfig::default()).await;
    let mut sink = VecSink::default();
    let outcome = client
        .retrieve_file("foo", &mut sink, &opts_with_size(1000), None, &())
        .await
        .unwrap();
    assert!(outcome.is_success());
    assert_eq!(outcome.bytes(), 1000);
    assert_eq!(sink.0, expected);

    let reply = client.quit_and_close().await.unwrap();
    assert_eq!(reply.code(), 221);
    handle.await.unwrap();
}

#[tokio::test]
async fn epsv_to_pasv_fallback_with_private_ip() {
    let (addr, handle) = spawn_control_server(move |mut ctl| async move {
        greet(&mut ctl, &[]).await;
        ctl.expect("TYPE I").await;
        ctl.send("200 Type set to I").await;

        // first transfer: EPSV is rejected, the latch flips to PASV
        let (listener, port) = data_listener().await;
        ctl.expect("EPSV").await;
        ctl.send("500 Command not understood").await;
        ctl.expect("PASV").await;
        // the advertised 10/8 address is bogus, the client must come
        // back to the control channel host instead
        ctl.send(&format!(
            "227 Entering Passive Mode (10,0,0,5,{},{})",
            port >> 8,
            port & 0xff
        ))
        .await;
        ctl.expect("RETR foo").await;
        ctl.send("150 Opening BINARY mode data connection").await;
        let (mut data, _) = listener.accept().await.unwrap();
        data.write_all(b"abc").await.unwrap();
        data.shutdown().await.unwrap();
        drop(data);
        ctl.send("226 Transfer complete").await;

        // second transfer: the latch skips EPSV entirely
        let (listener, port) = data_listener().await;
        ctl.expect("PASV").await;
        ctl.send(&format!(
            "227 Entering Passive Mode (10,0,0,5,{},{})",
            port >> 8,
            port & 0xff
        ))
        .await;
        ctl.expect("RETR bar").await;
        ctl.send("150 Opening BINARY mode data connection").await;
        let (mut data, _) = listener.accept().await.unwrap();
        data.write_all(b"xyz").await.unwrap();
        data.shutdown().await.unwrap();
        drop(data);
        ctl.send("226 Transfer complete").await;
    })
    .await;

    let mut client = connect_client(addr, FtpClientConfig::default()).await;
    let mut sink = VecSink::default();
    let outcome = client
        .retrieve_file("foo", &mut sink, &opts_with_size(3), None, &())
        .await
        .unwrap();
    assert!(outcome.is_success());
    assert_eq!(sink.0, b"abc");

    let mut sink = VecSink::default();
    let outcome = client
        .retrieve_file("bar", &mut sink, &opts_with_size(3), None, &())
        .await
        .unwrap();
    assert!(outcome.is_success());
    assert_eq!(sink.0, b"xyz");
    handle.await.unwrap();
}

#[tokio::test]
async fn resume_after_mid_stream_disconnect() {
    let (addr, handle) = spawn_control_server(move |mut ctl| async move {
        greet(&mut ctl, &["REST STREAM"]).await;
        ctl.expect("TYPE I").await;
        ctl.send("200 Type set to I").await;

        let (listener, port) = data_listener().await;
        ctl.expect("EPSV").await;
        ctl.send(&format!("229 Entering Extended Passive Mode (|||{port}|)"))
            .await;
        ctl.expect("RETR foo").await;
        ctl.send("150 Opening BINARY mode data connection").await;
        let (mut data, _) = listener.accept().await.unwrap();
        data.write_all(&[b'A'; 400]).await.unwrap();
        data.shutdown().await.unwrap();
        drop(data);
        // the transfer broke from the server's point of view
        ctl.send("426 Transfer aborted").await;

        // the client reopens a channel and restarts at 400
        let (listener, port) = data_listener().await;
        ctl.expect("EPSV").await;
        ctl.send(&format!("229 Entering Extended Passive Mode (|||{port}|)"))
            .await;
        ctl.expect("REST 400").await;
        ctl.send("350 Restarting at 400").await;
        ctl.expect("RETR foo").await;
        ctl.send("150 Opening BINARY mode data connection").await;
        let (mut data, _) = listener.accept().await.unwrap();
        data.write_all(&[b'B'; 600]).await.unwrap();
        data.shutdown().await.unwrap();
        drop(data);
        ctl.send("226 Transfer complete").await;
    })
    .await;

    let mut client = connect_client(addr, FtpClientConfig::default()).await;
    let mut sink = VecSink::default();
    let outcome = client
        .retrieve_file("foo", &mut sink, &opts_with_size(1000), None, &())
        .await
        .unwrap();
    assert!(outcome.is_success());
    assert_eq!(outcome.bytes(), 1000);
    assert_eq!(&sink.0[..400], &[b'A'; 400][..]);
    assert_eq!(&sink.0[400..], &[b'B'; 600][..]);
    handle.await.unwrap();
}

#[tokio::test]
async fn noop_keep_alive_reconciliation() {
    let noops_seen = Arc::new(AtomicUsize::new(0));
    let noops_in_script = Arc::clone(&noops_seen);
    let (addr, handle) = spawn_control_server(move |mut ctl| async move {
        greet(&mut ctl, &[]).await;
        ctl.expect("TYPE I").await;
        ctl.send("200 Type set to I").await;

        let (listener, port) = data_listener().await;
        ctl.expect("EPSV").await;
        ctl.send(&format!("229 Entering Extended Passive Mode (|||{port}|)"))
            .await;
        ctl.expect("RETR slow").await;
        ctl.send("150 Opening BINARY mode data connection").await;
        let (mut data, _) = listener.accept().await.unwrap();
        for _chunk in 0..4 {
            data.write_all(&[0u8; 100]).await.unwrap();
            data.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(120)).await;
        }
        data.shutdown().await.unwrap();
        drop(data);

        // the keep-alives queued up while the data stream was busy
        let count = ctl.answer_noops(Duration::from_millis(300)).await;
        assert!(count >= 1, "expected queued NOOP keep-alives");
        noops_in_script.store(count, Ordering::Relaxed);
        ctl.send("226 Transfer complete").await;
    })
    .await;

    let mut config = FtpClientConfig::default();
    config.transfer.noop_interval = Duration::from_millis(50);
    let mut client = connect_client(addr, config).await;
    let mut sink = VecSink::default();
    let outcome = client
        .retrieve_file("slow", &mut sink, &opts_with_size(400), None, &())
        .await
        .unwrap();
    assert!(outcome.is_success());
    assert_eq!(sink.0.len(), 400);
    handle.await.unwrap();
    assert!(noops_seen.load(Ordering::Relaxed) >= 1);
}

#[tokio::test]
async fn nlst_empty_directory_quirk() {
    let (addr, handle) = spawn_control_server(move |mut ctl| async move {
        greet(&mut ctl, &[]).await;
        ctl.expect("TYPE A").await;
        ctl.send("200 Type set to A").await;
        let (listener, port) = data_listener().await;
        ctl.expect("EPSV").await;
        ctl.send(&format!("229 Entering Extended Passive Mode (|||{port}|)"))
            .await;
        ctl.expect("NLST empty").await;
        ctl.send("550 No files found.").await;
        drop(listener);
    })
    .await;

    let mut client = connect_client(addr, FtpClientConfig::default()).await;
    let names = client.list_directory_names(Some("empty"), &()).await.unwrap();
    assert!(names.is_empty());
    handle.await.unwrap();
}

#[tokio::test]
async fn cancellation_aborts_without_resume() {
    let (addr, handle) = spawn_control_server(move |mut ctl| async move {
        greet(&mut ctl, &["REST STREAM"]).await;
        ctl.expect("TYPE I").await;
        ctl.send("200 Type set to I").await;
        let (listener, port) = data_listener().await;
        ctl.expect("EPSV").await;
        ctl.send(&format!("229 Entering Extended Passive Mode (|||{port}|)"))
            .await;
        ctl.expect("RETR foo").await;
        ctl.send("150 Opening BINARY mode data connection").await;
        let (mut data, _) = listener.accept().await.unwrap();
        data.write_all(&[1u8; 200]).await.unwrap();
        data.flush().await.unwrap();
        // stall: the client has to cancel, not resume
        tokio::time::sleep(Duration::from_millis(800)).await;
    })
    .await;

    let mut config = FtpClientConfig::default();
    config.transfer.end_wait_timeout = Duration::from_millis(200);
    let mut client = connect_client(addr, config).await;

    let cancel = CancellationToken::new();
    let opts = FtpTransferOptions {
        known_size: Some(100000),
        cancel: cancel.clone(),
        ..Default::default()
    };
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        cancel.cancel();
    });

    let started = Instant::now();
    let mut sink = VecSink::default();
    let r = client
        .retrieve_file("foo", &mut sink, &opts, None, &())
        .await;
    assert!(matches!(r, Err(FtpFileRetrieveError::Canceled)));
    assert!(started.elapsed() < Duration::from_secs(3));
    handle.await.unwrap();
}

async fn run_zero_byte_download(download_zero_byte_files: bool) -> std::path::PathBuf {
    let (addr, handle) = spawn_control_server(move |mut ctl| async move {
        greet(&mut ctl, &[]).await;
        serve_retr_over_epsv(&mut ctl, true, "empty.bin", b"").await;
    })
    .await;

    let target = std::env::temp_dir().join(format!(
        "ftpkit-test-{}-zero-{download_zero_byte_files}.bin",
        std::process::id()
    ));
    let _ = std::fs::remove_file(&target);

    let mut config = FtpClientConfig::default();
    config.transfer.download_zero_byte_files = download_zero_byte_files;
    let mut client = connect_client(addr, config).await;
    let outcome = client
        .retrieve_file_to_path("empty.bin", &target, &opts_with_size(0), None, &())
        .await
        .unwrap();
    assert!(outcome.is_success());
    assert_eq!(outcome.bytes(), 0);
    handle.await.unwrap();
    target
}

#[tokio::test]
async fn zero_byte_download_creates_no_file_by_default() {
    let target = run_zero_byte_download(false).await;
    assert!(!target.exists());
}

#[tokio::test]
async fn zero_byte_download_creates_file_when_enabled() {
    let target = run_zero_byte_download(true).await;
    assert!(target.exists());
    assert_eq!(std::fs::metadata(&target).unwrap().len(), 0);
    let _ = std::fs::remove_file(&target);
}

#[tokio::test]
async fn blocked_passive_port_retries_on_next_endpoint() {
    let (blocked_listener, blocked_port) = data_listener().await;
    let (open_listener, open_port) = data_listener().await;

    let (addr, handle) = spawn_control_server(move |mut ctl| async move {
        let _hold = blocked_listener;
        greet(&mut ctl, &[]).await;
        ctl.expect("TYPE I").await;
        ctl.send("200 Type set to I").await;
        ctl.expect("EPSV").await;
        ctl.send(&format!(
            "229 Entering Extended Passive Mode (|||{blocked_port}|)"
        ))
        .await;
        // the client never connects to a blocked port, it asks again
        ctl.expect("EPSV").await;
        ctl.send(&format!("229 Entering Extended Passive Mode (|||{open_port}|)"))
            .await;
        ctl.expect("RETR foo").await;
        ctl.send("150 Opening BINARY mode data connection").await;
        let (mut data, _) = open_listener.accept().await.unwrap();
        data.write_all(b"data").await.unwrap();
        data.shutdown().await.unwrap();
        drop(data);
        ctl.send("226 Transfer complete").await;
    })
    .await;

    let mut config = FtpClientConfig::default();
    config.data.blocked_ports.insert(blocked_port);
    let mut client = connect_client(addr, config).await;
    let mut sink = VecSink::default();
    let outcome = client
        .retrieve_file("foo", &mut sink, &opts_with_size(4), None, &())
        .await
        .unwrap();
    assert!(outcome.is_success());
    assert_eq!(sink.0, b"data");
    handle.await.unwrap();
}

#[tokio::test]
async fn quit_when_disconnected_synthesizes_reply() {
    let (addr, handle) = spawn_control_server(move |mut ctl| async move {
        greet(&mut ctl, &[]).await;
        ctl.expect("QUIT").await;
        ctl.send("221 Goodbye").await;
    })
    .await;

    let mut client = connect_client(addr, FtpClientConfig::default()).await;
    let reply = client.quit_and_close().await.unwrap();
    assert_eq!(reply.code(), 221);
    handle.await.unwrap();

    // no network IO happens here, the reply is synthetic
    let reply = client.quit_and_close().await.unwrap();
    assert_eq!(reply.code(), 200);
    assert_eq!(reply.message(), "Connection already closed.");
}

#[tokio::test]
async fn store_upload_happy_path() {
    let uploaded = Arc::new(tokio::sync::Mutex::new(Vec::<u8>::new()));
    let uploaded_in_script = Arc::clone(&uploaded);
    let (addr, handle) = spawn_control_server(move |mut ctl| async move {
        greet(&mut ctl, &[]).await;
        ctl.expect("TYPE I").await;
        ctl.send("200 Type set to I").await;
        let (listener, port) = data_listener().await;
        ctl.expect("EPSV").await;
        ctl.send(&format!("229 Entering Extended Passive Mode (|||{port}|)"))
            .await;
        ctl.expect("STOR up.bin").await;
        ctl.send("150 Ok to send data").await;
        let (mut data, _) = listener.accept().await.unwrap();
        let mut body = Vec::new();
        data.read_to_end(&mut body).await.unwrap();
        drop(data);
        uploaded_in_script.lock().await.extend_from_slice(&body);
        ctl.send("226 Transfer complete").await;
    })
    .await;

    let payload = vec![42u8; 5000];
    let mut client = connect_client(addr, FtpClientConfig::default()).await;
    let mut source = payload.as_slice();
    let outcome = client
        .store_file(
            "up.bin",
            &mut source,
            &FtpTransferOptions::default(),
            None,
            &(),
        )
        .await
        .unwrap();
    assert!(outcome.is_success());
    assert_eq!(outcome.bytes(), 5000);
    handle.await.unwrap();
    assert_eq!(*uploaded.lock().await, payload);
}

#[tokio::test]
async fn active_eprt_download() {
    let (addr, handle) = spawn_control_server(move |mut ctl| async move {
        greet(&mut ctl, &[]).await;
        ctl.expect("TYPE I").await;
        ctl.send("200 Type set to I").await;
        let line = ctl.expect_prefix("EPRT |1|127.0.0.1|").await;
        let port: u16 = line
            .trim_end_matches('|')
            .rsplit('|')
            .next()
            .unwrap()
            .parse()
            .unwrap();
        ctl.send("200 EPRT command successful").await;
        ctl.expect("RETR foo").await;
        ctl.send("150 Opening BINARY mode data connection").await;
        let mut data = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        data.write_all(b"active data").await.unwrap();
        data.shutdown().await.unwrap();
        drop(data);
        ctl.send("226 Transfer complete").await;
    })
    .await;

    let mut config = FtpClientConfig::default();
    config.data.mode = FtpDataChannelMode::AutoActive;
    let mut client = connect_client(addr, config).await;
    let mut sink = VecSink::default();
    let outcome = client
        .retrieve_file("foo", &mut sink, &opts_with_size(11), None, &())
        .await
        .unwrap();
    assert!(outcome.is_success());
    assert_eq!(sink.0, b"active data");
    handle.await.unwrap();
}

#[tokio::test]
async fn eprt_to_port_fallback() {
    let (addr, handle) = spawn_control_server(move |mut ctl| async move {
        greet(&mut ctl, &[]).await;
        ctl.expect("TYPE I").await;
        ctl.send("200 Type set to I").await;
        ctl.expect_prefix("EPRT ").await;
        ctl.send("500 Command not understood").await;
        let line = ctl.expect_prefix("PORT 127,0,0,1,").await;
        let mut parts = line["PORT ".len()..].split(',');
        let p1: u16 = parts.nth(4).unwrap().parse().unwrap();
        let p2: u16 = parts.next().unwrap().parse().unwrap();
        let port = p1 * 256 + p2;
        ctl.send("200 PORT command successful").await;
        ctl.expect("RETR foo").await;
        ctl.send("150 Opening BINARY mode data connection").await;
        let mut data = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        data.write_all(b"port data").await.unwrap();
        data.shutdown().await.unwrap();
        drop(data);
        ctl.send("226 Transfer complete").await;
    })
    .await;

    let mut config = FtpClientConfig::default();
    config.data.mode = FtpDataChannelMode::AutoActive;
    let mut client = connect_client(addr, config).await;
    let mut sink = VecSink::default();
    let outcome = client
        .retrieve_file("foo", &mut sink, &opts_with_size(9), None, &())
        .await
        .unwrap();
    assert!(outcome.is_success());
    assert_eq!(sink.0, b"port data");
    handle.await.unwrap();
}

#[tokio::test]
async fn pasv_with_pre_transfer_hint() {
    let (addr, handle) = spawn_control_server(move |mut ctl| async move {
        greet(&mut ctl, &["PRET"]).await;
        ctl.expect("TYPE I").await;
        ctl.send("200 Type set to I").await;
        let (listener, port) = data_listener().await;
        ctl.expect("PRET RETR foo").await;
        ctl.send("200 Ok, ready for PASV").await;
        ctl.expect("PASV").await;
        ctl.send(&format!(
            "227 Entering Passive Mode (127,0,0,1,{},{})",
            port >> 8,
            port & 0xff
        ))
        .await;
        ctl.expect("RETR foo").await;
        ctl.send("150 Opening BINARY mode data connection").await;
        let (mut data, _) = listener.accept().await.unwrap();
        data.write_all(b"pret data").await.unwrap();
        data.shutdown().await.unwrap();
        drop(data);
        ctl.send("226 Transfer complete").await;
    })
    .await;

    let mut config = FtpClientConfig::default();
    config.data.mode = FtpDataChannelMode::Pasv;
    let mut client = connect_client(addr, config).await;
    let mut sink = VecSink::default();
    let outcome = client
        .retrieve_file("foo", &mut sink, &opts_with_size(9), None, &())
        .await
        .unwrap();
    assert!(outcome.is_success());
    assert_eq!(sink.0, b"pret data");
    handle.await.unwrap();
}

#[tokio::test]
async fn login_session() {
    let (addr, handle) = spawn_control_server(move |mut ctl| async move {
        greet(&mut ctl, &[]).await;
        ctl.expect("USER alice").await;
        ctl.send("331 Password required for alice").await;
        ctl.expect("PASS sesame").await;
        ctl.send("230 User alice logged in").await;
    })
    .await;

    let mut client = connect_client(addr, FtpClientConfig::default()).await;
    let user = Username::from_original("alice").unwrap();
    let pass = Password::from_original("sesame").unwrap();
    client
        .new_user_session(Some(&user), Some(&pass))
        .await
        .unwrap();
    handle.await.unwrap();
}

#[tokio::test]
async fn retrieve_missing_file_is_an_outcome() {
    let (addr, handle) = spawn_control_server(move |mut ctl| async move {
        greet(&mut ctl, &[]).await;
        ctl.expect("TYPE I").await;
        ctl.send("200 Type set to I").await;
        let (listener, port) = data_listener().await;
        ctl.expect("EPSV").await;
        ctl.send(&format!("229 Entering Extended Passive Mode (|||{port}|)"))
            .await;
        ctl.expect("RETR gone").await;
        ctl.send("550 gone: No such file or directory").await;
        drop(listener);
    })
    .await;

    let mut client = connect_client(addr, FtpClientConfig::default()).await;
    let mut sink = VecSink::default();
    let outcome = client
        .retrieve_file("gone", &mut sink, &opts_with_size(10), None, &())
        .await
        .unwrap();
    assert!(matches!(outcome, FtpTransferOutcome::FileUnavailable));
    assert!(sink.0.is_empty());
    handle.await.unwrap();
}
