//! End-to-end proxy session tests.
//!
//! A real listener, a fake game server and a raw client, all on loopback
//! TCP. These tests verify the negotiation answers, MCCP2 termination and
//! the session outcome reported when one side goes away.

use std::time::Duration;

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress};
use hex_literal::hex;
use muditm::config::Config;
use muditm::protocol::environ::is_pair;
use muditm::protocol::CompressionPolicy;
use muditm::proxy::{ProxyServer, SessionOutcome, SessionReport, CONNECT_FAILED};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    proxy_addr: std::net::SocketAddr,
    game: TcpListener,
    reports: mpsc::UnboundedReceiver<SessionReport>,
}

async fn start(configure: impl FnOnce(&mut Config)) -> Harness {
    let game = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let game_port = game.local_addr().unwrap().port();

    let mut config = Config::default();
    config.proxy.bind = "127.0.0.1".to_string();
    config.proxy.listen = 0;
    config.proxy.tick_ms = 20;
    config.proxy.newenv_ipaddress = vec!["IPADDRESS".to_string()];
    config.game.host = "127.0.0.1".to_string();
    config.game.service = game_port.to_string();
    configure(&mut config);

    let server = ProxyServer::new(config).unwrap();
    let listener = server.bind().await.unwrap();
    let proxy_addr = listener.local_addr().unwrap();

    let (tx, reports) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let _ = server.serve_reporting(listener, tx).await;
    });

    Harness {
        proxy_addr,
        game,
        reports,
    }
}

async fn read_exactly(stream: &mut TcpStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    timeout(WAIT, stream.read_exact(&mut buf))
        .await
        .expect("read timed out")
        .expect("read failed");
    buf
}

async fn expect_eof(stream: &mut TcpStream) {
    let mut buf = [0u8; 64];
    let n = timeout(WAIT, stream.read(&mut buf))
        .await
        .expect("eof timed out")
        .unwrap_or(0);
    assert_eq!(n, 0, "unexpected bytes {:?}", &buf[..n]);
}

async fn next_report(reports: &mut mpsc::UnboundedReceiver<SessionReport>) -> SessionReport {
    timeout(WAIT, reports.recv())
        .await
        .expect("report timed out")
        .expect("reporter closed")
}

#[tokio::test]
async fn test_environ_request_answered_for_declining_client() {
    let mut h = start(|_| {}).await;
    let mut client = TcpStream::connect(h.proxy_addr).await.unwrap();
    let (mut game, _) = timeout(WAIT, h.game.accept()).await.unwrap().unwrap();

    assert_eq!(read_exactly(&mut client, 3).await, hex!("ff fb 56"));

    client.write_all(&hex!("ff fc 27")).await.unwrap();
    assert_eq!(read_exactly(&mut game, 3).await, hex!("ff fb 27"));

    // Request split across two segments.
    game.write_all(&hex!("ff fa 27")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    game.write_all(&hex!("01 ff f0")).await.unwrap();

    let mut expected = is_pair("PROXY_NAME", &muditm::proxy_name());
    expected.extend(is_pair("IPADDRESS", "127.0.0.1"));
    assert_eq!(read_exactly(&mut game, expected.len()).await, expected);

    game.write_all(b"Welcome!\r\n").await.unwrap();
    assert_eq!(read_exactly(&mut client, 10).await, b"Welcome!\r\n");

    drop(game);
    expect_eof(&mut client).await;

    let report = next_report(&mut h.reports).await;
    assert_eq!(
        report.outcome,
        SessionOutcome::PeerClosed {
            endpoint: "Game".to_string()
        }
    );
    let client_stats = report.client.unwrap();
    assert_eq!(client_stats.raw.bytes_out, 13);
}

#[tokio::test]
async fn test_client_close_ends_session() {
    let mut h = start(|_| {}).await;
    let mut client = TcpStream::connect(h.proxy_addr).await.unwrap();
    let (mut game, _) = timeout(WAIT, h.game.accept()).await.unwrap().unwrap();
    assert_eq!(read_exactly(&mut client, 3).await, hex!("ff fb 56"));

    client.write_all(b"quit\r\n").await.unwrap();
    assert_eq!(read_exactly(&mut game, 6).await, b"quit\r\n");
    drop(client);

    expect_eof(&mut game).await;
    let report = next_report(&mut h.reports).await;
    assert_eq!(
        report.outcome,
        SessionOutcome::PeerClosed {
            endpoint: "Client".to_string()
        }
    );
    assert_eq!(report.game.unwrap().raw.bytes_out, 6);
}

#[tokio::test]
async fn test_unreachable_game_is_reported_to_client() {
    let mut h = start(|config| {
        config.game.service = "1".to_string();
    })
    .await;
    let mut client = TcpStream::connect(h.proxy_addr).await.unwrap();

    assert_eq!(
        read_exactly(&mut client, CONNECT_FAILED.len()).await,
        CONNECT_FAILED
    );
    expect_eof(&mut client).await;

    let report = next_report(&mut h.reports).await;
    assert!(matches!(report.outcome, SessionOutcome::SetupFailed { .. }));
    assert!(report.game.is_none());
}

#[tokio::test]
async fn test_proxy_header_precedes_game_traffic() {
    let h = start(|config| {
        config.proxy.proxy_header = true;
        config.client.compression = CompressionPolicy::Disable;
    })
    .await;
    let client = TcpStream::connect(h.proxy_addr).await.unwrap();
    let local = client.local_addr().unwrap();
    let (mut game, _) = timeout(WAIT, h.game.accept()).await.unwrap().unwrap();

    let expected = format!(
        "PROXY TCP4 127.0.0.1 127.0.0.1 {} {}\r\n",
        local.port(),
        h.proxy_addr.port()
    );
    assert_eq!(
        read_exactly(&mut game, expected.len()).await,
        expected.as_bytes()
    );
}

#[tokio::test]
async fn test_mccp2_terminated_on_both_sides() {
    let h = start(|_| {}).await;
    let mut client = TcpStream::connect(h.proxy_addr).await.unwrap();
    let (mut game, _) = timeout(WAIT, h.game.accept()).await.unwrap().unwrap();
    assert_eq!(read_exactly(&mut client, 3).await, hex!("ff fb 56"));

    // Client side: accept the offer.
    client.write_all(&hex!("ff fd 56")).await.unwrap();
    assert_eq!(read_exactly(&mut client, 5).await, hex!("ff fa 56 ff f0"));

    // Game side: offer and start compressing.
    game.write_all(&hex!("ff fb 56")).await.unwrap();
    assert_eq!(read_exactly(&mut game, 3).await, hex!("ff fd 56"));

    let text = b"The dragon breathes fire at you!\r\n".repeat(20);
    let mut zipped = vec![0u8; 4096];
    let mut c = Compress::new(Compression::default(), true);
    c.compress(&text, &mut zipped, FlushCompress::Sync).unwrap();
    zipped.truncate(c.total_out() as usize);

    let mut chunk = hex!("ff fa 56 ff f0").to_vec();
    chunk.extend_from_slice(&zipped);
    game.write_all(&chunk).await.unwrap();

    // What reaches the client is the proxy's own zlib stream.
    let mut d = Decompress::new(true);
    let mut plain = Vec::new();
    let mut wire = [0u8; 4096];
    let mut out = vec![0u8; 8192];
    while plain.len() < text.len() {
        let n = timeout(WAIT, client.read(&mut wire))
            .await
            .expect("compressed read timed out")
            .unwrap();
        assert!(n > 0, "proxy closed early");
        let mut input = &wire[..n];
        while !input.is_empty() {
            let before_in = d.total_in();
            let before_out = d.total_out();
            d.decompress(input, &mut out, FlushDecompress::Sync).unwrap();
            let used = (d.total_in() - before_in) as usize;
            let made = (d.total_out() - before_out) as usize;
            plain.extend_from_slice(&out[..made]);
            input = &input[used..];
            if used == 0 && made == 0 {
                break;
            }
        }
    }
    assert_eq!(plain, text);
}
