//! Both proxies over real sockets, with stand-ins for the login and game servers.
use ::std::net::SocketAddr;
use ::std::sync::Arc;
use ::std::time::Duration;

use ::mitm::{listen_and_serve, GameProxy, Listener, LoginProxy, MemoryCache, ServeError, TicketCache};
use ::proto::Address;
use ::tokio::io::{AsyncReadExt, AsyncWriteExt};
use ::tokio::net::{TcpListener, TcpStream};
use ::tokio::task::JoinHandle;
use ::tokio::time::timeout;
use ::tokio_util::sync::CancellationToken;

const BOUND: Duration = Duration::from_secs(5);

/// Read one NUL-terminated message, `None` once the peer is gone.
async fn read_msg(stream: &mut TcpStream) -> Option<Vec<u8>> {
    let mut msg = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        match stream.read(&mut byte).await {
            Ok(0) | Err(_) => return None,
            Ok(_) if byte[0] == 0 => return Some(msg),
            Ok(_) => msg.push(byte[0]),
        }
    }
}

fn cache() -> Arc<MemoryCache> {
    Arc::new(MemoryCache::new(Duration::from_secs(60)))
}

async fn start_game_proxy(
    cache: Arc<MemoryCache>,
    cancel: &CancellationToken,
) -> (SocketAddr, JoinHandle<Result<(), ServeError>>) {
    let listener = Listener::bind("127.0.0.1:0", GameProxy::new(cache)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    (addr, ::tokio::spawn(listener.serve(cancel.clone())))
}

async fn start_login_proxy(
    server: SocketAddr,
    public: SocketAddr,
    cache: Arc<MemoryCache>,
    cancel: &CancellationToken,
) -> (SocketAddr, JoinHandle<Result<(), ServeError>>) {
    let public = Address::new(public.ip().to_string(), public.port());
    let proxy = LoginProxy::new(server.to_string(), public, cache);
    let listener = Listener::bind("127.0.0.1:0", proxy).await.unwrap();
    let addr = listener.local_addr().unwrap();
    (addr, ::tokio::spawn(listener.serve(cancel.clone())))
}

/// A game server that greets, expects `ticket`, and answers once.
async fn fake_game_server(ticket: &'static str) -> (SocketAddr, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = ::tokio::spawn(async move {
        let (mut conn, _) = listener.accept().await.unwrap();
        conn.write_all(b"HG\0").await.unwrap();
        let msg = read_msg(&mut conn).await.unwrap();
        assert_eq!(msg, format!("AT{}\n", ticket).into_bytes());
        conn.write_all(b"ATK0\0").await.unwrap();
        // hold the session open until the client leaves
        let mut rest = Vec::new();
        let _ = conn.read_to_end(&mut rest).await;
    });
    (addr, task)
}

#[tokio::test]
async fn login_then_game() {
    let cancel = CancellationToken::new();
    let cache = cache();
    let (game_server, game_server_task) = fake_game_server("f3e1a9c2").await;

    let login_server = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let login_server_addr = login_server.local_addr().unwrap();
    ::tokio::spawn(async move {
        let (mut conn, _) = login_server.accept().await.unwrap();
        conn.write_all(b"HCkbzlfmiuqhpsejvbgzrkdcyxwhytkwm\0").await.unwrap();
        assert_eq!(read_msg(&mut conn).await.unwrap(), b"1.29.1\n");
        let redirect = format!("AYK{};f3e1a9c2\0", game_server);
        conn.write_all(redirect.as_bytes()).await.unwrap();
        let mut rest = Vec::new();
        let _ = conn.read_to_end(&mut rest).await;
    });

    let (game_proxy, game_task) = start_game_proxy(cache.clone(), &cancel).await;
    let (login_proxy, login_task) = start_login_proxy(login_server_addr, game_proxy, cache.clone(), &cancel).await;

    // login phase
    let mut client = TcpStream::connect(login_proxy).await.unwrap();
    let hello = timeout(BOUND, read_msg(&mut client)).await.unwrap().unwrap();
    assert_eq!(hello, b"HCkbzlfmiuqhpsejvbgzrkdcyxwhytkwm");
    client.write_all(b"1.29.1\n\0").await.unwrap();
    let redirect = timeout(BOUND, read_msg(&mut client)).await.unwrap().unwrap();
    assert_eq!(redirect, format!("AYK{};f3e1a9c2", game_proxy).into_bytes());
    assert_eq!(cache.len(), 1);
    drop(client);

    // game phase
    let mut client = TcpStream::connect(game_proxy).await.unwrap();
    assert_eq!(timeout(BOUND, read_msg(&mut client)).await.unwrap().unwrap(), b"HG");
    client.write_all(b"ATf3e1a9c2\n\0").await.unwrap();
    assert_eq!(timeout(BOUND, read_msg(&mut client)).await.unwrap().unwrap(), b"ATK0");
    // the ticket was used up
    assert!(cache.is_empty());
    drop(client);
    timeout(BOUND, game_server_task).await.unwrap().unwrap();

    cancel.cancel();
    timeout(BOUND, login_task).await.unwrap().unwrap().unwrap();
    timeout(BOUND, game_task).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn unknown_ticket_is_disconnected_without_dialing() {
    let cancel = CancellationToken::new();
    let cache = cache();
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    cache.put("someone-else".into(), upstream.local_addr().unwrap().to_string());
    let (game_proxy, game_task) = start_game_proxy(cache.clone(), &cancel).await;

    let mut client = TcpStream::connect(game_proxy).await.unwrap();
    assert_eq!(timeout(BOUND, read_msg(&mut client)).await.unwrap().unwrap(), b"HG");
    client.write_all(b"ATnever-issued\n\0").await.unwrap();
    assert_eq!(timeout(BOUND, read_msg(&mut client)).await.unwrap(), None);
    assert!(timeout(Duration::from_millis(200), upstream.accept()).await.is_err());
    // someone else's ticket is still there
    assert_eq!(cache.len(), 1);

    cancel.cancel();
    timeout(BOUND, game_task).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn dial_failure_stays_in_its_session() {
    let cancel = CancellationToken::new();
    let cache = cache();
    let dead = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let (live, live_task) = fake_game_server("live").await;
    cache.put("dead".into(), dead.to_string());
    cache.put("live".into(), live.to_string());
    let (game_proxy, game_task) = start_game_proxy(cache.clone(), &cancel).await;

    let mut first = TcpStream::connect(game_proxy).await.unwrap();
    assert_eq!(timeout(BOUND, read_msg(&mut first)).await.unwrap().unwrap(), b"HG");
    first.write_all(b"ATdead\n\0").await.unwrap();
    assert_eq!(timeout(BOUND, read_msg(&mut first)).await.unwrap(), None);

    let mut second = TcpStream::connect(game_proxy).await.unwrap();
    assert_eq!(timeout(BOUND, read_msg(&mut second)).await.unwrap().unwrap(), b"HG");
    second.write_all(b"ATlive\n\0").await.unwrap();
    assert_eq!(timeout(BOUND, read_msg(&mut second)).await.unwrap().unwrap(), b"ATK0");
    drop(second);
    timeout(BOUND, live_task).await.unwrap().unwrap();

    cancel.cancel();
    timeout(BOUND, game_task).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_closes_sessions_and_frees_the_port() {
    let cancel = CancellationToken::new();
    let login_server = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let login_server_addr = login_server.local_addr().unwrap();
    let (login_proxy, login_task) =
        start_login_proxy(login_server_addr, "127.0.0.1:5556".parse().unwrap(), cache(), &cancel).await;

    let mut client = TcpStream::connect(login_proxy).await.unwrap();
    // the session is up once the proxy has dialed the server
    let (mut server_side, _) = timeout(BOUND, login_server.accept()).await.unwrap().unwrap();

    cancel.cancel();
    timeout(BOUND, login_task).await.unwrap().unwrap().unwrap();

    assert_eq!(timeout(BOUND, read_msg(&mut client)).await.unwrap(), None);
    let mut buf = [0u8; 1];
    assert_eq!(timeout(BOUND, server_side.read(&mut buf)).await.unwrap().unwrap_or(0), 0);
    TcpListener::bind(login_proxy).await.unwrap();
}

#[tokio::test]
async fn bind_failure_is_reported_before_serving() {
    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = taken.local_addr().unwrap().to_string();
    match Listener::bind(&addr, GameProxy::new(cache())).await {
        Err(ServeError::Bind { addr: failed, .. }) => assert_eq!(failed, addr),
        Err(e) => panic!("unexpected error: {}", e),
        Ok(_) => panic!("bound a port that was already taken"),
    }
}

#[tokio::test]
async fn login_server_tail_reaches_the_client() {
    let cancel = CancellationToken::new();
    let login_server = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let login_server_addr = login_server.local_addr().unwrap();
    ::tokio::spawn(async move {
        let (mut conn, _) = login_server.accept().await.unwrap();
        conn.write_all(b"HCabc\0tail-no-nul").await.unwrap();
    });
    let (login_proxy, login_task) =
        start_login_proxy(login_server_addr, "127.0.0.1:5556".parse().unwrap(), cache(), &cancel).await;

    let mut client = TcpStream::connect(login_proxy).await.unwrap();
    let mut received = Vec::new();
    timeout(BOUND, client.read_to_end(&mut received)).await.unwrap().unwrap();
    assert_eq!(received, b"HCabc\0tail-no-nul");

    cancel.cancel();
    timeout(BOUND, login_task).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn pipelined_identification_reaches_the_server_unchanged() {
    const IDENTIFICATION: &[u8] = b"Ak0\n\0ATtk\n\0GC1\n\0Ax\n\0";
    let cancel = CancellationToken::new();
    let cache = cache();
    let game_server = TcpListener::bind("127.0.0.1:0").await.unwrap();
    cache.put("tk".into(), game_server.local_addr().unwrap().to_string());
    let server_task = ::tokio::spawn(async move {
        let (mut conn, _) = game_server.accept().await.unwrap();
        // greeting and the first reply in one segment
        conn.write_all(b"HG\0BN\0").await.unwrap();
        let mut received = vec![0u8; IDENTIFICATION.len()];
        conn.read_exact(&mut received).await.unwrap();
        assert_eq!(received, IDENTIFICATION);
        let mut rest = Vec::new();
        let _ = conn.read_to_end(&mut rest).await;
    });
    let (game_proxy, game_task) = start_game_proxy(cache.clone(), &cancel).await;

    let mut client = TcpStream::connect(game_proxy).await.unwrap();
    assert_eq!(timeout(BOUND, read_msg(&mut client)).await.unwrap().unwrap(), b"HG");
    client.write_all(IDENTIFICATION).await.unwrap();
    assert_eq!(timeout(BOUND, read_msg(&mut client)).await.unwrap().unwrap(), b"BN");
    drop(client);
    timeout(BOUND, server_task).await.unwrap().unwrap();

    cancel.cancel();
    timeout(BOUND, game_task).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn unexpected_server_greeting_is_forwarded() {
    let cancel = CancellationToken::new();
    let cache = cache();
    let game_server = TcpListener::bind("127.0.0.1:0").await.unwrap();
    cache.put("tk".into(), game_server.local_addr().unwrap().to_string());
    let server_task = ::tokio::spawn(async move {
        let (mut conn, _) = game_server.accept().await.unwrap();
        conn.write_all(b"AlEb\0").await.unwrap();
        assert_eq!(read_msg(&mut conn).await.unwrap(), b"ATtk\n");
        let mut rest = Vec::new();
        let _ = conn.read_to_end(&mut rest).await;
    });
    let (game_proxy, game_task) = start_game_proxy(cache.clone(), &cancel).await;

    let mut client = TcpStream::connect(game_proxy).await.unwrap();
    assert_eq!(timeout(BOUND, read_msg(&mut client)).await.unwrap().unwrap(), b"HG");
    client.write_all(b"ATtk\n\0").await.unwrap();
    assert_eq!(timeout(BOUND, read_msg(&mut client)).await.unwrap().unwrap(), b"AlEb");
    drop(client);
    timeout(BOUND, server_task).await.unwrap().unwrap();

    cancel.cancel();
    timeout(BOUND, game_task).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn client_without_ticket_is_dropped() {
    let cancel = CancellationToken::new();
    let (game_proxy, game_task) = start_game_proxy(cache(), &cancel).await;

    let mut client = TcpStream::connect(game_proxy).await.unwrap();
    assert_eq!(timeout(BOUND, read_msg(&mut client)).await.unwrap().unwrap(), b"HG");
    for _ in 0..8 {
        client.write_all(b"Ak0\n\0").await.unwrap();
    }
    assert_eq!(timeout(BOUND, read_msg(&mut client)).await.unwrap(), None);

    cancel.cancel();
    timeout(BOUND, game_task).await.unwrap().unwrap().unwrap();
}

#[tokio::test]
async fn listen_and_serve_until_cancelled() {
    let addr = {
        let free = TcpListener::bind("127.0.0.1:0").await.unwrap();
        free.local_addr().unwrap()
    };
    let cancel = CancellationToken::new();
    let task = ::tokio::spawn(listen_and_serve_owned(addr.to_string(), cancel.clone()));

    let mut client = timeout(BOUND, async {
        loop {
            match TcpStream::connect(addr).await {
                Ok(client) => break client,
                Err(_) => ::tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(timeout(BOUND, read_msg(&mut client)).await.unwrap().unwrap(), b"HG");

    cancel.cancel();
    timeout(BOUND, task).await.unwrap().unwrap().unwrap();
    assert_eq!(timeout(BOUND, read_msg(&mut client)).await.unwrap(), None);

    // and a taken port is reported as such
    let holder = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let taken = holder.local_addr().unwrap().to_string();
    let err = listen_and_serve(&taken, GameProxy::new(cache()), CancellationToken::new()).await;
    assert!(matches!(err, Err(ServeError::Bind { .. })));
}

async fn listen_and_serve_owned(addr: String, cancel: CancellationToken) -> Result<(), ServeError> {
    listen_and_serve(&addr, GameProxy::new(cache()), cancel).await
}
