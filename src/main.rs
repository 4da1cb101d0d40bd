use std::io::Write;
use std::os::unix::net::UnixStream;
use std::thread;
use std::time::Duration;

use tracing::{error, info, Level};

use aioclient::config::Config;
use aioclient::http::tls::TlsConfig;
use aioclient::http::{Client, ClientHandler, Connection, DnsConfig, Error, ResponseHeader};
use aioclient::reactor::Reactor;
use aioclient::reader::{spawn_reader, ReadHandler};
use aioclient::shutdown::ShutdownCoordinator;

/// Prints everything the client sees
struct Printer {
    websocket: bool,
    gzip_body: bool,
}

impl ClientHandler for Printer {
    fn on_connect(&mut self, conn: &mut Connection) -> bool {
        match conn.addr() {
            Some(addr) => info!("connected to {} ({})", conn.target(), addr),
            None => info!("connected to {}", conn.target()),
        }
        let queued = if self.websocket {
            conn.ws_handshake()
        } else {
            conn.send_request(None)
        };
        match queued {
            Ok(()) => true,
            Err(e) => {
                error!("cannot send: {}", e);
                false
            }
        }
    }

    fn on_disconnect(&mut self) {
        info!("disconnected");
    }

    fn on_connect_timeout(&mut self) {
        error!("connect timeout");
    }

    fn on_connect_failed(&mut self, err: &Error) {
        error!("connect failed: {}", err);
    }

    fn on_read_timeout(&mut self, _conn: &mut Connection) -> bool {
        error!("read timeout");
        false
    }

    fn on_header(&mut self, _conn: &mut Connection, header: &ResponseHeader) -> bool {
        self.gzip_body = header.is_transfer_gzip();
        print!("{}\r\n", header.build_response());
        true
    }

    fn on_body_chunk(&mut self, conn: &mut Connection, data: &[u8]) -> bool {
        if self.gzip_body && !conn.is_unzip_body() {
            println!(">>> compressed chunk, {} bytes", data.len());
        } else {
            print!("{}", String::from_utf8_lossy(data));
        }
        true
    }

    fn on_finish(&mut self, conn: &mut Connection, success: bool) -> bool {
        println!();
        info!("response finished, success={}", success);
        success && conn.keep_alive()
    }

    fn on_handshake_ok(&mut self, conn: &mut Connection) -> bool {
        info!("websocket handshake ok");
        if let Err(e) = conn.ws_send_text("hello world!") {
            error!("cannot send frame: {}", e);
            return false;
        }
        conn.ws_read_wait(None).is_ok()
    }

    fn on_handshake_failed(&mut self, status: u16) {
        error!("websocket handshake failed, status={}", status);
    }

    fn on_frame_text(&mut self, _conn: &mut Connection) -> bool {
        info!("text frame");
        true
    }

    fn on_frame_binary(&mut self, _conn: &mut Connection) -> bool {
        info!("binary frame");
        true
    }

    fn on_frame_data(&mut self, _conn: &mut Connection, data: &[u8]) -> bool {
        print!("{}", String::from_utf8_lossy(data));
        true
    }

    fn on_frame_finish(&mut self, _conn: &mut Connection) -> bool {
        println!();
        true
    }

    fn on_frame_closed(&mut self, code: Option<u16>) {
        info!("websocket closed by server, code={:?}", code);
    }

    fn on_destroy(&mut self) {
        info!("client done");
    }
}

/// Echoes what the producer thread writes
struct Echo;

impl ReadHandler for Echo {
    fn on_read(&mut self, data: &[u8]) -> bool {
        print!("producer: {}", String::from_utf8_lossy(data));
        true
    }

    fn on_close(&mut self) {
        info!("producer finished");
    }
}

fn main() -> anyhow::Result<()> {
    let cfg = Config::load();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_max_level(if cfg.debug { Level::DEBUG } else { Level::INFO })
        .init();

    let mut reactor = Reactor::new()?;
    let handle = reactor.handle();

    // The reader and the client; the producer thread talks through the
    // socket pair and is covered by the reader.
    let coordinator = ShutdownCoordinator::new(handle.stopper(), 0);
    coordinator.attach(2);

    let (ours, mut theirs) = UnixStream::pair()?;
    let lines = cfg.producer_lines;
    let producer = thread::spawn(move || {
        for _ in 0..lines {
            if theirs.write_all(b"hello world!\r\n").is_err() {
                break;
            }
            thread::sleep(Duration::from_secs(1));
        }
    });
    spawn_reader(&handle, ours, Echo, Some(coordinator.clone()))?;

    let dns = DnsConfig {
        name_server: cfg.name_server,
        timeout: cfg.dns_timeout,
    };
    let mut builder = Client::builder(&handle)
        .dns(dns)
        .unzip_body(cfg.unzip)
        .coordinator(coordinator.clone());
    if cfg.tls {
        let tls = TlsConfig::client()?
            .servername(cfg.host.clone())
            .verify_peer(cfg.tls_verify)?
            .build()?;
        builder = builder.tls(tls);
    }
    builder
        .request_header()
        .set_url(cfg.url.clone())
        .set_host(cfg.host.clone())
        .set_content_length(0)
        .accept_gzip(cfg.accept_gzip)
        .set_keep_alive(cfg.keep_alive);

    let printer = Printer {
        websocket: cfg.websocket,
        gzip_body: false,
    };
    // A failed open has already released the client's share.
    let _client = match builder.open(printer, &cfg.addr, cfg.connect_timeout, cfg.rw_timeout) {
        Ok(client) => Some(client),
        Err(e) => {
            error!("open {} failed: {}", cfg.addr, e);
            None
        }
    };

    reactor.run()?;
    if producer.join().is_err() {
        error!("producer thread panicked");
    }
    info!("all actors done");
    Ok(())
}
