//! Command-line entry point: loads a YAML server config, builds a content
//! router from its route table, and drives accepted connections through
//! the [`loomio::main_loop::MainLoop`].

use std::cell::RefCell;
use std::fs;
use std::io::{ErrorKind, Read as _, Write as _};
use std::rc::Rc;
use std::sync::Arc;

use mio::Interest;
use mio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use loomio::buffer::Buffer;
use loomio::config::{Config, FromYaml, RouteConfig, ServerConfig, display_config, validate_configs};
use loomio::error::Result;
use loomio::http::content::{DispatchOutcome, ServedBody};
use loomio::http::{Action, Handler, HandlerId, HandlerKind, HttpContent, HttpRequest, HttpResponse};
use loomio::main_loop::MainLoop;
use loomio::stream::{IoSource, Stream};

/// Error page bytes resolved by the router's error handler for the most
/// recent dispatch that didn't return `Ok`; read back by `respond_to`
/// right after calling `respond`.
type ErrorBody = Rc<RefCell<Option<(u16, Vec<u8>)>>>;

struct TcpIo(TcpStream);

impl IoSource for TcpIo {
    fn read_into(&mut self, buf: &mut Buffer, max: usize) -> Result<usize> {
        let mut chunk = vec![0u8; max.min(64 * 1024)];
        match self.0.read(&mut chunk) {
            Ok(n) => {
                buf.append(&chunk[..n]);
                Ok(n)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn write_from(&mut self, buf: &mut Buffer, max: usize) -> Result<usize> {
        let chunk = buf.peek(max);
        if chunk.is_empty() {
            return Ok(0);
        }
        match self.0.write(&chunk) {
            Ok(n) => {
                buf.skip(n);
                Ok(n)
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn shutdown_write(&mut self) -> Result<bool> {
        let _ = self.0.shutdown(std::net::Shutdown::Write);
        Ok(true)
    }
}

/// Serves a route's static tree: `req.url`, stripped of the route's path
/// prefix, is joined onto `route.root` (falling back to `route.default_file`
/// for a bare directory request). Leaves `content_type` unset so
/// `HttpContent::respond` fills it in from the router's own MIME table
/// instead of duplicating that lookup here.
fn route_handler(route: &RouteConfig) -> Rc<Handler> {
    let root = route.root.clone();
    let default_file = route.default_file.clone();
    Handler::new(
        HandlerKind::Raw,
        move |req: &HttpRequest, _post: Option<&[u8]>, out: &mut Option<ServedBody>| {
            let mut rel = req.url.trim_start_matches('/').to_string();
            if rel.is_empty() {
                rel = default_file.clone();
            }
            let path = std::path::Path::new(&root).join(&rel);
            match fs::read(&path) {
                Ok(bytes) => {
                    *out = Some(ServedBody { status: 200, bytes: Rc::new(bytes), content_type: None });
                    DispatchOutcome::Ok
                }
                Err(_) => DispatchOutcome::Chain,
            }
        },
        None,
    )
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// Builds the router for one server block and wires its error handler to
/// resolve the server's configured error page (if any) for whatever status
/// the router decides on — so `respond_to` never hardcodes a 404 body.
fn build_router(server: &Arc<ServerConfig>) -> (HttpContent, ErrorBody) {
    let mut content = HttpContent::new();
    let error_body: ErrorBody = Rc::new(RefCell::new(None));
    let eb = error_body.clone();
    let srv = server.clone();
    content.set_error_handler(move |status, _req| {
        let body = srv
            .error_pages
            .get(&status)
            .and_then(|path| fs::read(path).ok())
            .unwrap_or_else(|| format!("<html><body>{status} {}</body></html>", status_text(status)).into_bytes());
        *eb.borrow_mut() = Some((status, body));
    });
    for route in &server.routes {
        let id = HandlerId {
            host: Some(server.server_name.as_str()),
            path_prefix: Some(route.path.as_str()),
            ..Default::default()
        };
        content.add_handler(&id, route_handler(route), Action::Append);
    }
    (content, error_body)
}

fn respond_to(server: &ServerConfig, router: &HttpContent, error_body: &ErrorBody, req: &HttpRequest) -> HttpResponse {
    *error_body.borrow_mut() = None;
    let (outcome, served) = router.respond(req, None, Some(server.server_name.as_str()), &req.url, None);
    match outcome {
        DispatchOutcome::Ok => {
            let served = served.expect("Ok outcome always carries a served body");
            let mime = served
                .content_type
                .map(|(type_, subtype)| format!("{type_}/{subtype}"))
                .unwrap_or_else(|| "application/octet-stream".to_string());
            let mut res = HttpResponse::new(served.status, status_text(served.status));
            res.set_body(served.bytes.to_vec(), &mime);
            res
        }
        DispatchOutcome::Chain | DispatchOutcome::Error => {
            let fallback_status = if outcome == DispatchOutcome::Error { 500 } else { 404 };
            let (status, body) = error_body.borrow_mut().take().unwrap_or_else(|| {
                (fallback_status, format!("<html><body>{fallback_status} {}</body></html>", status_text(fallback_status)).into_bytes())
            });
            let mut res = HttpResponse::new(status, status_text(status));
            res.set_body(body, "text/html");
            res
        }
    }
}

/// Closures run once the current dispatch pass finishes, so a callback
/// invoked *during* `MainLoop::run_once` (like a listener's accept hook)
/// can still register new sources without re-entering the loop it's
/// running inside of.
type PendingRegistrations = Rc<RefCell<Vec<Box<dyn FnOnce(&mut MainLoop)>>>>;

/// Wires one accepted connection's read hook to parse a request and write
/// a response; the connection closes itself after the first response.
/// Takes `&mut MainLoop` directly since the caller only invokes this from
/// a [`PendingRegistrations`] drain, never from inside dispatch.
fn handle_connection(
    main_loop: &mut MainLoop,
    stream: TcpStream,
    server: Arc<ServerConfig>,
    router: Rc<HttpContent>,
    error_body: ErrorBody,
) -> Result<()> {
    let fd = {
        use std::os::fd::AsRawFd;
        stream.as_raw_fd()
    };
    let io: Rc<RefCell<dyn IoSource>> = Rc::new(RefCell::new(TcpIo(stream)));
    // Backpressure is not exercised by this single-request-per-connection
    // demo: the socket's poll interest never needs to change mid-flight.
    let conn = Stream::new(io, |_| {}, |_| {});

    let request = Rc::new(RefCell::new(HttpRequest::new()));
    let conn_for_trap = conn.clone();
    let req_for_trap = request.clone();

    conn.borrow_mut().read_hook.trap(
        move |_, ctx| {
            let mut tmp = Buffer::new();
            let n = conn_for_trap.borrow_mut().read_buffer(&mut tmp).unwrap_or(0);
            if n == 0 {
                return true;
            }
            let bytes = tmp.read(n);
            let mut req = req_for_trap.borrow_mut();
            match req.feed(&bytes) {
                Ok(true) => {
                    let res = respond_to(&server, &router, &error_body, &req);
                    let _ = conn_for_trap.borrow_mut().write(&res.to_bytes());
                    ctx.shutdown();
                }
                Ok(false) => {}
                Err(_) => {
                    let mut res = HttpResponse::new(400, "Bad Request");
                    res.set_body(b"bad request".to_vec(), "text/plain");
                    let _ = conn_for_trap.borrow_mut().write(&res.to_bytes());
                    ctx.shutdown();
                }
            }
            true
        },
        None,
        (),
        None,
    )?;

    main_loop.add_io(
        fd,
        Interest::READABLE,
        move |_| {
            conn.borrow_mut().read_hook.notify();
            true
        },
        None,
    )?;
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.yaml".to_string());
    let content = fs::read_to_string(&config_path)
        .map_err(|e| loomio::error::Error::Config(loomio::config::ConfigError {
            message: format!("cannot read {config_path}: {e}"),
            loc: None,
            context: vec![],
        }))?;
    let config = Config::from_str(&content)?;
    let servers = validate_configs(config.servers);
    display_config(&servers);

    let main_loop = Rc::new(RefCell::new(MainLoop::new()?));
    let pending: PendingRegistrations = Rc::new(RefCell::new(Vec::new()));

    for server in servers {
        let server = Arc::new(server);
        let (router, error_body) = build_router(&server);
        let router = Rc::new(router);
        for &port in &server.ports {
            let addr = format!("{}:{}", server.host, port).parse().map_err(|e| {
                loomio::error::Error::InvalidArgument(format!("bad listen address: {e}"))
            })?;
            let mut listener = TcpListener::bind(addr)?;
            info!(%addr, server = %server.server_name, "listening");

            let fd = {
                use std::os::fd::AsRawFd;
                listener.as_raw_fd()
            };
            let srv = server.clone();
            let rtr = router.clone();
            let eb = error_body.clone();
            let pending_for_accept = pending.clone();
            main_loop.borrow_mut().add_io(
                fd,
                Interest::READABLE,
                move |_| {
                    loop {
                        match listener.accept() {
                            Ok((stream, peer)) => {
                                info!(%peer, "accepted connection");
                                let srv = srv.clone();
                                let rtr = rtr.clone();
                                let eb = eb.clone();
                                pending_for_accept.borrow_mut().push(Box::new(move |ml: &mut MainLoop| {
                                    if let Err(e) = handle_connection(ml, stream, srv, rtr, eb) {
                                        warn!(error = %e, "failed to set up connection");
                                    }
                                }));
                            }
                            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                            Err(e) => {
                                warn!(error = %e, "accept failed");
                                break;
                            }
                        }
                    }
                    true
                },
                None,
            )?;
        }
    }

    loop {
        let keep_running = main_loop.borrow_mut().run_once(true);
        let queued: Vec<_> = pending.borrow_mut().drain(..).collect();
        for register in queued {
            register(&mut main_loop.borrow_mut());
        }
        if !keep_running {
            break;
        }
    }
    Ok(())
}
