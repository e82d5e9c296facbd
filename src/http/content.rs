//! HTTP Content Router (C6): multi-axis dispatch by user-agent, virtual
//! host, path (exact/prefix/none), and path suffix, plus the MIME lookup
//! table. Grounded on `gskhttpcontent.c`'s `GskHttpContent` structure
//! (`PathVHostTable`/`PathTable`/`SuffixList`/handler ring) and spec §4.6.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use crate::http::prefix_tree::PrefixTree;
use crate::http::request::{find_subsequence, parse_part_headers, HttpRequest, Method};

pub type MimePair = (String, String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Ok,
    Chain,
    Error,
}

/// The bytes a `Raw` or `Cgi` handler produced, handed back to the caller
/// of [`HttpContent::respond`]. `content_type` is filled in from the MIME
/// table by request path if the handler left it unset.
#[derive(Debug, Clone)]
pub struct ServedBody {
    pub status: u16,
    pub bytes: Rc<Vec<u8>>,
    pub content_type: Option<MimePair>,
}

impl ServedBody {
    fn ok(bytes: Vec<u8>) -> Self {
        ServedBody { status: 200, bytes: Rc::new(bytes), content_type: None }
    }
}

/// One form field or multipart section decoded by the CGI adapter (§4.6.3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgiPiece {
    pub id: Option<String>,
    pub bytes: Vec<u8>,
}

#[derive(Default)]
pub struct HandlerId<'a> {
    pub user_agent_prefix: Option<&'a str>,
    pub host: Option<&'a str>,
    pub path: Option<&'a str>,
    pub path_prefix: Option<&'a str>,
    pub path_suffix: Option<&'a str>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Append,
    Prepend,
    Replace,
}

#[derive(Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Raw,
    Cgi,
}

type RawFn = dyn FnMut(&HttpRequest, Option<&[u8]>, &mut Option<ServedBody>) -> DispatchOutcome;
type CgiFn = dyn FnMut(&HttpRequest, &[CgiPiece], &mut Option<ServedBody>) -> DispatchOutcome;

enum HandlerBody {
    Raw(RefCell<Box<RawFn>>),
    Cgi(RefCell<Box<CgiFn>>),
}

pub struct Handler {
    pub kind: HandlerKind,
    body: HandlerBody,
    destroy: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl Handler {
    pub fn new(
        kind: HandlerKind,
        func: impl FnMut(&HttpRequest, Option<&[u8]>, &mut Option<ServedBody>) -> DispatchOutcome + 'static,
        destroy: Option<Box<dyn FnOnce()>>,
    ) -> Rc<Handler> {
        debug_assert!(matches!(kind, HandlerKind::Raw), "Handler::new is for Raw handlers; use new_cgi for Cgi");
        Rc::new(Handler {
            kind,
            body: HandlerBody::Raw(RefCell::new(Box::new(func))),
            destroy: RefCell::new(destroy),
        })
    }

    pub fn new_cgi(
        func: impl FnMut(&HttpRequest, &[CgiPiece], &mut Option<ServedBody>) -> DispatchOutcome + 'static,
        destroy: Option<Box<dyn FnOnce()>>,
    ) -> Rc<Handler> {
        Rc::new(Handler {
            kind: HandlerKind::Cgi,
            body: HandlerBody::Cgi(RefCell::new(Box::new(func))),
            destroy: RefCell::new(destroy),
        })
    }

    /// Raw handlers see the post body as-is; Cgi handlers never see raw
    /// bytes at all — they only run once the request has been decoded
    /// into pieces, and otherwise chain (per §4.6.3's "otherwise CHAIN").
    fn invoke(&self, req: &HttpRequest, post: Option<&[u8]>, out: &mut Option<ServedBody>) -> DispatchOutcome {
        match &self.body {
            HandlerBody::Raw(f) => (f.borrow_mut())(req, post, out),
            HandlerBody::Cgi(f) => match decode_cgi_pieces(req, post) {
                Some(pieces) => (f.borrow_mut())(req, &pieces, out),
                None => DispatchOutcome::Chain,
            },
        }
    }
}

impl Drop for Handler {
    fn drop(&mut self) {
        if let Some(d) = self.destroy.borrow_mut().take() {
            d();
        }
    }
}

fn percent_decode_form(s: &str) -> Vec<u8> {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len() => match std::str::from_utf8(&bytes[i + 1..i + 3]).ok().and_then(|h| u8::from_str_radix(h, 16).ok()) {
                Some(byte) => {
                    out.push(byte);
                    i += 3;
                }
                None => {
                    out.push(bytes[i]);
                    i += 1;
                }
            },
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    out
}

/// Decodes `key=value&key=value` per RFC 1866 §8.2.1; one piece per pair,
/// the decoded key becoming the piece's id.
fn decode_urlencoded_pairs(s: &str) -> Vec<CgiPiece> {
    s.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next().unwrap_or("");
            let value = parts.next().unwrap_or("");
            CgiPiece {
                id: Some(String::from_utf8_lossy(&percent_decode_form(key)).into_owned()),
                bytes: percent_decode_form(value),
            }
        })
        .collect()
}

/// Streams through a `multipart/form-data` body one `--boundary` section at
/// a time, parsing each section's own header block via
/// [`parse_part_headers`]. Returns `None` on any structural mismatch
/// (missing terminator, unparseable header block) rather than panicking.
fn decode_multipart(body: &[u8], boundary: &str) -> Option<Vec<CgiPiece>> {
    let delim = format!("--{boundary}").into_bytes();
    let mut pieces = Vec::new();
    let mut pos = find_subsequence(body, &delim, 0)?;
    loop {
        let after_delim = pos + delim.len();
        if body.get(after_delim..after_delim + 2) == Some(b"--") {
            break;
        }
        let header_start = after_delim + 2; // boundary line's trailing CRLF
        let header_end = find_subsequence(body, b"\r\n\r\n", header_start)?;
        let headers = std::str::from_utf8(&body[header_start..header_end]).ok()?;
        let info = parse_part_headers(headers);
        let data_start = header_end + 4;
        let next = find_subsequence(body, &delim, data_start)?;
        let data_end = next.saturating_sub(2).max(data_start); // strip the section's trailing CRLF
        pieces.push(CgiPiece {
            id: if info.name.is_empty() { None } else { Some(info.name) },
            bytes: body[data_start..data_end].to_vec(),
        });
        pos = next;
    }
    Some(pieces)
}

/// Implements §4.6.3's handler-kind selection: GET query string, POST
/// urlencoded, POST multipart, or (returning `None`, which the caller
/// turns into `CHAIN`) none of the above.
fn decode_cgi_pieces(req: &HttpRequest, post: Option<&[u8]>) -> Option<Vec<CgiPiece>> {
    match req.method {
        Method::GET => {
            let (_, query) = req.url.split_once('?')?;
            Some(decode_urlencoded_pairs(query))
        }
        Method::POST => {
            let content_type = req.headers.get("content-type")?;
            let body = post.unwrap_or(req.body.as_slice());
            if content_type.starts_with("application/x-www-form-urlencoded") {
                let text = std::str::from_utf8(body).ok()?;
                Some(decode_urlencoded_pairs(text))
            } else if content_type.starts_with("multipart/form-data") {
                let boundary = content_type
                    .split(';')
                    .find_map(|part| part.trim().strip_prefix("boundary="))?
                    .trim_matches('"');
                decode_multipart(body, boundary)
            } else {
                None
            }
        }
        Method::DELETE => None,
    }
}

pub type Ring = VecDeque<Rc<Handler>>;

fn ring_add(ring: &mut Ring, handler: Rc<Handler>, action: Action) {
    match action {
        Action::Append => {
            if ring.is_empty() {
                ring.push_back(handler);
            } else {
                ring.insert(1, handler);
            }
        }
        Action::Prepend => ring.push_front(handler),
        Action::Replace => {
            ring.clear();
            ring.push_back(handler);
        }
    }
}

/// Invokes handlers starting at the ring's head until one doesn't `Chain`.
fn dispatch_ring(ring: &Ring, req: &HttpRequest, post: Option<&[u8]>, out: &mut Option<ServedBody>) -> DispatchOutcome {
    for handler in ring {
        match handler.invoke(req, post, out) {
            DispatchOutcome::Chain => continue,
            other => return other,
        }
    }
    DispatchOutcome::Chain
}

fn reversed(s: &str) -> Vec<u8> {
    s.bytes().rev().collect()
}

#[derive(Default)]
struct SuffixList {
    suffix_to_handler: PrefixTree<Ring>,
    no_suffix_handler: Ring,
}

impl SuffixList {
    fn add(&mut self, suffix: Option<&str>, handler: Rc<Handler>, action: Action) {
        match suffix {
            Some(s) => {
                let ring = self.suffix_to_handler.get_or_insert_default(&reversed(s));
                ring_add(ring, handler, action);
            }
            None => ring_add(&mut self.no_suffix_handler, handler, action),
        }
    }

    fn dispatch(&self, path: &str, req: &HttpRequest, post: Option<&[u8]>, out: &mut Option<ServedBody>) -> DispatchOutcome {
        for ring in self.suffix_to_handler.lookup_all(&reversed(path)) {
            match dispatch_ring(ring, req, post, out) {
                DispatchOutcome::Chain => continue,
                other => return other,
            }
        }
        dispatch_ring(&self.no_suffix_handler, req, post, out)
    }
}

#[derive(Default)]
struct PathTable {
    exact: HashMap<String, Ring>,
    prefix_to_suffix_list: PrefixTree<SuffixList>,
    no_prefix_list: SuffixList,
}

impl PathTable {
    fn add(&mut self, id: &HandlerId, handler: Rc<Handler>, action: Action) {
        if let Some(path) = id.path {
            ring_add(self.exact.entry(path.to_string()).or_default(), handler, action);
        } else if let Some(prefix) = id.path_prefix {
            let list = self.prefix_to_suffix_list.get_or_insert_default(prefix.as_bytes());
            list.add(id.path_suffix, handler, action);
        } else {
            self.no_prefix_list.add(id.path_suffix, handler, action);
        }
    }

    fn dispatch(&self, path: &str, req: &HttpRequest, post: Option<&[u8]>, out: &mut Option<ServedBody>) -> DispatchOutcome {
        if let Some(ring) = self.exact.get(path) {
            match dispatch_ring(ring, req, post, out) {
                DispatchOutcome::Chain => {}
                other => return other,
            }
        }
        for list in self.prefix_to_suffix_list.lookup_all(path.as_bytes()) {
            match list.dispatch(path, req, post, out) {
                DispatchOutcome::Chain => continue,
                other => return other,
            }
        }
        self.no_prefix_list.dispatch(path, req, post, out)
    }
}

#[derive(Default)]
struct PathVHostTable {
    vhost_to_path_table: HashMap<String, PathTable>,
    no_vhost_path_table: PathTable,
}

impl PathVHostTable {
    fn add(&mut self, id: &HandlerId, handler: Rc<Handler>, action: Action) {
        match id.host {
            Some(h) => self
                .vhost_to_path_table
                .entry(h.to_string())
                .or_default()
                .add(id, handler, action),
            None => self.no_vhost_path_table.add(id, handler, action),
        }
    }

    fn dispatch(&self, host: Option<&str>, path: &str, req: &HttpRequest, post: Option<&[u8]>, out: &mut Option<ServedBody>) -> DispatchOutcome {
        if let Some(h) = host {
            if let Some(table) = self.vhost_to_path_table.get(h) {
                match table.dispatch(path, req, post, out) {
                    DispatchOutcome::Chain => {}
                    other => return other,
                }
            }
        }
        self.no_vhost_path_table.dispatch(path, req, post, out)
    }
}

#[derive(Default)]
struct MimeTables {
    nested: PrefixTree<PrefixTree<MimePair>>,
    suffix_only: PrefixTree<MimePair>,
    prefix_only: PrefixTree<MimePair>,
    default: Option<MimePair>,
}

impl MimeTables {
    fn set(&mut self, prefix: Option<&str>, suffix: Option<&str>, kind: MimePair) {
        match (prefix, suffix) {
            (Some(p), Some(s)) => {
                let inner = self.nested.get_or_insert_default(&reversed(s));
                inner.insert(p.as_bytes(), kind);
            }
            (None, Some(s)) => {
                self.suffix_only.insert(&reversed(s), kind);
            }
            (Some(p), None) => {
                self.prefix_only.insert(p.as_bytes(), kind);
            }
            (None, None) => self.default = Some(kind),
        }
    }

    fn lookup(&self, path: &str) -> Option<&MimePair> {
        if let Some(inner) = self.nested.lookup(&reversed(path)) {
            if let Some(pair) = inner.lookup(path.as_bytes()) {
                return Some(pair);
            }
        }
        self.suffix_only
            .lookup(&reversed(path))
            .or_else(|| self.prefix_only.lookup(path.as_bytes()))
            .or(self.default.as_ref())
    }
}

pub struct HttpContent {
    user_agent_to_path_vhost_table: PrefixTree<PathVHostTable>,
    no_ua_path_vhost_table: PathVHostTable,
    mime: MimeTables,
    error_handler: RefCell<Option<Box<dyn FnMut(u16, &HttpRequest)>>>,
}

impl Default for HttpContent {
    fn default() -> Self {
        Self {
            user_agent_to_path_vhost_table: PrefixTree::new(),
            no_ua_path_vhost_table: PathVHostTable::default(),
            mime: MimeTables::default(),
            error_handler: RefCell::new(None),
        }
    }
}

impl HttpContent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_error_handler(&self, f: impl FnMut(u16, &HttpRequest) + 'static) {
        *self.error_handler.borrow_mut() = Some(Box::new(f));
    }

    fn invoke_error(&self, status: u16, req: &HttpRequest) {
        if let Some(f) = self.error_handler.borrow_mut().as_mut() {
            f(status, req);
        }
    }

    pub fn add_handler(&mut self, id: &HandlerId, handler: Rc<Handler>, action: Action) {
        match id.user_agent_prefix {
            Some(ua) => self
                .user_agent_to_path_vhost_table
                .get_or_insert_default(ua.as_bytes())
                .add(id, handler, action),
            None => self.no_ua_path_vhost_table.add(id, handler, action),
        }
    }

    /// §4.6.4: serves `bytes` verbatim with status 200. `content_type`, if
    /// given, is used as-is; otherwise [`Self::respond`] fills it in from
    /// the MIME table by request path. `destroy` runs when the handler is
    /// dropped (e.g. replaced or the router itself is dropped).
    pub fn add_data(&mut self, id: &HandlerId, bytes: Rc<Vec<u8>>, content_type: Option<MimePair>, destroy: Option<Box<dyn FnOnce()>>) {
        let data = bytes;
        let handler = Handler::new(
            HandlerKind::Raw,
            move |_req, _post, out| {
                *out = Some(ServedBody { status: 200, bytes: data.clone(), content_type: content_type.clone() });
                DispatchOutcome::Ok
            },
            destroy,
        );
        self.add_handler(id, handler, Action::Append);
    }

    /// §4.6.4 convenience handler. EXACT mode (`id.path` set): `fs_path` is
    /// read verbatim. DIRECTORY mode (`id.path_prefix` set): the served
    /// path is `fs_path + (request.path - id.path_prefix)`; a relative
    /// portion containing `"../"`, `"/.."`, or a trailing `".."` is
    /// rejected. Non-existent files chain to the router's own 404, per
    /// §9's open question (the source returns 400; this implementation
    /// prefers the recommended 404 and documents the divergence here).
    pub fn add_file(&mut self, id: &HandlerId, fs_path: &str, content_type: Option<MimePair>) {
        let fs_path = fs_path.to_string();
        let prefix_len = id.path_prefix.map(str::len);
        let handler = Handler::new(
            HandlerKind::Raw,
            move |req, _post, out| {
                let full_path = match prefix_len {
                    Some(len) => {
                        let rel = &req.url[len.min(req.url.len())..];
                        if rel.contains("../") || rel.ends_with("/..") || rel == ".." {
                            return DispatchOutcome::Chain;
                        }
                        format!("{fs_path}{rel}")
                    }
                    None => fs_path.clone(),
                };
                match std::fs::read(&full_path) {
                    Ok(bytes) => {
                        *out = Some(ServedBody { content_type: content_type.clone(), ..ServedBody::ok(bytes) });
                        DispatchOutcome::Ok
                    }
                    Err(_) => DispatchOutcome::Chain,
                }
            },
            None,
        );
        self.add_handler(id, handler, Action::Append);
    }

    /// Convenience wrapper over [`Self::add_file`] for the common EXACT-mode
    /// case: register by a bare path string instead of building a full
    /// [`HandlerId`].
    pub fn add_file_by_id(&mut self, path: &str, fs_path: &str, content_type: Option<MimePair>) {
        let id = HandlerId { path: Some(path), ..Default::default() };
        self.add_file(&id, fs_path, content_type);
    }

    pub fn set_mime_type(&mut self, prefix: Option<&str>, suffix: Option<&str>, type_: &str, subtype: &str) {
        self.mime.set(prefix, suffix, (type_.to_string(), subtype.to_string()));
    }

    pub fn set_default_mime_type(&mut self, type_: &str, subtype: &str) {
        self.mime.set(None, None, (type_.to_string(), subtype.to_string()));
    }

    pub fn get_mime_type(&self, path: &str) -> Option<&MimePair> {
        self.mime.lookup(path)
    }

    fn fill_content_type(&self, path: &str, served: &mut Option<ServedBody>) {
        if let Some(body) = served {
            if body.content_type.is_none() {
                body.content_type = self.mime.lookup(path).cloned();
            }
        }
    }

    /// Builds the ordered candidate `PathVHostTable` list: every prefix of
    /// `user_agent` that matches, shorter-to-longer (per `lookup_all`),
    /// then the default table. Per §4.6.2 step 5/6, an `Error` outcome
    /// invokes the error handler with 500 and a fully-chained dispatch
    /// invokes it with 404, at whichever level the outcome was decided.
    pub fn respond(&self, request: &HttpRequest, user_agent: Option<&str>, host: Option<&str>, path: &str, post_data: Option<&[u8]>) -> (DispatchOutcome, Option<ServedBody>) {
        let mut served = None;
        if let Some(ua) = user_agent {
            for table in self.user_agent_to_path_vhost_table.lookup_all(ua.as_bytes()) {
                match table.dispatch(host, path, request, post_data, &mut served) {
                    DispatchOutcome::Chain => continue,
                    DispatchOutcome::Error => {
                        self.invoke_error(500, request);
                        return (DispatchOutcome::Error, served);
                    }
                    DispatchOutcome::Ok => {
                        self.fill_content_type(path, &mut served);
                        return (DispatchOutcome::Ok, served);
                    }
                }
            }
        }
        let outcome = self.no_ua_path_vhost_table.dispatch(host, path, request, post_data, &mut served);
        match outcome {
            DispatchOutcome::Chain => self.invoke_error(404, request),
            DispatchOutcome::Error => self.invoke_error(500, request),
            DispatchOutcome::Ok => self.fill_content_type(path, &mut served),
        }
        (outcome, served)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn req() -> HttpRequest {
        HttpRequest::new()
    }

    #[test]
    fn exact_path_beats_prefix() {
        let mut c = HttpContent::new();
        let exact_hit = Rc::new(Cell::new(false));
        let prefix_hit = Rc::new(Cell::new(false));
        let e = exact_hit.clone();
        let p = prefix_hit.clone();
        c.add_handler(
            &HandlerId { path: Some("/a"), ..Default::default() },
            Handler::new(HandlerKind::Raw, move |_, _, _| { e.set(true); DispatchOutcome::Ok }, None),
            Action::Append,
        );
        c.add_handler(
            &HandlerId { path_prefix: Some("/"), ..Default::default() },
            Handler::new(HandlerKind::Raw, move |_, _, _| { p.set(true); DispatchOutcome::Ok }, None),
            Action::Append,
        );
        let r = req();
        let (outcome, _) = c.respond(&r, None, None, "/a", None);
        assert_eq!(outcome, DispatchOutcome::Ok);
        assert!(exact_hit.get());
        assert!(!prefix_hit.get());
    }

    #[test]
    fn append_runs_after_current_head_prepend_runs_before() {
        let mut c = HttpContent::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        let o1 = order.clone();
        let o2 = order.clone();
        let o3 = order.clone();
        let id = HandlerId { path: Some("/x"), ..Default::default() };
        c.add_handler(&id, Handler::new(HandlerKind::Raw, move |_, _, _| { o1.borrow_mut().push(1); DispatchOutcome::Chain }, None), Action::Append);
        c.add_handler(&id, Handler::new(HandlerKind::Raw, move |_, _, _| { o2.borrow_mut().push(2); DispatchOutcome::Chain }, None), Action::Prepend);
        c.add_handler(&id, Handler::new(HandlerKind::Raw, move |_, _, _| { o3.borrow_mut().push(3); DispatchOutcome::Chain }, None), Action::Append);
        let r = req();
        c.respond(&r, None, None, "/x", None);
        assert_eq!(*order.borrow(), vec![2, 1, 3]);
    }

    #[test]
    fn replace_drops_previous_ring_and_runs_destroy() {
        let mut c = HttpContent::new();
        let destroyed = Rc::new(Cell::new(false));
        let d = destroyed.clone();
        let id = HandlerId { path: Some("/r"), ..Default::default() };
        c.add_handler(&id, Handler::new(HandlerKind::Raw, |_, _, _| DispatchOutcome::Ok, Some(Box::new(move || d.set(true)))), Action::Append);
        c.add_handler(&id, Handler::new(HandlerKind::Raw, |_, _, _| DispatchOutcome::Chain, None), Action::Replace);
        assert!(destroyed.get());
    }

    #[test]
    fn unmatched_request_falls_through_to_404() {
        let c = HttpContent::new();
        let statuses = Rc::new(RefCell::new(Vec::new()));
        let s = statuses.clone();
        c.set_error_handler(move |code, _| s.borrow_mut().push(code));
        let r = req();
        c.respond(&r, None, None, "/nope", None);
        assert_eq!(*statuses.borrow(), vec![404]);
    }

    #[test]
    fn user_agent_matched_error_outcome_invokes_500_not_404() {
        let mut c = HttpContent::new();
        let statuses = Rc::new(RefCell::new(Vec::new()));
        let s = statuses.clone();
        c.set_error_handler(move |code, _| s.borrow_mut().push(code));
        c.add_handler(
            &HandlerId { user_agent_prefix: Some("curl"), path: Some("/boom"), ..Default::default() },
            Handler::new(HandlerKind::Raw, |_, _, _| DispatchOutcome::Error, None),
            Action::Append,
        );
        let r = req();
        let (outcome, _) = c.respond(&r, Some("curl/8.0"), None, "/boom", None);
        assert_eq!(outcome, DispatchOutcome::Error);
        assert_eq!(*statuses.borrow(), vec![500]);
    }

    #[test]
    fn mime_lookup_prefers_nested_over_suffix_only() {
        let mut c = HttpContent::new();
        c.set_mime_type(None, Some(".html"), "text", "html");
        c.set_mime_type(Some("/api/"), Some(".html"), "application", "xhtml+xml");
        c.set_default_mime_type("application", "octet-stream");
        assert_eq!(
            c.get_mime_type("/api/index.html"),
            Some(&("application".to_string(), "xhtml+xml".to_string()))
        );
        assert_eq!(
            c.get_mime_type("/other/index.html"),
            Some(&("text".to_string(), "html".to_string()))
        );
        assert_eq!(
            c.get_mime_type("/no/match"),
            Some(&("application".to_string(), "octet-stream".to_string()))
        );
    }

    #[test]
    fn add_data_serves_bytes_with_mime_table_content_type() {
        let mut c = HttpContent::new();
        c.set_mime_type(None, Some(".txt"), "text", "plain");
        c.add_data(&HandlerId { path: Some("/greeting.txt"), ..Default::default() }, Rc::new(b"hi".to_vec()), None, None);
        let r = req();
        let (outcome, served) = c.respond(&r, None, None, "/greeting.txt", None);
        assert_eq!(outcome, DispatchOutcome::Ok);
        let served = served.unwrap();
        assert_eq!(served.status, 200);
        assert_eq!(*served.bytes, b"hi".to_vec());
        assert_eq!(served.content_type, Some(("text".to_string(), "plain".to_string())));
    }

    #[test]
    fn add_file_directory_mode_rejects_traversal() {
        let mut c = HttpContent::new();
        c.add_file(&HandlerId { path_prefix: Some("/static/"), ..Default::default() }, "/srv/www", None);
        let mut r = req();
        r.url = "/static/../../etc/passwd".to_string();
        let path = r.url.clone();
        let (outcome, served) = c.respond(&r, None, None, &path, None);
        assert_eq!(outcome, DispatchOutcome::Chain);
        assert!(served.is_none());
    }

    #[test]
    fn cgi_get_query_decodes_into_pieces_s6() {
        let mut c = HttpContent::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = seen.clone();
        c.add_handler(
            &HandlerId { path: Some("/q"), ..Default::default() },
            Handler::new_cgi(
                move |_req, pieces, out| {
                    s.borrow_mut().extend_from_slice(pieces);
                    *out = Some(ServedBody::ok(b"ok".to_vec()));
                    DispatchOutcome::Ok
                },
                None,
            ),
            Action::Append,
        );
        let mut r = req();
        r.url = "/q?name=dave%20b&lvl=3".to_string();
        let (outcome, _) = c.respond(&r, None, None, "/q", None);
        assert_eq!(outcome, DispatchOutcome::Ok);
        assert_eq!(
            *seen.borrow(),
            vec![
                CgiPiece { id: Some("name".to_string()), bytes: b"dave b".to_vec() },
                CgiPiece { id: Some("lvl".to_string()), bytes: b"3".to_vec() },
            ]
        );
    }

    #[test]
    fn cgi_get_without_query_chains() {
        let mut c = HttpContent::new();
        c.add_handler(
            &HandlerId { path: Some("/q"), ..Default::default() },
            Handler::new_cgi(|_, _, _| DispatchOutcome::Ok, None),
            Action::Append,
        );
        let r = req();
        let (outcome, _) = c.respond(&r, None, None, "/q", None);
        assert_eq!(outcome, DispatchOutcome::Chain);
    }
}
