pub use crate::config::{Config, RouteConfig, ServerConfig};
pub use crate::error::{Error, Result};
pub use crate::hook::{Hook, NotifyCtx};
pub use crate::http::{
    Action, CgiPiece, DispatchOutcome, Handler, HandlerId, HandlerKind, HttpContent, HttpRequest,
    HttpResponse, PrefixTree, ServedBody,
};
pub use crate::main_loop::MainLoop;
pub use crate::stream::{IoSource, Stream};

pub const READ_BUF_SIZE: usize = 4096;

pub const HTTP_OK: u16 = 200;
pub const HTTP_BAD_REQUEST: u16 = 400;
pub const HTTP_FORBIDDEN: u16 = 403;
pub const HTTP_NOT_FOUND: u16 = 404;
pub const HTTP_METHOD_NOT_ALLOWED: u16 = 405;
pub const HTTP_PAYLOAD_TOO_LARGE: u16 = 413;
pub const HTTP_URI_TOO_LONG: u16 = 414;
pub const HTTP_INTERNAL_SERVER_ERROR: u16 = 500;
pub const HTTP_NOT_IMPLEMENTED: u16 = 501;
pub const HTTP_FOUND: u16 = 302;

pub const MAX_READ_DATA: usize = u16::MAX as usize;
