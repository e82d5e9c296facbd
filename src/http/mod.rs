pub mod content;
pub mod prefix_tree;
pub mod request;
pub mod response;

pub use content::{Action, CgiPiece, DispatchOutcome, Handler, HandlerId, HandlerKind, HttpContent, ServedBody};
pub use prefix_tree::PrefixTree;
pub use request::*;
pub use response::*;