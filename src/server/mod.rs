/// HTTP backend for CTT Arena.
///
/// [`Backend`] holds the user table and the merge rules; the [`Router`]
/// accepts HTTP/1.1 connections and maps JSON requests onto it.
pub mod backend;
pub mod router;

pub use backend::Backend;
pub use router::Router;
