//! Invokers - run a call plan synchronously or through the background loop
//!
//! - `sync.rs` - blocking execution under the library lock
//! - `deferred.rs` - argument capture, deferred closures, `PendingCall`

mod deferred;
mod sync;

pub use deferred::{prepare, submit, PendingCall};
pub use sync::invoke as invoke_sync;
