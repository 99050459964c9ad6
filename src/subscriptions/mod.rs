//! Live per-key subscriptions.
//!
//! [`KeyedStore::get_once_and_stream`](crate::KeyedStore::get_once_and_stream)
//! returns a [`LiveQuery`]: a cold stream that captured the key's value when
//! it was built. Subscribing to it registers a backend change listener and
//! yields a [`Subscription`], which delivers:
//! - the captured snapshot, first
//! - every later value that differs from the last one delivered
//!
//! A subscription never completes on its own. A backend or decode failure
//! while following changes is delivered once as a terminal error. Dropping
//! the subscription unregisters its listener.
//!
//! # Example
//!
//! ```ignore
//! let query = store.get_once_and_stream(&100)?;
//! let subscription = query.subscribe();
//!
//! loop {
//!     match subscription.recv() {
//!         Ok(repository) if repository.is_none() => println!("nothing yet"),
//!         Ok(repository) => println!("now: {}", repository.name),
//!         Err(e) => break,
//!     }
//! }
//! ```

mod query;
mod subscription;

pub use query::LiveQuery;
pub use subscription::Subscription;
