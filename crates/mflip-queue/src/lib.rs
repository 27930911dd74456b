//! Queues and record persistence for MediaFlipper.
//!
//! Built on the [`mflip_store::Store`] trait:
//! - [`JobQueue`]: the REQUEST and RUNNING queues with short-TTL advisory locks
//! - [`ContainerStore`]: job containers and their indices
//! - [`BulkListStore`]: bulk lists, bulk items, state/path indices and streamed reads
//! - [`ContainerLogStore`]: worker logs captured at cleanup

pub mod bulk;
pub mod container_log;
pub mod containers;
pub mod error;
pub mod queue;

pub use bulk::{collect_items, BulkItemStream, BulkListStore};
pub use container_log::ContainerLogStore;
pub use containers::ContainerStore;
pub use error::{QueueError, QueueResult};
pub use queue::{JobQueue, QueueName, LOCK_POLL_INTERVAL, LOCK_TTL};
