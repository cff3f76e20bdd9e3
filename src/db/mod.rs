//! Feed persistence: records, item keys, and the updater.
//!
//! - `keys`: the item-key codec binding sequence ids to raw item ids.
//! - `model`: the stored feed and item records with sibling resolution.
//! - `update`: the snapshot-reconciliation algorithm.
//!
//! External modules import from `feedmill::db`, which re-exports the
//! commonly used pieces.

pub mod keys;
pub mod model;
pub mod update;

pub use keys::{make_hash, ItemKey};
pub use model::{url_key, Feed, FeedItem, NEXT_CHECK_INDEX};
pub use update::{update_feed, IdSource, MultiError, UpdateError, MAXIMUM_FEED_ITEMS};
