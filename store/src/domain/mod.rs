//! Domain model and store services.
//!
//! Entities carry validated identifiers and serde representations; the store
//! services orchestrate reads and writes against the [`ports::StorageEngine`]
//! port using the composite-key scheme in [`keys`].

pub mod batch;
pub mod cache;
pub mod follow;
pub mod follows;
pub mod ids;
pub mod keys;
pub mod list;
pub mod lists;
pub mod metadata;
pub mod ports;
pub mod session;
pub mod sessions;
pub mod tokens;
pub mod user;
pub mod users;
pub mod watch_history;
pub mod watched;

pub use batch::BatchExecutor;
pub use cache::{CacheError, CacheStore};
pub use follow::FollowEdge;
pub use follows::{FollowError, FollowStore};
pub use ids::{CustomListId, IdValidationError, ListId, SeriesId, SessionId, UserId};
pub use list::{ListItem, ListItemView, ListSort};
pub use lists::{AddToListRequest, ListError, ListStore};
pub use metadata::{EpisodeMetadata, SeasonMetadata, SeasonSource, SeriesMetadata};
pub use session::{ExternalProviderLink, Session};
pub use sessions::{SessionError, SessionStore};
pub use tokens::{TokenError, TokenStore, WebhookToken};
pub use user::{User, UserPatch};
pub use users::{UserError, UserStore};
pub use watch_history::{
    MarkWatchedRequest, WatchHistoryError, WatchHistoryStore, WatchedAtRange,
};
pub use watched::{WatchProvider, WatchedEpisode, WatchedEpisodeView};
