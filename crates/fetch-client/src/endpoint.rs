//! List-fetching operations the dispatcher can paginate
//!
//! Each `Endpoint` is a tagged variant carrying its target. The dispatcher
//! only needs `kind()` (for pacing, logging and metrics labels); clients
//! interpret the payload.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Maximum ids resolved by one lookup call.
pub const LOOKUP_CHUNK: usize = 100;

/// Target account of a user-scoped endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRef {
    Id(u64),
    ScreenName(String),
}

impl UserRef {
    /// Query parameter pair identifying this user.
    pub fn query_pair(&self) -> (&'static str, String) {
        match self {
            UserRef::Id(id) => ("user_id", id.to_string()),
            UserRef::ScreenName(name) => ("screen_name", name.clone()),
        }
    }
}

impl fmt::Display for UserRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UserRef::Id(id) => write!(f, "{id}"),
            UserRef::ScreenName(name) => write!(f, "@{name}"),
        }
    }
}

/// One logical list-fetching operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Endpoint {
    /// Posts the user liked.
    Favorites { user: UserRef },
    /// Ids of accounts the user follows.
    FriendIds { user: UserRef },
    /// Ids of accounts following the user.
    FollowerIds { user: UserRef },
    /// Posts on the user's timeline.
    UserTimeline {
        user: UserRef,
        #[serde(default = "default_true")]
        include_retweets: bool,
        #[serde(default)]
        exclude_replies: bool,
    },
    /// Hydrate user ids into user objects, `LOOKUP_CHUNK` per call.
    UsersLookup { ids: Vec<u64> },
    /// Hydrate post ids into post objects, `LOOKUP_CHUNK` per call.
    StatusesLookup { ids: Vec<u64> },
}

fn default_true() -> bool {
    true
}

impl Endpoint {
    pub fn timeline(user: UserRef) -> Self {
        Endpoint::UserTimeline {
            user,
            include_retweets: true,
            exclude_replies: false,
        }
    }

    pub fn kind(&self) -> EndpointKind {
        match self {
            Endpoint::Favorites { .. } => EndpointKind::Favorites,
            Endpoint::FriendIds { .. } => EndpointKind::FriendIds,
            Endpoint::FollowerIds { .. } => EndpointKind::FollowerIds,
            Endpoint::UserTimeline { .. } => EndpointKind::UserTimeline,
            Endpoint::UsersLookup { .. } => EndpointKind::UsersLookup,
            Endpoint::StatusesLookup { .. } => EndpointKind::StatusesLookup,
        }
    }

    /// Resource path relative to the API base URL.
    pub fn path(&self) -> &'static str {
        match self.kind() {
            EndpointKind::Favorites => "/favorites/list.json",
            EndpointKind::FriendIds => "/friends/ids.json",
            EndpointKind::FollowerIds => "/followers/ids.json",
            EndpointKind::UserTimeline => "/statuses/user_timeline.json",
            EndpointKind::UsersLookup => "/users/lookup.json",
            EndpointKind::StatusesLookup => "/statuses/lookup.json",
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Favorites { user }
            | Endpoint::FriendIds { user }
            | Endpoint::FollowerIds { user }
            | Endpoint::UserTimeline { user, .. } => write!(f, "{}({user})", self.kind()),
            Endpoint::UsersLookup { ids } | Endpoint::StatusesLookup { ids } => {
                write!(f, "{}({} ids)", self.kind(), ids.len())
            }
        }
    }
}

/// Endpoint discriminant, used where the payload is irrelevant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    Favorites,
    FriendIds,
    FollowerIds,
    UserTimeline,
    UsersLookup,
    StatusesLookup,
}

impl EndpointKind {
    /// Label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            EndpointKind::Favorites => "favorites",
            EndpointKind::FriendIds => "friend_ids",
            EndpointKind::FollowerIds => "follower_ids",
            EndpointKind::UserTimeline => "user_timeline",
            EndpointKind::UsersLookup => "users_lookup",
            EndpointKind::StatusesLookup => "statuses_lookup",
        }
    }

    /// Documented sustained request rate for one credential.
    pub fn requests_per_minute(&self) -> u32 {
        match self {
            EndpointKind::FriendIds | EndpointKind::FollowerIds => 1,
            EndpointKind::Favorites => 5,
            EndpointKind::UserTimeline
            | EndpointKind::UsersLookup
            | EndpointKind::StatusesLookup => 60,
        }
    }

    /// Minimum spacing between two calls on the same credential when pacing.
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs(60) / self.requests_per_minute()
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
