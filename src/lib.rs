pub mod config;
pub use config::{Config, ConfigError};

pub mod metadata;
pub use metadata::{AudioFormat, MetadataReader, ReadError, TagReader, TrackMetadata};

pub mod naming;
pub use naming::NamingTemplate;

pub mod placement;
pub use placement::{PlacementResolver, PlacementResult};

pub mod playlist;
pub use playlist::{Playlist, PlaylistStore};

pub mod smart;
pub use smart::{PlaylistSelector, SmartPlaylistMatcher, SmartPlaylistRule, SmartSelector};

pub mod organize;
pub use organize::{CancelToken, OrganizeBuilder, OrganizeEngine, RunReport};

pub mod library;

pub mod scan;
