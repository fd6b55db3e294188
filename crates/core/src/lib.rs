pub mod actions;
mod blurb;
pub mod chapter;
pub mod comment;
pub mod error;
pub mod gate;
pub mod page;
pub mod pagination;
pub mod search;
pub mod series;
pub mod session;
pub mod task;
pub mod transport;
pub mod user;
pub mod work;

pub use actions::BookmarkOptions;
pub use chapter::{Chapter, ChapterSnapshot};
pub use comment::{Comment, CommentSnapshot, CommentThread};
pub use error::{ArchiveError, Result};
pub use gate::{Clock, GateConfig, RateGate, SystemClock};
pub use page::Page;
pub use pagination::FetchMode;
pub use search::{
    CountBound, Rating, SearchQuery, SearchResults, SortColumn, SortDirection, search_works,
};
pub use series::{Series, SeriesSnapshot};
pub use session::{Session, Subscription};
pub use task::Task;
pub use transport::{BASE_URL, Transport, TransportConfig};
pub use user::{User, UserSnapshot};
pub use work::{Work, WorkSnapshot};
