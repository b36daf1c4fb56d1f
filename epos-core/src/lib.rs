//! Identity-cached entity graph for a speech database.
//!
//! This crate turns the paginated REST API of a speech database into an
//! in-memory object graph:
//! - Every record is materialized exactly once per session, so entities
//!   can be compared and deduplicated by identity
//! - Any collection of one entity type supports the same filter, set,
//!   and projection operations
//! - Nested records (a speech's cluster, its work, its author) resolve
//!   recursively through the session's caches
//!
//! # Quick Start
//!
//! ```ignore
//! use epos_core::{Gender, Session, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = Session::new(SessionConfig::new("https://example.org/api"));
//!
//!     let speeches = session.speeches(&[("work_id", "10")]).await?;
//!     let goddesses = speeches
//!         .speakers()
//!         .filter_genders(&[Gender::Female], false)
//!         .filter(|i| i.being() == Some(epos_core::Being::Divine));
//!
//!     for speaker in &goddesses {
//!         println!("{}", speaker.display_name().unwrap_or("?"));
//!     }
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod cache;
pub mod collection;
pub mod entities;
pub mod session;
pub mod testing;

// Re-export the transport layer for callers that configure or mock it.
pub use speechdb;

// Primary public API
pub use builder::BuildError;
pub use collection::Collection;
pub use entities::{
    Author, Being, Character, CharacterInstance, Entity, EntityId, EntityKind, Gender,
    NaturalOrder, Number, Speech, SpeechCluster, Work,
};
pub use session::{Session, SessionConfig, SessionError};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{author_record, mock_session, page};

    #[tokio::test]
    async fn test_quick_round_trip() {
        let (session, transport) = mock_session();
        transport.queue_page(page(1, None, vec![author_record(1, "Homer")]));

        let authors = session.authors(&[]).await.unwrap();

        assert_eq!(authors.len(), 1);
        assert_eq!(authors[0].name.as_deref(), Some("Homer"));
        assert_eq!(Author::KIND, EntityKind::Author);
    }
}
