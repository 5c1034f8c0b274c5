//! Persisted round-robin author selection
//!
//! The cursor for a (user, profile) pair only moves after a publish using the
//! selected author succeeded, so a failed attempt retries the same author.

use tracing::debug;

use crate::error::Result;
use crate::store::StateStore;
use crate::types::Profile;

/// Author picked for one publish attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorSelection {
    pub author: String,
    /// Index to commit on success; `None` for single-author profiles
    pub index: Option<usize>,
}

#[derive(Clone)]
pub struct AuthorRotator {
    store: StateStore,
}

impl AuthorRotator {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Pick the author for the next publish to `profile` on behalf of `user_id`.
    ///
    /// Returns `None` when the profile has no authors configured. Does not
    /// modify the persisted cursor.
    pub async fn select(&self, user_id: &str, profile: &Profile) -> Result<Option<AuthorSelection>> {
        match profile.authors.len() {
            0 => Ok(None),
            1 => Ok(Some(AuthorSelection {
                author: profile.authors[0].clone(),
                index: None,
            })),
            count => {
                let last = self.store.get_last_author_index(user_id, &profile.id).await?;
                let next = next_index(last, count);
                Ok(Some(AuthorSelection {
                    author: profile.authors[next].clone(),
                    index: Some(next),
                }))
            }
        }
    }

    /// Record that `selection` was used for a successful publish
    pub async fn commit(&self, user_id: &str, profile: &Profile, selection: &AuthorSelection) -> Result<()> {
        let Some(index) = selection.index else {
            return Ok(());
        };
        self.store
            .set_last_author_index(user_id, &profile.id, index as i64)
            .await?;
        debug!(
            user_id,
            profile_id = %profile.id,
            author = %selection.author,
            index,
            "Author rotation advanced"
        );
        Ok(())
    }
}

/// `(last + 1) mod count`, treating negative or stale indices as "none used yet"
fn next_index(last: i64, count: usize) -> usize {
    if last < 0 {
        return 0;
    }
    ((last as u64 + 1) % count as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryRepository;
    use std::sync::Arc;

    fn rotator() -> (AuthorRotator, StateStore) {
        let store = StateStore::new(Arc::new(MemoryRepository::new()));
        (AuthorRotator::new(store.clone()), store)
    }

    #[test]
    fn test_next_index() {
        assert_eq!(next_index(-1, 3), 0);
        assert_eq!(next_index(0, 3), 1);
        assert_eq!(next_index(2, 3), 0);
        assert_eq!(next_index(7, 3), 2);
    }

    #[tokio::test]
    async fn test_k_successes_leave_index_at_k_minus_one_mod_n() {
        let (rotator, store) = rotator();
        let profile = Profile::new("blog", "Blog").with_authors(["ana", "ben", "cy"]);

        let mut used = Vec::new();
        for _ in 0..5 {
            let selection = rotator.select("user", &profile).await.unwrap().unwrap();
            used.push(selection.author.clone());
            rotator.commit("user", &profile, &selection).await.unwrap();
        }

        assert_eq!(used, vec!["ana", "ben", "cy", "ana", "ben"]);
        assert_eq!(
            store.get_last_author_index("user", "blog").await.unwrap(),
            (5 - 1) % 3
        );
    }

    #[tokio::test]
    async fn test_select_without_commit_does_not_advance() {
        let (rotator, store) = rotator();
        let profile = Profile::new("blog", "Blog").with_authors(["ana", "ben"]);

        let first = rotator.select("user", &profile).await.unwrap().unwrap();
        let retry = rotator.select("user", &profile).await.unwrap().unwrap();
        assert_eq!(first, retry);
        assert_eq!(store.get_last_author_index("user", "blog").await.unwrap(), -1);
    }

    #[tokio::test]
    async fn test_single_author_bypasses_bookkeeping() {
        let (rotator, store) = rotator();
        let profile = Profile::new("blog", "Blog").with_authors(["solo"]);

        let selection = rotator.select("user", &profile).await.unwrap().unwrap();
        assert_eq!(selection.author, "solo");
        assert_eq!(selection.index, None);

        rotator.commit("user", &profile, &selection).await.unwrap();
        assert_eq!(store.get_last_author_index("user", "blog").await.unwrap(), -1);
    }

    #[tokio::test]
    async fn test_no_authors() {
        let (rotator, _store) = rotator();
        let profile = Profile::new("blog", "Blog");
        assert!(rotator.select("user", &profile).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cursors_are_per_user_and_profile() {
        let (rotator, _store) = rotator();
        let a = Profile::new("a", "A").with_authors(["x", "y"]);
        let b = Profile::new("b", "B").with_authors(["x", "y"]);

        let selection = rotator.select("u1", &a).await.unwrap().unwrap();
        rotator.commit("u1", &a, &selection).await.unwrap();

        assert_eq!(rotator.select("u1", &a).await.unwrap().unwrap().author, "y");
        assert_eq!(rotator.select("u1", &b).await.unwrap().unwrap().author, "x");
        assert_eq!(rotator.select("u2", &a).await.unwrap().unwrap().author, "x");
    }

    #[tokio::test]
    async fn test_shrunk_author_list_wraps() {
        let (rotator, store) = rotator();
        store.set_last_author_index("user", "blog", 4).await.unwrap();
        let profile = Profile::new("blog", "Blog").with_authors(["ana", "ben"]);

        let selection = rotator.select("user", &profile).await.unwrap().unwrap();
        assert_eq!(selection.index, Some(1));
    }
}
